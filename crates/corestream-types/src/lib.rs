// crates/corestream-types/src/lib.rs
//
// Plain data and error types shared by the decode and sampler engines, plus
// the `HwDeviceType` enum (a safe mirror of `AVHWDeviceType`). No `cpal`
// here — just the value types that cross the boundary between the engines
// and whatever embeds this core.

mod error;
mod format;
mod frame;
mod hwaccel;

pub use error::{CoreError, CoreResult};
pub use format::Format;
pub use frame::{AudioFrame, VideoFrame};
pub use hwaccel::HwDeviceType;

/// Bytes-per-sample of the interleaved 32-bit float PCM this core produces and consumes.
pub const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Bytes-per-pixel of the packed BGRA layout this core produces.
pub const BGRA_BYTES_PER_PIXEL: usize = 4;
