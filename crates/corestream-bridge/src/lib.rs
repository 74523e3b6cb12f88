// The externally-visible surface: one `ForeignBridge` struct owning handle
// tables for decoders, samplers, and raw output buffers, plus the shared
// hardware registry they draw from. This crate has no FFI/marshaling code
// of its own — it is the thing a JNI/C-ABI layer or any other host binding
// would wrap.

mod bridge;
mod handle;

pub use bridge::ForeignBridge;
pub use handle::Handle;

pub use corestream_types::{AudioFrame, CoreError, CoreResult, Format, HwDeviceType, VideoFrame};
