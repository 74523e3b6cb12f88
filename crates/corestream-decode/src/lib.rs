// Demuxing and decoding engine: opens one media location at a time, decodes
// audio to interleaved f32 PCM and video to packed BGRA, and exposes a
// process-wide hardware device context cache shared across decoders.

mod decoder;
mod hw_registry;

pub use decoder::{Decoder, DecoderOptions};
pub use hw_registry::{HwDeviceContextHandle, HwRegistry};

pub use corestream_types::{AudioFrame, CoreError, CoreResult, Format, HwDeviceType, VideoFrame};
