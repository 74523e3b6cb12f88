// Audio playback engine: a blocking `cpal` output stream driven through a
// phase-vocoder time/pitch stretcher, for realizing playback-speed control
// without pitch shift plus per-call volume scaling.

mod sampler;
mod stretcher;

pub use sampler::Sampler;
pub use stretcher::Stretcher;

pub use corestream_types::{CoreError, CoreResult};
