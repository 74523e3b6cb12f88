// Four-category error surface. Kept separate from any one engine's crate so
// that decode, sampler and bridge all return the same type and a host can
// match on the category without downcasting.

/// The category a caller matches on. Mirrors the four exception classes a
/// foreign bridge is expected to translate these into.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("decoder error: {0}")]
    Decoder(String),

    #[error("hardware acceleration error: {0}")]
    HardwareAcceleration(String),

    #[error("sampler error: {0}")]
    Sampler(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl CoreError {
    pub fn decoder(msg: impl Into<String>) -> Self {
        Self::Decoder(msg.into())
    }

    pub fn hardware_acceleration(msg: impl Into<String>) -> Self {
        Self::HardwareAcceleration(msg.into())
    }

    pub fn sampler(msg: impl Into<String>) -> Self {
        Self::Sampler(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
