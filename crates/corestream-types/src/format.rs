use crate::HwDeviceType;

/// Immutable description of an opened media. Populated once during
/// construction of a decoder and never mutated afterward.
#[derive(Debug, Clone)]
pub struct Format {
    /// The location string the decoder was opened with (path or URL).
    pub location: String,
    /// Non-negative; `0` if unknown, or zeroed by the duration-safety check
    /// when the media is degenerate (at most one frame).
    pub duration_micros: i64,
    /// `0` if no audio stream was selected.
    pub sample_rate: u32,
    /// `0` if no audio stream was selected.
    pub channels: u16,
    /// `0` if no video stream was selected.
    pub width: u32,
    /// `0` if no video stream was selected.
    pub height: u32,
    /// `0.0` if unknown, or if duration is below one inter-frame interval.
    pub frame_rate: f64,
    /// The hardware type actually in use, or `HwDeviceType::None`.
    pub hw_device_type: HwDeviceType,
    /// Exact byte count a caller's buffer must provide to `decode_video`,
    /// including the codec library's trailing input-buffer padding.
    pub video_buffer_capacity: usize,
}

impl Format {
    pub(crate) fn new(location: String) -> Self {
        Self {
            location,
            duration_micros: 0,
            sample_rate: 0,
            channels: 0,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            hw_device_type: HwDeviceType::None,
            video_buffer_capacity: 0,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }

    pub fn has_video(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}
