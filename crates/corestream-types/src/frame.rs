/// One decoded audio chunk. `bytes` is interleaved little-endian 32-bit
/// float PCM; `bytes.len()` is always a whole number of sample-frames times
/// `channels * 4`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub bytes: Vec<u8>,
    pub timestamp_micros: i64,
}

/// One decoded video frame. `remaining` is the number of valid bytes the
/// decoder wrote into the caller-supplied buffer; the layout is always
/// packed BGRA at `width * height`, stride `width * 4`, no row padding.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame {
    pub remaining: usize,
    pub timestamp_micros: i64,
}
