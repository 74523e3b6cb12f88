// The externally-visible entry points: one handle table per engine type,
// translating handle-table lookups and the two engines' already-typed
// errors into the host-visible surface. No JNI/C-ABI marshaling layer is
// implemented here — that belongs to whatever embeds this core — so every
// method below takes and returns ordinary Rust values rather than raw
// pointers or byte-array encodings. The one exception is the raw buffer
// table below: §4.6(a) makes buffer allocate/free a bridge responsibility
// in its own right (not merely a `decodeVideo` parameter), so it is
// realized here as a third handle table rather than folded into
// `decode_video`'s signature.

use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use corestream_decode::{Decoder, DecoderOptions, HwRegistry};
use corestream_sampler::Sampler;
use corestream_types::{AudioFrame, CoreError, CoreResult, Format, HwDeviceType, VideoFrame};

use crate::handle::{Handle, HandleTable};

/// Owns the decoder and sampler handle tables, the raw buffer table video
/// frames are decoded into, and the process-wide hardware device registry
/// they share. Constructing one performs one-time init (standing up the
/// hardware registry); dropping one performs its teardown (clearing all
/// three handle tables, which releases every decoder/sampler/buffer still
/// outstanding, then the registry's own cached device contexts via
/// `HwRegistry`'s `Drop`).
pub struct ForeignBridge {
    decoders: HandleTable<Decoder>,
    samplers: HandleTable<Sampler>,
    buffers: HandleTable<Mutex<Vec<u8>>>,
    hw_registry: Arc<HwRegistry>,
}

impl ForeignBridge {
    pub fn new() -> Self {
        info!("bridge: initialized");
        Self {
            decoders: HandleTable::new(),
            samplers: HandleTable::new(),
            buffers: HandleTable::new(),
            hw_registry: Arc::new(HwRegistry::new()),
        }
    }

    // ── Raw data buffers ────────────────────────────────────────────────────

    /// Allocates a zeroed raw byte buffer of `capacity` bytes and returns a
    /// handle to it. The handle stands in for the native pointer
    /// `allocate(capacity)` returns in the original (§6): this bridge has no
    /// FFI layer to hand a real pointer across, so ownership of the backing
    /// `Vec<u8>` is kept here and the caller addresses it by handle, the same
    /// opaque-integer convention used for decoders and samplers.
    pub fn allocate_buffer(&self, capacity: usize) -> CoreResult<Handle> {
        if capacity == 0 {
            return Err(CoreError::runtime("buffer capacity must be positive"));
        }
        Ok(self.buffers.insert(Mutex::new(vec![0_u8; capacity])))
    }

    /// Releases a buffer handle. A no-op on an already-freed or unknown
    /// handle, matching `free(pointer)`'s "no-op on 0" semantics (§6)
    /// generalized to any handle that no longer resolves.
    pub fn free_buffer(&self, handle: Handle) {
        let _ = self.buffers.remove(handle);
    }

    // ── Decoder entry points ────────────────────────────────────────────────

    pub fn list_hw_accelerations(&self) -> Vec<HwDeviceType> {
        self.hw_registry.list_available()
    }

    pub fn create_decoder(
        &self,
        location: &str,
        find_audio: bool,
        find_video: bool,
        decode_audio: bool,
        decode_video: bool,
        hw_candidates: Vec<HwDeviceType>,
    ) -> CoreResult<Handle> {
        let options = DecoderOptions { find_audio, find_video, decode_audio, decode_video, hw_candidates };
        let decoder = Decoder::new(location, &options, &self.hw_registry)?;
        Ok(self.decoders.insert(decoder))
    }

    pub fn get_format(&self, handle: Handle) -> CoreResult<Format> {
        Ok(self.decoders.get(handle)?.format())
    }

    pub fn decode_audio(&self, handle: Handle) -> CoreResult<Option<AudioFrame>> {
        self.decoders.get(handle)?.decode_audio()
    }

    /// Decodes into the buffer previously obtained from `allocate_buffer`.
    /// `buffer_handle`'s capacity must be at least `format.video_buffer_capacity`,
    /// matching the `decodeVideo(handle, buffer address, capacity)` entry
    /// point (§6) with the address/capacity pair realized as one handle.
    pub fn decode_video(&self, handle: Handle, buffer_handle: Handle) -> CoreResult<Option<VideoFrame>> {
        let decoder = self.decoders.get(handle)?;
        let buffer = self.buffers.get(buffer_handle)?;
        let mut bytes = buffer.lock();
        decoder.decode_video(&mut bytes)
    }

    pub fn seek_to(&self, handle: Handle, timestamp_micros: i64, keyframes_only: bool) -> CoreResult<()> {
        self.decoders.get(handle)?.seek_to(timestamp_micros, keyframes_only)
    }

    pub fn reset_decoder(&self, handle: Handle) -> CoreResult<()> {
        self.decoders.get(handle)?.reset()
    }

    pub fn delete_decoder(&self, handle: Handle) -> CoreResult<()> {
        self.decoders.remove(handle)?;
        Ok(())
    }

    // ── Sampler entry points ────────────────────────────────────────────────

    pub fn create_sampler(&self, sample_rate: u32, channels: u16) -> CoreResult<Handle> {
        let sampler = Sampler::new(sample_rate, channels)?;
        Ok(self.samplers.insert(sampler))
    }

    pub fn start_sampler(&self, handle: Handle) -> CoreResult<i64> {
        self.samplers.get(handle)?.start()
    }

    pub fn write_sampler(&self, handle: Handle, bytes: &[u8], volume: f32, playback_speed_factor: f32) -> CoreResult<()> {
        self.samplers.get(handle)?.write(bytes, volume, playback_speed_factor)
    }

    pub fn stop_sampler(&self, handle: Handle) -> CoreResult<()> {
        self.samplers.get(handle)?.stop()
    }

    pub fn flush_sampler(&self, handle: Handle) -> CoreResult<()> {
        self.samplers.get(handle)?.flush()
    }

    pub fn drain_sampler(&self, handle: Handle, volume: f32, playback_speed_factor: f32) -> CoreResult<()> {
        self.samplers.get(handle)?.drain(volume, playback_speed_factor)
    }

    pub fn delete_sampler(&self, handle: Handle) -> CoreResult<()> {
        self.samplers.remove(handle)?;
        Ok(())
    }

    /// Number of decoder/sampler/buffer handles currently outstanding.
    /// Exposed for host diagnostics and tests; not one of the entry points a
    /// host binds to.
    pub fn outstanding_handles(&self) -> (usize, usize, usize) {
        (self.decoders.len(), self.samplers.len(), self.buffers.len())
    }
}

impl Default for ForeignBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ForeignBridge {
    fn drop(&mut self) {
        self.decoders.clear();
        self.samplers.clear();
        self.buffers.clear();
        self.hw_registry.clean_up();
        info!("bridge: torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_hw_accelerations_never_includes_none() {
        let bridge = ForeignBridge::new();
        assert!(!bridge.list_hw_accelerations().contains(&HwDeviceType::None));
    }

    #[test]
    fn operations_on_an_unknown_decoder_handle_are_runtime_errors() {
        let bridge = ForeignBridge::new();
        assert!(bridge.get_format(999).is_err());
        assert!(bridge.decode_audio(999).is_err());
        assert!(bridge.decode_video(999, 1).is_err());
        assert!(bridge.seek_to(999, 0, false).is_err());
        assert!(bridge.reset_decoder(999).is_err());
        assert!(bridge.delete_decoder(999).is_err());
    }

    #[test]
    fn allocate_buffer_rejects_zero_capacity() {
        let bridge = ForeignBridge::new();
        assert!(bridge.allocate_buffer(0).is_err());
    }

    #[test]
    fn allocate_then_free_buffer_round_trips() {
        let bridge = ForeignBridge::new();
        let before = bridge.outstanding_handles();
        let handle = bridge.allocate_buffer(1024).expect("allocate");
        assert_eq!(bridge.outstanding_handles(), (before.0, before.1, before.2 + 1));
        bridge.free_buffer(handle);
        assert_eq!(bridge.outstanding_handles(), before);
    }

    #[test]
    fn free_buffer_on_an_unknown_handle_is_a_no_op() {
        let bridge = ForeignBridge::new();
        bridge.free_buffer(999);
        bridge.free_buffer(999);
    }

    #[test]
    fn decode_video_with_an_unknown_buffer_handle_is_a_runtime_error() {
        let bridge = ForeignBridge::new();
        assert!(bridge.decode_video(999, 999).is_err());
    }

    #[test]
    fn operations_on_an_unknown_sampler_handle_are_runtime_errors() {
        let bridge = ForeignBridge::new();
        assert!(bridge.start_sampler(999).is_err());
        assert!(bridge.write_sampler(999, &[0u8; 8], 1.0, 1.0).is_err());
        assert!(bridge.stop_sampler(999).is_err());
        assert!(bridge.flush_sampler(999).is_err());
        assert!(bridge.drain_sampler(999, 1.0, 1.0).is_err());
        assert!(bridge.delete_sampler(999).is_err());
    }

    #[test]
    fn create_decoder_on_an_unopenable_location_does_not_leak_a_handle() {
        let bridge = ForeignBridge::new();
        let before = bridge.outstanding_handles();
        assert!(bridge
            .create_decoder("/nonexistent/path/does/not/exist.mp4", true, true, true, true, vec![])
            .is_err());
        assert_eq!(bridge.outstanding_handles(), before);
    }

    #[test]
    fn delete_then_reuse_of_a_sampler_handle_fails() {
        let bridge = ForeignBridge::new();
        let handle = match bridge.create_sampler(48_000, 2) {
            Ok(h) => h,
            Err(_) => return, // no output device available in this environment
        };
        assert!(bridge.delete_sampler(handle).is_ok());
        assert!(bridge.start_sampler(handle).is_err());
    }
}
