// Per-output audio pipeline: interleaved f32 in, time-stretched +
// volume-scaled + clamped f32 out, blocking-written to a `cpal` output
// stream. All public operations take the same exclusive lock, matching the
// Decoder's discipline (`write`, `stop`, `flush`, `drain` are mutually
// exclusive and not reentrant).

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;

use corestream_types::{CoreError, CoreResult, SAMPLE_SIZE};

use crate::stretcher::Stretcher;

/// Frames of device-side buffering requested of `cpal`, standing in for
/// PortAudio's `defaultHighOutputLatency` suggested-latency knob the
/// original reference implementation asks for — `cpal` has no direct
/// equivalent, so a fixed "high" buffer size is the closest match.
const HIGH_LATENCY_FRAMES: u32 = 4096;

/// Capacity, in interleaved samples, of the channel standing between
/// `write`/`drain` and the device callback. A bounded channel gives the
/// same backpressure PortAudio's blocking `Pa_WriteStream` provides: once
/// it's full, the sending thread blocks until the callback drains it.
const CHANNEL_CAPACITY_SAMPLES: usize = 1 << 15;

/// `cpal::Stream` is `!Send` on some platforms for FFI reasons that don't
/// apply here: the stream is only ever touched from behind this module's
/// `Mutex`, one caller at a time.
struct StreamHandle(cpal::Stream);
unsafe impl Send for StreamHandle {}

struct SamplerState {
    sample_rate: u32,
    channels: u16,
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    stream: Option<StreamHandle>,
    sender: Option<Sender<f32>>,
    stretcher: Stretcher,
    running: bool,
}

/// Per-output audio pipeline. Owns one `cpal` output stream and one
/// [`Stretcher`]; state machine is `created -> started -> (writing <->
/// stopped) -> closed`.
pub struct Sampler {
    state: Mutex<SamplerState>,
}

impl Sampler {
    pub fn new(sample_rate: u32, channels: u16) -> CoreResult<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(CoreError::sampler("sample rate and channel count must be positive"));
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| CoreError::sampler("no default output device available"))?;
        let supported = device
            .default_output_config()
            .map_err(|e| CoreError::sampler(format!("could not read default output config: {e}")))?;
        let sample_format = supported.sample_format();

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(HIGH_LATENCY_FRAMES),
        };

        let stretcher = Stretcher::preset_default(channels as usize, sample_rate)?;

        info!("sampler: created for {sample_rate} Hz / {channels} ch");

        Ok(Self {
            state: Mutex::new(SamplerState {
                sample_rate,
                channels,
                device,
                config,
                sample_format,
                stream: None,
                sender: None,
                stretcher,
                running: false,
            }),
        })
    }

    /// Starts (or resumes) the output stream. Illegal while already started.
    /// Returns the estimated end-to-end latency in microseconds: the
    /// device's configured buffer plus the stretcher's own input + output
    /// latency, converted to time at this sampler's sample rate.
    pub fn start(&self) -> CoreResult<i64> {
        let mut state = self.state.lock();
        if state.running {
            return Err(CoreError::sampler("sampler is already started"));
        }

        if let Some(handle) = &state.stream {
            handle.0.play().map_err(|e| CoreError::sampler(format!("failed to resume output stream: {e}")))?;
        } else {
            let (sender, receiver) = bounded::<f32>(CHANNEL_CAPACITY_SAMPLES);
            let stream = build_output_stream(&state.device, &state.config, state.sample_format, receiver)?;
            stream.play().map_err(|e| CoreError::sampler(format!("failed to start output stream: {e}")))?;
            state.stream = Some(StreamHandle(stream));
            state.sender = Some(sender);
        }
        state.running = true;

        let device_latency_micros =
            (HIGH_LATENCY_FRAMES as f64 / state.sample_rate as f64) * 1_000_000.0;
        let stretch_latency_micros = ((state.stretcher.input_latency() + state.stretcher.output_latency()) as f64
            / state.sample_rate as f64)
            * 1_000_000.0;
        let total = (device_latency_micros + stretch_latency_micros).round() as i64;

        info!("sampler: started, estimated latency {total}us");
        Ok(total)
    }

    /// Time-stretches `bytes` by `1 / speed_factor`, scales by `volume`,
    /// clamps to `[-1, 1]`, and blocking-writes the result to the device.
    pub fn write(&self, bytes: &[u8], volume: f32, speed_factor: f32) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(CoreError::sampler("sampler is not started"));
        }
        if bytes.is_empty() {
            return Err(CoreError::sampler("cannot write an empty sample buffer"));
        }
        let frame_bytes = state.channels as usize * SAMPLE_SIZE;
        if bytes.len() % frame_bytes != 0 {
            return Err(CoreError::sampler("sample buffer length is not a whole number of sample-frames"));
        }
        if speed_factor <= 0.0 {
            return Err(CoreError::sampler("playback speed factor must be positive"));
        }

        let channels = state.channels as usize;
        let in_samples = bytes.len() / frame_bytes;
        let out_samples = (in_samples as f64 / speed_factor as f64).floor() as usize;

        let planar_in = deinterleave(bytes, channels, in_samples);
        let mut planar_out = vec![vec![0.0_f32; out_samples]; channels];
        state.stretcher.process(&planar_in, in_samples, &mut planar_out, out_samples)?;

        let interleaved = interleave_with_volume(&planar_out, volume);
        send_blocking(state.sender.as_ref(), &interleaved)
    }

    /// Aborts in-flight playback without closing the stream; it may be
    /// started again afterward.
    pub fn stop(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if let Some(handle) = &state.stream {
            handle.0.pause().map_err(|e| CoreError::sampler(format!("failed to abort output stream: {e}")))?;
        }
        state.running = false;
        debug!("sampler: stopped");
        Ok(())
    }

    /// Discards the stretcher's internal state. No I/O.
    pub fn flush(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.stretcher.reset();
        Ok(())
    }

    /// Pushes the stretcher's tail for the current configuration to the
    /// device: `out_samples = stretcher.output_latency()`, flushed through
    /// zeroed planar input, volume-scaled, clamped, and written.
    pub fn drain(&self, volume: f32, speed_factor: f32) -> CoreResult<()> {
        let _ = speed_factor; // drain writes the stretcher's own tail, not a re-stretched chunk.
        let mut state = self.state.lock();
        let channels = state.channels as usize;
        let out_samples = state.stretcher.output_latency();
        let mut planar_out = vec![vec![0.0_f32; out_samples]; channels];
        state.stretcher.flush(&mut planar_out, out_samples)?;
        let interleaved = interleave_with_volume(&planar_out, volume);
        send_blocking(state.sender.as_ref(), &interleaved)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(handle) = state.stream.take() {
            if let Err(e) = handle.0.pause() {
                warn!("sampler: error aborting output stream on drop: {e}");
            }
        }
        info!("sampler: destroyed");
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    receiver: Receiver<f32>,
) -> CoreResult<cpal::Stream> {
    let err_fn = |err| warn!("sampler: output stream error: {err}");
    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| fill_from_channel(data, &receiver),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| fill_converted_from_channel(data, &receiver),
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_output_stream(
            config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| fill_converted_from_channel(data, &receiver),
            err_fn,
            None,
        ),
        other => return Err(CoreError::sampler(format!("unsupported device sample format: {other:?}"))),
    };
    stream.map_err(|e| CoreError::sampler(format!("could not build output stream: {e}")))
}

fn fill_from_channel(data: &mut [f32], receiver: &Receiver<f32>) {
    for slot in data.iter_mut() {
        *slot = receiver.try_recv().unwrap_or(0.0);
    }
}

fn fill_converted_from_channel<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T], receiver: &Receiver<f32>) {
    for slot in data.iter_mut() {
        let sample = receiver.try_recv().unwrap_or(0.0);
        *slot = T::from_sample(sample);
    }
}

/// Blocks the calling thread until every sample in `interleaved` has been
/// handed to the bounded channel feeding the device callback.
fn send_blocking(sender: Option<&Sender<f32>>, interleaved: &[f32]) -> CoreResult<()> {
    let sender = sender.ok_or_else(|| CoreError::sampler("sampler has no active output stream"))?;
    for &sample in interleaved {
        sender
            .send(sample)
            .map_err(|_| CoreError::sampler("output stream callback is no longer receiving"))?;
    }
    Ok(())
}

/// Splits interleaved little-endian f32 PCM into one `Vec<f32>` per channel.
fn deinterleave(bytes: &[u8], channels: usize, in_samples: usize) -> Vec<Vec<f32>> {
    let mut planar = vec![Vec::with_capacity(in_samples); channels];
    for i in 0..in_samples {
        for ch in 0..channels {
            let offset = (i * channels + ch) * SAMPLE_SIZE;
            let sample = f32::from_le_bytes(bytes[offset..offset + SAMPLE_SIZE].try_into().expect("4 bytes"));
            planar[ch].push(sample);
        }
    }
    planar
}

/// Interleaves planar channels back to one buffer, scaling by `volume` and
/// clamping to `[-1, 1]` per sample.
fn interleave_with_volume(planar: &[Vec<f32>], volume: f32) -> Vec<f32> {
    let channels = planar.len();
    let out_samples = planar.first().map(|c| c.len()).unwrap_or(0);
    let mut out = Vec::with_capacity(out_samples * channels);
    for i in 0..out_samples {
        for channel in planar {
            out.push((channel[i] * volume).clamp(-1.0, 1.0));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleave_then_interleave_round_trips_unity_volume() {
        let channels = 2;
        let in_samples = 4;
        let mut bytes = Vec::new();
        let values = [0.1_f32, -0.2, 0.3, -0.4, 0.5, -0.6, 0.7, -0.8];
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let planar = deinterleave(&bytes, channels, in_samples);
        assert_eq!(planar.len(), channels);
        assert_eq!(planar[0], vec![0.1, 0.3, 0.5, 0.7]);
        assert_eq!(planar[1], vec![-0.2, -0.4, -0.6, -0.8]);

        let interleaved = interleave_with_volume(&planar, 1.0);
        for (a, b) in interleaved.iter().zip(values.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn interleave_with_volume_clamps_to_unit_range() {
        let planar = vec![vec![1.0_f32], vec![-1.0_f32]];
        let interleaved = interleave_with_volume(&planar, 3.0);
        assert_eq!(interleaved, vec![1.0, -1.0]);
    }

    #[test]
    fn write_rejects_buffer_not_a_whole_number_of_frames() {
        // channels=2 needs multiples of 8 bytes; 5 is not one.
        let sampler = match Sampler::new(48_000, 2) {
            Ok(s) => s,
            Err(_) => return, // no output device available in this environment
        };
        let _ = sampler.start();
        let bytes = vec![0_u8; 5];
        assert!(sampler.write(&bytes, 1.0, 1.0).is_err());
    }

    #[test]
    fn write_before_start_is_rejected() {
        let sampler = match Sampler::new(48_000, 2) {
            Ok(s) => s,
            Err(_) => return,
        };
        let bytes = vec![0_u8; 16];
        assert!(sampler.write(&bytes, 1.0, 1.0).is_err());
    }

    #[test]
    fn start_twice_is_rejected() {
        let sampler = match Sampler::new(48_000, 2) {
            Ok(s) => s,
            Err(_) => return,
        };
        if sampler.start().is_err() {
            return; // no output device available in this environment
        }
        assert!(sampler.start().is_err());
    }
}
