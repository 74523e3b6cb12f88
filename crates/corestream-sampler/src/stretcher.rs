// Phase-vocoder time/pitch stretcher. No published crate in this
// workspace's dependency graph implements one, so this is a from-scratch
// implementation built on `rustfft`, following the usual STFT analysis →
// phase-unwrap → resynthesize-at-a-different-hop recipe.
//
// Each channel carries independent phase/overlap state so that `process`
// never mixes or reorders channels, per the Stretcher contract.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use corestream_types::{CoreError, CoreResult};

/// Target analysis window, in milliseconds. A ~50 ms window is the usual
/// phase-vocoder default: long enough to resolve pitch, short enough to
/// keep transients from smearing across a frame.
const ANALYSIS_WINDOW_MS: f64 = 50.0;

/// Analysis hop is one quarter of the window (75% overlap), the standard
/// phase-vocoder starting point for keeping both frequency and time
/// resolution usable at spoken/musical content.
const HOP_DIVISOR: usize = 4;

const MIN_FFT_SIZE: usize = 256;

fn wrap_phase(mut phase: f32) -> f32 {
    while phase > PI {
        phase -= 2.0 * PI;
    }
    while phase < -PI {
        phase += 2.0 * PI;
    }
    phase
}

fn hann_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / (len as f32 - 1.0)).cos())
        .collect()
}

struct ChannelState {
    input_queue: VecDeque<f32>,
    output_queue: VecDeque<f32>,
    overlap: Vec<f32>,
    prev_phase: Vec<f32>,
    synth_phase: Vec<f32>,
}

impl ChannelState {
    fn new(fft_size: usize) -> Self {
        let bins = fft_size / 2 + 1;
        Self {
            input_queue: VecDeque::new(),
            output_queue: VecDeque::new(),
            overlap: vec![0.0; fft_size],
            prev_phase: vec![0.0; bins],
            synth_phase: vec![0.0; bins],
        }
    }

    fn reset(&mut self) {
        self.input_queue.clear();
        self.output_queue.clear();
        self.overlap.iter_mut().for_each(|s| *s = 0.0);
        self.prev_phase.iter_mut().for_each(|p| *p = 0.0);
        self.synth_phase.iter_mut().for_each(|p| *p = 0.0);
    }
}

/// Configurable per `(channels, sample_rate)`, realized with a default
/// analysis-window preset — the window size is a crate constant, not a
/// runtime knob.
pub struct Stretcher {
    channels: usize,
    fft_size: usize,
    hop_analysis: usize,
    window: Vec<f32>,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    state: Vec<ChannelState>,
}

impl Stretcher {
    /// Instantiates with the default preset for `(channels, sample_rate)`,
    /// mirroring the original's `presetDefault(channels, sampleRate)`.
    pub fn preset_default(channels: usize, sample_rate: u32) -> CoreResult<Self> {
        if channels == 0 {
            return Err(CoreError::sampler("stretcher requires at least one channel"));
        }
        let window_samples = ((sample_rate as f64) * ANALYSIS_WINDOW_MS / 1000.0).round() as usize;
        let fft_size = window_samples.next_power_of_two().max(MIN_FFT_SIZE);
        let hop_analysis = (fft_size / HOP_DIVISOR).max(1);

        let mut planner = FftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(fft_size);
        let fft_inverse = planner.plan_fft_inverse(fft_size);
        let window = hann_window(fft_size);
        let state = (0..channels).map(|_| ChannelState::new(fft_size)).collect();

        Ok(Self {
            channels,
            fft_size,
            hop_analysis,
            window,
            fft_forward,
            fft_inverse,
            state,
        })
    }

    /// Sample-unit latency contributed by the analysis side: the portion of
    /// the window that has been consumed from the input stream but has not
    /// yet contributed a finalized output sample.
    pub fn input_latency(&self) -> usize {
        self.fft_size.saturating_sub(self.hop_analysis)
    }

    /// Sample-unit latency contributed by the synthesis side: one full
    /// overlap-add window's worth of samples may still be "in flight" in
    /// `overlap` when a caller asks for output.
    pub fn output_latency(&self) -> usize {
        self.fft_size
    }

    /// Discards all buffered input/output and phase state for every channel.
    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(ChannelState::reset);
    }

    /// Time-stretches `in_samples` samples-per-channel of `input` into
    /// exactly `out_samples` samples-per-channel of `output`. Channels are
    /// processed independently so none are reordered or mixed.
    pub fn process(
        &mut self,
        input: &[Vec<f32>],
        in_samples: usize,
        output: &mut [Vec<f32>],
        out_samples: usize,
    ) -> CoreResult<()> {
        if input.len() != self.channels || output.len() != self.channels {
            return Err(CoreError::sampler("stretcher channel count mismatch"));
        }

        let ratio = if in_samples > 0 {
            out_samples as f64 / in_samples as f64
        } else {
            1.0
        };
        let hop_synthesis = ((self.hop_analysis as f64) * ratio).round().max(1.0) as usize;

        for ch in 0..self.channels {
            let st = &mut self.state[ch];
            st.input_queue.extend(input[ch][..in_samples].iter().copied());

            while st.output_queue.len() < out_samples && st.input_queue.len() >= self.fft_size {
                process_frame(
                    st,
                    &self.window,
                    self.fft_forward.as_ref(),
                    self.fft_inverse.as_ref(),
                    self.fft_size,
                    self.hop_analysis,
                    hop_synthesis,
                );
                for _ in 0..self.hop_analysis.min(st.input_queue.len()) {
                    st.input_queue.pop_front();
                }
            }

            let dst = &mut output[ch];
            dst.resize(out_samples, 0.0);
            for slot in dst.iter_mut() {
                *slot = st.output_queue.pop_front().unwrap_or(0.0);
            }
        }

        Ok(())
    }

    /// Drains the tail of the current configuration: zero-pads whatever
    /// remains in each channel's input queue to one final frame and writes
    /// the resulting overlap-add tail into `output`.
    pub fn flush(&mut self, output: &mut [Vec<f32>], out_samples: usize) -> CoreResult<()> {
        if output.len() != self.channels {
            return Err(CoreError::sampler("stretcher channel count mismatch"));
        }

        for ch in 0..self.channels {
            let st = &mut self.state[ch];
            if !st.input_queue.is_empty() || st.output_queue.len() < out_samples {
                st.input_queue.resize(self.fft_size, 0.0);
                while st.output_queue.len() < out_samples && st.input_queue.len() >= self.fft_size {
                    process_frame(
                        st,
                        &self.window,
                        self.fft_forward.as_ref(),
                        self.fft_inverse.as_ref(),
                        self.fft_size,
                        self.hop_analysis,
                        self.hop_analysis,
                    );
                    for _ in 0..self.hop_analysis.min(st.input_queue.len()) {
                        st.input_queue.pop_front();
                    }
                }
            }

            let dst = &mut output[ch];
            dst.resize(out_samples, 0.0);
            for slot in dst.iter_mut() {
                *slot = st.output_queue.pop_front().unwrap_or(0.0);
            }
        }

        Ok(())
    }
}

/// Analyzes one `fft_size`-sample frame at the front of the channel's input
/// queue (without consuming it — the caller advances the queue by
/// `hop_analysis` afterward), phase-locks it to `hop_synthesis`, and
/// overlap-adds the result into the channel's output queue.
fn process_frame(
    st: &mut ChannelState,
    window: &[f32],
    fft_forward: &dyn Fft<f32>,
    fft_inverse: &dyn Fft<f32>,
    fft_size: usize,
    hop_analysis: usize,
    hop_synthesis: usize,
) {
    let mut spectrum: Vec<Complex<f32>> = st
        .input_queue
        .iter()
        .take(fft_size)
        .zip(window.iter())
        .map(|(&s, &w)| Complex::new(s * w, 0.0))
        .collect();
    fft_forward.process(&mut spectrum);

    let bins = fft_size / 2 + 1;
    let mut resynth = vec![Complex::new(0.0, 0.0); fft_size];
    for k in 0..bins {
        let bin = spectrum[k];
        let magnitude = bin.norm();
        let phase = bin.arg();

        let omega = 2.0 * PI * (k as f32) / (fft_size as f32);
        let expected_advance = omega * hop_analysis as f32;
        let delta = wrap_phase(phase - st.prev_phase[k] - expected_advance);
        let true_freq = omega + delta / (hop_analysis as f32);

        st.prev_phase[k] = phase;
        st.synth_phase[k] += true_freq * hop_synthesis as f32;

        let new_bin = Complex::from_polar(magnitude, st.synth_phase[k]);
        resynth[k] = new_bin;
        if k != 0 && k != fft_size / 2 {
            resynth[fft_size - k] = new_bin.conj();
        }
    }
    fft_inverse.process(&mut resynth);

    let norm = 1.0 / fft_size as f32;
    for (i, sample) in st.overlap.iter_mut().enumerate() {
        *sample += resynth[i].re * norm * window[i];
    }

    let finalize = hop_synthesis.min(st.overlap.len());
    st.output_queue.extend(st.overlap.drain(..finalize));
    st.overlap.resize(fft_size, 0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_default_picks_a_power_of_two_fft_size() {
        let stretcher = Stretcher::preset_default(2, 48_000).unwrap();
        assert!(stretcher.fft_size.is_power_of_two());
        assert!(stretcher.fft_size >= MIN_FFT_SIZE);
    }

    #[test]
    fn process_rejects_channel_count_mismatch() {
        let mut stretcher = Stretcher::preset_default(2, 48_000).unwrap();
        let input = vec![vec![0.0_f32; 256]];
        let mut output = vec![vec![0.0_f32; 256]; 2];
        assert!(stretcher.process(&input, 256, &mut output, 256).is_err());
    }

    #[test]
    fn silence_in_is_silence_out_at_unity_speed() {
        let mut stretcher = Stretcher::preset_default(1, 48_000).unwrap();
        let frames = stretcher.fft_size * 4;
        let input = vec![vec![0.0_f32; frames]];
        let mut output = vec![vec![0.0_f32; frames]];
        stretcher.process(&input, frames, &mut output, frames).unwrap();
        assert!(output[0].iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn process_never_reorders_channels() {
        // Channel 0 stays silent, channel 1 gets a loud impulse train; after
        // processing, channel 0's energy must still be ~zero.
        let mut stretcher = Stretcher::preset_default(2, 48_000).unwrap();
        let frames = stretcher.fft_size * 4;
        let mut loud = vec![0.0_f32; frames];
        for (i, s) in loud.iter_mut().enumerate() {
            *s = if i % 64 == 0 { 1.0 } else { 0.0 };
        }
        let input = vec![vec![0.0_f32; frames], loud];
        let mut output = vec![vec![0.0_f32; frames]; 2];
        stretcher.process(&input, frames, &mut output, frames).unwrap();
        assert!(output[0].iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn reset_clears_buffered_state() {
        let mut stretcher = Stretcher::preset_default(1, 48_000).unwrap();
        let frames = stretcher.fft_size * 2;
        let input = vec![vec![0.5_f32; frames]];
        let mut output = vec![vec![0.0_f32; frames]];
        stretcher.process(&input, frames, &mut output, frames).unwrap();
        stretcher.reset();
        assert!(stretcher.state[0].input_queue.is_empty());
        assert!(stretcher.state[0].output_queue.is_empty());
        assert!(stretcher.state[0].overlap.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn flush_produces_requested_length() {
        let mut stretcher = Stretcher::preset_default(1, 48_000).unwrap();
        let out_samples = stretcher.output_latency();
        let mut output = vec![vec![0.0_f32; out_samples]];
        stretcher.flush(&mut output, out_samples).unwrap();
        assert_eq!(output[0].len(), out_samples);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn process_always_fills_exactly_out_samples_with_finite_values(
            in_samples in 1usize..20_000,
            out_samples in 1usize..20_000,
            amplitude in 0.0f32..1.0,
        ) {
            let mut stretcher = Stretcher::preset_default(1, 48_000).unwrap();
            let input = vec![(0..in_samples).map(|i| amplitude * (i as f32 * 0.01).sin()).collect::<Vec<f32>>()];
            let mut output = vec![vec![0.0_f32; out_samples]];
            stretcher.process(&input, in_samples, &mut output, out_samples).unwrap();
            prop_assert_eq!(output[0].len(), out_samples);
            prop_assert!(output[0].iter().all(|s| s.is_finite()));
        }
    }
}
