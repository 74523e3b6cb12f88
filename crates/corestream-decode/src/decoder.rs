// The per-media decode pipeline: demuxer + up to one audio and one video
// codec context, their resampler/scaler, and an optional hardware device
// context. One instance owns exactly one open media; there is no shared
// ownership across decoders (aside from the hardware device context, which
// is reference-counted through `HwRegistry`).

use std::ffi::c_void;
use std::os::raw::c_int;
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::capabilities::Capabilities;
use ffmpeg::ffi;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::resampling::context::Context as SwrContext;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags as SwsFlags};
use ffmpeg::util::error::EAGAIN;
use ffmpeg::util::format::sample::{Sample, Type as SampleType};
use log::{debug, info, warn};
use parking_lot::Mutex;

use corestream_types::{AudioFrame, CoreError, CoreResult, Format, HwDeviceType, VideoFrame, BGRA_BYTES_PER_PIXEL};

use crate::hw_registry::HwRegistry;

/// Target pixel format every video frame is converted to. Fixed rather than
/// configurable: the rest of the core (including the buffer-capacity math
/// exposed in `Format`) assumes one packed 4-byte layout. Resolves the
/// spec's open question on RGBA vs. BGRA in favor of BGRA.
const TARGET_PIXEL_FORMAT: Pixel = Pixel::BGRA;

const THREAD_COUNT: c_int = 2;

/// Seek fine-tuning thresholds and iteration bound, in microseconds /
/// milliseconds respectively (see `seek_to`).
const VIDEO_SEEK_THRESHOLD_MICROS: i64 = 20_000;
const AUDIO_SEEK_THRESHOLD_MICROS: i64 = 50_000;
const FALLBACK_FRAME_DURATION_MS: i64 = 16;

/// Parameters for constructing a [`Decoder`]. Named-field equivalent of the
/// five positional booleans plus candidate list the construction entry
/// point takes.
#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    pub find_audio: bool,
    pub find_video: bool,
    pub decode_audio: bool,
    pub decode_video: bool,
    pub hw_candidates: Vec<HwDeviceType>,
}

struct AudioPath {
    stream_index: usize,
    decoder: ffmpeg::decoder::Audio,
    resampler: Option<SwrContext>,
}

struct VideoPath {
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    hardware_accelerated: bool,
    /// The pixel format negotiated at construction for the hardware path.
    /// Checked against each decoded frame's actual format: if `get_format`
    /// fell back to software at runtime, the frame won't carry this format
    /// even though `hardware_accelerated` was set at open time.
    hw_pix_fmt: Option<Pixel>,
    scaler: Option<SwsContext>,
    scaler_source: Option<(u32, u32, Pixel)>,
}

struct DecoderState {
    input: ffmpeg::format::context::Input,
    format: Format,
    audio: Option<AudioPath>,
    video: Option<VideoPath>,
}

/// Per-media decode pipeline. All public operations take the same exclusive
/// lock, so `decode_audio`, `decode_video`, `seek_to`, and `reset` are
/// mutually exclusive and not reentrant.
pub struct Decoder {
    state: Mutex<DecoderState>,
}

impl Decoder {
    pub fn new(location: &str, options: &DecoderOptions, hw_registry: &Arc<HwRegistry>) -> CoreResult<Self> {
        let mut input_ctx = input(location).map_err(|e| {
            CoreError::decoder(format!("could not open input stream for {location}: {e}"))
        })?;

        unsafe {
            (*input_ctx.as_mut_ptr()).flags |= ffi::AVFMT_FLAG_GENPTS as i32;
        }

        let duration = input_ctx.duration();
        let mut format = Format::new(location.to_string());
        format.duration_micros = if duration < 0 { 0 } else { duration };

        let mut audio_path = None;
        let mut video_path = None;

        let stream_plans: Vec<(usize, MediaType)> = input_ctx
            .streams()
            .map(|s| (s.index(), s.parameters().medium()))
            .collect();

        for (index, medium) in stream_plans {
            match medium {
                MediaType::Audio if options.find_audio && audio_path.is_none() => {
                    let stream = input_ctx.stream(index).expect("stream index from own enumeration");
                    let parameters = stream.parameters();
                    let stream_time_base = stream.time_base();
                    let stream_duration = stream.duration();

                    let codec = ffmpeg::decoder::find(parameters.id()).ok_or_else(|| {
                        CoreError::decoder("no matching audio decoder for stream codec id")
                    })?;

                    let mut ctx = ffmpeg::codec::context::Context::from_parameters(parameters)
                        .map_err(|e| CoreError::decoder(e.to_string()))?;
                    apply_threading(&mut ctx, codec.capabilities());

                    let decoder = ctx
                        .decoder()
                        .audio()
                        .map_err(|e| CoreError::decoder(format!("could not open audio decoder: {e}")))?;

                    format.duration_micros = format
                        .duration_micros
                        .max(rescale_to_micros(stream_duration, stream_time_base));
                    format.sample_rate = decoder.rate();
                    format.channels = decoder.ch_layout().channels() as u16;

                    let resampler = if options.decode_audio {
                        let layout = decoder.ch_layout();
                        Some(
                            SwrContext::get2(
                                decoder.format(),
                                layout.clone(),
                                decoder.rate(),
                                Sample::F32(SampleType::Packed),
                                layout,
                                decoder.rate(),
                            )
                            .map_err(|e| CoreError::decoder(format!("could not allocate resampler: {e}")))?,
                        )
                    } else {
                        None
                    };

                    info!("decoder: audio stream {index} selected, {} Hz / {} ch", format.sample_rate, format.channels);
                    audio_path = Some(AudioPath { stream_index: index, decoder, resampler });
                }
                MediaType::Video if options.find_video && video_path.is_none() => {
                    let stream = input_ctx.stream(index).expect("stream index from own enumeration");
                    let parameters = stream.parameters();
                    let stream_time_base = stream.time_base();
                    let stream_duration = stream.duration();
                    let avg_frame_rate = stream.avg_frame_rate();

                    let codec = ffmpeg::decoder::find(parameters.id()).ok_or_else(|| {
                        CoreError::decoder("no matching video decoder for stream codec id")
                    })?;

                    let mut ctx = ffmpeg::codec::context::Context::from_parameters(parameters)
                        .map_err(|e| CoreError::decoder(e.to_string()))?;
                    apply_threading(&mut ctx, codec.capabilities());

                    let mut hardware_accelerated = false;
                    let mut hw_pix_fmt = None;
                    for candidate in &options.hw_candidates {
                        if let Some(pix_fmt) = try_configure_hardware(&mut ctx, &codec, *candidate, hw_registry)? {
                            format.hw_device_type = *candidate;
                            hardware_accelerated = true;
                            hw_pix_fmt = Some(pix_fmt);
                            info!("decoder: hardware acceleration selected ({candidate:?})");
                            break;
                        }
                    }

                    if avg_frame_rate.numerator() != 0 && avg_frame_rate.denominator() != 0 {
                        format.frame_rate = avg_frame_rate.numerator() as f64 / avg_frame_rate.denominator() as f64;
                    }

                    format.duration_micros = format
                        .duration_micros
                        .max(rescale_to_micros(stream_duration, stream_time_base));

                    if format.frame_rate > 0.0 {
                        let frame_interval_micros = 1_000_000.0 / format.frame_rate;
                        if (format.duration_micros as f64) <= frame_interval_micros {
                            format.frame_rate = 0.0;
                            format.duration_micros = 0;
                        }
                    }

                    unsafe {
                        (*ctx.as_mut_ptr()).flags |= ffi::AV_CODEC_FLAG_LOW_DELAY as i32;
                    }

                    let decoder = ctx
                        .decoder()
                        .video()
                        .map_err(|e| CoreError::decoder(format!("could not open video decoder: {e}")))?;

                    format.width = decoder.width();
                    format.height = decoder.height();

                    let video_buffer_capacity = unsafe {
                        ffi::av_image_get_buffer_size(
                            pixel_to_av(TARGET_PIXEL_FORMAT),
                            format.width as c_int,
                            format.height as c_int,
                            1,
                        )
                    };
                    if video_buffer_capacity <= 0 {
                        return Err(CoreError::decoder("invalid video buffer capacity"));
                    }
                    format.video_buffer_capacity =
                        video_buffer_capacity as usize + unsafe { ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize };

                    let scaler = if options.decode_video {
                        Some(
                            SwsContext::get(
                                decoder.format(),
                                decoder.width(),
                                decoder.height(),
                                TARGET_PIXEL_FORMAT,
                                decoder.width(),
                                decoder.height(),
                                SwsFlags::BILINEAR,
                            )
                            .map_err(|e| CoreError::decoder(format!("could not allocate scaler: {e}")))?,
                        )
                    } else {
                        None
                    };

                    video_path = Some(VideoPath {
                        stream_index: index,
                        decoder,
                        hardware_accelerated,
                        hw_pix_fmt,
                        scaler,
                        scaler_source: None,
                    });
                }
                _ => {}
            }
        }

        if audio_path.is_none() && video_path.is_none() {
            return Err(CoreError::decoder(format!("no usable streams found in {location}")));
        }

        if !options.decode_audio {
            // Audio stream info was still populated in `format`, but the
            // resampler was never allocated; `decode_audio` must reject.
            if let Some(path) = &mut audio_path {
                path.resampler = None;
            }
        }

        info!("decoder: opened {location}");

        Ok(Self {
            state: Mutex::new(DecoderState { input: input_ctx, format, audio: audio_path, video: video_path }),
        })
    }

    pub fn format(&self) -> Format {
        self.state.lock().format.clone()
    }

    pub fn decode_audio(&self) -> CoreResult<Option<AudioFrame>> {
        let mut state = self.state.lock();
        if state.audio.is_none() && state.video.is_none() {
            return Err(CoreError::decoder("could not use uninitialized decoder"));
        }
        let stream_index = {
            let path = state
                .audio
                .as_ref()
                .filter(|p| p.resampler.is_some())
                .ok_or_else(|| CoreError::decoder("could not find audio stream"))?;
            path.stream_index
        };
        let stream_time_base = state
            .input
            .stream(stream_index)
            .expect("audio stream index recorded at open time")
            .time_base();

        let DecoderState { input, audio, .. } = &mut *state;
        let path = audio.as_mut().expect("checked above");
        for (stream, packet) in input.packets().flatten() {
            if stream.index() != stream_index {
                continue;
            }
            if path.decoder.send_packet(&packet).is_err() {
                continue;
            }
            let mut decoded = ffmpeg::frame::Audio::empty();
            loop {
                match path.decoder.receive_frame(&mut decoded) {
                    Ok(()) => {}
                    Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => break,
                    Err(ffmpeg::Error::Eof) => break,
                    Err(e) => return Err(CoreError::decoder(format!("error receiving audio frame: {e}"))),
                }
                let frame_ts = best_effort_timestamp(&decoded);
                let resampler = path.resampler.as_mut().expect("checked above");
                let mut resampled = ffmpeg::frame::Audio::empty();
                resampler
                    .run(&decoded, &mut resampled)
                    .map_err(|e| CoreError::decoder(format!("audio conversion failed: {e}")))?;

                let bytes = interleaved_audio_bytes(&resampled);
                if bytes.is_empty() {
                    return Err(CoreError::decoder("invalid converted audio size"));
                }

                return Ok(Some(AudioFrame {
                    bytes,
                    timestamp_micros: rescale_to_micros(frame_ts, stream_time_base),
                }));
            }
        }
        Ok(None)
    }

    pub fn decode_video(&self, buffer: &mut [u8]) -> CoreResult<Option<VideoFrame>> {
        if buffer.is_empty() {
            return Err(CoreError::decoder("invalid buffer capacity"));
        }
        let mut state = self.state.lock();
        if state.audio.is_none() && state.video.is_none() {
            return Err(CoreError::decoder("could not use uninitialized decoder"));
        }
        let stream_index = {
            let path = state
                .video
                .as_ref()
                .filter(|p| p.scaler.is_some())
                .ok_or_else(|| CoreError::decoder("could not find video stream"))?;
            path.stream_index
        };
        let stream_time_base = state
            .input
            .stream(stream_index)
            .expect("video stream index recorded at open time")
            .time_base();

        let DecoderState { input, video, format, .. } = &mut *state;
        let path = video.as_mut().expect("checked above");
        for (stream, packet) in input.packets().flatten() {
            if stream.index() != stream_index {
                continue;
            }
            if path.decoder.send_packet(&packet).is_err() {
                continue;
            }

            let mut decoded = ffmpeg::frame::Video::empty();
            loop {
                match path.decoder.receive_frame(&mut decoded) {
                    Ok(()) => {}
                    Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => break,
                    Err(ffmpeg::Error::Eof) => break,
                    Err(e) => return Err(CoreError::decoder(format!("error receiving video frame: {e}"))),
                }

                // `get_format` may have negotiated software output despite
                // hardware having been configured at open time: downgrade
                // permanently once observed, rather than attempting (and
                // failing) a hardware transfer below.
                if path.hardware_accelerated && path.hw_pix_fmt != Some(decoded.format()) {
                    warn!(
                        "decoder: hardware codec negotiated software output, downgrading to software decode"
                    );
                    path.hardware_accelerated = false;
                    format.hw_device_type = HwDeviceType::None;
                }

                let sw_frame = if path.hardware_accelerated {
                    let mut transferred = ffmpeg::frame::Video::empty();
                    let rc = unsafe {
                        ffi::av_hwframe_transfer_data(transferred.as_mut_ptr(), decoded.as_mut_ptr(), 0)
                    };
                    if rc < 0 {
                        return Err(CoreError::hardware_acceleration(
                            "error transferring frame to system memory",
                        ));
                    }
                    if transferred.format() == Pixel::None {
                        return Err(CoreError::hardware_acceleration("error transferring frame data"));
                    }
                    transferred.set_pts(decoded.pts());
                    unsafe {
                        (*transferred.as_mut_ptr()).best_effort_timestamp =
                            (*decoded.as_mut_ptr()).best_effort_timestamp;
                    }
                    transferred
                } else {
                    decoded.clone()
                };

                let frame_ts = best_effort_timestamp(&sw_frame);
                let remaining = scale_into_buffer(path, &sw_frame, buffer)?;

                return Ok(Some(VideoFrame {
                    remaining,
                    timestamp_micros: rescale_to_micros(frame_ts, stream_time_base),
                }));
            }
        }
        Ok(None)
    }

    pub fn seek_to(&self, timestamp_micros: i64, keyframes_only: bool) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.audio.is_none() && state.video.is_none() {
            return Err(CoreError::decoder("could not use uninitialized decoder"));
        }
        if timestamp_micros < 0 || timestamp_micros > state.format.duration_micros {
            return Err(CoreError::decoder("timestamp out of bounds"));
        }

        let (seek_stream_index, seeking_video) = if let Some(video) = &state.video {
            (video.stream_index, true)
        } else if let Some(audio) = &state.audio {
            (audio.stream_index, false)
        } else {
            return Err(CoreError::decoder("no streams to seek"));
        };

        let stream_time_base = state
            .input
            .stream(seek_stream_index)
            .expect("seek stream index recorded at open time")
            .time_base();
        let target_pts = rescale_from_micros(timestamp_micros, stream_time_base);

        let rc = unsafe {
            ffi::av_seek_frame(
                state.input.as_mut_ptr(),
                seek_stream_index as c_int,
                target_pts,
                ffi::AVSEEK_FLAG_BACKWARD,
            )
        };
        if rc < 0 {
            let fallback_rc = unsafe {
                ffi::av_seek_frame(state.input.as_mut_ptr(), -1, timestamp_micros, ffi::AVSEEK_FLAG_BACKWARD)
            };
            if fallback_rc < 0 {
                return Err(CoreError::decoder("error seeking stream"));
            }
        }

        flush_decoders(&mut state);
        debug!("decoder: seek to {timestamp_micros}us (keyframes_only={keyframes_only})");

        if keyframes_only {
            return Ok(());
        }

        let threshold_micros = if seeking_video { VIDEO_SEEK_THRESHOLD_MICROS } else { AUDIO_SEEK_THRESHOLD_MICROS };
        let threshold_pts = rescale_from_micros(threshold_micros, stream_time_base);

        let frame_duration_ms = if seeking_video {
            let frame_rate = state.format.frame_rate;
            if frame_rate > 0.0 { (1000.0 / frame_rate) as i64 } else { FALLBACK_FRAME_DURATION_MS }
        } else {
            FALLBACK_FRAME_DURATION_MS
        };
        let file_duration_ms = state.format.duration_micros / 1000;
        let max_iterations = ((file_duration_ms / frame_duration_ms.max(1)) * 2 + 1000).max(1000);

        let mut iterations: i64 = 0;
        let mut last_pts = i64::MIN;
        let DecoderState { input, audio, video, .. } = &mut *state;
        for (stream, packet) in input.packets().flatten() {
            iterations += 1;
            if iterations > max_iterations {
                break;
            }
            if stream.index() != seek_stream_index {
                continue;
            }
            if let Some(pts) = packet.pts() {
                if last_pts != i64::MIN && pts <= last_pts {
                    break;
                }
                last_pts = pts;
            }

            let decode_result = if seeking_video {
                video.as_mut().unwrap().decoder.send_packet(&packet)
            } else {
                audio.as_mut().unwrap().decoder.send_packet(&packet)
            };
            if decode_result.is_err() {
                continue;
            }

            if seeking_video {
                let mut temp = ffmpeg::frame::Video::empty();
                loop {
                    match video.as_mut().unwrap().decoder.receive_frame(&mut temp) {
                        Ok(()) => {}
                        Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => break,
                        Err(ffmpeg::Error::Eof) => break,
                        Err(e) => return Err(CoreError::decoder(format!("error receiving temporary frame: {e}"))),
                    }
                    let pts = best_effort_timestamp(&temp);
                    if pts >= target_pts - threshold_pts {
                        return Ok(());
                    }
                }
            } else {
                let mut temp = ffmpeg::frame::Audio::empty();
                loop {
                    match audio.as_mut().unwrap().decoder.receive_frame(&mut temp) {
                        Ok(()) => {}
                        Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => break,
                        Err(ffmpeg::Error::Eof) => break,
                        Err(e) => return Err(CoreError::decoder(format!("error receiving temporary frame: {e}"))),
                    }
                    let pts = best_effort_timestamp(&temp);
                    if pts >= target_pts - threshold_pts {
                        return Ok(());
                    }
                }
            }
        }
        // Iteration budget exhausted without reaching the threshold: the
        // coarse seek stands, matching the original's "simply return".
        Ok(())
    }

    pub fn reset(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.audio.is_none() && state.video.is_none() {
            return Err(CoreError::decoder("could not use uninitialized decoder"));
        }
        let rc = unsafe { ffi::av_seek_frame(state.input.as_mut_ptr(), -1, 0, ffi::AVSEEK_FLAG_BACKWARD) };
        if rc < 0 {
            return Err(CoreError::decoder("error resetting stream"));
        }
        flush_decoders(&mut state);
        Ok(())
    }
}

fn flush_decoders(state: &mut DecoderState) {
    if let Some(video) = &mut state.video {
        unsafe { ffi::avcodec_flush_buffers(video.decoder.as_mut_ptr()) };
    }
    if let Some(audio) = &mut state.audio {
        unsafe { ffi::avcodec_flush_buffers(audio.decoder.as_mut_ptr()) };
    }
}

fn apply_threading(ctx: &mut ffmpeg::codec::context::Context, capabilities: Capabilities) {
    unsafe {
        let ptr = ctx.as_mut_ptr();
        if capabilities.contains(Capabilities::FRAME_THREADS) {
            (*ptr).thread_type = ffi::FF_THREAD_FRAME as i32;
            (*ptr).thread_count = THREAD_COUNT;
        } else if capabilities.contains(Capabilities::SLICE_THREADS) {
            (*ptr).thread_type = ffi::FF_THREAD_SLICE as i32;
            (*ptr).thread_count = THREAD_COUNT;
        }
    }
}

/// Looks for a hw-config the decoder advertises that uses `HW_DEVICE_CTX`
/// and matches `candidate`. On a match, stashes the negotiated pixel format
/// in `opaque`, installs the `get_format` callback, and hands the codec
/// context a fresh reference from the registry. Returns the negotiated
/// pixel format if a match and a usable device context were both found, so
/// the caller can later detect a runtime fallback to software.
fn try_configure_hardware(
    ctx: &mut ffmpeg::codec::context::Context,
    codec: &ffmpeg::Codec,
    candidate: HwDeviceType,
    hw_registry: &Arc<HwRegistry>,
) -> CoreResult<Option<Pixel>> {
    if candidate == HwDeviceType::None {
        return Ok(None);
    }

    let mut chosen_pix_fmt: Option<ffi::AVPixelFormat> = None;
    let mut i: c_int = 0;
    loop {
        let config = unsafe { ffi::avcodec_get_hw_config(codec.as_ptr(), i) };
        if config.is_null() {
            break;
        }
        let cfg = unsafe { &*config };
        if (cfg.methods & ffi::AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as c_int) != 0
            && cfg.device_type as i32 == candidate.to_av()
        {
            chosen_pix_fmt = Some(cfg.pix_fmt);
            break;
        }
        i += 1;
    }

    let Some(pix_fmt) = chosen_pix_fmt else {
        return Ok(None);
    };

    let handle = match hw_registry.request(candidate)? {
        Some(handle) => handle,
        None => {
            warn!("decoder: hardware device context unavailable for {candidate:?}, falling back to software");
            return Ok(None);
        }
    };

    unsafe {
        let ptr = ctx.as_mut_ptr();
        (*ptr).opaque = (pix_fmt as i64) as *mut c_void;
        (*ptr).get_format = Some(choose_hw_pixel_format);
        (*ptr).hw_device_ctx = handle.into_raw();
    }

    Ok(Some(Pixel::from(pix_fmt)))
}

/// Installed as `AVCodecContext.get_format`. Returns the format stashed in
/// `opaque` if the codec offers it, else `AV_PIX_FMT_NONE` — which causes
/// the codec to fall back to software output for this stream (see the
/// open-question resolution on downgrading `Format::hw_device_type`,
/// handled by the caller once this returns NONE and decoding proceeds).
unsafe extern "C" fn choose_hw_pixel_format(
    ctx: *mut ffi::AVCodecContext,
    formats: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    let wanted = (*ctx).opaque as i64 as i32;
    let mut p = formats;
    while *p != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
        if *p as i32 == wanted {
            return *p;
        }
        p = p.add(1);
    }
    ffi::AVPixelFormat::AV_PIX_FMT_NONE
}

fn scale_into_buffer(path: &mut VideoPath, src: &ffmpeg::frame::Video, buffer: &mut [u8]) -> CoreResult<usize> {
    let source_key = (src.width(), src.height(), src.format());
    if path.scaler.is_none() || path.scaler_source != Some(source_key) {
        path.scaler = Some(
            SwsContext::get(
                src.format(),
                src.width(),
                src.height(),
                TARGET_PIXEL_FORMAT,
                path.decoder.width(),
                path.decoder.height(),
                SwsFlags::BILINEAR,
            )
            .map_err(|e| CoreError::decoder(format!("could not allocate scaler: {e}")))?,
        );
        path.scaler_source = Some(source_key);
    }

    let scaler = path.scaler.as_mut().expect("allocated above");
    let mut scaled = ffmpeg::frame::Video::empty();
    scaler
        .run(src, &mut scaled)
        .map_err(|e| CoreError::decoder(format!("video conversion failed: {e}")))?;

    let width = path.decoder.width() as usize;
    let height = path.decoder.height() as usize;
    let row_bytes = width * BGRA_BYTES_PER_PIXEL;
    let needed = row_bytes * height;
    if needed == 0 {
        return Err(CoreError::decoder("invalid converted video size"));
    }
    if needed > buffer.len() {
        return Err(CoreError::decoder("destination buffer too small for converted frame"));
    }

    let stride = scaled.stride(0);
    let src_plane = scaled.data(0);
    for row in 0..height {
        let src_off = row * stride;
        let dst_off = row * row_bytes;
        buffer[dst_off..dst_off + row_bytes].copy_from_slice(&src_plane[src_off..src_off + row_bytes]);
    }

    Ok(needed)
}

/// `best_effort_timestamp` if the codec set one, else raw `pts`, else 0.
trait BestEffortTimestamp {
    fn timestamp(&self) -> Option<i64>;
    fn pts(&self) -> Option<i64>;
}

impl BestEffortTimestamp for ffmpeg::frame::Audio {
    fn timestamp(&self) -> Option<i64> {
        ffmpeg::frame::Frame::timestamp(self)
    }
    fn pts(&self) -> Option<i64> {
        ffmpeg::frame::Frame::pts(self)
    }
}

impl BestEffortTimestamp for ffmpeg::frame::Video {
    fn timestamp(&self) -> Option<i64> {
        ffmpeg::frame::Frame::timestamp(self)
    }
    fn pts(&self) -> Option<i64> {
        ffmpeg::frame::Frame::pts(self)
    }
}

fn best_effort_timestamp<F: BestEffortTimestamp>(frame: &F) -> i64 {
    frame.timestamp().or_else(|| frame.pts()).unwrap_or(0)
}

fn rescale_to_micros(value: i64, time_base: ffmpeg::Rational) -> i64 {
    if value == ffi::AV_NOPTS_VALUE {
        return 0;
    }
    let tb = ffi::AVRational { num: time_base.numerator(), den: time_base.denominator() };
    unsafe { ffi::av_rescale_q(value, tb, ffi::AVRational { num: 1, den: 1_000_000 }) }
}

fn rescale_from_micros(value: i64, time_base: ffmpeg::Rational) -> i64 {
    let tb = ffi::AVRational { num: time_base.numerator(), den: time_base.denominator() };
    unsafe { ffi::av_rescale_q(value, ffi::AVRational { num: 1, den: 1_000_000 }, tb) }
}

fn pixel_to_av(pixel: Pixel) -> ffi::AVPixelFormat {
    pixel.into()
}

/// Builds the interleaved byte buffer for a packed-float audio frame. The
/// frame's plane 0 already holds interleaved samples since the resampler's
/// destination format is `F32(Packed)`.
fn interleaved_audio_bytes(frame: &ffmpeg::frame::Audio) -> Vec<u8> {
    let channels = frame.ch_layout().channels() as usize;
    let samples = frame.samples();
    let byte_len = samples * channels * corestream_types::SAMPLE_SIZE;
    frame.data(0)[..byte_len].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_on_an_unopenable_location_is_a_decoder_error() {
        let registry = Arc::new(HwRegistry::new());
        let options = DecoderOptions { find_audio: true, find_video: true, decode_audio: true, decode_video: true, hw_candidates: vec![] };
        let result = Decoder::new("/nonexistent/path/does/not/exist.mp4", &options, &registry);
        assert!(matches!(result, Err(CoreError::Decoder(_))));
    }

    #[test]
    fn new_on_a_file_with_no_demuxable_container_is_a_decoder_error() {
        // Distinct failure path from "path doesn't exist": the location opens
        // fine at the filesystem level but the demuxer can't probe a format
        // out of it (it's a real, existing file with no container header).
        let garbage = tempfile::NamedTempFile::new().expect("create temp file");
        std::fs::write(garbage.path(), b"not a media container").expect("write garbage bytes");

        let registry = Arc::new(HwRegistry::new());
        let options = DecoderOptions { find_audio: true, find_video: true, decode_audio: true, decode_video: true, hw_candidates: vec![] };
        let result = Decoder::new(garbage.path().to_str().expect("utf8 path"), &options, &registry);
        assert!(matches!(result, Err(CoreError::Decoder(_))));
    }

    proptest! {
        #[test]
        fn rescale_to_and_from_micros_round_trip(
            value in 0i64..10_000_000_000,
            num in 1i32..1000,
            den in 1i32..100_000,
        ) {
            let tb = ffmpeg::Rational::new(num, den);
            let micros = rescale_to_micros(value, tb);
            // av_rescale_q can lose precision when converting to a coarser
            // time base; converting back should land within one unit of the
            // original value's own time base, not bit-for-bit equal.
            let back = rescale_from_micros(micros, tb);
            let tolerance = (den as i64 / num.max(1) as i64).max(1);
            prop_assert!((back - value).abs() <= tolerance.max(1_000_000 / num.max(1) as i64).max(1));
        }

        #[test]
        fn rescale_to_micros_of_nopts_is_zero(num in 1i32..1000, den in 1i32..100_000) {
            let tb = ffmpeg::Rational::new(num, den);
            prop_assert_eq!(rescale_to_micros(ffi::AV_NOPTS_VALUE, tb), 0);
        }
    }
}
