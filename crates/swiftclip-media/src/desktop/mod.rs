// crates/swiftclip-media/src/desktop/mod.rs
//
// DesktopPlatform: the MediaPlatform for Linux / Windows / macOS.
//
//   demux.rs   FfmpegSource  (SampleSource)   libavformat input
//   mux.rs     FfmpegSink    (SampleSink)     libavformat MP4 output
//   decode.rs  FfmpegDecoder (DecoderCodec)   named hardware decoders
//   encode.rs  FfmpegEncoder (EncoderCodec)   named hardware H.264 encoders
//   GPU        gpu::wgpu_device::WgpuDevice
//
// Codecs are only ever opened by name from the configured candidate lists.
// There is no software fallback: if no hardware codec opens, the
// job fails with CodecInitFailure.
//
// Frame transfer is CPU-assisted: decoded pictures are converted to RGBA once
// for upload, rendered frames are read back once for the encoder.

pub mod decode;
pub mod demux;
pub mod encode;
pub mod mux;

use std::path::Path;
use std::sync::{Arc, Once};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::software::scaling;
use ffmpeg::util::rational::Rational;
use ffmpeg::Rescale;
use tracing::{debug, info};

use swiftclip_core::config::{DecoderConfig, EngineConfig};
use swiftclip_core::error::{ExportError, Result};

use crate::gpu::wgpu_device::WgpuDevice;
use crate::gpu::GpuDevice;
use crate::platform::{
    DecoderCodec, EncoderCodec, EncoderSettings, MediaPlatform, NativeFormat, SampleSink,
    SampleSource, TrackFormat,
};
use crate::surface::{FrameSurface, InputSurface};

/// Every timestamp crossing the platform seam is in µs.
pub(crate) const MICROS: Rational = Rational(1, 1_000_000);

pub(crate) fn ts_to_us(ts: i64, time_base: Rational) -> i64 {
    ts.rescale(time_base, MICROS)
}

pub(crate) fn us_to_ts(us: i64, time_base: Rational) -> i64 {
    us.rescale(MICROS, time_base)
}

// ── Codec parameters ──────────────────────────────────────────────────────────

/// An owned `AVCodecParameters` plus the time base its timestamps use.
/// Carried inside `TrackFormat::native` from demuxer/encoder to muxer/decoder.
pub(crate) struct CodecParams {
    ptr:       *mut ffmpeg::ffi::AVCodecParameters,
    time_base: Rational,
}

// SAFETY: the parameters are written once at construction and only read after.
unsafe impl Send for CodecParams {}
unsafe impl Sync for CodecParams {}

impl CodecParams {
    /// Deep copy of `src`.
    ///
    /// # Safety
    /// `src` must point to valid codec parameters for the duration of the call.
    pub(crate) unsafe fn copy_from(src: *const ffmpeg::ffi::AVCodecParameters, time_base: Rational) -> Result<Self> {
        let mut ptr = ffmpeg::ffi::avcodec_parameters_alloc();
        if ptr.is_null() {
            return Err(ExportError::CodecInit("avcodec_parameters_alloc failed".into()));
        }
        let ret = ffmpeg::ffi::avcodec_parameters_copy(ptr, src);
        if ret < 0 {
            ffmpeg::ffi::avcodec_parameters_free(&mut ptr);
            return Err(ExportError::CodecInit(format!("avcodec_parameters_copy failed: {ret}")));
        }
        Ok(Self { ptr, time_base })
    }

    /// Parameters of an opened codec context (encoder output format).
    ///
    /// # Safety
    /// `ctx` must point to an opened codec context.
    pub(crate) unsafe fn from_context(ctx: *const ffmpeg::ffi::AVCodecContext, time_base: Rational) -> Result<Self> {
        let mut ptr = ffmpeg::ffi::avcodec_parameters_alloc();
        if ptr.is_null() {
            return Err(ExportError::CodecInit("avcodec_parameters_alloc failed".into()));
        }
        let ret = ffmpeg::ffi::avcodec_parameters_from_context(ptr, ctx);
        if ret < 0 {
            ffmpeg::ffi::avcodec_parameters_free(&mut ptr);
            return Err(ExportError::CodecInit(format!("avcodec_parameters_from_context failed: {ret}")));
        }
        Ok(Self { ptr, time_base })
    }

    pub(crate) fn as_ptr(&self) -> *const ffmpeg::ffi::AVCodecParameters {
        self.ptr
    }

    pub(crate) fn time_base(&self) -> Rational {
        self.time_base
    }

    pub(crate) fn into_native(self) -> NativeFormat {
        NativeFormat(Arc::new(self))
    }

    /// The ffmpeg parameters behind a track, if this backend produced it.
    pub(crate) fn of(format: &TrackFormat) -> Result<&CodecParams> {
        format
            .native
            .as_ref()
            .and_then(|n| n.0.downcast_ref::<CodecParams>())
            .ok_or_else(|| ExportError::CodecInit(format!("track '{}' carries no codec parameters", format.codec)))
    }
}

impl Drop for CodecParams {
    fn drop(&mut self) {
        unsafe { ffmpeg::ffi::avcodec_parameters_free(&mut self.ptr) };
    }
}

// ── Scaler ────────────────────────────────────────────────────────────────────

/// swscale context that can move to the worker thread with its codec.
pub(crate) struct SendScaler(scaling::Context);

// SAFETY: each scaler is owned by one codec wrapper and used from one thread at a time.
unsafe impl Send for SendScaler {}

impl std::ops::Deref for SendScaler {
    type Target = scaling::Context;
    fn deref(&self) -> &Self::Target { &self.0 }
}
impl std::ops::DerefMut for SendScaler {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.0 }
}

impl SendScaler {
    pub(crate) fn bilinear(
        src: (ffmpeg::format::Pixel, u32, u32),
        dst: (ffmpeg::format::Pixel, u32, u32),
    ) -> Result<Self> {
        scaling::Context::get(src.0, src.1, src.2, dst.0, dst.1, dst.2, scaling::Flags::BILINEAR)
            .map(SendScaler)
            .map_err(|e| ExportError::CodecInit(format!("scaler {:?}→{:?}: {e}", src.0, dst.0)))
    }
}

// ── Platform ──────────────────────────────────────────────────────────────────

static FFMPEG_INIT: Once = Once::new();

pub struct DesktopPlatform {
    decoder: DecoderConfig,
}

impl DesktopPlatform {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut init = Ok(());
        FFMPEG_INIT.call_once(|| {
            init = ffmpeg::init().map_err(|e| ExportError::CodecInit(format!("ffmpeg init: {e}")));
            // Codec probing is noisy; our own tracing covers it.
            unsafe { ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_ERROR) };
        });
        init?;
        info!(decoders = ?config.decoder.candidates, encoders = ?config.encoder.candidates, "desktop platform ready");
        Ok(Self { decoder: config.decoder.clone() })
    }
}

impl MediaPlatform for DesktopPlatform {
    fn name(&self) -> &str {
        "desktop-ffmpeg-wgpu"
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn SampleSource>> {
        Ok(Box::new(demux::FfmpegSource::open(path)?))
    }

    fn create_sink(&self, path: &Path) -> Result<Box<dyn SampleSink>> {
        Ok(Box::new(mux::FfmpegSink::create(path)?))
    }

    fn create_decoder(&self, format: &TrackFormat, surface: FrameSurface) -> Result<Box<dyn DecoderCodec>> {
        let candidates = self.decoder.candidates_for(&format.codec);
        debug!(codec = %format.codec, ?candidates, "opening decoder");
        Ok(Box::new(decode::FfmpegDecoder::open(format, &candidates, surface)?))
    }

    fn create_encoder(&self, settings: &EncoderSettings, surface: Option<InputSurface>) -> Result<Box<dyn EncoderCodec>> {
        Ok(Box::new(encode::FfmpegEncoder::open(settings, surface)?))
    }

    fn create_gpu(&self) -> Result<Box<dyn GpuDevice>> {
        Ok(Box::new(WgpuDevice::new()?))
    }
}
