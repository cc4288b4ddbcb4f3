// crates/swiftclip-media/src/platform.rs
//
// The seam between the engine and whatever actually decodes, encodes, muxes
// and renders.
//
// Design:
//   • The engine (decoder/encoder wrappers, render graph, copier) only ever
//     talks to these traits. `desktop::DesktopPlatform` implements them with
//     ffmpeg-the-third hardware codecs and wgpu; the unit tests implement
//     them with scripted in-memory fakes.
//   • Codec calls are shaped like a hardware codec's buffer queues: a feed
//     call may refuse input ("no slot now"), a drain call may have nothing
//     ready. Neither ever blocks for long.
//   • All timestamps are µs.
//
// Thread model:
//   Every trait object is `Send`: a batch is built on the submitter's thread
//   and run on the ExportWorker thread, and idle encoders sit in a pool that
//   any job lifecycle may touch.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use swiftclip_core::error::Result;

use crate::gpu::GpuDevice;
use crate::surface::{FrameSurface, InputSurface};

// ── Track & sample data ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

/// Backend-private codec parameters riding along with a `TrackFormat`, e.g. the
/// ffmpeg `AVCodecParameters` a muxer needs to create a stream-copy track.
#[derive(Clone)]
pub struct NativeFormat(pub Arc<dyn Any + Send + Sync>);

impl std::fmt::Debug for NativeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NativeFormat(..)")
    }
}

#[derive(Debug, Clone)]
pub struct TrackFormat {
    pub kind:         TrackKind,
    /// Short codec name (`h264`, `hevc`, `aac`, …).
    pub codec:        String,
    pub width:        u32,
    pub height:       u32,
    pub duration_us:  Option<i64>,
    /// Display rotation in degrees, clockwise.
    pub rotation_deg: i32,
    pub native:       Option<NativeFormat>,
}

impl TrackFormat {
    pub fn video(codec: &str, width: u32, height: u32) -> Self {
        Self {
            kind:         TrackKind::Video,
            codec:        codec.to_string(),
            width,
            height,
            duration_us:  None,
            rotation_deg: 0,
            native:       None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub key_frame:     bool,
    /// Out-of-band codec configuration (SPS/PPS), not a picture.
    pub codec_config:  bool,
    pub end_of_stream: bool,
}

/// One compressed sample travelling demuxer → decoder, demuxer → muxer, or
/// encoder → muxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    pub track:  usize,
    pub pts_us: i64,
    /// Decode timestamp when the container carries one distinct from `pts_us`.
    pub dts_us: Option<i64>,
    pub flags:  SampleFlags,
    pub data:   Vec<u8>,
}

impl EncodedSample {
    pub fn end_of_stream(track: usize) -> Self {
        Self {
            track,
            pts_us: 0,
            dts_us: None,
            flags:  SampleFlags { end_of_stream: true, ..SampleFlags::default() },
            data:   Vec::new(),
        }
    }

    /// Same payload, timestamps shifted back by `offset_us`; pts is clamped ≥ 0.
    pub fn rebased(mut self, offset_us: i64) -> Self {
        self.pts_us = (self.pts_us - offset_us).max(0);
        self.dts_us = self.dts_us.map(|d| d - offset_us);
        self
    }
}

// ── Demux / mux ───────────────────────────────────────────────────────────────

pub trait SampleSource: Send {
    fn tracks(&self) -> &[TrackFormat];
    /// Samples of unselected tracks are skipped by `read_sample`.
    fn select_track(&mut self, index: usize);
    /// Seek so the next sample of each selected track is the sync sample at
    /// or before `time_us`.
    fn seek(&mut self, time_us: i64) -> Result<()>;
    /// Next sample in file order, `None` at end of file.
    fn read_sample(&mut self) -> Result<Option<EncodedSample>>;
    fn duration_us(&self) -> Option<i64>;
}

pub trait SampleSink: Send {
    /// Only valid before `start`.
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize>;
    fn start(&mut self) -> Result<()>;
    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<()>;
    /// Finalise the container. Idempotent.
    fn stop(&mut self) -> Result<()>;
}

// ── Codecs ────────────────────────────────────────────────────────────────────

/// A decoded picture the decoder is holding for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedBuffer {
    pub index:         usize,
    pub pts_us:        i64,
    /// False for the empty buffer that only carries end-of-stream.
    pub has_data:      bool,
    pub end_of_stream: bool,
}

pub trait DecoderCodec: Send {
    /// Offer one compressed sample. `Ok(false)` = no input slot right now;
    /// offer the same sample again later.
    fn queue_input(&mut self, sample: &EncodedSample) -> Result<bool>;
    /// `Ok(false)` = no slot right now.
    fn queue_end_of_input(&mut self) -> Result<bool>;
    /// Non-blocking.
    fn dequeue_output(&mut self) -> Result<Option<DecodedBuffer>>;
    /// Hand the buffer back; with `render` it is pushed to the output surface.
    fn release_output(&mut self, buffer: DecodedBuffer, render: bool) -> Result<()>;
    /// Rebind to another output surface. Backends that cannot do this return
    /// `Err` and the caller builds a fresh decoder instead.
    fn set_output_surface(&mut self, surface: FrameSurface) -> Result<()>;
    /// Drop everything in flight (after a seek).
    fn flush(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Live-tunable encoder parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderParam {
    Bitrate(u32),
    RequestSyncFrame,
}

#[derive(Debug, Clone)]
pub enum EncoderOutput {
    TryAgainLater,
    FormatChanged(TrackFormat),
    Buffer(EncodedSample),
}

/// Everything needed to configure a hardware H.264 encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Already rounded down to even.
    pub width:                  u32,
    pub height:                 u32,
    pub bitrate:                u32,
    pub frame_rate:             u32,
    pub keyframe_interval_secs: u32,
    pub low_latency:            bool,
    pub candidates:             Vec<String>,
}

pub trait EncoderCodec: Send {
    fn input_surface(&self) -> InputSurface;
    fn start(&mut self) -> Result<()>;
    /// Wait at most `timeout` for output.
    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput>;
    fn signal_end_of_input(&mut self) -> Result<()>;
    fn set_parameter(&mut self, param: EncoderParam) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

// ── Factory ───────────────────────────────────────────────────────────────────

pub trait MediaPlatform: Send + Sync {
    fn name(&self) -> &str;
    fn open_source(&self, path: &Path) -> Result<Box<dyn SampleSource>>;
    fn create_sink(&self, path: &Path) -> Result<Box<dyn SampleSink>>;
    /// A decoder for `format`, rendering into `surface`.
    fn create_decoder(&self, format: &TrackFormat, surface: FrameSurface) -> Result<Box<dyn DecoderCodec>>;
    /// An encoder for `settings`. When `surface` is given the backend may adopt
    /// it as its input surface (persistent surface across resets).
    fn create_encoder(&self, settings: &EncoderSettings, surface: Option<InputSurface>) -> Result<Box<dyn EncoderCodec>>;
    fn create_gpu(&self) -> Result<Box<dyn GpuDevice>>;
}
