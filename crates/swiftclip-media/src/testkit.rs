// crates/swiftclip-media/src/testkit.rs
//
// In-memory MediaPlatform for unit tests. Compiled only under cfg(test).
//
//   MemoryMedia  scripted source file: tracks, samples in file order, and a
//                pts → picture generator the decoder renders from.
//   MockPlatform factory with failure knobs and shared counters.
//   CpuGpu       GpuDevice that rasterizes the quad on the CPU, nearest
//                neighbour, honouring the texture matrix (MVP is ignored).
//
// Encoded video samples written by MockEncoder carry the full RGBA of the
// presented frame as their payload, so tests can inspect output pixels.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use swiftclip_core::error::{ExportError, Result};
use swiftclip_core::helpers::geometry::Mat4;
use swiftclip_core::helpers::time::US_PER_SEC;

use crate::gpu::{DrawCall, GpuDevice, ProgramDesc, ProgramId, RenderTarget, SurfaceId, TargetId, TextureId};
use crate::platform::{
    DecodedBuffer, DecoderCodec, EncodedSample, EncoderCodec, EncoderOutput, EncoderParam,
    EncoderSettings, MediaPlatform, SampleFlags, SampleSink, SampleSource, TrackFormat, TrackKind,
};
use crate::surface::{FrameSurface, InputSurface, RgbaImage, SurfaceFrame};

pub const RED:   [u8; 4] = [255, 0, 0, 255];
pub const GREEN: [u8; 4] = [0, 255, 0, 255];
pub const BLUE:  [u8; 4] = [0, 0, 255, 255];
pub const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Four solid quadrants: red TL, green TR, blue BL, white BR.
pub fn quadrant_image(width: u32, height: u32) -> RgbaImage {
    let mut img = RgbaImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let px = match (x < width / 2, y < height / 2) {
                (true, true)   => RED,
                (false, true)  => GREEN,
                (true, false)  => BLUE,
                (false, false) => WHITE,
            };
            let i = (y as usize * width as usize + x as usize) * 4;
            img.data[i..i + 4].copy_from_slice(&px);
        }
    }
    img
}

pub type FrameGen = Arc<dyn Fn(i64) -> RgbaImage + Send + Sync>;

/// Quadrants plus a centre band whose grey level changes every 10 ms of pts,
/// so consecutive frames always differ while the corners stay fixed.
pub fn moving_frames(width: u32, height: u32) -> FrameGen {
    Arc::new(move |pts_us| {
        let mut img = quadrant_image(width, height);
        let level = ((pts_us / 10_000) * 50 % 256) as u8;
        for y in 0..height {
            for x in (width * 3 / 8)..(width * 5 / 8) {
                let i = (y as usize * width as usize + x as usize) * 4;
                img.data[i..i + 4].copy_from_slice(&[level, level, level, 255]);
            }
        }
        img
    })
}

pub fn static_frames(image: RgbaImage) -> FrameGen {
    Arc::new(move |_| image.clone())
}

// ── Scripted media ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MemoryMedia {
    pub tracks:      Vec<TrackFormat>,
    /// File order (non-decreasing pts, video first on ties).
    pub samples:     Vec<EncodedSample>,
    pub frames:      FrameGen,
    pub duration_us: i64,
    pub fps:         u32,
}

impl MemoryMedia {
    /// A 64×64 H.264 video track, one sync sample per second.
    pub fn clip(duration_ms: i64, fps: u32) -> Self {
        let duration_us = duration_ms * 1_000;
        let mut track = TrackFormat::video("h264", 64, 64);
        track.duration_us = Some(duration_us);
        let count = duration_us * i64::from(fps) / US_PER_SEC;
        let samples = (0..count)
            .map(|k| EncodedSample {
                track:  0,
                pts_us: k * US_PER_SEC / i64::from(fps),
                dts_us: Some(k * US_PER_SEC / i64::from(fps)),
                flags:  SampleFlags { key_frame: k % i64::from(fps) == 0, ..SampleFlags::default() },
                data:   vec![0xAB; 16],
            })
            .collect();
        Self { tracks: vec![track], samples, frames: moving_frames(64, 64), duration_us, fps }
    }

    /// Add an AAC track with a sample every 20 ms, interleaved by pts.
    pub fn with_audio(mut self) -> Self {
        let audio_index = self.tracks.len();
        self.tracks.push(TrackFormat {
            kind:         TrackKind::Audio,
            codec:        "aac".into(),
            width:        0,
            height:       0,
            duration_us:  Some(self.duration_us),
            rotation_deg: 0,
            native:       None,
        });
        let audio: Vec<EncodedSample> = (0..self.duration_us / 20_000)
            .map(|k| EncodedSample {
                track:  audio_index,
                pts_us: k * 20_000,
                dts_us: Some(k * 20_000),
                flags:  SampleFlags { key_frame: true, ..SampleFlags::default() },
                data:   vec![0xCD; 8],
            })
            .collect();
        let mut merged = Vec::with_capacity(self.samples.len() + audio.len());
        let mut video = std::mem::take(&mut self.samples).into_iter().peekable();
        let mut audio_iter = audio.into_iter().peekable();
        loop {
            let take_video = match (video.peek(), audio_iter.peek()) {
                (Some(v), Some(a)) => v.pts_us <= a.pts_us,
                (Some(_), None)    => true,
                (None, Some(_))    => false,
                (None, None)       => break,
            };
            let next = if take_video { video.next() } else { audio_iter.next() };
            merged.extend(next);
        }
        self.samples = merged;
        self
    }

    pub fn with_frames(mut self, frames: FrameGen) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        if let Some(t) = self.tracks.iter_mut().find(|t| t.kind == TrackKind::Video) {
            t.rotation_deg = degrees;
        }
        self
    }

    /// Add a timed-text track with a single sample mid-file.
    pub fn with_data_track(mut self) -> Self {
        let index = self.tracks.len();
        self.tracks.push(TrackFormat {
            kind:         TrackKind::Other,
            codec:        "mov_text".into(),
            width:        0,
            height:       0,
            duration_us:  Some(self.duration_us),
            rotation_deg: 0,
            native:       None,
        });
        let pos = self.samples.len() / 2;
        let pts = self.samples.get(pos).map_or(0, |s| s.pts_us);
        self.samples.insert(pos, EncodedSample {
            track:  index,
            pts_us: pts,
            dts_us: Some(pts),
            flags:  SampleFlags::default(),
            data:   b"caption".to_vec(),
        });
        self
    }

    pub fn frame_duration_us(&self) -> i64 {
        US_PER_SEC / i64::from(self.fps.max(1))
    }

    fn video_rotation(&self) -> i32 {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video).map_or(0, |t| t.rotation_deg)
    }
}

pub struct MemorySource {
    media:    MemoryMedia,
    selected: Vec<bool>,
    cursor:   usize,
}

impl MemorySource {
    pub fn new(media: MemoryMedia) -> Self {
        let n = media.tracks.len();
        Self { media, selected: vec![false; n], cursor: 0 }
    }
}

impl SampleSource for MemorySource {
    fn tracks(&self) -> &[TrackFormat] {
        &self.media.tracks
    }

    fn select_track(&mut self, index: usize) {
        if let Some(s) = self.selected.get_mut(index) {
            *s = true;
        }
    }

    fn seek(&mut self, time_us: i64) -> Result<()> {
        let video = self.media.tracks.iter().position(|t| t.kind == TrackKind::Video);
        self.cursor = self.media.samples
            .iter()
            .enumerate()
            .filter(|(_, s)| Some(s.track) == video && s.flags.key_frame && s.pts_us <= time_us)
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0);
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<EncodedSample>> {
        while let Some(s) = self.media.samples.get(self.cursor) {
            self.cursor += 1;
            if self.selected.get(s.track).copied().unwrap_or(false) {
                return Ok(Some(s.clone()));
            }
        }
        Ok(None)
    }

    fn duration_us(&self) -> Option<i64> {
        Some(self.media.duration_us)
    }
}

// ── Sink ──────────────────────────────────────────────────────────────────────

/// Everything a MemorySink was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SinkLog {
    pub path:    PathBuf,
    pub tracks:  Vec<TrackFormat>,
    pub samples: Vec<EncodedSample>,
    pub started: bool,
    pub stopped: bool,
}

impl SinkLog {
    pub fn video_samples(&self) -> Vec<&EncodedSample> {
        self.samples
            .iter()
            .filter(|s| self.tracks.get(s.track).is_some_and(|t| t.kind == TrackKind::Video))
            .collect()
    }

    pub fn samples_of(&self, kind: TrackKind) -> Vec<&EncodedSample> {
        self.samples
            .iter()
            .filter(|s| self.tracks.get(s.track).is_some_and(|t| t.kind == kind))
            .collect()
    }

    /// Span from first to last video pts plus one frame.
    pub fn video_span_us(&self, frame_us: i64) -> i64 {
        let v = self.video_samples();
        match (v.first(), v.last()) {
            (Some(a), Some(b)) => b.pts_us - a.pts_us + frame_us,
            _ => 0,
        }
    }
}

pub struct MemorySink {
    log: Arc<Mutex<SinkLog>>,
}

impl SampleSink for MemorySink {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        let mut log = self.log.lock();
        if log.started {
            return Err(ExportError::MuxerOrdering("add_track after start".into()));
        }
        log.tracks.push(format.clone());
        Ok(log.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<()> {
        let mut log = self.log.lock();
        if log.tracks.is_empty() {
            return Err(ExportError::MuxerOrdering("start without tracks".into()));
        }
        log.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<()> {
        let mut log = self.log.lock();
        if !log.started || log.stopped {
            return Err(ExportError::MuxerOrdering("write outside start/stop".into()));
        }
        if track >= log.tracks.len() {
            return Err(ExportError::MuxerOrdering(format!("unknown track {track}")));
        }
        let mut s = sample.clone();
        s.track = track;
        log.samples.push(s);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.log.lock().stopped = true;
        Ok(())
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

struct MockDecoder {
    surface:      FrameSurface,
    frames:       FrameGen,
    rotation:     i32,
    pending:      VecDeque<i64>,
    capacity:     usize,
    eos_in:       bool,
    eos_out:      bool,
    next_index:   usize,
    rebind_fails: bool,
    stats:        Arc<PlatformStats>,
}

impl DecoderCodec for MockDecoder {
    fn queue_input(&mut self, sample: &EncodedSample) -> Result<bool> {
        if self.eos_in {
            return Err(ExportError::step("decoder.queue_input", "input after end of stream"));
        }
        if self.pending.len() >= self.capacity {
            return Ok(false);
        }
        self.pending.push_back(sample.pts_us);
        Ok(true)
    }

    fn queue_end_of_input(&mut self) -> Result<bool> {
        self.eos_in = true;
        Ok(true)
    }

    fn dequeue_output(&mut self) -> Result<Option<DecodedBuffer>> {
        let index = self.next_index;
        if let Some(pts_us) = self.pending.pop_front() {
            self.next_index += 1;
            return Ok(Some(DecodedBuffer { index, pts_us, has_data: true, end_of_stream: false }));
        }
        if self.eos_in && !self.eos_out {
            self.eos_out = true;
            self.next_index += 1;
            return Ok(Some(DecodedBuffer { index, pts_us: 0, has_data: false, end_of_stream: true }));
        }
        Ok(None)
    }

    fn release_output(&mut self, buffer: DecodedBuffer, render: bool) -> Result<()> {
        if render && buffer.has_data {
            self.surface.queue(SurfaceFrame {
                image:     (self.frames)(buffer.pts_us),
                pts_us:    buffer.pts_us,
                transform: Mat4::orientation(self.rotation),
            });
            self.stats.frames_rendered.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn set_output_surface(&mut self, surface: FrameSurface) -> Result<()> {
        if self.rebind_fails {
            return Err(ExportError::step("decoder.set_output_surface", "unsupported"));
        }
        self.surface = surface;
        self.stats.decoder_rebinds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.pending.clear();
        self.eos_in = false;
        self.eos_out = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stats.decoders_stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Encoder ───────────────────────────────────────────────────────────────────

struct MockEncoder {
    settings:     EncoderSettings,
    input:        InputSurface,
    started:      bool,
    eos_signaled: bool,
    format_sent:  bool,
    config_sent:  bool,
    eos_sent:     bool,
    sync_pending: bool,
    frames_out:   usize,
    stats:        Arc<PlatformStats>,
}

impl EncoderCodec for MockEncoder {
    fn input_surface(&self) -> InputSurface {
        self.input.clone()
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput> {
        if !self.started {
            return Err(ExportError::step("encoder.dequeue_output", "not started"));
        }
        if !self.format_sent {
            self.format_sent = true;
            return Ok(EncoderOutput::FormatChanged(TrackFormat::video(
                "h264",
                self.settings.width,
                self.settings.height,
            )));
        }
        if !self.config_sent {
            self.config_sent = true;
            return Ok(EncoderOutput::Buffer(EncodedSample {
                track:  0,
                pts_us: 0,
                dts_us: None,
                flags:  SampleFlags { codec_config: true, ..SampleFlags::default() },
                data:   vec![0, 0, 0, 1, 0x67],
            }));
        }
        let wait = if self.eos_signaled { Duration::ZERO } else { timeout };
        if let Some(frame) = self.input.next_frame(wait) {
            let gop = (self.settings.frame_rate * self.settings.keyframe_interval_secs).max(1) as usize;
            let key = self.frames_out % gop == 0 || std::mem::take(&mut self.sync_pending);
            self.frames_out += 1;
            self.stats.frames_encoded.fetch_add(1, Ordering::SeqCst);
            return Ok(EncoderOutput::Buffer(EncodedSample {
                track:  0,
                pts_us: frame.pts_us,
                dts_us: Some(frame.pts_us),
                flags:  SampleFlags { key_frame: key, ..SampleFlags::default() },
                data:   frame.image.data,
            }));
        }
        if self.eos_signaled && !self.eos_sent {
            self.eos_sent = true;
            return Ok(EncoderOutput::Buffer(EncodedSample::end_of_stream(0)));
        }
        Ok(EncoderOutput::TryAgainLater)
    }

    fn signal_end_of_input(&mut self) -> Result<()> {
        if !self.started {
            return Err(ExportError::step("encoder.signal_end_of_input", "not started"));
        }
        self.eos_signaled = true;
        Ok(())
    }

    fn set_parameter(&mut self, param: EncoderParam) -> Result<()> {
        match param {
            EncoderParam::Bitrate(bps) => self.stats.bitrates.lock().push(bps),
            EncoderParam::RequestSyncFrame => {
                self.sync_pending = true;
                self.stats.sync_requests.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        self.stats.encoders_stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Replays a fixed list of outputs, then reports TryAgainLater forever.
struct ScriptedEncoder {
    input:  InputSurface,
    script: VecDeque<EncoderOutput>,
}

impl EncoderCodec for ScriptedEncoder {
    fn input_surface(&self) -> InputSurface { self.input.clone() }
    fn start(&mut self) -> Result<()> { Ok(()) }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<EncoderOutput> {
        Ok(self.script.pop_front().unwrap_or(EncoderOutput::TryAgainLater))
    }

    fn signal_end_of_input(&mut self) -> Result<()> { Ok(()) }
    fn set_parameter(&mut self, _param: EncoderParam) -> Result<()> { Ok(()) }
    fn stop(&mut self) -> Result<()> { Ok(()) }
}

// ── Platform ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct PlatformStats {
    pub sources_opened:   AtomicUsize,
    pub sinks_created:    AtomicUsize,
    pub decoders_created: AtomicUsize,
    pub decoders_stopped: AtomicUsize,
    pub decoder_rebinds:  AtomicUsize,
    pub encoders_created: AtomicUsize,
    pub encoders_stopped: AtomicUsize,
    pub frames_rendered:  AtomicUsize,
    pub frames_encoded:   AtomicUsize,
    pub sync_requests:    AtomicUsize,
    pub bitrates:         Mutex<Vec<u32>>,
}

pub struct MockPlatform {
    media:                  Option<MemoryMedia>,
    gpu_fails:              bool,
    decoder_fails:          bool,
    decoder_rebind_fails:   bool,
    encoder_failures:       AtomicUsize,
    encoder_script:         Option<Vec<EncoderOutput>>,
    pub stats:              Arc<PlatformStats>,
    sinks:                  Mutex<Vec<Arc<Mutex<SinkLog>>>>,
}

impl MockPlatform {
    /// 10 s, 30 fps, moving picture, video only.
    pub fn new() -> Self {
        Self::with_media(MemoryMedia::clip(10_000, 30))
    }

    pub fn with_media(media: MemoryMedia) -> Self {
        Self {
            media:                Some(media),
            gpu_fails:            false,
            decoder_fails:        false,
            decoder_rebind_fails: false,
            encoder_failures:     AtomicUsize::new(0),
            encoder_script:       None,
            stats:                Arc::new(PlatformStats::default()),
            sinks:                Mutex::new(Vec::new()),
        }
    }

    pub fn without_media(mut self) -> Self {
        self.media = None;
        self
    }

    pub fn with_gpu_failure(mut self) -> Self {
        self.gpu_fails = true;
        self
    }

    pub fn with_decoder_failure(mut self) -> Self {
        self.decoder_fails = true;
        self
    }

    pub fn with_failing_decoder_rebind(mut self) -> Self {
        self.decoder_rebind_fails = true;
        self
    }

    /// Every encoder replays `script` instead of encoding.
    pub fn with_encoder_script(mut self, script: Vec<EncoderOutput>) -> Self {
        self.encoder_script = Some(script);
        self
    }

    /// The next `n` encoder creations fail with CodecInit.
    pub fn fail_next_encoders(&self, n: usize) {
        self.encoder_failures.store(n, Ordering::SeqCst);
    }

    pub fn media(&self) -> Option<&MemoryMedia> {
        self.media.as_ref()
    }

    /// The most recent sink opened for `path`.
    pub fn sink(&self, path: &Path) -> Option<SinkLog> {
        self.sinks
            .lock()
            .iter()
            .rev()
            .map(|s| s.lock().clone())
            .find(|s| s.path == path)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn count(&self, f: impl Fn(&PlatformStats) -> &AtomicUsize) -> usize {
        f(&self.stats).load(Ordering::SeqCst)
    }
}

impl Default for MockPlatform {
    fn default() -> Self { Self::new() }
}

impl MediaPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn SampleSource>> {
        let media = self.media
            .clone()
            .ok_or_else(|| ExportError::unreadable(path, "no such file"))?;
        self.stats.sources_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySource::new(media)))
    }

    fn create_sink(&self, path: &Path) -> Result<Box<dyn SampleSink>> {
        let log = Arc::new(Mutex::new(SinkLog { path: path.to_path_buf(), ..SinkLog::default() }));
        self.sinks.lock().push(Arc::clone(&log));
        self.stats.sinks_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySink { log }))
    }

    fn create_decoder(&self, format: &TrackFormat, surface: FrameSurface) -> Result<Box<dyn DecoderCodec>> {
        if self.decoder_fails || format.kind != TrackKind::Video {
            return Err(ExportError::CodecInit(format!("no hardware decoder for {}", format.codec)));
        }
        let media = self.media
            .as_ref()
            .ok_or_else(|| ExportError::CodecInit("no media".into()))?;
        self.stats.decoders_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDecoder {
            surface,
            frames:       Arc::clone(&media.frames),
            rotation:     media.video_rotation(),
            pending:      VecDeque::new(),
            capacity:     4,
            eos_in:       false,
            eos_out:      false,
            next_index:   0,
            rebind_fails: self.decoder_rebind_fails,
            stats:        Arc::clone(&self.stats),
        }))
    }

    fn create_encoder(&self, settings: &EncoderSettings, surface: Option<InputSurface>) -> Result<Box<dyn EncoderCodec>> {
        let failing = self.encoder_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExportError::CodecInit("scripted encoder failure".into()));
        }
        let input = surface
            .filter(|s| s.size() == (settings.width, settings.height))
            .unwrap_or_else(|| InputSurface::new(settings.width, settings.height));
        self.stats.encoders_created.fetch_add(1, Ordering::SeqCst);
        if let Some(script) = &self.encoder_script {
            return Ok(Box::new(ScriptedEncoder { input, script: script.iter().cloned().collect() }));
        }
        Ok(Box::new(MockEncoder {
            settings:     settings.clone(),
            input,
            started:      false,
            eos_signaled: false,
            format_sent:  false,
            config_sent:  false,
            eos_sent:     false,
            sync_pending: false,
            frames_out:   0,
            stats:        Arc::clone(&self.stats),
        }))
    }

    fn create_gpu(&self) -> Result<Box<dyn GpuDevice>> {
        if self.gpu_fails {
            return Err(ExportError::GpuInit("no adapter".into()));
        }
        Ok(Box::new(CpuGpu::new()))
    }
}

// ── CPU GPU ───────────────────────────────────────────────────────────────────

pub struct CpuGpu {
    surfaces:      HashMap<SurfaceId, (InputSurface, RgbaImage)>,
    textures:      HashMap<TextureId, Option<RgbaImage>>,
    programs:      HashSet<ProgramId>,
    targets:       HashMap<TargetId, RgbaImage>,
    current:       Option<SurfaceId>,
    next_id:       u64,
    program_count: Arc<AtomicUsize>,
    target_count:  Arc<AtomicUsize>,
}

impl CpuGpu {
    pub fn new() -> Self {
        Self {
            surfaces:      HashMap::new(),
            textures:      HashMap::new(),
            programs:      HashSet::new(),
            targets:       HashMap::new(),
            current:       None,
            next_id:       1,
            program_count: Arc::new(AtomicUsize::new(0)),
            target_count:  Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Programs created so far.
    pub fn program_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.program_count)
    }

    /// Live offscreen targets.
    pub fn target_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.target_count)
    }

    fn alloc(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for CpuGpu {
    fn default() -> Self { Self::new() }
}

fn rasterize(dest: &mut RgbaImage, src: &RgbaImage, tex: &Mat4) {
    let (dw, dh) = (dest.width.max(1), dest.height.max(1));
    let (sw, sh) = (i64::from(src.width.max(1)), i64::from(src.height.max(1)));
    for py in 0..dest.height {
        for px in 0..dest.width {
            let u = (px as f32 + 0.5) / dw as f32;
            let v = (py as f32 + 0.5) / dh as f32;
            let (su, sv) = tex.transform_point(u, v);
            let sx = ((su * sw as f32).floor() as i64).clamp(0, sw - 1);
            let sy = ((sv * sh as f32).floor() as i64).clamp(0, sh - 1);
            let s = ((sy * sw + sx) * 4) as usize;
            let d = (py as usize * dest.width as usize + px as usize) * 4;
            dest.data[d..d + 4].copy_from_slice(&src.data[s..s + 4]);
        }
    }
}

impl GpuDevice for CpuGpu {
    fn describe(&self) -> String {
        "cpu rasterizer".into()
    }

    fn create_window_surface(&mut self, input: &InputSurface) -> Result<SurfaceId> {
        let (w, h) = input.size();
        let id = SurfaceId(self.alloc());
        self.surfaces.insert(id, (input.clone(), RgbaImage::new(w, h)));
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface);
        if self.current == Some(surface) {
            self.current = None;
        }
    }

    fn make_current(&mut self, surfaces: Option<(SurfaceId, SurfaceId)>) -> Result<()> {
        self.current = surfaces.map(|(draw, _)| draw);
        Ok(())
    }

    fn swap_buffers(&mut self, surface: SurfaceId, pts_us: i64) -> Result<()> {
        let (input, buffer) = self.surfaces
            .get(&surface)
            .ok_or_else(|| ExportError::step("gpu.swap_buffers", "unknown surface"))?;
        input.submit(buffer.clone(), pts_us);
        Ok(())
    }

    fn create_external_texture(&mut self) -> Result<TextureId> {
        let id = TextureId(self.alloc());
        self.textures.insert(id, None);
        Ok(id)
    }

    fn update_tex_image(&mut self, texture: TextureId, frame: SurfaceFrame) -> Result<Mat4> {
        let slot = self.textures
            .get_mut(&texture)
            .ok_or_else(|| ExportError::step("gpu.update_tex_image", "unknown texture"))?;
        *slot = Some(frame.image);
        Ok(frame.transform)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn create_program(&mut self, _desc: &ProgramDesc) -> Result<ProgramId> {
        let id = ProgramId(self.alloc());
        self.programs.insert(id);
        self.program_count.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn create_offscreen_target(&mut self, width: u32, height: u32) -> Result<TargetId> {
        let id = TargetId(self.alloc());
        self.targets.insert(id, RgbaImage::new(width, height));
        self.target_count.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn delete_offscreen_target(&mut self, target: TargetId) {
        if self.targets.remove(&target).is_some() {
            self.target_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn draw_quad(&mut self, call: &DrawCall) -> Result<()> {
        if !self.programs.contains(&call.program) {
            return Err(ExportError::step("gpu.draw", "unknown program"));
        }
        let src = self.textures
            .get(&call.texture)
            .and_then(|t| t.clone())
            .ok_or_else(|| ExportError::step("gpu.draw", "texture has no image yet"))?;
        let dest = match call.target {
            RenderTarget::Current => {
                let id = self.current.ok_or_else(|| ExportError::step("gpu.draw", "no current surface"))?;
                self.surfaces
                    .get_mut(&id)
                    .map(|(_, buf)| buf)
                    .ok_or_else(|| ExportError::step("gpu.draw", "stale surface"))?
            }
            RenderTarget::Offscreen(id) => self.targets
                .get_mut(&id)
                .ok_or_else(|| ExportError::step("gpu.draw", "unknown target"))?,
        };
        rasterize(dest, &src, &call.tex_matrix);
        Ok(())
    }

    fn read_pixels(&mut self, target: TargetId) -> Result<Vec<u8>> {
        self.targets
            .get(&target)
            .map(|t| t.data.clone())
            .ok_or_else(|| ExportError::step("gpu.read_pixels", "unknown target"))
    }

    fn release(&mut self) {
        self.target_count.fetch_sub(self.targets.len(), Ordering::SeqCst);
        self.surfaces.clear();
        self.textures.clear();
        self.programs.clear();
        self.targets.clear();
        self.current = None;
    }
}
