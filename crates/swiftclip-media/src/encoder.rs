// crates/swiftclip-media/src/encoder.rs
//
// HardwareEncoder: a platform H.264 encoder fed through its InputSurface and
// draining into one container muxer.
//
// State machine:
//   Configured ──start()──▶ Encoding ──signal_end_of_stream()──▶ EosSignaled
//        ▲                                                           │
//        └────────────── reset(dest) ◀── Drained ◀──drain() sees EOS─┘
//
// Muxer ordering (fatal when violated):
//   • The write track is created exactly once, on the encoder's first
//     FormatChanged, and the muxer is started right there.
//   • A second FormatChanged, or a payload before the first one, is a
//     MuxerOrdering error.
//   • Codec-config buffers (SPS/PPS) are stripped; the format already carries
//     them.
//   • pts is clamped to ≥ 0. dts is clamped to ≥ 0 and then kept strictly
//     increasing within a session, so reordered output whose leading dts is
//     negative never collapses several samples onto dts 0.
//   • The container is finalised the moment end-of-stream is drained, so an
//     encoder parked in the pool never holds an unfinished file.
//
// reset() keeps the object and, where the platform can adopt it, the
// InputSurface, so a GPU surface bound to it stays valid across jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use swiftclip_core::config::EncoderConfig;
use swiftclip_core::error::{ExportError, Result};

use crate::platform::{EncoderCodec, EncoderOutput, EncoderParam, EncoderSettings, MediaPlatform, SampleSink};
use crate::surface::InputSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Configured,
    Encoding,
    EosSignaled,
    Drained,
}

/// Encoder settings for a `width`×`height` output, rounded down to even.
pub fn settings_for(config: &EncoderConfig, width: u32, height: u32) -> EncoderSettings {
    EncoderSettings {
        width:                  (width & !1).max(2),
        height:                 (height & !1).max(2),
        bitrate:                config.bitrate,
        frame_rate:             config.frame_rate,
        keyframe_interval_secs: config.keyframe_interval_secs,
        low_latency:            config.low_latency,
        candidates:             config.candidates.clone(),
    }
}

pub struct HardwareEncoder {
    platform:        Arc<dyn MediaPlatform>,
    settings:        EncoderSettings,
    destination:     PathBuf,
    codec:           Option<Box<dyn EncoderCodec>>,
    sink:            Option<Box<dyn SampleSink>>,
    input_surface:   InputSurface,
    track:           Option<usize>,
    state:           EncoderState,
    current_bitrate: u32,
    drain_timeout:   Duration,
    frames_written:  u64,
    last_dts:        Option<i64>,
}

impl HardwareEncoder {
    /// Configure (but do not start) an encoder writing to `destination`.
    pub fn new(
        platform:    Arc<dyn MediaPlatform>,
        config:      &EncoderConfig,
        destination: &Path,
        width:       u32,
        height:      u32,
    ) -> Result<Self> {
        let settings = settings_for(config, width, height);
        let (codec, sink) = open(platform.as_ref(), &settings, None, destination)?;
        let input_surface = codec.input_surface();
        info!(
            size = %format!("{}x{}", settings.width, settings.height),
            bitrate = settings.bitrate,
            dest = %destination.display(),
            "encoder configured"
        );
        Ok(Self {
            platform,
            current_bitrate: settings.bitrate,
            settings,
            destination:     destination.to_path_buf(),
            codec:           Some(codec),
            sink:            Some(sink),
            input_surface,
            track:           None,
            state:           EncoderState::Configured,
            drain_timeout:   Duration::from_millis(config.drain_timeout_ms),
            frames_written:  0,
            last_dts:        None,
        })
    }

    fn codec(&mut self) -> Result<&mut Box<dyn EncoderCodec>> {
        self.codec
            .as_mut()
            .ok_or_else(|| ExportError::CodecInit("encoder has been released".into()))
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != EncoderState::Configured {
            return Ok(());
        }
        self.codec()?.start()?;
        self.state = EncoderState::Encoding;
        Ok(())
    }

    /// Take every pending encoder output. Only the first poll waits (up to
    /// the drain timeout). Returns true once end-of-stream has been drained
    /// and the container finalised.
    pub fn drain(&mut self) -> Result<bool> {
        match self.state {
            EncoderState::Drained    => return Ok(true),
            EncoderState::Configured => return Ok(false),
            _ => {}
        }
        let mut timeout = self.drain_timeout;
        loop {
            let output = self.codec()?.dequeue_output(timeout)?;
            timeout = Duration::ZERO;
            match output {
                EncoderOutput::TryAgainLater => return Ok(false),

                EncoderOutput::FormatChanged(format) => {
                    if self.track.is_some() {
                        return Err(ExportError::MuxerOrdering("format changed twice".into()));
                    }
                    let sink = self.sink_mut()?;
                    let track = sink.add_track(&format)?;
                    sink.start()?;
                    self.track = Some(track);
                    debug!(codec = %format.codec, track, "muxer started");
                }

                EncoderOutput::Buffer(sample) if sample.flags.end_of_stream => {
                    self.sink_mut()?.stop()?;
                    self.state = EncoderState::Drained;
                    info!(
                        frames = self.frames_written,
                        dest = %self.destination.display(),
                        "encoder drained, container finalised"
                    );
                    return Ok(true);
                }

                EncoderOutput::Buffer(sample) if sample.flags.codec_config || sample.data.is_empty() => {}

                EncoderOutput::Buffer(mut sample) => {
                    let track = self.track
                        .ok_or_else(|| ExportError::MuxerOrdering("sample before output format".into()))?;
                    sample.pts_us = sample.pts_us.max(0);
                    sample.dts_us = sample.dts_us.map(|d| self.monotonic_dts(d));
                    self.sink_mut()?.write_sample(track, &sample)?;
                    self.frames_written += 1;
                }
            }
        }
    }

    fn monotonic_dts(&mut self, dts: i64) -> i64 {
        let dts = match self.last_dts {
            Some(prev) if dts <= prev => prev + 1,
            _ => dts.max(0),
        };
        self.last_dts = Some(dts);
        dts
    }

    fn sink_mut(&mut self) -> Result<&mut Box<dyn SampleSink>> {
        self.sink
            .as_mut()
            .ok_or_else(|| ExportError::MuxerOrdering("no muxer bound".into()))
    }

    /// Idempotent; only meaningful while encoding.
    pub fn signal_end_of_stream(&mut self) -> Result<()> {
        if self.state != EncoderState::Encoding {
            return Ok(());
        }
        self.codec()?.signal_end_of_input()?;
        self.state = EncoderState::EosSignaled;
        debug!("encoder end of input signalled");
        Ok(())
    }

    /// Live bitrate change; a no-op when the rate is unchanged.
    pub fn set_bitrate(&mut self, bps: u32) -> Result<()> {
        if bps == self.current_bitrate {
            return Ok(());
        }
        self.codec()?.set_parameter(EncoderParam::Bitrate(bps))?;
        debug!(from = self.current_bitrate, to = bps, "encoder bitrate changed");
        self.current_bitrate = bps;
        Ok(())
    }

    pub fn request_sync_frame(&mut self) -> Result<()> {
        self.codec()?.set_parameter(EncoderParam::RequestSyncFrame)
    }

    /// Stop and re-initialise against `destination`, back to Configured.
    /// Falls back to one full re-init (new input surface allowed) before
    /// giving up.
    pub fn reset(&mut self, destination: &Path) -> Result<()> {
        self.shutdown();
        self.input_surface.clear();
        let opened = open(self.platform.as_ref(), &self.settings, Some(self.input_surface.clone()), destination);
        let (codec, sink) = match opened {
            Ok(parts) => parts,
            Err(first) => {
                warn!(dest = %destination.display(), "encoder reset failed, re-initialising: {first}");
                self.release();
                open(self.platform.as_ref(), &self.settings, None, destination)?
            }
        };

        let surface = codec.input_surface();
        if surface.id() != self.input_surface.id() {
            debug!(old = ?self.input_surface, new = ?surface, "encoder input surface replaced on reset");
            self.input_surface = surface;
        }
        self.codec = Some(codec);
        self.sink = Some(sink);
        self.destination = destination.to_path_buf();
        self.track = None;
        self.state = EncoderState::Configured;
        self.current_bitrate = self.settings.bitrate;
        self.frames_written = 0;
        self.last_dts = None;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(mut codec) = self.codec.take() {
            if let Err(e) = codec.stop() {
                let err = ExportError::Teardown(e.to_string());
                warn!(kind = %err.kind(), "encoder stop: {err}");
            }
        }
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.stop() {
                let err = ExportError::Teardown(e.to_string());
                warn!(kind = %err.kind(), dest = %self.destination.display(), "muxer stop: {err}");
            }
        }
    }

    /// Stop the codec and muxer. Errors are logged, never returned.
    pub fn release(&mut self) {
        if self.codec.is_none() && self.sink.is_none() {
            return;
        }
        self.shutdown();
        self.input_surface.clear();
        debug!(dest = %self.destination.display(), "encoder released");
    }

    pub fn input_surface(&self) -> InputSurface {
        self.input_surface.clone()
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn size(&self) -> (u32, u32) {
        (self.settings.width, self.settings.height)
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn current_bitrate(&self) -> u32 {
        self.current_bitrate
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for HardwareEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

fn open(
    platform:    &dyn MediaPlatform,
    settings:    &EncoderSettings,
    surface:     Option<InputSurface>,
    destination: &Path,
) -> Result<(Box<dyn EncoderCodec>, Box<dyn SampleSink>)> {
    let codec = platform.create_encoder(settings, surface).map_err(|e| match e {
        e @ ExportError::CodecInit(_) => e,
        other => ExportError::CodecInit(format!("H.264 encoder: {other}")),
    })?;
    let sink = platform.create_sink(destination).map_err(|e| {
        ExportError::CodecInit(format!("muxer for {}: {e}", destination.display()))
    })?;
    Ok((codec, sink))
}
