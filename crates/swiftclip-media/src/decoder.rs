// crates/swiftclip-media/src/decoder.rs
//
// HardwareDecoder: a platform video decoder bound to one source's first video
// track and to a FrameSurface.
//
// Stepping model:
//   process() = one feed step + one drain step, neither blocking.
//     feed   offer the pending sample (or end-of-input once the source is
//            exhausted). A refused sample stays pending for the next call.
//     drain  take at most one decoded buffer and decide its fate:
//              before window start  → held as pre-roll, never rendered unless
//                                     the stream ends with nothing rendered
//              in window            → rendered to the surface
//              at/after window end  → dropped, decoding is over
//
// The decoder never holds more than one pre-roll buffer; a newer pre-roll
// frame releases the older one unrendered.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use swiftclip_core::error::{ExportError, Result};
use swiftclip_core::helpers::time::{format_duration_us, TrimWindow};

use crate::platform::{DecodedBuffer, DecoderCodec, EncodedSample, MediaPlatform, SampleSource, TrackFormat, TrackKind};
use crate::surface::FrameSurface;

pub struct HardwareDecoder {
    path:             PathBuf,
    source:           Box<dyn SampleSource>,
    codec:            Box<dyn DecoderCodec>,
    format:           TrackFormat,
    surface:          FrameSurface,
    window:           TrimWindow,
    pending:          Option<EncodedSample>,
    preroll:          Option<DecodedBuffer>,
    source_exhausted: bool,
    input_done:       bool,
    output_done:      bool,
    rendered_any:     bool,
    duration_us:      Option<i64>,
    last_pts_us:      i64,
    released:         bool,
}

impl HardwareDecoder {
    /// Open `path`, select its first video track and start a hardware decoder
    /// rendering into `surface`.
    pub fn init(platform: &dyn MediaPlatform, path: &Path, surface: FrameSurface) -> Result<Self> {
        let mut source = platform.open_source(path).map_err(|e| match e {
            e @ ExportError::SourceUnreadable { .. } => e,
            other => ExportError::unreadable(path, other),
        })?;

        let track = source
            .tracks()
            .iter()
            .position(|t| t.kind == TrackKind::Video)
            .ok_or_else(|| ExportError::unreadable(path, "no video track"))?;
        let format = source.tracks()[track].clone();
        source.select_track(track);
        let duration_us = format.duration_us.or_else(|| source.duration_us());

        let codec = platform.create_decoder(&format, surface.clone()).map_err(|e| match e {
            e @ ExportError::CodecInit(_) => e,
            other => ExportError::CodecInit(format!("{} decoder: {other}", format.codec)),
        })?;

        info!(
            path     = %path.display(),
            codec    = %format.codec,
            size     = %format!("{}x{}", format.width, format.height),
            rotation = format.rotation_deg,
            duration = %duration_us.map(format_duration_us).unwrap_or_else(|| "?".into()),
            "decoder ready"
        );

        Ok(Self {
            path: path.to_path_buf(),
            source,
            codec,
            format,
            surface,
            window:           TrimWindow::FULL,
            pending:          None,
            preroll:          None,
            source_exhausted: false,
            input_done:       false,
            output_done:      false,
            rendered_any:     false,
            duration_us,
            last_pts_us:      0,
            released:         false,
        })
    }

    /// One non-blocking feed step plus one non-blocking drain step.
    /// Returns true iff a frame was handed to the surface.
    pub fn process(&mut self) -> Result<bool> {
        if self.output_done {
            return Ok(false);
        }
        self.feed()?;
        self.drain()
    }

    fn feed(&mut self) -> Result<()> {
        if self.input_done {
            return Ok(());
        }
        if self.pending.is_none() && !self.source_exhausted {
            match self.source.read_sample()? {
                Some(sample) => self.pending = Some(sample),
                None         => self.source_exhausted = true,
            }
        }
        if let Some(sample) = self.pending.take() {
            if !self.codec.queue_input(&sample)? {
                self.pending = Some(sample);
            }
        } else if self.source_exhausted && self.codec.queue_end_of_input()? {
            self.input_done = true;
            debug!(path = %self.path.display(), "decoder input exhausted");
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<bool> {
        let Some(buf) = self.codec.dequeue_output()? else {
            return Ok(false);
        };

        if !buf.has_data {
            self.codec.release_output(buf, false)?;
            if buf.end_of_stream {
                return self.finish();
            }
            return Ok(false);
        }

        self.last_pts_us = buf.pts_us;

        if buf.pts_us < self.window.start_us {
            if let Some(older) = self.preroll.replace(buf) {
                self.codec.release_output(older, false)?;
            }
            if buf.end_of_stream {
                return self.finish();
            }
            return Ok(false);
        }

        if self.rendered_any && self.window.is_past_end(buf.pts_us) {
            self.codec.release_output(buf, false)?;
            debug!(pts = buf.pts_us, "decoder reached window end");
            return self.finish();
        }

        if let Some(older) = self.preroll.take() {
            self.codec.release_output(older, false)?;
        }
        self.codec.release_output(buf, true)?;
        self.rendered_any = true;
        if buf.end_of_stream {
            self.output_done = true;
        }
        Ok(true)
    }

    /// End of output. A window that starts past the last frame still yields
    /// that last frame.
    fn finish(&mut self) -> Result<bool> {
        self.output_done = true;
        match self.preroll.take() {
            Some(held) if !self.rendered_any => {
                debug!(pts = held.pts_us, "window past end of stream, rendering last frame");
                self.codec.release_output(held, true)?;
                self.last_pts_us = held.pts_us;
                self.rendered_any = true;
                Ok(true)
            }
            Some(held) => {
                self.codec.release_output(held, false)?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Restrict output to `window` and position the source at its start.
    pub fn start_window(&mut self, window: TrimWindow) -> Result<()> {
        self.window = window;
        self.seek_to(window.start_us)
    }

    /// Seek to the sync sample at or before `time_us` and drop everything in
    /// flight.
    pub fn seek_to(&mut self, time_us: i64) -> Result<()> {
        self.source.seek(time_us)?;
        self.codec.flush()?;
        self.surface.discard();
        self.pending = None;
        self.preroll = None;
        self.source_exhausted = false;
        self.input_done = false;
        self.output_done = false;
        self.rendered_any = false;
        self.last_pts_us = time_us;
        debug!(time_us, "decoder seeked");
        Ok(())
    }

    /// Rebind to another surface for reuse by the next job. On `Err` the
    /// caller discards this decoder and builds a fresh one.
    pub fn update_output_surface(&mut self, surface: FrameSurface) -> Result<()> {
        self.codec.set_output_surface(surface.clone())?;
        self.surface.discard();
        self.surface = surface;
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.output_done
    }

    pub fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    pub fn last_pts_us(&self) -> i64 {
        self.last_pts_us
    }

    pub fn format(&self) -> &TrackFormat {
        &self.format
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn window(&self) -> TrimWindow {
        self.window
    }

    /// Best-effort stop. Errors are logged, never returned.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.preroll = None;
        if let Err(e) = self.codec.stop() {
            let err = ExportError::Teardown(e.to_string());
            warn!(kind = %err.kind(), path = %self.path.display(), "decoder stop: {err}");
        }
        self.surface.discard();
        debug!(path = %self.path.display(), "decoder released");
    }
}

impl Drop for HardwareDecoder {
    fn drop(&mut self) {
        self.release();
    }
}
