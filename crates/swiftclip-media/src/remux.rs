// crates/swiftclip-media/src/remux.rs
//
// FastStreamCopier: trim-only jobs, compressed samples copied straight from
// demuxer to muxer. No decode, no GPU, no encode.
//
// Rules:
//   • Video and audio tracks are copied; any other track is skipped.
//   • The source is positioned at the video sync sample at or before the
//     window start (a copy cannot cut inside a GOP).
//   • Timestamps are re-based on the first video sample, so the output's
//     first video pts is exactly 0. Audio read before that sample is held
//     back until the offset is known, and audio earlier than it is dropped.
//   • Copying stops at the first video sample at or past the window end,
//     but only after at least one video sample has been written.
//   • Progress is the window fraction at the last video sample, rate-limited
//     at the render progress interval, ending at exactly 1.0.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use swiftclip_core::config::RenderConfig;
use swiftclip_core::error::{ExportError, Result};
use swiftclip_core::helpers::time::format_duration_us;
use swiftclip_core::job::ExportJob;
use swiftclip_core::progress::ProgressThrottle;

use crate::platform::{EncodedSample, MediaPlatform, SampleSink, SampleSource, TrackKind};

pub struct FastStreamCopier<'a> {
    platform: &'a dyn MediaPlatform,
    render:   &'a RenderConfig,
}

impl<'a> FastStreamCopier<'a> {
    pub fn new(platform: &'a dyn MediaPlatform, render: &'a RenderConfig) -> Self {
        Self { platform, render }
    }

    pub fn copy(&self, source: &Path, job: &ExportJob, on_progress: &mut dyn FnMut(f32)) -> Result<()> {
        let mut src = self.platform.open_source(source).map_err(|e| match e {
            e @ ExportError::SourceUnreadable { .. } => e,
            other => ExportError::unreadable(source, other),
        })?;

        if !src.tracks().iter().any(|t| t.kind == TrackKind::Video) {
            return Err(ExportError::unreadable(source, "no video track"));
        }

        let dest = &job.destination_path;
        let mut sink = self.platform.create_sink(dest).map_err(|e| {
            ExportError::CodecInit(format!("muxer for {}: {e}", dest.display()))
        })?;

        let result = self.transfer(src.as_mut(), sink.as_mut(), job, on_progress);
        if result.is_err() {
            stop_quietly(sink.as_mut());
        }
        result
    }

    fn transfer(
        &self,
        src:         &mut dyn SampleSource,
        sink:        &mut dyn SampleSink,
        job:         &ExportJob,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<()> {
        let tracks = src.tracks().to_vec();
        let video_track = tracks
            .iter()
            .position(|t| t.kind == TrackKind::Video)
            .ok_or_else(|| ExportError::CodecInit("no video track to copy".into()))?;
        let dest = &job.destination_path;

        // source track index → sink track index
        let mut mapping: HashMap<usize, usize> = HashMap::new();
        for (i, t) in tracks.iter().enumerate() {
            if !matches!(t.kind, TrackKind::Video | TrackKind::Audio) {
                debug!(track = i, codec = %t.codec, "skipping non-AV track");
                continue;
            }
            src.select_track(i);
            mapping.insert(i, sink.add_track(t)?);
        }
        sink.start()?;

        let window = job.window();
        let source_duration = tracks[video_track].duration_us.or_else(|| src.duration_us());
        src.seek(window.start_us)?;

        let mut throttle = ProgressThrottle::new(self.render.progress_interval());
        let mut offset: Option<i64> = None;
        let mut held: Vec<EncodedSample> = Vec::new();
        let mut video_written = 0u64;
        let mut other_written = 0u64;

        while let Some(sample) = src.read_sample()? {
            let Some(&out_track) = mapping.get(&sample.track) else { continue };

            if sample.track == video_track {
                if video_written > 0 && window.is_past_end(sample.pts_us) {
                    break;
                }
                let base = *offset.get_or_insert(sample.pts_us);
                for h in held.drain(..) {
                    if h.pts_us >= base {
                        let t = mapping[&h.track];
                        sink.write_sample(t, &h.rebased(base))?;
                        other_written += 1;
                    }
                }
                let pts = sample.pts_us;
                sink.write_sample(out_track, &sample.rebased(base))?;
                video_written += 1;
                if let Some(v) = throttle.offer(window.fraction(pts, source_duration)) {
                    on_progress(v);
                }
                continue;
            }

            match offset {
                None => held.push(sample),
                Some(base) if sample.pts_us >= base && !window.is_past_end(sample.pts_us) => {
                    sink.write_sample(out_track, &sample.rebased(base))?;
                    other_written += 1;
                }
                Some(_) => {}
            }
        }

        sink.stop()?;
        on_progress(throttle.finish());
        info!(
            dest   = %dest.display(),
            start  = %format_duration_us(window.start_us),
            video  = video_written,
            other  = other_written,
            "stream copy finished"
        );
        Ok(())
    }
}

/// Finalise whatever was written; a failing stop is only logged.
fn stop_quietly(sink: &mut dyn SampleSink) {
    if let Err(e) = sink.stop() {
        warn!(kind = %ExportError::Teardown(e.to_string()).kind(), "muxer stop: {e}");
    }
}
