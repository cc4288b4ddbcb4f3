// crates/swiftclip-media/src/desktop/mux.rs
//
// FfmpegSink: MP4 output as a SampleSink.
//
// Tracks are created from the CodecParams carried by each TrackFormat (a
// demuxed stream for stream copy, the opened encoder for the GPU path). The
// codec tag is cleared so the muxer picks the right one for the container.
//
// Lifecycle: add_track* → start (header) → write_sample* → stop (trailer).
// Writing before start or after stop is a MuxerOrdering error. If the sink is
// dropped while started, the trailer is still written so the file is
// playable.

use std::path::{Path, PathBuf};
use std::ptr;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::output;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;
use tracing::{debug, warn};

use swiftclip_core::error::{ExportError, Result};

use crate::desktop::{us_to_ts, CodecParams, MICROS};
use crate::platform::{EncodedSample, SampleSink, TrackFormat};

pub struct FfmpegSink {
    path:       PathBuf,
    octx:       ffmpeg::format::context::Output,
    tracks:     usize,
    time_bases: Vec<Rational>,
    started:    bool,
    stopped:    bool,
    written:    u64,
}

impl FfmpegSink {
    pub fn create(path: &Path) -> Result<Self> {
        let octx = output(path)
            .map_err(|e| ExportError::CodecInit(format!("could not open output '{}': {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            octx,
            tracks:     0,
            time_bases: Vec::new(),
            started:    false,
            stopped:    false,
            written:    0,
        })
    }

    fn io_error(&self, what: &str, e: ffmpeg::Error) -> ExportError {
        ExportError::Io(std::io::Error::other(format!("{what} '{}': {e}", self.path.display())))
    }
}

impl SampleSink for FfmpegSink {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        if self.started {
            return Err(ExportError::MuxerOrdering(format!(
                "track '{}' added after the muxer started", format.codec
            )));
        }
        let params = CodecParams::of(format)?;

        // Stream::codec() is not exposed, so the stream is created and filled
        // through ffi, the same way encoder parameters are copied in.
        unsafe {
            let st = ffmpeg::ffi::avformat_new_stream(self.octx.as_mut_ptr(), ptr::null());
            if st.is_null() {
                return Err(ExportError::CodecInit("avformat_new_stream failed".into()));
            }
            let ret = ffmpeg::ffi::avcodec_parameters_copy((*st).codecpar, params.as_ptr());
            if ret < 0 {
                return Err(ExportError::CodecInit(format!("avcodec_parameters_copy failed: {ret}")));
            }
            (*(*st).codecpar).codec_tag = 0;
            (*st).time_base = params.time_base().into();
        }

        let index = self.tracks;
        self.tracks += 1;
        debug!(path = %self.path.display(), track = index, codec = %format.codec, "muxer track added");
        Ok(index)
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        if self.tracks == 0 {
            return Err(ExportError::MuxerOrdering("muxer started with no tracks".into()));
        }
        self.octx.write_header().map_err(|e| self.io_error("write header", e))?;
        // The muxer may have replaced our stream time bases while writing the header.
        self.time_bases = (0..self.tracks)
            .map(|i| self.octx.stream(i).map_or(MICROS, |s| s.time_base()))
            .collect();
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<()> {
        if !self.started || self.stopped {
            return Err(ExportError::MuxerOrdering(format!(
                "sample for track {track} written outside start/stop"
            )));
        }
        let tb = *self.time_bases.get(track).ok_or_else(|| {
            ExportError::MuxerOrdering(format!("sample for unknown track {track}"))
        })?;

        let mut packet = Packet::copy(&sample.data);
        let pts = us_to_ts(sample.pts_us, tb);
        packet.set_pts(Some(pts));
        packet.set_dts(Some(sample.dts_us.map_or(pts, |d| us_to_ts(d, tb))));
        packet.set_stream(track);
        if sample.flags.key_frame {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        packet
            .write_interleaved(&mut self.octx)
            .map_err(|e| self.io_error("write packet", e))?;
        self.written += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        if !self.started {
            return Ok(());
        }
        self.octx.write_trailer().map_err(|e| self.io_error("write trailer", e))?;
        debug!(path = %self.path.display(), packets = self.written, "container finalised");
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.started && !self.stopped {
            if let Err(e) = self.stop() {
                let err = ExportError::Teardown(e.to_string());
                warn!(kind = %err.kind(), "muxer finalise on drop: {err}");
            }
        }
    }
}
