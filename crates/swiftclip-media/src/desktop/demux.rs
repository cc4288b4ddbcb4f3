// crates/swiftclip-media/src/desktop/demux.rs
//
// FfmpegSource: libavformat input as a SampleSource.
//
// Track list is built once at open. Every stream becomes a track; the kind
// comes from the stream's codec type. Samples of unselected streams are
// skipped while reading. Packet timestamps are converted from the stream time
// base to µs.
//
// Rotation comes from the display-matrix side data on the stream's codec
// parameters (counter-clockwise in the matrix, stored clockwise here). The
// legacy `rotate` metadata tag is read only when no matrix is present. Either
// way the angle is snapped to 0/90/180/270.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::util::rational::Rational;
use tracing::{debug, trace};

use swiftclip_core::error::{ExportError, Result};

use crate::desktop::{ts_to_us, CodecParams};
use crate::helpers::seek::seek_to_us;
use crate::platform::{EncodedSample, SampleFlags, SampleSource, TrackFormat, TrackKind};

pub struct FfmpegSource {
    path:        PathBuf,
    ictx:        ffmpeg::format::context::Input,
    tracks:      Vec<TrackFormat>,
    time_bases:  Vec<Rational>,
    selected:    Vec<bool>,
    duration_us: Option<i64>,
    fresh:       bool,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self> {
        let ictx = input(path).map_err(|e| ExportError::unreadable(path, e))?;

        let mut tracks = Vec::new();
        let mut time_bases = Vec::new();
        for stream in ictx.streams() {
            let tb = stream.time_base();
            let params = stream.parameters();
            let format = unsafe {
                track_format(params.as_ptr(), tb, stream.duration(), stream.metadata().get("rotate"))?
            };
            tracks.push(format);
            time_bases.push(tb);
        }

        let container = ictx.duration();
        let duration_us = (container > 0).then_some(container);
        debug!(
            path   = %path.display(),
            tracks = tracks.len(),
            duration_us,
            "source opened"
        );

        Ok(Self {
            path:     path.to_path_buf(),
            ictx,
            selected: vec![false; tracks.len()],
            tracks,
            time_bases,
            duration_us,
            fresh:    true,
        })
    }
}

/// Maps one stream's codec parameters onto a `TrackFormat`.
///
/// # Safety
/// `raw` must point to valid codec parameters for the duration of the call.
unsafe fn track_format(
    raw: *const ffmpeg::ffi::AVCodecParameters,
    tb: Rational,
    duration_ts: i64,
    rotate_tag: Option<&str>,
) -> Result<TrackFormat> {
    let (codec_type, codec_id, width, height) =
        ((*raw).codec_type, (*raw).codec_id, (*raw).width, (*raw).height);
    let kind = match codec_type {
        ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO => TrackKind::Video,
        ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO => TrackKind::Audio,
        _ => TrackKind::Other,
    };
    let rotation_deg = display_rotation(raw)
        .or_else(|| rotate_tag.and_then(|r| r.trim().parse::<i32>().ok()))
        .map(snap_rotation)
        .unwrap_or(0);

    Ok(TrackFormat {
        kind,
        codec: ffmpeg::codec::Id::from(codec_id).name().to_string(),
        width: width.max(0) as u32,
        height: height.max(0) as u32,
        duration_us: (duration_ts > 0).then(|| ts_to_us(duration_ts, tb)),
        rotation_deg,
        native: Some(CodecParams::copy_from(raw, tb)?.into_native()),
    })
}

/// Clockwise rotation from the display matrix in the coded side data.
///
/// # Safety
/// `raw` must point to valid codec parameters for the duration of the call.
unsafe fn display_rotation(raw: *const ffmpeg::ffi::AVCodecParameters) -> Option<i32> {
    let sd = ffmpeg::ffi::av_packet_side_data_get(
        (*raw).coded_side_data,
        (*raw).nb_coded_side_data,
        ffmpeg::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
    );
    if sd.is_null() || (*sd).data.is_null() || ((*sd).size as usize) < 9 * std::mem::size_of::<i32>() {
        return None;
    }
    let ccw = ffmpeg::ffi::av_display_rotation_get((*sd).data as *const i32);
    // A degenerate matrix yields NaN.
    ccw.is_finite().then(|| (-ccw).round() as i32)
}

/// Nearest multiple of 90 in `0..360`.
fn snap_rotation(deg: i32) -> i32 {
    (deg.rem_euclid(360) + 45) / 90 * 90 % 360
}

impl SampleSource for FfmpegSource {
    fn tracks(&self) -> &[TrackFormat] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) {
        if let Some(s) = self.selected.get_mut(index) {
            *s = true;
        }
    }

    fn seek(&mut self, time_us: i64) -> Result<()> {
        let label = self.path.to_string_lossy();
        seek_to_us(&mut self.ictx, time_us, self.fresh, &label);
        self.fresh = false;
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<EncodedSample>> {
        self.fresh = false;
        while let Some(item) = self.ictx.packets().next() {
            let (stream, packet) = item.map_err(|e| ExportError::step("demux.read", e))?;
            let index = stream.index();
            if !self.selected.get(index).copied().unwrap_or(false) {
                continue;
            }
            let tb = self.time_bases[index];
            let Some(pts) = packet.pts().or(packet.dts()) else {
                trace!(track = index, "packet without timestamps skipped");
                continue;
            };
            return Ok(Some(EncodedSample {
                track:  index,
                pts_us: ts_to_us(pts, tb),
                dts_us: packet.dts().map(|d| ts_to_us(d, tb)),
                flags:  SampleFlags { key_frame: packet.is_key(), ..SampleFlags::default() },
                data:   packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            }));
        }
        Ok(None)
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }
}
