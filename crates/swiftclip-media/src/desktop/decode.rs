// crates/swiftclip-media/src/desktop/decode.rs
//
// FfmpegDecoder: a named hardware decoder behind the DecoderCodec buffer
// queue interface.
//
// Mapping from send/receive to input/output buffers:
//   queue_input      send_packet; EAGAIN → "no input slot now"
//   dequeue_output   receive_frame; the frame is parked under a buffer index
//                    until release_output decides whether it is rendered
//   release_output   render = convert to RGBA and queue on the FrameSurface
//
// Packets are sent with µs timestamps and the decoder passes them through, so
// frame timestamps come back in µs as well.

use std::collections::HashMap;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::Packet;
use tracing::{debug, info};

use swiftclip_core::error::{ExportError, Result};
use swiftclip_core::helpers::geometry::Mat4;

use crate::desktop::{CodecParams, SendScaler};
use crate::helpers::planes::pack_rgba;
use crate::platform::{DecodedBuffer, DecoderCodec, EncodedSample, TrackFormat};
use crate::surface::{FrameSurface, RgbaImage, SurfaceFrame};

pub struct FfmpegDecoder {
    name:        String,
    decoder:     ffmpeg::decoder::Video,
    surface:     FrameSurface,
    orientation: Mat4,
    scaler:      Option<(SendScaler, (Pixel, u32, u32))>,
    parked:      HashMap<usize, VideoFrame>,
    next_index:  usize,
    eos_out:     bool,
}

impl FfmpegDecoder {
    /// Open the first candidate that accepts this stream's parameters.
    pub fn open(format: &TrackFormat, candidates: &[String], surface: FrameSurface) -> Result<Self> {
        let params = CodecParams::of(format)?;
        let mut tried = Vec::new();

        for name in candidates {
            let Some(codec) = ffmpeg::decoder::find_by_name(name) else {
                tried.push(format!("{name} (not built)"));
                continue;
            };
            let mut ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
            let ret = unsafe { ffmpeg::ffi::avcodec_parameters_to_context(ctx.as_mut_ptr(), params.as_ptr()) };
            if ret < 0 {
                tried.push(format!("{name} (parameters rejected: {ret})"));
                continue;
            }
            match ctx.decoder().open_as_with(codec, ffmpeg::Dictionary::new()).and_then(|o| o.video()) {
                Ok(decoder) => {
                    info!(decoder = %name, codec = %format.codec, "hardware decoder opened");
                    return Ok(Self {
                        name:        name.clone(),
                        decoder,
                        surface,
                        orientation: Mat4::orientation(format.rotation_deg),
                        scaler:      None,
                        parked:      HashMap::new(),
                        next_index:  0,
                        eos_out:     false,
                    });
                }
                Err(e) => {
                    debug!(decoder = %name, "open failed: {e}");
                    tried.push(format!("{name} ({e})"));
                }
            }
        }

        Err(ExportError::CodecInit(format!(
            "no hardware decoder for {} [{}]", format.codec, tried.join(", ")
        )))
    }

    fn to_rgba(&mut self, frame: &VideoFrame) -> Result<RgbaImage> {
        let (w, h) = (frame.width(), frame.height());
        let key = (frame.format(), w, h);
        let stale = self.scaler.as_ref().map_or(true, |(_, k)| *k != key);
        if stale {
            let scaler = SendScaler::bilinear(key, (Pixel::RGBA, w, h))?;
            self.scaler = Some((scaler, key));
        }
        let Some((scaler, _)) = self.scaler.as_mut() else {
            return Err(ExportError::step("decoder.convert", "no scaler"));
        };
        let mut rgba = VideoFrame::empty();
        scaler.run(frame, &mut rgba).map_err(|e| ExportError::step("decoder.convert", e))?;
        Ok(RgbaImage { width: w, height: h, data: pack_rgba(&rgba, w, h) })
    }
}

fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == ffmpeg::util::error::EAGAIN)
}

impl DecoderCodec for FfmpegDecoder {
    fn queue_input(&mut self, sample: &EncodedSample) -> Result<bool> {
        let mut packet = Packet::copy(&sample.data);
        packet.set_pts(Some(sample.pts_us));
        packet.set_dts(sample.dts_us);
        if sample.flags.key_frame {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        match self.decoder.send_packet(&packet) {
            Ok(()) => Ok(true),
            Err(e) if is_again(&e) => Ok(false),
            Err(e) => Err(ExportError::step("decoder.queue_input", e)),
        }
    }

    fn queue_end_of_input(&mut self) -> Result<bool> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(true),
            Err(e) if is_again(&e) => Ok(false),
            Err(e) => Err(ExportError::step("decoder.queue_end_of_input", e)),
        }
    }

    fn dequeue_output(&mut self) -> Result<Option<DecodedBuffer>> {
        let mut frame = VideoFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                let index = self.next_index;
                self.next_index += 1;
                let pts_us = frame.timestamp().or(frame.pts()).unwrap_or(0);
                self.parked.insert(index, frame);
                Ok(Some(DecodedBuffer { index, pts_us, has_data: true, end_of_stream: false }))
            }
            Err(e) if is_again(&e) => Ok(None),
            Err(ffmpeg::Error::Eof) if !self.eos_out => {
                self.eos_out = true;
                let index = self.next_index;
                self.next_index += 1;
                Ok(Some(DecodedBuffer { index, pts_us: 0, has_data: false, end_of_stream: true }))
            }
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(ExportError::step("decoder.dequeue_output", e)),
        }
    }

    fn release_output(&mut self, buffer: DecodedBuffer, render: bool) -> Result<()> {
        let Some(frame) = self.parked.remove(&buffer.index) else {
            return Ok(());
        };
        if render {
            let image = self.to_rgba(&frame)?;
            self.surface.queue(SurfaceFrame {
                image,
                pts_us:    buffer.pts_us,
                transform: self.orientation,
            });
        }
        Ok(())
    }

    fn set_output_surface(&mut self, surface: FrameSurface) -> Result<()> {
        self.surface = surface;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.decoder.flush();
        self.parked.clear();
        self.eos_out = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.parked.clear();
        debug!(decoder = %self.name, "decoder stopped");
        Ok(())
    }
}
