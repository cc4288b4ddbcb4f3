// crates/swiftclip-media/src/desktop/encode.rs
//
// FfmpegEncoder: a named hardware H.264 encoder behind the EncoderCodec
// interface, fed from an InputSurface.
//
// Output format:
//   Always H.264, NV12 input, time base 1/1_000_000 so frame and packet
//   timestamps are the µs presentation times the renderer stamped.
//   GLOBAL_HEADER is set so SPS/PPS land in extradata (required by MP4);
//   the first dequeue reports that format as FormatChanged. B-frames are
//   off whatever `low_latency` says, so packets leave in presentation order.
//
// Draining:
//   dequeue_output alternates receive_packet and feeding the next presented
//   frame from the InputSurface until a packet appears or the surface has
//   nothing within `timeout`. After signal_end_of_input the surface is
//   drained without waiting, then the codec gets EOF, then the final packets,
//   then one end-of-stream sample.
//
// Live parameters:
//   Bitrate   written straight into the opened codec context.
//   Sync      the next frame is sent as an I picture.

use std::time::Duration;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;
use tracing::{debug, info};

use swiftclip_core::error::{ExportError, Result};

use crate::desktop::{CodecParams, SendScaler, MICROS};
use crate::helpers::planes::unpack_rgba;
use crate::platform::{
    EncodedSample, EncoderCodec, EncoderOutput, EncoderParam, EncoderSettings, SampleFlags, TrackFormat,
};
use crate::surface::{InputSurface, PresentedFrame};

const ENCODER_PIXEL: Pixel = Pixel::NV12;

pub struct FfmpegEncoder {
    name:         String,
    encoder:      ffmpeg::encoder::video::Encoder,
    scaler:       SendScaler,
    input:        InputSurface,
    width:        u32,
    height:       u32,
    started:      bool,
    format_sent:  bool,
    eos_signaled: bool,
    eof_to_codec: bool,
    eos_sent:     bool,
    force_key:    bool,
}

/// Vendor options, applied only to the encoder that understands them.
fn encoder_options(name: &str, low_latency: bool) -> ffmpeg::Dictionary<'static> {
    let mut opts = ffmpeg::Dictionary::new();
    match name {
        "h264_nvenc" => {
            opts.set("forced-idr", "1");
            if low_latency {
                opts.set("preset", "p1");
                opts.set("tune", "ll");
                opts.set("zerolatency", "1");
            }
        }
        "h264_qsv" if low_latency => {
            opts.set("preset", "veryfast");
            opts.set("async_depth", "1");
        }
        "h264_amf" if low_latency => {
            opts.set("usage", "lowlatency");
            opts.set("quality", "speed");
        }
        "h264_videotoolbox" if low_latency => {
            opts.set("realtime", "1");
            opts.set("prio_speed", "1");
        }
        // Media Foundation falls back to a software MFT unless told otherwise.
        "h264_mf" => opts.set("hw_encoding", "1"),
        _ => {}
    }
    opts
}

impl FfmpegEncoder {
    pub fn open(settings: &EncoderSettings, surface: Option<InputSurface>) -> Result<Self> {
        let (w, h) = (settings.width, settings.height);
        let input = surface
            .filter(|s| s.size() == (w, h))
            .unwrap_or_else(|| InputSurface::new(w, h));
        let fps = settings.frame_rate.max(1);

        let mut tried = Vec::new();
        for name in &settings.candidates {
            let Some(codec) = ffmpeg::encoder::find_by_name(name) else {
                tried.push(format!("{name} (not built)"));
                continue;
            };

            let opened = (|| -> std::result::Result<ffmpeg::encoder::video::Encoder, ffmpeg::Error> {
                let ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
                let mut enc = ctx.encoder().video()?;
                enc.set_width(w);
                enc.set_height(h);
                enc.set_format(ENCODER_PIXEL);
                enc.set_time_base(MICROS);
                enc.set_frame_rate(Some(Rational::new(fps as i32, 1)));
                enc.set_bit_rate(settings.bitrate as usize);
                enc.set_gop(fps * settings.keyframe_interval_secs.max(1));
                // Surface input is presented in order; no reordering either way.
                enc.set_max_b_frames(0);
                enc.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
                enc.open_as_with(codec, encoder_options(name, settings.low_latency))
            })();

            match opened {
                Ok(encoder) => {
                    info!(
                        encoder = %name,
                        size    = %format!("{w}x{h}"),
                        bitrate = settings.bitrate,
                        fps,
                        "hardware encoder opened"
                    );
                    return Ok(Self {
                        name: name.clone(),
                        encoder,
                        scaler: SendScaler::bilinear((Pixel::RGBA, w, h), (ENCODER_PIXEL, w, h))?,
                        input,
                        width: w,
                        height: h,
                        started:      false,
                        format_sent:  false,
                        eos_signaled: false,
                        eof_to_codec: false,
                        eos_sent:     false,
                        force_key:    false,
                    });
                }
                Err(e) => {
                    debug!(encoder = %name, "open failed: {e}");
                    tried.push(format!("{name} ({e})"));
                }
            }
        }

        Err(ExportError::CodecInit(format!("no hardware H.264 encoder [{}]", tried.join(", "))))
    }

    fn output_format(&self) -> Result<TrackFormat> {
        let params = unsafe { CodecParams::from_context(self.encoder.as_ptr(), MICROS)? };
        let mut format = TrackFormat::video("h264", self.width, self.height);
        format.native = Some(params.into_native());
        Ok(format)
    }

    fn submit(&mut self, frame: PresentedFrame) -> Result<()> {
        let (w, h) = (self.width, self.height);
        if (frame.image.width, frame.image.height) != (w, h) {
            return Err(ExportError::step(
                "encoder.submit",
                format!("frame {}x{} on a {w}x{h} encoder", frame.image.width, frame.image.height),
            ));
        }
        let mut rgba = VideoFrame::new(Pixel::RGBA, w, h);
        unpack_rgba(&frame.image.data, &mut rgba, w, h);

        let mut nv12 = VideoFrame::empty();
        self.scaler
            .run(&rgba, &mut nv12)
            .map_err(|e| ExportError::step("encoder.convert", e))?;
        nv12.set_pts(Some(frame.pts_us));
        if std::mem::take(&mut self.force_key) {
            nv12.set_kind(ffmpeg::picture::Type::I);
        }
        self.encoder
            .send_frame(&nv12)
            .map_err(|e| ExportError::step("encoder.send_frame", e))
    }
}

fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == ffmpeg::util::error::EAGAIN)
}

impl EncoderCodec for FfmpegEncoder {
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
            return Ok(EncoderOutput::FormatChanged(self.output_format()?));
        }

        loop {
            let mut packet = Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let pts = packet.pts().or(packet.dts()).unwrap_or(0);
                    return Ok(EncoderOutput::Buffer(EncodedSample {
                        track:  0,
                        pts_us: pts,
                        dts_us: packet.dts(),
                        flags:  SampleFlags { key_frame: packet.is_key(), ..SampleFlags::default() },
                        data:   packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                    }));
                }
                Err(ffmpeg::Error::Eof) => {
                    if self.eos_sent {
                        return Ok(EncoderOutput::TryAgainLater);
                    }
                    self.eos_sent = true;
                    return Ok(EncoderOutput::Buffer(EncodedSample::end_of_stream(0)));
                }
                Err(e) if is_again(&e) => {}
                Err(e) => return Err(ExportError::step("encoder.receive_packet", e)),
            }

            if self.eof_to_codec {
                return Ok(EncoderOutput::TryAgainLater);
            }
            let wait = if self.eos_signaled { Duration::ZERO } else { timeout };
            match self.input.next_frame(wait) {
                Some(frame) => self.submit(frame)?,
                None if self.eos_signaled => {
                    match self.encoder.send_eof() {
                        Ok(()) | Err(ffmpeg::Error::Eof) => {}
                        Err(e) => return Err(ExportError::step("encoder.send_eof", e)),
                    }
                    self.eof_to_codec = true;
                }
                None => return Ok(EncoderOutput::TryAgainLater),
            }
        }
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
            EncoderParam::Bitrate(bps) => unsafe {
                (*self.encoder.as_mut_ptr()).bit_rate = i64::from(bps);
            },
            EncoderParam::RequestSyncFrame => self.force_key = true,
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        debug!(encoder = %self.name, "encoder stopped");
        Ok(())
    }
}
