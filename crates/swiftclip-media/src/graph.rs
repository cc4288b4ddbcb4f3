// crates/swiftclip-media/src/graph.rs
//
// RenderGraph: one GPU-path job, decoder → texture → analyzer/renderer →
// encoder input surface.
//
// Lifecycle (GraphPhase):
//   Setup     acquire a pooled encoder, bind a window surface to its input
//             surface and make it current, fetch the shared renderer, create
//             the texture + frame surface, adopt or build the decoder.
//   Running   the frame loop below.
//   Draining  decoder finished, encoder flushing.
//   Done      container finalised.
//
// Frame loop (LoopState), one step per iteration:
//
//   Draining ──not flushed──▶ Feeding ──frame──▶ WaitingForFrame ──▶ Rendering
//      ▲  └──flushed──▶ Done    │ no frame, decoder live (yield)        │
//      └────────────────────────┴───────────────────────────────────────┘
//   Feeding ──no frame, decoder done──▶ FlushingEncoder (EOS signalled once)
//   FlushingEncoder ──flushed──▶ Done
//
// `next_state` is the pure transition function; the loop only performs the
// I/O a state asks for and feeds the outcome back in as a LoopEvent.
//
// Dropped frames are never submitted, so the previous frame's duration
// extends to the next kept one (variable frame rate, hold-last-frame).

use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, info, trace, warn};

use swiftclip_core::config::EngineConfig;
use swiftclip_core::error::{ExportError, Result};
use swiftclip_core::helpers::geometry::Mat4;
use swiftclip_core::helpers::time::{format_duration_us, ms_to_us, TrimWindow};
use swiftclip_core::job::ExportJob;
use swiftclip_core::motion::MotionPolicy;
use swiftclip_core::progress::ProgressThrottle;

use crate::clock::FrameClock;
use crate::decoder::HardwareDecoder;
use crate::encoder::HardwareEncoder;
use crate::gpu::{FrameAnalyzer, GpuContextManager, SurfaceId, TextureId, TextureRenderer};
use crate::platform::MediaPlatform;
use crate::pool::EncoderPool;
use crate::surface::FrameSurface;

// ── Frame loop state machine ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Feeding,
    Draining,
    WaitingForFrame,
    Rendering,
    FlushingEncoder,
    Done,
}

/// Outcome of the I/O a state performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Drained { flushed: bool },
    Decoded { frame: bool, decoder_done: bool },
    FrameWaited,
    Rendered,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    None,
    SignalEndOfStream,
    Yield,
}

pub fn next_state(state: LoopState, event: LoopEvent) -> (LoopState, LoopAction) {
    use LoopAction as A;
    use LoopEvent as E;
    use LoopState as S;

    match (state, event) {
        (S::Done, _) => (S::Done, A::None),

        (S::Draining, E::Drained { flushed: true })  => (S::Done, A::None),
        (S::Draining, E::Drained { flushed: false }) => (S::Feeding, A::None),

        (S::Feeding, E::Decoded { frame: true, .. })                      => (S::WaitingForFrame, A::None),
        (S::Feeding, E::Decoded { frame: false, decoder_done: true })     => (S::FlushingEncoder, A::SignalEndOfStream),
        (S::Feeding, E::Decoded { frame: false, decoder_done: false })    => (S::Draining, A::Yield),

        (S::WaitingForFrame, E::FrameWaited) => (S::Rendering, A::None),
        (S::Rendering, E::Rendered)          => (S::Draining, A::None),

        (S::FlushingEncoder, E::Drained { flushed: true })  => (S::Done, A::None),
        (S::FlushingEncoder, E::Drained { flushed: false }) => (S::FlushingEncoder, A::None),

        (s, _) => (s, A::None),
    }
}

/// Where the loop resumes after a recoverable step error.
fn recover_state(state: LoopState) -> LoopState {
    match state {
        LoopState::FlushingEncoder => LoopState::FlushingEncoder,
        LoopState::Draining        => LoopState::Feeding,
        LoopState::Done            => LoopState::Done,
        _                          => LoopState::Draining,
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphPhase {
    Setup,
    Running,
    Draining,
    Done,
}

/// How the session's decoder came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderOrigin {
    Fresh,
    /// The previous job's decoder, rebound to this session's surface.
    Reused,
    /// A previous decoder was offered but could not be rebound.
    Recreated,
}

/// Live per-job state. Every resource is optional so teardown can run from
/// any point of a failed setup.
struct PipelineSession {
    destination:   PathBuf,
    window:        TrimWindow,
    encoder:       Option<HardwareEncoder>,
    decoder:       Option<HardwareDecoder>,
    origin:        DecoderOrigin,
    surface:       Option<SurfaceId>,
    texture:       Option<TextureId>,
    frame_surface: FrameSurface,
    renderer:      Option<TextureRenderer>,
    analyzer:      FrameAnalyzer,
    crop:          Mat4,
    orientation:   Mat4,
    has_image:     bool,
    last_pts_us:   Option<i64>,
}

pub struct RenderGraph<'a> {
    gpu:     &'a mut GpuContextManager,
    pool:    &'a EncoderPool,
    config:  &'a EngineConfig,
    policy:  MotionPolicy,
    phase:   GraphPhase,
    session: PipelineSession,
}

impl<'a> RenderGraph<'a> {
    /// Build every per-job resource. On failure, whatever was acquired is
    /// released again (the encoder goes back to the pool).
    #[allow(clippy::too_many_arguments)]
    pub fn setup(
        gpu:       &'a mut GpuContextManager,
        pool:      &'a EncoderPool,
        config:    &'a EngineConfig,
        platform:  &dyn MediaPlatform,
        source:    &Path,
        job:       &ExportJob,
        reusable:  Option<HardwareDecoder>,
    ) -> Result<Self> {
        let c = job.crop_rect;
        let mut graph = Self {
            gpu,
            pool,
            config,
            policy: config.motion_policy(),
            phase:  GraphPhase::Setup,
            session: PipelineSession {
                destination:   job.destination_path.clone(),
                window:        job.window(),
                encoder:       None,
                decoder:       None,
                origin:        DecoderOrigin::Fresh,
                surface:       None,
                texture:       None,
                frame_surface: FrameSurface::new(),
                renderer:      None,
                analyzer:      FrameAnalyzer::new(config.analyzer.sample_size, config.motion_policy()),
                crop:          Mat4::crop(c.x, c.y, c.w, c.h),
                orientation:   Mat4::IDENTITY,
                has_image:     false,
                last_pts_us:   None,
            },
        };
        match graph.build(platform, source, job, reusable) {
            Ok(()) => Ok(graph),
            Err(e) => {
                graph.teardown(false);
                Err(e)
            }
        }
    }

    fn build(
        &mut self,
        platform: &dyn MediaPlatform,
        source:   &Path,
        job:      &ExportJob,
        reusable: Option<HardwareDecoder>,
    ) -> Result<()> {
        let s = &mut self.session;

        let encoder = self.pool.acquire(&job.destination_path, job.target_width, job.target_height)?;
        let input = encoder.input_surface();
        s.encoder = Some(encoder);

        let surface = self.gpu.create_window_surface(&input)?;
        s.surface = Some(surface);
        self.gpu.make_current(surface, surface)?;

        s.renderer = Some(self.gpu.shared_renderer()?);
        s.texture = Some(self.gpu.device().create_external_texture()?);

        let (mut decoder, origin) = match reusable {
            Some(mut d) if d.path() == source => match d.update_output_surface(s.frame_surface.clone()) {
                Ok(()) => (d, DecoderOrigin::Reused),
                Err(e) => {
                    warn!("decoder rebind failed, creating a new one: {e}");
                    d.release();
                    (HardwareDecoder::init(platform, source, s.frame_surface.clone())?, DecoderOrigin::Recreated)
                }
            },
            Some(mut d) => {
                d.release();
                (HardwareDecoder::init(platform, source, s.frame_surface.clone())?, DecoderOrigin::Recreated)
            }
            None => (HardwareDecoder::init(platform, source, s.frame_surface.clone())?, DecoderOrigin::Fresh),
        };
        decoder.start_window(s.window)?;
        s.decoder = Some(decoder);
        s.origin = origin;

        if let Some(enc) = s.encoder.as_mut() {
            enc.start()?;
        }

        info!(
            dest   = %s.destination.display(),
            size   = %format!("{}x{}", job.target_width, job.target_height),
            start  = %format_duration_us(s.window.start_us),
            origin = ?origin,
            "render graph ready"
        );
        Ok(())
    }

    pub fn phase(&self) -> GraphPhase {
        self.phase
    }

    pub fn decoder_origin(&self) -> DecoderOrigin {
        self.session.origin
    }

    /// Run the frame loop to completion. Progress is rate-limited and ends
    /// with exactly 1.0.
    pub fn execute(&mut self, on_progress: &mut dyn FnMut(f32)) -> Result<()> {
        let config: &'a EngineConfig = self.config;
        let render = &config.render;
        let mut throttle = ProgressThrottle::new(render.progress_interval());
        let mut clock = FrameClock::start();
        let mut state = LoopState::Draining;
        let mut step_errors = 0u32;
        self.phase = GraphPhase::Running;

        while state != LoopState::Done {
            match self.step(state, &mut clock) {
                Ok(event) => {
                    if matches!(event, LoopEvent::Decoded { frame: true, .. } | LoopEvent::Rendered) {
                        step_errors = 0;
                    }
                    let (next, action) = next_state(state, event);
                    match action {
                        LoopAction::SignalEndOfStream => {
                            self.encoder()?.signal_end_of_stream()?;
                            self.phase = GraphPhase::Draining;
                        }
                        LoopAction::Yield => thread::sleep(render.idle_yield()),
                        LoopAction::None => {}
                    }
                    state = next;
                }
                Err(e) if e.is_recoverable() => {
                    step_errors += 1;
                    warn!(?state, errors = step_errors, "frame loop step failed: {e}");
                    if step_errors > render.max_consecutive_step_errors {
                        return Err(e);
                    }
                    state = recover_state(state);
                }
                Err(e) => return Err(e),
            }

            if let Some(v) = throttle.offer(self.fraction()) {
                on_progress(v);
            }
        }

        self.phase = GraphPhase::Done;
        on_progress(throttle.finish());
        info!(
            dest     = %self.session.destination.display(),
            decoded  = clock.decoded(),
            rendered = clock.rendered(),
            dropped  = clock.dropped(),
            fps      = format!("{:.1}", clock.fps()),
            "render graph finished"
        );
        Ok(())
    }

    fn step(&mut self, state: LoopState, clock: &mut FrameClock) -> Result<LoopEvent> {
        match state {
            LoopState::Draining | LoopState::FlushingEncoder => {
                let flushed = self.encoder()?.drain()?;
                Ok(LoopEvent::Drained { flushed })
            }
            LoopState::Feeding => {
                let decoder = self.decoder()?;
                let frame = decoder.process()?;
                let decoder_done = decoder.is_done();
                if frame {
                    clock.tick_decoded();
                }
                Ok(LoopEvent::Decoded { frame, decoder_done })
            }
            LoopState::WaitingForFrame => {
                let config: &'a EngineConfig = self.config;
                let render = &config.render;
                if !self.session.frame_surface.wait_frame_available(render.frame_wait_timeout(), render.frame_wait_poll()) {
                    warn!(timeout_ms = render.frame_wait_timeout_ms, "frame wait timed out, rendering anyway");
                }
                Ok(LoopEvent::FrameWaited)
            }
            LoopState::Rendering => {
                self.render_frame(clock)?;
                Ok(LoopEvent::Rendered)
            }
            LoopState::Done => Ok(LoopEvent::Drained { flushed: true }),
        }
    }

    fn render_frame(&mut self, clock: &mut FrameClock) -> Result<()> {
        let (texture, surface, renderer) = match (self.session.texture, self.session.surface, self.session.renderer) {
            (Some(t), Some(s), Some(r)) => (t, s, r),
            _ => return Err(ExportError::step("graph.render", "session not set up")),
        };

        let latched = self.session.frame_surface.latch();
        let pts_us = match latched {
            Some(frame) => {
                let pts = frame.pts_us;
                self.session.orientation = self.gpu.device().update_tex_image(texture, frame)?;
                self.session.has_image = true;
                pts
            }
            None if self.session.has_image => self.decoder()?.last_pts_us(),
            None => {
                debug!("no frame latched yet, nothing to draw");
                return Ok(());
            }
        };

        let gap_us = ms_to_us(self.config.analyzer.scene_gap_ms as i64);
        if let Some(prev) = self.session.last_pts_us.replace(pts_us) {
            if pts_us - prev > gap_us {
                debug!(gap_ms = (pts_us - prev) / 1_000, "timestamp gap, treating as scene change");
                self.session.analyzer.update_hints(true);
            }
        }

        if !self.session.analyzer.analyze(self.gpu, texture)? {
            clock.tick_dropped();
            trace!(pts_us, score = self.session.analyzer.motion_score(), "frame dropped");
            return Ok(());
        }

        let decision = self.policy.decide(self.session.analyzer.motion_score());
        let encoder = self.encoder()?;
        encoder.set_bitrate(decision.bitrate)?;
        if decision.force_keyframe {
            encoder.request_sync_frame()?;
        }

        let st = self.session.orientation * self.session.crop;
        renderer.draw_frame(self.gpu, texture, &st, &Mat4::IDENTITY)?;
        self.gpu.swap_buffers(surface, self.session.window.rebase(pts_us))?;
        clock.tick_rendered();
        Ok(())
    }

    /// Decode position over the window length, in [0, 1].
    fn fraction(&self) -> f32 {
        match &self.session.decoder {
            Some(d) => self.session.window.fraction(d.last_pts_us(), d.duration_us()),
            None => 0.0,
        }
    }

    fn encoder(&mut self) -> Result<&mut HardwareEncoder> {
        self.session.encoder
            .as_mut()
            .ok_or_else(|| ExportError::step("graph.encoder", "no encoder bound"))
    }

    fn decoder(&mut self) -> Result<&mut HardwareDecoder> {
        self.session.decoder
            .as_mut()
            .ok_or_else(|| ExportError::step("graph.decoder", "no decoder bound"))
    }

    /// Tear the session down. With `keep_decoder` the decoder is handed back
    /// for the next job instead of being destroyed. The encoder always goes
    /// back to the pool.
    pub fn release(mut self, keep_decoder: bool) -> Option<HardwareDecoder> {
        self.teardown(keep_decoder)
    }

    fn teardown(&mut self, keep_decoder: bool) -> Option<HardwareDecoder> {
        let s = &mut self.session;
        self.gpu.make_nothing_current();
        if let Some(surface) = s.surface.take() {
            self.gpu.destroy_surface(surface);
        }
        if let Some(texture) = s.texture.take() {
            self.gpu.device().delete_texture(texture);
        }
        s.analyzer.release(self.gpu);
        s.frame_surface.discard();
        if let Some(encoder) = s.encoder.take() {
            self.pool.release(encoder);
        }
        match s.decoder.take() {
            Some(d) if keep_decoder => Some(d),
            Some(mut d) => {
                d.release();
                None
            }
            None => None,
        }
    }
}

impl Drop for RenderGraph<'_> {
    fn drop(&mut self) {
        self.teardown(false);
    }
}
