// crates/swiftclip-media/src/gpu/analyzer.rs
//
// FrameAnalyzer: per-frame motion score for variable frame rate and
// motion-adaptive bitrate.
//
// Algorithm:
//   1. Draw the decoded texture into a small (default 32×32) offscreen target
//      through a pass-through program; the GPU does the downsampling.
//   2. Read the RGBA back.
//   3. motion_score(previous, current): mean |ΔR|+|ΔG|+|ΔB| over 765.
//   4. The current readback becomes the previous one.
//
// Keep rule: the very first frame is always kept (there is nothing to compare
// against); afterwards a frame is kept iff score > keep_threshold.
//
// The previous-frame buffer is owned by the analyzer instance; each
// PipelineSession has its own analyzer, so no locking is involved.

use tracing::trace;

use swiftclip_core::error::Result;
use swiftclip_core::helpers::geometry::Mat4;
use swiftclip_core::motion::{motion_score, MotionPolicy};

use crate::gpu::{DrawCall, GpuContextManager, ProgramDesc, ProgramId, RenderTarget, TargetId, TextureId};

pub const PASSTHROUGH_WGSL: &str = r#"
struct Uniforms {
    mvp: mat4x4<f32>,
    tex: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(0) @binding(1) var frame_tex: texture_2d<f32>;
@group(0) @binding(2) var frame_sampler: sampler;

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.pos = vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(frame_tex, frame_sampler, in.uv);
}
"#;

pub struct FrameAnalyzer {
    size:         u32,
    policy:       MotionPolicy,
    program:      Option<ProgramId>,
    target:       Option<TargetId>,
    previous:     Vec<u8>,
    has_history:  bool,
    motion_score: f32,
    /// Latched by `update_hints`, consumed by the next `analyze`.
    scene_cut:    bool,
}

impl FrameAnalyzer {
    pub fn new(size: u32, policy: MotionPolicy) -> Self {
        Self {
            size: size.max(1),
            policy,
            program: None,
            target: None,
            previous: Vec::new(),
            has_history: false,
            motion_score: 0.0,
            scene_cut: false,
        }
    }

    fn ensure_resources(&mut self, gpu: &mut GpuContextManager) -> Result<(ProgramId, TargetId)> {
        let program = match self.program {
            Some(p) => p,
            None => {
                let p = gpu.device().create_program(&ProgramDesc { label: "analyzer-passthrough", wgsl: PASSTHROUGH_WGSL })?;
                self.program = Some(p);
                p
            }
        };
        let target = match self.target {
            Some(t) => t,
            None => {
                let t = gpu.device().create_offscreen_target(self.size, self.size)?;
                self.target = Some(t);
                t
            }
        };
        Ok((program, target))
    }

    /// Score the texture's current contents. Returns true to keep the frame.
    pub fn analyze(&mut self, gpu: &mut GpuContextManager, texture: TextureId) -> Result<bool> {
        let (program, target) = self.ensure_resources(gpu)?;
        gpu.device().draw_quad(&DrawCall {
            program,
            texture,
            target:     RenderTarget::Offscreen(target),
            tex_matrix: Mat4::IDENTITY,
            mvp:        Mat4::IDENTITY,
        })?;
        let current = gpu.device().read_pixels(target)?;

        let first = !self.has_history;
        let mut score = if first { 1.0 } else { motion_score(&self.previous, &current) };
        if std::mem::take(&mut self.scene_cut) {
            score = 1.0;
        }

        self.previous = current;
        self.has_history = true;
        self.motion_score = score;
        trace!(score, first, "frame analysed");
        Ok(first || self.policy.keeps(score))
    }

    /// External scene-cut signal; overrides the pixel difference for the next call.
    pub fn update_hints(&mut self, is_scene_change: bool) {
        if is_scene_change {
            self.motion_score = 1.0;
            self.scene_cut = true;
        }
    }

    pub fn motion_score(&self) -> f32 {
        self.motion_score
    }

    /// Free the offscreen target and forget history.
    pub fn release(&mut self, gpu: &mut GpuContextManager) {
        if let Some(t) = self.target.take() {
            gpu.device().delete_offscreen_target(t);
        }
        self.program = None;
        self.previous.clear();
        self.has_history = false;
        self.scene_cut = false;
    }
}
