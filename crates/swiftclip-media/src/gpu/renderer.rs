// crates/swiftclip-media/src/gpu/renderer.rs
//
// TextureRenderer: draws the decoded frame into the current surface.
//
// One fixed unit quad (triangle strip), vertex layout [x, y, z, u, v]:
//
//   (-1, 1) uv(0,0) ─── (1, 1) uv(1,0)
//        │                    │
//   (-1,-1) uv(0,1) ─── (1,-1) uv(1,1)
//
// Texture coordinates follow the engine's top-left origin, so with identity
// matrices the frame lands upright. Each vertex's uv is mapped through the
// texture matrix (orientation × crop) and each position through the MVP.
//
// Nothing is retained between draws except the compiled program id.

use swiftclip_core::error::Result;
use swiftclip_core::helpers::geometry::Mat4;

use crate::gpu::{DrawCall, GpuContextManager, GpuDevice, ProgramDesc, ProgramId, RenderTarget, TextureId};

/// Quad vertices, `[x, y, z, u, v]`, in triangle-strip order.
pub const QUAD_VERTICES: [[f32; 5]; 4] = [
    [-1.0, -1.0, 0.0, 0.0, 1.0],
    [ 1.0, -1.0, 0.0, 1.0, 1.0],
    [-1.0,  1.0, 0.0, 0.0, 0.0],
    [ 1.0,  1.0, 0.0, 1.0, 0.0],
];

pub const TRANSFORM_WGSL: &str = r#"
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
    out.pos = u.mvp * vec4<f32>(position, 1.0);
    out.uv = (u.tex * vec4<f32>(uv, 0.0, 1.0)).xy;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(frame_tex, frame_sampler, in.uv);
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRenderer {
    program: ProgramId,
}

impl TextureRenderer {
    pub fn new(device: &mut dyn GpuDevice) -> Result<Self> {
        let program = device.create_program(&ProgramDesc { label: "texture-transform", wgsl: TRANSFORM_WGSL })?;
        Ok(Self { program })
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// Draw `texture` into the current surface.
    pub fn draw_frame(
        &self,
        gpu:        &mut GpuContextManager,
        texture:    TextureId,
        source_st:  &Mat4,
        view_proj:  &Mat4,
    ) -> Result<()> {
        gpu.device().draw_quad(&DrawCall {
            program:    self.program,
            texture,
            target:     RenderTarget::Current,
            tex_matrix: *source_st,
            mvp:        *view_proj,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{InputSurface, RgbaImage, SurfaceFrame};
    use crate::testkit::{quadrant_image, CpuGpu, BLUE, GREEN, RED, WHITE};
    use std::time::Duration;

    fn render_with(st: Mat4) -> RgbaImage {
        let mut gpu = GpuContextManager::with_device(Box::new(CpuGpu::new()));
        let input = InputSurface::new(8, 8);
        let surface = gpu.create_window_surface(&input).unwrap();
        gpu.make_current(surface, surface).unwrap();
        let renderer = gpu.shared_renderer().unwrap();

        let tex = gpu.device().create_external_texture().unwrap();
        let frame = SurfaceFrame { image: quadrant_image(16, 16), pts_us: 0, transform: Mat4::IDENTITY };
        gpu.device().update_tex_image(tex, frame).unwrap();

        renderer.draw_frame(&mut gpu, tex, &st, &Mat4::IDENTITY).unwrap();
        gpu.swap_buffers(surface, 0).unwrap();
        input.next_frame(Duration::ZERO).unwrap().image
    }

    #[test]
    fn identity_draws_frame_upright() {
        let out = render_with(Mat4::IDENTITY);
        assert_eq!(out.pixel(0, 0), RED);
        assert_eq!(out.pixel(7, 0), GREEN);
        assert_eq!(out.pixel(0, 7), BLUE);
        assert_eq!(out.pixel(7, 7), WHITE);
    }

    #[test]
    fn crop_selects_bottom_right_quadrant() {
        let out = render_with(Mat4::crop(0.5, 0.5, 0.5, 0.5));
        assert!(out.data.chunks_exact(4).all(|p| p == WHITE));
    }
}
