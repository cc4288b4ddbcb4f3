// crates/swiftclip-media/src/gpu/mod.rs
//
// GPU side of the pipeline.
//
//   context.rs      GpuContextManager: the one process-wide device/context.
//   renderer.rs     TextureRenderer: textured quad through a texture matrix.
//   analyzer.rs     FrameAnalyzer: 32×32 downsample + motion score.
//   wgpu_device.rs  the wgpu implementation of `GpuDevice`.
//
// `GpuDevice` is a small handle-based API in the style of a GL context: the
// engine asks for surfaces, textures, programs and offscreen targets and gets
// opaque ids back. Exactly one surface is "current"; `RenderTarget::Current`
// draws into it.

pub mod analyzer;
pub mod context;
pub mod renderer;
pub mod wgpu_device;

pub use analyzer::FrameAnalyzer;
pub use context::GpuContextManager;
pub use renderer::TextureRenderer;

use swiftclip_core::error::Result;
use swiftclip_core::helpers::geometry::Mat4;

use crate::surface::{InputSurface, SurfaceFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    /// The draw surface last made current.
    Current,
    Offscreen(TargetId),
}

/// Shader program source. Vertex entry `vs_main`, fragment entry `fs_main`.
#[derive(Debug, Clone, Copy)]
pub struct ProgramDesc {
    pub label: &'static str,
    pub wgsl:  &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    pub program:    ProgramId,
    pub texture:    TextureId,
    pub target:     RenderTarget,
    /// Maps quad texture coordinates into the source texture.
    pub tex_matrix: Mat4,
    /// Maps quad positions into clip space.
    pub mvp:        Mat4,
}

pub trait GpuDevice: Send {
    /// Adapter / backend description for logs.
    fn describe(&self) -> String;

    fn create_window_surface(&mut self, input: &InputSurface) -> Result<SurfaceId>;
    fn destroy_surface(&mut self, surface: SurfaceId);
    /// `None` detaches the context from every surface.
    fn make_current(&mut self, surfaces: Option<(SurfaceId, SurfaceId)>) -> Result<()>;
    /// Present the surface's contents to its encoder input at `pts_us`.
    fn swap_buffers(&mut self, surface: SurfaceId, pts_us: i64) -> Result<()>;

    fn create_external_texture(&mut self) -> Result<TextureId>;
    /// Upload `frame` into `texture`; returns the frame's orientation matrix.
    fn update_tex_image(&mut self, texture: TextureId, frame: SurfaceFrame) -> Result<Mat4>;
    fn delete_texture(&mut self, texture: TextureId);

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId>;
    fn create_offscreen_target(&mut self, width: u32, height: u32) -> Result<TargetId>;
    fn delete_offscreen_target(&mut self, target: TargetId);

    fn draw_quad(&mut self, call: &DrawCall) -> Result<()>;
    /// Tightly packed RGBA8 of the whole target.
    fn read_pixels(&mut self, target: TargetId) -> Result<Vec<u8>>;

    fn release(&mut self);
}
