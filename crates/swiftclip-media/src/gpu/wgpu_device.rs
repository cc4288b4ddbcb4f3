// crates/swiftclip-media/src/gpu/wgpu_device.rs
//
// `GpuDevice` on wgpu.
//
// Resource mapping:
//   window surface    → Rgba8Unorm render texture (RENDER_ATTACHMENT | COPY_SRC)
//                       paired with the encoder InputSurface it presents to.
//                       COPY_SRC is the "recordable" capability: the encoder
//                       side can read what was rendered.
//   external texture  → Rgba8Unorm sampled texture, (re)allocated when the
//                       decoded frame size changes.
//   program           → render pipeline (shared layout: uniforms + texture + sampler).
//   offscreen target  → small Rgba8Unorm render texture for the analyzer.
//
// swap_buffers reads the surface texture back (rows padded to 256 bytes as
// wgpu requires) and submits tightly packed RGBA to the InputSurface with the
// frame's presentation time. Decoded frames cross to the GPU once via
// queue.write_texture; nothing else touches system memory.
//
// Init failures (no adapter, no device) are GpuInit and abort the batch.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use swiftclip_core::error::{ExportError, Result};
use swiftclip_core::helpers::geometry::Mat4;

use crate::gpu::renderer::QUAD_VERTICES;
use crate::gpu::{DrawCall, GpuDevice, ProgramDesc, ProgramId, RenderTarget, SurfaceId, TargetId, TextureId};
use crate::surface::{InputSurface, RgbaImage, SurfaceFrame};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawUniforms {
    mvp: [[f32; 4]; 4],
    tex: [[f32; 4]; 4],
}

struct WindowSurface {
    input:  InputSurface,
    color:  wgpu::Texture,
    width:  u32,
    height: u32,
}

struct ExternalTexture {
    storage:   Option<(wgpu::Texture, u32, u32)>,
    transform: Mat4,
}

struct Offscreen {
    color:  wgpu::Texture,
    width:  u32,
    height: u32,
}

pub struct WgpuDevice {
    device:       wgpu::Device,
    queue:        wgpu::Queue,
    adapter_name: String,
    bind_layout:  wgpu::BindGroupLayout,
    pipe_layout:  wgpu::PipelineLayout,
    sampler:      wgpu::Sampler,
    quad:         wgpu::Buffer,
    uniforms:     wgpu::Buffer,
    programs:     HashMap<ProgramId, wgpu::RenderPipeline>,
    surfaces:     HashMap<SurfaceId, WindowSurface>,
    textures:     HashMap<TextureId, ExternalTexture>,
    targets:      HashMap<TargetId, Offscreen>,
    current:      Option<SurfaceId>,
    next_id:      u64,
}

impl WgpuDevice {
    /// Pick a high-performance adapter and open a device on it. Blocking.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference:       wgpu::PowerPreference::HighPerformance,
                compatible_surface:     None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ExportError::GpuInit(format!("no GPU adapter: {e}")))?;

        let adapter_name = {
            let info = adapter.get_info();
            format!("{} ({:?})", info.name, info.backend)
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label:             Some("swiftclip"),
                required_features: wgpu::Features::empty(),
                required_limits:   wgpu::Limits::default(),
                memory_hints:      wgpu::MemoryHints::Performance,
                trace:             wgpu::Trace::Off,
            })
            .await
            .map_err(|e| ExportError::GpuInit(format!("request device on {adapter_name}: {e}")))?;

        info!(adapter = %adapter_name, "wgpu device ready");

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame-bind-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding:    0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty:                 wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size:   None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding:    1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type:    wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled:   false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding:    2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty:         wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count:      None,
                },
            ],
        });

        let pipe_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label:                Some("frame-pipeline-layout"),
            bind_group_layouts:   &[&bind_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label:          Some("frame-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter:     wgpu::FilterMode::Linear,
            min_filter:     wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label:    Some("unit-quad"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage:    wgpu::BufferUsages::VERTEX,
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label:              Some("draw-uniforms"),
            size:               std::mem::size_of::<DrawUniforms>() as u64,
            usage:              wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            adapter_name,
            bind_layout,
            pipe_layout,
            sampler,
            quad,
            uniforms,
            programs: HashMap::new(),
            surfaces: HashMap::new(),
            textures: HashMap::new(),
            targets:  HashMap::new(),
            current:  None,
            next_id:  1,
        })
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn color_texture(&self, label: &str, width: u32, height: u32) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label:           Some(label),
            size:            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count:    1,
            dimension:       wgpu::TextureDimension::D2,
            format:          COLOR_FORMAT,
            usage:           wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats:    &[],
        })
    }

    /// Copy a whole texture to host memory and strip the row padding.
    fn read_texture(&self, texture: &wgpu::Texture, width: u32, height: u32) -> Result<Vec<u8>> {
        let bytes_per_row = 4 * width;
        let padded_bytes_per_row = (bytes_per_row + 255) & !255;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label:              Some("readback"),
            size:               u64::from(padded_bytes_per_row) * u64::from(height),
            usage:              wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback-encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin:    wgpu::Origin3d::ZERO,
                aspect:    wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset:         0,
                    bytes_per_row:  Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| ExportError::step("gpu.readback", format!("poll: {e}")))?;
        rx.recv()
            .map_err(|e| ExportError::step("gpu.readback", e))?
            .map_err(|e| ExportError::step("gpu.readback", format!("map: {e}")))?;

        let data = slice.get_mapped_range();
        let mut out = Vec::with_capacity((bytes_per_row * height) as usize);
        for row in 0..height as usize {
            let start = row * padded_bytes_per_row as usize;
            out.extend_from_slice(&data[start..start + bytes_per_row as usize]);
        }
        drop(data);
        buffer.unmap();
        Ok(out)
    }

    fn target_view(&self, target: RenderTarget) -> Result<wgpu::TextureView> {
        let texture = match target {
            RenderTarget::Current => {
                let id = self.current
                    .ok_or_else(|| ExportError::step("gpu.draw", "no current surface"))?;
                &self.surfaces
                    .get(&id)
                    .ok_or_else(|| ExportError::step("gpu.draw", format!("stale surface {id:?}")))?
                    .color
            }
            RenderTarget::Offscreen(id) => {
                &self.targets
                    .get(&id)
                    .ok_or_else(|| ExportError::step("gpu.draw", format!("unknown target {id:?}")))?
                    .color
            }
        };
        Ok(texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }
}

impl GpuDevice for WgpuDevice {
    fn describe(&self) -> String {
        self.adapter_name.clone()
    }

    fn create_window_surface(&mut self, input: &InputSurface) -> Result<SurfaceId> {
        let (width, height) = input.size();
        if width == 0 || height == 0 {
            return Err(ExportError::GpuInit(format!("cannot create {width}x{height} surface")));
        }
        let color = self.color_texture("window-surface", width, height);
        let id = SurfaceId(self.alloc_id());
        self.surfaces.insert(id, WindowSurface { input: input.clone(), color, width, height });
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        if let Some(s) = self.surfaces.remove(&surface) {
            s.color.destroy();
        }
        if self.current == Some(surface) {
            self.current = None;
        }
    }

    fn make_current(&mut self, surfaces: Option<(SurfaceId, SurfaceId)>) -> Result<()> {
        match surfaces {
            None => self.current = None,
            Some((draw, _read)) => {
                if !self.surfaces.contains_key(&draw) {
                    return Err(ExportError::step("gpu.make_current", format!("unknown surface {draw:?}")));
                }
                self.current = Some(draw);
            }
        }
        Ok(())
    }

    fn swap_buffers(&mut self, surface: SurfaceId, pts_us: i64) -> Result<()> {
        let s = self.surfaces
            .get(&surface)
            .ok_or_else(|| ExportError::step("gpu.swap_buffers", format!("unknown surface {surface:?}")))?;
        let data = self.read_texture(&s.color, s.width, s.height)?;
        s.input.submit(RgbaImage { width: s.width, height: s.height, data }, pts_us);
        Ok(())
    }

    fn create_external_texture(&mut self) -> Result<TextureId> {
        let id = TextureId(self.alloc_id());
        self.textures.insert(id, ExternalTexture { storage: None, transform: Mat4::IDENTITY });
        Ok(id)
    }

    fn update_tex_image(&mut self, texture: TextureId, frame: SurfaceFrame) -> Result<Mat4> {
        let (w, h) = (frame.image.width, frame.image.height);
        let needs_alloc = match self.textures.get(&texture) {
            None => return Err(ExportError::step("gpu.update_tex_image", format!("unknown texture {texture:?}"))),
            Some(t) => !matches!(t.storage, Some((_, tw, th)) if tw == w && th == h),
        };
        if needs_alloc {
            let tex = self.device.create_texture(&wgpu::TextureDescriptor {
                label:           Some("external-frame"),
                size:            wgpu::Extent3d { width: w, height: h, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count:    1,
                dimension:       wgpu::TextureDimension::D2,
                format:          COLOR_FORMAT,
                usage:           wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats:    &[],
            });
            debug!(texture = texture.0, w, h, "external texture (re)allocated");
            if let Some(t) = self.textures.get_mut(&texture) {
                if let Some((old, _, _)) = t.storage.replace((tex, w, h)) {
                    old.destroy();
                }
            }
        }

        let entry = self.textures
            .get_mut(&texture)
            .ok_or_else(|| ExportError::step("gpu.update_tex_image", "texture vanished"))?;
        if let Some((tex, _, _)) = &entry.storage {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture:   tex,
                    mip_level: 0,
                    origin:    wgpu::Origin3d::ZERO,
                    aspect:    wgpu::TextureAspect::All,
                },
                &frame.image.data,
                wgpu::TexelCopyBufferLayout {
                    offset:         0,
                    bytes_per_row:  Some(4 * w),
                    rows_per_image: Some(h),
                },
                wgpu::Extent3d { width: w, height: h, depth_or_array_layers: 1 },
            );
        }
        entry.transform = frame.transform;
        Ok(frame.transform)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(ExternalTexture { storage: Some((tex, _, _)), .. }) = self.textures.remove(&texture) {
            tex.destroy();
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId> {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label:  Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.wgsl.into()),
        });
        let vertex_attrs = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label:  Some(desc.label),
            layout: Some(&self.pipe_layout),
            vertex: wgpu::VertexState {
                module:              &module,
                entry_point:         Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 5]>() as u64,
                    step_mode:    wgpu::VertexStepMode::Vertex,
                    attributes:   &vertex_attrs,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module:              &module,
                entry_point:         Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format:     COLOR_FORMAT,
                    blend:      None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample:   wgpu::MultisampleState::default(),
            multiview:     None,
            cache:         None,
        });
        let id = ProgramId(self.alloc_id());
        self.programs.insert(id, pipeline);
        Ok(id)
    }

    fn create_offscreen_target(&mut self, width: u32, height: u32) -> Result<TargetId> {
        let color = self.color_texture("offscreen-target", width, height);
        let id = TargetId(self.alloc_id());
        self.targets.insert(id, Offscreen { color, width, height });
        Ok(id)
    }

    fn delete_offscreen_target(&mut self, target: TargetId) {
        if let Some(t) = self.targets.remove(&target) {
            t.color.destroy();
        }
    }

    fn draw_quad(&mut self, call: &DrawCall) -> Result<()> {
        let pipeline = self.programs
            .get(&call.program)
            .ok_or_else(|| ExportError::step("gpu.draw", format!("unknown program {:?}", call.program)))?;
        let source = self.textures
            .get(&call.texture)
            .and_then(|t| t.storage.as_ref())
            .ok_or_else(|| ExportError::step("gpu.draw", "texture has no image yet"))?;
        let source_view = source.0.create_view(&wgpu::TextureViewDescriptor::default());
        let target_view = self.target_view(call.target)?;

        let uniforms = DrawUniforms {
            mvp: call.mvp.to_cols_array_2d(),
            tex: call.tex_matrix.to_cols_array_2d(),
        };
        self.queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label:  Some("frame-bind-group"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.uniforms.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&source_view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("draw-quad"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("draw-quad"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view:           &target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load:  wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes:         None,
                occlusion_query_set:      None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.quad.slice(..));
            pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self, target: TargetId) -> Result<Vec<u8>> {
        let t = self.targets
            .get(&target)
            .ok_or_else(|| ExportError::step("gpu.read_pixels", format!("unknown target {target:?}")))?;
        self.read_texture(&t.color, t.width, t.height)
    }

    fn release(&mut self) {
        for (_, s) in self.surfaces.drain() {
            s.color.destroy();
        }
        for (_, t) in self.targets.drain() {
            t.color.destroy();
        }
        for (_, t) in self.textures.drain() {
            if let Some((tex, _, _)) = t.storage {
                tex.destroy();
            }
        }
        self.programs.clear();
        self.current = None;
        debug!(adapter = %self.adapter_name, "wgpu device released");
    }
}
