//! Offscreen `wgpu` backend.
//!
//! Renders into an RGBA8 target texture that can be read back as an image.
//! Shader modules and pipelines are created inside validation error scopes so
//! a broken shader surfaces as [`RenderError::ShaderCompile`] instead of a
//! device panic.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};
use wgpu::util::DeviceExt;

use super::{
    FramePacket, GpuCapabilities, ProgramInfo, RenderBackend, TexelFormat, TextureDesc, Vertex,
};
use crate::error::RenderError;
use crate::render::arena::{ResourceArena, ResourceKey};
use crate::render::shader::{ShaderKind, UniformBlock};
use crate::scene::BlendMode;

const VOLUME_SHADER: &str = include_str!("../shaders/volume.wgsl");

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

/// Offscreen target configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WgpuBackendOptions {
    pub width: u32,
    pub height: u32,
}

impl Default for WgpuBackendOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: TexelFormat,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: GpuCapabilities,
    width: u32,
    height: u32,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    empty_mask: GpuTexture,
    empty_labels: wgpu::Buffer,
    module: Option<wgpu::ShaderModule>,
    pipelines: HashMap<(ShaderKind, BlendMode), wgpu::RenderPipeline>,
    textures: ResourceArena<GpuTexture>,
    tables: ResourceArena<wgpu::Buffer>,
}

impl WgpuBackend {
    /// Open the default adapter headlessly.
    pub async fn new(options: WgpuBackendOptions) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::Device("no GPU adapter available".into()))?;

        let r16 = adapter
            .features()
            .contains(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM);
        let required_features = if r16 {
            wgpu::Features::TEXTURE_FORMAT_16BIT_NORM
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("volscope"),
                    required_features,
                    required_limits: adapter.limits(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::Device(e.to_string()))?;

        let caps = GpuCapabilities {
            max_texture_dimension_3d: device.limits().max_texture_dimension_3d,
            supports_r16_unorm: r16,
        };
        info!(
            adapter = %adapter.get_info().name,
            max_3d = caps.max_texture_dimension_3d,
            r16_unorm = caps.supports_r16_unorm,
            "GPU device ready"
        );

        Ok(Self::with_device(device, queue, caps, options))
    }

    /// Blocking form of [`new`](Self::new) for synchronous callers.
    pub fn new_blocking(options: WgpuBackendOptions) -> Result<Self, RenderError> {
        pollster::block_on(Self::new(options))
    }

    fn with_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        caps: GpuCapabilities,
        options: WgpuBackendOptions,
    ) -> Self {
        let width = options.width.max(1);
        let height = options.height.max(1);

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&Default::default());

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("volume bindings"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<UniformBlock>() as u64,
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Uint,
                        view_dimension: wgpu::TextureViewDimension::D3,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("volume pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("volume sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let empty_mask = upload_texture(
            &device,
            &queue,
            &TextureDesc {
                label: "empty mask".into(),
                dims: [1, 1, 1],
                format: TexelFormat::R8Uint,
            },
            &[0],
        );
        let empty_labels = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("empty label table"),
            contents: &[0u8; 4],
            usage: wgpu::BufferUsages::STORAGE,
        });

        Self {
            device,
            queue,
            caps,
            width,
            height,
            target,
            target_view,
            bind_group_layout,
            pipeline_layout,
            sampler,
            empty_mask,
            empty_labels,
            module: None,
            pipelines: HashMap::new(),
            textures: ResourceArena::new(),
            tables: ResourceArena::new(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Run `f` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = f(&self.device);
        let oom = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());
        (value, oom.or(validation))
    }

    fn ensure_module(&mut self) -> Result<(), RenderError> {
        if self.module.is_some() {
            return Ok(());
        }
        let (module, error) = self.scoped(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("volume shader"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(VOLUME_SHADER)),
            })
        });
        if let Some(error) = error {
            return Err(RenderError::ShaderCompile {
                kind: "volume module",
                message: error.to_string(),
            });
        }
        self.module = Some(module);
        Ok(())
    }

    fn build_pipeline(
        &self,
        module: &wgpu::ShaderModule,
        kind: ShaderKind,
        blend: BlendMode,
    ) -> (wgpu::RenderPipeline, Option<wgpu::Error>) {
        let label = format!("{} / {}", kind.name(), blend.name());
        self.scoped(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: "vs_main",
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<Vertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &VERTEX_ATTRIBUTES,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: kind.entry_point(),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(blend_state(blend)),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: Default::default(),
                multiview: None,
                cache: None,
            })
        })
    }

    /// Copy the last rendered frame to host memory.
    pub fn read_frame(&self) -> Result<image::RgbaImage, RenderError> {
        let unpadded = self.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame readback"),
            size: (padded * self.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded * self.height) as usize);
        for row in mapped.chunks_exact(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(mapped);
        staging.unmap();

        image::RgbaImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| RenderError::Readback("frame size mismatch".into()))
    }

    /// Read the last frame back and write it as a PNG.
    pub fn save_png(&self, path: &Path) -> Result<(), RenderError> {
        let frame = self.read_frame()?;
        frame
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| RenderError::Readback(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), width = self.width, height = self.height, "frame saved");
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    fn capabilities(&self) -> &GpuCapabilities {
        &self.caps
    }

    fn create_volume_texture(
        &mut self,
        desc: &TextureDesc,
        texels: &[u8],
    ) -> Result<ResourceKey, RenderError> {
        if texels.len() != desc.byte_len() {
            return Err(RenderError::GpuResource(format!(
                "{} expects {} bytes, got {}",
                desc.label,
                desc.byte_len(),
                texels.len()
            )));
        }
        let (texture, error) = self.scoped(|device| upload_texture(device, &self.queue, desc, texels));
        if let Some(error) = error {
            texture.texture.destroy();
            return Err(RenderError::GpuResource(format!("{}: {}", desc.label, error)));
        }
        Ok(self.textures.insert(texture))
    }

    fn release_texture(&mut self, key: ResourceKey) -> bool {
        match self.textures.remove(key) {
            Some(texture) => {
                texture.texture.destroy();
                true
            }
            None => false,
        }
    }

    fn upload_label_table(&mut self, colors: &[u32]) -> Result<ResourceKey, RenderError> {
        let contents: &[u32] = if colors.is_empty() { &[0] } else { colors };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("label colors"),
                contents: bytemuck::cast_slice(contents),
                usage: wgpu::BufferUsages::STORAGE,
            });
        Ok(self.tables.insert(buffer))
    }

    fn release_label_table(&mut self, key: ResourceKey) -> bool {
        match self.tables.remove(key) {
            Some(buffer) => {
                buffer.destroy();
                true
            }
            None => false,
        }
    }

    fn compile_program(&mut self, kind: ShaderKind) -> Result<ProgramInfo, RenderError> {
        self.ensure_module()?;
        let Some(module) = &self.module else {
            return Err(RenderError::ShaderCompile {
                kind: kind.name(),
                message: "shader module unavailable".into(),
            });
        };

        let mut built = Vec::new();
        for blend in [BlendMode::MaximumIntensity, BlendMode::Alpha] {
            if self.pipelines.contains_key(&(kind, blend)) {
                continue;
            }
            let (pipeline, error) = self.build_pipeline(module, kind, blend);
            if let Some(error) = error {
                return Err(RenderError::ShaderCompile {
                    kind: kind.name(),
                    message: error.to_string(),
                });
            }
            built.push(((kind, blend), pipeline));
        }
        self.pipelines.extend(built);
        debug!(kind = kind.name(), "pipelines built");

        Ok(ProgramInfo {
            kind,
            uniforms: uniform_fields(VOLUME_SHADER),
        })
    }

    fn submit_frame(&mut self, frame: &FramePacket) -> Result<(), RenderError> {
        let mut prepared = Vec::with_capacity(frame.passes.len());
        let mut vertices: Vec<Vertex> = Vec::with_capacity(frame.draw_count() * 4);

        for pass in &frame.passes {
            let pipeline = self
                .pipelines
                .get(&(pass.program, pass.blend))
                .ok_or_else(|| RenderError::ShaderCompile {
                    kind: pass.program.name(),
                    message: "program was never compiled".into(),
                })?;

            let signal = self
                .textures
                .get(pass.signal.texture)
                .ok_or_else(|| RenderError::StaleHandle(pass.signal.texture.to_string()))?;
            if signal.format.is_integer() {
                return Err(RenderError::GpuResource(
                    "integer volumes cannot be sampled as signal".into(),
                ));
            }
            let mask = match pass.mask {
                Some(binding) => {
                    let mask = self
                        .textures
                        .get(binding.texture)
                        .ok_or_else(|| RenderError::StaleHandle(binding.texture.to_string()))?;
                    if !mask.format.is_integer() {
                        return Err(RenderError::GpuResource(
                            "label masks must use an integer format".into(),
                        ));
                    }
                    mask
                }
                None => &self.empty_mask,
            };
            let labels = match pass.label_table {
                Some(key) => self
                    .tables
                    .get(key)
                    .ok_or_else(|| RenderError::StaleHandle(key.to_string()))?,
                None => &self.empty_labels,
            };

            let uniforms = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("volume uniforms"),
                    contents: bytemuck::bytes_of(&pass.uniforms),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("volume bind group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&signal.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(&mask.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: labels.as_entire_binding(),
                    },
                ],
            });

            let first = vertices.len() as u32;
            for draw in &pass.draws {
                vertices.extend_from_slice(&draw.vertices);
            }
            prepared.push((pipeline, bind_group, first, pass.draws.len() as u32));
        }

        let vertex_buffer = (!vertices.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("slice quads"),
                    contents: bytemuck::cast_slice(&vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                })
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame"),
            });
        {
            let [r, g, b, a] = frame.clear_color;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("slices"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(vertex_buffer) = &vertex_buffer {
                pass.set_vertex_buffer(0, vertex_buffer.slice(..));
                for (pipeline, bind_group, first, quads) in &prepared {
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(0, bind_group, &[]);
                    for quad in 0..*quads {
                        let start = first + quad * 4;
                        pass.draw(start..start + 4, 0..1);
                    }
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        debug!(
            passes = frame.passes.len(),
            quads = frame.draw_count(),
            "frame submitted"
        );
        Ok(())
    }
}

fn blend_state(blend: BlendMode) -> wgpu::BlendState {
    match blend {
        // Min/max equations ignore blend factors; wgpu requires them to be One.
        BlendMode::MaximumIntensity => {
            let max = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Max,
            };
            wgpu::BlendState {
                color: max,
                alpha: max,
            }
        }
        BlendMode::Alpha => wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
    }
}

fn wgpu_format(format: TexelFormat) -> wgpu::TextureFormat {
    match format {
        TexelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TexelFormat::R16Unorm => wgpu::TextureFormat::R16Unorm,
        TexelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TexelFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TexelFormat::R8Uint => wgpu::TextureFormat::R8Uint,
        TexelFormat::R16Uint => wgpu::TextureFormat::R16Uint,
        TexelFormat::R32Uint => wgpu::TextureFormat::R32Uint,
    }
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    desc: &TextureDesc,
    texels: &[u8],
) -> GpuTexture {
    let [width, height, depth] = desc.dims;
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: depth,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&desc.label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format: wgpu_format(desc.format),
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        texels,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * desc.format.bytes_per_texel() as u32),
            rows_per_image: Some(height),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(wgpu::TextureViewDimension::D3),
        ..Default::default()
    });
    GpuTexture {
        texture,
        view,
        format: desc.format,
    }
}

/// Field names of `struct Uniforms` in a WGSL source.
fn uniform_fields(source: &str) -> Vec<String> {
    let Some(start) = source.find("struct Uniforms") else {
        return Vec::new();
    };
    let body = &source[start..];
    let Some(open) = body.find('{') else {
        return Vec::new();
    };
    let Some(close) = body.find('}') else {
        return Vec::new();
    };

    body[open + 1..close]
        .split(',')
        .filter_map(|field| field.split(':').next())
        .map(str::trim)
        .filter(|name| !name.is_empty() && !name.starts_with('_'))
        .map(str::to_string)
        .collect()
}
