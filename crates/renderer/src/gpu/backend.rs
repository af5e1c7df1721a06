use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::backend::{QuadGeometry, RenderBackend};
use crate::device::DeviceLease;
use crate::error::RenderError;
use crate::types::{
    AddressMode, ChannelKind, ClearColor, FilterMode, RasterizerState, SamplerState, SurfaceSize,
};

use super::channels::{create_placeholder, view_dimension_of, GpuTexture};
use super::context::GpuDevice;
use super::program::{compile_vertex_shader, WgpuProgram};

/// Backend creation options.
#[derive(Clone, Copy, Debug)]
pub struct WgpuOptions {
    /// Format of the back buffer; hosts that copy it into a swapchain must match the surface.
    pub format: wgpu::TextureFormat,
}

impl Default for WgpuOptions {
    fn default() -> Self {
        Self {
            format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

/// Vertex and index buffers of the full-screen quad.
#[derive(Clone)]
pub struct WgpuQuad {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
}

struct DrawCall {
    pipeline: wgpu::RenderPipeline,
    bind_groups: Vec<wgpu::BindGroup>,
    index_count: u32,
}

#[derive(Default)]
struct FrameRecording {
    clear: Option<ClearColor>,
    quad: Option<WgpuQuad>,
    pass: Option<(wgpu::RenderPipeline, Vec<wgpu::BindGroup>)>,
    draws: Vec<DrawCall>,
}

fn create_back_buffer(
    device: &wgpu::Device,
    size: SurfaceSize,
    format: wgpu::TextureFormat,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("fxlive back buffer"),
        size: wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn create_sampler(device: &wgpu::Device, state: SamplerState) -> wgpu::Sampler {
    let address = match state.address {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
    };
    let filter = match state.filter {
        FilterMode::Point => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("channel sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        ..Default::default()
    })
}

/// Renders into an off-screen back buffer on the shared wgpu device.
pub struct WgpuBackend {
    lease: DeviceLease<GpuDevice>,
    format: wgpu::TextureFormat,
    size: SurfaceSize,
    back_buffer: wgpu::Texture,
    back_view: wgpu::TextureView,
    vertex_module: wgpu::ShaderModule,
    sampler_state: SamplerState,
    sampler: wgpu::Sampler,
    rasterizer: RasterizerState,
    placeholders: HashMap<ChannelKind, Arc<GpuTexture>>,
    frame: Option<FrameRecording>,
}

impl WgpuBackend {
    pub fn gpu(&self) -> &GpuDevice {
        self.lease.device()
    }

    pub fn back_buffer(&self) -> &wgpu::Texture {
        &self.back_buffer
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    fn placeholder_view(
        &mut self,
        dimension: wgpu::TextureViewDimension,
    ) -> Option<wgpu::TextureView> {
        let kind = [ChannelKind::Texture2d, ChannelKind::Cubemap, ChannelKind::Volume]
            .into_iter()
            .find(|kind| view_dimension_of(*kind) == dimension)?;
        self.placeholder(kind).ok().map(|texture| texture.view.clone())
    }

    fn recording(&mut self) -> Result<&mut FrameRecording, RenderError> {
        self.frame
            .as_mut()
            .ok_or_else(|| {
                RenderError::Binding("draw call outside begin_frame/finish_frame".into())
            })
    }
}

impl RenderBackend for WgpuBackend {
    type Device = GpuDevice;
    type Options = WgpuOptions;
    type Texture = GpuTexture;
    type Program = WgpuProgram;
    type Quad = WgpuQuad;

    fn create(
        lease: DeviceLease<GpuDevice>,
        size: SurfaceSize,
        options: &WgpuOptions,
    ) -> Result<Self, RenderError> {
        let size = size.clamped();
        let gpu = lease.device();
        let (back_buffer, back_view) = gpu.validated(
            |device| create_back_buffer(device, size, options.format),
            |reason| RenderError::resource("back buffer", reason),
        )?;
        let vertex_module = compile_vertex_shader(gpu)?;
        let sampler_state = SamplerState::POINT_WRAP;
        let sampler = create_sampler(&gpu.device, sampler_state);
        tracing::debug!(size = %size, format = ?options.format, "created wgpu backend");
        Ok(Self {
            lease,
            format: options.format,
            size,
            back_buffer,
            back_view,
            vertex_module,
            sampler_state,
            sampler,
            rasterizer: RasterizerState::CULL_NONE,
            placeholders: HashMap::new(),
            frame: None,
        })
    }

    fn back_buffer_size(&self) -> SurfaceSize {
        self.size
    }

    fn recreate_back_buffer(&mut self, size: SurfaceSize) -> Result<(), RenderError> {
        let size = size.clamped();
        let format = self.format;
        let (texture, view) = self.gpu().validated(
            |device| create_back_buffer(device, size, format),
            |reason| RenderError::resource("back buffer", reason),
        )?;
        self.back_buffer = texture;
        self.back_view = view;
        self.size = size;
        tracing::debug!(size = %size, "recreated back buffer");
        Ok(())
    }

    fn create_quad(&mut self) -> Result<WgpuQuad, RenderError> {
        self.gpu().validated(
            |device| {
                let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("quad vertices"),
                    contents: bytemuck::cast_slice(&QuadGeometry::VERTICES),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("quad indices"),
                    contents: bytemuck::cast_slice(&QuadGeometry::INDICES),
                    usage: wgpu::BufferUsages::INDEX,
                });
                WgpuQuad { vertices, indices }
            },
            |reason| RenderError::resource("quad buffers", reason),
        )
    }

    fn load_program(&mut self, binary: &[u8]) -> Result<WgpuProgram, RenderError> {
        WgpuProgram::load(
            self.lease.device(),
            &self.vertex_module,
            binary,
            self.format,
            self.rasterizer,
        )
    }

    fn placeholder(&mut self, kind: ChannelKind) -> Result<Arc<GpuTexture>, RenderError> {
        if let Some(texture) = self.placeholders.get(&kind) {
            return Ok(Arc::clone(texture));
        }
        let gpu = self.lease.device();
        let texture = Arc::new(create_placeholder(gpu, kind)?);
        self.placeholders.insert(kind, Arc::clone(&texture));
        Ok(texture)
    }

    fn begin_frame(&mut self) -> Result<(), RenderError> {
        self.gpu().check_uncaptured("gpu device")?;
        self.frame = Some(FrameRecording::default());
        Ok(())
    }

    fn clear(&mut self, color: ClearColor) {
        if let Some(frame) = self.frame.as_mut() {
            frame.clear = Some(color);
        }
    }

    fn set_sampler_state(&mut self, state: SamplerState) {
        if state != self.sampler_state {
            self.sampler = create_sampler(&self.gpu().device, state);
            self.sampler_state = state;
        }
    }

    /// Culling is baked into pipelines, so a change applies to programs loaded afterwards.
    fn set_rasterizer_state(&mut self, state: RasterizerState) {
        self.rasterizer = state;
    }

    fn bind_quad(&mut self, quad: &WgpuQuad) {
        if let Some(frame) = self.frame.as_mut() {
            frame.quad = Some(quad.clone());
        }
    }

    fn apply_pass(
        &mut self,
        program: &WgpuProgram,
        technique: usize,
        pass: usize,
    ) -> Result<(), RenderError> {
        let pipeline = program
            .pipeline(technique, pass)
            .cloned()
            .ok_or_else(|| RenderError::Binding(format!("no pass {technique}/{pass}")))?;
        let mut fallbacks = HashMap::new();
        if program.needs_bind_groups(&self.sampler) {
            for dimension in [
                wgpu::TextureViewDimension::D2,
                wgpu::TextureViewDimension::Cube,
                wgpu::TextureViewDimension::D3,
            ] {
                if let Some(view) = self.placeholder_view(dimension) {
                    fallbacks.insert(dimension, view);
                }
            }
        }
        let bind_groups = program.prepare(self.lease.device(), &self.sampler, &|dimension| {
            fallbacks.get(&dimension).cloned()
        })?;
        self.recording()?.pass = Some((pipeline, bind_groups));
        Ok(())
    }

    fn draw_indexed(&mut self, primitive_count: u32) -> Result<(), RenderError> {
        let frame = self.recording()?;
        let (pipeline, bind_groups) = frame
            .pass
            .clone()
            .ok_or_else(|| RenderError::Binding("draw without an applied pass".into()))?;
        frame.draws.push(DrawCall {
            pipeline,
            bind_groups,
            index_count: primitive_count * 3,
        });
        Ok(())
    }

    fn finish_frame(&mut self) -> Result<(), RenderError> {
        let Some(frame) = self.frame.take() else {
            return Ok(());
        };
        let gpu = self.lease.device();
        let clear = frame.clear.unwrap_or_default();
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("fxlive frame"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("fxlive quad pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.back_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear.r,
                            g: clear.g,
                            b: clear.b,
                            a: clear.a,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some(quad) = frame.quad.as_ref() {
                pass.set_vertex_buffer(0, quad.vertices.slice(..));
                pass.set_index_buffer(quad.indices.slice(..), wgpu::IndexFormat::Uint32);
                for draw in &frame.draws {
                    pass.set_pipeline(&draw.pipeline);
                    for (group, bind_group) in draw.bind_groups.iter().enumerate() {
                        pass.set_bind_group(group as u32, bind_group, &[]);
                    }
                    pass.draw_indexed(0..draw.index_count, 0, 0..1);
                }
            }
        }
        gpu.queue.submit(Some(encoder.finish()));
        gpu.check_uncaptured("frame submission")
    }
}
