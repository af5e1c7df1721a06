use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::num::NonZeroU64;

use wgpu::naga::ShaderStage;

use crate::backend::QuadVertex;
use crate::error::RenderError;
use crate::program::{
    check_assignment, ParameterIndex, ParameterSet, ParameterValue, ShaderProgram, Technique,
};
use crate::types::{CullMode, RasterizerState};

use super::channels::GpuTexture;
use super::context::GpuDevice;
use super::reflect::{self, ParamLocation, SamplerSlot, TextureSlot, UniformBlock};

const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec3 a_position;
layout(location = 1) in vec4 a_color;
layout(location = 2) in vec2 a_uv;

layout(location = 0) out vec2 v_uv;
layout(location = 1) out vec4 v_color;

void main() {
    v_uv = a_uv;
    v_color = a_color;
    gl_Position = vec4(a_position, 1.0);
}
";

/// Compiles the static quad vertex shader shared by every program.
pub(crate) fn compile_vertex_shader(gpu: &GpuDevice) -> Result<wgpu::ShaderModule, RenderError> {
    gpu.validated(
        |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("quad vertex"),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
                    stage: ShaderStage::Vertex,
                    defines: &[],
                },
            })
        },
        |reason| RenderError::resource("quad vertex shader", reason),
    )
}

struct BlockState {
    layout: UniformBlock,
    buffer: wgpu::Buffer,
    data: Vec<u8>,
    dirty: Cell<bool>,
}

/// A value remembered together with the key it was built for.
struct KeyedCache<K, V> {
    entry: Option<(K, V)>,
}

impl<K: PartialEq, V: Clone> KeyedCache<K, V> {
    fn new() -> Self {
        Self { entry: None }
    }

    fn get(&self, key: &K) -> Option<V> {
        match &self.entry {
            Some((cached, value)) if cached == key => Some(value.clone()),
            _ => None,
        }
    }

    fn store(&mut self, key: K, value: V) {
        self.entry = Some((key, value));
    }

    fn invalidate(&mut self) {
        self.entry = None;
    }
}

/// A compiled SPIR-V program with one pipeline per fragment entry point.
pub struct WgpuProgram {
    params: ParameterSet,
    techniques: Vec<Technique>,
    locations: Vec<ParamLocation>,
    blocks: Vec<BlockState>,
    textures: Vec<(TextureSlot, Option<wgpu::TextureView>)>,
    samplers: Vec<SamplerSlot>,
    group_layouts: Vec<wgpu::BindGroupLayout>,
    pipelines: Vec<wgpu::RenderPipeline>,
    /// Bind groups for the current texture views, keyed by the sampler.
    bind_groups: RefCell<KeyedCache<wgpu::Sampler, Vec<wgpu::BindGroup>>>,
}

fn cull_face(state: RasterizerState) -> Option<wgpu::Face> {
    match state.cull {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

fn layout_for_group(
    device: &wgpu::Device,
    reflection: &reflect::Reflection,
    group: u32,
) -> wgpu::BindGroupLayout {
    let mut entries = Vec::new();
    for block in reflection.blocks.iter().filter(|block| block.group == group) {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: block.binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: NonZeroU64::new(u64::from(block.size)),
            },
            count: None,
        });
    }
    for slot in reflection.textures.iter().filter(|slot| slot.group == group) {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: slot.binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: slot.dimension,
                multisampled: false,
            },
            count: None,
        });
    }
    for slot in reflection.samplers.iter().filter(|slot| slot.group == group) {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: slot.binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("program group {group}")),
        entries: &entries,
    })
}

impl WgpuProgram {
    pub(crate) fn load(
        gpu: &GpuDevice,
        vertex_module: &wgpu::ShaderModule,
        binary: &[u8],
        target_format: wgpu::TextureFormat,
        rasterizer: RasterizerState,
    ) -> Result<Self, RenderError> {
        let module = reflect::parse_spirv(binary)?;
        let reflection = reflect::reflect(&module)?;

        let fragment_module = gpu.validated(
            |device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("fxlive fragment"),
                    source: wgpu::util::make_spirv(binary),
                })
            },
            |reason| RenderError::compile(reason),
        )?;

        let group_count = reflection.max_group().map_or(0, |group| group + 1);
        let group_layouts: Vec<wgpu::BindGroupLayout> = gpu.validated(
            |device| {
                (0..group_count)
                    .map(|group| layout_for_group(device, &reflection, group))
                    .collect()
            },
            |reason| RenderError::compile(format!("program bind group layout: {reason}")),
        )?;

        let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Unorm8x4, 2 => Float32x2],
        }];

        let pipelines = gpu.validated(
            |device| {
                let pipeline_layout =
                    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some("program pipeline layout"),
                        bind_group_layouts: &layout_refs,
                        push_constant_ranges: &[],
                    });
                reflection
                    .fragment_entry_points
                    .iter()
                    .map(|entry_point| {
                        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                            label: Some(&format!("program pass {entry_point}")),
                            layout: Some(&pipeline_layout),
                            vertex: wgpu::VertexState {
                                module: vertex_module,
                                entry_point: Some("main"),
                                buffers: &vertex_buffers,
                                compilation_options: Default::default(),
                            },
                            primitive: wgpu::PrimitiveState {
                                topology: wgpu::PrimitiveTopology::TriangleList,
                                strip_index_format: None,
                                front_face: wgpu::FrontFace::Ccw,
                                cull_mode: cull_face(rasterizer),
                                unclipped_depth: false,
                                polygon_mode: wgpu::PolygonMode::Fill,
                                conservative: false,
                            },
                            depth_stencil: None,
                            multisample: wgpu::MultisampleState::default(),
                            fragment: Some(wgpu::FragmentState {
                                module: &fragment_module,
                                entry_point: Some(entry_point.as_str()),
                                targets: &[Some(wgpu::ColorTargetState {
                                    format: target_format,
                                    blend: Some(wgpu::BlendState::REPLACE),
                                    write_mask: wgpu::ColorWrites::ALL,
                                })],
                                compilation_options: Default::default(),
                            }),
                            multiview: None,
                            cache: None,
                        })
                    })
                    .collect::<Vec<_>>()
            },
            |reason| RenderError::compile(reason),
        )?;

        let blocks = gpu.validated(
            |device| {
                reflection
                    .blocks
                    .iter()
                    .map(|layout| {
                        let size = u64::from(layout.size.max(16)).next_multiple_of(16);
                        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                            label: Some("program uniforms"),
                            size,
                            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                            mapped_at_creation: false,
                        });
                        BlockState {
                            layout: layout.clone(),
                            buffer,
                            data: vec![0; size as usize],
                            dirty: Cell::new(true),
                        }
                    })
                    .collect::<Vec<_>>()
            },
            |reason| RenderError::resource("program uniform buffer", reason),
        )?;

        Ok(Self {
            params: ParameterSet::new(reflection.params.clone()),
            techniques: reflection.techniques(),
            locations: reflection.locations.clone(),
            blocks,
            textures: reflection
                .textures
                .iter()
                .map(|slot| (slot.clone(), None))
                .collect(),
            samplers: reflection.samplers.clone(),
            group_layouts,
            pipelines,
            bind_groups: RefCell::new(KeyedCache::new()),
        })
    }

    /// Pipeline for the `pass`-th fragment entry point.
    pub(crate) fn pipeline(&self, technique: usize, pass: usize) -> Option<&wgpu::RenderPipeline> {
        if technique != 0 {
            return None;
        }
        self.pipelines.get(pass)
    }

    /// Whether [`prepare`](Self::prepare) has to build new bind groups.
    pub(crate) fn needs_bind_groups(&self, sampler: &wgpu::Sampler) -> bool {
        self.bind_groups.borrow().get(sampler).is_none()
    }

    /// Uploads changed uniform values and returns the bind groups for one draw.
    ///
    /// Bind groups are rebuilt only after a texture view or the sampler changed.
    /// Texture slots nothing was assigned to use `fallback`.
    pub(crate) fn prepare(
        &self,
        gpu: &GpuDevice,
        sampler: &wgpu::Sampler,
        fallback: &dyn Fn(wgpu::TextureViewDimension) -> Option<wgpu::TextureView>,
    ) -> Result<Vec<wgpu::BindGroup>, RenderError> {
        for block in &self.blocks {
            if block.dirty.replace(false) {
                gpu.queue.write_buffer(&block.buffer, 0, &block.data);
            }
        }

        if let Some(groups) = self.bind_groups.borrow().get(sampler) {
            return Ok(groups);
        }
        let groups = self.build_bind_groups(gpu, sampler, fallback)?;
        tracing::trace!(groups = groups.len(), "rebuilt program bind groups");
        self.bind_groups
            .borrow_mut()
            .store(sampler.clone(), groups.clone());
        Ok(groups)
    }

    fn build_bind_groups(
        &self,
        gpu: &GpuDevice,
        sampler: &wgpu::Sampler,
        fallback: &dyn Fn(wgpu::TextureViewDimension) -> Option<wgpu::TextureView>,
    ) -> Result<Vec<wgpu::BindGroup>, RenderError> {
        let mut views = Vec::with_capacity(self.textures.len());
        for (slot, view) in &self.textures {
            let view = match view {
                Some(view) => view.clone(),
                None => fallback(slot.dimension).ok_or_else(|| {
                    RenderError::resource(
                        "texture binding",
                        format!("no texture for {:?}", slot.dimension),
                    )
                })?,
            };
            views.push((slot, view));
        }

        gpu.validated(
            |device| {
                self.group_layouts
                    .iter()
                    .enumerate()
                    .map(|(group, layout)| {
                        let group = group as u32;
                        let mut entries = Vec::new();
                        let blocks = self.blocks.iter().filter(|b| b.layout.group == group);
                        for block in blocks {
                            entries.push(wgpu::BindGroupEntry {
                                binding: block.layout.binding,
                                resource: block.buffer.as_entire_binding(),
                            });
                        }
                        for (slot, view) in views.iter().filter(|(slot, _)| slot.group == group) {
                            entries.push(wgpu::BindGroupEntry {
                                binding: slot.binding,
                                resource: wgpu::BindingResource::TextureView(view),
                            });
                        }
                        for slot in self.samplers.iter().filter(|slot| slot.group == group) {
                            entries.push(wgpu::BindGroupEntry {
                                binding: slot.binding,
                                resource: wgpu::BindingResource::Sampler(sampler),
                            });
                        }
                        device.create_bind_group(&wgpu::BindGroupDescriptor {
                            label: Some(&format!("program bind group {group}")),
                            layout,
                            entries: &entries,
                        })
                    })
                    .collect()
            },
            |reason| RenderError::resource("program bind group", reason),
        )
    }

    fn write_uniform(
        &mut self,
        block: usize,
        offset: u32,
        bytes: &[u8],
    ) -> Result<(), RenderError> {
        let state = self
            .blocks
            .get_mut(block)
            .ok_or_else(|| RenderError::Binding(format!("no uniform block {block}")))?;
        let start = offset as usize;
        let end = start + bytes.len();
        let target = state.data.get_mut(start..end).ok_or_else(|| {
            RenderError::Binding(format!("uniform write {start}..{end} outside block"))
        })?;
        if target != bytes {
            target.copy_from_slice(bytes);
            state.dirty.set(true);
        }
        Ok(())
    }
}

impl ShaderProgram for WgpuProgram {
    type Texture = GpuTexture;

    fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    fn assign(
        &mut self,
        index: ParameterIndex,
        value: ParameterValue<'_, GpuTexture>,
    ) -> Result<(), RenderError> {
        check_assignment(&self.params, index, &value)?;
        let location = self.locations[index.0];
        match (location, value) {
            (ParamLocation::Uniform { block, offset }, ParameterValue::Float(v)) => {
                self.write_uniform(block, offset, bytemuck::bytes_of(&v))
            }
            (ParamLocation::Uniform { block, offset }, ParameterValue::Vec3(v)) => {
                self.write_uniform(block, offset, bytemuck::cast_slice(&v))
            }
            (ParamLocation::Uniform { block, offset }, ParameterValue::Vec4(v)) => {
                self.write_uniform(block, offset, bytemuck::cast_slice(&v))
            }
            (ParamLocation::Uniform { block, offset }, ParameterValue::Matrix4(m)) => {
                self.write_uniform(block, offset, bytemuck::cast_slice(&m))
            }
            (ParamLocation::Texture { slot }, ParameterValue::Texture(texture)) => {
                let (layout, view) = &mut self.textures[slot];
                let expected = layout.dimension;
                let actual = super::channels::view_dimension_of(texture.kind);
                if expected != actual {
                    return Err(RenderError::Binding(format!(
                        "texture slot expects {expected:?}, got {actual:?}"
                    )));
                }
                if view.as_ref() != Some(&texture.view) {
                    *view = Some(texture.view.clone());
                    self.bind_groups.get_mut().invalidate();
                }
                Ok(())
            }
            (_, value) => Err(RenderError::Binding(format!(
                "cannot assign {} to parameter {}",
                value.type_name(),
                index.0
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hits_only_for_the_stored_key() {
        let mut cache: KeyedCache<u32, Vec<&str>> = KeyedCache::new();
        assert_eq!(cache.get(&1), None);

        cache.store(1, vec!["group 0", "group 1"]);
        assert_eq!(cache.get(&1), Some(vec!["group 0", "group 1"]));
        assert_eq!(cache.get(&2), None, "a new sampler needs new bind groups");

        cache.invalidate();
        assert_eq!(cache.get(&1), None, "a new texture view needs new bind groups");
    }
}
