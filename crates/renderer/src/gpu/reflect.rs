//! Parameter reflection over compiled SPIR-V.
//!
//! Uniform-block members become value parameters at their byte offsets;
//! sampled images become texture parameters. Samplers are resources but not
//! parameters: every sampler slot receives the backend's fixed sampler.

use wgpu::naga;

use crate::error::RenderError;
use crate::program::{ParameterDesc, ParameterType, Pass, Technique};
use crate::types::ChannelKind;

/// Where a reflected parameter lives in the program's resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ParamLocation {
    Uniform { block: usize, offset: u32 },
    Texture { slot: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct UniformBlock {
    pub group: u32,
    pub binding: u32,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TextureSlot {
    pub group: u32,
    pub binding: u32,
    pub dimension: wgpu::TextureViewDimension,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SamplerSlot {
    pub group: u32,
    pub binding: u32,
}

/// Everything the wgpu program needs to know about a SPIR-V module.
#[derive(Debug, Default)]
pub(crate) struct Reflection {
    pub params: Vec<ParameterDesc>,
    pub locations: Vec<ParamLocation>,
    pub blocks: Vec<UniformBlock>,
    pub textures: Vec<TextureSlot>,
    pub samplers: Vec<SamplerSlot>,
    pub fragment_entry_points: Vec<String>,
}

impl Reflection {
    /// One technique whose passes are the module's fragment entry points.
    pub fn techniques(&self) -> Vec<Technique> {
        vec![Technique {
            name: "main".to_string(),
            passes: self
                .fragment_entry_points
                .iter()
                .map(|name| Pass { name: name.clone() })
                .collect(),
        }]
    }

    /// Highest bind group index referenced, if any resource is bound.
    pub fn max_group(&self) -> Option<u32> {
        self.blocks
            .iter()
            .map(|block| block.group)
            .chain(self.textures.iter().map(|slot| slot.group))
            .chain(self.samplers.iter().map(|slot| slot.group))
            .max()
    }
}

pub(crate) fn parse_spirv(binary: &[u8]) -> Result<naga::Module, RenderError> {
    if binary.len() % 4 != 0 || binary.len() < 20 {
        return Err(RenderError::compile(format!(
            "compiled program is not SPIR-V ({} bytes)",
            binary.len()
        )));
    }
    naga::front::spv::parse_u8_slice(binary, &naga::front::spv::Options::default())
        .map_err(|err| RenderError::compile(format!("failed to parse SPIR-V: {err}")))
}

fn value_type(inner: &naga::TypeInner) -> ParameterType {
    use naga::{ScalarKind, TypeInner, VectorSize};

    match inner {
        TypeInner::Scalar(scalar) if scalar.kind == ScalarKind::Float && scalar.width == 4 => {
            ParameterType::Float
        }
        TypeInner::Vector { size, scalar }
            if scalar.kind == ScalarKind::Float && scalar.width == 4 =>
        {
            match size {
                VectorSize::Tri => ParameterType::Vec3,
                VectorSize::Quad => ParameterType::Vec4,
                VectorSize::Bi => ParameterType::Other("vec2".into()),
            }
        }
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar,
        } if scalar.kind == ScalarKind::Float && scalar.width == 4 => ParameterType::Matrix4,
        other => ParameterType::Other(format!("{other:?}")),
    }
}

fn image_kind(
    dim: naga::ImageDimension,
    arrayed: bool,
) -> Option<(ChannelKind, wgpu::TextureViewDimension)> {
    match (dim, arrayed) {
        (naga::ImageDimension::D2, false) => {
            Some((ChannelKind::Texture2d, wgpu::TextureViewDimension::D2))
        }
        (naga::ImageDimension::Cube, false) => {
            Some((ChannelKind::Cubemap, wgpu::TextureViewDimension::Cube))
        }
        (naga::ImageDimension::D3, _) => {
            Some((ChannelKind::Volume, wgpu::TextureViewDimension::D3))
        }
        _ => None,
    }
}

/// Collects parameters and resource slots from `module`.
pub(crate) fn reflect(module: &naga::Module) -> Result<Reflection, RenderError> {
    let mut reflection = Reflection::default();

    for (_, var) in module.global_variables.iter() {
        let Some(binding) = var.binding.as_ref() else {
            continue;
        };
        let inner = &module.types[var.ty].inner;
        match var.space {
            naga::AddressSpace::Uniform => {
                let naga::TypeInner::Struct { members, span } = inner else {
                    tracing::debug!(name = ?var.name, "skipping non-struct uniform");
                    continue;
                };
                let block = reflection.blocks.len();
                reflection.blocks.push(UniformBlock {
                    group: binding.group,
                    binding: binding.binding,
                    size: *span,
                });
                for member in members {
                    let Some(name) = member.name.clone() else {
                        continue;
                    };
                    reflection.params.push(ParameterDesc {
                        name,
                        ty: value_type(&module.types[member.ty].inner),
                    });
                    reflection.locations.push(ParamLocation::Uniform {
                        block,
                        offset: member.offset,
                    });
                }
            }
            naga::AddressSpace::Handle => match inner {
                naga::TypeInner::Image {
                    dim,
                    arrayed,
                    class: naga::ImageClass::Sampled { .. },
                } => {
                    let Some((kind, dimension)) = image_kind(*dim, *arrayed) else {
                        return Err(RenderError::compile(format!(
                            "texture {:?} uses an unsupported dimension {dim:?}",
                            var.name
                        )));
                    };
                    let slot = reflection.textures.len();
                    reflection.textures.push(TextureSlot {
                        group: binding.group,
                        binding: binding.binding,
                        dimension,
                    });
                    reflection.params.push(ParameterDesc {
                        name: var.name.clone().unwrap_or_else(|| format!("texture{slot}")),
                        ty: ParameterType::Texture(kind),
                    });
                    reflection.locations.push(ParamLocation::Texture { slot });
                }
                naga::TypeInner::Sampler { comparison: false } => {
                    reflection.samplers.push(SamplerSlot {
                        group: binding.group,
                        binding: binding.binding,
                    });
                }
                other => {
                    return Err(RenderError::compile(format!(
                        "resource {:?} has unsupported type {other:?}",
                        var.name
                    )));
                }
            },
            _ => {}
        }
    }

    reflection.fragment_entry_points = module
        .entry_points
        .iter()
        .filter(|entry| entry.stage == naga::ShaderStage::Fragment)
        .map(|entry| entry.name.clone())
        .collect();
    if reflection.fragment_entry_points.is_empty() {
        return Err(RenderError::compile("program has no fragment entry point"));
    }

    Ok(reflection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_spirv_payload() {
        let err = parse_spirv(b"definitely not spir-v").unwrap_err();
        assert!(matches!(err, RenderError::CompileFailed { .. }));
    }

    #[test]
    fn maps_float_types() {
        let scalar = naga::Scalar::F32;
        assert_eq!(value_type(&naga::TypeInner::Scalar(scalar)), ParameterType::Float);
        assert_eq!(
            value_type(&naga::TypeInner::Vector {
                size: naga::VectorSize::Tri,
                scalar
            }),
            ParameterType::Vec3
        );
        assert_eq!(
            value_type(&naga::TypeInner::Matrix {
                columns: naga::VectorSize::Quad,
                rows: naga::VectorSize::Quad,
                scalar
            }),
            ParameterType::Matrix4
        );
        assert!(matches!(
            value_type(&naga::TypeInner::Scalar(naga::Scalar::I32)),
            ParameterType::Other(_)
        ));
    }

    #[test]
    fn image_dimensions_map_to_channel_kinds() {
        assert_eq!(
            image_kind(naga::ImageDimension::Cube, false).map(|(kind, _)| kind),
            Some(ChannelKind::Cubemap)
        );
        assert_eq!(
            image_kind(naga::ImageDimension::D3, false).map(|(kind, _)| kind),
            Some(ChannelKind::Volume)
        );
        assert!(image_kind(naga::ImageDimension::D1, false).is_none());
    }
}
