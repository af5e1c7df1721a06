//! Backend-neutral view of a compiled shader program.

use crate::error::RenderError;
use crate::types::ChannelKind;

/// Reflected type of a program parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParameterType {
    Float,
    Vec3,
    Vec4,
    Matrix4,
    Texture(ChannelKind),
    /// Anything the binder never assigns (ints, arrays, nested structs...).
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterDesc {
    pub name: String,
    pub ty: ParameterType,
}

/// Position of a parameter inside its program's [`ParameterSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParameterIndex(pub usize);

/// Parameters a program declares, in reflection order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterSet {
    params: Vec<ParameterDesc>,
}

impl ParameterSet {
    pub fn new(params: Vec<ParameterDesc>) -> Self {
        Self { params }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParameterIndex, &ParameterDesc)> {
        self.params
            .iter()
            .enumerate()
            .map(|(index, desc)| (ParameterIndex(index), desc))
    }

    pub fn get(&self, index: ParameterIndex) -> Option<&ParameterDesc> {
        self.params.get(index.0)
    }

    pub fn index_of(&self, name: &str) -> Option<ParameterIndex> {
        self.params
            .iter()
            .position(|desc| desc.name == name)
            .map(ParameterIndex)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }
}

/// A value handed to [`ShaderProgram::assign`].
#[derive(Debug)]
pub enum ParameterValue<'a, T> {
    Float(f32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Matrix4([[f32; 4]; 4]),
    Texture(&'a T),
}

impl<T> ParameterValue<'_, T> {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Float(_) => "float",
            ParameterValue::Vec3(_) => "vec3",
            ParameterValue::Vec4(_) => "vec4",
            ParameterValue::Matrix4(_) => "mat4",
            ParameterValue::Texture(_) => "texture",
        }
    }
}

/// One rendering pass; the backend knows how to apply it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pass {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Technique {
    pub name: String,
    pub passes: Vec<Pass>,
}

/// A loaded program whose parameter values can be set between draws.
pub trait ShaderProgram {
    type Texture;

    fn parameters(&self) -> &ParameterSet;

    fn techniques(&self) -> &[Technique];

    /// Sets a declared parameter. Assigning an index the program does not
    /// declare, or a value of the wrong type, is a [`RenderError::Binding`].
    fn assign(
        &mut self,
        index: ParameterIndex,
        value: ParameterValue<'_, Self::Texture>,
    ) -> Result<(), RenderError>;
}

/// Checks that `value` fits the parameter at `index`; shared by backends.
pub fn check_assignment<T>(
    params: &ParameterSet,
    index: ParameterIndex,
    value: &ParameterValue<'_, T>,
) -> Result<(), RenderError> {
    let desc = params
        .get(index)
        .ok_or_else(|| RenderError::Binding(format!("no parameter at index {}", index.0)))?;
    let fits = matches!(
        (&desc.ty, value),
        (ParameterType::Float, ParameterValue::Float(_))
            | (ParameterType::Vec3, ParameterValue::Vec3(_))
            | (ParameterType::Vec4, ParameterValue::Vec4(_))
            | (ParameterType::Matrix4, ParameterValue::Matrix4(_))
            | (ParameterType::Texture(_), ParameterValue::Texture(_))
    );
    if fits {
        Ok(())
    } else {
        Err(RenderError::Binding(format!(
            "parameter '{}' has type {:?}, cannot assign {}",
            desc.name,
            desc.ty,
            value.type_name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParameterSet {
        ParameterSet::new(vec![
            ParameterDesc {
                name: "Time".into(),
                ty: ParameterType::Float,
            },
            ParameterDesc {
                name: "Channel0".into(),
                ty: ParameterType::Texture(ChannelKind::Texture2d),
            },
        ])
    }

    #[test]
    fn lookup_by_name() {
        let params = sample();
        assert_eq!(params.index_of("Channel0"), Some(ParameterIndex(1)));
        assert!(!params.contains("Resolution"));
    }

    #[test]
    fn mismatched_or_unknown_assignment_is_a_binding_error() {
        let params = sample();
        let ok = check_assignment::<()>(&params, ParameterIndex(0), &ParameterValue::Float(1.0));
        assert!(ok.is_ok());

        let wrong =
            check_assignment::<()>(&params, ParameterIndex(0), &ParameterValue::Vec3([0.0; 3]));
        assert!(matches!(wrong, Err(RenderError::Binding(_))));

        let missing =
            check_assignment::<()>(&params, ParameterIndex(7), &ParameterValue::Float(1.0));
        assert!(matches!(missing, Err(RenderError::Binding(_))));
    }
}
