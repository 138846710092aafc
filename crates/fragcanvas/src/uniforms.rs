//! Registry of every named shader input the engine knows about.
//!
//! Built-ins (`iTime`, `iMouse`, ...) are seeded on construction, custom
//! inputs are classified from caller-supplied `{type, value}` pairs, and the
//! texture inputs (`iChannelN`, `iChannelResolution`) are added once the
//! texture list is known. The preprocessor flips `needed` on for every name
//! the fragment source mentions; only needed inputs ever reach the GPU.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    UNIFORM_CHANNEL_PREFIX, UNIFORM_CHANNEL_RESOLUTION, UNIFORM_DATE, UNIFORM_DEVICE_ORIENTATION,
    UNIFORM_FRAME, UNIFORM_MOUSE, UNIFORM_RESOLUTION, UNIFORM_TIME, UNIFORM_TIME_DELTA,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UniformError {
    #[error("the uniform type \"{0}\" is not valid, please make sure your uniform type is valid")]
    UnknownType(String),
    #[error("type {tag} expects a single number")]
    ExpectedNumber { tag: &'static str },
    #[error("type {tag} expects a list of values")]
    ExpectedList { tag: &'static str },
    #[error("type {tag} needs at least {expected} values, got {actual}")]
    TooShort {
        tag: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("the name collides with a built-in input")]
    Reserved,
    #[error("no custom uniform is registered under this name")]
    NotCustom,
    #[error("new value changes the declaration from `{from}` to `{to}`")]
    DeclarationChanged { from: String, to: String },
}

/// Component type of a uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Float,
    Int,
}

/// Semantic type of an input, parsed from the caller's tag strings
/// (`1f`, `3iv`, `Matrix4fv`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    /// `1f` / `1i`
    Scalar(ScalarKind),
    /// `2f`..`4f`, `2i`..`4i`
    Vector(ScalarKind, u8),
    /// `1fv`..`4fv`, `1iv`..`4iv`
    VectorArray(ScalarKind, u8),
    /// `Matrix2fv`..`Matrix4fv`
    Matrix(u8),
    Sampler2D,
}

impl UniformType {
    pub fn tag(self) -> &'static str {
        use ScalarKind::{Float, Int};
        match self {
            UniformType::Scalar(Float) => "1f",
            UniformType::Scalar(Int) => "1i",
            UniformType::Vector(Float, 2) => "2f",
            UniformType::Vector(Float, 3) => "3f",
            UniformType::Vector(Float, _) => "4f",
            UniformType::Vector(Int, 2) => "2i",
            UniformType::Vector(Int, 3) => "3i",
            UniformType::Vector(Int, _) => "4i",
            UniformType::VectorArray(Float, 1) => "1fv",
            UniformType::VectorArray(Float, 2) => "2fv",
            UniformType::VectorArray(Float, 3) => "3fv",
            UniformType::VectorArray(Float, _) => "4fv",
            UniformType::VectorArray(Int, 1) => "1iv",
            UniformType::VectorArray(Int, 2) => "2iv",
            UniformType::VectorArray(Int, 3) => "3iv",
            UniformType::VectorArray(Int, _) => "4iv",
            UniformType::Matrix(2) => "Matrix2fv",
            UniformType::Matrix(3) => "Matrix3fv",
            UniformType::Matrix(_) => "Matrix4fv",
            UniformType::Sampler2D => "sampler2D",
        }
    }

    pub fn glsl_type(self) -> &'static str {
        use ScalarKind::{Float, Int};
        match self {
            UniformType::Scalar(Float) | UniformType::VectorArray(Float, 1) => "float",
            UniformType::Scalar(Int) | UniformType::VectorArray(Int, 1) => "int",
            UniformType::Vector(Float, 2) | UniformType::VectorArray(Float, 2) => "vec2",
            UniformType::Vector(Float, 3) | UniformType::VectorArray(Float, 3) => "vec3",
            UniformType::Vector(Float, _) | UniformType::VectorArray(Float, _) => "vec4",
            UniformType::Vector(Int, 2) | UniformType::VectorArray(Int, 2) => "ivec2",
            UniformType::Vector(Int, 3) | UniformType::VectorArray(Int, 3) => "ivec3",
            UniformType::Vector(Int, _) | UniformType::VectorArray(Int, _) => "ivec4",
            UniformType::Matrix(2) => "mat2",
            UniformType::Matrix(3) => "mat3",
            UniformType::Matrix(_) => "mat4",
            UniformType::Sampler2D => "sampler2D",
        }
    }

    /// Floats consumed by one element of this type.
    pub fn element_len(self) -> usize {
        match self {
            UniformType::Scalar(_) | UniformType::Sampler2D => 1,
            UniformType::Vector(_, n) | UniformType::VectorArray(_, n) => n as usize,
            UniformType::Matrix(n) => (n as usize) * (n as usize),
        }
    }

    pub fn scalar_kind(self) -> ScalarKind {
        match self {
            UniformType::Scalar(kind)
            | UniformType::Vector(kind, _)
            | UniformType::VectorArray(kind, _) => kind,
            UniformType::Matrix(_) => ScalarKind::Float,
            UniformType::Sampler2D => ScalarKind::Int,
        }
    }
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for UniformType {
    type Err = UniformError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        use ScalarKind::{Float, Int};
        let parsed = match tag {
            "1f" => UniformType::Scalar(Float),
            "1i" => UniformType::Scalar(Int),
            "2f" => UniformType::Vector(Float, 2),
            "3f" => UniformType::Vector(Float, 3),
            "4f" => UniformType::Vector(Float, 4),
            "2i" => UniformType::Vector(Int, 2),
            "3i" => UniformType::Vector(Int, 3),
            "4i" => UniformType::Vector(Int, 4),
            "1fv" => UniformType::VectorArray(Float, 1),
            "2fv" => UniformType::VectorArray(Float, 2),
            "3fv" => UniformType::VectorArray(Float, 3),
            "4fv" => UniformType::VectorArray(Float, 4),
            "1iv" => UniformType::VectorArray(Int, 1),
            "2iv" => UniformType::VectorArray(Int, 2),
            "3iv" => UniformType::VectorArray(Int, 3),
            "4iv" => UniformType::VectorArray(Int, 4),
            "Matrix2fv" => UniformType::Matrix(2),
            "Matrix3fv" => UniformType::Matrix(3),
            "Matrix4fv" => UniformType::Matrix(4),
            other => return Err(UniformError::UnknownType(other.to_string())),
        };
        Ok(parsed)
    }
}

/// Raw value as the caller writes it: a bare number or a flat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniformInput {
    Number(f32),
    List(Vec<f32>),
}

impl From<f32> for UniformInput {
    fn from(value: f32) -> Self {
        UniformInput::Number(value)
    }
}

impl From<Vec<f32>> for UniformInput {
    fn from(value: Vec<f32>) -> Self {
        UniformInput::List(value)
    }
}

impl<const N: usize> From<[f32; N]> for UniformInput {
    fn from(value: [f32; N]) -> Self {
        UniformInput::List(value.to_vec())
    }
}

/// A caller-declared input before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomUniform {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: UniformInput,
}

impl CustomUniform {
    pub fn new(type_tag: impl Into<String>, value: impl Into<UniformInput>) -> Self {
        Self {
            type_tag: type_tag.into(),
            value: value.into(),
        }
    }
}

/// Classified value. The variant, not the runtime shape of the data, says
/// how the value is declared and bound.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Scalar(f32),
    FixedVector(Vec<f32>),
    FixedMatrix(Vec<f32>),
    VectorArray(Vec<f32>),
    MatrixArray(Vec<f32>),
    /// Texture unit the sampler reads from.
    Sampler(u32),
}

impl UniformValue {
    pub fn components(&self) -> Cow<'_, [f32]> {
        match self {
            UniformValue::Scalar(value) => Cow::Owned(vec![*value]),
            UniformValue::FixedVector(values)
            | UniformValue::FixedMatrix(values)
            | UniformValue::VectorArray(values)
            | UniformValue::MatrixArray(values) => Cow::Borrowed(values),
            UniformValue::Sampler(unit) => Cow::Owned(vec![*unit as f32]),
        }
    }
}

/// Classifies a caller value against its declared type, deriving the array
/// size for list types. Lengths that do not divide evenly are truncated to
/// the last whole element.
pub fn classify(
    ty: UniformType,
    input: &UniformInput,
) -> Result<(UniformValue, Option<usize>), UniformError> {
    let tag = ty.tag();
    let element = ty.element_len();
    let list = match (ty, input) {
        (UniformType::Scalar(_), UniformInput::Number(value)) => {
            return Ok((UniformValue::Scalar(*value), None));
        }
        (UniformType::Scalar(_), UniformInput::List(values)) if values.len() == 1 => {
            return Ok((UniformValue::Scalar(values[0]), None));
        }
        (UniformType::Scalar(_), UniformInput::List(_)) => {
            return Err(UniformError::ExpectedNumber { tag });
        }
        (UniformType::VectorArray(_, 1), UniformInput::Number(value)) => {
            return Ok((UniformValue::FixedVector(vec![*value]), None));
        }
        (_, UniformInput::Number(_)) => return Err(UniformError::ExpectedList { tag }),
        (_, UniformInput::List(values)) => values,
    };

    if list.len() < element {
        return Err(UniformError::TooShort {
            tag,
            expected: element,
            actual: list.len(),
        });
    }

    let classified = match ty {
        UniformType::Vector(_, _) => (UniformValue::FixedVector(list[..element].to_vec()), None),
        UniformType::VectorArray(_, _) if list.len() > element => {
            let count = list.len() / element;
            (
                UniformValue::VectorArray(list[..count * element].to_vec()),
                Some(count),
            )
        }
        UniformType::VectorArray(_, _) => (UniformValue::FixedVector(list.clone()), None),
        UniformType::Matrix(_) if list.len() > element => {
            let count = list.len() / element;
            (
                UniformValue::MatrixArray(list[..count * element].to_vec()),
                Some(count),
            )
        }
        UniformType::Matrix(_) => (UniformValue::FixedMatrix(list.clone()), None),
        UniformType::Scalar(_) | UniformType::Sampler2D => {
            return Err(UniformError::UnknownType(tag.to_string()));
        }
    };
    Ok(classified)
}

/// One GPU upload, already shaped for the matching `glUniform*` entry point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformUpload<'a> {
    Float(f32),
    Int(i32),
    FloatVector { size: u8, data: &'a [f32] },
    IntVector { size: u8, data: &'a [i32] },
    Matrix { dimension: u8, data: &'a [f32] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformOrigin {
    BuiltIn,
    Custom,
    Texture,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformSpec {
    pub name: String,
    pub ty: UniformType,
    pub value: UniformValue,
    pub array_size: Option<usize>,
    pub needed: bool,
    pub origin: UniformOrigin,
}

impl UniformSpec {
    fn new(name: &str, ty: UniformType, value: UniformValue, origin: UniformOrigin) -> Self {
        Self {
            name: name.to_string(),
            ty,
            value,
            array_size: None,
            needed: false,
            origin,
        }
    }

    /// The line the preprocessor injects, e.g. `uniform vec3 iChannelResolution[2];`.
    pub fn declaration(&self) -> String {
        match self.array_size {
            Some(size) => format!("uniform {} {}[{}];", self.ty.glsl_type(), self.name, size),
            None => format!("uniform {} {};", self.ty.glsl_type(), self.name),
        }
    }

    /// Hands the value to `bind` in the shape its type calls for.
    pub fn with_upload<R>(&self, bind: impl FnOnce(UniformUpload<'_>) -> R) -> R {
        if let UniformValue::Sampler(unit) = self.value {
            return bind(UniformUpload::Int(unit as i32));
        }
        let components = self.value.components();
        match (self.ty, &self.value) {
            (UniformType::Scalar(ScalarKind::Float), UniformValue::Scalar(value)) => {
                bind(UniformUpload::Float(*value))
            }
            (UniformType::Scalar(ScalarKind::Int), UniformValue::Scalar(value)) => {
                bind(UniformUpload::Int(*value as i32))
            }
            (UniformType::Matrix(dimension), _) => bind(UniformUpload::Matrix {
                dimension,
                data: &components,
            }),
            (ty, _) => {
                let size = ty.element_len() as u8;
                match ty.scalar_kind() {
                    ScalarKind::Float => bind(UniformUpload::FloatVector {
                        size,
                        data: &components,
                    }),
                    ScalarKind::Int => {
                        let ints: Vec<i32> = components.iter().map(|v| *v as i32).collect();
                        bind(UniformUpload::IntVector { size, data: &ints })
                    }
                }
            }
        }
    }
}

/// Stable handle into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformId(usize);

impl UniformId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handles of the seven built-in inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinIds {
    pub time: UniformId,
    pub time_delta: UniformId,
    pub date: UniformId,
    pub mouse: UniformId,
    pub resolution: UniformId,
    pub frame: UniformId,
    pub device_orientation: UniformId,
}

/// Handles of the inputs created for a texture list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureUniformIds {
    pub resolution: UniformId,
    pub channels: Vec<UniformId>,
}

#[derive(Debug, Clone)]
pub struct UniformRegistry {
    specs: Vec<UniformSpec>,
    index: HashMap<String, UniformId>,
    builtins: BuiltinIds,
}

impl UniformRegistry {
    pub fn new() -> Self {
        use ScalarKind::{Float, Int};
        let mut specs = Vec::new();
        let mut index = HashMap::new();
        let mut seed = |name: &str, ty: UniformType, value: UniformValue| {
            let id = UniformId(specs.len());
            specs.push(UniformSpec::new(name, ty, value, UniformOrigin::BuiltIn));
            index.insert(name.to_string(), id);
            id
        };
        let vec4 = || UniformValue::FixedVector(vec![0.0; 4]);

        let builtins = BuiltinIds {
            time: seed(UNIFORM_TIME, UniformType::Scalar(Float), UniformValue::Scalar(0.0)),
            time_delta: seed(
                UNIFORM_TIME_DELTA,
                UniformType::Scalar(Float),
                UniformValue::Scalar(0.0),
            ),
            date: seed(UNIFORM_DATE, UniformType::Vector(Float, 4), vec4()),
            mouse: seed(UNIFORM_MOUSE, UniformType::Vector(Float, 4), vec4()),
            resolution: seed(
                UNIFORM_RESOLUTION,
                UniformType::Vector(Float, 2),
                UniformValue::FixedVector(vec![0.0; 2]),
            ),
            frame: seed(UNIFORM_FRAME, UniformType::Scalar(Int), UniformValue::Scalar(0.0)),
            device_orientation: seed(
                UNIFORM_DEVICE_ORIENTATION,
                UniformType::Vector(Float, 4),
                vec4(),
            ),
        };

        Self {
            specs,
            index,
            builtins,
        }
    }

    pub fn builtins(&self) -> BuiltinIds {
        self.builtins
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<UniformId> {
        self.index.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&UniformSpec> {
        self.lookup(name).map(|id| &self.specs[id.0])
    }

    pub fn get(&self, id: UniformId) -> &UniformSpec {
        &self.specs[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (UniformId, &UniformSpec)> {
        self.specs
            .iter()
            .enumerate()
            .map(|(index, spec)| (UniformId(index), spec))
    }

    pub fn needed(&self) -> impl Iterator<Item = (UniformId, &UniformSpec)> {
        self.iter().filter(|(_, spec)| spec.needed)
    }

    pub fn is_needed(&self, id: UniformId) -> bool {
        self.specs[id.0].needed
    }

    pub(crate) fn mark_needed(&mut self, id: UniformId) {
        self.specs[id.0].needed = true;
    }

    pub(crate) fn set_value(&mut self, id: UniformId, value: UniformValue) {
        self.specs[id.0].value = value;
    }

    /// Overwrites one component of a vector-shaped value; out-of-range
    /// indices are ignored.
    pub(crate) fn set_component(&mut self, id: UniformId, component: usize, value: f32) {
        match &mut self.specs[id.0].value {
            UniformValue::FixedVector(values)
            | UniformValue::FixedMatrix(values)
            | UniformValue::VectorArray(values)
            | UniformValue::MatrixArray(values) => {
                if let Some(slot) = values.get_mut(component) {
                    *slot = value;
                }
            }
            UniformValue::Scalar(slot) if component == 0 => *slot = value,
            UniformValue::Scalar(_) | UniformValue::Sampler(_) => {}
        }
    }

    fn is_reserved(&self, name: &str) -> bool {
        if self
            .specs
            .iter()
            .any(|spec| spec.origin != UniformOrigin::Custom && spec.name == name)
        {
            return true;
        }
        if name == UNIFORM_CHANNEL_RESOLUTION {
            return true;
        }
        name.strip_prefix(UNIFORM_CHANNEL_PREFIX)
            .map(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    }

    /// Classifies and registers a caller-declared input.
    pub fn add_custom(
        &mut self,
        name: &str,
        uniform: &CustomUniform,
    ) -> Result<UniformId, UniformError> {
        if self.is_reserved(name) {
            return Err(UniformError::Reserved);
        }
        let ty: UniformType = uniform.type_tag.parse()?;
        let (value, array_size) = classify(ty, &uniform.value)?;
        let mut spec = UniformSpec::new(name, ty, value, UniformOrigin::Custom);
        spec.array_size = array_size;

        if let Some(id) = self.lookup(name) {
            self.specs[id.0] = spec;
            return Ok(id);
        }
        let id = UniformId(self.specs.len());
        self.specs.push(spec);
        self.index.insert(name.to_string(), id);
        Ok(id)
    }

    /// Replaces a custom input's value. The new value must keep the
    /// declaration the shader was compiled with.
    pub fn set_custom_value(&mut self, name: &str, input: &UniformInput) -> Result<(), UniformError> {
        let id = self.lookup(name).ok_or(UniformError::NotCustom)?;
        let spec = &mut self.specs[id.0];
        if spec.origin != UniformOrigin::Custom {
            return Err(UniformError::NotCustom);
        }
        let (value, array_size) = classify(spec.ty, input)?;
        if array_size != spec.array_size
            || std::mem::discriminant(&value) != std::mem::discriminant(&spec.value)
        {
            let mut candidate = spec.clone();
            candidate.array_size = array_size;
            return Err(UniformError::DeclarationChanged {
                from: spec.declaration(),
                to: candidate.declaration(),
            });
        }
        spec.value = value;
        Ok(())
    }

    /// Adds `iChannelResolution` (one vec3 per texture) and one sampler per
    /// texture index. Returns `None` when there are no textures.
    pub fn register_textures(&mut self, count: usize) -> Option<TextureUniformIds> {
        if count == 0 {
            return None;
        }
        let resolution = self.push(UniformSpec {
            array_size: Some(count),
            ..UniformSpec::new(
                UNIFORM_CHANNEL_RESOLUTION,
                UniformType::VectorArray(ScalarKind::Float, 3),
                UniformValue::VectorArray(vec![0.0; count * 3]),
                UniformOrigin::Texture,
            )
        });
        let channels = (0..count)
            .map(|unit| {
                let name = format!("{UNIFORM_CHANNEL_PREFIX}{unit}");
                self.push(UniformSpec::new(
                    &name,
                    UniformType::Sampler2D,
                    UniformValue::Sampler(unit as u32),
                    UniformOrigin::Texture,
                ))
            })
            .collect();
        Some(TextureUniformIds {
            resolution,
            channels,
        })
    }

    /// Writes `[width * dpr, height * dpr, 0]` into the vec3 slot for `channel`.
    pub(crate) fn set_channel_resolution(
        &mut self,
        resolution: UniformId,
        channel: usize,
        width: u32,
        height: u32,
        device_pixel_ratio: f64,
    ) {
        let base = channel * 3;
        self.set_component(resolution, base, (width as f64 * device_pixel_ratio) as f32);
        self.set_component(resolution, base + 1, (height as f64 * device_pixel_ratio) as f32);
        self.set_component(resolution, base + 2, 0.0);
    }

    fn push(&mut self, spec: UniformSpec) -> UniformId {
        if let Some(id) = self.lookup(&spec.name) {
            self.specs[id.0] = spec;
            return id;
        }
        let id = UniformId(self.specs.len());
        self.index.insert(spec.name.clone(), id);
        self.specs.push(spec);
        id
    }
}

impl Default for UniformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
