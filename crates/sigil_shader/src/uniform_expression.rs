//! Uniform Expressions
//!
//! Uniform expressions are the small resolvers a translated material leaves
//! behind for values that change without recompiling: named parameters,
//! constants folded with them, and texture bindings. They are evaluated on
//! the render side against a [`ParameterSource`] (a render proxy chain) and
//! written into a uniform buffer whose layout is fixed per shader map.
//!
//! # Buffer Layout
//!
//! | Section   | Contents                                   | Stride      |
//! |-----------|--------------------------------------------|-------------|
//! | vectors   | one `vec4<f32>` per vector expression      | 16 bytes    |
//! | scalars   | scalar expressions packed four per `vec4`  | 16 bytes    |
//! | stacks    | two `vec4<u32>` per streaming stack        | 32 bytes    |
//! | textures  | one `u32` texture id per binding, packed   | 16 bytes    |

use glam::Vec4;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use sigil_core::TextureRef;
use sigil_core::hash::StableHasher;

use crate::description::TextureKind;

/// Maximum number of layers a streaming stack can bind.
pub const MAX_STREAMING_LAYERS: usize = 8;

/// Bytes of per-stack uniform data (page table + sampling parameters).
pub const STACK_UNIFORM_BYTES: u32 = 32;

/// Texture id written for a binding that resolved to nothing.
pub const NULL_TEXTURE_ID: u32 = u32::MAX;

/// Resolves named parameters during evaluation.
pub trait ParameterSource {
    fn scalar_value(&self, name: &str) -> Option<f32>;
    fn vector_value(&self, name: &str) -> Option<Vec4>;
    fn texture_value(&self, name: &str) -> Option<TextureRef>;

    /// Resolves an externally produced texture.
    fn external_texture(&self, _external_id: u64) -> Option<TextureRef> {
        None
    }
}

/// A numeric uniform expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UniformExpression {
    Constant([f32; 4]),
    ScalarParameter { name: String, default: f32 },
    VectorParameter { name: String, default: [f32; 4] },
    Add(Box<UniformExpression>, Box<UniformExpression>),
    Multiply(Box<UniformExpression>, Box<UniformExpression>),
    Saturate(Box<UniformExpression>),
}

impl UniformExpression {
    /// Evaluates to a vector; scalar results are splatted.
    #[must_use]
    pub fn evaluate(&self, source: &dyn ParameterSource) -> Vec4 {
        match self {
            Self::Constant(v) => Vec4::from_array(*v),
            Self::ScalarParameter { name, default } => {
                Vec4::splat(source.scalar_value(name).unwrap_or(*default))
            }
            Self::VectorParameter { name, default } => source
                .vector_value(name)
                .unwrap_or_else(|| Vec4::from_array(*default)),
            Self::Add(a, b) => a.evaluate(source) + b.evaluate(source),
            Self::Multiply(a, b) => a.evaluate(source) * b.evaluate(source),
            Self::Saturate(a) => a.evaluate(source).clamp(Vec4::ZERO, Vec4::ONE),
        }
    }

    /// Names of the parameters this expression reads.
    pub fn parameter_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Constant(_) => {}
            Self::ScalarParameter { name, .. } | Self::VectorParameter { name, .. } => {
                out.push(name);
            }
            Self::Add(a, b) | Self::Multiply(a, b) => {
                a.parameter_names(out);
                b.parameter_names(out);
            }
            Self::Saturate(a) => a.parameter_names(out),
        }
    }
}

/// A texture binding, optionally overridable through a named parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureExpression {
    pub parameter: Option<String>,
    pub default: TextureRef,
    pub kind: TextureKind,
}

impl TextureExpression {
    #[must_use]
    pub fn evaluate(&self, source: &dyn ParameterSource) -> TextureRef {
        self.parameter
            .as_deref()
            .and_then(|name| source.texture_value(name))
            .unwrap_or(self.default)
    }
}

/// A binding to an externally produced texture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTextureExpression {
    pub external_id: u64,
}

/// Layers virtually bound behind one GPU handle.
///
/// Layer entries index into the set's streaming texture expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingTextureStack {
    layers: SmallVec<[u32; MAX_STREAMING_LAYERS]>,
    /// Streaming texture expression that supplies an already allocated stack.
    preallocated: Option<u32>,
}

impl StreamingTextureStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A stack adopted from a runtime-produced texture instead of allocated.
    #[must_use]
    pub fn preallocated(expression_index: u32) -> Self {
        let mut stack = Self::new();
        stack.layers.push(expression_index);
        stack.preallocated = Some(expression_index);
        stack
    }

    /// Appends a layer, returning its index, or `None` when the stack is full.
    pub fn add_layer(&mut self, expression_index: u32) -> Option<u32> {
        if self.layers.len() >= MAX_STREAMING_LAYERS {
            return None;
        }
        self.layers.push(expression_index);
        Some((self.layers.len() - 1) as u32)
    }

    /// Replaces the expression bound at `layer`, growing the stack if needed.
    pub fn set_layer(&mut self, layer: u32, expression_index: u32) {
        let layer = layer as usize;
        assert!(layer < MAX_STREAMING_LAYERS, "streaming layer {layer} out of range");
        if layer >= self.layers.len() {
            self.layers.resize(layer + 1, expression_index);
        }
        self.layers[layer] = expression_index;
    }

    #[must_use]
    pub fn find_layer(&self, expression_index: u32) -> Option<u32> {
        self.layers
            .iter()
            .position(|&e| e == expression_index)
            .map(|p| p as u32)
    }

    #[inline]
    #[must_use]
    pub fn layers(&self) -> &[u32] {
        &self.layers
    }

    #[inline]
    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    #[must_use]
    pub fn preallocated_expression(&self) -> Option<u32> {
        self.preallocated
    }
}

/// Byte offsets of each section of the uniform buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniformBufferLayout {
    pub vector_offset: u32,
    pub scalar_offset: u32,
    pub stack_offset: u32,
    pub texture_offset: u32,
    pub size: u32,
}

impl UniformBufferLayout {
    #[must_use]
    pub fn stable_hash(&self) -> u128 {
        let mut hasher = StableHasher::new();
        hasher
            .write_u32(self.vector_offset)
            .write_u32(self.scalar_offset)
            .write_u32(self.stack_offset)
            .write_u32(self.texture_offset)
            .write_u32(self.size);
        hasher.finish128()
    }
}

/// Everything the render side evaluates per proxy for one shader map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniformExpressionSet {
    pub vectors: Vec<UniformExpression>,
    pub scalars: Vec<UniformExpression>,
    pub textures_2d: Vec<TextureExpression>,
    pub textures_cube: Vec<TextureExpression>,
    pub textures_volume: Vec<TextureExpression>,
    pub textures_streaming: Vec<TextureExpression>,
    pub external_textures: Vec<ExternalTextureExpression>,
    pub streaming_stacks: Vec<StreamingTextureStack>,
    /// Parameter collection ids referenced by the material.
    pub parameter_collections: Vec<u64>,
}

impl UniformExpressionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vector expression, reusing an identical existing one.
    pub fn add_vector(&mut self, expression: UniformExpression) -> u32 {
        push_unique(&mut self.vectors, expression)
    }

    pub fn add_scalar(&mut self, expression: UniformExpression) -> u32 {
        push_unique(&mut self.scalars, expression)
    }

    pub fn add_texture(&mut self, expression: TextureExpression) -> u32 {
        let list = match expression.kind {
            TextureKind::Texture2D => &mut self.textures_2d,
            TextureKind::Cube => &mut self.textures_cube,
            TextureKind::Volume => &mut self.textures_volume,
            TextureKind::Streaming => &mut self.textures_streaming,
        };
        push_unique(list, expression)
    }

    pub fn add_external_texture(&mut self, external_id: u64) -> u32 {
        push_unique(
            &mut self.external_textures,
            ExternalTextureExpression { external_id },
        )
    }

    #[must_use]
    pub fn textures(&self, kind: TextureKind) -> &[TextureExpression] {
        match kind {
            TextureKind::Texture2D => &self.textures_2d,
            TextureKind::Cube => &self.textures_cube,
            TextureKind::Volume => &self.textures_volume,
            TextureKind::Streaming => &self.textures_streaming,
        }
    }

    fn num_texture_slots(&self) -> usize {
        self.textures_2d.len()
            + self.textures_cube.len()
            + self.textures_volume.len()
            + self.textures_streaming.len()
            + self.external_textures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
            && self.scalars.is_empty()
            && self.num_texture_slots() == 0
            && self.streaming_stacks.is_empty()
    }

    /// Layout of the uniform buffer this set fills.
    #[must_use]
    pub fn layout(&self) -> UniformBufferLayout {
        let vector_offset = 0;
        let scalar_offset = vector_offset + self.vectors.len() as u32 * 16;
        let stack_offset = scalar_offset + self.scalars.len().div_ceil(4) as u32 * 16;
        let texture_offset =
            stack_offset + self.streaming_stacks.len() as u32 * STACK_UNIFORM_BYTES;
        let size = texture_offset + self.num_texture_slots().div_ceil(4) as u32 * 16;
        UniformBufferLayout {
            vector_offset,
            scalar_offset,
            stack_offset,
            texture_offset,
            size,
        }
    }

    /// Evaluates every expression into `out`.
    ///
    /// `stack_uniforms` holds the per-stack data produced by the streaming
    /// allocator, one entry per stack in order. `out` must be exactly
    /// `layout().size` bytes.
    pub fn fill_uniform_buffer(
        &self,
        source: &dyn ParameterSource,
        stack_uniforms: &[[u32; 8]],
        out: &mut [u8],
    ) {
        let layout = self.layout();
        assert_eq!(
            out.len(),
            layout.size as usize,
            "uniform buffer size does not match expression set layout"
        );
        assert_eq!(
            stack_uniforms.len(),
            self.streaming_stacks.len(),
            "one uniform block is required per streaming stack"
        );

        let mut offset = layout.vector_offset as usize;
        for expression in &self.vectors {
            let value = expression.evaluate(source);
            out[offset..offset + 16].copy_from_slice(bytemuck::bytes_of(&value));
            offset += 16;
        }

        let mut offset = layout.scalar_offset as usize;
        for expression in &self.scalars {
            let value = expression.evaluate(source).x;
            out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            offset += 4;
        }

        let mut offset = layout.stack_offset as usize;
        for block in stack_uniforms {
            out[offset..offset + STACK_UNIFORM_BYTES as usize]
                .copy_from_slice(bytemuck::cast_slice::<u32, u8>(block.as_slice()));
            offset += STACK_UNIFORM_BYTES as usize;
        }

        let mut offset = layout.texture_offset as usize;
        let texture_ids = self
            .textures_2d
            .iter()
            .chain(&self.textures_cube)
            .chain(&self.textures_volume)
            .chain(&self.textures_streaming)
            .map(|t| t.evaluate(source).0)
            .chain(self.external_textures.iter().map(|e| {
                source
                    .external_texture(e.external_id)
                    .map_or(NULL_TEXTURE_ID, |t| t.0)
            }));
        for id in texture_ids {
            out[offset..offset + 4].copy_from_slice(&id.to_le_bytes());
            offset += 4;
        }
    }

    /// One-line summary for debug dumps.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "vectors={} scalars={} tex2d={} cube={} volume={} streaming={} external={} stacks={} collections={}",
            self.vectors.len(),
            self.scalars.len(),
            self.textures_2d.len(),
            self.textures_cube.len(),
            self.textures_volume.len(),
            self.textures_streaming.len(),
            self.external_textures.len(),
            self.streaming_stacks.len(),
            self.parameter_collections.len()
        )
    }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) -> u32 {
    if let Some(idx) = list.iter().position(|e| *e == item) {
        return idx as u32;
    }
    list.push(item);
    (list.len() - 1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    #[derive(Default)]
    struct Params {
        scalars: FxHashMap<String, f32>,
        vectors: FxHashMap<String, Vec4>,
        textures: FxHashMap<String, TextureRef>,
    }

    impl ParameterSource for Params {
        fn scalar_value(&self, name: &str) -> Option<f32> {
            self.scalars.get(name).copied()
        }
        fn vector_value(&self, name: &str) -> Option<Vec4> {
            self.vectors.get(name).copied()
        }
        fn texture_value(&self, name: &str) -> Option<TextureRef> {
            self.textures.get(name).copied()
        }
    }

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_layout_sections() {
        let mut set = UniformExpressionSet::new();
        set.add_vector(UniformExpression::Constant([1.0; 4]));
        for i in 0..5 {
            set.add_scalar(UniformExpression::ScalarParameter {
                name: format!("S{i}"),
                default: 0.0,
            });
        }
        set.streaming_stacks.push(StreamingTextureStack::new());
        set.add_texture(TextureExpression {
            parameter: None,
            default: TextureRef(3),
            kind: TextureKind::Texture2D,
        });

        let layout = set.layout();
        assert_eq!(layout.scalar_offset, 16);
        assert_eq!(layout.stack_offset, 16 + 32);
        assert_eq!(layout.texture_offset, 48 + 32);
        assert_eq!(layout.size, 80 + 16);
    }

    #[test]
    fn test_identical_expressions_deduplicated() {
        let mut set = UniformExpressionSet::new();
        let a = set.add_scalar(UniformExpression::ScalarParameter {
            name: "Rough".into(),
            default: 0.5,
        });
        let b = set.add_scalar(UniformExpression::ScalarParameter {
            name: "Rough".into(),
            default: 0.5,
        });
        assert_eq!(a, b);
        assert_eq!(set.scalars.len(), 1);
    }

    #[test]
    fn test_fill_uses_overrides_then_defaults() {
        let mut set = UniformExpressionSet::new();
        set.add_vector(UniformExpression::Multiply(
            Box::new(UniformExpression::VectorParameter {
                name: "Tint".into(),
                default: [1.0; 4],
            }),
            Box::new(UniformExpression::ScalarParameter {
                name: "Brightness".into(),
                default: 2.0,
            }),
        ));
        set.add_scalar(UniformExpression::ScalarParameter {
            name: "Rough".into(),
            default: 0.25,
        });
        set.add_texture(TextureExpression {
            parameter: Some("Albedo".into()),
            default: TextureRef(1),
            kind: TextureKind::Texture2D,
        });

        let mut params = Params::default();
        params
            .vectors
            .insert("Tint".into(), Vec4::new(0.5, 0.5, 0.5, 1.0));
        params.textures.insert("Albedo".into(), TextureRef(9));

        let layout = set.layout();
        let mut bytes = vec![0u8; layout.size as usize];
        set.fill_uniform_buffer(&params, &[], &mut bytes);

        assert_eq!(read_f32(&bytes, 0), 1.0);
        assert_eq!(read_f32(&bytes, 12), 2.0);
        assert_eq!(read_f32(&bytes, layout.scalar_offset as usize), 0.25);
        assert_eq!(read_u32(&bytes, layout.texture_offset as usize), 9);
    }

    #[test]
    fn test_stack_layer_bookkeeping() {
        let mut stack = StreamingTextureStack::new();
        for i in 0..MAX_STREAMING_LAYERS as u32 {
            assert_eq!(stack.add_layer(i * 10), Some(i));
        }
        assert_eq!(stack.add_layer(99), None);
        assert_eq!(stack.find_layer(30), Some(3));
        stack.set_layer(3, 77);
        assert_eq!(stack.find_layer(77), Some(3));
        assert_eq!(stack.find_layer(30), None);
    }

    #[test]
    fn test_saturate_clamps() {
        let expr = UniformExpression::Saturate(Box::new(UniformExpression::Constant([
            -1.0, 0.5, 2.0, 1.0,
        ])));
        let v = expr.evaluate(&Params::default());
        assert_eq!(v, Vec4::new(0.0, 0.5, 1.0, 1.0));
    }
}
