//! Shading Descriptions
//!
//! A [`MaterialDescription`] is the authored, declarative input of the
//! pipeline: a node graph producing material attributes, the static switch
//! defaults, the referenced textures and a handful of fixed-function states.
//!
//! Descriptions are owned by the caller and treated as immutable for the
//! duration of one compile; the pipeline shares them behind `Arc`.

use std::collections::BTreeMap;

use bitflags::bitflags;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use sigil_core::hash::StableHasher;
use sigil_core::{StaticParameterSet, TextureRef, TranslationError};

// ─── Fixed-function state ──────────────────────────────────────────────────

/// Where the material is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialDomain {
    #[default]
    Surface,
    PostProcess,
    UserInterface,
}

/// How the material output is composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    Masked,
    Translucent,
    Additive,
}

bitflags! {
    /// Geometry kinds the material has been flagged for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MaterialUsage: u32 {
        const STATIC_MESH   = 1 << 0;
        const SKELETAL_MESH = 1 << 1;
        const PARTICLES     = 1 << 2;
        const INSTANCED     = 1 << 3;
        const LANDSCAPE     = 1 << 4;
    }
}

impl Default for MaterialUsage {
    fn default() -> Self {
        Self::STATIC_MESH
    }
}

/// Material outputs a graph can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MaterialAttribute {
    BaseColor,
    Metallic,
    Roughness,
    Emissive,
    Normal,
    Opacity,
    OpacityMask,
    WorldPositionOffset,
    PixelDepthOffset,
}

impl MaterialAttribute {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BaseColor => "BaseColor",
            Self::Metallic => "Metallic",
            Self::Roughness => "Roughness",
            Self::Emissive => "Emissive",
            Self::Normal => "Normal",
            Self::Opacity => "Opacity",
            Self::OpacityMask => "OpacityMask",
            Self::WorldPositionOffset => "WorldPositionOffset",
            Self::PixelDepthOffset => "PixelDepthOffset",
        }
    }
}

// ─── Graph ──────────────────────────────────────────────────────────────────

/// Index of a node inside its [`MaterialGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Sampler binding class of a texture sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TextureKind {
    Texture2D,
    Cube,
    Volume,
    /// Virtually bound texture resolved through a streaming stack.
    Streaming,
}

/// Arithmetic operators understood by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathOp {
    Add,
    Multiply,
    Saturate,
}

/// One graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Constant([f32; 4]),
    ScalarParameter {
        name: String,
        default: f32,
    },
    VectorParameter {
        name: String,
        default: [f32; 4],
    },
    /// Samples a texture. `parameter` makes the texture overridable.
    TextureSample {
        parameter: Option<String>,
        texture: TextureRef,
        kind: TextureKind,
        /// Coordinate source; samples sharing a coordinate share a streaming stack.
        coordinates: Option<NodeId>,
    },
    /// Streaming texture written at runtime; its stack is allocated by the
    /// producer and adopted rather than allocated per proxy.
    RuntimeStreamingTexture {
        parameter: Option<String>,
        texture: TextureRef,
    },
    /// Externally produced texture (video, camera feed) bound by id.
    ExternalTexture {
        external_id: u64,
    },
    /// Selects one input at compile time.
    StaticSwitch {
        name: String,
        default: bool,
        on_true: NodeId,
        on_false: NodeId,
    },
    /// Pass-through node used to tidy graph layout.
    Reroute {
        input: Option<NodeId>,
    },
    Math {
        op: MathOp,
        inputs: SmallVec<[NodeId; 2]>,
    },
    /// Value from a shared parameter collection.
    CollectionParameter {
        collection: u64,
        name: String,
    },
    TexCoord {
        index: u32,
    },
    SceneDepth,
    EyeAdaptation,
    DistanceCullFade,
}

/// Node graph of a shading description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialGraph {
    nodes: Vec<NodeKind>,
    outputs: BTreeMap<MaterialAttribute, NodeId>,
}

impl MaterialGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, attribute: MaterialAttribute, node: NodeId) {
        self.outputs.insert(attribute, node);
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id.0 as usize)
    }

    #[must_use]
    pub fn output(&self, attribute: MaterialAttribute) -> Option<NodeId> {
        self.outputs.get(&attribute).copied()
    }

    pub fn outputs(&self) -> impl Iterator<Item = (MaterialAttribute, NodeId)> + '_ {
        self.outputs.iter().map(|(a, n)| (*a, *n))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Follows reroute nodes from `id` to the first real upstream node.
    ///
    /// Fails on dangling reroutes and on reroute cycles.
    pub fn trace_input(&self, material: &str, id: NodeId) -> Result<NodeId, TranslationError> {
        let mut visited = FxHashSet::default();
        let mut current = id;
        loop {
            if !visited.insert(current) {
                return Err(TranslationError::RerouteCycle {
                    material: material.to_string(),
                    node: current.0,
                });
            }
            match self.node(current) {
                Some(NodeKind::Reroute { input: Some(next) }) => current = *next,
                Some(NodeKind::Reroute { input: None }) => {
                    return Err(TranslationError::UnconnectedReroute {
                        material: material.to_string(),
                        node: current.0,
                    });
                }
                Some(_) => return Ok(current),
                None => {
                    return Err(TranslationError::MissingInput {
                        material: material.to_string(),
                        node: id.0,
                        input: current.0,
                    });
                }
            }
        }
    }

    fn hash_into(&self, hasher: &mut StableHasher) {
        hasher.write_u64(self.nodes.len() as u64);
        for node in &self.nodes {
            hash_node(node, hasher);
        }
        hasher.write_u64(self.outputs.len() as u64);
        for (attribute, node) in &self.outputs {
            hasher.write_str(attribute.name()).write_u32(node.0);
        }
    }
}

fn hash_vec4(v: &[f32; 4], hasher: &mut StableHasher) {
    for c in v {
        hasher.write_f32(*c);
    }
}

fn hash_node(node: &NodeKind, hasher: &mut StableHasher) {
    match node {
        NodeKind::Constant(v) => {
            hasher.write_u8(0);
            hash_vec4(v, hasher);
        }
        NodeKind::ScalarParameter { name, default } => {
            hasher.write_u8(1).write_str(name).write_f32(*default);
        }
        NodeKind::VectorParameter { name, default } => {
            hasher.write_u8(2).write_str(name);
            hash_vec4(default, hasher);
        }
        NodeKind::TextureSample {
            parameter,
            texture,
            kind,
            coordinates,
        } => {
            hasher
                .write_u8(3)
                .write_str(parameter.as_deref().unwrap_or(""))
                .write_u32(texture.0)
                .write_u8(*kind as u8)
                .write_u32(coordinates.map_or(u32::MAX, |c| c.0));
        }
        NodeKind::ExternalTexture { external_id } => {
            hasher.write_u8(4).write_u64(*external_id);
        }
        NodeKind::RuntimeStreamingTexture { parameter, texture } => {
            hasher
                .write_u8(13)
                .write_str(parameter.as_deref().unwrap_or(""))
                .write_u32(texture.0);
        }
        NodeKind::StaticSwitch {
            name,
            default,
            on_true,
            on_false,
        } => {
            hasher
                .write_u8(5)
                .write_str(name)
                .write_bool(*default)
                .write_u32(on_true.0)
                .write_u32(on_false.0);
        }
        NodeKind::Reroute { input } => {
            hasher.write_u8(6).write_u32(input.map_or(u32::MAX, |n| n.0));
        }
        NodeKind::Math { op, inputs } => {
            hasher.write_u8(7).write_u8(*op as u8);
            hasher.write_u64(inputs.len() as u64);
            for input in inputs {
                hasher.write_u32(input.0);
            }
        }
        NodeKind::CollectionParameter { collection, name } => {
            hasher.write_u8(8).write_u64(*collection).write_str(name);
        }
        NodeKind::TexCoord { index } => {
            hasher.write_u8(9).write_u32(*index);
        }
        NodeKind::SceneDepth => {
            hasher.write_u8(10);
        }
        NodeKind::EyeAdaptation => {
            hasher.write_u8(11);
        }
        NodeKind::DistanceCullFade => {
            hasher.write_u8(12);
        }
    }
}

// ─── Description ────────────────────────────────────────────────────────────

/// A texture the description references by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencedTexture {
    pub name: String,
    pub texture: TextureRef,
}

/// Declarative shading description.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDescription {
    pub name: String,
    pub domain: MaterialDomain,
    pub blend_mode: BlendMode,
    pub usage: MaterialUsage,
    pub two_sided: bool,
    pub graph: MaterialGraph,
    /// Static switch defaults; instances may override them.
    pub static_parameters: StaticParameterSet,
    pub referenced_textures: Vec<ReferencedTexture>,
    /// The always-available fallback material.
    pub is_default: bool,
}

impl MaterialDescription {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: MaterialDomain::default(),
            blend_mode: BlendMode::default(),
            usage: MaterialUsage::default(),
            two_sided: false,
            graph: MaterialGraph::new(),
            static_parameters: StaticParameterSet::new(),
            referenced_textures: Vec::new(),
            is_default: false,
        }
    }

    #[must_use]
    pub fn with_graph(mut self, graph: MaterialGraph) -> Self {
        self.graph = graph;
        self
    }

    #[must_use]
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: MaterialUsage) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub fn with_static_switch(mut self, name: &str, value: bool) -> Self {
        self.static_parameters.set_switch(name, value);
        self
    }

    #[must_use]
    pub fn with_texture(mut self, name: impl Into<String>, texture: TextureRef) -> Self {
        self.referenced_textures.push(ReferencedTexture {
            name: name.into(),
            texture,
        });
        self
    }

    /// Marks this description as the fallback material.
    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Hash of everything that changes generated code, combined with the
    /// effective static parameters.
    ///
    /// The description name is not part of the hash: two descriptions with
    /// identical content share compiled shaders.
    #[must_use]
    pub fn content_hash(&self, static_parameters: &StaticParameterSet) -> u128 {
        let mut hasher = StableHasher::new();
        hasher
            .write_u8(self.domain as u8)
            .write_u8(self.blend_mode as u8)
            .write_u32(self.usage.bits())
            .write_bool(self.two_sided)
            .write_bool(self.is_default);
        self.graph.hash_into(&mut hasher);
        static_parameters.hash_into(&mut hasher);
        hasher.finish128()
    }

    /// Hash of the referenced texture names, in declaration order.
    #[must_use]
    pub fn referenced_texture_hash(&self) -> u128 {
        let mut hasher = StableHasher::new();
        hasher.write_u64(self.referenced_textures.len() as u64);
        for texture in &self.referenced_textures {
            hasher.write_str(&texture.name);
        }
        hasher.finish128()
    }

    /// Description defaults overridden by `overrides`.
    #[must_use]
    pub fn effective_static_parameters(
        &self,
        overrides: Option<&StaticParameterSet>,
    ) -> StaticParameterSet {
        match overrides {
            Some(overrides) => self.static_parameters.merged_with(overrides),
            None => self.static_parameters.clone(),
        }
    }

    /// Human-readable usage list for diagnostics.
    #[must_use]
    pub fn usage_description(&self) -> String {
        let names: Vec<_> = self.usage.iter_names().map(|(name, _)| name).collect();
        format!(
            "domain={:?} blend={:?} usage=[{}] two_sided={}",
            self.domain,
            self.blend_mode,
            names.join(", "),
            self.two_sided
        )
    }
}
