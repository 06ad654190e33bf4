//! Shader Type Registry
//!
//! Lists every shader type and vertex factory a material may be compiled
//! with. The registry decides, per description and capability tier, which
//! permutations a shader map must contain, and produces the dependency lists
//! that become part of the [`ShaderMapId`](crate::ShaderMapId).
//!
//! The registry is an explicit service: build it once at startup, wrap it in
//! an `Arc` and hand it to whatever computes identities.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sigil_core::hash::{StableHasher, hash_bytes};
use sigil_core::CapabilityTier;

use crate::description::MaterialDescription;
use crate::hex128;

/// Whether a shader type is compiled once per material or once per
/// (material, vertex factory) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderTypeKind {
    Material,
    MeshMaterial,
}

pub type ShaderPredicate = Arc<dyn Fn(&MaterialDescription, CapabilityTier) -> bool + Send + Sync>;
pub type VertexFactoryPredicate =
    Arc<dyn Fn(&MaterialDescription, &ShaderType, CapabilityTier) -> bool + Send + Sync>;

/// A shader type known to the registry.
#[derive(Clone)]
pub struct ShaderType {
    name: String,
    kind: ShaderTypeKind,
    source_hash: u128,
    should_compile: ShaderPredicate,
}

impl ShaderType {
    /// Creates a shader type compiled for every material on every tier.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ShaderTypeKind, source: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            source_hash: hash_bytes(source.as_bytes()),
            should_compile: Arc::new(|_, _| true),
        }
    }

    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&MaterialDescription, CapabilityTier) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_compile = Arc::new(predicate);
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ShaderTypeKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn source_hash(&self) -> u128 {
        self.source_hash
    }

    #[must_use]
    pub fn should_compile(&self, description: &MaterialDescription, tier: CapabilityTier) -> bool {
        (self.should_compile)(description, tier)
    }
}

impl fmt::Debug for ShaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("source_hash", &format_args!("{:032x}", self.source_hash))
            .finish_non_exhaustive()
    }
}

/// A vertex input layout mesh-material shaders are compiled against.
#[derive(Clone)]
pub struct VertexFactoryType {
    name: String,
    source_hash: u128,
    should_cache: VertexFactoryPredicate,
}

impl VertexFactoryType {
    #[must_use]
    pub fn new(name: impl Into<String>, source: &str) -> Self {
        Self {
            name: name.into(),
            source_hash: hash_bytes(source.as_bytes()),
            should_cache: Arc::new(|_, _, _| true),
        }
    }

    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&MaterialDescription, &ShaderType, CapabilityTier) -> bool
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.should_cache = Arc::new(predicate);
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn source_hash(&self) -> u128 {
        self.source_hash
    }
}

impl fmt::Debug for VertexFactoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexFactoryType")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ─── Dependencies ───────────────────────────────────────────────────────────

/// Shader type entry of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShaderTypeDependency {
    pub name: String,
    #[serde(with = "hex128")]
    pub source_hash: u128,
}

/// Vertex factory entry of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexFactoryDependency {
    pub name: String,
    #[serde(with = "hex128")]
    pub source_hash: u128,
}

/// Addresses one compiled binary inside a shader map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermutationKey {
    pub shader_type: String,
    pub vertex_factory: Option<String>,
}

impl PermutationKey {
    #[must_use]
    pub fn material(shader_type: impl Into<String>) -> Self {
        Self {
            shader_type: shader_type.into(),
            vertex_factory: None,
        }
    }

    #[must_use]
    pub fn mesh(shader_type: impl Into<String>, vertex_factory: impl Into<String>) -> Self {
        Self {
            shader_type: shader_type.into(),
            vertex_factory: Some(vertex_factory.into()),
        }
    }
}

impl fmt::Display for PermutationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.vertex_factory {
            Some(vf) => write!(f, "{}/{}", self.shader_type, vf),
            None => f.write_str(&self.shader_type),
        }
    }
}

/// Everything a description depends on for one tier.
///
/// All three lists are sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderDependencies {
    pub shader_types: Vec<ShaderTypeDependency>,
    pub vertex_factories: Vec<VertexFactoryDependency>,
    pub permutations: Vec<PermutationKey>,
}

impl ShaderDependencies {
    pub(crate) fn hash_into(&self, hasher: &mut StableHasher) {
        hasher.write_u64(self.shader_types.len() as u64);
        for dep in &self.shader_types {
            hasher.write_str(&dep.name).write_u128(dep.source_hash);
        }
        hasher.write_u64(self.vertex_factories.len() as u64);
        for dep in &self.vertex_factories {
            hasher.write_str(&dep.name).write_u128(dep.source_hash);
        }
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// Process-wide catalog of shader types and vertex factories.
#[derive(Debug, Default)]
pub struct ShaderTypeRegistry {
    shader_types: Vec<ShaderType>,
    vertex_factories: Vec<VertexFactoryType>,
}

impl ShaderTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shader type. A later registration with the same name
    /// replaces the earlier one.
    pub fn register_shader_type(&mut self, shader_type: ShaderType) -> &mut Self {
        self.shader_types.retain(|t| t.name != shader_type.name);
        self.shader_types.push(shader_type);
        self
    }

    pub fn register_vertex_factory(&mut self, factory: VertexFactoryType) -> &mut Self {
        self.vertex_factories.retain(|f| f.name != factory.name);
        self.vertex_factories.push(factory);
        self
    }

    #[must_use]
    pub fn shader_type(&self, name: &str) -> Option<&ShaderType> {
        self.shader_types.iter().find(|t| t.name == name)
    }

    /// Computes the permutations and sorted dependency lists for one tier.
    ///
    /// Results are independent of registration order.
    #[must_use]
    pub fn dependencies(
        &self,
        description: &MaterialDescription,
        tier: CapabilityTier,
    ) -> ShaderDependencies {
        let mut deps = ShaderDependencies::default();

        for shader_type in &self.shader_types {
            if !shader_type.should_compile(description, tier) {
                continue;
            }
            match shader_type.kind {
                ShaderTypeKind::Material => {
                    deps.permutations
                        .push(PermutationKey::material(&shader_type.name));
                }
                ShaderTypeKind::MeshMaterial => {
                    for factory in &self.vertex_factories {
                        if !(factory.should_cache)(description, shader_type, tier) {
                            continue;
                        }
                        deps.permutations
                            .push(PermutationKey::mesh(&shader_type.name, &factory.name));
                        if !deps.vertex_factories.iter().any(|v| v.name == factory.name) {
                            deps.vertex_factories.push(VertexFactoryDependency {
                                name: factory.name.clone(),
                                source_hash: factory.source_hash,
                            });
                        }
                    }
                }
            }
            if deps
                .permutations
                .iter()
                .any(|p| p.shader_type == shader_type.name)
            {
                deps.shader_types.push(ShaderTypeDependency {
                    name: shader_type.name.clone(),
                    source_hash: shader_type.source_hash,
                });
            }
        }

        deps.shader_types.sort();
        deps.vertex_factories.sort();
        deps.permutations.sort();
        deps
    }
}
