//! Shader Map Identity
//!
//! A [`ShaderMapId`] contains exactly the fields that distinguish one
//! compile from another:
//!
//! - content hash of the description and its effective static parameters
//! - quality tier and capability tier
//! - sorted shader type and vertex factory dependencies (name + source hash)
//! - hash of the referenced texture set
//!
//! Equal identities mean interchangeable compiled artifacts. Nothing outside
//! these fields may influence whether two requests share a shader map.

use std::fmt;

use serde::{Deserialize, Serialize};

use sigil_core::hash::{StableHasher, hash_bytes};
use sigil_core::{CapabilityTier, QualityTier, Result, StaticParameterSet};

use crate::description::MaterialDescription;
use crate::hex128;
use crate::types::{ShaderDependencies, ShaderTypeDependency, VertexFactoryDependency};

/// Prefix of persistent store keys; bump when the archive format changes.
const STORE_KEY_PREFIX: &str = "SIGIL_SM_V1";

/// Cache key of one shader map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderMapId {
    #[serde(with = "hex128")]
    pub content_hash: u128,
    pub quality: QualityTier,
    pub tier: CapabilityTier,
    pub shader_types: Vec<ShaderTypeDependency>,
    pub vertex_factories: Vec<VertexFactoryDependency>,
    #[serde(with = "hex128")]
    pub referenced_texture_hash: u128,
}

impl ShaderMapId {
    /// Computes the identity of `description` compiled with `static_parameters`.
    ///
    /// `dependencies` must come from
    /// [`ShaderTypeRegistry::dependencies`](crate::ShaderTypeRegistry::dependencies)
    /// for the same description and tier; its lists are already sorted.
    #[must_use]
    pub fn compute(
        description: &MaterialDescription,
        static_parameters: &StaticParameterSet,
        quality: QualityTier,
        tier: CapabilityTier,
        dependencies: &ShaderDependencies,
    ) -> Self {
        Self {
            content_hash: description.content_hash(static_parameters),
            quality,
            tier,
            shader_types: dependencies.shader_types.clone(),
            vertex_factories: dependencies.vertex_factories.clone(),
            referenced_texture_hash: description.referenced_texture_hash(),
        }
    }

    /// Stable 128-bit digest of every field.
    #[must_use]
    pub fn stable_hash(&self) -> u128 {
        let mut hasher = StableHasher::new();
        hasher
            .write_u128(self.content_hash)
            .write_str(self.quality.name())
            .write_str(self.tier.name())
            .write_u128(self.referenced_texture_hash);
        let deps = ShaderDependencies {
            shader_types: self.shader_types.clone(),
            vertex_factories: self.vertex_factories.clone(),
            permutations: Vec::new(),
        };
        deps.hash_into(&mut hasher);
        hasher.finish128()
    }

    /// Key under which the shader map is kept in the persistent store.
    ///
    /// Derived from the serialized identity, so it is stable across
    /// processes and platforms.
    pub fn store_key(&self) -> Result<String> {
        let serialized = serde_json::to_vec(self)?;
        Ok(format!(
            "{STORE_KEY_PREFIX}_{}_{}_{:032x}",
            self.tier,
            self.quality,
            hash_bytes(&serialized)
        ))
    }

    #[must_use]
    pub fn depends_on_shader_type(&self, name: &str) -> bool {
        self.shader_types.iter().any(|d| d.name == name)
    }

    #[must_use]
    pub fn depends_on_vertex_factory(&self, name: &str) -> bool {
        self.vertex_factories.iter().any(|d| d.name == name)
    }
}

impl fmt::Display for ShaderMapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:032x}/{}/{} ({} shader types, {} vertex factories)",
            self.content_hash,
            self.tier,
            self.quality,
            self.shader_types.len(),
            self.vertex_factories.len()
        )
    }
}
