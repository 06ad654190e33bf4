//! Shader Maps
//!
//! A [`ShaderMap`] is the compiled-artifact container for one
//! [`ShaderMapId`]: the binaries of every required permutation, the uniform
//! expression set the translator produced, and the behaviour flags the
//! renderer queries.
//!
//! # Lifecycle
//!
//! 1. The compilation pipeline creates the map empty ([`ShaderMap::new`]).
//! 2. On success the content is set exactly once; the map is immutable from
//!    then on. A map whose compile failed stays empty and is dropped.
//! 3. Maps are shared through `Arc`. The in-memory registry only holds weak
//!    references, so the last material resource or render material that
//!    drops its `Arc` frees the map.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use base64::Engine as _;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use sigil_core::hash::hash_bytes;
use sigil_core::{Result, SigilError};

use crate::identity::ShaderMapId;
use crate::types::PermutationKey;
use crate::uniform_expression::{UniformBufferLayout, UniformExpressionSet};

bitflags! {
    /// Behaviour flags derived during translation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ShaderMapFlags: u32 {
        const USES_EYE_ADAPTATION         = 1 << 0;
        const MODIFIES_MESH_POSITION      = 1 << 1;
        const USES_WORLD_POSITION_OFFSET  = 1 << 2;
        const USES_GLOBAL_DISTANCE_FIELD  = 1 << 3;
        const USES_PIXEL_DEPTH_OFFSET     = 1 << 4;
        const USES_DISTANCE_CULL_FADE     = 1 << 5;
        const USES_SCENE_DEPTH            = 1 << 6;
        const HAS_RUNTIME_STREAMING_OUTPUT = 1 << 7;
        const USES_STREAMING_TEXTURES     = 1 << 8;
    }
}

/// Everything translation learned about a material besides its source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationOutput {
    pub uniform_expressions: UniformExpressionSet,
    pub flags: ShaderMapFlags,
    pub num_texture_samples: u32,
}

/// Opaque compiled shader code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderBinary {
    #[serde(with = "base64_bytes")]
    code: Vec<u8>,
    #[serde(with = "crate::hex128")]
    code_hash: u128,
}

impl ShaderBinary {
    #[must_use]
    pub fn new(code: Vec<u8>) -> Self {
        let code_hash = hash_bytes(&code);
        Self { code, code_hash }
    }

    #[inline]
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    #[inline]
    #[must_use]
    pub fn code_hash(&self) -> u128 {
        self.code_hash
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Compiled content of a successful shader map.
#[derive(Debug)]
pub struct ShaderMapContent {
    binaries: BTreeMap<PermutationKey, ShaderBinary>,
    output: CompilationOutput,
    layout: UniformBufferLayout,
}

impl ShaderMapContent {
    #[must_use]
    pub fn new(binaries: BTreeMap<PermutationKey, ShaderBinary>, output: CompilationOutput) -> Self {
        let layout = output.uniform_expressions.layout();
        Self {
            binaries,
            output,
            layout,
        }
    }
}

/// Compiled shaders and metadata for one identity.
#[derive(Debug)]
pub struct ShaderMap {
    id: ShaderMapId,
    friendly_name: String,
    content: OnceLock<ShaderMapContent>,
}

impl ShaderMap {
    /// Creates an empty map awaiting its compile results.
    #[must_use]
    pub fn new(id: ShaderMapId, friendly_name: impl Into<String>) -> Self {
        Self {
            id,
            friendly_name: friendly_name.into(),
            content: OnceLock::new(),
        }
    }

    /// Creates an already compiled map (loaded from a store or inline data).
    #[must_use]
    pub fn with_content(
        id: ShaderMapId,
        friendly_name: impl Into<String>,
        content: ShaderMapContent,
    ) -> Self {
        let map = Self::new(id, friendly_name);
        let _ = map.content.set(content);
        map
    }

    /// Publishes the compile result. Returns `false` if the map was already
    /// filled, in which case `content` is dropped.
    pub(crate) fn fill(&self, content: ShaderMapContent) -> bool {
        self.content.set(content).is_ok()
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> &ShaderMapId {
        &self.id
    }

    #[inline]
    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    #[inline]
    #[must_use]
    pub fn compiled_successfully(&self) -> bool {
        self.content.get().is_some()
    }

    #[inline]
    #[must_use]
    pub fn content(&self) -> Option<&ShaderMapContent> {
        self.content.get()
    }

    #[must_use]
    pub fn shader(&self, key: &PermutationKey) -> Option<&ShaderBinary> {
        self.content.get()?.binaries.get(key)
    }

    #[must_use]
    pub fn has_shader(&self, key: &PermutationKey) -> bool {
        self.shader(key).is_some()
    }

    pub fn permutations(&self) -> impl Iterator<Item = &PermutationKey> {
        self.content.get().into_iter().flat_map(|c| c.binaries.keys())
    }

    #[must_use]
    pub fn num_shaders(&self) -> usize {
        self.content.get().map_or(0, |c| c.binaries.len())
    }

    /// Whether every `required` permutation is present.
    #[must_use]
    pub fn is_complete(&self, required: &[PermutationKey]) -> bool {
        match self.content.get() {
            Some(content) => required.iter().all(|k| content.binaries.contains_key(k)),
            None => false,
        }
    }

    #[must_use]
    pub fn uniform_expression_set(&self) -> Option<&UniformExpressionSet> {
        self.content.get().map(|c| &c.output.uniform_expressions)
    }

    #[must_use]
    pub fn uniform_buffer_layout(&self) -> Option<UniformBufferLayout> {
        self.content.get().map(|c| c.layout)
    }

    #[must_use]
    pub fn flags(&self) -> ShaderMapFlags {
        self.content
            .get()
            .map_or(ShaderMapFlags::empty(), |c| c.output.flags)
    }

    #[must_use]
    pub fn compilation_output(&self) -> Option<&CompilationOutput> {
        self.content.get().map(|c| &c.output)
    }

    // ─── Serialization ─────────────────────────────────────────────────────

    /// Serializes a compiled map.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let content = self.content.get().ok_or_else(|| {
            SigilError::InvalidArchive(format!(
                "shader map '{}' has no compiled content",
                self.friendly_name
            ))
        })?;
        let archive = ShaderMapArchive {
            id: self.id.clone(),
            friendly_name: self.friendly_name.clone(),
            binaries: content
                .binaries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            output: content.output.clone(),
        };
        Ok(serde_json::to_vec(&archive)?)
    }

    /// Deserializes a map previously written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let archive: ShaderMapArchive = serde_json::from_slice(bytes)?;
        for (key, binary) in &archive.binaries {
            if hash_bytes(binary.code()) != binary.code_hash() {
                return Err(SigilError::InvalidArchive(format!(
                    "binary '{key}' of '{}' failed its checksum",
                    archive.friendly_name
                )));
            }
        }
        let content = ShaderMapContent::new(archive.binaries.into_iter().collect(), archive.output);
        Ok(Self::with_content(archive.id, archive.friendly_name, content))
    }

    // ─── Diagnostics ───────────────────────────────────────────────────────

    /// Lists the permutations present, for missing-shader diagnostics.
    #[must_use]
    pub fn permutation_report(&self) -> String {
        let mut report = String::new();
        for key in self.permutations() {
            let _ = writeln!(report, "    {key}");
        }
        if report.is_empty() {
            report.push_str("    <none>\n");
        }
        report
    }

    /// Human-readable summary for debug dumps.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "ShaderMap '{}'", self.friendly_name);
        let _ = writeln!(out, "  id: {}", self.id);
        match self.content.get() {
            Some(content) => {
                let _ = writeln!(out, "  shaders: {}", content.binaries.len());
                for key in content.binaries.keys() {
                    let _ = writeln!(out, "    {key}");
                }
                let _ = writeln!(out, "  flags: {:?}", content.output.flags);
                let _ = writeln!(
                    out,
                    "  expressions: {}",
                    content.output.uniform_expressions.describe()
                );
                let _ = writeln!(out, "  uniform buffer: {} bytes", content.layout.size);
            }
            None => {
                let _ = writeln!(out, "  <not compiled>");
            }
        }
        out
    }
}

#[derive(Serialize, Deserialize)]
struct ShaderMapArchive {
    id: ShaderMapId,
    friendly_name: String,
    binaries: Vec<(PermutationKey, ShaderBinary)>,
    output: CompilationOutput,
}

/// Short fingerprint of binary code, used in log lines.
#[must_use]
pub fn code_fingerprint(binary: &ShaderBinary) -> String {
    base64::engine::general_purpose::STANDARD_NO_PAD.encode(&binary.code_hash().to_le_bytes()[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_core::{CapabilityTier, QualityTier};

    fn test_id() -> ShaderMapId {
        ShaderMapId {
            content_hash: 42,
            quality: QualityTier::High,
            tier: CapabilityTier::Desktop,
            shader_types: Vec::new(),
            vertex_factories: Vec::new(),
            referenced_texture_hash: 7,
        }
    }

    fn content() -> ShaderMapContent {
        let mut binaries = BTreeMap::new();
        binaries.insert(
            PermutationKey::material("Pixel"),
            ShaderBinary::new(vec![1, 2, 3]),
        );
        ShaderMapContent::new(binaries, CompilationOutput::default())
    }

    #[test]
    fn test_new_map_is_empty_until_filled() {
        let map = ShaderMap::new(test_id(), "m");
        assert!(!map.compiled_successfully());
        assert!(!map.is_complete(&[]));
        assert!(map.fill(content()));
        assert!(map.compiled_successfully());
        assert!(map.is_complete(&[PermutationKey::material("Pixel")]));
    }

    #[test]
    fn test_fill_only_once() {
        let map = ShaderMap::new(test_id(), "m");
        assert!(map.fill(content()));
        assert!(!map.fill(content()));
        assert_eq!(map.num_shaders(), 1);
    }

    #[test]
    fn test_missing_permutation_makes_map_incomplete() {
        let map = ShaderMap::with_content(test_id(), "m", content());
        assert!(!map.is_complete(&[
            PermutationKey::material("Pixel"),
            PermutationKey::mesh("BasePass", "LocalVF"),
        ]));
    }

    #[test]
    fn test_bytes_preserve_identity_and_binaries() {
        let map = ShaderMap::with_content(test_id(), "m", content());
        let bytes = map.to_bytes().unwrap();
        let loaded = ShaderMap::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.id(), map.id());
        assert_eq!(
            loaded.shader(&PermutationKey::material("Pixel")).unwrap().code(),
            &[1, 2, 3]
        );
    }

    #[test]
    fn test_empty_map_cannot_serialize() {
        let map = ShaderMap::new(test_id(), "m");
        assert!(matches!(map.to_bytes(), Err(SigilError::InvalidArchive(_))));
    }
}
