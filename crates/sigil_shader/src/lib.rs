//! # Sigil Shader
//!
//! Producer-side shader map machinery: material descriptions, shader map
//! identity, the compiled [`ShaderMap`] artifact, the process-wide
//! [`ShaderMapRegistry`], persistent artifact stores, and the
//! [`ShaderCompilingManager`] that translates and compiles maps.
//!
//! Nothing here touches the render side. The render crate only consumes
//! finished `Arc<ShaderMap>`s.

pub mod compiler;
pub mod description;
pub mod identity;
pub mod pipeline;
pub mod registry;
pub mod shader_map;
pub mod store;
pub mod translator;
pub mod types;
pub mod uniform_expression;

pub use compiler::{
    CompileJob, CompileJobResult, CompletionSender, EchoBackend, ImmediateCompiler,
    MaterialTranslator, ShaderBackend, ShaderCompiler, TranslatedMaterial, WorkerPoolCompiler,
};
pub use description::{
    BlendMode, MaterialAttribute, MaterialDescription, MaterialDomain, MaterialGraph,
    MaterialUsage, MathOp, NodeId, NodeKind, ReferencedTexture, TextureKind,
};
pub use identity::ShaderMapId;
pub use pipeline::{
    CompileFailure, CompileOutcome, CompileRequest, FinishedCompile, ShaderCompilingManager,
};
pub use registry::ShaderMapRegistry;
pub use shader_map::{
    CompilationOutput, ShaderBinary, ShaderMap, ShaderMapContent, ShaderMapFlags,
};
pub use store::{ArtifactStore, DirectoryArtifactStore, MemoryArtifactStore};
pub use translator::GraphTranslator;
pub use types::{
    PermutationKey, ShaderDependencies, ShaderType, ShaderTypeKind, ShaderTypeRegistry,
    VertexFactoryType,
};
pub use uniform_expression::{
    MAX_STREAMING_LAYERS, NULL_TEXTURE_ID, ParameterSource, STACK_UNIFORM_BYTES,
    StreamingTextureStack, TextureExpression, UniformBufferLayout, UniformExpression,
    UniformExpressionSet,
};

/// Serde adapter writing `u128` hashes as 32 hex digits.
///
/// JSON numbers cannot carry 128 bits losslessly.
pub(crate) mod hex128 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:032x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        u128::from_str_radix(&s, 16).map_err(serde::de::Error::custom)
    }
}
