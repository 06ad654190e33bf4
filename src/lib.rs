//! # Sigil
//!
//! Material shader map caching, compilation and render-thread publication.
//!
//! | Crate | Side | Contents |
//! |-------|------|----------|
//! | [`core`] | both | errors, ids, tiers, static parameters, settings |
//! | [`shader`] | producer | descriptions, identity, shader maps, registry, store, compiling manager |
//! | [`render`] | consumer | render queue, render world, proxies, uniform caches, streaming stacks |
//! | [`material`] | producer | services, resources, library, update contexts |
//!
//! Most programs only need the [`prelude`].

pub use sigil_core as core;
pub use sigil_material as material;
pub use sigil_render as render;
pub use sigil_shader as shader;

pub use sigil_core::{Result, SigilError};

pub mod prelude {
    pub use sigil_core::{
        CapabilityTier, MaterialSettings, ProxyId, QualityTier, ResourceId, Result, SigilError,
        StaticParameterSet, StaticValue, TextureRef, TierMap,
    };
    pub use sigil_material::{
        InstanceKey, MaterialKey, MaterialLibrary, MaterialRef, MaterialResource,
        MaterialServices, MaterialUpdateContext, UpdateContextOptions,
    };
    pub use sigil_render::{ParameterValue, RenderQueue, RenderWorld, RenderWorldOptions, render_queue};
    pub use sigil_shader::{
        ArtifactStore, BlendMode, MaterialAttribute, MaterialDescription, MaterialDomain,
        MaterialGraph, MaterialUsage, MathOp, NodeKind, PermutationKey, ShaderMap, ShaderMapId,
        ShaderType, ShaderTypeKind, ShaderTypeRegistry, TextureKind, VertexFactoryType,
    };
}
