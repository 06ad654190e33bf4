//! # Sigil Core
//!
//! Foundation types shared by every Sigil crate: errors, process-unique ids,
//! capability/quality tiers, static parameter sets, settings and stable
//! content hashing.

pub mod errors;
pub mod hash;
pub mod ids;
pub mod interner;
pub mod settings;
pub mod static_params;
pub mod tier;

pub use errors::{CompileError, Result, SigilError, TranslationError};
pub use hash::StableHasher;
pub use ids::{
    CompileJobId, ProxyId, ResourceId, StreamingAllocationId, StreamingProducerId, TextureRef,
    UniformBufferId,
};
pub use interner::Symbol;
pub use settings::MaterialSettings;
pub use static_params::{StaticParameterSet, StaticValue};
pub use tier::{CapabilityTier, QualityTier, TierMap};
