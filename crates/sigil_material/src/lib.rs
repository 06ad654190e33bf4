//! # Sigil Material
//!
//! Producer side of the material system.
//!
//! - [`MaterialServices`]: shared registries, compile manager and render queue
//! - [`MaterialResource`]: one compile target and its producer shader map pointer
//! - [`MaterialLibrary`]: materials and instance chains with their proxies
//! - [`MaterialUpdateContext`]: batched recompiles with a single render notification

pub mod library;
pub mod resource;
pub mod services;
pub mod update_context;

pub use library::{InstanceKey, Material, MaterialInstance, MaterialKey, MaterialLibrary, MaterialRef};
pub use resource::{InlineShaderMap, MaterialResource};
pub use services::{MaterialServices, MaterialServicesBuilder};
pub use update_context::{MaterialUpdateContext, UpdateContextOptions};
