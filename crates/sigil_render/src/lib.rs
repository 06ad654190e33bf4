//! # Sigil Render
//!
//! Consumer side of the material system: the command queue the producer
//! publishes through, and the [`RenderWorld`] that owns consumer shader map
//! pointers, render proxies, uniform expression caches and streaming
//! texture stacks.

pub mod proxy;
pub mod queue;
pub mod streaming;
pub mod uniform_cache;
pub mod world;

pub use proxy::{
    DENSITY_COLOR_PARAMETER, LIGHTMAP_RESOLUTION_PARAMETER, ParameterOverrides, ProxyParameters,
    RenderProxy, SELECTION_COLOR_PARAMETER,
};
pub use queue::{
    ConsumerBinding, ParameterValue, ProxyKind, RenderCommand, RenderCommandReceiver,
    RenderMaterialInfo, RenderQueue, render_queue,
};
pub use streaming::{StreamingAllocation, StreamingProducer, StreamingTextureSystem};
pub use uniform_cache::{UniformBuffer, UniformExpressionCache};
pub use world::{
    MaterialBinding, RenderMaterial, RenderWorld, RenderWorldOptions, RenderWorldStats,
};
