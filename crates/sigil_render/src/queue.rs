//! Producer → consumer command queue.
//!
//! The only path by which producer-side code affects render-side state.
//! Commands are applied strictly in FIFO order by [`RenderWorld`](crate::RenderWorld),
//! which gives the publication guarantees the material system relies on:
//!
//! - a `SetShaderMap` carries a complete map or nothing, so the consumer
//!   pointer only ever moves between complete states;
//! - invalidations a swap causes are applied while handling that swap,
//!   before any later command or evaluation runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use glam::{Vec2, Vec4};

use sigil_core::{
    CapabilityTier, ProxyId, QualityTier, ResourceId, StreamingProducerId, TextureRef, TierMap,
};
use sigil_shader::ShaderMap;

#[derive(Debug, Default)]
struct BindingState {
    bound: AtomicBool,
    /// `SetShaderMap` commands enqueued but not yet applied.
    pending: AtomicU64,
}

/// Whether the consumer currently holds, or is about to receive, a shader
/// map for a resource.
///
/// The producer counts every `SetShaderMap` it enqueues; the render world
/// acknowledges each one as it applies it. Cloning shares the state.
#[derive(Debug, Clone, Default)]
pub struct ConsumerBinding(Arc<BindingState>);

impl ConsumerBinding {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.0.bound.load(Ordering::Acquire)
    }

    /// Publishes the render world has not applied yet.
    #[inline]
    #[must_use]
    pub fn pending_publishes(&self) -> u64 {
        self.0.pending.load(Ordering::Acquire)
    }

    /// No map bound and none in flight.
    ///
    /// The world clears `pending` after updating `bound`, so reading
    /// `pending` first never observes a stale `bound`.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.pending_publishes() == 0 && !self.is_bound()
    }

    /// Called by the producer right before enqueueing a `SetShaderMap`.
    pub fn begin_publish(&self) {
        self.0.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn acknowledge_publish(&self) {
        let _ = self
            .0
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    #[inline]
    pub(crate) fn set_bound(&self, bound: bool) {
        self.0.bound.store(bound, Ordering::Release);
    }
}

/// Static facts about a material resource the consumer needs for
/// diagnostics and fallback decisions.
#[derive(Debug, Clone)]
pub struct RenderMaterialInfo {
    pub friendly_name: String,
    pub tier: CapabilityTier,
    pub quality: QualityTier,
    pub is_default: bool,
    pub usage_description: String,
    pub binding: ConsumerBinding,
}

/// A named parameter override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Scalar(f32),
    Vector(Vec4),
    Texture(TextureRef),
}

/// How a proxy resolves its material and parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyKind {
    /// Renders its own material resources.
    Material { materials: TierMap<Option<ResourceId>> },
    /// Overrides parameters of `parent`; tiers without an own resource
    /// render the parent's.
    Instance {
        parent: ProxyId,
        materials: TierMap<Option<ResourceId>>,
    },
    /// Answers one vector parameter with a fixed color.
    Colored {
        parent: ProxyId,
        parameter: String,
        color: Vec4,
    },
    /// Colored override that also substitutes one texture parameter.
    ColoredTextured {
        parent: ProxyId,
        color_parameter: String,
        color: Vec4,
        texture_parameter: String,
        texture: TextureRef,
    },
    /// Answers the selection color parameter.
    SelectionColor { parent: ProxyId, color: Vec4 },
    /// Lightmap density visualization: answers the resolution scale and
    /// otherwise behaves as a colored override.
    LightingDensity {
        parent: ProxyId,
        color: Vec4,
        lightmap_resolution: Vec2,
    },
}

impl ProxyKind {
    #[must_use]
    pub fn parent(&self) -> Option<ProxyId> {
        match self {
            Self::Material { .. } => None,
            Self::Instance { parent, .. }
            | Self::Colored { parent, .. }
            | Self::ColoredTextured { parent, .. }
            | Self::SelectionColor { parent, .. }
            | Self::LightingDensity { parent, .. } => Some(*parent),
        }
    }
}

/// Commands applied by the render world.
#[derive(Debug)]
pub enum RenderCommand {
    RegisterMaterial {
        resource: ResourceId,
        info: RenderMaterialInfo,
    },
    /// Replaces the consumer pointer of `resource`.
    SetShaderMap {
        resource: ResourceId,
        shader_map: Option<Arc<ShaderMap>>,
    },
    ReleaseMaterial { resource: ResourceId },

    CreateProxy { proxy: ProxyId, kind: ProxyKind },
    SetProxyMaterials {
        proxy: ProxyId,
        materials: TierMap<Option<ResourceId>>,
    },
    SetParameter {
        proxy: ProxyId,
        name: String,
        value: ParameterValue,
    },
    ClearParameter { proxy: ProxyId, name: String },
    /// Marks every tier cache of `proxy` stale.
    CacheUniformExpressions { proxy: ProxyId, recreate_buffer: bool },
    RemoveProxy { proxy: ProxyId },
    SetDefaultProxy { proxy: ProxyId },

    CreateStreamingProducer {
        producer: StreamingProducerId,
        texture: TextureRef,
        tile_size: u32,
        border: u32,
        /// Producer owns a ready-made stack allocation.
        preallocated: bool,
    },
    DestroyStreamingProducer { producer: StreamingProducerId },

    /// One notification per update batch.
    MaterialsUpdated {
        resources: Vec<ResourceId>,
        recreate_render_state: bool,
    },
    /// Signalled once every earlier command has been applied.
    Fence(flume::Sender<()>),
}

/// Producer-side handle onto the command queue.
#[derive(Debug, Clone)]
pub struct RenderQueue {
    tx: flume::Sender<RenderCommand>,
}

/// Consumer-side end of the queue, owned by the render world.
#[derive(Debug)]
pub struct RenderCommandReceiver {
    rx: flume::Receiver<RenderCommand>,
}

/// Creates a connected queue pair.
#[must_use]
pub fn render_queue() -> (RenderQueue, RenderCommandReceiver) {
    let (tx, rx) = flume::unbounded();
    (RenderQueue { tx }, RenderCommandReceiver { rx })
}

impl RenderQueue {
    pub fn enqueue(&self, command: RenderCommand) {
        log::trace!("enqueue {}", command_name(&command));
        if self.tx.send(command).is_err() {
            log::warn!("Render command dropped: render world is gone");
        }
    }

    /// Number of commands not yet applied.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    /// Blocks until the consumer has applied every command sent before this
    /// call. Returns immediately if the consumer is gone.
    pub fn flush(&self) {
        let (done_tx, done_rx) = flume::bounded(1);
        self.enqueue(RenderCommand::Fence(done_tx));
        let _ = done_rx.recv();
    }
}

impl RenderCommandReceiver {
    pub(crate) fn try_recv(&self) -> Option<RenderCommand> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn recv(&self) -> Option<RenderCommand> {
        self.rx.recv().ok()
    }
}

pub(crate) fn command_name(command: &RenderCommand) -> &'static str {
    match command {
        RenderCommand::RegisterMaterial { .. } => "RegisterMaterial",
        RenderCommand::SetShaderMap { .. } => "SetShaderMap",
        RenderCommand::ReleaseMaterial { .. } => "ReleaseMaterial",
        RenderCommand::CreateProxy { .. } => "CreateProxy",
        RenderCommand::SetProxyMaterials { .. } => "SetProxyMaterials",
        RenderCommand::SetParameter { .. } => "SetParameter",
        RenderCommand::ClearParameter { .. } => "ClearParameter",
        RenderCommand::CacheUniformExpressions { .. } => "CacheUniformExpressions",
        RenderCommand::RemoveProxy { .. } => "RemoveProxy",
        RenderCommand::SetDefaultProxy { .. } => "SetDefaultProxy",
        RenderCommand::CreateStreamingProducer { .. } => "CreateStreamingProducer",
        RenderCommand::DestroyStreamingProducer { .. } => "DestroyStreamingProducer",
        RenderCommand::MaterialsUpdated { .. } => "MaterialsUpdated",
        RenderCommand::Fence(_) => "Fence",
    }
}
