//! Streaming texture producers and stack allocations.
//!
//! A streaming stack binds up to [`MAX_STREAMING_LAYERS`] producers behind one
//! handle. All layers of a stack must share tile size and border; mixing
//! them would produce a corrupt page table, so it is asserted.
//!
//! Producers keep a list of proxies whose caches reference them. Destroying
//! a producer returns that list so the render world can invalidate those
//! caches.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use sigil_core::{ProxyId, StreamingAllocationId, StreamingProducerId, TextureRef};
use sigil_shader::{MAX_STREAMING_LAYERS, NULL_TEXTURE_ID};

/// A registered streaming texture.
#[derive(Debug)]
pub struct StreamingProducer {
    pub texture: TextureRef,
    pub tile_size: u32,
    pub border: u32,
    /// Stack owned by the producer itself (runtime streaming output).
    preallocated: Option<StreamingAllocationId>,
    subscribers: FxHashSet<ProxyId>,
}

impl StreamingProducer {
    #[must_use]
    pub fn preallocated(&self) -> Option<StreamingAllocationId> {
        self.preallocated
    }

    #[must_use]
    pub fn num_subscribers(&self) -> usize {
        self.subscribers.len()
    }
}

/// Live stack allocation.
#[derive(Debug, Clone)]
pub struct StreamingAllocation {
    pub layers: SmallVec<[Option<StreamingProducerId>; MAX_STREAMING_LAYERS]>,
    pub tile_size: u32,
    pub border: u32,
}

#[derive(Debug, Default)]
pub struct StreamingTextureSystem {
    producers: FxHashMap<StreamingProducerId, StreamingProducer>,
    by_texture: FxHashMap<TextureRef, StreamingProducerId>,
    allocations: FxHashMap<StreamingAllocationId, StreamingAllocation>,
}

impl StreamingTextureSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Producers ─────────────────────────────────────────────────────────

    pub fn create_producer(
        &mut self,
        id: StreamingProducerId,
        texture: TextureRef,
        tile_size: u32,
        border: u32,
        preallocated: bool,
    ) {
        let mut producer = StreamingProducer {
            texture,
            tile_size,
            border,
            preallocated: None,
            subscribers: FxHashSet::default(),
        };
        if preallocated {
            let allocation = StreamingAllocationId::next();
            self.allocations.insert(
                allocation,
                StreamingAllocation {
                    layers: SmallVec::from_elem(Some(id), 1),
                    tile_size,
                    border,
                },
            );
            producer.preallocated = Some(allocation);
        }
        self.by_texture.insert(texture, id);
        self.producers.insert(id, producer);
        log::debug!("Streaming producer {id} created for {texture} (tile {tile_size}, border {border})");
    }

    #[must_use]
    pub fn producer(&self, id: StreamingProducerId) -> Option<&StreamingProducer> {
        self.producers.get(&id)
    }

    #[must_use]
    pub fn producer_for_texture(&self, texture: TextureRef) -> Option<StreamingProducerId> {
        self.by_texture.get(&texture).copied()
    }

    /// Destroys a producer and returns the proxies subscribed to it.
    pub fn destroy_producer(&mut self, id: StreamingProducerId) -> Vec<ProxyId> {
        let Some(producer) = self.producers.remove(&id) else {
            return Vec::new();
        };
        if self.by_texture.get(&producer.texture) == Some(&id) {
            self.by_texture.remove(&producer.texture);
        }
        if let Some(allocation) = producer.preallocated {
            self.allocations.remove(&allocation);
        }
        let mut subscribers: Vec<_> = producer.subscribers.into_iter().collect();
        subscribers.sort_unstable();
        subscribers
    }

    /// Registers a destroy notification for `proxy`.
    pub fn subscribe(&mut self, producer: StreamingProducerId, proxy: ProxyId) {
        if let Some(producer) = self.producers.get_mut(&producer) {
            producer.subscribers.insert(proxy);
        }
    }

    pub fn unsubscribe(&mut self, producer: StreamingProducerId, proxy: ProxyId) {
        if let Some(producer) = self.producers.get_mut(&producer) {
            producer.subscribers.remove(&proxy);
        }
    }

    /// Removes every destroy notification registered for `proxy`.
    pub fn unsubscribe_all(&mut self, proxy: ProxyId) {
        for producer in self.producers.values_mut() {
            producer.subscribers.remove(&proxy);
        }
    }

    // ─── Allocations ───────────────────────────────────────────────────────

    /// Allocates a stack over `layers`; `None` entries are empty layers.
    ///
    /// # Panics
    ///
    /// If two present layers disagree on tile size or border, or a layer
    /// names an unknown producer.
    pub fn allocate(&mut self, layers: &[Option<StreamingProducerId>]) -> StreamingAllocationId {
        assert!(
            layers.len() <= MAX_STREAMING_LAYERS,
            "streaming stack has {} layers, maximum is {MAX_STREAMING_LAYERS}",
            layers.len()
        );

        let mut params: Option<(usize, u32, u32)> = None;
        for (index, layer) in layers.iter().enumerate() {
            let Some(producer_id) = layer else {
                continue;
            };
            let producer = self
                .producers
                .get(producer_id)
                .unwrap_or_else(|| panic!("streaming layer {index} names unknown {producer_id}"));
            match params {
                None => params = Some((index, producer.tile_size, producer.border)),
                Some((first, tile_size, border)) => assert!(
                    producer.tile_size == tile_size && producer.border == border,
                    "streaming layer {index} (tile {}, border {}) does not match layer {first} (tile {tile_size}, border {border})",
                    producer.tile_size,
                    producer.border
                ),
            }
        }

        let (_, tile_size, border) = params.unwrap_or((0, 0, 0));
        let id = StreamingAllocationId::next();
        self.allocations.insert(
            id,
            StreamingAllocation {
                layers: layers.iter().copied().collect(),
                tile_size,
                border,
            },
        );
        id
    }

    pub fn free(&mut self, id: StreamingAllocationId) {
        if self.allocations.remove(&id).is_none() {
            log::warn!("Freeing unknown streaming allocation {id}");
        }
    }

    #[must_use]
    pub fn allocation(&self, id: StreamingAllocationId) -> Option<&StreamingAllocation> {
        self.allocations.get(&id)
    }

    #[must_use]
    pub fn num_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Per-stack uniform block: allocation id, tile size, border, layer
    /// count, then the first four layer texture ids.
    #[must_use]
    pub fn stack_uniform(&self, id: StreamingAllocationId) -> [u32; 8] {
        let mut block = [NULL_TEXTURE_ID; 8];
        let Some(allocation) = self.allocations.get(&id) else {
            return block;
        };
        block[0] = id.raw() as u32;
        block[1] = allocation.tile_size;
        block[2] = allocation.border;
        block[3] = allocation.layers.len() as u32;
        for (slot, layer) in block[4..].iter_mut().zip(&allocation.layers) {
            if let Some(producer) = layer.and_then(|p| self.producers.get(&p)) {
                *slot = producer.texture.0;
            }
        }
        block
    }
}
