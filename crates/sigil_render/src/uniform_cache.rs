//! Per-proxy, per-tier uniform expression cache.
//!
//! A cache is built against one shader map. While valid, its buffer layout
//! equals that map's expression set layout. Invalidation drops the shader
//! map reference and frees owned streaming allocations; the buffer itself is
//! only dropped when recreation is requested, otherwise it is refilled in
//! place (same id, bumped version) on the next build if the layout still
//! fits.

use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use sigil_core::{ProxyId, ResourceId, StreamingAllocationId, StreamingProducerId, UniformBufferId};
use sigil_shader::{ParameterSource, ShaderMap, UniformBufferLayout, UniformExpressionSet};

use crate::streaming::StreamingTextureSystem;

/// CPU copy of a uniform buffer ready for upload.
#[derive(Debug, Clone)]
pub struct UniformBuffer {
    id: UniformBufferId,
    layout: UniformBufferLayout,
    data: Vec<u8>,
    version: u64,
}

impl UniformBuffer {
    fn new(layout: UniformBufferLayout) -> Self {
        Self {
            id: UniformBufferId::next(),
            layout,
            data: vec![0; layout.size as usize],
            version: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> UniformBufferId {
        self.id
    }

    #[must_use]
    pub fn layout(&self) -> UniformBufferLayout {
        self.layout
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bumped on every refill; uploaders compare against their last upload.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Default)]
pub struct UniformExpressionCache {
    up_to_date: bool,
    shader_map: Weak<ShaderMap>,
    resource: Option<ResourceId>,
    buffer: Option<UniformBuffer>,
    allocations: SmallVec<[StreamingAllocationId; 2]>,
    producers: SmallVec<[StreamingProducerId; 4]>,
    parameter_collections: Vec<u64>,
}

impl UniformExpressionCache {
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.up_to_date
    }

    /// Shader map the cache was last built against, if still alive.
    #[must_use]
    pub fn shader_map(&self) -> Option<Arc<ShaderMap>> {
        self.shader_map.upgrade()
    }

    #[must_use]
    pub fn resource(&self) -> Option<ResourceId> {
        self.resource
    }

    #[must_use]
    pub fn buffer(&self) -> Option<&UniformBuffer> {
        self.buffer.as_ref()
    }

    /// Streaming allocations owned by this cache.
    #[must_use]
    pub fn allocations(&self) -> &[StreamingAllocationId] {
        &self.allocations
    }

    /// Streaming producers this cache reads from.
    #[must_use]
    pub fn producers(&self) -> &[StreamingProducerId] {
        &self.producers
    }

    #[must_use]
    pub fn parameter_collections(&self) -> &[u64] {
        &self.parameter_collections
    }

    /// Whether the cache is valid for exactly `map`.
    #[must_use]
    pub fn is_valid_for(&self, map: &Arc<ShaderMap>) -> bool {
        self.up_to_date && std::ptr::eq(self.shader_map.as_ptr(), Arc::as_ptr(map))
    }

    /// Returns the producers the cache no longer reads from; the caller
    /// drops their destroy notifications.
    pub(crate) fn invalidate(
        &mut self,
        streaming: &mut StreamingTextureSystem,
        recreate_buffer: bool,
    ) -> SmallVec<[StreamingProducerId; 4]> {
        self.up_to_date = false;
        self.shader_map = Weak::new();
        for allocation in self.allocations.drain(..) {
            streaming.free(allocation);
        }
        if recreate_buffer {
            self.buffer = None;
        }
        std::mem::take(&mut self.producers)
    }

    pub(crate) fn rebuild(
        &mut self,
        proxy: ProxyId,
        resource: ResourceId,
        shader_map: &Arc<ShaderMap>,
        source: &dyn ParameterSource,
        streaming: &mut StreamingTextureSystem,
    ) -> SmallVec<[StreamingProducerId; 4]> {
        let previous = self.invalidate(streaming, false);

        let empty = UniformExpressionSet::default();
        let set = shader_map.uniform_expression_set().unwrap_or(&empty);

        let mut stack_uniforms = Vec::with_capacity(set.streaming_stacks.len());
        for stack in &set.streaming_stacks {
            let producer_of = |expression: u32| {
                set.textures_streaming
                    .get(expression as usize)
                    .and_then(|t| streaming.producer_for_texture(t.evaluate(source)))
            };

            let allocation = if let Some(expression) = stack.preallocated_expression() {
                // Adopted, the producer owns it.
                let producer = producer_of(expression);
                if let Some(producer) = producer {
                    self.producers.push(producer);
                }
                producer.and_then(|p| streaming.producer(p)?.preallocated())
            } else {
                let layers: SmallVec<[_; 8]> =
                    stack.layers().iter().map(|&e| producer_of(e)).collect();
                self.producers.extend(layers.iter().flatten().copied());
                let allocation = streaming.allocate(&layers);
                self.allocations.push(allocation);
                Some(allocation)
            };
            stack_uniforms.push(allocation.map_or([sigil_shader::NULL_TEXTURE_ID; 8], |a| {
                streaming.stack_uniform(a)
            }));
        }
        for &producer in &self.producers {
            streaming.subscribe(producer, proxy);
        }

        let layout = set.layout();
        let mut buffer = match self.buffer.take() {
            Some(buffer) if buffer.layout == layout => buffer,
            _ => UniformBuffer::new(layout),
        };
        set.fill_uniform_buffer(source, &stack_uniforms, &mut buffer.data);
        buffer.version += 1;
        self.buffer = Some(buffer);

        self.parameter_collections.clone_from(&set.parameter_collections);
        self.shader_map = Arc::downgrade(shader_map);
        self.resource = Some(resource);
        self.up_to_date = true;

        previous
            .into_iter()
            .filter(|p| !self.producers.contains(p))
            .collect()
    }
}
