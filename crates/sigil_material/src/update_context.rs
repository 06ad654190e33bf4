//! Batched material updates.
//!
//! A [`MaterialUpdateContext`] collects materials and instances whose
//! shaders must be recompiled. Nothing happens until the context is
//! dropped; then, in one pass:
//!
//! 1. every collected material and instance recaches its shaders;
//! 2. dependent instances are refreshed parents first: permutation
//!    resources are created or released as the new base description
//!    requires, recached, and their proxies' uniform caches invalidated;
//! 3. the render world receives a single `MaterialsUpdated` notification.
//!
//! ```rust,ignore
//! {
//!     let mut ctx = MaterialUpdateContext::new(&mut library, UpdateContextOptions::default());
//!     ctx.edit_material(key, new_description)?;
//! } // recompiles and notifies here
//! ```

use std::time::Instant;

use bitflags::bitflags;
use smallvec::SmallVec;

use sigil_core::{ResourceId, Result};
use sigil_render::RenderCommand;
use sigil_shader::MaterialDescription;

use crate::library::{InstanceKey, MaterialKey, MaterialLibrary, MaterialRef};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UpdateContextOptions: u8 {
        /// Wait for the render world before and after the batch.
        const SYNC_WITH_RENDER_THREAD = 1 << 0;
        /// Notify as a full render state recreation instead of a draw-list
        /// update.
        const RECREATE_RENDER_STATE   = 1 << 1;
    }
}

impl Default for UpdateContextOptions {
    /// Syncing needs a render world draining the queue on another thread
    /// (see `RenderWorld::spawn`), so it is opt-in.
    fn default() -> Self {
        Self::RECREATE_RENDER_STATE
    }
}

pub struct MaterialUpdateContext<'a> {
    library: &'a mut MaterialLibrary,
    options: UpdateContextOptions,
    targets: SmallVec<[MaterialRef; 8]>,
    started: Instant,
}

impl<'a> MaterialUpdateContext<'a> {
    pub fn new(library: &'a mut MaterialLibrary, options: UpdateContextOptions) -> Self {
        if options.contains(UpdateContextOptions::SYNC_WITH_RENDER_THREAD) {
            library.services().render_queue().flush();
        }
        Self {
            library,
            options,
            targets: SmallVec::new(),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn options(&self) -> UpdateContextOptions {
        self.options
    }

    /// Library the context operates on.
    #[must_use]
    pub fn library(&self) -> &MaterialLibrary {
        self.library
    }

    pub fn add_material(&mut self, key: MaterialKey) {
        self.add(MaterialRef::Material(key));
    }

    pub fn add_instance(&mut self, key: InstanceKey) {
        self.add(MaterialRef::Instance(key));
    }

    fn add(&mut self, target: MaterialRef) {
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
    }

    /// Replaces a material's description and schedules its recompile.
    pub fn edit_material(&mut self, key: MaterialKey, description: MaterialDescription) -> Result<()> {
        self.library.replace_description(key, description)?;
        self.add_material(key);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn collect_resources(&self, target: MaterialRef, out: &mut Vec<ResourceId>) {
        let tiers = &self.library.services().settings().active_tiers;
        let resources = tiers.iter().filter_map(|&tier| match target {
            MaterialRef::Material(key) => self.library.material(key)?.resource(tier),
            MaterialRef::Instance(key) => self.library.instance(key)?.resource(tier),
        });
        out.extend(resources.map(crate::MaterialResource::id));
    }
}

impl Drop for MaterialUpdateContext<'_> {
    fn drop(&mut self) {
        if self.targets.is_empty() {
            return;
        }

        let targets = std::mem::take(&mut self.targets);
        let mut updated = Vec::new();
        for &target in &targets {
            if let MaterialRef::Instance(key) = target {
                self.library.sync_permutation(key);
            }
            self.library.cache_shaders(target);
            self.collect_resources(target, &mut updated);
        }

        let mut dependents: Vec<InstanceKey> = Vec::new();
        for &target in &targets {
            for key in self.library.dependent_instances(target) {
                if !dependents.contains(&key) && !targets.contains(&MaterialRef::Instance(key)) {
                    dependents.push(key);
                }
            }
        }
        // Parents before children across all targets.
        dependents.sort_by_cached_key(|key| self.library.depth(MaterialRef::Instance(*key)));

        let queue = self.library.services().render_queue().clone();
        for key in &dependents {
            let target = MaterialRef::Instance(*key);
            if self.library.sync_permutation(*key) {
                self.library.cache_shaders(target);
                self.collect_resources(target, &mut updated);
            }
            if let Some(proxy) = self.library.proxy(target) {
                queue.enqueue(RenderCommand::CacheUniformExpressions {
                    proxy,
                    recreate_buffer: false,
                });
            }
        }

        let recreate = self
            .options
            .contains(UpdateContextOptions::RECREATE_RENDER_STATE);
        queue.enqueue(RenderCommand::MaterialsUpdated {
            resources: updated,
            recreate_render_state: recreate,
        });
        if self.options.contains(UpdateContextOptions::SYNC_WITH_RENDER_THREAD) {
            queue.flush();
        }

        log::debug!(
            "Material update: {} target(s), {} dependent instance(s) in {:.2} ms",
            targets.len(),
            dependents.len(),
            self.started.elapsed().as_secs_f64() * 1000.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_do_not_sync() {
        let options = UpdateContextOptions::default();
        assert!(!options.contains(UpdateContextOptions::SYNC_WITH_RENDER_THREAD));
        assert!(options.contains(UpdateContextOptions::RECREATE_RENDER_STATE));
    }
}
