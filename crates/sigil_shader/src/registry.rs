//! In-memory Shader Map Registry
//!
//! Weak lookup index from [`ShaderMapId`] to live shader maps. The registry
//! never keeps a map alive; entries whose map has been dropped are pruned
//! lazily.
//!
//! Registration is idempotent: when an equal identity is already live, the
//! existing map wins and is returned, so every caller converges on one
//! instance.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::identity::ShaderMapId;
use crate::shader_map::ShaderMap;

/// Process-wide weak index of compiled shader maps.
#[derive(Debug, Default)]
pub struct ShaderMapRegistry {
    maps: Mutex<FxHashMap<ShaderMapId, Weak<ShaderMap>>>,
}

impl ShaderMapRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live map for `id`, if any.
    #[must_use]
    pub fn find(&self, id: &ShaderMapId) -> Option<Arc<ShaderMap>> {
        let mut maps = self.maps.lock();
        match maps.get(id).map(Weak::upgrade) {
            Some(Some(map)) => Some(map),
            Some(None) => {
                maps.remove(id);
                None
            }
            None => None,
        }
    }

    /// Registers a compiled map and returns the canonical instance.
    ///
    /// Maps that did not compile successfully are returned unregistered.
    pub fn register(&self, map: Arc<ShaderMap>) -> Arc<ShaderMap> {
        if !map.compiled_successfully() {
            log::warn!(
                "Refusing to register shader map '{}' without compiled content",
                map.friendly_name()
            );
            return map;
        }

        let mut maps = self.maps.lock();
        if let Some(existing) = maps.get(map.id()).and_then(Weak::upgrade) {
            if !Arc::ptr_eq(&existing, &map) {
                log::debug!(
                    "Shader map '{}' already registered, discarding duplicate",
                    map.friendly_name()
                );
            }
            return existing;
        }
        maps.insert(map.id().clone(), Arc::downgrade(&map));
        map
    }

    /// Removes `map` if it is the registered instance for its identity.
    pub fn unregister(&self, map: &Arc<ShaderMap>) -> bool {
        let mut maps = self.maps.lock();
        let is_registered = maps
            .get(map.id())
            .is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(map)));
        if is_registered {
            maps.remove(map.id());
        }
        is_registered
    }

    /// Number of live registered maps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries whose map is gone; returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut maps = self.maps.lock();
        let before = maps.len();
        maps.retain(|_, w| w.strong_count() > 0);
        before - maps.len()
    }

    /// Forgets every entry. Live maps stay alive with their owners.
    pub fn clear(&self) {
        self.maps.lock().clear();
    }
}
