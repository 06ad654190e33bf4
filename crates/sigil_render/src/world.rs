//! Render World
//!
//! Consumer-side state of the material system. The world exclusively owns
//! every consumer shader map pointer, every render proxy and every uniform
//! expression cache. The producer reaches it only through the
//! [`RenderQueue`](crate::RenderQueue).
//!
//! # Frame flow
//!
//! ```text
//! process_commands()        apply queued commands in FIFO order
//!   └─ SetShaderMap         swap pointer, then invalidate dependent caches
//! update_deferred()         rebuild caches of proxies marked stale
//! prepare_draw(proxy, tier) resolve material (with fallback), ensure cache
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use sigil_core::{CapabilityTier, ProxyId, ResourceId, StreamingProducerId, TierMap};
use sigil_shader::{PermutationKey, ShaderBinary, ShaderMap};

use crate::proxy::{ProxyParameters, RenderProxy};
use crate::queue::{
    ParameterValue, ProxyKind, RenderCommand, RenderCommandReceiver, RenderMaterialInfo,
    command_name,
};
use crate::streaming::StreamingTextureSystem;
use crate::uniform_cache::{UniformBuffer, UniformExpressionCache};

/// Consumer-side view of one material resource.
#[derive(Debug)]
pub struct RenderMaterial {
    info: RenderMaterialInfo,
    shader_map: Option<Arc<ShaderMap>>,
}

impl RenderMaterial {
    #[must_use]
    pub fn info(&self) -> &RenderMaterialInfo {
        &self.info
    }

    /// Consumer pointer. Empty or a successfully compiled map.
    #[must_use]
    pub fn shader_map(&self) -> Option<&Arc<ShaderMap>> {
        self.shader_map.as_ref()
    }

    fn set_shader_map(&mut self, shader_map: Option<Arc<ShaderMap>>) -> Option<Arc<ShaderMap>> {
        if let Some(map) = &shader_map {
            assert!(
                map.compiled_successfully(),
                "'{}' received an incomplete shader map {}",
                self.info.friendly_name,
                map.id()
            );
        }
        self.info.binding.set_bound(shader_map.is_some());
        std::mem::replace(&mut self.shader_map, shader_map)
    }

    /// Compiled permutation `key`.
    ///
    /// # Panics
    ///
    /// A complete map missing a required permutation means the cache is
    /// inconsistent. Full diagnostics are logged before terminating.
    #[must_use]
    pub fn shader(&self, key: &PermutationKey) -> &ShaderBinary {
        let Some(map) = &self.shader_map else {
            log::error!(
                "Shader {key} requested from '{}' [{} / {}] which has no shader map",
                self.info.friendly_name,
                self.info.tier,
                self.info.quality
            );
            panic!("material '{}' has no shader map", self.info.friendly_name);
        };
        if let Some(binary) = map.shader(key) {
            return binary;
        }
        log::error!(
            "Shader map inconsistency: {key} missing from '{}'\n  tier: {} quality: {}\n  usage: {}\n  map: {}\n  permutations:\n{}",
            self.info.friendly_name,
            self.info.tier,
            self.info.quality,
            self.info.usage_description,
            map.describe(),
            map.permutation_report()
        );
        panic!(
            "shader map of '{}' is missing permutation {key}",
            self.info.friendly_name
        );
    }

    /// Human-readable summary for debug dumps.
    #[must_use]
    pub fn describe(&self) -> String {
        let map = self
            .shader_map
            .as_ref()
            .map_or_else(|| "<none>".to_string(), |m| m.describe());
        format!(
            "'{}' [{} / {}]{} map: {map}",
            self.info.friendly_name,
            self.info.tier,
            self.info.quality,
            if self.info.is_default { " (default)" } else { "" }
        )
    }
}

/// Material a proxy renders with for one tier.
#[derive(Debug, Clone)]
pub struct MaterialBinding {
    pub resource: ResourceId,
    pub shader_map: Arc<ShaderMap>,
    /// Proxy whose parameters (and uniform cache) are used. Differs from the
    /// requested proxy when the default material is substituted.
    pub parameter_proxy: ProxyId,
}

impl MaterialBinding {
    #[must_use]
    pub fn is_fallback(&self, requested: ProxyId) -> bool {
        self.parameter_proxy != requested
    }
}

/// Counters for tests and diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderWorldStats {
    pub commands_applied: u64,
    pub shader_map_swaps: u64,
    pub cache_invalidations: u64,
    pub evaluations: u64,
    pub materials_updated: u64,
    pub render_state_recreations: u64,
}

/// Options for [`RenderWorld::new`].
#[derive(Debug, Clone)]
pub struct RenderWorldOptions {
    /// Batch cache rebuilds once per frame instead of evaluating on
    /// invalidation.
    pub defer_uniform_expression_caching: bool,
    pub active_tiers: Vec<CapabilityTier>,
}

impl Default for RenderWorldOptions {
    fn default() -> Self {
        Self {
            defer_uniform_expression_caching: true,
            active_tiers: vec![CapabilityTier::default()],
        }
    }
}

impl From<&sigil_core::MaterialSettings> for RenderWorldOptions {
    fn from(settings: &sigil_core::MaterialSettings) -> Self {
        Self {
            defer_uniform_expression_caching: settings.defer_uniform_expression_caching,
            active_tiers: settings.active_tiers.clone(),
        }
    }
}

pub struct RenderWorld {
    receiver: RenderCommandReceiver,
    options: RenderWorldOptions,
    materials: FxHashMap<ResourceId, RenderMaterial>,
    proxies: FxHashMap<ProxyId, RenderProxy>,
    /// Parent proxy to the proxies chained to it.
    children: FxHashMap<ProxyId, SmallVec<[ProxyId; 4]>>,
    /// Resource to the proxies listing it as their own material.
    material_users: FxHashMap<ResourceId, SmallVec<[ProxyId; 2]>>,
    /// Resource to the tier caches last built from it.
    built_from: FxHashMap<ResourceId, SmallVec<[(ProxyId, CapabilityTier); 4]>>,
    default_proxy: Option<ProxyId>,
    deferred: BTreeSet<ProxyId>,
    streaming: StreamingTextureSystem,
    stats: RenderWorldStats,
}

impl RenderWorld {
    #[must_use]
    pub fn new(receiver: RenderCommandReceiver, options: RenderWorldOptions) -> Self {
        Self {
            receiver,
            options,
            materials: FxHashMap::default(),
            proxies: FxHashMap::default(),
            children: FxHashMap::default(),
            material_users: FxHashMap::default(),
            built_from: FxHashMap::default(),
            default_proxy: None,
            deferred: BTreeSet::new(),
            streaming: StreamingTextureSystem::new(),
            stats: RenderWorldStats::default(),
        }
    }

    /// Moves the world onto a dedicated render thread that applies commands
    /// as they arrive and rebuilds deferred caches after each batch. The
    /// thread exits when every [`RenderQueue`](crate::RenderQueue) is dropped
    /// and hands the world back through the join handle.
    pub fn spawn(mut self) -> std::io::Result<JoinHandle<RenderWorld>> {
        std::thread::Builder::new()
            .name("sigil-render".into())
            .spawn(move || {
                while let Some(command) = self.receiver.recv() {
                    self.apply(command);
                    self.process_commands();
                    self.update_deferred();
                }
                log::debug!("Render thread exiting");
                self
            })
    }

    // ─── Accessors ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn stats(&self) -> RenderWorldStats {
        self.stats
    }

    #[must_use]
    pub fn material(&self, resource: ResourceId) -> Option<&RenderMaterial> {
        self.materials.get(&resource)
    }

    /// Consumer pointer of `resource`.
    #[must_use]
    pub fn shader_map(&self, resource: ResourceId) -> Option<&Arc<ShaderMap>> {
        self.materials.get(&resource)?.shader_map()
    }

    #[must_use]
    pub fn proxy(&self, proxy: ProxyId) -> Option<&RenderProxy> {
        self.proxies.get(&proxy)
    }

    #[must_use]
    pub fn default_proxy(&self) -> Option<ProxyId> {
        self.default_proxy
    }

    #[must_use]
    pub fn streaming(&self) -> &StreamingTextureSystem {
        &self.streaming
    }

    #[must_use]
    pub fn uniform_cache(&self, proxy: ProxyId, tier: CapabilityTier) -> Option<&UniformExpressionCache> {
        Some(&self.proxies.get(&proxy)?.caches[tier])
    }

    #[must_use]
    pub fn uniform_buffer(&self, proxy: ProxyId, tier: CapabilityTier) -> Option<&UniformBuffer> {
        self.uniform_cache(proxy, tier)?.buffer()
    }

    #[must_use]
    pub fn is_deferred(&self, proxy: ProxyId) -> bool {
        self.deferred.contains(&proxy)
    }

    /// Debug dump of every material, sorted by resource id.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut resources: Vec<_> = self.materials.keys().copied().collect();
        resources.sort_unstable();
        resources
            .iter()
            .map(|r| format!("{r}: {}", self.materials[r].describe()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ─── Commands ──────────────────────────────────────────────────────────

    /// Applies every queued command. Returns how many were applied.
    pub fn process_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Some(command) = self.receiver.try_recv() {
            self.apply(command);
            applied += 1;
        }
        applied
    }

    /// Applies queued commands and rebuilds deferred caches.
    pub fn run_frame(&mut self) {
        self.process_commands();
        self.update_deferred();
    }

    fn apply(&mut self, command: RenderCommand) {
        log::trace!("apply {}", command_name(&command));
        self.stats.commands_applied += 1;
        match command {
            RenderCommand::RegisterMaterial { resource, info } => {
                info.binding.set_bound(false);
                self.materials.insert(
                    resource,
                    RenderMaterial {
                        info,
                        shader_map: None,
                    },
                );
            }
            RenderCommand::SetShaderMap {
                resource,
                shader_map,
            } => self.set_shader_map(resource, shader_map),
            RenderCommand::ReleaseMaterial { resource } => {
                if let Some(mut material) = self.materials.remove(&resource) {
                    material.set_shader_map(None);
                    self.invalidate_dependents(resource, material.info.tier, true);
                    self.built_from.remove(&resource);
                }
            }
            RenderCommand::CreateProxy { proxy, kind } => {
                if let Some(parent) = kind.parent() {
                    self.children.entry(parent).or_default().push(proxy);
                }
                if let Some(materials) = own_materials(&kind) {
                    self.index_materials(proxy, materials);
                }
                self.proxies.insert(proxy, RenderProxy::new(kind));
                self.mark_stale(proxy);
            }
            RenderCommand::SetProxyMaterials { proxy, materials } => {
                self.set_proxy_materials(proxy, materials);
            }
            RenderCommand::SetParameter { proxy, name, value } => {
                self.set_parameter(proxy, &name, Some(value));
            }
            RenderCommand::ClearParameter { proxy, name } => {
                self.set_parameter(proxy, &name, None);
            }
            RenderCommand::CacheUniformExpressions {
                proxy,
                recreate_buffer,
            } => self.invalidate_uniform_expression_cache(proxy, recreate_buffer),
            RenderCommand::RemoveProxy { proxy } => self.remove_proxy(proxy),
            RenderCommand::SetDefaultProxy { proxy } => self.default_proxy = Some(proxy),
            RenderCommand::CreateStreamingProducer {
                producer,
                texture,
                tile_size,
                border,
                preallocated,
            } => self
                .streaming
                .create_producer(producer, texture, tile_size, border, preallocated),
            RenderCommand::DestroyStreamingProducer { producer } => {
                for proxy in self.streaming.destroy_producer(producer) {
                    self.invalidate_uniform_expression_cache(proxy, false);
                }
            }
            RenderCommand::MaterialsUpdated {
                resources,
                recreate_render_state,
            } => {
                self.stats.materials_updated += 1;
                if recreate_render_state {
                    self.stats.render_state_recreations += 1;
                }
                log::debug!(
                    "{} material(s) updated{}",
                    resources.len(),
                    if recreate_render_state { ", render state recreated" } else { "" }
                );
            }
            RenderCommand::Fence(done) => {
                let _ = done.send(());
            }
        }
    }

    fn set_shader_map(&mut self, resource: ResourceId, shader_map: Option<Arc<ShaderMap>>) {
        let Some(material) = self.materials.get_mut(&resource) else {
            log::warn!("SetShaderMap for unknown {resource}");
            return;
        };
        let tier = material.info.tier;
        let new_layout = shader_map.as_ref().and_then(|m| m.uniform_buffer_layout());
        let previous = material.set_shader_map(shader_map);
        material.info.binding.acknowledge_publish();
        self.stats.shader_map_swaps += 1;

        let old_layout = previous.as_ref().and_then(|m| m.uniform_buffer_layout());
        self.invalidate_dependents(resource, tier, old_layout != new_layout);
    }

    fn set_proxy_materials(&mut self, proxy: ProxyId, materials: TierMap<Option<ResourceId>>) {
        let Some(render_proxy) = self.proxies.get_mut(&proxy) else {
            return;
        };
        let previous = match &mut render_proxy.kind {
            ProxyKind::Material { materials: own } | ProxyKind::Instance { materials: own, .. } => {
                std::mem::replace(own, materials.clone())
            }
            other => {
                log::warn!("{proxy} ({other:?}) does not own materials");
                return;
            }
        };
        self.unindex_materials(proxy, &previous);
        self.index_materials(proxy, &materials);
        self.invalidate_with_children(proxy, false);
    }

    fn set_parameter(&mut self, proxy: ProxyId, name: &str, value: Option<ParameterValue>) {
        let Some(render_proxy) = self.proxies.get_mut(&proxy) else {
            return;
        };
        match value {
            Some(value) => render_proxy.overrides.set(name, value),
            None => render_proxy.overrides.clear(name),
        }
        self.invalidate_with_children(proxy, false);
    }

    fn remove_proxy(&mut self, proxy: ProxyId) {
        self.deferred.remove(&proxy);
        if let Some(mut render_proxy) = self.proxies.remove(&proxy) {
            for (tier, cache) in render_proxy.caches.iter_mut() {
                if let Some(resource) = cache.resource() {
                    self.forget_build(resource, proxy, tier);
                }
                let _ = cache.invalidate(&mut self.streaming, true);
            }
            if let Some(parent) = render_proxy.kind.parent()
                && let Some(siblings) = self.children.get_mut(&parent)
            {
                siblings.retain(|c| *c != proxy);
            }
            if let Some(materials) = own_materials(&render_proxy.kind) {
                self.unindex_materials(proxy, materials);
            }
        }
        self.streaming.unsubscribe_all(proxy);
        if self.default_proxy == Some(proxy) {
            self.default_proxy = None;
        }
        // Orphans no longer resolve a material.
        for child in self.children.remove(&proxy).unwrap_or_default() {
            self.invalidate_with_children(child, false);
        }
    }

    // ─── Indices ───────────────────────────────────────────────────────────

    fn index_materials(&mut self, proxy: ProxyId, materials: &TierMap<Option<ResourceId>>) {
        for (_, resource) in materials.iter() {
            if let Some(resource) = resource {
                let users = self.material_users.entry(*resource).or_default();
                if !users.contains(&proxy) {
                    users.push(proxy);
                }
            }
        }
    }

    fn unindex_materials(&mut self, proxy: ProxyId, materials: &TierMap<Option<ResourceId>>) {
        for (_, resource) in materials.iter() {
            if let Some(resource) = resource
                && let Some(users) = self.material_users.get_mut(resource)
            {
                users.retain(|p| *p != proxy);
                if users.is_empty() {
                    self.material_users.remove(resource);
                }
            }
        }
    }

    fn forget_build(&mut self, resource: ResourceId, proxy: ProxyId, tier: CapabilityTier) {
        if let Some(builds) = self.built_from.get_mut(&resource) {
            builds.retain(|b| *b != (proxy, tier));
            if builds.is_empty() {
                self.built_from.remove(&resource);
            }
        }
    }

    /// Drops destroy notifications for `dropped` producers no tier cache of
    /// `proxy` still reads from.
    fn release_subscriptions(
        streaming: &mut StreamingTextureSystem,
        render_proxy: &RenderProxy,
        proxy: ProxyId,
        dropped: SmallVec<[StreamingProducerId; 4]>,
    ) {
        for producer in dropped {
            if !render_proxy
                .caches
                .iter()
                .any(|(_, c)| c.producers().contains(&producer))
            {
                streaming.unsubscribe(producer, proxy);
            }
        }
    }

    // ─── Material resolution ───────────────────────────────────────────────

    /// Resource `proxy` renders with at `tier`, ignoring availability.
    fn resolve_resource(&self, proxy: ProxyId, tier: CapabilityTier) -> Option<ResourceId> {
        let mut current = proxy;
        for _ in 0..self.proxies.len() {
            match &self.proxies.get(&current)?.kind {
                ProxyKind::Material { materials } => return materials[tier],
                ProxyKind::Instance { parent, materials } => match materials[tier] {
                    Some(resource) => return Some(resource),
                    None => current = *parent,
                },
                other => current = other.parent()?,
            }
        }
        None
    }

    /// Material `proxy` renders with at `tier`, substituting the default
    /// proxy when its own resource has no shader map.
    ///
    /// # Panics
    ///
    /// If the default material itself has no shader map.
    #[must_use]
    pub fn material_with_fallback(&self, proxy: ProxyId, tier: CapabilityTier) -> Option<MaterialBinding> {
        if let Some(binding) = self.own_material(proxy, tier) {
            return Some(binding);
        }

        let default = self.default_proxy?;
        let resource = self.resolve_resource(default, tier);
        match resource.and_then(|r| Some((r, self.shader_map(r)?))) {
            Some((resource, map)) => Some(MaterialBinding {
                resource,
                shader_map: Arc::clone(map),
                parameter_proxy: default,
            }),
            None => {
                let name = resource
                    .and_then(|r| self.materials.get(&r))
                    .map_or("<unbound>", |m| m.info.friendly_name.as_str());
                log::error!(
                    "Default material '{name}' has no shader map for {tier} (requested by {proxy})"
                );
                panic!("default material '{name}' has no shader map for {tier}");
            }
        }
    }

    /// Material `proxy` renders with at `tier` if its own resource has a map.
    fn own_material(&self, proxy: ProxyId, tier: CapabilityTier) -> Option<MaterialBinding> {
        let resource = self.resolve_resource(proxy, tier)?;
        let map = self.shader_map(resource)?;
        Some(MaterialBinding {
            resource,
            shader_map: Arc::clone(map),
            parameter_proxy: proxy,
        })
    }

    // ─── Uniform expression caches ─────────────────────────────────────────

    fn mark_stale(&mut self, proxy: ProxyId) {
        if self.options.defer_uniform_expression_caching {
            self.deferred.insert(proxy);
        } else {
            for tier in self.options.active_tiers.clone() {
                self.update_if_needed(proxy, tier);
            }
        }
    }

    /// Marks every tier cache of `proxy` invalid and releases its streaming
    /// allocations. The buffer is dropped only if `recreate_buffer`.
    pub fn invalidate_uniform_expression_cache(&mut self, proxy: ProxyId, recreate_buffer: bool) {
        let Some(render_proxy) = self.proxies.get_mut(&proxy) else {
            return;
        };
        for (_, cache) in render_proxy.caches.iter_mut() {
            let _ = cache.invalidate(&mut self.streaming, recreate_buffer);
        }
        self.streaming.unsubscribe_all(proxy);
        self.stats.cache_invalidations += 1;
        self.mark_stale(proxy);
    }

    /// Invalidates the `tier` cache of `proxy` only. Caches of other tiers
    /// keep their buffers, allocations and destroy notifications.
    fn invalidate_tier(&mut self, proxy: ProxyId, tier: CapabilityTier, recreate_buffer: bool) {
        let Some(render_proxy) = self.proxies.get_mut(&proxy) else {
            return;
        };
        let dropped = render_proxy.caches[tier].invalidate(&mut self.streaming, recreate_buffer);
        Self::release_subscriptions(&mut self.streaming, render_proxy, proxy, dropped);
        self.stats.cache_invalidations += 1;
        self.mark_stale(proxy);
    }

    fn invalidate_with_children(&mut self, proxy: ProxyId, recreate_buffer: bool) {
        let mut stale = vec![proxy];
        let mut seen = FxHashSet::from_iter([proxy]);
        let mut cursor = 0;
        while cursor < stale.len() {
            if let Some(children) = self.children.get(&stale[cursor]) {
                let mut children: SmallVec<[ProxyId; 4]> =
                    children.iter().copied().filter(|c| seen.insert(*c)).collect();
                children.sort_unstable();
                stale.extend(children);
            }
            cursor += 1;
        }
        for proxy in stale {
            self.invalidate_uniform_expression_cache(proxy, recreate_buffer);
        }
    }

    /// Invalidates the `tier` caches built from `resource` and those of
    /// every proxy that renders `resource` at `tier`.
    fn invalidate_dependents(&mut self, resource: ResourceId, tier: CapabilityTier, recreate_buffer: bool) {
        let mut dependents: Vec<(ProxyId, CapabilityTier)> = self
            .built_from
            .get(&resource)
            .map(|builds| builds.to_vec())
            .unwrap_or_default();

        let mut frontier: Vec<ProxyId> = self
            .material_users
            .get(&resource)
            .map(|users| users.to_vec())
            .unwrap_or_default();
        let mut seen = FxHashSet::default();
        while let Some(proxy) = frontier.pop() {
            if !seen.insert(proxy) || self.resolve_resource(proxy, tier) != Some(resource) {
                continue;
            }
            dependents.push((proxy, tier));
            if let Some(children) = self.children.get(&proxy) {
                frontier.extend(children.iter().copied());
            }
        }

        dependents.sort_unstable();
        dependents.dedup();
        for (proxy, tier) in dependents {
            self.invalidate_tier(proxy, tier, recreate_buffer);
        }
    }

    /// Rebuilds the cache of `proxy` for `tier` against its current material.
    ///
    /// Returns `false` without touching the cache when the proxy has no
    /// material or the default material is substituted for it.
    pub fn evaluate_uniform_expressions(&mut self, proxy: ProxyId, tier: CapabilityTier) -> bool {
        let Some(binding) = self.own_material(proxy, tier) else {
            return false;
        };
        let Some(render_proxy) = self.proxies.get_mut(&proxy) else {
            return false;
        };
        let mut cache = std::mem::take(&mut render_proxy.caches[tier]);
        let previous_resource = cache.resource();
        let dropped = cache.rebuild(
            proxy,
            binding.resource,
            &binding.shader_map,
            &ProxyParameters::new(&self.proxies, proxy),
            &mut self.streaming,
        );
        if let Some(render_proxy) = self.proxies.get_mut(&proxy) {
            render_proxy.caches[tier] = cache;
            Self::release_subscriptions(&mut self.streaming, render_proxy, proxy, dropped);
        }
        if previous_resource != Some(binding.resource) {
            if let Some(previous) = previous_resource {
                self.forget_build(previous, proxy, tier);
            }
            self.built_from
                .entry(binding.resource)
                .or_default()
                .push((proxy, tier));
        }
        self.stats.evaluations += 1;
        true
    }

    /// Rebuilds the cache of `proxy` for `tier` unless it is valid for the
    /// current material. Skipped entirely when a fallback applies.
    pub fn update_if_needed(&mut self, proxy: ProxyId, tier: CapabilityTier) {
        let Some(binding) = self.own_material(proxy, tier) else {
            return;
        };
        let up_to_date = self
            .proxies
            .get(&proxy)
            .is_some_and(|p| p.caches[tier].is_valid_for(&binding.shader_map));
        if !up_to_date {
            self.evaluate_uniform_expressions(proxy, tier);
        }
    }

    /// Rebuilds every deferred proxy for every active tier.
    pub fn update_deferred(&mut self) -> usize {
        let pending = std::mem::take(&mut self.deferred);
        let count = pending.len();
        let tiers = self.options.active_tiers.clone();
        for proxy in pending {
            for &tier in &tiers {
                self.update_if_needed(proxy, tier);
            }
        }
        count
    }

    /// Resolves the material for a draw and makes sure the uniform cache it
    /// reads from is current.
    pub fn prepare_draw(&mut self, proxy: ProxyId, tier: CapabilityTier) -> Option<MaterialBinding> {
        let binding = self.material_with_fallback(proxy, tier)?;
        self.update_if_needed(binding.parameter_proxy, tier);
        Some(binding)
    }
}

fn own_materials(kind: &ProxyKind) -> Option<&TierMap<Option<ResourceId>>> {
    match kind {
        ProxyKind::Material { materials } | ProxyKind::Instance { materials, .. } => Some(materials),
        _ => None,
    }
}
