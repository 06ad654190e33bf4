//! Material Library
//!
//! Owns materials and material instances and their producer-side resources,
//! one per active capability tier at the active quality. Each material and
//! instance has one render proxy; instances chain to their parent's proxy so
//! parameter lookups forward up the hierarchy on the render side.
//!
//! Instances that override static parameters compile their own permutation
//! resources; all others render with their parent's.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use sigil_core::{
    CapabilityTier, ProxyId, ResourceId, Result, SigilError, StaticParameterSet, TierMap,
};
use sigil_render::{ParameterValue, ProxyKind, RenderCommand};
use sigil_shader::MaterialDescription;

use crate::resource::MaterialResource;
use crate::services::MaterialServices;

new_key_type! {
    pub struct MaterialKey;
    pub struct InstanceKey;
}

/// Parent of an instance, or target of a parameter change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialRef {
    Material(MaterialKey),
    Instance(InstanceKey),
}

impl From<MaterialKey> for MaterialRef {
    fn from(key: MaterialKey) -> Self {
        Self::Material(key)
    }
}

impl From<InstanceKey> for MaterialRef {
    fn from(key: InstanceKey) -> Self {
        Self::Instance(key)
    }
}

pub struct Material {
    description: Arc<MaterialDescription>,
    resources: TierMap<Option<MaterialResource>>,
    proxy: ProxyId,
    parameters: FxHashMap<String, ParameterValue>,
}

impl Material {
    #[must_use]
    pub fn description(&self) -> &Arc<MaterialDescription> {
        &self.description
    }

    #[must_use]
    pub fn resource(&self, tier: CapabilityTier) -> Option<&MaterialResource> {
        self.resources[tier].as_ref()
    }

    #[must_use]
    pub fn proxy(&self) -> ProxyId {
        self.proxy
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<ParameterValue> {
        self.parameters.get(name).copied()
    }
}

pub struct MaterialInstance {
    parent: MaterialRef,
    static_overrides: StaticParameterSet,
    /// Own permutation resources, present when static overrides change the
    /// shader.
    resources: TierMap<Option<MaterialResource>>,
    proxy: ProxyId,
    parameters: FxHashMap<String, ParameterValue>,
}

impl MaterialInstance {
    #[must_use]
    pub fn parent(&self) -> MaterialRef {
        self.parent
    }

    #[must_use]
    pub fn static_overrides(&self) -> &StaticParameterSet {
        &self.static_overrides
    }

    #[must_use]
    pub fn resource(&self, tier: CapabilityTier) -> Option<&MaterialResource> {
        self.resources[tier].as_ref()
    }

    #[must_use]
    pub fn has_static_permutation(&self) -> bool {
        self.resources.iter().any(|(_, r)| r.is_some())
    }

    #[must_use]
    pub fn proxy(&self) -> ProxyId {
        self.proxy
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<ParameterValue> {
        self.parameters.get(name).copied()
    }
}

pub struct MaterialLibrary {
    services: Arc<MaterialServices>,
    materials: SlotMap<MaterialKey, Material>,
    instances: SlotMap<InstanceKey, MaterialInstance>,
    owners: FxHashMap<ResourceId, MaterialRef>,
    default_material: Option<MaterialKey>,
}

impl MaterialLibrary {
    #[must_use]
    pub fn new(services: Arc<MaterialServices>) -> Self {
        Self {
            services,
            materials: SlotMap::with_key(),
            instances: SlotMap::with_key(),
            owners: FxHashMap::default(),
            default_material: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn services(&self) -> &Arc<MaterialServices> {
        &self.services
    }

    #[must_use]
    pub fn material(&self, key: MaterialKey) -> Option<&Material> {
        self.materials.get(key)
    }

    #[must_use]
    pub fn instance(&self, key: InstanceKey) -> Option<&MaterialInstance> {
        self.instances.get(key)
    }

    #[must_use]
    pub fn default_material(&self) -> Option<MaterialKey> {
        self.default_material
    }

    #[must_use]
    pub fn proxy(&self, target: MaterialRef) -> Option<ProxyId> {
        match target {
            MaterialRef::Material(key) => self.materials.get(key).map(|m| m.proxy),
            MaterialRef::Instance(key) => self.instances.get(key).map(|i| i.proxy),
        }
    }

    /// Resource rendered by `target` at `tier`, following the parent chain.
    #[must_use]
    pub fn resource(&self, target: MaterialRef, tier: CapabilityTier) -> Option<&MaterialResource> {
        match target {
            MaterialRef::Material(key) => self.materials.get(key)?.resources[tier].as_ref(),
            MaterialRef::Instance(key) => {
                let instance = self.instances.get(key)?;
                match &instance.resources[tier] {
                    Some(resource) => Some(resource),
                    None => self.resource(instance.parent, tier),
                }
            }
        }
    }

    /// Owner of a resource id.
    #[must_use]
    pub fn resource_owner(&self, resource: ResourceId) -> Option<MaterialRef> {
        self.owners.get(&resource).copied()
    }

    pub(crate) fn resource_by_id_mut(&mut self, resource: ResourceId) -> Option<&mut MaterialResource> {
        let slots = match *self.owners.get(&resource)? {
            MaterialRef::Material(key) => &mut self.materials.get_mut(key)?.resources,
            MaterialRef::Instance(key) => &mut self.instances.get_mut(key)?.resources,
        };
        slots
            .iter_mut()
            .find_map(|(_, slot)| slot.as_mut().filter(|r| r.id() == resource))
    }

    fn active_tiers(&self) -> Vec<CapabilityTier> {
        self.services.settings().active_tiers.clone()
    }

    fn new_resources(
        &mut self,
        owner: MaterialRef,
        description: &Arc<MaterialDescription>,
        static_overrides: Option<&StaticParameterSet>,
    ) -> TierMap<Option<MaterialResource>> {
        let quality = self.services.settings().active_quality;
        let mut resources = TierMap::default();
        for tier in self.active_tiers() {
            let resource = MaterialResource::new(
                &self.services,
                Arc::clone(description),
                static_overrides.cloned(),
                quality,
                tier,
            );
            self.owners.insert(resource.id(), owner);
            resources[tier] = Some(resource);
        }
        resources
    }

    fn resource_ids(resources: &TierMap<Option<MaterialResource>>) -> TierMap<Option<ResourceId>> {
        TierMap::from_fn(|tier| resources[tier].as_ref().map(MaterialResource::id))
    }

    // ─── Materials ─────────────────────────────────────────────────────────

    /// Adds the fallback material and compiles it synchronously.
    ///
    /// # Panics
    ///
    /// If the default material cannot produce a shader map.
    pub fn set_default_material(&mut self, description: MaterialDescription) -> MaterialKey {
        let key = self.add_material(description.as_default());
        let proxy = self.materials[key].proxy;
        self.services
            .render_queue()
            .enqueue(RenderCommand::SetDefaultProxy { proxy });
        self.default_material = Some(key);
        key
    }

    /// Adds a material and starts caching its shaders for every active tier.
    pub fn add_material(&mut self, description: MaterialDescription) -> MaterialKey {
        let description = Arc::new(description);
        let proxy = ProxyId::next();
        let key = self.materials.insert(Material {
            description: Arc::clone(&description),
            resources: TierMap::default(),
            proxy,
            parameters: FxHashMap::default(),
        });
        let resources = self.new_resources(MaterialRef::Material(key), &description, None);
        self.services.render_queue().enqueue(RenderCommand::CreateProxy {
            proxy,
            kind: ProxyKind::Material {
                materials: Self::resource_ids(&resources),
            },
        });
        self.materials[key].resources = resources;
        self.cache_shaders(MaterialRef::Material(key));
        log::debug!("Added material '{}'", description.name);
        key
    }

    /// Replaces a material's description without recompiling. Use a
    /// [`MaterialUpdateContext`](crate::MaterialUpdateContext) to recompile.
    pub fn replace_description(&mut self, key: MaterialKey, description: MaterialDescription) -> Result<()> {
        let material = self
            .materials
            .get_mut(key)
            .ok_or_else(|| SigilError::ResourceNotFound(format!("{key:?}")))?;
        let is_default = material.description.is_default;
        let mut description = description;
        description.is_default = is_default;
        material.description = Arc::new(description);
        for (_, resource) in material.resources.iter_mut() {
            if let Some(resource) = resource {
                resource.set_description(Arc::clone(&material.description));
            }
        }
        Ok(())
    }

    /// Removes a material. Instances still referencing it render with the
    /// default material.
    pub fn remove_material(&mut self, key: MaterialKey) {
        if self.default_material == Some(key) {
            log::warn!("Removing the default material");
            self.default_material = None;
        }
        let Some(mut material) = self.materials.remove(key) else {
            return;
        };
        self.release_resources(&mut material.resources);
        self.services
            .render_queue()
            .enqueue(RenderCommand::RemoveProxy {
                proxy: material.proxy,
            });
    }

    // ─── Instances ─────────────────────────────────────────────────────────

    /// Root material of `target`.
    #[must_use]
    pub fn base_material(&self, target: MaterialRef) -> Option<MaterialKey> {
        let mut current = target;
        for _ in 0..=self.instances.len() {
            match current {
                MaterialRef::Material(key) => return Some(key),
                MaterialRef::Instance(key) => current = self.instances.get(key)?.parent,
            }
        }
        None
    }

    /// Static overrides accumulated along the chain, root first.
    #[must_use]
    pub fn effective_static_overrides(&self, target: MaterialRef) -> StaticParameterSet {
        let mut chain = Vec::new();
        let mut current = target;
        while let MaterialRef::Instance(key) = current {
            let Some(instance) = self.instances.get(key) else {
                break;
            };
            chain.push(&instance.static_overrides);
            current = instance.parent;
            if chain.len() > self.instances.len() {
                break;
            }
        }
        let mut merged = StaticParameterSet::new();
        for overrides in chain.into_iter().rev() {
            merged.merge(overrides);
        }
        merged
    }

    /// Whether `overrides` on top of `parent` changes the compiled shader.
    fn needs_permutation(&self, parent: MaterialRef, overrides: &StaticParameterSet) -> bool {
        let Some(base) = self.base_material(parent) else {
            return false;
        };
        let description = &self.materials[base].description;
        let inherited = self.effective_static_overrides(parent);
        let before = description.effective_static_parameters(Some(&inherited));
        let after = before.merged_with(overrides);
        before != after || self.has_permutation(parent)
    }

    fn has_permutation(&self, target: MaterialRef) -> bool {
        match target {
            MaterialRef::Material(_) => false,
            MaterialRef::Instance(key) => self
                .instances
                .get(key)
                .is_some_and(MaterialInstance::has_static_permutation),
        }
    }

    /// Adds an instance of `parent` overriding `static_overrides`.
    pub fn add_instance(
        &mut self,
        parent: impl Into<MaterialRef>,
        static_overrides: StaticParameterSet,
    ) -> Result<InstanceKey> {
        let parent = parent.into();
        let parent_proxy = self
            .proxy(parent)
            .ok_or_else(|| SigilError::ResourceNotFound(format!("{parent:?}")))?;
        let needs_permutation = self.needs_permutation(parent, &static_overrides);

        let proxy = ProxyId::next();
        let key = self.instances.insert(MaterialInstance {
            parent,
            static_overrides,
            resources: TierMap::default(),
            proxy,
            parameters: FxHashMap::default(),
        });

        let resources = if needs_permutation {
            self.permutation_resources(key)
        } else {
            TierMap::default()
        };
        self.services.render_queue().enqueue(RenderCommand::CreateProxy {
            proxy,
            kind: ProxyKind::Instance {
                parent: parent_proxy,
                materials: Self::resource_ids(&resources),
            },
        });
        self.instances[key].resources = resources;
        if needs_permutation {
            self.cache_shaders(MaterialRef::Instance(key));
        }
        Ok(key)
    }

    fn permutation_resources(&mut self, key: InstanceKey) -> TierMap<Option<MaterialResource>> {
        let target = MaterialRef::Instance(key);
        let Some(base) = self.base_material(target) else {
            return TierMap::default();
        };
        let description = Arc::clone(&self.materials[base].description);
        let overrides = self.effective_static_overrides(target);
        self.new_resources(target, &description, Some(&overrides))
    }

    /// Points an instance's permutation resources at the current base
    /// description and accumulated overrides.
    fn refresh_instance(&mut self, key: InstanceKey) {
        let target = MaterialRef::Instance(key);
        let Some(base) = self.base_material(target) else {
            return;
        };
        let description = Arc::clone(&self.materials[base].description);
        let overrides = self.effective_static_overrides(target);
        if let Some(instance) = self.instances.get_mut(key) {
            for (_, resource) in instance.resources.iter_mut() {
                if let Some(resource) = resource {
                    resource.set_description(Arc::clone(&description));
                    resource.set_static_overrides(Some(overrides.clone()));
                }
            }
        }
    }

    /// Creates or releases the permutation resources of an instance so it
    /// owns them exactly when its static overrides change the compiled
    /// shader under the current base description. Kept resources are
    /// refreshed. Returns whether the instance owns resources afterwards.
    pub(crate) fn sync_permutation(&mut self, key: InstanceKey) -> bool {
        let Some(instance) = self.instances.get(key) else {
            return false;
        };
        let present = instance.has_static_permutation();
        let needed = self.needs_permutation(instance.parent, &instance.static_overrides);
        match (needed, present) {
            (true, true) => self.refresh_instance(key),
            (true, false) => {
                let resources = self.permutation_resources(key);
                self.set_instance_resources(key, resources);
                log::debug!("{key:?} now compiles its own permutation");
            }
            (false, true) => {
                let mut resources = std::mem::take(&mut self.instances[key].resources);
                self.release_resources(&mut resources);
                self.set_instance_resources(key, TierMap::default());
                log::debug!("{key:?} renders its parent's permutation again");
            }
            (false, false) => {}
        }
        needed
    }

    fn set_instance_resources(&mut self, key: InstanceKey, resources: TierMap<Option<MaterialResource>>) {
        let materials = Self::resource_ids(&resources);
        let instance = &mut self.instances[key];
        instance.resources = resources;
        let proxy = instance.proxy;
        self.services
            .render_queue()
            .enqueue(RenderCommand::SetProxyMaterials { proxy, materials });
    }

    pub fn remove_instance(&mut self, key: InstanceKey) {
        let Some(mut instance) = self.instances.remove(key) else {
            return;
        };
        self.release_resources(&mut instance.resources);
        self.services
            .render_queue()
            .enqueue(RenderCommand::RemoveProxy {
                proxy: instance.proxy,
            });
    }

    /// Instances whose chain passes through `target`, parents first.
    #[must_use]
    pub fn dependent_instances(&self, target: MaterialRef) -> Vec<InstanceKey> {
        let mut dependents = Vec::new();
        let mut frontier = vec![target];
        while let Some(parent) = frontier.pop() {
            let mut children: Vec<_> = self
                .instances
                .iter()
                .filter(|(key, i)| i.parent == parent && !dependents.contains(key))
                .map(|(key, _)| key)
                .collect();
            children.sort_unstable();
            for child in children {
                dependents.push(child);
                frontier.push(MaterialRef::Instance(child));
            }
        }
        dependents.sort_by_key(|key| self.depth(MaterialRef::Instance(*key)));
        dependents
    }

    pub(crate) fn depth(&self, target: MaterialRef) -> usize {
        let mut depth = 0;
        let mut current = target;
        while let MaterialRef::Instance(key) = current {
            let Some(instance) = self.instances.get(key) else {
                break;
            };
            depth += 1;
            current = instance.parent;
            if depth > self.instances.len() {
                break;
            }
        }
        depth
    }

    fn release_resources(&mut self, resources: &mut TierMap<Option<MaterialResource>>) {
        for (_, slot) in resources.iter_mut() {
            if let Some(mut resource) = slot.take() {
                resource.release_shader_map(&self.services);
                self.owners.remove(&resource.id());
            }
        }
    }

    // ─── Parameters ────────────────────────────────────────────────────────

    /// Sets a runtime parameter on a material or instance.
    pub fn set_parameter(&mut self, target: impl Into<MaterialRef>, name: &str, value: ParameterValue) -> Result<()> {
        let target = target.into();
        let (parameters, proxy) = self.parameters_mut(target)?;
        parameters.insert(name.to_string(), value);
        self.services.render_queue().enqueue(RenderCommand::SetParameter {
            proxy,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    pub fn clear_parameter(&mut self, target: impl Into<MaterialRef>, name: &str) -> Result<()> {
        let target = target.into();
        let (parameters, proxy) = self.parameters_mut(target)?;
        if parameters.remove(name).is_some() {
            self.services.render_queue().enqueue(RenderCommand::ClearParameter {
                proxy,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn parameters_mut(&mut self, target: MaterialRef) -> Result<(&mut FxHashMap<String, ParameterValue>, ProxyId)> {
        let not_found = || SigilError::ResourceNotFound(format!("{target:?}"));
        Ok(match target {
            MaterialRef::Material(key) => {
                let material = self.materials.get_mut(key).ok_or_else(not_found)?;
                (&mut material.parameters, material.proxy)
            }
            MaterialRef::Instance(key) => {
                let instance = self.instances.get_mut(key).ok_or_else(not_found)?;
                (&mut instance.parameters, instance.proxy)
            }
        })
    }

    // ─── Compilation ───────────────────────────────────────────────────────

    /// Caches shaders of every resource owned by `target`. Returns whether
    /// all of them ended up with a complete map.
    pub fn cache_shaders(&mut self, target: MaterialRef) -> bool {
        let services = Arc::clone(&self.services);
        let resources = match target {
            MaterialRef::Material(key) => self.materials.get_mut(key).map(|m| &mut m.resources),
            MaterialRef::Instance(key) => self.instances.get_mut(key).map(|i| &mut i.resources),
        };
        let Some(resources) = resources else {
            return false;
        };
        let mut all_ready = true;
        for (_, resource) in resources.iter_mut() {
            if let Some(resource) = resource {
                all_ready &= resource.cache_shaders(&services);
            }
        }
        all_ready
    }

    /// Applies every finished asynchronous compile to the resources waiting
    /// on it. Returns the number of resources updated.
    pub fn process_compilation_results(&mut self) -> usize {
        let finished = self.services.compiling().process_async_results();
        let mut applied = 0;
        for compile in &finished {
            for &resource in &compile.resources {
                if let Some(resource) = self.resource_by_id_mut(resource)
                    && resource.complete_compilation(compile)
                {
                    applied += 1;
                }
            }
        }
        applied
    }

    /// Blocks until nothing is compiling, then applies the results.
    pub fn finish_all_compilation(&mut self) -> usize {
        self.services.compiling().finish_all_compilation();
        self.process_compilation_results()
    }

    /// Debug dump of every resource.
    #[must_use]
    pub fn debug_report(&self) -> String {
        let materials = self
            .materials
            .values()
            .flat_map(|m| m.resources.iter().filter_map(|(_, r)| r.as_ref()));
        let instances = self
            .instances
            .values()
            .flat_map(|i| i.resources.iter().filter_map(|(_, r)| r.as_ref()));
        materials
            .chain(instances)
            .map(MaterialResource::debug_report)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Drop for MaterialLibrary {
    fn drop(&mut self) {
        let materials: Vec<_> = self.materials.keys().collect();
        let instances: Vec<_> = self.instances.keys().collect();
        for key in instances {
            self.remove_instance(key);
        }
        for key in materials {
            self.remove_material(key);
        }
    }
}
