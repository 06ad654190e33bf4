//! Material Resource
//!
//! One compile target: a description at one quality and capability tier.
//! Producer-side owner of the compile lifecycle.
//!
//! # Pointers
//!
//! The resource holds the *producer* shader map pointer. The *consumer*
//! pointer lives in the render world and only moves when a `SetShaderMap`
//! command sent from here is applied. A shared [`ConsumerBinding`] tells the
//! producer whether the consumer is bound and how many of its publishes are
//! still queued, which is what makes [`MaterialResource::discard_shader_map`]
//! safe.
//!
//! # Lifecycle
//!
//! ```text
//! cache_shaders()
//!   registry / store hit (complete) ──► publish
//!   in-flight compile ──────────────► attach, producer cleared (fallback renders)
//!   otherwise ─────────────────────► begin compile
//!       sync  ──► publish | failure (default material: fatal)
//!       async ──► producer cleared ... complete_compilation() ──► publish
//! ```

use std::sync::Arc;

use smallvec::SmallVec;

use sigil_core::{
    CapabilityTier, CompileJobId, QualityTier, ResourceId, Result, SigilError,
    StaticParameterSet,
};
use sigil_render::{ConsumerBinding, RenderCommand, RenderMaterialInfo, RenderQueue};
use sigil_shader::{
    CompileFailure, CompileOutcome, CompileRequest, FinishedCompile, MaterialDescription,
    ShaderDependencies, ShaderMap, ShaderMapFlags, ShaderMapId, UniformExpressionSet,
};

use crate::services::MaterialServices;

const INLINE_HEADER_LEN: usize = 2;

/// Shader map read from an inline archive.
#[derive(Debug)]
pub struct InlineShaderMap {
    pub is_packaged: bool,
    /// `None` when the archive was written without a valid map.
    pub shader_map: Option<ShaderMap>,
}

pub struct MaterialResource {
    id: ResourceId,
    description: Arc<MaterialDescription>,
    static_overrides: Option<StaticParameterSet>,
    quality: QualityTier,
    tier: CapabilityTier,

    shader_map: Option<Arc<ShaderMap>>,
    outstanding_jobs: SmallVec<[CompileJobId; 1]>,
    compile_errors: Vec<String>,
    contains_inline_shaders: bool,

    binding: ConsumerBinding,
    render_queue: RenderQueue,
}

impl MaterialResource {
    /// Creates the resource and registers it with the render world.
    #[must_use]
    pub fn new(
        services: &MaterialServices,
        description: Arc<MaterialDescription>,
        static_overrides: Option<StaticParameterSet>,
        quality: QualityTier,
        tier: CapabilityTier,
    ) -> Self {
        let id = ResourceId::next();
        let binding = ConsumerBinding::new();
        let render_queue = services.render_queue().clone();
        render_queue.enqueue(RenderCommand::RegisterMaterial {
            resource: id,
            info: RenderMaterialInfo {
                friendly_name: description.name.clone(),
                tier,
                quality,
                is_default: description.is_default,
                usage_description: description.usage_description(),
                binding: binding.clone(),
            },
        });
        Self {
            id,
            description,
            static_overrides,
            quality,
            tier,
            shader_map: None,
            outstanding_jobs: SmallVec::new(),
            compile_errors: Vec::new(),
            contains_inline_shaders: false,
            binding,
            render_queue,
        }
    }

    // ─── Identity ──────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[must_use]
    pub fn description(&self) -> &Arc<MaterialDescription> {
        &self.description
    }

    #[must_use]
    pub fn friendly_name(&self) -> &str {
        &self.description.name
    }

    #[must_use]
    pub fn quality(&self) -> QualityTier {
        self.quality
    }

    #[must_use]
    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.description.is_default
    }

    /// Replaces the description. Takes effect at the next
    /// [`cache_shaders`](Self::cache_shaders).
    pub fn set_description(&mut self, description: Arc<MaterialDescription>) {
        self.description = description;
    }

    pub fn set_static_overrides(&mut self, overrides: Option<StaticParameterSet>) {
        self.static_overrides = overrides;
    }

    #[must_use]
    pub fn static_parameters(&self) -> StaticParameterSet {
        self.description
            .effective_static_parameters(self.static_overrides.as_ref())
    }

    fn dependencies(&self, services: &MaterialServices) -> ShaderDependencies {
        services.shader_types().dependencies(&self.description, self.tier)
    }

    /// Identity of the shader map this resource needs.
    #[must_use]
    pub fn shader_map_id(&self, services: &MaterialServices) -> ShaderMapId {
        ShaderMapId::compute(
            &self.description,
            &self.static_parameters(),
            self.quality,
            self.tier,
            &self.dependencies(services),
        )
    }

    // ─── Producer-side queries ─────────────────────────────────────────────

    /// Producer pointer.
    #[must_use]
    pub fn shader_map(&self) -> Option<&Arc<ShaderMap>> {
        self.shader_map.as_ref()
    }

    #[must_use]
    pub fn has_valid_shader_map(&self) -> bool {
        self.shader_map.as_ref().is_some_and(|m| m.compiled_successfully())
    }

    #[must_use]
    pub fn uniform_expression_set(&self) -> Option<&UniformExpressionSet> {
        self.shader_map.as_ref()?.uniform_expression_set()
    }

    #[must_use]
    pub fn flags(&self) -> ShaderMapFlags {
        self.shader_map
            .as_ref()
            .map_or(ShaderMapFlags::empty(), |m| m.flags())
    }

    #[must_use]
    pub fn uses_eye_adaptation(&self) -> bool {
        self.flags().contains(ShaderMapFlags::USES_EYE_ADAPTATION)
    }

    #[must_use]
    pub fn modifies_mesh_position(&self) -> bool {
        self.flags().contains(ShaderMapFlags::MODIFIES_MESH_POSITION)
    }

    #[must_use]
    pub fn uses_scene_depth(&self) -> bool {
        self.flags().contains(ShaderMapFlags::USES_SCENE_DEPTH)
    }

    /// Errors of the last failed compile.
    #[must_use]
    pub fn compile_errors(&self) -> &[String] {
        &self.compile_errors
    }

    #[must_use]
    pub fn outstanding_jobs(&self) -> &[CompileJobId] {
        &self.outstanding_jobs
    }

    #[must_use]
    pub fn contains_inline_shaders(&self) -> bool {
        self.contains_inline_shaders
    }

    /// Whether the render world currently holds a map for this resource.
    #[must_use]
    pub fn is_consumer_bound(&self) -> bool {
        self.binding.is_bound()
    }

    /// Whether a `SetShaderMap` sent from here is still waiting in the queue.
    #[must_use]
    pub fn has_pending_publish(&self) -> bool {
        self.binding.pending_publishes() > 0
    }

    /// Human-readable tier, quality and shader map summary.
    #[must_use]
    pub fn debug_report(&self) -> String {
        let map = self
            .shader_map
            .as_ref()
            .map_or_else(|| "  <no shader map>\n".to_string(), |m| m.describe());
        let mut report = format!(
            "Material '{}' {}\n  tier: {}  quality: {}\n  usage: {}\n  outstanding jobs: {}\n",
            self.description.name,
            self.id,
            self.tier,
            self.quality,
            self.description.usage_description(),
            self.outstanding_jobs.len()
        );
        report.push_str(&map);
        for error in &self.compile_errors {
            report.push_str("  error: ");
            report.push_str(error);
            report.push('\n');
        }
        report
    }

    // ─── Publication ───────────────────────────────────────────────────────

    /// Sets the producer pointer and hands the same map to the consumer.
    fn set_shader_map(&mut self, shader_map: Option<Arc<ShaderMap>>) {
        let unchanged = match (&self.shader_map, &shader_map) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        self.shader_map = shader_map;
        self.publish();
    }

    fn publish(&self) {
        self.binding.begin_publish();
        self.render_queue.enqueue(RenderCommand::SetShaderMap {
            resource: self.id,
            shader_map: self.shader_map.clone(),
        });
    }

    // ─── Compile lifecycle ─────────────────────────────────────────────────

    /// Finds or compiles the shader map for this resource.
    ///
    /// Returns whether the producer pointer holds a complete map afterwards.
    /// `false` means the default material renders in its place for now.
    pub fn cache_shaders(&mut self, services: &MaterialServices) -> bool {
        let static_parameters = self.static_parameters();
        let deps = self.dependencies(services);
        let id = ShaderMapId::compute(
            &self.description,
            &static_parameters,
            self.quality,
            self.tier,
            &deps,
        );

        if let Some(map) = self.lookup(services, &id) {
            if map.is_complete(&deps.permutations) {
                self.cancel_compilation(services);
                self.compile_errors.clear();
                self.set_shader_map(Some(map));
                return true;
            }
            log::debug!(
                "Cached shader map for '{}' is incomplete, recompiling",
                self.description.name
            );
        }

        if services.settings().requires_cooked_data {
            let error = SigilError::MissingCookedShaderMap(self.description.name.clone());
            if self.is_default() {
                self.fatal(&error.to_string());
            }
            log::warn!("{error}, falling back to the default material");
            self.compile_errors = vec![error.to_string()];
            self.set_shader_map(None);
            return false;
        }

        let synchronous = self.is_default() || !services.settings().allow_async_compilation;
        if !synchronous && let Some(job) = services.compiling().attach(&id, self.id) {
            self.keep_only_job(services, job);
            self.set_shader_map(None);
            return false;
        }

        self.cancel_compilation(services);
        let outcome = services.compiling().begin_compile(&CompileRequest {
            id,
            description: &self.description,
            static_parameters: &static_parameters,
            permutations: &deps.permutations,
            quality: self.quality,
            tier: self.tier,
            resource: self.id,
            synchronous,
        });
        match outcome {
            Ok(CompileOutcome::Compiled(map)) => {
                self.compile_errors.clear();
                self.set_shader_map(Some(map));
                true
            }
            Ok(CompileOutcome::Failed(failure)) => {
                self.apply_failure(&failure);
                false
            }
            Ok(CompileOutcome::Pending(job) | CompileOutcome::Attached(job)) => {
                self.outstanding_jobs.push(job);
                self.set_shader_map(None);
                false
            }
            Err(error) => {
                self.apply_failure(&CompileFailure::Translation(error));
                false
            }
        }
    }

    fn lookup(&self, services: &MaterialServices, id: &ShaderMapId) -> Option<Arc<ShaderMap>> {
        if let Some(map) = services.shader_maps().find(id) {
            return Some(map);
        }
        let store = services.store()?;
        let key = id.store_key().ok()?;
        let blob = store.get(&key)?;
        match ShaderMap::from_bytes(&blob) {
            Ok(map) if map.id() == id => {
                log::debug!("Loaded shader map '{}' from store", map.friendly_name());
                Some(services.shader_maps().register(Arc::new(map)))
            }
            Ok(map) => {
                log::warn!("Store entry {key} holds a different identity ({})", map.id());
                None
            }
            Err(e) => {
                log::warn!("Discarding unreadable store entry {key}: {e}");
                None
            }
        }
    }

    fn keep_only_job(&mut self, services: &MaterialServices, job: CompileJobId) {
        let stale: SmallVec<[CompileJobId; 1]> = self
            .outstanding_jobs
            .iter()
            .copied()
            .filter(|j| *j != job)
            .collect();
        if !stale.is_empty() {
            services.compiling().cancel(self.id, &stale);
        }
        self.outstanding_jobs.clear();
        self.outstanding_jobs.push(job);
    }

    fn apply_failure(&mut self, failure: &CompileFailure) {
        self.compile_errors = failure.messages();
        if self.is_default() {
            self.fatal("default material failed to compile");
        }
        for error in &self.compile_errors {
            log::warn!("'{}' [{}]: {error}", self.description.name, self.tier);
        }
        log::warn!(
            "'{}' [{}] has no shader map, falling back to the default material",
            self.description.name,
            self.tier
        );
        self.set_shader_map(None);
    }

    fn fatal(&self, reason: &str) -> ! {
        log::error!(
            "Fatal: '{}' [{} / {}]: {reason}\n  usage: {}\n  errors:\n    {}",
            self.description.name,
            self.tier,
            self.quality,
            self.description.usage_description(),
            self.compile_errors.join("\n    ")
        );
        panic!("default material '{}': {reason}", self.description.name);
    }

    /// Applies a finished compile. Results for jobs this resource no longer
    /// waits on are ignored; returns whether the result was applied.
    pub fn complete_compilation(&mut self, finished: &FinishedCompile) -> bool {
        let Some(position) = self.outstanding_jobs.iter().position(|j| *j == finished.job) else {
            return false;
        };
        self.outstanding_jobs.remove(position);
        match &finished.result {
            Ok(map) => {
                self.compile_errors.clear();
                self.set_shader_map(Some(Arc::clone(map)));
            }
            Err(failure) => self.apply_failure(failure),
        }
        true
    }

    /// Whether every compile this resource waits on has finished.
    #[must_use]
    pub fn is_compilation_finished(&self, services: &MaterialServices) -> bool {
        self.outstanding_jobs
            .iter()
            .all(|job| !services.compiling().is_compiling(*job))
    }

    /// Blocks until this resource's compiles finish and applies them.
    pub fn finish_compilation(&mut self, services: &MaterialServices) {
        if self.outstanding_jobs.is_empty() {
            return;
        }
        let jobs = self.outstanding_jobs.clone();
        services.compiling().finish_compilation(&jobs);
        for job in jobs {
            let Some(result) = services.compiling().take_result(job, self.id) else {
                continue;
            };
            let finished = FinishedCompile {
                job,
                id: result
                    .as_ref()
                    .map_or_else(|_| self.shader_map_id(services), |m| m.id().clone()),
                result,
                resources: SmallVec::from_elem(self.id, 1),
            };
            self.complete_compilation(&finished);
        }
    }

    /// Stops waiting for outstanding compiles. Running work is not
    /// interrupted; its results are discarded.
    pub fn cancel_compilation(&mut self, services: &MaterialServices) {
        if self.outstanding_jobs.is_empty() {
            return;
        }
        services.compiling().cancel(self.id, &self.outstanding_jobs);
        self.outstanding_jobs.clear();
    }

    // ─── Teardown ──────────────────────────────────────────────────────────

    /// Drops the producer pointer now and schedules the consumer pointer to
    /// be cleared by the render world.
    pub fn release_shader_map(&mut self, services: &MaterialServices) {
        self.cancel_compilation(services);
        self.shader_map = None;
        self.publish();
    }

    /// Drops the producer pointer. The consumer pointer must already be
    /// empty with no publish still queued; otherwise nothing changes and an
    /// error is returned.
    pub fn discard_shader_map(&mut self) -> Result<()> {
        if !self.binding.is_quiescent() {
            return Err(SigilError::ShaderMapStillBound(self.id.raw()));
        }
        self.shader_map = None;
        Ok(())
    }

    // ─── Inline shader maps ────────────────────────────────────────────────

    /// Writes `[is_packaged, valid, len: u64 LE, map bytes]`; the last two
    /// only when a complete map is present.
    pub fn serialize_inline(&self, is_packaged: bool) -> Result<Vec<u8>> {
        let map = self.shader_map.as_ref().filter(|m| m.compiled_successfully());
        let mut bytes = vec![u8::from(is_packaged), u8::from(map.is_some())];
        if let Some(map) = map {
            let payload = map.to_bytes()?;
            bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            bytes.extend_from_slice(&payload);
        }
        Ok(bytes)
    }

    /// Parses an archive written by [`serialize_inline`](Self::serialize_inline).
    pub fn deserialize_inline(bytes: &[u8]) -> Result<InlineShaderMap> {
        let [packaged, valid, rest @ ..] = bytes else {
            return Err(SigilError::InvalidArchive(format!(
                "header needs {INLINE_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        };
        let flag = |value: u8, name: &str| match value {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SigilError::InvalidArchive(format!("{name} flag is {other}"))),
        };
        let is_packaged = flag(*packaged, "packaged")?;
        if !flag(*valid, "valid")? {
            return Ok(InlineShaderMap {
                is_packaged,
                shader_map: None,
            });
        }

        let (len, payload) = rest
            .split_first_chunk::<8>()
            .ok_or_else(|| SigilError::InvalidArchive("missing payload length".into()))?;
        let len = u64::from_le_bytes(*len) as usize;
        if payload.len() != len {
            return Err(SigilError::InvalidArchive(format!(
                "payload is {} bytes, header says {len}",
                payload.len()
            )));
        }
        Ok(InlineShaderMap {
            is_packaged,
            shader_map: Some(ShaderMap::from_bytes(payload)?),
        })
    }

    /// Adopts a shader map loaded from an inline archive as the producer
    /// pointer. An identical registered map is reused. The render world
    /// only sees it after [`register_inline_shader_map`](Self::register_inline_shader_map).
    pub fn load_inline(&mut self, services: &MaterialServices, bytes: &[u8]) -> Result<bool> {
        let inline = Self::deserialize_inline(bytes)?;
        let Some(map) = inline.shader_map else {
            log::debug!("'{}' has no valid inline shader map", self.description.name);
            return Ok(false);
        };
        let canonical = services
            .shader_maps()
            .find(map.id())
            .unwrap_or_else(|| services.shader_maps().register(Arc::new(map)));
        self.shader_map = Some(canonical);
        self.contains_inline_shaders = true;
        Ok(true)
    }

    /// Hands the inline shader map to the render world.
    pub fn register_inline_shader_map(&self) {
        if self.shader_map.is_some() {
            self.publish();
        }
    }
}

impl Drop for MaterialResource {
    fn drop(&mut self) {
        self.render_queue
            .enqueue(RenderCommand::ReleaseMaterial { resource: self.id });
    }
}

impl std::fmt::Debug for MaterialResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialResource")
            .field("id", &self.id)
            .field("name", &self.description.name)
            .field("tier", &self.tier)
            .field("quality", &self.quality)
            .field("has_shader_map", &self.shader_map.is_some())
            .field("outstanding_jobs", &self.outstanding_jobs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_without_map_is_not_an_error() {
        let inline = MaterialResource::deserialize_inline(&[1, 0]).unwrap();
        assert!(inline.is_packaged);
        assert!(inline.shader_map.is_none());
    }

    #[test]
    fn test_inline_rejects_malformed_archives() {
        for bytes in [&[][..], &[0][..], &[0, 2][..], &[0, 1, 3, 0][..]] {
            assert!(matches!(
                MaterialResource::deserialize_inline(bytes),
                Err(SigilError::InvalidArchive(_))
            ));
        }
        let mut truncated = vec![0, 1];
        truncated.extend_from_slice(&100u64.to_le_bytes());
        truncated.extend_from_slice(b"{}");
        assert!(matches!(
            MaterialResource::deserialize_inline(&truncated),
            Err(SigilError::InvalidArchive(_))
        ));
    }
}
