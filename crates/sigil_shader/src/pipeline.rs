//! Shader Compiling Manager
//!
//! Drives translate → compile → publish for shader maps and owns the
//! in-flight registry, so that equal identities requested while a compile is
//! running attach to it instead of compiling twice.
//!
//! # Flow
//!
//! ```text
//! begin_compile(request)
//!   ├─ identity already in flight ──► attach resource ──► Attached(job)
//!   ├─ reserve slot, translate ──────► TranslationError (slot released)
//!   └─ submit one CompileJob per permutation
//!        ├─ async ─► Pending(job) ... process_async_results() ─► FinishedCompile
//!        └─ sync  ─► finish_compilation([job]) ─► Compiled(map) | Failed(errors)
//! ```
//!
//! Completed compiles are registered with the [`ShaderMapRegistry`] (the
//! registered instance wins if one already exists), written to the artifact
//! store, and reported as [`FinishedCompile`]s listing every attached
//! resource. Results of cancelled compiles are dropped when they arrive.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use sigil_core::{
    CapabilityTier, CompileError, CompileJobId, QualityTier, ResourceId, SigilError,
    StaticParameterSet, TranslationError,
};

use crate::compiler::{
    CompileJob, CompilerMessage, CompletionSender, MaterialTranslator, ShaderCompiler,
};
use crate::description::MaterialDescription;
use crate::identity::ShaderMapId;
use crate::registry::ShaderMapRegistry;
use crate::shader_map::{
    CompilationOutput, ShaderBinary, ShaderMap, ShaderMapContent, code_fingerprint,
};
use crate::store::ArtifactStore;
use crate::types::PermutationKey;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything needed to start a shader map compile.
pub struct CompileRequest<'a> {
    pub id: ShaderMapId,
    pub description: &'a MaterialDescription,
    pub static_parameters: &'a StaticParameterSet,
    pub permutations: &'a [PermutationKey],
    pub quality: QualityTier,
    pub tier: CapabilityTier,
    /// Resource that receives the result.
    pub resource: ResourceId,
    /// Block until the compile finishes.
    pub synchronous: bool,
}

/// Why a shader map compile produced no map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileFailure {
    Translation(TranslationError),
    Compile(Vec<CompileError>),
}

impl CompileFailure {
    /// Flattened diagnostics, one entry per error.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Translation(e) => vec![e.to_string()],
            Self::Compile(errors) => errors.iter().map(ToString::to_string).collect(),
        }
    }
}

impl From<CompileFailure> for SigilError {
    fn from(failure: CompileFailure) -> Self {
        match failure {
            CompileFailure::Translation(e) => SigilError::Translation(e),
            CompileFailure::Compile(errors) => SigilError::Compile(errors),
        }
    }
}

/// Immediate result of [`ShaderCompilingManager::begin_compile`].
#[derive(Debug)]
pub enum CompileOutcome {
    /// Synchronous compile finished; the map is complete and registered.
    Compiled(Arc<ShaderMap>),
    /// Synchronous compile finished without a map.
    Failed(CompileFailure),
    /// A new asynchronous compile was started.
    Pending(CompileJobId),
    /// The request joined an equal identity already compiling.
    Attached(CompileJobId),
}

/// A compile that completed (or failed) and awaits dispatch.
#[derive(Debug, Clone)]
pub struct FinishedCompile {
    pub job: CompileJobId,
    pub id: ShaderMapId,
    pub result: Result<Arc<ShaderMap>, CompileFailure>,
    /// Resources still waiting for this compile.
    pub resources: SmallVec<[ResourceId; 2]>,
}

struct InFlightCompile {
    id: ShaderMapId,
    shader_map: Arc<ShaderMap>,
    resources: SmallVec<[ResourceId; 2]>,
    translating: bool,
    remaining: FxHashSet<PermutationKey>,
    binaries: BTreeMap<PermutationKey, ShaderBinary>,
    output: Option<CompilationOutput>,
    errors: Vec<CompileError>,
    started: Instant,
}

#[derive(Default)]
struct CompilingState {
    jobs: FxHashMap<CompileJobId, InFlightCompile>,
    by_identity: FxHashMap<ShaderMapId, CompileJobId>,
    finished: Vec<FinishedCompile>,
    /// Resources blocked in a synchronous wait; their results are kept out
    /// of `process_async_results`.
    sync_waiters: FxHashSet<(CompileJobId, ResourceId)>,
    pending_store_writes: Vec<Arc<ShaderMap>>,
}

/// Process-wide compile coordinator.
pub struct ShaderCompilingManager {
    translator: Arc<dyn MaterialTranslator>,
    compiler: Arc<dyn ShaderCompiler>,
    registry: Arc<ShaderMapRegistry>,
    store: Option<Arc<dyn ArtifactStore>>,
    state: Mutex<CompilingState>,
    tx: flume::Sender<CompilerMessage>,
    rx: flume::Receiver<CompilerMessage>,
    wait_log_interval: Duration,
    translations: AtomicU64,
    submissions: AtomicU64,
}

impl ShaderCompilingManager {
    /// `store` receives every successfully compiled map; pass `None` to
    /// disable persistence.
    pub fn new(
        translator: Arc<dyn MaterialTranslator>,
        compiler: Arc<dyn ShaderCompiler>,
        registry: Arc<ShaderMapRegistry>,
        store: Option<Arc<dyn ArtifactStore>>,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            translator,
            compiler,
            registry,
            store,
            state: Mutex::new(CompilingState::default()),
            tx,
            rx,
            wait_log_interval: Duration::from_secs(5),
            translations: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_wait_log_interval(mut self, interval: Duration) -> Self {
        self.wait_log_interval = interval;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ShaderMapRegistry> {
        &self.registry
    }

    // ─── Queries ───────────────────────────────────────────────────────────

    /// Job currently compiling `id`, if any.
    #[must_use]
    pub fn in_flight_job(&self, id: &ShaderMapId) -> Option<CompileJobId> {
        self.state.lock().by_identity.get(id).copied()
    }

    #[must_use]
    pub fn is_compiling(&self, job: CompileJobId) -> bool {
        self.state.lock().jobs.contains_key(&job)
    }

    #[must_use]
    pub fn num_in_flight(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Number of translations started since creation.
    #[must_use]
    pub fn translation_count(&self) -> u64 {
        self.translations.load(Ordering::Relaxed)
    }

    /// Number of shader map compiles submitted since creation.
    #[must_use]
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    // ─── Compile ───────────────────────────────────────────────────────────

    /// Attaches `resource` to an in-flight compile of `id`.
    pub fn attach(&self, id: &ShaderMapId, resource: ResourceId) -> Option<CompileJobId> {
        let mut state = self.state.lock();
        let job = *state.by_identity.get(id)?;
        if let Some(entry) = state.jobs.get_mut(&job)
            && !entry.resources.contains(&resource)
        {
            entry.resources.push(resource);
        }
        Some(job)
    }

    /// Starts (or joins) the compile of `request.id`.
    ///
    /// Translation failures are returned without consuming a compile slot.
    pub fn begin_compile(
        &self,
        request: &CompileRequest<'_>,
    ) -> Result<CompileOutcome, TranslationError> {
        let job = {
            let mut state = self.state.lock();
            if let Some(&job) = state.by_identity.get(&request.id) {
                if let Some(entry) = state.jobs.get_mut(&job)
                    && !entry.resources.contains(&request.resource)
                {
                    entry.resources.push(request.resource);
                }
                if request.synchronous {
                    state.sync_waiters.insert((job, request.resource));
                }
                drop(state);
                log::debug!(
                    "'{}' attached to in-flight compile {job}",
                    request.description.name
                );
                return Ok(if request.synchronous {
                    self.wait_for(job, request.resource)
                } else {
                    CompileOutcome::Attached(job)
                });
            }

            let job = CompileJobId::next();
            state.jobs.insert(
                job,
                InFlightCompile {
                    id: request.id.clone(),
                    shader_map: Arc::new(ShaderMap::new(
                        request.id.clone(),
                        request.description.name.clone(),
                    )),
                    resources: SmallVec::from_elem(request.resource, 1),
                    translating: true,
                    remaining: FxHashSet::default(),
                    binaries: BTreeMap::new(),
                    output: None,
                    errors: Vec::new(),
                    started: Instant::now(),
                },
            );
            state.by_identity.insert(request.id.clone(), job);
            if request.synchronous {
                state.sync_waiters.insert((job, request.resource));
            }
            job
        };

        self.translations.fetch_add(1, Ordering::Relaxed);
        let translated = match self.translator.translate(
            request.description,
            request.static_parameters,
            request.quality,
            request.tier,
        ) {
            Ok(translated) => translated,
            Err(error) => {
                self.abort_translation(job, request.resource, &error);
                return Err(error);
            }
        };

        {
            let mut state = self.state.lock();
            let Some(entry) = state.jobs.get_mut(&job) else {
                // Every attached resource cancelled while translating.
                return Ok(CompileOutcome::Pending(job));
            };
            entry.translating = false;
            entry.remaining = request.permutations.iter().cloned().collect();
            entry.output = Some(translated.output);
            if entry.remaining.is_empty() {
                Self::finalize(&mut state, job, &self.registry, self.store.is_some());
            }
        }
        self.flush_store_writes();

        self.submissions.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Compiling shader map '{}' [{} / {}]: {} permutation(s), {job}",
            request.description.name,
            request.tier,
            request.quality,
            request.permutations.len()
        );
        let friendly_name: Arc<str> = Arc::from(request.description.name.as_str());
        for permutation in request.permutations {
            self.compiler.submit(
                CompileJob {
                    group: job,
                    permutation: permutation.clone(),
                    source: Arc::clone(&translated.source),
                    tier: request.tier,
                    friendly_name: Arc::clone(&friendly_name),
                },
                CompletionSender::new(self.tx.clone()),
            );
        }

        Ok(if request.synchronous {
            self.wait_for(job, request.resource)
        } else {
            CompileOutcome::Pending(job)
        })
    }

    fn wait_for(&self, job: CompileJobId, resource: ResourceId) -> CompileOutcome {
        self.finish_compilation(&[job]);
        let result = self.take_result(job, resource);
        self.state.lock().sync_waiters.remove(&(job, resource));
        match result {
            Some(Ok(map)) => CompileOutcome::Compiled(map),
            Some(Err(failure)) => CompileOutcome::Failed(failure),
            // The compile was cancelled by its other owners mid-wait.
            None => CompileOutcome::Failed(CompileFailure::Compile(Vec::new())),
        }
    }

    fn abort_translation(&self, job: CompileJobId, requester: ResourceId, error: &TranslationError) {
        let mut state = self.state.lock();
        state.sync_waiters.remove(&(job, requester));
        let Some(entry) = state.jobs.remove(&job) else {
            return;
        };
        state.by_identity.remove(&entry.id);
        let others: SmallVec<[ResourceId; 2]> = entry
            .resources
            .iter()
            .copied()
            .filter(|r| *r != requester)
            .collect();
        if !others.is_empty() {
            state.finished.push(FinishedCompile {
                job,
                id: entry.id,
                result: Err(CompileFailure::Translation(error.clone())),
                resources: others,
            });
        }
        drop(state);
        // Wake anyone blocked in `finish_compilation` on this job.
        let _ = self.tx.send(CompilerMessage::TranslationFailed {
            group: job,
            error: error.clone(),
        });
    }

    // ─── Results ───────────────────────────────────────────────────────────

    fn handle_message(&self, state: &mut CompilingState, message: CompilerMessage) {
        match message {
            CompilerMessage::Finished(result) => {
                let Some(entry) = state.jobs.get_mut(&result.group) else {
                    log::debug!(
                        "Discarding result of {} for cancelled compile {}",
                        result.permutation,
                        result.group
                    );
                    return;
                };
                entry.remaining.remove(&result.permutation);
                match result.result {
                    Ok(binary) => {
                        log::trace!(
                            "Compiled {} of '{}' ({})",
                            result.permutation,
                            entry.shader_map.friendly_name(),
                            code_fingerprint(&binary)
                        );
                        entry.binaries.insert(result.permutation, binary);
                    }
                    Err(error) => entry.errors.push(error),
                }
                if entry.remaining.is_empty() && !entry.translating {
                    Self::finalize(state, result.group, &self.registry, self.store.is_some());
                }
            }
            CompilerMessage::TranslationFailed { group, error } => {
                log::debug!("Compile {group} ended during translation: {error}");
            }
        }
    }

    fn finalize(
        state: &mut CompilingState,
        job: CompileJobId,
        registry: &ShaderMapRegistry,
        persist: bool,
    ) {
        let Some(entry) = state.jobs.remove(&job) else {
            return;
        };
        state.by_identity.remove(&entry.id);

        let name = entry.shader_map.friendly_name().to_string();
        let result = match entry.output {
            Some(output) if entry.errors.is_empty() => {
                entry
                    .shader_map
                    .fill(ShaderMapContent::new(entry.binaries, output));
                let canonical = registry.register(Arc::clone(&entry.shader_map));
                if persist && Arc::ptr_eq(&canonical, &entry.shader_map) {
                    state.pending_store_writes.push(Arc::clone(&canonical));
                }
                log::debug!(
                    "Shader map '{name}' compiled in {:.1} ms",
                    entry.started.elapsed().as_secs_f64() * 1000.0
                );
                Ok(canonical)
            }
            _ => {
                for error in &entry.errors {
                    log::warn!("Shader map '{name}': {error}");
                }
                Err(CompileFailure::Compile(entry.errors))
            }
        };

        state.finished.push(FinishedCompile {
            job,
            id: entry.id,
            result,
            resources: entry.resources,
        });
    }

    fn flush_store_writes(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let writes = std::mem::take(&mut self.state.lock().pending_store_writes);
        for map in writes {
            let key = match map.id().store_key() {
                Ok(key) => key,
                Err(e) => {
                    log::warn!("Cannot derive store key for '{}': {e}", map.friendly_name());
                    continue;
                }
            };
            match map.to_bytes() {
                Ok(bytes) => store.put(&key, bytes),
                Err(e) => log::warn!("Cannot serialize '{}': {e}", map.friendly_name()),
            }
        }
    }

    /// Applies every result that has arrived and returns the compiles that
    /// completed, without blocking.
    pub fn process_async_results(&self) -> Vec<FinishedCompile> {
        {
            let mut state = self.state.lock();
            for message in self.rx.try_iter() {
                self.handle_message(&mut state, message);
            }
        }
        self.flush_store_writes();

        let mut state = self.state.lock();
        if state.sync_waiters.is_empty() {
            return std::mem::take(&mut state.finished);
        }
        let CompilingState {
            finished,
            sync_waiters,
            ..
        } = &mut *state;
        let mut ready = Vec::with_capacity(finished.len());
        finished.retain_mut(|compile| {
            let (waiting, others): (SmallVec<[ResourceId; 2]>, SmallVec<[ResourceId; 2]>) = compile
                .resources
                .iter()
                .copied()
                .partition(|r| sync_waiters.contains(&(compile.job, *r)));
            if !others.is_empty() {
                ready.push(FinishedCompile {
                    resources: others,
                    ..compile.clone()
                });
            }
            compile.resources = waiting;
            !compile.resources.is_empty()
        });
        ready
    }

    /// Blocks until none of `jobs` is in flight.
    ///
    /// Finished compiles stay queued for [`process_async_results`](Self::process_async_results).
    pub fn finish_compilation(&self, jobs: &[CompileJobId]) {
        let started = Instant::now();
        let mut last_log = started;
        loop {
            {
                let mut state = self.state.lock();
                for message in self.rx.try_iter() {
                    self.handle_message(&mut state, message);
                }
                if !jobs.iter().any(|job| state.jobs.contains_key(job)) {
                    break;
                }
            }
            self.flush_store_writes();

            match self.rx.recv_timeout(WAIT_POLL_INTERVAL) {
                Ok(message) => {
                    let mut state = self.state.lock();
                    self.handle_message(&mut state, message);
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    if last_log.elapsed() >= self.wait_log_interval {
                        last_log = Instant::now();
                        log::info!(
                            "Still waiting for {} shader map compile(s) after {:.1}s",
                            jobs.len(),
                            started.elapsed().as_secs_f64()
                        );
                    }
                }
                Err(flume::RecvTimeoutError::Disconnected) => break,
            }
        }
        self.flush_store_writes();
    }

    /// Blocks until nothing is in flight.
    pub fn finish_all_compilation(&self) {
        let jobs: Vec<_> = self.state.lock().jobs.keys().copied().collect();
        if !jobs.is_empty() {
            self.finish_compilation(&jobs);
        }
    }

    /// Removes `resource` from a finished compile and returns its result.
    pub fn take_result(
        &self,
        job: CompileJobId,
        resource: ResourceId,
    ) -> Option<Result<Arc<ShaderMap>, CompileFailure>> {
        let mut state = self.state.lock();
        let idx = state.finished.iter().position(|f| f.job == job)?;
        let finished = &mut state.finished[idx];
        let position = finished.resources.iter().position(|r| *r == resource)?;
        finished.resources.remove(position);
        let result = finished.result.clone();
        if finished.resources.is_empty() {
            state.finished.remove(idx);
        }
        Some(result)
    }

    // ─── Cancellation ──────────────────────────────────────────────────────

    /// Detaches `resource` from `jobs`. Compiles nobody waits for any more
    /// leave the in-flight registry; their running work is not interrupted
    /// and its results are discarded.
    pub fn cancel(&self, resource: ResourceId, jobs: &[CompileJobId]) {
        let mut state = self.state.lock();
        for job in jobs {
            let orphaned = match state.jobs.get_mut(job) {
                Some(entry) => {
                    entry.resources.retain(|r| *r != resource);
                    entry.resources.is_empty()
                }
                None => false,
            };
            if orphaned && let Some(entry) = state.jobs.remove(job) {
                state.by_identity.remove(&entry.id);
                log::debug!(
                    "Cancelled compile {job} of '{}'",
                    entry.shader_map.friendly_name()
                );
            }
        }
        for finished in &mut state.finished {
            if jobs.contains(&finished.job) {
                finished.resources.retain(|r| *r != resource);
            }
        }
        state.finished.retain(|f| !f.resources.is_empty());
    }

    /// Drops every in-flight and finished compile.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let cancelled = state.jobs.len();
        state.jobs.clear();
        state.by_identity.clear();
        state.finished.clear();
        state.sync_waiters.clear();
        state.pending_store_writes.clear();
        if cancelled > 0 {
            log::debug!("Shader compiling manager shut down with {cancelled} compile(s) in flight");
        }
    }
}
