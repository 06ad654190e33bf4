//! Translation and compilation seams.
//!
//! Two external collaborators sit behind traits:
//!
//! - [`MaterialTranslator`] turns a description into shader source plus the
//!   [`CompilationOutput`] (uniform expressions, flags).
//! - [`ShaderCompiler`] accepts one [`CompileJob`] per permutation and
//!   reports each result through a [`CompletionSender`], on whatever thread
//!   it likes.
//!
//! Compilers built from a synchronous [`ShaderBackend`] are provided:
//! [`ImmediateCompiler`] compiles inside `submit`, [`WorkerPoolCompiler`]
//! compiles on tokio's blocking pool.

use std::sync::Arc;

use tokio::runtime::Runtime;

use sigil_core::{
    CapabilityTier, CompileError, CompileJobId, QualityTier, Result, StaticParameterSet,
    TranslationError,
};

use crate::description::MaterialDescription;
use crate::shader_map::{CompilationOutput, ShaderBinary};
use crate::types::PermutationKey;

/// Output of a successful translation.
#[derive(Debug, Clone)]
pub struct TranslatedMaterial {
    pub source: Arc<str>,
    pub output: CompilationOutput,
}

/// Graph-to-source translator.
pub trait MaterialTranslator: Send + Sync {
    fn translate(
        &self,
        description: &MaterialDescription,
        static_parameters: &StaticParameterSet,
        quality: QualityTier,
        tier: CapabilityTier,
    ) -> std::result::Result<TranslatedMaterial, TranslationError>;
}

/// One permutation to compile.
#[derive(Debug, Clone)]
pub struct CompileJob {
    /// Shader map compile this job belongs to.
    pub group: CompileJobId,
    pub permutation: PermutationKey,
    pub source: Arc<str>,
    pub tier: CapabilityTier,
    pub friendly_name: Arc<str>,
}

/// Result of one [`CompileJob`].
#[derive(Debug, Clone)]
pub struct CompileJobResult {
    pub group: CompileJobId,
    pub permutation: PermutationKey,
    pub result: std::result::Result<ShaderBinary, CompileError>,
}

pub(crate) enum CompilerMessage {
    Finished(CompileJobResult),
    TranslationFailed {
        group: CompileJobId,
        error: TranslationError,
    },
}

/// Channel end a compiler uses to report a finished job.
///
/// Each job gets its own sender; completing consumes it.
pub struct CompletionSender {
    tx: flume::Sender<CompilerMessage>,
}

impl CompletionSender {
    pub(crate) fn new(tx: flume::Sender<CompilerMessage>) -> Self {
        Self { tx }
    }

    /// Reports the result. Results for cancelled compiles are discarded by
    /// the receiving side.
    pub fn complete(self, result: CompileJobResult) {
        if self.tx.send(CompilerMessage::Finished(result)).is_err() {
            log::debug!("Compile result dropped: compiling manager is gone");
        }
    }
}

/// Back-end GPU compiler.
pub trait ShaderCompiler: Send + Sync {
    fn submit(&self, job: CompileJob, completion: CompletionSender);
}

/// Synchronous compile function a compiler can be built from.
pub trait ShaderBackend: Send + Sync + 'static {
    fn compile(&self, job: &CompileJob) -> std::result::Result<ShaderBinary, CompileError>;
}

impl<F> ShaderBackend for F
where
    F: Fn(&CompileJob) -> std::result::Result<ShaderBinary, CompileError> + Send + Sync + 'static,
{
    fn compile(&self, job: &CompileJob) -> std::result::Result<ShaderBinary, CompileError> {
        self(job)
    }
}

fn run_job<B: ShaderBackend + ?Sized>(backend: &B, job: &CompileJob) -> CompileJobResult {
    CompileJobResult {
        group: job.group,
        permutation: job.permutation.clone(),
        result: backend.compile(job),
    }
}

/// Compiles on the submitting thread.
pub struct ImmediateCompiler<B> {
    backend: B,
}

impl<B: ShaderBackend> ImmediateCompiler<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: ShaderBackend> ShaderCompiler for ImmediateCompiler<B> {
    fn submit(&self, job: CompileJob, completion: CompletionSender) {
        completion.complete(run_job(&self.backend, &job));
    }
}

/// Compiles on a dedicated tokio runtime's blocking pool.
pub struct WorkerPoolCompiler<B> {
    backend: Arc<B>,
    runtime: Runtime,
}

impl<B: ShaderBackend> WorkerPoolCompiler<B> {
    /// Starts a runtime with `workers` threads.
    pub fn new(backend: B, workers: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers.max(1))
            .thread_name("sigil-shader-compile")
            .build()?;
        Ok(Self {
            backend: Arc::new(backend),
            runtime,
        })
    }
}

impl<B: ShaderBackend> ShaderCompiler for WorkerPoolCompiler<B> {
    fn submit(&self, job: CompileJob, completion: CompletionSender) {
        let backend = Arc::clone(&self.backend);
        self.runtime.spawn_blocking(move || {
            completion.complete(run_job(backend.as_ref(), &job));
        });
    }
}

/// Back end that "compiles" by hashing the permutation and source.
///
/// Deterministic and dependency free; useful for tools and tests that only
/// care about the caching behaviour.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoBackend;

impl ShaderBackend for EchoBackend {
    fn compile(&self, job: &CompileJob) -> std::result::Result<ShaderBinary, CompileError> {
        let mut code = Vec::with_capacity(job.source.len() + 64);
        code.extend_from_slice(job.permutation.to_string().as_bytes());
        code.push(0);
        code.extend_from_slice(job.tier.name().as_bytes());
        code.push(0);
        code.extend_from_slice(job.source.as_bytes());
        Ok(ShaderBinary::new(code))
    }
}
