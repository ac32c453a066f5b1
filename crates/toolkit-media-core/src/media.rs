//! Media engines.
//!
//! A [`MediaEngine`] executes one command line against its own virtual
//! filesystem. Two implementations exist:
//! - [`WasmMediaEngine`]: a fetched engine build run under wasmtime
//! - [`crate::native::NativeMediaEngine`]: the in-process CPU engine

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use wasmtime::Linker;

use toolkit_media_common::{EngineConfig, MediaError};

use crate::artifact::{EngineArtifacts, EngineDescriptor};
use crate::capability::Backend;
use crate::engine::{EPOCH_TICK, EngineBuild, WasmEngine};
use crate::instance::{ExecutionResult, InstanceRunner};
use crate::module::CompiledModule;
use crate::store::{EngineContext, LogEntry, ProgressSink, create_store, memory_limit};
use crate::vfs::MemFs;

/// Registers host functions on a fresh linker.
///
/// Supplied by the host crate so the core stays independent of the guest ABI.
pub type LinkerSetup = fn(&mut Linker<EngineContext>) -> Result<(), MediaError>;

/// Result of one successful engine run.
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    /// Log entries emitted by the engine during the run.
    pub logs: Vec<LogEntry>,
    /// Wall time of the run.
    pub duration: Duration,
}

/// A loaded media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Backend this engine runs on.
    fn backend(&self) -> Backend;

    /// Engine build, for wasm engines.
    fn build(&self) -> Option<EngineBuild>;

    /// The engine's virtual filesystem.
    fn vfs(&self) -> &Arc<MemFs>;

    /// Run one command line (without program name).
    ///
    /// # Errors
    ///
    /// `JobFailed` when the engine rejects the command, `Terminated` when the
    /// engine was terminated before or during the run.
    async fn exec(&self, args: &[String], progress: &ProgressSink) -> Result<ExecOutcome, MediaError>;

    /// Interrupt any running command and refuse further ones.
    fn terminate(&self);

    /// Whether [`MediaEngine::terminate`] was called.
    fn is_terminated(&self) -> bool;
}

/// A wasm engine build running under wasmtime.
///
/// Each command gets a fresh store and instance; the virtual filesystem is
/// the only state shared between commands.
pub struct WasmMediaEngine {
    engine: WasmEngine,
    runner: InstanceRunner,
    descriptor: EngineDescriptor,
    worker: Option<CompiledModule>,
    backend: Backend,
    vfs: Arc<MemFs>,
    verbose: bool,
    terminated: Arc<AtomicBool>,
}

impl WasmMediaEngine {
    /// Compile and link fetched artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation or linking fails, or if the
    /// multi-threaded build is missing its worker.
    #[instrument(skip_all, fields(build = %artifacts.build, backend = %backend))]
    pub fn instantiate(
        config: &EngineConfig,
        artifacts: &EngineArtifacts,
        backend: Backend,
        setup: LinkerSetup,
        verbose: bool,
    ) -> Result<Self, MediaError> {
        let engine = WasmEngine::new(config, artifacts.build)?;

        let module = CompiledModule::from_artifact(engine.inner(), artifacts.wasm.bytes())?;

        let worker = match (&artifacts.worker, artifacts.build) {
            (Some(worker), EngineBuild::MultiThreaded) => {
                Some(CompiledModule::from_artifact(engine.inner(), worker.bytes())?)
            }
            (None, EngineBuild::MultiThreaded) => {
                return Err(MediaError::load_failed(
                    "Multi-threaded build requires a worker binary",
                ));
            }
            _ => None,
        };

        let mut linker = Linker::new(engine.inner());
        setup(&mut linker)?;
        let runner = InstanceRunner::new(&linker, &module, &artifacts.descriptor.entry)?;

        info!(
            content_hash = %module.content_hash(),
            shared_memory = module.uses_shared_memory(),
            blob = %artifacts.wasm.url(),
            "Engine instantiated"
        );

        Ok(Self {
            engine,
            runner,
            descriptor: artifacts.descriptor.clone(),
            worker,
            backend,
            vfs: Arc::new(MemFs::new()),
            verbose,
            terminated: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Descriptor the engine was loaded with.
    pub fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    /// Compiled worker, for the multi-threaded build.
    pub fn worker(&self) -> Option<&CompiledModule> {
        self.worker.as_ref()
    }

    fn argv(&self, args: &[String]) -> Vec<String> {
        std::iter::once(self.descriptor.program_name.clone())
            .chain(args.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl MediaEngine for WasmMediaEngine {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn build(&self) -> Option<EngineBuild> {
        Some(self.engine.build())
    }

    fn vfs(&self) -> &Arc<MemFs> {
        &self.vfs
    }

    async fn exec(&self, args: &[String], progress: &ProgressSink) -> Result<ExecOutcome, MediaError> {
        if self.is_terminated() {
            return Err(MediaError::Terminated);
        }

        let start = Instant::now();
        let context = EngineContext::new(
            Uuid::new_v4().to_string(),
            &self.argv(args),
            Arc::clone(&self.vfs),
            progress.clone(),
            self.verbose,
            memory_limit(&self.engine),
        );
        let mut store = create_store(&self.engine, context, Arc::clone(&self.terminated));

        let ticker = self.engine.start_ticker(EPOCH_TICK);
        let result = self.runner.execute(&mut store).await;
        drop(ticker);
        let context = store.into_data();

        if self.is_terminated() {
            return Err(MediaError::Terminated);
        }

        let last_error = context.last_error().map(str::to_string);
        let failure = |fallback: String| MediaError::job_failed(last_error.clone().unwrap_or(fallback));

        match result? {
            ExecutionResult::Success => Ok(ExecOutcome {
                duration: start.elapsed(),
                logs: context.logs.into(),
            }),
            ExecutionResult::Exit { code } => Err(failure(format!("Engine exited with code {code}"))),
            ExecutionResult::Interrupted => Err(MediaError::Terminated),
            ExecutionResult::Trap { message, .. } => Err(failure(message)),
        }
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.terminate();
        self.vfs.clear();
        debug!(backend = %self.backend, "Wasm engine terminated");
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WasmMediaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmMediaEngine")
            .field("backend", &self.backend)
            .field("build", &self.engine.build())
            .field("entry_point", &self.runner.entry_point())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}
