//! Media engine loader.
//!
//! [`MediaEngineLoader`] turns a capability set and an artifact source into a
//! ready [`EngineHandle`]. Loading is lazy, happens at most once per loader,
//! and never surfaces an error to the caller: outcomes are observed through
//! [`LoadState`].
//!
//! ```text
//! Idle ──load()──▶ Loading ──▶ Ready ──terminate()──▶ Error
//!                     └──────▶ Error
//! ```
//!
//! There is no way back from `Error`; a new loader must be constructed.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use toolkit_media_common::{EngineConfig, LoaderConfig, MediaError};

use crate::artifact::{ArtifactSource, fetch_artifacts};
use crate::capability::{Backend, CapabilitySet, EnvironmentProbe, detect_capabilities};
use crate::command::ProcessingJob;
use crate::engine::EngineBuild;
use crate::job::{JobOutput, JobQueue, run_job};
use crate::media::{LinkerSetup, MediaEngine, WasmMediaEngine};
use crate::native::NativeMediaEngine;
use crate::store::ProgressSink;

/// Loader lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum LoadState {
    /// Nothing loaded yet.
    Idle,
    /// A load is in flight.
    Loading,
    /// An engine handle is available.
    Ready,
    /// Loading failed or the handle was terminated.
    Error(String),
}

impl LoadState {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// `Loading -> Loading` is accepted so a load abandoned mid-flight can be
    /// restarted by the next caller.
    pub fn can_transition_to(&self, next: &LoadState) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Loading, Self::Loading)
                | (Self::Loading, Self::Ready | Self::Error(_))
                | (Self::Idle | Self::Ready, Self::Error(_))
        )
    }

    /// Returns `true` once the loader has settled either way.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready | Self::Error(_))
    }

    /// Label without the message.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error(_) => "error",
        }
    }
}

/// Caller options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderOptions {
    /// Load the multi-threaded build when the environment allows it.
    pub prefer_multi_thread: bool,
    /// Forward engine logs at their own level.
    pub verbose: bool,
}

impl From<&LoaderConfig> for LoaderOptions {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            prefer_multi_thread: config.prefer_multi_thread,
            verbose: config.verbose,
        }
    }
}

/// Exclusive owner of one loaded engine.
///
/// Terminated when dropped.
pub struct EngineHandle {
    id: Uuid,
    engine: Box<dyn MediaEngine>,
    progress: ProgressSink,
    queue: JobQueue,
    loaded_at: Instant,
}

impl EngineHandle {
    /// Wrap a loaded engine.
    pub fn new(engine: Box<dyn MediaEngine>) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            progress: ProgressSink::new(),
            queue: JobQueue::new(),
            loaded_at: Instant::now(),
        }
    }

    /// Handle identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The engine.
    pub fn engine(&self) -> &dyn MediaEngine {
        self.engine.as_ref()
    }

    /// Backend the engine runs on.
    pub fn backend(&self) -> Backend {
        self.engine.backend()
    }

    /// Engine build, for wasm backends.
    pub fn build(&self) -> Option<EngineBuild> {
        self.engine.build()
    }

    /// Progress of the current job.
    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    /// The handle's job queue.
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// When the engine finished loading.
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// Run a job after every earlier submission on this handle.
    pub async fn submit(&self, input: bytes::Bytes, job: &ProcessingJob) -> Result<JobOutput, MediaError> {
        self.queue.run(run_job(self, input, job)).await
    }

    /// Interrupt in-flight work, clear the virtual filesystem, refuse new jobs.
    pub fn terminate(&self) {
        self.engine.terminate();
    }

    /// Whether the handle was terminated.
    pub fn is_terminated(&self) -> bool {
        self.engine.is_terminated()
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.engine.terminate();
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("backend", &self.backend())
            .field("build", &self.build())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

/// Wasm artifact source together with the host functions its engines need.
#[derive(Clone)]
struct WasmSource {
    artifacts: Arc<dyn ArtifactSource>,
    setup: LinkerSetup,
}

/// Lazily loads one media engine.
pub struct MediaEngineLoader {
    options: LoaderOptions,
    engine_config: EngineConfig,
    probe: Arc<dyn EnvironmentProbe>,
    wasm: Option<WasmSource>,
    cpu_fallback: bool,
    state: watch::Sender<LoadState>,
    load_lock: Mutex<()>,
    handle: RwLock<Option<Arc<EngineHandle>>>,
    error: RwLock<Option<Arc<MediaError>>>,
    capabilities: OnceCell<CapabilitySet>,
}

impl MediaEngineLoader {
    /// Start building a loader around an environment probe.
    pub fn builder(probe: Arc<dyn EnvironmentProbe>) -> MediaEngineLoaderBuilder {
        MediaEngineLoaderBuilder {
            probe,
            options: LoaderOptions::default(),
            engine_config: EngineConfig::default(),
            wasm: None,
            cpu_fallback: true,
        }
    }

    /// Load the engine if needed. Returns `true` if a handle is ready.
    ///
    /// Concurrent callers share a single load. Once settled, the result is
    /// returned immediately without doing any work.
    #[instrument(skip(self))]
    pub async fn load(&self) -> bool {
        if let Some(ready) = settled(&self.state()) {
            return ready;
        }

        let _guard = self.load_lock.lock().await;
        if let Some(ready) = settled(&self.state()) {
            return ready;
        }

        if !self.transition(LoadState::Loading) {
            return false;
        }

        let start = Instant::now();
        match self.try_load().await {
            Ok(handle) => {
                let handle = Arc::new(handle);
                *self.handle.write() = Some(Arc::clone(&handle));

                if self.transition(LoadState::Ready) {
                    info!(
                        handle = %handle.id(),
                        backend = %handle.backend(),
                        build = ?handle.build(),
                        duration_ms = start.elapsed().as_millis(),
                        "Media engine ready"
                    );
                    true
                } else {
                    // Terminated while loading.
                    self.handle.write().take();
                    handle.terminate();
                    false
                }
            }
            Err(e) => {
                warn!(error = %e, duration_ms = start.elapsed().as_millis(), "Media engine load failed");
                let message = e.to_string();
                self.error.write().get_or_insert_with(|| Arc::new(e));
                self.transition(LoadState::Error(message));
                false
            }
        }
    }

    async fn try_load(&self) -> Result<EngineHandle, MediaError> {
        let caps = self.capabilities().await.clone();
        let backend = self.select_backend(&caps)?;

        let engine: Box<dyn MediaEngine> = match (&self.wasm, backend) {
            (Some(source), backend) if backend.is_wasm() => {
                let build = caps.recommended_build(self.options.prefer_multi_thread);
                match self.load_wasm(source, backend, build).await {
                    Ok(engine) => Box::new(engine),
                    Err(e) if build.is_multi_threaded() => {
                        warn!(error = %e, "Multi-threaded build failed, falling back to single-threaded");
                        let fallback = caps
                            .backends()
                            .iter()
                            .copied()
                            .find(|b| matches!(b, Backend::WasmSimd | Backend::Wasm))
                            .unwrap_or(Backend::Wasm);
                        Box::new(self.load_wasm(source, fallback, EngineBuild::SingleThreaded).await?)
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => Box::new(NativeMediaEngine::new()),
        };

        Ok(EngineHandle::new(engine))
    }

    async fn load_wasm(
        &self,
        source: &WasmSource,
        backend: Backend,
        build: EngineBuild,
    ) -> Result<WasmMediaEngine, MediaError> {
        let artifacts = fetch_artifacts(source.artifacts.as_ref(), build).await?;

        let config = self.engine_config.clone();
        let setup = source.setup;
        let verbose = self.options.verbose;
        tokio::task::spawn_blocking(move || {
            WasmMediaEngine::instantiate(&config, &artifacts, backend, setup, verbose)
        })
        .await
        .map_err(|e| MediaError::load_failed(format!("Engine instantiation task failed: {e}")))?
    }

    /// First backend in `caps` this loader can serve.
    ///
    /// # Errors
    ///
    /// `Unsupported` when nothing can be served.
    pub fn select_backend(&self, caps: &CapabilitySet) -> Result<Backend, MediaError> {
        for &backend in caps.backends() {
            match backend {
                Backend::WebGpu => {}
                Backend::WasmThreads if !self.options.prefer_multi_thread => {}
                b if b.is_wasm() && self.wasm.is_some() => return Ok(b),
                Backend::Cpu if self.cpu_fallback => return Ok(Backend::Cpu),
                _ => {}
            }
        }

        Err(MediaError::unsupported(format!(
            "no servable backend among {:?}",
            caps.backends()
        )))
    }

    /// Capabilities of the environment, detected on first use.
    pub async fn capabilities(&self) -> &CapabilitySet {
        self.capabilities
            .get_or_init(|| detect_capabilities(self.probe.as_ref()))
            .await
    }

    /// Current state.
    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }

    /// The error the loader settled on, once in `Error`.
    pub fn error(&self) -> Option<Arc<MediaError>> {
        self.error.read().clone()
    }

    /// The loaded handle, if ready.
    pub fn handle(&self) -> Option<Arc<EngineHandle>> {
        self.handle.read().clone()
    }

    /// Progress of the current job, if a handle is loaded.
    pub fn progress(&self) -> Option<u8> {
        self.handle.read().as_ref().map(|h| h.progress().current())
    }

    /// Caller options.
    pub fn options(&self) -> LoaderOptions {
        self.options
    }

    /// Terminate the handle. Any in-flight job fails with `Terminated` and
    /// the loader settles in `Error`.
    pub fn terminate(&self) {
        if let Some(handle) = self.handle.write().take() {
            handle.terminate();
            info!(handle = %handle.id(), "Media engine terminated");
        }
        if !matches!(self.state(), LoadState::Error(_)) {
            self.error.write().get_or_insert_with(|| Arc::new(MediaError::Terminated));
            self.transition(LoadState::Error(MediaError::Terminated.to_string()));
        }
    }

    fn transition(&self, next: LoadState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(&next) {
                debug!(from = current.as_str(), to = next.as_str(), "Load state transition");
                *current = next;
                true
            } else {
                debug!(from = current.as_str(), to = next.as_str(), "Load state transition rejected");
                false
            }
        })
    }
}

fn settled(state: &LoadState) -> Option<bool> {
    match state {
        LoadState::Ready => Some(true),
        LoadState::Error(_) => Some(false),
        LoadState::Idle | LoadState::Loading => None,
    }
}

impl Drop for MediaEngineLoader {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.terminate();
        }
    }
}

impl std::fmt::Debug for MediaEngineLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEngineLoader")
            .field("options", &self.options)
            .field("state", &self.state())
            .field("wasm_source", &self.wasm.as_ref().map(|s| s.artifacts.describe()))
            .field("cpu_fallback", &self.cpu_fallback)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MediaEngineLoader`].
pub struct MediaEngineLoaderBuilder {
    probe: Arc<dyn EnvironmentProbe>,
    options: LoaderOptions,
    engine_config: EngineConfig,
    wasm: Option<WasmSource>,
    cpu_fallback: bool,
}

impl MediaEngineLoaderBuilder {
    /// Caller options.
    #[must_use]
    pub fn options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Wasmtime engine configuration.
    #[must_use]
    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Serve wasm backends from `source`, linking host functions with `setup`.
    #[must_use]
    pub fn artifact_source(mut self, source: Arc<dyn ArtifactSource>, setup: LinkerSetup) -> Self {
        self.wasm = Some(WasmSource {
            artifacts: source,
            setup,
        });
        self
    }

    /// Allow the native CPU engine.
    #[must_use]
    pub fn cpu_fallback(mut self, enabled: bool) -> Self {
        self.cpu_fallback = enabled;
        self
    }

    /// Build the loader in the `Idle` state.
    pub fn build(self) -> MediaEngineLoader {
        let (state, _rx) = watch::channel(LoadState::Idle);

        MediaEngineLoader {
            options: self.options,
            engine_config: self.engine_config,
            probe: self.probe,
            wasm: self.wasm,
            cpu_fallback: self.cpu_fallback,
            state,
            load_lock: Mutex::new(()),
            handle: RwLock::new(None),
            error: RwLock::new(None),
            capabilities: OnceCell::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ReportedEnvironment;

    fn no_wasm_env() -> Arc<dyn EnvironmentProbe> {
        Arc::new(ReportedEnvironment::default())
    }

    #[test]
    fn test_state_transitions() {
        use LoadState::{Error, Idle, Loading, Ready};
        let err = || Error("boom".to_string());

        assert!(Idle.can_transition_to(&Loading));
        assert!(Loading.can_transition_to(&Ready));
        assert!(Loading.can_transition_to(&err()));
        assert!(Ready.can_transition_to(&err()));

        assert!(!Ready.can_transition_to(&Loading));
        assert!(!err().can_transition_to(&Ready));
        assert!(!err().can_transition_to(&Loading));
        assert!(!Idle.can_transition_to(&Ready));
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&LoadState::Ready).unwrap(),
            r#"{"state":"ready"}"#
        );
        assert_eq!(
            serde_json::to_string(&LoadState::Error("no wasm".into())).unwrap(),
            r#"{"state":"error","message":"no wasm"}"#
        );
    }

    #[tokio::test]
    async fn test_cpu_fallback_loads_native_engine() {
        let loader = MediaEngineLoader::builder(no_wasm_env()).build();
        assert_eq!(loader.state(), LoadState::Idle);

        assert!(loader.load().await);
        assert_eq!(loader.state(), LoadState::Ready);

        let handle = loader.handle().unwrap();
        assert_eq!(handle.backend(), Backend::Cpu);
        assert_eq!(handle.build(), None);
    }

    #[tokio::test]
    async fn test_unsupported_environment_settles_in_error() {
        let loader = MediaEngineLoader::builder(no_wasm_env())
            .cpu_fallback(false)
            .build();

        assert!(!loader.load().await);
        assert!(matches!(loader.state(), LoadState::Error(ref m) if m.contains("Unsupported")));
        assert!(matches!(loader.error().as_deref(), Some(MediaError::Unsupported { .. })));
        assert!(loader.handle().is_none());

        // Terminal: a second call does no work and reports the same outcome.
        assert!(!loader.load().await);
    }

    #[tokio::test]
    async fn test_terminate_settles_in_error() {
        let loader = MediaEngineLoader::builder(no_wasm_env()).build();
        assert!(loader.load().await);
        let handle = loader.handle().unwrap();

        loader.terminate();

        assert!(handle.is_terminated());
        assert!(loader.handle().is_none());
        assert!(matches!(loader.state(), LoadState::Error(_)));
        assert!(matches!(loader.error().as_deref(), Some(MediaError::Terminated)));
        assert!(!loader.load().await);
    }

    #[tokio::test]
    async fn test_drop_terminates_handle() {
        let loader = MediaEngineLoader::builder(no_wasm_env()).build();
        assert!(loader.load().await);
        let handle = loader.handle().unwrap();

        drop(loader);
        assert!(handle.is_terminated());
    }

    #[tokio::test]
    async fn test_state_is_published() {
        let loader = MediaEngineLoader::builder(no_wasm_env()).build();
        let mut rx = loader.subscribe();

        assert!(loader.load().await);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), LoadState::Ready);
    }

    #[tokio::test]
    async fn test_select_backend_skips_unservable() {
        let env = ReportedEnvironment {
            wasm: true,
            simd: true,
            gpu_api: true,
            gpu_adapter: Some("gpu".into()),
            gpu_device: true,
            ..Default::default()
        };
        let loader = MediaEngineLoader::builder(Arc::new(env)).build();
        let caps = loader.capabilities().await.clone();

        assert_eq!(caps.best(), Backend::WebGpu);
        // No artifact source: every wasm backend is skipped.
        assert_eq!(loader.select_backend(&caps).unwrap(), Backend::Cpu);
    }
}
