//! Media engine core for toolkit-media.
//!
//! This crate provides the engine lifecycle and job execution:
//! - [`detect_capabilities`]: Ranked execution backends for an environment
//! - [`MediaEngineLoader`]: Lazy, single-flight engine loading
//! - [`run_job`] and [`JobQueue`]: Virtual-file jobs against a loaded engine
//! - [`WasmMediaEngine`] and [`NativeMediaEngine`]: The two engine kinds
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  MediaEngineLoader                      │
//! │  - CapabilitySet (detected once)                        │
//! │  - LoadState watch channel                              │
//! └─────────────────────────────────────────────────────────┘
//!                            │ load()
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    EngineHandle                         │
//! │  - WasmMediaEngine (artifacts → WasmEngine → module)    │
//! │    or NativeMediaEngine                                 │
//! │  - MemFs, progress, JobQueue                            │
//! └─────────────────────────────────────────────────────────┘
//!                            │ submit()
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<EngineContext> + Instance              │
//! │  (Per job, isolated)                                    │
//! │  - WASI argv                                            │
//! │  - Epoch ticks: yield each tick, trap once terminated   │
//! │  - Guest logs                                           │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod capability;
pub mod command;
pub mod engine;
pub mod instance;
pub mod job;
pub mod loader;
pub mod media;
pub mod module;
pub mod native;
pub mod store;
pub mod vfs;

pub use artifact::{
    ArtifactKind, ArtifactLayout, ArtifactSource, BlobArtifact, EngineArtifacts, EngineDescriptor,
    MEDIA_ABI_VERSION, StaticArtifactSource, fetch_artifacts,
};
pub use capability::{
    Backend, CapabilitySet, EnvironmentProbe, GpuAdapterInfo, HostProbe, ReportedEnvironment,
    detect_capabilities,
};
pub use command::{OutputFormat, ProcessingJob, ResizeParams, jpeg_qscale};
pub use engine::{EngineBuild, WasmEngine};
pub use instance::{ExecutionResult, InstanceRunner};
pub use job::{JobOutput, JobQueue, run_job};
pub use loader::{EngineHandle, LoadState, LoaderOptions, MediaEngineLoader, MediaEngineLoaderBuilder};
pub use media::{ExecOutcome, LinkerSetup, MediaEngine, WasmMediaEngine};
pub use module::CompiledModule;
pub use native::{NativeMediaEngine, compute_dimensions};
pub use store::{EngineContext, LogEntry, LogLevel, ProgressSink};
pub use vfs::MemFs;
