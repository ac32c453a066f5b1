//! Engine artifacts.
//!
//! An engine build is made of a descriptor (JSON), the engine binary, and for
//! the multi-threaded build a worker binary. [`fetch_artifacts`] pulls all of
//! them from an [`ArtifactSource`] and keeps them in memory as same-origin
//! copies ([`BlobArtifact`]); nothing is re-fetched for the life of a handle.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use toolkit_media_common::{LoaderConfig, MediaError};

use crate::engine::EngineBuild;

/// Media ABI version this host implements.
pub const MEDIA_ABI_VERSION: u32 = 1;

/// One of the files making up an engine build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Engine descriptor.
    Core,
    /// Engine binary.
    Wasm,
    /// Worker binary, multi-threaded build only.
    Worker,
}

/// Relative artifact paths derived from loader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    core_name: String,
    wasm_name: String,
    worker_name: String,
    multi_thread_dir: String,
}

impl ArtifactLayout {
    /// Build the layout from loader configuration.
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            core_name: config.core_name.clone(),
            wasm_name: config.wasm_name.clone(),
            worker_name: config.worker_name.clone(),
            multi_thread_dir: config.multi_thread_dir.trim_matches('/').to_string(),
        }
    }

    /// Path of an artifact relative to the source root.
    ///
    /// The single-threaded build lives at the root, the multi-threaded build
    /// in its own sub-directory.
    pub fn relative_path(&self, build: EngineBuild, kind: ArtifactKind) -> String {
        let name = match kind {
            ArtifactKind::Core => &self.core_name,
            ArtifactKind::Wasm => &self.wasm_name,
            ArtifactKind::Worker => &self.worker_name,
        };

        match build {
            EngineBuild::MultiThreaded if !self.multi_thread_dir.is_empty() => {
                format!("{}/{name}", self.multi_thread_dir)
            }
            _ => name.clone(),
        }
    }
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default())
    }
}

/// Where engine artifacts come from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Fetch one artifact.
    async fn fetch(&self, build: EngineBuild, kind: ArtifactKind) -> Result<Bytes, MediaError>;
}

/// Parsed engine descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineDescriptor {
    /// Exported function run for each job.
    pub entry: String,
    /// Media ABI version the engine was built against.
    pub abi: u32,
    /// `argv[0]` passed to the engine.
    pub program_name: String,
}

impl Default for EngineDescriptor {
    fn default() -> Self {
        Self {
            entry: "_start".to_string(),
            abi: MEDIA_ABI_VERSION,
            program_name: "ffmpeg".to_string(),
        }
    }
}

impl EngineDescriptor {
    /// Parse a descriptor and check its ABI version.
    pub fn parse(bytes: &[u8]) -> Result<Self, MediaError> {
        let descriptor: Self = serde_json::from_slice(bytes)
            .map_err(|e| MediaError::load_failed(format!("Invalid engine descriptor: {e}")))?;

        if descriptor.abi != MEDIA_ABI_VERSION {
            return Err(MediaError::load_failed(format!(
                "Engine ABI version {} is not supported (expected {MEDIA_ABI_VERSION})",
                descriptor.abi
            )));
        }
        if descriptor.entry.is_empty() {
            return Err(MediaError::load_failed("Engine descriptor has no entry point"));
        }

        Ok(descriptor)
    }
}

/// An artifact held in memory under a local `blob:` identifier.
#[derive(Clone)]
pub struct BlobArtifact {
    url: String,
    bytes: Bytes,
}

impl BlobArtifact {
    /// Wrap fetched bytes.
    pub fn new(bytes: Bytes) -> Self {
        Self {
            url: format!("blob:toolkit-media/{}", Uuid::new_v4()),
            bytes,
        }
    }

    /// Local identifier of the in-memory copy.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Artifact contents.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the artifact is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for BlobArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobArtifact")
            .field("url", &self.url)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Every artifact of one engine build, fetched.
#[derive(Debug, Clone)]
pub struct EngineArtifacts {
    /// Build these artifacts belong to.
    pub build: EngineBuild,
    /// Parsed descriptor.
    pub descriptor: EngineDescriptor,
    /// Engine binary.
    pub wasm: BlobArtifact,
    /// Worker binary (multi-threaded build only).
    pub worker: Option<BlobArtifact>,
}

/// Fetch all artifacts for a build, concurrently.
#[instrument(skip(source), fields(source = %source.describe()))]
pub async fn fetch_artifacts(
    source: &dyn ArtifactSource,
    build: EngineBuild,
) -> Result<EngineArtifacts, MediaError> {
    let worker = async {
        if build.is_multi_threaded() {
            source.fetch(build, ArtifactKind::Worker).await.map(Some)
        } else {
            Ok(None)
        }
    };

    let (core, wasm, worker) = tokio::try_join!(
        source.fetch(build, ArtifactKind::Core),
        source.fetch(build, ArtifactKind::Wasm),
        worker,
    )?;

    let descriptor = EngineDescriptor::parse(&core)?;
    let wasm = BlobArtifact::new(wasm);
    let worker = worker.map(BlobArtifact::new);

    debug!(
        build = %build,
        wasm_bytes = wasm.len(),
        worker_bytes = worker.as_ref().map_or(0, BlobArtifact::len),
        "Engine artifacts fetched"
    );

    Ok(EngineArtifacts {
        build,
        descriptor,
        wasm,
        worker,
    })
}

/// In-memory artifact source, for embedding engines or testing.
#[derive(Debug, Default)]
pub struct StaticArtifactSource {
    files: DashMap<(EngineBuild, ArtifactKind), Bytes>,
    fetches: AtomicUsize,
}

impl StaticArtifactSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact.
    #[must_use]
    pub fn with(self, build: EngineBuild, kind: ArtifactKind, bytes: impl Into<Bytes>) -> Self {
        self.files.insert((build, kind), bytes.into());
        self
    }

    /// Register a complete build: default descriptor, engine binary and,
    /// for the multi-threaded build, a worker.
    #[must_use]
    pub fn with_build(self, build: EngineBuild, wasm: impl Into<Bytes>, worker: Option<Bytes>) -> Self {
        let descriptor = serde_json::to_vec(&EngineDescriptor::default()).unwrap_or_default();
        let source = self
            .with(build, ArtifactKind::Core, descriptor)
            .with(build, ArtifactKind::Wasm, wasm);

        match worker {
            Some(worker) => source.with(build, ArtifactKind::Worker, worker),
            None => source,
        }
    }

    /// Number of fetch calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for StaticArtifactSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    async fn fetch(&self, build: EngineBuild, kind: ArtifactKind) -> Result<Bytes, MediaError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        self.files
            .get(&(build, kind))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MediaError::ArtifactFetch {
                url: format!("static:{build}/{kind:?}"),
                status: 404,
            })
    }
}
