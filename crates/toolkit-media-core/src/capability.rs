//! Execution backend detection.
//!
//! [`detect_capabilities`] queries an [`EnvironmentProbe`] and produces a
//! ranked [`CapabilitySet`]. Detection never fails: a probe that errors is
//! logged and treated as "not available", and the CPU backend is always
//! present as the last candidate.
//!
//! Two probes ship with the crate:
//! - [`HostProbe`] inspects the native host through wasmtime
//! - [`ReportedEnvironment`] replays flags reported by a browser client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use toolkit_media_common::MediaError;

use crate::engine::{EngineBuild, WasmEngine};

/// A candidate execution backend, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// GPU compute.
    #[serde(rename = "webgpu")]
    WebGpu,
    /// Multi-threaded wasm with shared memory.
    WasmThreads,
    /// Single-threaded wasm with 128-bit SIMD.
    WasmSimd,
    /// Plain single-threaded wasm.
    Wasm,
    /// Native CPU engine.
    Cpu,
}

impl Backend {
    /// Stable name used in logs and API payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebGpu => "webgpu",
            Self::WasmThreads => "wasm-threads",
            Self::WasmSimd => "wasm-simd",
            Self::Wasm => "wasm",
            Self::Cpu => "cpu",
        }
    }

    /// Returns `true` for backends that run a wasm engine build.
    pub fn is_wasm(self) -> bool {
        matches!(self, Self::WasmThreads | Self::WasmSimd | Self::Wasm)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered, deduplicated list of usable backends.
///
/// Immutable once computed. Always ends with [`Backend::Cpu`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    backends: Vec<Backend>,
    shared_memory: bool,
    cross_origin_isolated: bool,
}

impl CapabilitySet {
    fn from_parts(mut backends: Vec<Backend>, shared_memory: bool, cross_origin_isolated: bool) -> Self {
        backends.push(Backend::Cpu);
        backends.sort();
        backends.dedup();

        Self {
            backends,
            shared_memory,
            cross_origin_isolated,
        }
    }

    /// A set holding only the CPU backend.
    pub fn cpu_only() -> Self {
        Self::from_parts(Vec::new(), false, false)
    }

    /// Backends in rank order.
    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    /// Returns `true` if the backend is present.
    pub fn contains(&self, backend: Backend) -> bool {
        self.backends.contains(&backend)
    }

    /// The highest ranked backend.
    pub fn best(&self) -> Backend {
        self.backends.first().copied().unwrap_or(Backend::Cpu)
    }

    /// Whether a shared memory could be created, regardless of isolation.
    pub fn shared_memory(&self) -> bool {
        self.shared_memory
    }

    /// Whether the environment reported cross-origin isolation.
    pub fn cross_origin_isolated(&self) -> bool {
        self.cross_origin_isolated
    }

    /// Engine build to load for a caller that may opt in to threads.
    pub fn recommended_build(&self, prefer_multi_thread: bool) -> EngineBuild {
        if prefer_multi_thread && self.contains(Backend::WasmThreads) {
            EngineBuild::MultiThreaded
        } else {
            EngineBuild::SingleThreaded
        }
    }
}

/// A GPU adapter returned by a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuAdapterInfo {
    /// Adapter description, e.g. vendor and architecture.
    pub name: String,
}

/// Source of runtime feature checks.
#[async_trait]
pub trait EnvironmentProbe: Send + Sync {
    /// WebAssembly can be compiled and run at all.
    fn has_wasm(&self) -> bool;

    /// 128-bit SIMD is available to wasm code.
    fn has_wasm_simd(&self) -> bool;

    /// A shared cross-thread memory can be created.
    fn has_shared_memory(&self) -> bool;

    /// The environment is cross-origin isolated.
    fn cross_origin_isolated(&self) -> bool;

    /// A GPU adapter request API exists.
    fn has_gpu_api(&self) -> bool;

    /// Request a GPU adapter. `Ok(None)` means no adapter is available.
    async fn request_gpu_adapter(&self) -> Result<Option<GpuAdapterInfo>, MediaError>;

    /// Request a device on a previously acquired adapter.
    async fn request_gpu_device(&self, adapter: &GpuAdapterInfo) -> Result<(), MediaError>;
}

/// Compute the ranked capability set for an environment.
///
/// Never fails. GPU handshake failures and isolation mismatches are logged
/// and degrade to the next candidate.
#[instrument(skip(probe))]
pub async fn detect_capabilities(probe: &dyn EnvironmentProbe) -> CapabilitySet {
    let mut backends = Vec::with_capacity(5);

    if probe.has_gpu_api() && gpu_handshake(probe).await {
        backends.push(Backend::WebGpu);
    }

    let shared_memory = probe.has_shared_memory();
    let isolated = probe.cross_origin_isolated();
    let wasm = probe.has_wasm();

    if wasm {
        if shared_memory && isolated {
            backends.push(Backend::WasmThreads);
        } else if shared_memory {
            warn!("Shared memory present but environment is not cross-origin isolated; threads disabled");
        }

        if probe.has_wasm_simd() {
            backends.push(Backend::WasmSimd);
        }
        backends.push(Backend::Wasm);
    }

    let set = CapabilitySet::from_parts(backends, shared_memory, isolated);
    debug!(backends = ?set.backends(), "Capabilities detected");
    set
}

async fn gpu_handshake(probe: &dyn EnvironmentProbe) -> bool {
    let adapter = match probe.request_gpu_adapter().await {
        Ok(Some(adapter)) => adapter,
        Ok(None) => {
            debug!("No GPU adapter available");
            return false;
        }
        Err(e) => {
            warn!(error = %e, "GPU adapter request failed");
            return false;
        }
    };

    match probe.request_gpu_device(&adapter).await {
        Ok(()) => true,
        Err(e) => {
            warn!(adapter = %adapter.name, error = %e, "GPU device request failed");
            false
        }
    }
}

/// Probe for the native host, answered by wasmtime itself.
#[derive(Debug, Clone, Copy)]
pub struct HostProbe {
    simd: bool,
    shared_memory: bool,
    cross_origin_isolated: bool,
}

impl HostProbe {
    /// Run the host checks.
    ///
    /// A native process has no browser isolation headers, so the caller
    /// states whether it should be treated as isolated.
    pub fn detect(cross_origin_isolated: bool) -> Self {
        Self {
            simd: WasmEngine::supports_simd(),
            shared_memory: WasmEngine::supports_shared_memory(),
            cross_origin_isolated,
        }
    }
}

#[async_trait]
impl EnvironmentProbe for HostProbe {
    fn has_wasm(&self) -> bool {
        true
    }

    fn has_wasm_simd(&self) -> bool {
        self.simd
    }

    fn has_shared_memory(&self) -> bool {
        self.shared_memory
    }

    fn cross_origin_isolated(&self) -> bool {
        self.cross_origin_isolated
    }

    fn has_gpu_api(&self) -> bool {
        false
    }

    async fn request_gpu_adapter(&self) -> Result<Option<GpuAdapterInfo>, MediaError> {
        Ok(None)
    }

    async fn request_gpu_device(&self, _adapter: &GpuAdapterInfo) -> Result<(), MediaError> {
        Err(MediaError::unsupported("no GPU API on this host"))
    }
}

/// Feature flags reported by a client, replayed as a probe.
///
/// ```json
/// {"wasm": true, "simd": true, "sharedMemory": true, "crossOriginIsolated": false}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportedEnvironment {
    /// `WebAssembly` global present.
    pub wasm: bool,
    /// SIMD validation succeeded.
    pub simd: bool,
    /// `SharedArrayBuffer` global present.
    pub shared_memory: bool,
    /// `self.crossOriginIsolated`.
    pub cross_origin_isolated: bool,
    /// `navigator.gpu` present.
    pub gpu_api: bool,
    /// Adapter returned by `requestAdapter()`, if any.
    pub gpu_adapter: Option<String>,
    /// `requestDevice()` succeeded.
    pub gpu_device: bool,
}

#[async_trait]
impl EnvironmentProbe for ReportedEnvironment {
    fn has_wasm(&self) -> bool {
        self.wasm
    }

    fn has_wasm_simd(&self) -> bool {
        self.simd
    }

    fn has_shared_memory(&self) -> bool {
        self.shared_memory
    }

    fn cross_origin_isolated(&self) -> bool {
        self.cross_origin_isolated
    }

    fn has_gpu_api(&self) -> bool {
        self.gpu_api
    }

    async fn request_gpu_adapter(&self) -> Result<Option<GpuAdapterInfo>, MediaError> {
        Ok(self
            .gpu_adapter
            .clone()
            .map(|name| GpuAdapterInfo { name }))
    }

    async fn request_gpu_device(&self, _adapter: &GpuAdapterInfo) -> Result<(), MediaError> {
        if self.gpu_device {
            Ok(())
        } else {
            Err(MediaError::unsupported("GPU device request rejected"))
        }
    }
}
