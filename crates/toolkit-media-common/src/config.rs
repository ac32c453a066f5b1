//! Configuration structures for toolkit-media.
//!
//! This module defines configuration options for various components:
//! - [`ToolkitConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, caching)
//! - [`LoaderConfig`]: Media engine loader options and artifact locations
//! - [`IsolationConfig`]: Route gate pattern table

use serde::{Deserialize, Serialize};

use crate::gate::{default_engine_asset_paths, default_isolated_paths};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolkitConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Media engine loader configuration.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Cross-origin isolation route table.
    #[serde(default)]
    pub isolation: IsolationConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect how engine binaries are compiled and how their
/// per-job instances are allocated.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for fast per-job instantiation.
    ///
    /// Ignored for the multi-threaded build: shared memories are not
    /// supported by the pooling allocator.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Media engines decode whole images into linear memory, so this is
    /// considerably larger than a typical function sandbox.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable caching of compiled modules.
    #[serde(default = "defaults::cache_compiled_modules")]
    pub cache_compiled_modules: bool,

    /// Directory for compiled module cache.
    #[serde(default)]
    pub cache_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            cache_compiled_modules: defaults::cache_compiled_modules(),
            cache_dir: Some("./cache".into()),
        }
    }
}

/// Media engine loader configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoaderConfig {
    /// Opt in to the multi-threaded engine build when the environment allows it.
    #[serde(default = "defaults::prefer_multi_thread")]
    pub prefer_multi_thread: bool,

    /// Forward guest engine logs at their own level instead of `trace`.
    #[serde(default)]
    pub verbose: bool,

    /// Base URL the engine artifacts are fetched from (content-delivery source).
    #[serde(default)]
    pub artifact_base_url: Option<String>,

    /// Local directory holding engine artifacts. Takes precedence over the URL.
    #[serde(default)]
    pub artifact_dir: Option<String>,

    /// Engine descriptor file name.
    #[serde(default = "defaults::core_name")]
    pub core_name: String,

    /// Engine binary file name.
    #[serde(default = "defaults::wasm_name")]
    pub wasm_name: String,

    /// Worker binary file name (multi-threaded build only).
    #[serde(default = "defaults::worker_name")]
    pub worker_name: String,

    /// Sub-directory holding the multi-threaded build.
    #[serde(default = "defaults::multi_thread_dir")]
    pub multi_thread_dir: String,

    /// Allow the native CPU engine when no wasm backend can be served.
    #[serde(default = "defaults::cpu_fallback")]
    pub cpu_fallback: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            prefer_multi_thread: defaults::prefer_multi_thread(),
            verbose: false,
            artifact_base_url: None,
            artifact_dir: None,
            core_name: defaults::core_name(),
            wasm_name: defaults::wasm_name(),
            worker_name: defaults::worker_name(),
            multi_thread_dir: defaults::multi_thread_dir(),
            cpu_fallback: defaults::cpu_fallback(),
        }
    }
}

impl LoaderConfig {
    /// Returns `true` if some artifact source is configured.
    pub fn has_artifact_source(&self) -> bool {
        self.artifact_dir.is_some() || self.artifact_base_url.is_some()
    }
}

/// Route gate configuration.
///
/// Both lists are path patterns (see [`crate::gate`] for the syntax).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IsolationConfig {
    /// Pages served with opener + embedder policy (cross-origin isolated).
    #[serde(default = "default_isolated_paths")]
    pub isolated_paths: Vec<String>,

    /// Engine asset paths served with embedder + resource policy.
    #[serde(default = "default_engine_asset_paths")]
    pub engine_asset_paths: Vec<String>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            isolated_paths: default_isolated_paths(),
            engine_asset_paths: default_engine_asset_paths(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        16
    }

    pub const fn instance_memory_mb() -> u32 {
        512
    }

    pub const fn cache_compiled_modules() -> bool {
        true
    }

    pub const fn prefer_multi_thread() -> bool {
        true
    }

    pub fn core_name() -> String {
        "ffmpeg-core.json".to_string()
    }

    pub fn wasm_name() -> String {
        "ffmpeg-core.wasm".to_string()
    }

    pub fn worker_name() -> String {
        "ffmpeg-core.worker.wasm".to_string()
    }

    pub fn multi_thread_dir() -> String {
        "mt".to_string()
    }

    pub const fn cpu_fallback() -> bool {
        true
    }
}
