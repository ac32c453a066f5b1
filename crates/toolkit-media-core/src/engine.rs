//! Wasmtime engine configuration and creation.
//!
//! One [`WasmEngine`] backs one loaded media engine. It is:
//! - Configured per build: the multi-threaded build enables wasm threads and
//!   shared memory, the single-threaded build uses the pooling allocator
//! - Set up with epoch interruption so a running job yields on every tick
//!   and can be terminated

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, Module, PoolingAllocationConfig};

use toolkit_media_common::{EngineConfig, MediaError};

/// Which engine binary to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineBuild {
    /// Plain build, one thread, no shared memory.
    SingleThreaded,
    /// Build that needs shared memory and a worker binary.
    MultiThreaded,
}

impl EngineBuild {
    /// Returns `true` for the multi-threaded build.
    pub fn is_multi_threaded(self) -> bool {
        matches!(self, Self::MultiThreaded)
    }

    /// Short label used in logs and API responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleThreaded => "single-threaded",
            Self::MultiThreaded => "multi-threaded",
        }
    }
}

impl std::fmt::Display for EngineBuild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread-safe WebAssembly engine wrapper.
///
/// Wraps a Wasmtime [`Engine`] configured for running one media engine
/// build. The engine holds no per-job state; every job gets a fresh store.
///
/// # Configuration
///
/// - **Async Support**: host functions and guest entry points are awaited
/// - **Epoch Interruption**: always on; [`WasmEngine::terminate`] bumps the
///   epoch and every running store traps at its next check
/// - **Pooling Allocator**: single-threaded build only
/// - **Threads**: multi-threaded build only
///
/// # Example
///
/// ```ignore
/// use toolkit_media_common::EngineConfig;
/// use toolkit_media_core::{EngineBuild, WasmEngine};
///
/// let engine = WasmEngine::new(&EngineConfig::default(), EngineBuild::SingleThreaded)?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
    build: EngineBuild,
    pooling: bool,
}

impl WasmEngine {
    /// Create a new WebAssembly engine for the given build.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is invalid or the
    /// pooling allocator cannot be initialized.
    pub fn new(config: &EngineConfig, build: EngineBuild) -> Result<Self, MediaError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.async_support(true);
        wasmtime_config.epoch_interruption(true);
        wasmtime_config.wasm_simd(true);
        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if build.is_multi_threaded() {
            wasmtime_config.wasm_threads(true);
        }

        // Shared memories cannot live in the pooling allocator.
        let pooling = config.pooling_allocator && !build.is_multi_threaded();
        if pooling {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        if config.cache_compiled_modules {
            match wasmtime_config.cache_config_load_default() {
                Ok(_) => debug!(cache_dir = ?config.cache_dir, "Module caching configured"),
                Err(e) => warn!(error = %e, "Module cache unavailable, compiling without it"),
            }
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            MediaError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(build = %build, "Wasmtime engine initialized");

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
            build,
            pooling,
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The build this engine was configured for.
    pub fn build(&self) -> EngineBuild {
        self.build
    }

    /// Increment the epoch counter.
    ///
    /// Stores created by [`crate::store::create_store`] have a deadline of one
    /// tick, so every running job reaches its deadline callback.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Wake all guest code running on this engine.
    ///
    /// Guests whose cancel flag is set trap on this tick.
    pub fn terminate(&self) {
        debug!(build = %self.build, "Interrupting running guests");
        self.increment_epoch();
    }

    /// Advance the epoch every `interval` until the ticker is dropped.
    ///
    /// The ticker runs on its own OS thread so it keeps ticking while a guest
    /// occupies a runtime worker.
    pub fn start_ticker(&self, interval: Duration) -> EpochTicker {
        let stop = Arc::new(AtomicBool::new(false));
        let engine = Arc::clone(&self.engine);
        let flag = Arc::clone(&stop);

        let spawned = std::thread::Builder::new()
            .name("epoch-ticker".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    engine.increment_epoch();
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Epoch ticker unavailable; guests will not yield");
        }

        EpochTicker { stop }
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.pooling
    }

    /// Whether this host can compile a module with a shared linear memory.
    pub fn supports_shared_memory() -> bool {
        let mut config = Config::new();
        config.wasm_threads(true);
        Self::probe_compiles(&config, "(module (memory 1 1 shared))")
    }

    /// Whether this host can compile 128-bit SIMD code.
    pub fn supports_simd() -> bool {
        let mut config = Config::new();
        config.wasm_simd(true);
        Self::probe_compiles(
            &config,
            "(module (func (result v128) (v128.const i32x4 0 0 0 0)))",
        )
    }

    fn probe_compiles(config: &Config, wat: &str) -> bool {
        match Engine::new(config) {
            Ok(engine) => Module::new(&engine, wat).is_ok(),
            Err(e) => {
                debug!(error = %e, "Capability probe engine rejected");
                false
            }
        }
    }
}

/// Epoch interval while a job runs.
pub const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Stops its ticker thread when dropped.
#[derive(Debug)]
pub struct EpochTicker {
    stop: Arc<AtomicBool>,
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("build", &self.build)
            .field("pooling_allocator", &self.pooling)
            .field("max_instances", &self.config.max_instances)
            .field("instance_memory_mb", &self.config.instance_memory_mb)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cache() -> EngineConfig {
        EngineConfig {
            cache_compiled_modules: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_engine_creation_single_threaded() {
        let engine = WasmEngine::new(&no_cache(), EngineBuild::SingleThreaded).unwrap();

        assert!(engine.is_pooling_enabled());
        assert_eq!(engine.build(), EngineBuild::SingleThreaded);
    }

    #[test]
    fn test_engine_creation_no_pooling() {
        let config = EngineConfig {
            pooling_allocator: false,
            ..no_cache()
        };
        let engine = WasmEngine::new(&config, EngineBuild::SingleThreaded).unwrap();

        assert!(!engine.is_pooling_enabled());
    }

    #[test]
    fn test_multi_threaded_build_skips_pooling() {
        let engine = WasmEngine::new(&no_cache(), EngineBuild::MultiThreaded).unwrap();

        assert!(!engine.is_pooling_enabled());
        assert!(engine.build().is_multi_threaded());
    }

    #[test]
    fn test_engine_terminate_does_not_panic() {
        let engine = WasmEngine::new(&no_cache(), EngineBuild::SingleThreaded).unwrap();

        engine.terminate();
        engine.increment_epoch();
    }

    #[test]
    fn test_host_probes() {
        assert!(WasmEngine::supports_simd());
        assert!(WasmEngine::supports_shared_memory());
    }

    #[test]
    fn test_engine_debug() {
        let engine = WasmEngine::new(&no_cache(), EngineBuild::SingleThreaded).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("WasmEngine"));
        assert!(debug_str.contains("SingleThreaded"));
    }

    #[test]
    fn test_build_labels() {
        assert_eq!(EngineBuild::MultiThreaded.to_string(), "multi-threaded");
        assert_eq!(
            serde_json::to_string(&EngineBuild::SingleThreaded).unwrap(),
            "\"single-threaded\""
        );
    }
}
