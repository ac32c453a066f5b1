//! Engine binary compilation.
//!
//! [`CompiledModule`] wraps a Wasmtime [`Module`] compiled from a fetched
//! engine artifact. Artifacts are normally binary wasm; text format is
//! accepted as well so hand-written test engines can be served the same way.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::{Engine, ExternType, Module};

use toolkit_media_common::MediaError;

/// A compiled engine module.
///
/// # Thread Safety
///
/// `CompiledModule` is cheap to clone and can be instantiated from many
/// stores at once; the underlying Wasmtime module is thread-safe.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,

    /// Hash of the original artifact bytes.
    content_hash: String,

    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile a module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a wasm binary or fail to compile.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, MediaError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            MediaError::compilation_failed(format!("Engine module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Engine module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, MediaError> {
        let start = Instant::now();

        let module = Module::new(engine, wat)
            .map_err(|e| MediaError::compilation_failed(format!("WAT compilation failed: {e}")))?;

        let content_hash = compute_hash(wat.as_bytes());

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a fetched artifact, binary or text.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact is neither valid wasm nor valid WAT.
    pub fn from_artifact(engine: &Engine, bytes: &[u8]) -> Result<Self, MediaError> {
        match std::str::from_utf8(bytes) {
            Ok(text) if text.trim_start().starts_with("(module") => Self::from_wat(engine, text),
            _ => Self::from_bytes(engine, bytes),
        }
    }

    /// Get the content hash of the original artifact bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn as_module(&self) -> &Module {
        &self.inner
    }

    /// Returns `true` if the module exports a function with this name.
    pub fn exports_function(&self, name: &str) -> bool {
        self.inner
            .get_export(name)
            .is_some_and(|ty| matches!(ty, ExternType::Func(_)))
    }

    /// Returns `true` if any memory the module defines or imports is shared.
    pub fn uses_shared_memory(&self) -> bool {
        let shared = |ty: ExternType| matches!(ty, ExternType::Memory(m) if m.is_shared());

        self.inner.exports().any(|e| shared(e.ty())) || self.inner.imports().any(|i| shared(i.ty()))
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), MediaError> {
        if bytes.len() < 8 {
            return Err(MediaError::compilation_failed("Invalid Wasm: file too small"));
        }

        if &bytes[0..4] != b"\0asm" {
            return Err(MediaError::compilation_failed("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
pub(crate) fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EngineBuild, WasmEngine};
    use toolkit_media_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine(build: EngineBuild) -> WasmEngine {
        let config = EngineConfig {
            pooling_allocator: false,
            cache_compiled_modules: false,
            ..Default::default()
        };
        WasmEngine::new(&config, build).unwrap()
    }

    #[test]
    fn test_validate_wasm_header() {
        assert!(CompiledModule::validate_wasm_header(MINIMAL_WASM).is_ok());
        assert!(CompiledModule::validate_wasm_header(&[0x00, 0x61]).is_err());
        assert!(CompiledModule::validate_wasm_header(&[0, 0, 0, 0, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_from_artifact_binary_and_text() {
        let engine = engine(EngineBuild::SingleThreaded);

        let binary = CompiledModule::from_artifact(engine.inner(), MINIMAL_WASM).unwrap();
        assert!(!binary.content_hash().is_empty());

        let text = CompiledModule::from_artifact(
            engine.inner(),
            b"(module (func (export \"_start\")))",
        )
        .unwrap();
        assert!(text.exports_function("_start"));
        assert!(!text.exports_function("main"));
    }

    #[test]
    fn test_from_artifact_rejects_garbage() {
        let engine = engine(EngineBuild::SingleThreaded);

        let err = CompiledModule::from_artifact(engine.inner(), b"<html>not found</html>")
            .unwrap_err();
        assert!(matches!(err, MediaError::CompilationFailed { .. }));

        let err = CompiledModule::from_artifact(engine.inner(), &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, MediaError::CompilationFailed { .. }));
    }

    #[test]
    fn test_shared_memory_detection() {
        let engine = engine(EngineBuild::MultiThreaded);

        let shared = CompiledModule::from_wat(
            engine.inner(),
            r#"(module (memory (export "memory") 1 1 shared))"#,
        )
        .unwrap();
        assert!(shared.uses_shared_memory());

        let plain =
            CompiledModule::from_wat(engine.inner(), r#"(module (memory (export "memory") 1))"#)
                .unwrap();
        assert!(!plain.uses_shared_memory());
    }

    #[test]
    fn test_module_debug() {
        let engine = engine(EngineBuild::SingleThreaded);
        let module = CompiledModule::from_bytes(engine.inner(), MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("CompiledModule"));
        assert!(debug_str.contains("content_hash"));
    }
}
