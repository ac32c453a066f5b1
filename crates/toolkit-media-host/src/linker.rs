//! Host function registration for Wasmtime linkers.
//!
//! [`register_all`] has the [`toolkit_media_core::LinkerSetup`] signature and
//! is what the loader hands to every engine it instantiates.

use toolkit_media_common::{MediaError, VfsError};
use toolkit_media_core::store::EngineContext;
use tracing::warn;
use wasmtime::{Caller, Linker};

use crate::logging::{LoggingHost, level_from_i32};
use crate::memory::GuestMemory;

/// Returned when the named virtual file does not exist.
pub const ERR_NOT_FOUND: i32 = -1;

/// Returned when a file name is not valid UTF-8 or is rejected by the
/// virtual filesystem.
pub const ERR_INVALID_NAME: i32 = -2;

/// Import module of the media calls.
pub const MEDIA_MODULE: &str = "media";

/// Register every host import an engine binary may use.
///
/// - `env::log`
/// - `media::fs_size`, `media::fs_read`, `media::fs_write`, `media::fs_delete`
/// - `media::progress`
/// - WASI preview1
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<EngineContext>) -> Result<(), MediaError> {
    register_logging(linker)?;
    register_media_abi(linker)?;
    register_wasi(linker)?;
    Ok(())
}

/// Register the logging host function.
///
/// Registers `env::log(level: i32, ptr: i32, len: i32)`. Bad pointers are
/// logged and ignored; a log call never fails the job.
pub fn register_logging(linker: &mut Linker<EngineContext>) -> Result<(), MediaError> {
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, EngineContext>, level: i32, ptr: i32, len: i32| {
                let message = match GuestMemory::from_caller(&mut caller)
                    .and_then(|memory| memory.read(&caller, ptr, len))
                {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        warn!(error = %e, "Dropping guest log message");
                        return;
                    }
                };

                LoggingHost::log(caller.data_mut(), level_from_i32(level), &message);
            },
        )
        .map_err(|e| registration_error("env::log", &e))?;

    Ok(())
}

/// Register the `media::*` virtual file and progress calls.
pub fn register_media_abi(linker: &mut Linker<EngineContext>) -> Result<(), MediaError> {
    linker
        .func_wrap(
            MEDIA_MODULE,
            "fs_size",
            |mut caller: Caller<'_, EngineContext>, name_ptr: i32, name_len: i32| -> wasmtime::Result<i64> {
                let memory = GuestMemory::from_caller(&mut caller)?;
                let Some(name) = memory.read_str(&caller, name_ptr, name_len)? else {
                    return Ok(i64::from(ERR_INVALID_NAME));
                };

                Ok(caller
                    .data()
                    .vfs()
                    .file_size(&name)
                    .and_then(|size| i64::try_from(size).ok())
                    .unwrap_or(i64::from(ERR_NOT_FOUND)))
            },
        )
        .map_err(|e| registration_error("media::fs_size", &e))?;

    linker
        .func_wrap(
            MEDIA_MODULE,
            "fs_read",
            |mut caller: Caller<'_, EngineContext>,
             name_ptr: i32,
             name_len: i32,
             dst_ptr: i32,
             dst_len: i32|
             -> wasmtime::Result<i64> {
                let memory = GuestMemory::from_caller(&mut caller)?;
                let Some(name) = memory.read_str(&caller, name_ptr, name_len)? else {
                    return Ok(i64::from(ERR_INVALID_NAME));
                };

                let data = match caller.data().vfs().read_file(&name) {
                    Ok(data) => data,
                    Err(e) => return Ok(i64::from(vfs_error_code(&e))),
                };

                let capacity = usize::try_from(dst_len).unwrap_or(0);
                let count = data.len().min(capacity);
                memory.write(&mut caller, dst_ptr, &data[..count])?;
                Ok(i64::try_from(count)?)
            },
        )
        .map_err(|e| registration_error("media::fs_read", &e))?;

    linker
        .func_wrap(
            MEDIA_MODULE,
            "fs_write",
            |mut caller: Caller<'_, EngineContext>,
             name_ptr: i32,
             name_len: i32,
             src_ptr: i32,
             src_len: i32|
             -> wasmtime::Result<i32> {
                let memory = GuestMemory::from_caller(&mut caller)?;
                let Some(name) = memory.read_str(&caller, name_ptr, name_len)? else {
                    return Ok(ERR_INVALID_NAME);
                };
                let data = memory.read(&caller, src_ptr, src_len)?;

                Ok(match caller.data().vfs().write_file(&name, data) {
                    Ok(()) => 0,
                    Err(e) => vfs_error_code(&e),
                })
            },
        )
        .map_err(|e| registration_error("media::fs_write", &e))?;

    linker
        .func_wrap(
            MEDIA_MODULE,
            "fs_delete",
            |mut caller: Caller<'_, EngineContext>, name_ptr: i32, name_len: i32| -> wasmtime::Result<i32> {
                let memory = GuestMemory::from_caller(&mut caller)?;
                let Some(name) = memory.read_str(&caller, name_ptr, name_len)? else {
                    return Ok(ERR_INVALID_NAME);
                };

                Ok(match caller.data().vfs().delete_file(&name) {
                    Ok(()) => 0,
                    Err(e) => vfs_error_code(&e),
                })
            },
        )
        .map_err(|e| registration_error("media::fs_delete", &e))?;

    linker
        .func_wrap(
            MEDIA_MODULE,
            "progress",
            |caller: Caller<'_, EngineContext>, percent: i32| {
                caller.data().progress().report(i64::from(percent));
            },
        )
        .map_err(|e| registration_error("media::progress", &e))?;

    Ok(())
}

/// Register WASI preview1, which carries the job's argument vector.
pub fn register_wasi(linker: &mut Linker<EngineContext>) -> Result<(), MediaError> {
    wasmtime_wasi::preview1::add_to_linker_async(linker, |ctx: &mut EngineContext| ctx.wasi())
        .map_err(|e| registration_error("wasi_snapshot_preview1", &e))
}

fn vfs_error_code(error: &VfsError) -> i32 {
    match error {
        VfsError::NotFound { .. } => ERR_NOT_FOUND,
        VfsError::InvalidName { .. } => ERR_INVALID_NAME,
    }
}

fn registration_error(name: &str, error: &wasmtime::Error) -> MediaError {
    MediaError::invalid_config(format!("Failed to register {name}: {error}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use toolkit_media_common::EngineConfig;
    use toolkit_media_core::{
        CompiledModule, EngineBuild, ExecutionResult, InstanceRunner, LogLevel, MemFs,
        ProgressSink, WasmEngine,
        store::create_store,
    };

    use super::*;

    fn engine(build: EngineBuild) -> WasmEngine {
        let config = EngineConfig {
            pooling_allocator: false,
            cache_compiled_modules: false,
            ..Default::default()
        };
        WasmEngine::new(&config, build).unwrap()
    }

    async fn run(
        build: EngineBuild,
        wat: &str,
        vfs: Arc<MemFs>,
        progress: ProgressSink,
    ) -> (ExecutionResult, EngineContext) {
        let engine = engine(build);
        let module = CompiledModule::from_wat(engine.inner(), wat).unwrap();
        let mut linker = Linker::new(engine.inner());
        register_all(&mut linker).unwrap();

        let runner = InstanceRunner::new(&linker, &module, "_start").unwrap();
        let context = EngineContext::new(
            "job-test".into(),
            &["ffmpeg".to_string()],
            vfs,
            progress,
            false,
            64 * 1024 * 1024,
        );
        let mut store = create_store(&engine, context, Arc::new(AtomicBool::new(false)));
        let result = runner.execute(&mut store).await.unwrap();
        (result, store.into_data())
    }

    // Copies input.bin to output.bin, reporting progress and logging.
    const COPY_GUEST: &str = r#"
        (module
          (import "env" "log" (func $log (param i32 i32 i32)))
          (import "media" "fs_size" (func $size (param i32 i32) (result i64)))
          (import "media" "fs_read" (func $read (param i32 i32 i32 i32) (result i64)))
          (import "media" "fs_write" (func $write (param i32 i32 i32 i32) (result i32)))
          (import "media" "progress" (func $progress (param i32)))
          (memory (export "memory") 1)
          (data (i32.const 0) "input.bin")
          (data (i32.const 16) "output.bin")
          (data (i32.const 32) "copying")
          (func (export "_start")
            (local $n i32)
            (call $log (i32.const 1) (i32.const 32) (i32.const 7))
            (local.set $n (i32.wrap_i64 (call $size (i32.const 0) (i32.const 9))))
            (drop (call $read (i32.const 0) (i32.const 9) (i32.const 1024) (local.get $n)))
            (call $progress (i32.const 50))
            (drop (call $write (i32.const 16) (i32.const 10) (i32.const 1024) (local.get $n)))
            (call $progress (i32.const 100))))
    "#;

    #[test]
    fn test_register_all() {
        let engine = engine(EngineBuild::SingleThreaded);
        let mut linker = Linker::new(engine.inner());

        assert!(register_all(&mut linker).is_ok());
    }

    #[test]
    fn test_register_twice_fails() {
        let engine = engine(EngineBuild::SingleThreaded);
        let mut linker = Linker::new(engine.inner());

        register_logging(&mut linker).unwrap();
        let err = register_logging(&mut linker).unwrap_err();
        assert!(err.to_string().contains("env::log"));
    }

    #[tokio::test]
    async fn test_copy_guest_round_trip() {
        let vfs = Arc::new(MemFs::new());
        vfs.write_file("input.bin", b"\x89PNG pixels".to_vec()).unwrap();
        let progress = ProgressSink::new();

        let (result, ctx) = run(
            EngineBuild::SingleThreaded,
            COPY_GUEST,
            Arc::clone(&vfs),
            progress.clone(),
        )
        .await;

        assert!(matches!(result, ExecutionResult::Success));
        assert_eq!(vfs.read_file("output.bin").unwrap().as_ref(), b"\x89PNG pixels");
        assert_eq!(progress.current(), 100);
        assert_eq!(ctx.logs.len(), 1);
        assert_eq!(ctx.logs[0].level, LogLevel::Info);
        assert_eq!(ctx.logs[0].message, "copying");
    }

    #[tokio::test]
    async fn test_missing_file_returns_not_found() {
        let wat = r#"
            (module
              (import "media" "fs_size" (func $size (param i32 i32) (result i64)))
              (memory (export "memory") 1)
              (data (i32.const 0) "absent.png")
              (func (export "_start")
                (if (i64.ne (call $size (i32.const 0) (i32.const 10)) (i64.const -1))
                  (then unreachable))))
        "#;

        let (result, _) = run(
            EngineBuild::SingleThreaded,
            wat,
            Arc::new(MemFs::new()),
            ProgressSink::new(),
        )
        .await;
        assert!(matches!(result, ExecutionResult::Success));
    }

    #[tokio::test]
    async fn test_out_of_bounds_read_traps() {
        let wat = r#"
            (module
              (import "media" "fs_delete" (func $delete (param i32 i32) (result i32)))
              (memory (export "memory") 1)
              (func (export "_start")
                (drop (call $delete (i32.const 65530) (i32.const 100)))))
        "#;

        let (result, _) = run(
            EngineBuild::SingleThreaded,
            wat,
            Arc::new(MemFs::new()),
            ProgressSink::new(),
        )
        .await;
        match result {
            ExecutionResult::Trap { message, .. } => assert!(message.contains("out of bounds")),
            other => panic!("expected trap, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shared_memory_guest() {
        let wat = r#"
            (module
              (import "media" "fs_write" (func $write (param i32 i32 i32 i32) (result i32)))
              (memory (export "memory") 1 1 shared)
              (data (i32.const 0) "output.bin")
              (data (i32.const 16) "mt")
              (func (export "_start")
                (drop (call $write (i32.const 0) (i32.const 10) (i32.const 16) (i32.const 2)))))
        "#;

        let vfs = Arc::new(MemFs::new());
        let (result, _) = run(
            EngineBuild::MultiThreaded,
            wat,
            Arc::clone(&vfs),
            ProgressSink::new(),
        )
        .await;

        assert!(matches!(result, ExecutionResult::Success));
        assert_eq!(vfs.read_file("output.bin").unwrap().as_ref(), b"mt");
    }

    #[test]
    fn test_vfs_error_codes() {
        assert_eq!(
            vfs_error_code(&VfsError::NotFound { name: "x".into() }),
            ERR_NOT_FOUND
        );
        assert_eq!(
            vfs_error_code(&VfsError::InvalidName { name: "../x".into() }),
            ERR_INVALID_NAME
        );
    }
}
