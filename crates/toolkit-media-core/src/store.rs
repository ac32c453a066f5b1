//! Per-job execution context and store management.
//!
//! This module provides:
//! - [`EngineContext`]: Per-job state accessible from host functions
//! - [`LogEntry`] and [`LogLevel`]: Structured logging from guest code
//! - [`ProgressSink`]: The 0-100 progress value shared by a handle and its jobs

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use wasmtime::{Store, StoreLimits, StoreLimitsBuilder, Trap, UpdateDeadline};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::vfs::MemFs;

/// Log entries kept per job; older entries are discarded first.
pub const MAX_LOG_ENTRIES: usize = 512;

/// Longest guest log message kept, in bytes.
pub const MAX_LOG_MESSAGE_BYTES: usize = 4096;

/// Per-job execution context.
///
/// Created for each job, dropped when the job's guest call returns. Host
/// functions reach it through the [`wasmtime::Caller`] API.
///
/// # Contents
///
/// - `wasi`: WASI preview1 context carrying the job's argument list
/// - `job_id`: Identifier for tracing
/// - `vfs`: The handle's virtual filesystem
/// - `progress`: The handle's progress value
/// - `logs`: The last [`MAX_LOG_ENTRIES`] log entries emitted by the guest
pub struct EngineContext {
    wasi: WasiP1Ctx,

    /// Job identifier for tracing.
    pub job_id: String,

    vfs: Arc<MemFs>,

    progress: ProgressSink,

    /// Logs collected from guest code.
    pub logs: VecDeque<LogEntry>,

    /// Entries discarded once `logs` was full.
    pub dropped_logs: usize,

    /// Re-emit guest logs at their own level.
    pub verbose: bool,

    limits: StoreLimits,

    start_time: Instant,
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Writable side of a handle's progress value.
///
/// Cloned into every job context; all clones publish to the same channel.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: Arc<watch::Sender<u8>>,
}

impl ProgressSink {
    /// Create a sink starting at zero.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a percentage, clamped to 0-100.
    pub fn report(&self, percent: i64) {
        let value = percent.clamp(0, 100) as u8;
        self.tx.send_replace(value);
    }

    /// Publish a completion ratio in `0.0..=1.0`.
    pub fn report_ratio(&self, ratio: f64) {
        if ratio.is_finite() {
            self.report((ratio * 100.0).round() as i64);
        }
    }

    /// Reset to zero at the start of a job.
    pub fn reset(&self) {
        self.tx.send_replace(0);
    }

    /// Current value.
    pub fn current(&self) -> u8 {
        *self.tx.borrow()
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.tx.subscribe()
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineContext {
    /// Create a context for one job.
    ///
    /// `args` is the full argument vector seen by the guest, program name
    /// first. Guest stdio is inherited only when `verbose` is set.
    pub fn new(
        job_id: String,
        args: &[String],
        vfs: Arc<MemFs>,
        progress: ProgressSink,
        verbose: bool,
        memory_limit: usize,
    ) -> Self {
        let mut builder = WasiCtxBuilder::new();
        builder.args(args);
        if verbose {
            builder.inherit_stdout().inherit_stderr();
        }

        Self {
            wasi: builder.build_p1(),
            job_id,
            vfs,
            progress,
            logs: VecDeque::new(),
            dropped_logs: 0,
            verbose,
            limits: StoreLimitsBuilder::new().memory_size(memory_limit).build(),
            start_time: Instant::now(),
        }
    }

    /// WASI preview1 context.
    pub fn wasi(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// The handle's virtual filesystem.
    pub fn vfs(&self) -> &MemFs {
        &self.vfs
    }

    /// The handle's progress sink.
    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    /// Add a log entry.
    ///
    /// Messages are truncated to [`MAX_LOG_MESSAGE_BYTES`] and only the most
    /// recent [`MAX_LOG_ENTRIES`] are kept.
    pub fn log(&mut self, level: LogLevel, mut message: String) {
        if message.len() > MAX_LOG_MESSAGE_BYTES {
            let mut end = MAX_LOG_MESSAGE_BYTES;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }

        if self.logs.len() == MAX_LOG_ENTRIES {
            self.logs.pop_front();
            self.dropped_logs += 1;
        }
        self.logs.push_back(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    /// The most recent error-level guest message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.logs
            .iter()
            .rev()
            .find(|entry| entry.level == LogLevel::Error)
            .map(|entry| entry.message.as_str())
    }

    /// Get elapsed time since the job started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Create a new Wasmtime store for one job.
///
/// Every epoch tick makes the guest yield back to the executor, so a running
/// job never holds a runtime thread for longer than one tick. Once `cancel`
/// is set, the next tick traps with [`Trap::Interrupt`] instead. Linear
/// memory growth is capped at the engine's configured per-instance size.
pub fn create_store(
    engine: &WasmEngine,
    context: EngineContext,
    cancel: Arc<AtomicBool>,
) -> Store<EngineContext> {
    let mut store = Store::new(engine.inner(), context);

    store.limiter(|ctx| &mut ctx.limits);
    store.epoch_deadline_callback(move |_| {
        if cancel.load(Ordering::SeqCst) {
            Err(Trap::Interrupt.into())
        } else {
            Ok(UpdateDeadline::Yield(1))
        }
    });
    store.set_epoch_deadline(1);

    store
}

/// Per-instance memory cap in bytes for an engine.
pub fn memory_limit(engine: &WasmEngine) -> usize {
    (engine.config().instance_memory_mb as usize) * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineBuild;
    use toolkit_media_common::EngineConfig;

    fn context() -> EngineContext {
        EngineContext::new(
            "job-123".into(),
            &["ffmpeg".to_string(), "-version".to_string()],
            Arc::new(MemFs::new()),
            ProgressSink::new(),
            false,
            64 * 1024 * 1024,
        )
    }

    #[test]
    fn test_engine_context_creation() {
        let ctx = context();

        assert_eq!(ctx.job_id, "job-123");
        assert!(ctx.logs.is_empty());
        assert!(ctx.vfs().is_empty());
        assert_eq!(ctx.progress().current(), 0);
    }

    #[test]
    fn test_engine_context_logging() {
        let mut ctx = context();

        ctx.log(LogLevel::Info, "decoding".into());
        ctx.log(LogLevel::Error, "Invalid data found".into());
        ctx.log(LogLevel::Warn, "trailing bytes".into());

        assert_eq!(ctx.logs.len(), 3);
        assert_eq!(ctx.logs[0].level, LogLevel::Info);
        assert_eq!(ctx.last_error(), Some("Invalid data found"));
    }

    #[test]
    fn test_engine_context_log_cap() {
        let mut ctx = context();

        for i in 0..MAX_LOG_ENTRIES + 10 {
            ctx.log(LogLevel::Info, format!("frame {i}"));
        }
        ctx.log(LogLevel::Error, "é".repeat(MAX_LOG_MESSAGE_BYTES));

        assert_eq!(ctx.logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(ctx.dropped_logs, 11);
        assert_eq!(ctx.logs[0].message, "frame 11");
        assert!(ctx.last_error().unwrap().len() <= MAX_LOG_MESSAGE_BYTES);
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
    }

    #[test]
    fn test_progress_clamps_and_resets() {
        let sink = ProgressSink::new();
        let rx = sink.subscribe();

        sink.report(150);
        assert_eq!(*rx.borrow(), 100);

        sink.report(-3);
        assert_eq!(sink.current(), 0);

        sink.report_ratio(0.424);
        assert_eq!(sink.current(), 42);

        sink.report_ratio(f64::NAN);
        assert_eq!(sink.current(), 42);

        sink.reset();
        assert_eq!(sink.current(), 0);
    }

    #[test]
    fn test_progress_clones_share_channel() {
        let sink = ProgressSink::new();
        let clone = sink.clone();

        clone.report(60);
        assert_eq!(sink.current(), 60);
    }

    #[test]
    fn test_store_creation() {
        let config = EngineConfig {
            pooling_allocator: false,
            cache_compiled_modules: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config, EngineBuild::SingleThreaded).unwrap();

        let store = create_store(&engine, context(), Arc::new(AtomicBool::new(false)));
        assert_eq!(store.data().job_id, "job-123");
        assert_eq!(memory_limit(&engine), 512 * 1024 * 1024);
    }
}
