//! Virtual-file job runner.
//!
//! [`run_job`] moves one input buffer through an engine:
//! write `input.<ext>`, execute the job's command, read `output.<ext>`, and
//! delete both files whatever happened. [`JobQueue`] serializes jobs on one
//! handle so their virtual file names never collide.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use toolkit_media_common::{MediaError, VfsError};

use crate::command::{OutputFormat, ProcessingJob};
use crate::loader::EngineHandle;
use crate::store::LogEntry;
use crate::vfs::MemFs;

/// Output of a finished job.
#[derive(Debug, Clone)]
pub struct JobOutput {
    /// Encoded output file.
    pub bytes: Bytes,
    /// Output format.
    pub format: OutputFormat,
    /// Engine log lines emitted during the job.
    pub logs: Vec<LogEntry>,
    /// Engine run time.
    pub duration: Duration,
}

impl JobOutput {
    /// Output file extension.
    pub fn extension(&self) -> &'static str {
        self.format.extension()
    }

    /// Output MIME type.
    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }
}

/// Deletes a job's virtual files when dropped.
struct VfsCleanup<'a> {
    vfs: &'a MemFs,
    names: [&'a str; 2],
}

impl Drop for VfsCleanup<'_> {
    fn drop(&mut self) {
        for name in self.names {
            match self.vfs.delete_file(name) {
                Ok(()) | Err(VfsError::NotFound { .. }) => {}
                Err(e) => warn!(file = name, error = %e, "Virtual file cleanup failed"),
            }
        }
    }
}

/// Run one job against a loaded engine.
///
/// The handle must be ready; this never loads an engine. Both virtual files
/// are deleted before returning, on success and on failure.
///
/// # Errors
///
/// `Terminated` if the handle was terminated, `JobFailed` with the engine's
/// message if the engine rejected the command or produced no output.
#[instrument(skip(handle, input, job), fields(handle = %handle.id(), input = job.input_name(), output = job.output_name(), bytes = input.len()))]
pub async fn run_job(
    handle: &EngineHandle,
    input: Bytes,
    job: &ProcessingJob,
) -> Result<JobOutput, MediaError> {
    if handle.is_terminated() {
        return Err(MediaError::Terminated);
    }

    let engine = handle.engine();
    let vfs = engine.vfs();
    let _cleanup = VfsCleanup {
        vfs,
        names: [job.input_name(), job.output_name()],
    };

    handle.progress().reset();
    vfs.write_file(job.input_name(), input)?;

    let outcome = engine.exec(job.args(), handle.progress()).await?;

    let bytes = vfs.read_file(job.output_name()).map_err(|_| {
        MediaError::job_failed(format!("Engine produced no output file '{}'", job.output_name()))
    })?;

    info!(
        output_bytes = bytes.len(),
        duration_ms = outcome.duration.as_millis(),
        "Job completed"
    );

    Ok(JobOutput {
        bytes,
        format: job.format(),
        logs: outcome.logs,
        duration: outcome.duration,
    })
}

/// FIFO serialization of jobs on one handle.
///
/// Waiters are admitted in arrival order.
#[derive(Debug, Default)]
pub struct JobQueue {
    lock: Mutex<()>,
    pending: AtomicUsize,
}

impl JobQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` once every earlier submission has finished.
    pub async fn run<F, T>(&self, job: F) -> T
    where
        F: Future<Output = T>,
    {
        let _ticket = PendingTicket::new(&self.pending);
        let _slot = self.lock.lock().await;
        debug!(pending = self.pending(), "Job slot acquired");
        job.await
    }

    /// Jobs waiting or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct PendingTicket<'a>(&'a AtomicUsize);

impl<'a> PendingTicket<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
