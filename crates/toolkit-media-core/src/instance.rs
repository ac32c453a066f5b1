//! Engine instance lifecycle.
//!
//! [`InstanceRunner`] links an engine module once at load time and then, for
//! every job:
//!
//! 1. Instantiates the pre-linked module in a fresh store
//! 2. Calls the descriptor's entry point
//! 3. Classifies how the guest finished (exit code, trap, interruption)

use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{InstancePre, Linker, Store, Trap};
use wasmtime_wasi::I32Exit;

use toolkit_media_common::MediaError;

use crate::CompiledModule;
use crate::store::EngineContext;

/// How a guest run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Entry point returned or the guest exited with code 0.
    Success,

    /// The guest exited with a non-zero code.
    Exit {
        /// Exit code passed to `proc_exit`.
        code: i32,
    },

    /// The guest was interrupted by an epoch bump.
    Interrupted,

    /// Execution trapped.
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },
}

impl ExecutionResult {
    /// Returns `true` if execution was successful.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success)
    }

    /// Returns `true` if execution trapped.
    pub fn is_trap(&self) -> bool {
        matches!(self, ExecutionResult::Trap { .. })
    }
}

/// Pre-linked engine module, ready to run jobs.
///
/// # Thread Safety
///
/// `InstanceRunner` is `Send + Sync`; each run uses its own [`Store`].
pub struct InstanceRunner {
    pre: InstancePre<EngineContext>,
    entry_point: String,
}

impl InstanceRunner {
    /// Resolve every import of `module` against `linker`.
    ///
    /// # Errors
    ///
    /// Returns an error if an import is missing or the entry point is not an
    /// exported function.
    pub fn new(
        linker: &Linker<EngineContext>,
        module: &CompiledModule,
        entry_point: &str,
    ) -> Result<Self, MediaError> {
        if !module.exports_function(entry_point) {
            return Err(MediaError::load_failed(format!(
                "Entry point '{entry_point}' not found"
            )));
        }

        let pre = linker
            .instantiate_pre(module.as_module())
            .map_err(|e| MediaError::load_failed(format!("Engine linking failed: {e}")))?;

        Ok(Self {
            pre,
            entry_point: entry_point.to_string(),
        })
    }

    /// Run the entry point once in `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if instantiation fails or the entry point has the
    /// wrong signature. Guest failures are reported in [`ExecutionResult`].
    #[instrument(skip(self, store), fields(entry_point = %self.entry_point, job_id = %store.data().job_id))]
    pub async fn execute(
        &self,
        store: &mut Store<EngineContext>,
    ) -> Result<ExecutionResult, MediaError> {
        let start = Instant::now();

        debug!("Instantiating engine module");

        let instance = self
            .pre
            .instantiate_async(&mut *store)
            .await
            .map_err(|e| classify_instantiation_error(&e))?;

        let func = instance
            .get_typed_func::<(), ()>(&mut *store, &self.entry_point)
            .map_err(|e| MediaError::load_failed(format!("Entry point signature mismatch: {e}")))?;

        let result = func.call_async(&mut *store, ()).await;
        let duration = start.elapsed();

        let outcome = match result {
            Ok(()) => ExecutionResult::Success,
            Err(e) => classify_error(&e),
        };

        match &outcome {
            ExecutionResult::Success => {
                info!(duration_ms = duration.as_millis(), "Engine run completed");
            }
            ExecutionResult::Exit { code } => {
                warn!(duration_ms = duration.as_millis(), code, "Engine exited with failure");
            }
            ExecutionResult::Interrupted => {
                warn!(duration_ms = duration.as_millis(), "Engine run interrupted");
            }
            ExecutionResult::Trap { message, .. } => {
                error!(duration_ms = duration.as_millis(), trap_message = %message, "Engine trapped");
            }
        }

        Ok(outcome)
    }

    /// Name of the exported entry point.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

/// Map a guest error to an execution result.
fn classify_error(error: &wasmtime::Error) -> ExecutionResult {
    if let Some(exit) = error.downcast_ref::<I32Exit>() {
        return if exit.0 == 0 {
            ExecutionResult::Success
        } else {
            ExecutionResult::Exit { code: exit.0 }
        };
    }

    if is_interrupt(error) {
        return ExecutionResult::Interrupted;
    }

    let (message, code) = extract_trap_info(error);
    ExecutionResult::Trap { message, code }
}

fn classify_instantiation_error(error: &wasmtime::Error) -> MediaError {
    if is_interrupt(error) {
        MediaError::Terminated
    } else {
        MediaError::trap(format!("Instantiation failed: {error}"))
    }
}

/// Extract human-readable trap information.
fn extract_trap_info(error: &wasmtime::Error) -> (String, Option<String>) {
    let message = format!("{error:#}");
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));

    (message, code)
}

/// Check if an error is an epoch interruption.
fn is_interrupt(error: &wasmtime::Error) -> bool {
    error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::Interrupt)
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRunner")
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}
