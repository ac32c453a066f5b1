//! Error types for toolkit-media.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`MediaError`]: Top-level errors for loading engines and running jobs
//! - [`HostFunctionError`]: Errors raised while servicing guest host calls
//! - [`VfsError`]: Virtual filesystem errors
//! - [`ConfigError`]: Invalid route gate or loader configuration

use std::io;

use thiserror::Error;

/// Top-level media engine errors.
///
/// The variants follow the failure taxonomy of the engine lifecycle:
/// unsupported environments and load failures are terminal for a handle,
/// job failures leave the handle usable for the next job.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The runtime environment cannot host any engine build.
    #[error("Unsupported environment: {reason}")]
    Unsupported {
        /// Why the environment was rejected.
        reason: String,
    },

    /// Fetching or instantiating the engine failed.
    #[error("Engine load failed: {reason}")]
    LoadFailed {
        /// Description of the load failure.
        reason: String,
    },

    /// An engine artifact could not be fetched.
    #[error("Artifact fetch failed: {url} (status: {status})")]
    ArtifactFetch {
        /// The artifact location.
        url: String,
        /// The HTTP status code (0 if the request never completed).
        status: u16,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The engine rejected a job (malformed input, unsupported parameters).
    #[error("Job failed: {message}")]
    JobFailed {
        /// Engine-provided message.
        message: String,
    },

    /// The engine handle was terminated.
    #[error("Engine terminated")]
    Terminated,

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// A host function returned an error.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),

    /// Virtual filesystem operation failed.
    #[error("Virtual filesystem error: {0}")]
    Vfs(#[from] VfsError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors from host function implementations.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// The guest passed a pointer/length pair outside its linear memory.
    #[error("Memory access out of bounds: {ptr}+{len}")]
    OutOfBounds {
        /// Guest pointer.
        ptr: i64,
        /// Requested length.
        len: i64,
    },

    /// The guest module does not export a linear memory.
    #[error("Guest memory export not found")]
    MissingMemory,

    /// Invalid argument was passed to a host function.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },
}

/// Virtual filesystem errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VfsError {
    /// The named file does not exist.
    #[error("No such file: {name}")]
    NotFound {
        /// File name.
        name: String,
    },

    /// The file name is empty or contains a path separator.
    #[error("Invalid file name: {name:?}")]
    InvalidName {
        /// Offending name.
        name: String,
    },
}

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A route pattern is empty or not absolute.
    #[error("Invalid route pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl MediaError {
    /// Create a new `Unsupported` error.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Create a new `LoadFailed` error.
    pub fn load_failed(reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `JobFailed` error.
    pub fn job_failed(message: impl Into<String>) -> Self {
        Self::JobFailed {
            message: message.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the environment cannot run the engine at all.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Returns `true` if this error happened while running a job.
    pub fn is_job_failure(&self) -> bool {
        matches!(
            self,
            Self::JobFailed { .. } | Self::Trap { .. } | Self::Vfs(_) | Self::HostFunction(_)
        )
    }

    /// Returns `true` if the same handle can accept another job after this error.
    pub fn is_retryable_job(&self) -> bool {
        self.is_job_failure()
    }
}

impl From<ConfigError> for MediaError {
    fn from(err: ConfigError) -> Self {
        Self::invalid_config(err.to_string())
    }
}
