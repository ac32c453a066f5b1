//! Common types, errors, and utilities for toolkit-media.
//!
//! This crate provides shared functionality used across the toolkit-media workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine, loader, and server
//! - The isolation-aware route gate, shared by the header middleware and
//!   the UI shell so both read one table

pub mod config;
pub mod config_file;
pub mod error;
pub mod gate;

pub use config::{EngineConfig, IsolationConfig, LoaderConfig, ToolkitConfig};
pub use config_file::{AdminConfig, AdsConfig, ConfigFile, ConfigFileError, ServerConfigFile};
pub use error::{ConfigError, HostFunctionError, MediaError, VfsError};
pub use gate::{HeaderPolicy, IsolationRule, RouteGate};
