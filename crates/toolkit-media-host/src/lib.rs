//! Host side of the media engine ABI.
//!
//! Engine binaries are plain WebAssembly modules. This crate provides the
//! imports they link against and the places their artifacts are fetched from.
//!
//! # Interfaces
//!
//! - [`linker`]: `env::log`, the `media::*` virtual file and progress calls,
//!   and WASI preview1 for argv and stdio
//! - [`logging`]: Guest log capture and re-emission
//! - [`memory`]: Bounds-checked access to plain or shared guest memory
//! - [`artifacts`]: HTTP and directory artifact sources
//!
//! # Guest ABI
//!
//! ```text
//! env::log(level: i32, ptr: i32, len: i32)
//! media::fs_size(name_ptr: i32, name_len: i32) -> i64
//! media::fs_read(name_ptr: i32, name_len: i32, dst_ptr: i32, dst_len: i32) -> i64
//! media::fs_write(name_ptr: i32, name_len: i32, src_ptr: i32, src_len: i32) -> i32
//! media::fs_delete(name_ptr: i32, name_len: i32) -> i32
//! media::progress(percent: i32)
//! ```
//!
//! Negative return values are [`linker::ERR_NOT_FOUND`] and
//! [`linker::ERR_INVALID_NAME`]. Out-of-bounds pointers trap.

pub mod artifacts;
pub mod linker;
pub mod logging;
pub mod memory;

pub use artifacts::{DirArtifactSource, HttpArtifactSource, artifact_source_from_config, loader_from_config};
pub use linker::register_all;
pub use logging::LoggingHost;
