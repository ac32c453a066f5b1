//! HTTP server for toolkit-media.
//!
//! This crate serves the toolkit over HTTP. It handles:
//!
//! - The route gate: cross-origin isolation headers per path
//! - Tool pages with ad slots, suppressed on isolated pages
//! - The image job API backed by the media engine loader
//! - Engine asset serving, health checks and the Admin API
//!
//! # Quick Start
//!
//! ```ignore
//! use toolkit_media_server::{MediaServer, ServerConfig};
//! use toolkit_media_common::{AdsConfig, ToolkitConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = MediaServer::new(
//!         &ToolkitConfig::default(),
//!         &AdsConfig::default(),
//!         ServerConfig::default(),
//!     )?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod gate;
pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod shell;
pub mod state;
pub mod tools;

pub use server::{MediaServer, ServerConfig, TestHandle};
pub use state::AppState;
pub use tools::Tool;
