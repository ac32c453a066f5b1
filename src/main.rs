//! toolkit-media CLI entry point.
//!
//! Runs the toolkit HTTP server: tool pages behind the route gate, engine
//! assets and the image job API.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use toolkit_media_common::ConfigFile;
use toolkit_media_server::{MediaServer, ServerConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Toolkit media server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "TOOLKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind, overriding the configuration file.
    #[arg(short, long, env = "BIND_ADDR")]
    bind: Option<SocketAddr>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "pretty", env = "LOG_FORMAT")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,toolkit_media=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting toolkit-media");

    // Load configuration
    let config_file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let mut server_config = ServerConfig::from_file(&config_file.server, &config_file.admin)
        .context("Invalid server configuration")?;
    if let Some(bind) = cli.bind {
        server_config = server_config.with_bind_addr(bind);
    }

    info!(
        bind_addr = %server_config.bind_addr,
        artifact_dir = ?config_file.runtime.loader.artifact_dir,
        artifact_base_url = ?config_file.runtime.loader.artifact_base_url,
        prefer_multi_thread = config_file.runtime.loader.prefer_multi_thread,
        admin = config_file.admin.is_configured(),
        "Configuration loaded"
    );

    // Create and run server
    let server = MediaServer::new(&config_file.runtime, &config_file.ads, server_config)?;

    info!("Server initialized. Available endpoints:");
    info!("  GET  /tools/:slug                    - Tool page");
    info!("  GET  /:locale/tools/:slug            - Localized tool page");
    info!("  POST /api/tools/image-resizer/jobs   - Resize an image");
    info!("  POST /api/capabilities               - Rank backends for a client");
    info!("  GET  /api/engine                     - Engine status");
    info!("  GET  /health                         - Health check");
    info!("  GET  /ready                          - Readiness check");

    server.run().await?;

    Ok(())
}
