//! HTTP server implementation.
//!
//! This module provides the main [`MediaServer`] struct for running
//! the toolkit HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use toolkit_media_common::{AdminConfig, AdsConfig, MediaError, ServerConfigFile, ToolkitConfig};

use crate::router::{
    AdminRouterConfig, DEFAULT_MAX_UPLOAD_BYTES, RouterOptions, build_router_with_options,
};
use crate::state::AppState;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Image job timeout in seconds. Keep below the request timeout.
    pub job_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
    /// Directory served under `/ffmpeg`.
    pub engine_asset_dir: Option<PathBuf>,
    /// Largest accepted job input.
    pub max_upload_bytes: usize,
    /// Admin API settings.
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout_secs: 30,
            job_timeout_secs: 25,
            graceful_shutdown: true,
            engine_asset_dir: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            admin: AdminConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from the config file sections.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address does not parse.
    pub fn from_file(server: &ServerConfigFile, admin: &AdminConfig) -> Result<Self, MediaError> {
        let bind_addr = server.bind_addr.parse().map_err(|e| {
            MediaError::invalid_config(format!("Invalid bind address '{}': {e}", server.bind_addr))
        })?;

        Ok(Self {
            bind_addr,
            request_timeout_secs: server.request_timeout_secs,
            job_timeout_secs: server.job_timeout_secs,
            graceful_shutdown: server.graceful_shutdown,
            engine_asset_dir: server.engine_asset_dir.as_ref().map(PathBuf::from),
            max_upload_bytes: server.max_upload_mb.saturating_mul(1024 * 1024),
            admin: admin.clone(),
        })
    }

    /// Create a new server config with custom bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Create a new server config with custom timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the job timeout as Duration.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    fn router_options(&self) -> RouterOptions {
        let admin = match (&self.admin.token, self.admin.is_configured()) {
            (Some(token), true) => Some(AdminRouterConfig {
                prefix: self.admin.prefix.clone(),
                token: token.clone(),
            }),
            _ => {
                if self.admin.enabled {
                    warn!("Admin API enabled without a token; not mounting it");
                }
                None
            }
        };

        RouterOptions {
            request_timeout: self.request_timeout(),
            max_upload_bytes: self.max_upload_bytes,
            engine_asset_dir: self.engine_asset_dir.clone(),
            admin,
        }
    }
}

/// Toolkit HTTP server.
///
/// This is the main entry point for running the HTTP server.
///
/// # Example
///
/// ```ignore
/// use toolkit_media_server::{MediaServer, ServerConfig};
/// use toolkit_media_common::{AdsConfig, ToolkitConfig};
///
/// let server = MediaServer::new(&ToolkitConfig::default(), &AdsConfig::default(), ServerConfig::default())?;
/// server.run().await?;
/// ```
pub struct MediaServer {
    /// Application state.
    state: AppState,
    /// Server configuration.
    config: ServerConfig,
}

impl MediaServer {
    /// Create a new server instance.
    ///
    /// The engine is not loaded here; the first job loads it.
    ///
    /// # Errors
    ///
    /// Returns an error if the route gate or artifact source is invalid.
    pub fn new(
        toolkit_config: &ToolkitConfig,
        ads_config: &AdsConfig,
        server_config: ServerConfig,
    ) -> Result<Self, MediaError> {
        if server_config.job_timeout_secs >= server_config.request_timeout_secs {
            warn!(
                job_timeout_secs = server_config.job_timeout_secs,
                request_timeout_secs = server_config.request_timeout_secs,
                "Job timeout does not fit inside the request timeout"
            );
        }
        let state = AppState::new(toolkit_config, ads_config)?
            .with_job_timeout(server_config.job_timeout());

        Ok(Self {
            state,
            config: server_config,
        })
    }

    /// Get a reference to the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled. The engine is
    /// terminated on the way out.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), MediaError> {
        let app = build_router_with_options(self.state.clone(), self.config.router_options());

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| MediaError::invalid_config(format!("Failed to bind: {e}")))?;

        info!(addr = %self.config.bind_addr, "Starting HTTP server");

        let result = if self.config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        } else {
            axum::serve(listener, app).await
        };

        self.state.loader().terminate();
        result.map_err(|e| MediaError::invalid_config(format!("Server error: {e}")))?;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server and return a handle for testing.
    ///
    /// The server binds to an ephemeral port (127.0.0.1:0) and
    /// returns a handle that can be used to get the actual address
    /// and shut down the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be built or the port bound.
    pub async fn start_test(
        toolkit_config: &ToolkitConfig,
        ads_config: &AdsConfig,
    ) -> Result<TestHandle, MediaError> {
        let state = AppState::new(toolkit_config, ads_config)?;
        Self::start_test_with(state, RouterOptions::new(Duration::from_secs(30))).await
    }

    /// Start a test server around prepared state and router options.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn start_test_with(
        state: AppState,
        options: RouterOptions,
    ) -> Result<TestHandle, MediaError> {
        let app = build_router_with_options(state.clone(), options);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| MediaError::invalid_config(format!("Failed to bind: {e}")))?;

        let addr = listener
            .local_addr()
            .map_err(|e| MediaError::invalid_config(format!("Failed to get addr: {e}")))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
///
/// Use this to interact with and shut down a test server.
pub struct TestHandle {
    /// The address the server is bound to.
    addr: SocketAddr,
    /// Application state.
    state: AppState,
    /// Shutdown signal sender.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Server task handle.
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
        self.state.loader().terminate();
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
