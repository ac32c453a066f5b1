//! Configuration file structures for toolkit-media.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP server settings
//! - [`AdminConfig`]: Admin API settings
//! - [`AdsConfig`]: Ad network settings consumed by the UI shell

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ToolkitConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.loader]
/// prefer_multi_thread = true
/// artifact_dir = "./engine"
///
/// [runtime.isolation]
/// isolated_paths = ["/tools/image-resizer", "/*/tools/image-resizer"]
///
/// [server]
/// bind_addr = "0.0.0.0:8080"
/// engine_asset_dir = "./public/ffmpeg"
///
/// [admin]
/// enabled = true
/// token = "your-secret-token"
///
/// [ads]
/// enabled = true
/// client_id = "ca-pub-0000000000000000"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, loader, isolation).
    #[serde(default)]
    pub runtime: ToolkitConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Admin API configuration.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Ad network configuration.
    #[serde(default)]
    pub ads: AdsConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// HTTP server configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    ///
    /// Image jobs run inside the request, so this bounds job duration too.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Image job timeout in seconds.
    ///
    /// An expired job resets the engine. Keep below the request timeout.
    #[serde(default = "defaults::job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,

    /// Directory served under the engine asset prefix.
    #[serde(default)]
    pub engine_asset_dir: Option<String>,

    /// Maximum accepted upload size in megabytes.
    #[serde(default = "defaults::max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            job_timeout_secs: defaults::job_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
            engine_asset_dir: None,
            max_upload_mb: defaults::max_upload_mb(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Enable Admin API.
    #[serde(default)]
    pub enabled: bool,

    /// Authentication token (required when enabled).
    ///
    /// Clients must include this token in the `X-Admin-Token` header.
    pub token: Option<String>,

    /// URL prefix for Admin API endpoints.
    #[serde(default = "defaults::admin_prefix")]
    pub prefix: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            prefix: defaults::admin_prefix(),
        }
    }
}

impl AdminConfig {
    /// Check if Admin API is properly configured.
    ///
    /// Returns `true` if enabled and token is set.
    pub fn is_configured(&self) -> bool {
        self.enabled && self.token.is_some()
    }
}

/// Ad network configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdsConfig {
    /// Render ad containers at all.
    #[serde(default = "defaults::ads_enabled")]
    pub enabled: bool,

    /// Publisher client id passed to the ad network tag.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Ad network loader script.
    #[serde(default = "defaults::ads_script_url")]
    pub script_url: String,
}

impl Default for AdsConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::ads_enabled(),
            client_id: None,
            script_url: defaults::ads_script_url(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        120
    }

    pub const fn job_timeout_secs() -> u64 {
        110
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub const fn max_upload_mb() -> usize {
        50
    }

    pub fn admin_prefix() -> String {
        "/admin".to_string()
    }

    pub const fn ads_enabled() -> bool {
        true
    }

    pub fn ads_script_url() -> String {
        "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.server.request_timeout_secs, 120);
        assert_eq!(config.server.job_timeout_secs, 110);
        assert!(config.server.graceful_shutdown);
        assert!(config.server.engine_asset_dir.is_none());
        assert_eq!(config.server.max_upload_mb, 50);
        assert!(!config.admin.enabled);
        assert!(config.admin.token.is_none());
        assert_eq!(config.admin.prefix, "/admin");
        assert!(config.ads.enabled);
        assert!(config.ads.client_id.is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:3000"
        "#;

        let config = tokio_test::assert_ok!(ConfigFile::from_toml(toml));

        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        // Defaults applied
        assert_eq!(config.server.request_timeout_secs, 120);
        assert!(config.runtime.loader.prefer_multi_thread);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            pooling_allocator = false
            instance_memory_mb = 256

            [runtime.loader]
            prefer_multi_thread = false
            verbose = true
            artifact_base_url = "https://cdn.example.com/ffmpeg/0.12.6"

            [runtime.isolation]
            isolated_paths = ["/tools/image-resizer"]
            engine_asset_paths = ["/engine/**"]

            [server]
            bind_addr = "0.0.0.0:9000"
            request_timeout_secs = 60
            job_timeout_secs = 45
            graceful_shutdown = false
            engine_asset_dir = "./public/ffmpeg"

            [admin]
            enabled = true
            token = "secret-token"
            prefix = "/api/admin"

            [ads]
            enabled = true
            client_id = "ca-pub-123"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert!(!config.runtime.engine.pooling_allocator);
        assert_eq!(config.runtime.engine.instance_memory_mb, 256);
        assert!(!config.runtime.loader.prefer_multi_thread);
        assert!(config.runtime.loader.verbose);
        assert_eq!(
            config.runtime.loader.artifact_base_url.as_deref(),
            Some("https://cdn.example.com/ffmpeg/0.12.6")
        );
        assert_eq!(
            config.runtime.isolation.isolated_paths,
            vec!["/tools/image-resizer"]
        );
        assert_eq!(config.runtime.isolation.engine_asset_paths, vec!["/engine/**"]);
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.server.request_timeout_secs, 60);
        assert_eq!(config.server.job_timeout_secs, 45);
        assert!(!config.server.graceful_shutdown);
        assert_eq!(
            config.server.engine_asset_dir.as_deref(),
            Some("./public/ffmpeg")
        );
        assert!(config.admin.enabled);
        assert_eq!(config.admin.token, Some("secret-token".to_string()));
        assert_eq!(config.admin.prefix, "/api/admin");
        assert_eq!(config.ads.client_id.as_deref(), Some("ca-pub-123"));
    }

    #[test]
    fn test_admin_config_is_configured() {
        let mut admin = AdminConfig::default();
        assert!(!admin.is_configured());

        admin.enabled = true;
        assert!(!admin.is_configured());

        admin.token = Some("token".to_string());
        assert!(admin.is_configured());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        tokio_test::assert_err!(result);
    }
}
