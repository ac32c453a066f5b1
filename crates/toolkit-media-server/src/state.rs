//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use toolkit_media_common::{AdsConfig, MediaError, RouteGate, ToolkitConfig};
use toolkit_media_core::{HostProbe, MediaEngineLoader};
use toolkit_media_host::loader_from_config;

use crate::shell::{AdSlots, PushQueueAdClient};
use crate::tools::Tool;

/// Default bound on a single image job.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(25);

/// Builds a fresh, idle loader.
pub type LoaderFactory = Arc<dyn Fn() -> Result<MediaEngineLoader, MediaError> + Send + Sync>;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    /// Route gate (also applied by the middleware).
    gate: Arc<RouteGate>,

    /// Current engine loader. Replaced by the admin reset.
    loader: Arc<RwLock<Arc<MediaEngineLoader>>>,

    /// Creates replacement loaders.
    factory: LoaderFactory,

    /// Ad slot renderer.
    ads: AdSlots,

    /// Bound on a single job. Expiry resets the loader.
    job_timeout: Duration,
}

impl AppState {
    /// Create new application state.
    ///
    /// The engine runs on behalf of the image resizer page, so the host is
    /// treated as cross-origin isolated exactly when the gate isolates that
    /// page.
    ///
    /// # Errors
    ///
    /// Returns an error if the route gate table or artifact source is invalid.
    pub fn new(config: &ToolkitConfig, ads: &AdsConfig) -> Result<Self, MediaError> {
        let gate = Arc::new(RouteGate::from_config(&config.isolation)?);
        let isolated = gate.is_isolated_path(&Tool::ImageResizer.path());

        let config = config.clone();
        let factory: LoaderFactory = Arc::new(move || {
            loader_from_config(&config, Arc::new(HostProbe::detect(isolated)))
        });

        let ads = AdSlots::new(
            Arc::clone(&gate),
            Arc::new(PushQueueAdClient::from_config(ads)),
            ads.enabled,
        );
        Self::with_factory(gate, factory, ads)
    }

    /// Create state around a custom loader factory.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory fails.
    pub fn with_factory(gate: Arc<RouteGate>, factory: LoaderFactory, ads: AdSlots) -> Result<Self, MediaError> {
        let loader = Arc::new(factory()?);

        Ok(Self {
            gate,
            loader: Arc::new(RwLock::new(loader)),
            factory,
            ads,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        })
    }

    /// Set the job timeout.
    #[must_use]
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Get the job timeout.
    pub fn job_timeout(&self) -> Duration {
        self.job_timeout
    }

    /// Get the route gate.
    pub fn gate(&self) -> &Arc<RouteGate> {
        &self.gate
    }

    /// Get the current loader.
    pub fn loader(&self) -> Arc<MediaEngineLoader> {
        Arc::clone(&self.loader.read())
    }

    /// Get the ad slot renderer.
    pub fn ads(&self) -> &AdSlots {
        &self.ads
    }

    /// Replace the loader with a fresh one and terminate the old one.
    ///
    /// In-flight jobs on the old handle fail with `Terminated`. The new
    /// loader starts idle and loads on the next job.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory fails; the old loader stays in place.
    pub fn reset_loader(&self) -> Result<Arc<MediaEngineLoader>, MediaError> {
        let fresh = Arc::new((self.factory)()?);
        let old = std::mem::replace(&mut *self.loader.write(), Arc::clone(&fresh));
        old.terminate();

        info!(previous_state = %old.state().as_str(), "Engine loader reset");
        Ok(fresh)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("rules", &self.gate.rules().len())
            .field("loader_state", &self.loader().state())
            .field("job_timeout", &self.job_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use toolkit_media_core::LoadState;

    use super::*;

    #[test]
    fn test_app_state_creation() {
        let state = AppState::new(&ToolkitConfig::default(), &AdsConfig::default()).unwrap();
        assert_eq!(state.loader().state(), LoadState::Idle);
        assert!(state.gate().is_isolated_path("/tools/image-resizer"));
        assert_eq!(state.job_timeout(), DEFAULT_JOB_TIMEOUT);

        let state = state.with_job_timeout(Duration::from_millis(250));
        assert_eq!(state.job_timeout(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_reset_replaces_loader() {
        let state = AppState::new(&ToolkitConfig::default(), &AdsConfig::default()).unwrap();

        let first = state.loader();
        assert!(first.load().await);
        assert_eq!(first.state(), LoadState::Ready);

        let fresh = state.reset_loader().unwrap();
        assert!(matches!(first.state(), LoadState::Error(_)));
        assert_eq!(fresh.state(), LoadState::Idle);
        assert!(Arc::ptr_eq(&fresh, &state.loader()));
    }

    #[test]
    fn test_invalid_gate_pattern() {
        let mut config = ToolkitConfig::default();
        config.isolation.isolated_paths.push("tools/no-leading-slash".into());

        let err = AppState::new(&config, &AdsConfig::default()).unwrap_err();
        assert!(matches!(err, MediaError::InvalidConfig { .. }));
    }
}
