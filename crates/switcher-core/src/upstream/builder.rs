//! Builder pattern for constructing `InstanceTracker` with flexible configuration.

use super::{
    health::HealthChecker,
    http_client::{HttpClient, HttpClientConfig},
    load_balancer::LoadBalancer,
    manager::InstanceTracker,
};
use crate::config::{ConfigError, SwitcherConfig};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors that can occur during tracker construction.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// The configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// HTTP client initialization failed
    #[error("Failed to initialize HTTP client: {0}")]
    HttpClientInit(String),
}

/// Builder for constructing an `InstanceTracker`.
///
/// The configuration is validated on [`InstanceTrackerBuilder::build`], so an invalid tracking
/// interval or malformed instance URL is reported before anything starts.
///
/// # Examples
///
/// ```no_run
/// # use switcher_core::{config::SwitcherConfig, upstream::InstanceTrackerBuilder};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let tracker = InstanceTrackerBuilder::new()
///     .config(SwitcherConfig::load()?)
///     .concurrency_limit(64)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct InstanceTrackerBuilder {
    config: SwitcherConfig,
    http_client_config: HttpClientConfig,
    http_client: Option<Arc<HttpClient>>,
    record_capacity: usize,
}

impl InstanceTrackerBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SwitcherConfig::default(),
            http_client_config: HttpClientConfig::default(),
            http_client: None,
            record_capacity: 256,
        }
    }

    #[must_use]
    pub fn config(mut self, config: SwitcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets HTTP client concurrency limit (default: 256).
    #[must_use]
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.http_client_config.concurrent_limit = limit;
        self
    }

    /// Shares an existing HTTP client instead of building one.
    #[must_use]
    pub fn http_client(mut self, http_client: Arc<HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Sets how many record events a slow subscriber may lag behind (default: 256).
    #[must_use]
    pub fn record_capacity(mut self, capacity: usize) -> Self {
        self.record_capacity = capacity.max(1);
        self
    }

    /// Builds the `InstanceTracker`.
    ///
    /// # Errors
    ///
    /// Returns `BuilderError::Config` if the configuration is invalid.
    /// Returns `BuilderError::HttpClientInit` if HTTP client initialization fails.
    pub fn build(self) -> Result<InstanceTracker, BuilderError> {
        self.config.validate()?;

        let http_client = match self.http_client {
            Some(http_client) => http_client,
            None => Arc::new(
                HttpClient::with_config(self.http_client_config)
                    .map_err(|e| BuilderError::HttpClientInit(e.to_string()))?,
            ),
        };

        let config = Arc::new(self.config);
        let load_balancer = Arc::new(LoadBalancer::new(config.switching.clone()));
        let health_checker =
            Arc::new(HealthChecker::new(Arc::clone(&load_balancer), config.tracking.clone()));
        let (record_tx, _) = broadcast::channel(self.record_capacity);

        Ok(InstanceTracker::new(config, http_client, load_balancer, health_checker, record_tx))
    }
}

impl Default for InstanceTrackerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
