//! Switcher configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: Hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML or JSON file specified by the `SWITCHER_CONFIG` env var
//! 3. **Environment variables**: `SWITCHER__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`InstanceEntry`]: Statically configured mirrors, optionally with per-instance options
//! - [`DetectionConfig`]: How the rolling window is turned into "working" and latency estimates
//! - [`TrackingConfig`]: Periodic health probing
//! - [`SwitchingConfig`]: Instance selection policy
//! - [`FetchConfig`]: Remote instance directory ingestion
//! - [`HttpConfig`]: Default headers and request timeout
//! - [`LoggingConfig`]: Log level and format
//!
//! # Validation
//!
//! [`SwitcherConfig::validate`] is called before anything is started. Invalid values (a
//! tracking interval below [`MIN_TRACK_INTERVAL_MS`], malformed URLs, an unparsable minimum
//! version) return a [`ConfigError`] instead of surfacing later as a runtime failure.
//!
//! # Example
//!
//! ```toml
//! instances = [
//!     "https://invidious.example.org/",
//!     { site = "https://yt.example.net", options = { use_cookies = true } },
//! ]
//!
//! [tracking]
//! method = "stats"
//! interval_ms = 300000
//!
//! [switching]
//! method = "roundrobin"
//! ```

use crate::upstream::instance::normalise_url;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, path::Path, time::Duration};
use thiserror::Error;
use url::Url;

/// Lowest accepted tracking interval. Prevents hammering mirrors with probes.
pub const MIN_TRACK_INTERVAL_MS: u64 = 20_000;

/// Placeholder in header values that is replaced with the crate version at load time.
const VERSION_PLACEHOLDER: &str = "$version";

/// Errors produced while loading or validating configuration.
///
/// These are fatal at startup and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Tracking interval must be at least {min_ms}ms, got {interval_ms}ms")]
    TrackingIntervalTooLow { interval_ms: u64, min_ms: u64 },

    #[error("Acceptable working rate must be between 0 and 1, got {0}")]
    InvalidWorkingRate(f64),

    #[error("Invalid instance URL: {0}")]
    InvalidInstanceUrl(String),

    #[error("Invalid remote feed URL: {0}")]
    InvalidFeedUrl(String),

    #[error("Invalid minimum version '{version}': {reason}")]
    InvalidRequiredVersion { version: String, reason: String },

    #[error("Logging format must be 'json' or 'pretty', got '{0}'")]
    InvalidLogFormat(String),
}

/// Probe strategy used to assess instance health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMethod {
    /// `HEAD` request to the trending feed page.
    Home,
    /// `HEAD` request to the stats API.
    Stats,
    /// Fetch a well-known video through the tagged request path.
    Video,
    /// Fetch a well-known channel through the tagged request path.
    Channel,
}

impl TrackingMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Stats => "stats",
            Self::Video => "video",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for TrackingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithm used to choose the next instance once prefer-same does not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchingMethod {
    /// Lowest average latency wins.
    #[serde(rename = "fastest")]
    Fastest,
    /// Uniform pick among candidates.
    #[serde(rename = "random")]
    Random,
    /// Next candidate after the last selected one, wrapping around.
    #[serde(rename = "roundrobin")]
    RoundRobin,
}

/// Per-instance options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOptions {
    /// Keep a cookie jar for this instance and follow bot-protection redirects.
    pub use_cookies: bool,

    /// Overrides [`TrackingConfig::method`] for this instance.
    pub tracking_method: Option<TrackingMethod>,

    /// Extra headers sent with every request to this instance. Override [`HttpConfig::headers`].
    pub headers: HashMap<String, String>,

    /// Administrative switch. A disabled instance is never considered working.
    pub available: bool,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self { use_cookies: false, tracking_method: None, headers: HashMap::new(), available: true }
    }
}

/// A statically configured instance: either a bare URL or a URL with options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstanceEntry {
    Url(String),
    Detailed {
        site: String,
        #[serde(default)]
        options: InstanceOptions,
    },
}

impl InstanceEntry {
    /// Returns the configured URL as written.
    #[must_use]
    pub fn site(&self) -> &str {
        match self {
            Self::Url(site) | Self::Detailed { site, .. } => site,
        }
    }

    /// Returns the normalised site URL together with its options.
    #[must_use]
    pub fn normalise(&self) -> (String, InstanceOptions) {
        match self {
            Self::Url(site) => (normalise_url(site), InstanceOptions::default()),
            Self::Detailed { site, options } => (normalise_url(site), options.clone()),
        }
    }
}

/// Settings that turn the rolling window into estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Use the median instead of the mean for the working ratio. Defaults to `false`.
    pub use_median_working: bool,

    /// Use the median instead of the mean for the average latency. Defaults to `false`.
    pub use_median_time: bool,

    /// Minimum success ratio (inclusive) for an instance to count as working. Defaults to `0.5`.
    pub acceptable_working_rate: f64,

    /// Count a per-resource HTTP 500 (e.g. video unavailable) against the instance.
    /// Defaults to `false`.
    pub consider_unavailable_as_blocked: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            use_median_working: false,
            use_median_time: false,
            acceptable_working_rate: 0.5,
            consider_unavailable_as_blocked: false,
        }
    }
}

/// Periodic health probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Whether to run an initial check pass and periodic rechecks. Defaults to `true`.
    pub enabled: bool,

    /// Probe strategy. Defaults to `stats`.
    pub method: TrackingMethod,

    /// Milliseconds between check passes. Must be at least [`MIN_TRACK_INTERVAL_MS`].
    /// Defaults to `300000`.
    pub interval_ms: u64,

    /// Probe all instances of a pass concurrently. Defaults to `true`.
    pub parallel: bool,

    /// Periodic passes only recheck instances that are available but down. Defaults to `true`.
    pub only_dead: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: TrackingMethod::Stats,
            interval_ms: 300_000,
            parallel: true,
            only_dead: true,
        }
    }
}

/// Instance selection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchingConfig {
    /// Only select instances that are currently working. Defaults to `true`.
    pub only_working: bool,

    /// Keep returning the last selected instance while it is working. Defaults to `true`.
    pub prefer_same: bool,

    /// Selection algorithm. Defaults to `fastest`.
    pub method: SwitchingMethod,
}

impl Default for SwitchingConfig {
    fn default() -> Self {
        Self { only_working: true, prefer_same: true, method: SwitchingMethod::Fastest }
    }
}

/// Minimum version enforcement for remotely discovered instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequireVersionConfig {
    /// Defaults to `false`.
    pub enabled: bool,

    /// Minimum semantic version (inclusive).
    pub version: String,

    /// Scrape the version from the instance home page when the feed does not state it.
    /// Defaults to `true`.
    pub fallback_to_home: bool,
}

impl Default for RequireVersionConfig {
    fn default() -> Self {
        Self { enabled: false, version: "0.20.0".to_string(), fallback_to_home: true }
    }
}

/// Remote instance directory ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Defaults to `false`.
    pub enabled: bool,

    /// Directory URL returning a JSON array of `[name, info]` pairs.
    pub url: String,

    /// Skip instances whose weekly uptime ratio is exactly zero. Defaults to `true`.
    pub ignore_dead: bool,

    pub require_version: RequireVersionConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://api.invidious.io/instances.json?sort_by=health".to_string(),
            ignore_dead: true,
            require_version: RequireVersionConfig::default(),
        }
    }
}

/// Defaults merged into every outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Headers sent with every request. `$version` is replaced with the crate version.
    pub headers: HashMap<String, String>,

    /// Request timeout in milliseconds. `None` disables the timeout race.
    pub timeout_ms: Option<u64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "switcher/$version".to_string());
        Self { headers, timeout_ms: Some(10_000) }
    }
}

/// Application logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitcherConfig {
    pub instances: Vec<InstanceEntry>,
    pub detection: DetectionConfig,
    pub tracking: TrackingConfig,
    pub switching: SwitchingConfig,
    pub fetch: FetchConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

impl SwitcherConfig {
    /// Loads configuration from a file with environment variable overrides.
    ///
    /// The format is picked from the file extension. Environment variables with the
    /// `SWITCHER__` prefix override any value, using `__` as the nesting separator
    /// (e.g., `SWITCHER__TRACKING__INTERVAL_MS=60000`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let loaded: Self = Config::builder()
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("SWITCHER").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(loaded.with_version_substituted())
    }

    /// Loads configuration from `config/config.toml`, overridable via `SWITCHER_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("SWITCHER_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Replaces `$version` in the `User-Agent` header with this crate's version.
    #[must_use]
    pub fn with_version_substituted(mut self) -> Self {
        for (name, value) in &mut self.http.headers {
            if name.eq_ignore_ascii_case("user-agent") && value.contains(VERSION_PLACEHOLDER) {
                *value = value.replace(VERSION_PLACEHOLDER, env!("CARGO_PKG_VERSION"));
            }
        }
        self
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tracking.enabled && self.tracking.interval_ms < MIN_TRACK_INTERVAL_MS {
            return Err(ConfigError::TrackingIntervalTooLow {
                interval_ms: self.tracking.interval_ms,
                min_ms: MIN_TRACK_INTERVAL_MS,
            });
        }

        let rate = self.detection.acceptable_working_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::InvalidWorkingRate(rate));
        }

        for entry in &self.instances {
            let site = entry.site();
            match Url::parse(site) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                _ => return Err(ConfigError::InvalidInstanceUrl(site.to_string())),
            }
        }

        if self.fetch.enabled {
            if Url::parse(&self.fetch.url).is_err() {
                return Err(ConfigError::InvalidFeedUrl(self.fetch.url.clone()));
            }

            let require = &self.fetch.require_version;
            if require.enabled {
                if let Err(e) = semver::Version::parse(&require.version) {
                    return Err(ConfigError::InvalidRequiredVersion {
                        version: require.version.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.logging.format.clone()));
        }

        Ok(())
    }

    /// Returns the request timeout, if one is configured.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.http.timeout_ms.map(Duration::from_millis)
    }
}
