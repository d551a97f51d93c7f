//! Remote instance directory.
//!
//! The directory answers with a JSON array of `[name, info]` pairs:
//!
//! ```json
//! [
//!   ["yt.example.org", {
//!     "type": "https",
//!     "uri": "https://yt.example.org",
//!     "monitor": { "weeklyRatio": { "ratio": "99.5" } },
//!     "stats": { "software": { "version": "0.20.1" } }
//!   }]
//! ]
//! ```
//!
//! Each candidate is assessed against the fetch configuration before it is registered.

use std::time::Duration;

use reqwest::{header::HeaderMap, Method, StatusCode};
use semver::Version;
use serde::Deserialize;
use serde_json::Value;

use crate::config::FetchConfig;

use super::{http_client::HttpClient, version, UpstreamError};

/// One `[name, info]` pair of the directory.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedEntry(pub String, pub FeedInfo);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedInfo {
    #[serde(rename = "type", default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub monitor: Option<FeedMonitor>,
    #[serde(default)]
    pub stats: Option<FeedStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedMonitor {
    #[serde(rename = "weeklyRatio", default)]
    pub weekly_ratio: Option<FeedRatio>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedRatio {
    /// Published either as a number or as a numeric string.
    #[serde(default)]
    pub ratio: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedStats {
    #[serde(default)]
    pub software: Option<FeedSoftware>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedSoftware {
    #[serde(default)]
    pub version: Option<String>,
}

impl FeedInfo {
    /// Weekly uptime ratio, if the monitor reports a numeric one.
    #[must_use]
    pub fn weekly_ratio(&self) -> Option<f64> {
        match self.monitor.as_ref()?.weekly_ratio.as_ref()?.ratio.as_ref()? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Software version stated by the directory.
    #[must_use]
    pub fn stated_version(&self) -> Option<&str> {
        self.stats.as_ref()?.software.as_ref()?.version.as_deref()
    }
}

/// What to do with a directory candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    /// Register the instance.
    Accept(String),
    /// Register provisionally as unavailable and confirm the version from its home page.
    ProbeVersion(String),
    /// Never register. The reason is for logging only.
    Reject(&'static str),
}

/// Applies the fetch filters to one candidate.
///
/// `minimum` is the parsed required version; it is only consulted when version enforcement is
/// enabled. A candidate without a stated version is accepted unverified when enforcement is on
/// but falling back to the home page is off.
#[must_use]
pub fn assess(info: &FeedInfo, fetch: &FetchConfig, minimum: Option<&Version>) -> Assessment {
    if info.transport.as_deref() != Some("https") {
        return Assessment::Reject("not https");
    }
    let Some(uri) = info.uri.as_deref().filter(|uri| !uri.is_empty()) else {
        return Assessment::Reject("missing uri");
    };
    if fetch.ignore_dead && info.weekly_ratio() == Some(0.0) {
        return Assessment::Reject("dead");
    }

    let require = &fetch.require_version;
    if require.enabled {
        if let Some(stated) = info.stated_version() {
            let qualifies = minimum.is_some_and(|minimum| version::meets_minimum(stated, minimum));
            if !qualifies {
                return Assessment::Reject("version below minimum");
            }
        } else if require.fallback_to_home {
            return Assessment::ProbeVersion(uri.to_string());
        }
    }

    Assessment::Accept(uri.to_string())
}

/// Downloads and parses the directory.
///
/// # Errors
///
/// Returns the transport error, [`UpstreamError::HttpError`] for a non-200 answer, or
/// [`UpstreamError::InvalidPayload`] if the body is not an array of `[name, info]` pairs.
pub async fn fetch_feed(
    http_client: &HttpClient,
    url: &str,
    headers: HeaderMap,
    timeout: Option<Duration>,
) -> Result<Vec<FeedEntry>, UpstreamError> {
    let response = http_client.send(Method::GET, url, headers, timeout).await?;
    if response.status() != StatusCode::OK {
        return Err(UpstreamError::HttpError(response.status().as_u16(), response.text()));
    }
    response
        .json::<Vec<FeedEntry>>()
        .map_err(|e| UpstreamError::InvalidPayload(format!("unexpected directory shape: {e}")))
}
