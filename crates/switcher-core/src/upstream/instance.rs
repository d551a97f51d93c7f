use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use reqwest::{
    cookie::{CookieStore, Jar},
    header::{HeaderMap, COOKIE, LOCATION, SET_COOKIE},
    Method, StatusCode, Url,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::{InstanceOptions, SwitcherConfig, TrackingMethod};

use super::{
    errors::UpstreamError,
    http_client::{header_map, HttpClient, HttpResponse},
    version,
    window::{HealthRecord, RecordWindow},
};

/// Trending feed page, probed by the `home` method and scraped for the version.
pub const HOME_PATH: &str = "/feed/trending";

/// Stats endpoint, probed by the `stats` method.
pub const STATS_PATH: &str = "/api/v1/stats";

/// Well-known video fetched by the `video` probe.
pub const PROBE_VIDEO_ID: &str = "dQw4w9WgXcQ";

/// Well-known channel fetched by the `channel` probe.
pub const PROBE_CHANNEL_ID: &str = "UC38IQsAvIsxxjztdMZQtwHA";

#[must_use]
pub fn video_path(id: &str) -> String {
    format!("/api/v1/videos/{id}")
}

#[must_use]
pub fn channel_path(id: &str) -> String {
    format!("/api/v1/channels/{id}")
}

#[must_use]
pub fn channel_videos_path(id: &str) -> String {
    format!("/api/v1/channels/{id}/videos")
}

#[must_use]
pub fn channel_latest_path(id: &str) -> String {
    format!("/api/v1/channels/{id}/latest")
}

/// Strips trailing slashes. Instances are keyed by the normalised form.
#[must_use]
pub fn normalise_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Category of a tagged API request. An instance that answers a kind with HTTP 403 is never
/// asked for that kind again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Video,
    Channel,
    Custom(Arc<str>),
}

impl RequestKind {
    #[must_use]
    pub fn custom(name: impl Into<Arc<str>>) -> Self {
        Self::Custom(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Video => "video",
            Self::Channel => "channel",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted once for every record appended to an instance's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEvent {
    pub site: Arc<str>,
    /// Probe method or request kind that produced the record.
    pub method: String,
    pub working: bool,
    pub latency_ms: u64,
}

/// Successful outcome of a tagged API request.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// HTTP 200 with a JSON body.
    Data(Value),
    /// Structured HTTP 500 about the requested resource (e.g. video unavailable). Only returned
    /// when such errors are not counted against the instance.
    ResourceUnavailable(Value),
}

impl ApiResponse {
    #[must_use]
    pub fn value(&self) -> &Value {
        match self {
            Self::Data(value) | Self::ResourceUnavailable(value) => value,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Data(value) | Self::ResourceUnavailable(value) => value,
        }
    }

    #[must_use]
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable(_))
    }
}

/// Point-in-time view of an instance, for display.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub site: String,
    pub available: bool,
    pub working: bool,
    pub average_latency_ms: Option<u64>,
    pub records: usize,
    pub blacklisted_kinds: Vec<String>,
}

/// One mirror of the service.
///
/// Owns its rolling health window, optional cookie jar and the set of blacklisted request
/// kinds. All state is mutated only by this instance's own probes and requests.
pub struct Instance {
    site: Arc<str>,
    site_url: Option<Url>,
    options: InstanceOptions,
    headers: HeaderMap,
    cookie_jar: Option<Arc<Jar>>,
    blacklisted_kinds: RwLock<HashSet<RequestKind>>,
    available: AtomicBool,
    records: RwLock<RecordWindow>,
    record_tx: broadcast::Sender<RecordEvent>,
    config: Arc<SwitcherConfig>,
    http_client: Arc<HttpClient>,
}

impl Instance {
    /// Creates an instance for `site` (normalised here).
    ///
    /// Default headers from the HTTP configuration are merged with the instance's own headers,
    /// the latter winning. Headers that are not valid HTTP are skipped with a warning.
    #[must_use]
    pub fn new(
        site: &str,
        options: InstanceOptions,
        config: Arc<SwitcherConfig>,
        http_client: Arc<HttpClient>,
        record_tx: broadcast::Sender<RecordEvent>,
    ) -> Self {
        let site: Arc<str> = Arc::from(normalise_url(site));

        let headers = header_map(config.http.headers.iter().chain(options.headers.iter()));

        let cookie_jar = options.use_cookies.then(|| Arc::new(Jar::default()));

        Self {
            site_url: Url::parse(&site).ok(),
            site,
            available: AtomicBool::new(options.available),
            options,
            headers,
            cookie_jar,
            blacklisted_kinds: RwLock::new(HashSet::new()),
            records: RwLock::new(RecordWindow::new()),
            record_tx,
            config,
            http_client,
        }
    }

    /// Normalised base URL; the registry key.
    #[must_use]
    pub fn site(&self) -> &str {
        &self.site
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Whether the instance is available and its recent success ratio reaches the threshold.
    #[must_use]
    pub fn is_working(&self) -> bool {
        self.is_available() && self.records.read().is_working(&self.config.detection)
    }

    /// Available but not working: a down instance worth rechecking.
    #[must_use]
    pub fn should_try_to_save(&self) -> bool {
        self.is_available() && !self.records.read().is_working(&self.config.detection)
    }

    /// Rounded mean or median latency of the window. `None` means no data yet.
    #[must_use]
    pub fn average_latency(&self) -> Option<u64> {
        self.records.read().average_latency(self.config.detection.use_median_time)
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Window contents, newest first.
    #[must_use]
    pub fn records(&self) -> Vec<HealthRecord> {
        self.records.read().iter().copied().collect()
    }

    #[must_use]
    pub fn is_blacklisted(&self, kind: &RequestKind) -> bool {
        self.blacklisted_kinds.read().contains(kind)
    }

    #[must_use]
    pub fn subscribe_records(&self) -> broadcast::Receiver<RecordEvent> {
        self.record_tx.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        let mut blacklisted_kinds: Vec<String> =
            self.blacklisted_kinds.read().iter().map(ToString::to_string).collect();
        blacklisted_kinds.sort();

        InstanceStatus {
            site: self.site.to_string(),
            available: self.is_available(),
            working: self.is_working(),
            average_latency_ms: self.average_latency(),
            records: self.record_count(),
            blacklisted_kinds,
        }
    }

    /// Runs one probe using the instance override or the configured tracking method.
    ///
    /// Returns whether the probe succeeded. One record is appended unless the probe never
    /// left this process (see [`UpstreamError::counts_against_health`]).
    pub async fn check(&self) -> bool {
        match self.options.tracking_method.unwrap_or(self.config.tracking.method) {
            TrackingMethod::Home => self.check_home().await,
            TrackingMethod::Stats => self.check_stats().await,
            TrackingMethod::Video => self.check_video().await,
            TrackingMethod::Channel => self.check_channel().await,
        }
    }

    pub async fn check_home(&self) -> bool {
        self.check_head(TrackingMethod::Home, HOME_PATH).await
    }

    pub async fn check_stats(&self) -> bool {
        self.check_head(TrackingMethod::Stats, STATS_PATH).await
    }

    pub async fn check_video(&self) -> bool {
        self.request_video(PROBE_VIDEO_ID).await.is_ok()
    }

    pub async fn check_channel(&self) -> bool {
        self.request_channel(PROBE_CHANNEL_ID).await.is_ok()
    }

    async fn check_head(&self, method: TrackingMethod, path: &str) -> bool {
        let (latency_ms, result) = self.timed_cookie_request(Method::HEAD, path).await;
        if let Err(e) = &result {
            if !e.counts_against_health() {
                self.skip_record(method.as_str(), e);
                return false;
            }
        }
        let working = matches!(result, Ok(ref response) if response.status() == StatusCode::OK);
        self.add_record(method.as_str(), working, latency_ms);
        working
    }

    /// Fetches the home page and scrapes the software version from its footer.
    ///
    /// Records a `home` outcome for the page fetch itself.
    ///
    /// # Errors
    ///
    /// Returns the transport or status error of the fetch, or
    /// [`UpstreamError::VersionNotDetectable`] if the page carries no version.
    pub async fn get_version_from_home(&self) -> Result<String, UpstreamError> {
        let (latency_ms, result) = self.timed_cookie_request(Method::GET, HOME_PATH).await;
        let home = TrackingMethod::Home.as_str();

        let response = match result {
            Ok(response) if response.status() == StatusCode::OK => response,
            Ok(response) => {
                self.add_record(home, false, latency_ms);
                let status = response.status().as_u16();
                return Err(UpstreamError::HttpError(status, response.text()));
            }
            Err(e) => {
                if e.counts_against_health() {
                    self.add_record(home, false, latency_ms);
                } else {
                    self.skip_record(home, &e);
                }
                return Err(e);
            }
        };
        self.add_record(home, true, latency_ms);

        let version = version::extract_version(&response.text());
        match &version {
            Ok(version) => tracing::debug!(site = %self.site, version = %version, "version found"),
            Err(_) => tracing::debug!(site = %self.site, "version not detectable"),
        }
        version
    }

    /// Performs a tagged request against the instance API and classifies the outcome.
    ///
    /// Unless the kind is already blacklisted or the request never left this process, exactly
    /// one record is appended and one [`RecordEvent`] is emitted before this returns.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::Blacklisted`] without any network call if `kind` was refused before
    /// - [`UpstreamError::Timeout`] / [`UpstreamError::ConnectionFailed`] on transport failure
    /// - [`UpstreamError::InvalidPayload`] for an HTTP 200 that is not JSON
    /// - [`UpstreamError::Blocked`] for a structured HTTP 500 saying the instance is blocked
    /// - [`UpstreamError::ResourceUnavailable`] for other structured HTTP 500s when those are
    ///   configured to count against the instance
    /// - [`UpstreamError::HttpError`] for any other status, including the 403 that blacklists
    ///   `kind`
    pub async fn make_api_request(
        &self,
        kind: RequestKind,
        path: &str,
    ) -> Result<ApiResponse, UpstreamError> {
        if self.is_blacklisted(&kind) {
            return Err(UpstreamError::Blacklisted(kind));
        }

        let (latency_ms, result) = self.timed_cookie_request(Method::GET, path).await;
        let outcome = result.and_then(|response| self.classify(&kind, &response));

        match &outcome {
            Err(e) if !e.counts_against_health() => self.skip_record(kind.as_str(), e),
            _ => self.add_record(kind.as_str(), outcome.is_ok(), latency_ms),
        }
        outcome
    }

    fn classify(
        &self,
        kind: &RequestKind,
        response: &HttpResponse,
    ) -> Result<ApiResponse, UpstreamError> {
        match response.status() {
            StatusCode::OK => response
                .json::<Value>()
                .map(ApiResponse::Data)
                .map_err(|_| UpstreamError::InvalidPayload(response.text())),
            StatusCode::INTERNAL_SERVER_ERROR => {
                let Ok(body) = response.json::<Value>() else {
                    return Err(UpstreamError::HttpError(500, response.text()));
                };
                match body.get("error").and_then(Value::as_str) {
                    Some(message) if message.contains("blocked") => {
                        Err(UpstreamError::Blocked(message.to_string()))
                    }
                    _ if self.config.detection.consider_unavailable_as_blocked => {
                        Err(UpstreamError::ResourceUnavailable(body.to_string()))
                    }
                    _ => Ok(ApiResponse::ResourceUnavailable(body)),
                }
            }
            StatusCode::FORBIDDEN => {
                tracing::info!(site = %self.site, kind = %kind, "request kind blacklisted");
                self.blacklisted_kinds.write().insert(kind.clone());
                Err(UpstreamError::HttpError(403, response.text()))
            }
            status => Err(UpstreamError::HttpError(status.as_u16(), response.text())),
        }
    }

    pub async fn request_video(&self, id: &str) -> Result<ApiResponse, UpstreamError> {
        self.make_api_request(RequestKind::Video, &video_path(id)).await
    }

    pub async fn request_channel(&self, id: &str) -> Result<ApiResponse, UpstreamError> {
        self.make_api_request(RequestKind::Channel, &channel_path(id)).await
    }

    pub async fn request_channel_videos(&self, id: &str) -> Result<ApiResponse, UpstreamError> {
        self.make_api_request(RequestKind::Channel, &channel_videos_path(id)).await
    }

    pub async fn request_channel_latest(&self, id: &str) -> Result<ApiResponse, UpstreamError> {
        self.make_api_request(RequestKind::Channel, &channel_latest_path(id)).await
    }

    /// Absolute URLs are used as-is, anything else is a path on this instance.
    fn resolve(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("{}{target}", self.site)
        }
    }

    fn request_headers(&self, url: &str) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(jar) = &self.cookie_jar {
            if let Some(cookie) = Url::parse(url).ok().and_then(|url| jar.cookies(&url)) {
                headers.insert(COOKIE, cookie);
            }
        }
        headers
    }

    /// Sends one request and measures it. The elapsed time is returned on failure too.
    async fn timed_request(
        &self,
        method: Method,
        url: &str,
    ) -> (u64, Result<HttpResponse, UpstreamError>) {
        let start = Instant::now();
        let result = self
            .http_client
            .send(method, url, self.request_headers(url), self.config.request_timeout())
            .await;
        (elapsed_ms(start.elapsed()), result)
    }

    /// Like [`Self::timed_request`], but answers one bot-protection redirect.
    ///
    /// With cookies enabled, an HTTP 307 carrying `Set-Cookie` has its cookies stored against
    /// the site and the request is re-issued once to `Location` (or the same target). The
    /// latency of both legs is summed.
    async fn timed_cookie_request(
        &self,
        method: Method,
        target: &str,
    ) -> (u64, Result<HttpResponse, UpstreamError>) {
        let url = self.resolve(target);
        let (latency_ms, result) = self.timed_request(method.clone(), &url).await;

        let (Some(jar), Ok(response)) = (&self.cookie_jar, &result) else {
            return (latency_ms, result);
        };
        if response.status() != StatusCode::TEMPORARY_REDIRECT ||
            !response.headers().contains_key(SET_COOKIE)
        {
            return (latency_ms, result);
        }

        if let Some(site_url) = &self.site_url {
            jar.set_cookies(&mut response.headers().get_all(SET_COOKIE).iter(), site_url);
        }
        let next =
            response.header(LOCATION.as_str()).map_or(url, |location| self.resolve(location));

        tracing::debug!(site = %self.site, location = %next, "following bot-protection redirect");
        let (second_ms, result) = self.timed_request(method, &next).await;
        (latency_ms + second_ms, result)
    }

    fn add_record(&self, method: &str, working: bool, latency_ms: u64) {
        let avg_latency_ms = {
            let mut records = self.records.write();
            records.push(HealthRecord { working, latency_ms });
            records.average_latency(self.config.detection.use_median_time)
        };

        tracing::debug!(
            site = %self.site,
            method,
            working,
            latency_ms,
            avg_latency_ms = ?avg_latency_ms,
            "{}",
            if working { "up" } else { "down" }
        );

        // No subscribers is fine
        let _ = self.record_tx.send(RecordEvent {
            site: Arc::clone(&self.site),
            method: method.to_string(),
            working,
            latency_ms,
        });
    }

    fn skip_record(&self, method: &str, error: &UpstreamError) {
        tracing::debug!(site = %self.site, method, error = %error, "not recorded, local failure");
    }

    #[cfg(test)]
    pub(crate) fn push_record(&self, working: bool, latency_ms: u64) {
        self.records.write().push(HealthRecord { working, latency_ms });
    }

    #[cfg(test)]
    pub(crate) fn blacklist(&self, kind: RequestKind) {
        self.blacklisted_kinds.write().insert(kind);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("site", &self.site)
            .field("available", &self.is_available())
            .field("records", &self.record_count())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64
}
