use thiserror::Error;

use super::instance::RequestKind;

/// Errors that can occur when talking to an instance or selecting one.
///
/// Every variant except [`UpstreamError::Blacklisted`] (short-circuited before any network
/// call), [`UpstreamError::NoWorkingInstances`] (raised by selection) and the local failures
/// excluded by [`UpstreamError::counts_against_health`] has already been recorded in the
/// instance's rolling window by the time the caller sees it. The HTTP 403
/// that causes a blacklisting is reported as [`UpstreamError::HttpError`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the configured timeout.
    #[error("Request timeout")]
    Timeout,

    /// Connection, DNS or other transport-level failure.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Unexpected HTTP status. Second field is the raw response body.
    #[error("Instance is unavailable: HTTP {0}: {1}")]
    HttpError(u16, String),

    /// HTTP 200 whose body is not the expected structured payload.
    #[error("Instance is unavailable: malformed payload: {0}")]
    InvalidPayload(String),

    /// Structured HTTP 500 reporting that the instance itself is blocked.
    #[error("Instance is unavailable: blocked: {0}")]
    Blocked(String),

    /// Structured HTTP 500 about the requested resource, counted against the instance.
    #[error("Instance is unavailable: resource error: {0}")]
    ResourceUnavailable(String),

    /// The instance refused this kind of request with HTTP 403 earlier, so it was not sent.
    #[error("Instance is unavailable: {0} requests were blacklisted")]
    Blacklisted(RequestKind),

    /// Selection found no candidate instance.
    #[error("No working instances available")]
    NoWorkingInstances,

    /// The instance home page did not expose a recognisable version.
    #[error("Version not detectable")]
    VersionNotDetectable,

    /// The request could not be built (e.g. malformed URL).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The HTTP client's concurrency limit could not be acquired.
    #[error("Concurrency limit reached: {0}")]
    ConcurrencyLimit(String),
}

impl UpstreamError {
    /// Returns `true` if this failure was caused by the instance rather than by this process.
    ///
    /// Selection failures, malformed requests and an exhausted local permit pool say nothing
    /// about instance health, so they are never recorded.
    #[must_use]
    pub fn counts_against_health(&self) -> bool {
        !matches!(
            self,
            Self::NoWorkingInstances | Self::InvalidRequest(_) | Self::ConcurrencyLimit(_)
        )
    }

    /// Returns `true` for failures detected before a response was received.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailed(_))
    }
}
