use thiserror::Error;

/// Errors raised while dispatching to an upstream backend.
///
/// A well-formed JSON-RPC `error` body from the upstream is *not* one of
/// these: it is a definitive answer, returned as a normal response and never
/// retried. These variants cover transport- and framing-level failures only.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Connection, DNS, or TCP failure before a response was received.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// The per-dispatch deadline elapsed.
    #[error("upstream request timed out")]
    Timeout,

    /// HTTP status outside 200–299.
    #[error("upstream HTTP error: status {0}")]
    HttpStatus(u16),

    /// Body was not JSON, or its shape did not mirror the request
    /// (single→single, array→array, every id accounted for).
    #[error("malformed upstream response: {0}")]
    Malformed(String),

    /// The backend's own token bucket or in-flight limit rejected the
    /// dispatch before any network traffic.
    #[error("local rate limit exceeded")]
    RateLimitedLocal,

    /// No backend in the group was selectable.
    #[error("no backends available")]
    NoBackendsAvailable,
}

impl BackendError {
    /// Returns `true` for idempotent failures a group may retry on the next
    /// selectable backend: connection failures, timeouts, and 5xx statuses.
    /// Everything else — including 4xx and local rate limiting — returns
    /// immediately.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::HttpStatus(status) => (500..=599).contains(status),
            Self::Malformed(_) | Self::RateLimitedLocal | Self::NoBackendsAvailable => false,
        }
    }

    /// Returns `true` when the failure should count against the backend's
    /// consecutive-failure tally. Local rate limiting is the proxy's doing,
    /// not the upstream's.
    #[must_use]
    pub fn penalizes_backend(&self) -> bool {
        !matches!(self, Self::RateLimitedLocal | Self::NoBackendsAvailable)
    }
}
