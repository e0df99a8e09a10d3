//! Error types for the mimic crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error classification, used by retry conditions and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed JA3/Akamai spec, proxy URL, certificate file.
    Config,
    /// TCP/UDP dial, socket or QUIC transport failure.
    Network,
    /// TLS handshake, certificate verification, ALPN mismatch.
    Tls,
    /// Malformed HTTP frame, unexpected stream, missing settings.
    Protocol,
    /// Body replay failure, redirect limit, canceled context.
    Request,
    /// Digest challenge malformed, unsupported algorithm/qop/charset.
    Auth,
    /// Response parsed into the error result (status >= 400).
    Server,
}

/// Errors that can occur during HTTP operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed fingerprint spec or client configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Connection-level network failure.
    #[error("network error: {0}")]
    Network(String),

    /// TLS handshake or verification failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP protocol violation (any version).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request could not be (re)built or sent.
    #[error("request error: {0}")]
    Request(String),

    /// The request context was canceled.
    #[error("request canceled: {0}")]
    Canceled(String),

    /// A deadline expired.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Authentication challenge could not be satisfied.
    #[error("auth error: {0}")]
    Auth(String),

    /// The response result state is Error (status >= 400).
    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    /// Redirect limit exceeded.
    #[error("redirect limit exceeded ({count} redirects)")]
    RedirectLimit { count: u32 },

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error annotated with the originating request URL and attempt.
    #[error("{url} (attempt {attempt}): {source}")]
    Attempt {
        url: String,
        attempt: u32,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a request error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(message.into())
    }

    /// Create an auth error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create a server result error.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Wrap with the originating request URL and attempt number.
    pub fn with_attempt(self, url: impl Into<String>, attempt: u32) -> Self {
        match self {
            // Already annotated by an inner retry round.
            Self::Attempt { .. } => self,
            other => Self::Attempt {
                url: url.into(),
                attempt,
                source: Box::new(other),
            },
        }
    }

    /// Classify this error into a spec-level kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::UrlParse(_) => ErrorKind::Config,
            Self::Network(_) | Self::Io(_) => ErrorKind::Network,
            Self::Tls(_) => ErrorKind::Tls,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Request(_)
            | Self::Canceled(_)
            | Self::DeadlineExceeded(_)
            | Self::RedirectLimit { .. }
            | Self::Json(_) => ErrorKind::Request,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Server { .. } => ErrorKind::Server,
            Self::Attempt { source, .. } => source.kind(),
        }
    }

    /// True for context cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Canceled(_) => true,
            Self::Attempt { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// True for deadline expiry.
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            Self::DeadlineExceeded(_) => true,
            Self::Attempt { source, .. } => source.is_deadline_exceeded(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_attempt_wrapping() {
        let err = Error::network("connection refused").with_attempt("https://example.invalid", 2);
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("attempt 2"));
    }

    #[test]
    fn attempt_wrapping_is_idempotent() {
        let err = Error::tls("bad cert")
            .with_attempt("https://a", 0)
            .with_attempt("https://b", 1);
        match err {
            Error::Attempt { url, attempt, .. } => {
                assert_eq!(url, "https://a");
                assert_eq!(attempt, 0);
            }
            other => panic!("expected Attempt, got {other:?}"),
        }
    }
}
