//! Request model: ordered headers, replayable bodies, payload
//! serialization inputs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Method;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::version::HttpVersion;

/// A restartable byte-source. Invoked once per attempt, so a request
/// with `max_retries = N` may call it up to `N + 1` times.
pub type BodyFactory = Arc<dyn Fn() -> Result<Bytes> + Send + Sync>;

/// Request payload before wire serialization.
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    None,
    /// Replayable raw bytes.
    Bytes(Bytes),
    /// Streaming body with a factory for retries. Retrying without the
    /// factory fails.
    Stream(BodyFactory),
    /// Serialized to JSON by the body middleware.
    Json(serde_json::Value),
    /// Serialized to XML by the body middleware.
    Xml(String),
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
    /// multipart/form-data parts.
    Multipart(Vec<Part>),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::Stream(_) => write!(f, "Stream"),
            Self::Json(_) => write!(f, "Json"),
            Self::Xml(_) => write!(f, "Xml"),
            Self::Form(_) => write!(f, "Form"),
            Self::Multipart(_) => write!(f, "Multipart"),
        }
    }
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// An HTTP request under construction or in flight.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Raw URL as given; resolved against the base URL by middleware.
    pub url: String,
    /// Ordered, case-preserving header list.
    pub headers: Vec<(String, String)>,
    pub payload: Payload,
    /// Wire body, produced from `payload` by the body middleware.
    pub body: Option<Bytes>,
    pub cookies: Vec<(String, String)>,
    pub query_params: Vec<(String, String)>,
    pub path_params: HashMap<String, String>,
    /// Per-request deadline; falls back to the client timeout.
    pub timeout: Option<Duration>,
    /// Per-request protocol override.
    pub version: Option<HttpVersion>,
    /// Per-request retry override.
    pub retry: Option<RetryPolicy>,
    /// Current attempt, starting at 0.
    pub attempt: u32,
    /// Collect a timing trace on the response.
    pub trace: bool,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            payload: Payload::None,
            body: None,
            cookies: Vec::new(),
            query_params: Vec::new(),
            path_params: HashMap::new(),
            timeout: None,
            version: None,
            retry: None,
            attempt: 0,
            trace: false,
        }
    }

    /// Set a header, replacing any existing value of the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Append a header without replacing existing values.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Rebuild the wire body for a fresh attempt. Streaming payloads
    /// replay through their factory; a missing factory is an error.
    pub fn rematerialize_body(&mut self) -> Result<()> {
        match &self.payload {
            Payload::Stream(factory) => {
                self.body = Some(factory()?);
                Ok(())
            }
            Payload::Bytes(bytes) => {
                self.body = Some(bytes.clone());
                Ok(())
            }
            Payload::None => {
                self.body = None;
                Ok(())
            }
            // Serialized payloads are regenerated by the body middleware.
            _ => Ok(()),
        }
    }

    /// Whether this request can be retried at all.
    pub fn is_replayable(&self) -> bool {
        !matches!(self.payload, Payload::Stream(_)) || self.body_factory().is_some()
    }

    fn body_factory(&self) -> Option<&BodyFactory> {
        match &self.payload {
            Payload::Stream(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut req = Request::new(Method::GET, "https://example.com");
        req.add_header("User-Agent", "one");
        req.set_header("user-agent", "two");
        assert_eq!(req.header("USER-AGENT"), Some("two"));
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn stream_payload_replays_through_factory() {
        let mut req = Request::new(Method::POST, "https://example.com");
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        req.payload = Payload::Stream(Arc::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Bytes::from_static(b"data"))
        }));
        req.rematerialize_body().unwrap();
        req.rematerialize_body().unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(req.body.as_deref(), Some(&b"data"[..]));
    }

    #[test]
    fn failing_factory_propagates() {
        let mut req = Request::new(Method::POST, "https://example.com");
        req.payload = Payload::Stream(Arc::new(|| Err(Error::request("body consumed"))));
        assert!(req.rematerialize_body().is_err());
    }
}
