//! Response model with repeatable body reads and explicit
//! decompression.

use std::io::Read;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::tls::TlsState;

/// Classification of a response for result handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    /// 2xx.
    Success,
    /// >= 400.
    Error,
    /// Everything else.
    Unknown,
}

/// Default result-state rule; a client-level checker can override it.
pub fn default_result_state(status: u16) -> ResultState {
    match status {
        200..=299 => ResultState::Success,
        400.. => ResultState::Error,
        _ => ResultState::Unknown,
    }
}

/// A received HTTP response.
///
/// The body is fully read by the protocol layer, so `bytes()` returns
/// the same content on every call. Middleware errors bind to `err`
/// rather than replacing the response.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    /// Headers in the order the server sent them.
    pub headers: Vec<(String, String)>,
    pub trailers: Vec<(String, String)>,
    body: Bytes,
    /// "HTTP/1.1", "HTTP/2" or "HTTP/3".
    pub protocol: String,
    /// TLS state snapshot from the carrying connection.
    pub tls: Option<TlsState>,
    /// URL that produced this response (after redirects).
    pub url: String,
    /// Attempt number that produced this response.
    pub attempt: u32,
    /// Wall-clock duration of the final attempt.
    pub elapsed: Duration,
    /// Result classification.
    pub result_state: ResultState,
    /// Error bound by middleware, if any.
    pub err: Option<Error>,
    /// The request that produced this response.
    pub request: Option<Box<crate::request::Request>>,
}

impl Response {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            trailers: Vec::new(),
            body,
            protocol: String::new(),
            tls: None,
            url: String::new(),
            attempt: 0,
            elapsed: Duration::ZERO,
            result_state: default_result_state(status),
            err: None,
            request: None,
        }
    }

    /// Raw (possibly compressed) body bytes. Repeatable.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header, case-insensitive.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    /// Body after Content-Encoding decompression (gzip, deflate, br,
    /// zstd). Falls back to magic-byte sniffing when the header is
    /// absent.
    pub fn decoded_body(&self) -> Result<Bytes> {
        let encoding = self
            .header("content-encoding")
            .map(|v| v.to_ascii_lowercase());
        match encoding.as_deref() {
            Some("gzip") | Some("x-gzip") => decode_gzip(&self.body),
            Some("deflate") => decode_deflate(&self.body),
            Some("br") => decode_brotli(&self.body),
            Some("zstd") => decode_zstd(&self.body),
            _ => {
                if self.body.len() >= 4 && self.body[..4] == [0x28, 0xb5, 0x2f, 0xfd] {
                    return decode_zstd(&self.body);
                }
                if self.body.len() >= 2 && self.body[..2] == [0x1f, 0x8b] {
                    return decode_gzip(&self.body);
                }
                Ok(self.body.clone())
            }
        }
    }

    pub fn text(&self) -> Result<String> {
        let decoded = self.decoded_body()?;
        String::from_utf8(decoded.to_vec())
            .map_err(|e| Error::request(format!("response body is not UTF-8: {e}")))
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.decoded_body()?)?)
    }
}

fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    flate2::read::GzDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::protocol(format!("gzip decode failed: {e}")))?;
    Ok(Bytes::from(decoded))
}

fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::protocol(format!("deflate decode failed: {e}")))?;
    Ok(Bytes::from(decoded))
}

fn decode_brotli(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    brotli::Decompressor::new(data, 4096)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::protocol(format!("brotli decode failed: {e}")))?;
    Ok(Bytes::from(decoded))
}

fn decode_zstd(data: &[u8]) -> Result<Bytes> {
    zstd::stream::decode_all(data)
        .map(Bytes::from)
        .map_err(|e| Error::protocol(format!("zstd decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn result_state_rule() {
        assert_eq!(default_result_state(200), ResultState::Success);
        assert_eq!(default_result_state(299), ResultState::Success);
        assert_eq!(default_result_state(301), ResultState::Unknown);
        assert_eq!(default_result_state(400), ResultState::Error);
        assert_eq!(default_result_state(503), ResultState::Error);
    }

    #[test]
    fn bytes_are_repeatable() {
        let resp = Response::new(200, vec![], Bytes::from_static(b"hello"));
        assert_eq!(resp.bytes(), resp.bytes());
        assert_eq!(&resp.bytes()[..], b"hello");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = Response::new(
            200,
            vec![("Content-Type".to_string(), "text/html".to_string())],
            Bytes::new(),
        );
        assert_eq!(resp.header("content-type"), Some("text/html"));
        assert_eq!(resp.content_type(), Some("text/html"));
    }

    #[test]
    fn gzip_body_decodes_with_and_without_header() {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"payload").unwrap();
        let compressed = enc.finish().unwrap();

        let with_header = Response::new(
            200,
            vec![("content-encoding".to_string(), "gzip".to_string())],
            Bytes::from(compressed.clone()),
        );
        assert_eq!(&with_header.decoded_body().unwrap()[..], b"payload");

        let sniffed = Response::new(200, vec![], Bytes::from(compressed));
        assert_eq!(&sniffed.decoded_body().unwrap()[..], b"payload");
    }

    #[test]
    fn json_parses_decoded_body() {
        #[derive(serde::Deserialize)]
        struct Body {
            ok: bool,
        }
        let resp = Response::new(200, vec![], Bytes::from_static(b"{\"ok\":true}"));
        let body: Body = resp.json().unwrap();
        assert!(body.ok);
    }
}
