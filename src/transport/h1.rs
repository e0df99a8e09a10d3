//! HTTP/1.1 over a raw stream.
//!
//! Requests are written byte-by-byte rather than through a header map so
//! header case and order survive onto the wire; responses are parsed
//! with httparse.

use bytes::Bytes;
use http::{Method, Uri};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::transport::connector::MaybeHttpsStream;

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_HEADER_COUNT: usize = 100;

/// A complete HTTP/1.1 exchange result.
#[derive(Debug, Clone)]
pub struct H1Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub version: String,
}

/// One HTTP/1.1 client connection.
pub struct H1Connection {
    stream: MaybeHttpsStream,
    should_close: bool,
}

impl H1Connection {
    pub fn new(stream: MaybeHttpsStream) -> Self {
        Self {
            stream,
            should_close: false,
        }
    }

    /// Whether the server asked for the connection to be closed.
    pub fn should_close(&self) -> bool {
        self.should_close
    }

    pub fn into_inner(self) -> MaybeHttpsStream {
        self.stream
    }

    /// Send a request and read its response.
    ///
    /// `header_order` sorts matching headers first (case-insensitive);
    /// remaining headers keep insertion order with their original case.
    pub async fn send_request(
        &mut self,
        method: &Method,
        uri: &Uri,
        headers: &[(String, String)],
        body: Option<Bytes>,
        header_order: Option<&[String]>,
    ) -> Result<H1Response> {
        let wire = build_request(method, uri, headers, body.as_ref(), header_order)?;
        self.stream
            .write_all(&wire)
            .await
            .map_err(|e| Error::network(format!("h1 request write failed: {e}")))?;
        if let Some(body) = &body {
            self.stream
                .write_all(body)
                .await
                .map_err(|e| Error::network(format!("h1 body write failed: {e}")))?;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| Error::network(format!("h1 flush failed: {e}")))?;
        self.read_response(method).await
    }

    async fn read_response(&mut self, method: &Method) -> Result<H1Response> {
        let mut buffer: Vec<u8> = Vec::with_capacity(8192);
        loop {
            // Accumulate until the header terminator is present.
            while find_header_end(&buffer).is_none() {
                if buffer.len() >= MAX_HEADER_BYTES {
                    return Err(Error::protocol("response headers too large"));
                }
                let mut chunk = vec![0u8; 8192];
                let n = self
                    .stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| Error::network(format!("h1 read failed: {e}")))?;
                if n == 0 {
                    return Err(Error::network("connection closed before response"));
                }
                buffer.extend_from_slice(&chunk[..n]);
            }

            let (response, head_len) = self.parse_response(&buffer, method).await?;

            // 1xx responses have no body; drop the head and keep
            // reading for the final response.
            if (100..200).contains(&response.status) {
                buffer.drain(..head_len);
                continue;
            }
            return Ok(response);
        }
    }

    async fn parse_response(
        &mut self,
        buffer: &[u8],
        method: &Method,
    ) -> Result<(H1Response, usize)> {
        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADER_COUNT];
        let mut parsed = httparse::Response::new(&mut header_storage);
        let head_len = match parsed
            .parse(buffer)
            .map_err(|e| Error::protocol(format!("bad response head: {e}")))?
        {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Err(Error::protocol("incomplete response head")),
        };

        let status = parsed
            .code
            .ok_or_else(|| Error::protocol("response missing status"))?;
        let version = format!("HTTP/1.{}", parsed.version.unwrap_or(1));
        let headers: Vec<(String, String)> = parsed
            .headers
            .iter()
            .filter(|h| !h.name.is_empty())
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect();

        if header_value(&headers, "connection")
            .map(|v| v.to_ascii_lowercase().contains("close"))
            .unwrap_or(false)
        {
            self.should_close = true;
        }

        // HEAD and 1xx/204/304 responses have no body (RFC 9112 §6).
        let has_body = !matches!(status, 100..=199 | 204 | 304) && *method != Method::HEAD;
        if !has_body {
            return Ok((
                H1Response {
                    status,
                    headers,
                    body: Bytes::new(),
                    version,
                },
                head_len,
            ));
        }

        let chunked = header_value(&headers, "transfer-encoding")
            .map(|v| {
                v.split(',')
                    .next_back()
                    .map(|s| s.trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        let content_length = if chunked {
            None
        } else {
            match header_value(&headers, "content-length") {
                Some(v) => Some(
                    v.trim()
                        .parse::<usize>()
                        .map_err(|_| Error::protocol("invalid Content-Length"))?,
                ),
                None => None,
            }
        };

        let mut rest = buffer[head_len..].to_vec();
        let body = if chunked {
            let (body, _) = self.read_chunked(&mut rest).await?;
            body
        } else if let Some(len) = content_length {
            while rest.len() < len {
                let mut chunk = vec![0u8; 8192];
                let n = self
                    .stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| Error::network(format!("h1 body read failed: {e}")))?;
                if n == 0 {
                    return Err(Error::network("connection closed mid-body"));
                }
                rest.extend_from_slice(&chunk[..n]);
            }
            Bytes::copy_from_slice(&rest[..len])
        } else {
            // No framing: read until EOF, connection is not reusable.
            self.should_close = true;
            loop {
                let mut chunk = vec![0u8; 8192];
                let n = self
                    .stream
                    .read(&mut chunk)
                    .await
                    .map_err(|e| Error::network(format!("h1 body read failed: {e}")))?;
                if n == 0 {
                    break;
                }
                rest.extend_from_slice(&chunk[..n]);
            }
            Bytes::from(rest)
        };

        Ok((
            H1Response {
                status,
                headers,
                body,
                version,
            },
            head_len,
        ))
    }

    /// Decode a chunked body from `rest`, reading more as needed.
    /// Returns the body and the number of bytes consumed from `rest`.
    async fn read_chunked(&mut self, rest: &mut Vec<u8>) -> Result<(Bytes, usize)> {
        let mut body = Vec::new();
        let mut pos = 0usize;
        loop {
            let line_end = loop {
                match find_crlf(&rest[pos..]) {
                    Some(i) => break pos + i,
                    None => self.fill(rest).await?,
                }
            };
            let size_line = std::str::from_utf8(&rest[pos..line_end])
                .map_err(|_| Error::protocol("bad chunk size line"))?;
            let size = usize::from_str_radix(size_line.split(';').next().unwrap_or("").trim(), 16)
                .map_err(|_| Error::protocol("bad chunk size"))?;
            pos = line_end + 2;

            while rest.len() < pos + size + 2 {
                self.fill(rest).await?;
            }
            if size == 0 {
                // Skip any trailer section up to the final CRLF.
                loop {
                    match find_crlf(&rest[pos..]) {
                        Some(0) => {
                            pos += 2;
                            return Ok((Bytes::from(body), pos));
                        }
                        Some(i) => pos += i + 2,
                        None => self.fill(rest).await?,
                    }
                }
            }
            body.extend_from_slice(&rest[pos..pos + size]);
            pos += size + 2; // chunk data + CRLF
        }
    }

    async fn fill(&mut self, rest: &mut Vec<u8>) -> Result<()> {
        let mut chunk = vec![0u8; 8192];
        let n = self
            .stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::network(format!("h1 body read failed: {e}")))?;
        if n == 0 {
            return Err(Error::network("connection closed mid-chunk"));
        }
        rest.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}

/// Serialize the request head. Host goes first; ordered headers follow.
fn build_request(
    method: &Method,
    uri: &Uri,
    headers: &[(String, String)],
    body: Option<&Bytes>,
    header_order: Option<&[String]>,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1024);
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    if *method == Method::CONNECT {
        let host = uri
            .host()
            .ok_or_else(|| Error::request("CONNECT requires a host"))?;
        out.extend_from_slice(host.as_bytes());
        out.push(b':');
        out.extend_from_slice(uri.port_u16().unwrap_or(443).to_string().as_bytes());
    } else if *method == Method::OPTIONS && uri.path() == "*" {
        out.push(b'*');
    } else {
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        out.extend_from_slice(path.as_bytes());
    }
    out.extend_from_slice(b" HTTP/1.1\r\n");

    out.extend_from_slice(b"Host: ");
    if let Some(host) = uri.host() {
        out.extend_from_slice(host.as_bytes());
        if let Some(port) = uri.port() {
            out.push(b':');
            out.extend_from_slice(port.as_str().as_bytes());
        }
    }
    out.extend_from_slice(b"\r\n");

    let ordered = apply_header_order(headers, header_order);
    let mut has_connection = false;
    let mut has_content_length = false;
    let mut has_transfer_encoding = false;
    for (name, value) in &ordered {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        if name.eq_ignore_ascii_case("connection") {
            has_connection = true;
        }
        if name.eq_ignore_ascii_case("content-length") {
            has_content_length = true;
        }
        if name.eq_ignore_ascii_case("transfer-encoding") {
            has_transfer_encoding = true;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !has_connection {
        out.extend_from_slice(b"Connection: keep-alive\r\n");
    }
    if let Some(body) = body {
        if !has_content_length && !has_transfer_encoding {
            out.extend_from_slice(b"Content-Length: ");
            out.extend_from_slice(body.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

/// Sort matching headers first (order-list order), preserving case.
fn apply_header_order(
    headers: &[(String, String)],
    order: Option<&[String]>,
) -> Vec<(String, String)> {
    let Some(order) = order else {
        return headers.to_vec();
    };
    let mut out = Vec::with_capacity(headers.len());
    let mut taken = vec![false; headers.len()];
    for key in order {
        for (i, (name, _)) in headers.iter().enumerate() {
            if !taken[i] && name.eq_ignore_ascii_case(key) {
                taken[i] = true;
                out.push(headers[i].clone());
            }
        }
    }
    for (i, header) in headers.iter().enumerate() {
        if !taken[i] {
            out.push(header.clone());
        }
    }
    out
}

/// Cloneable pooled HTTP/1.1 connection: one request at a time.
#[derive(Clone)]
pub struct H1PooledConnection {
    inner: std::sync::Arc<tokio::sync::Mutex<H1Connection>>,
    busy: std::sync::Arc<std::sync::atomic::AtomicBool>,
    dead: std::sync::Arc<std::sync::atomic::AtomicBool>,
    last_used: std::sync::Arc<std::sync::Mutex<std::time::Instant>>,
    tls: Option<std::sync::Arc<crate::tls::TlsState>>,
}

impl H1PooledConnection {
    pub fn new(conn: H1Connection, tls: Option<crate::tls::TlsState>) -> Self {
        Self {
            inner: std::sync::Arc::new(tokio::sync::Mutex::new(conn)),
            busy: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            dead: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            last_used: std::sync::Arc::new(std::sync::Mutex::new(std::time::Instant::now())),
            tls: tls.map(std::sync::Arc::new),
        }
    }

    pub fn tls_state(&self) -> Option<crate::tls::TlsState> {
        self.tls.as_deref().cloned()
    }

    /// Exclusive reservation: HTTP/1.1 cannot multiplex.
    pub fn reserve_new_request(&self) -> bool {
        use std::sync::atomic::Ordering;
        if self.dead.load(Ordering::Acquire) {
            return false;
        }
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        use std::sync::atomic::Ordering;
        self.busy.store(false, Ordering::Release);
        if let Ok(mut t) = self.last_used.lock() {
            *t = std::time::Instant::now();
        }
    }

    pub fn mark_dead(&self) {
        self.dead
            .store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn in_flight(&self) -> u32 {
        u32::from(self.busy.load(std::sync::atomic::Ordering::Acquire))
    }

    pub fn last_used(&self) -> std::time::Instant {
        self.last_used
            .lock()
            .map(|t| *t)
            .unwrap_or_else(|_| std::time::Instant::now())
    }

    /// Send a request; the caller must hold the reservation. A protocol
    /// or transport failure, or a `Connection: close` response, retires
    /// the connection.
    pub async fn send_request(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &[(String, String)],
        body: Option<Bytes>,
        header_order: Option<&[String]>,
    ) -> Result<H1Response> {
        let mut conn = self.inner.lock().await;
        let result = conn
            .send_request(method, uri, headers, body, header_order)
            .await;
        if result.is_err() || conn.should_close() {
            self.mark_dead();
        }
        result
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_origin_form() {
        let uri: Uri = "https://example.com/a/b?q=1".parse().unwrap();
        let wire = build_request(&Method::GET, &uri, &[], None, None).unwrap();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("GET /a/b?q=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn header_case_and_order_preserved() {
        let uri: Uri = "http://h/".parse().unwrap();
        let headers = vec![
            ("X-First".to_string(), "1".to_string()),
            ("User-Agent".to_string(), "ua".to_string()),
        ];
        let wire = build_request(&Method::GET, &uri, &headers, None, None).unwrap();
        let text = String::from_utf8(wire).unwrap();
        let first = text.find("X-First: 1").unwrap();
        let second = text.find("User-Agent: ua").unwrap();
        assert!(first < second);
    }

    #[test]
    fn header_order_list_applies() {
        let uri: Uri = "http://h/".parse().unwrap();
        let headers = vec![
            ("b-header".to_string(), "2".to_string()),
            ("a-header".to_string(), "1".to_string()),
        ];
        let order = vec!["a-header".to_string()];
        let wire = build_request(&Method::GET, &uri, &headers, None, Some(&order)).unwrap();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.find("a-header: 1").unwrap() < text.find("b-header: 2").unwrap());
    }

    #[test]
    fn content_length_added_for_body() {
        let uri: Uri = "http://h/".parse().unwrap();
        let body = Bytes::from_static(b"hello");
        let wire = build_request(&Method::POST, &uri, &[], Some(&body), None).unwrap();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
    }

    #[test]
    fn connect_uses_authority_form() {
        let uri: Uri = "https://example.com:8443/ignored".parse().unwrap();
        let wire = build_request(&Method::CONNECT, &uri, &[], None, None).unwrap();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("CONNECT example.com:8443 HTTP/1.1\r\n"));
    }
}
