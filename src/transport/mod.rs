//! Protocol selection and request emission.
//!
//! Selection precedence: force flag, then ALPN outcome, then default.
//! Connections are acquired through the shared pool; dials coalesce
//! per destination.

pub mod connector;
pub mod h1;
pub mod h2;
pub mod h3;

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http::{Method, Uri};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fingerprint::h2spec::H2Spec;
use crate::pool::{pool_key, ConnPool, PoolEntry, PooledConn};
use crate::tls::{Handshaker, TlsState};
use crate::version::HttpVersion;

use connector::Dialer;
use h1::{H1Connection, H1PooledConnection};
use h2::{H2Connection, H2PooledConnection};
use h3::{H3Client, H3Config};

static NEXT_CTX_ID: AtomicU64 = AtomicU64::new(1);

/// Protocol-agnostic response handed up to the dispatcher.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub trailers: Vec<(String, String)>,
    pub body: Bytes,
    pub protocol: &'static str,
    pub tls: Option<TlsState>,
}

/// Dispatches requests over H1/H2/H3 with fingerprint shaping.
pub struct Transport {
    pub dialer: Dialer,
    pub handshaker: Handshaker,
    pub h2_spec: H2Spec,
    pub h3_config: H3Config,
    /// Client-wide regular-header order (lowercase names).
    pub header_order: Option<Vec<String>>,
    /// Default protocol selection.
    pub version: HttpVersion,
    /// Hosts always contacted over HTTP/3.
    pub h3_hosts: Vec<String>,
    pub allow_get_method_payload: bool,
    pool: ConnPool,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            dialer: Dialer::default(),
            handshaker: Handshaker::default(),
            h2_spec: H2Spec::default(),
            h3_config: H3Config::default(),
            header_order: None,
            version: HttpVersion::Auto,
            h3_hosts: Vec::new(),
            allow_get_method_payload: true,
            pool: ConnPool::new(),
        }
    }

    /// Deep clone: configuration is copied, the pool starts empty.
    pub fn deep_clone(&self) -> Self {
        Self {
            dialer: self.dialer.clone(),
            handshaker: self.handshaker.clone(),
            h2_spec: self.h2_spec.clone(),
            h3_config: self.h3_config.clone(),
            header_order: self.header_order.clone(),
            version: self.version,
            h3_hosts: self.h3_hosts.clone(),
            allow_get_method_payload: self.allow_get_method_payload,
            pool: ConnPool::new(),
        }
    }

    pub fn pool(&self) -> &ConnPool {
        &self.pool
    }

    /// Close pooled connections with no in-flight streams.
    pub fn close_idle_connections(&self) {
        self.pool.close_idle();
    }

    fn is_payload_forbidden(&self, method: &Method) -> bool {
        (*method == Method::GET && !self.allow_get_method_payload)
            || *method == Method::HEAD
            || *method == Method::OPTIONS
    }

    /// Emit one request and collect its response.
    pub async fn round_trip(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &[(String, String)],
        body: Option<Bytes>,
        version_override: Option<HttpVersion>,
        deadline: Option<Instant>,
    ) -> Result<TransportResponse> {
        if body.as_ref().map(|b| !b.is_empty()).unwrap_or(false)
            && self.is_payload_forbidden(method)
        {
            return Err(Error::request(format!(
                "method {method} does not allow a request body"
            )));
        }

        let host = uri
            .host()
            .ok_or_else(|| Error::request("request URI has no host"))?
            .to_string();
        let is_https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if is_https { 443 } else { 80 });
        let key = pool_key(&host, port);

        let version = version_override.unwrap_or(self.version);
        let force_h3 = version.is_h3() || self.h3_hosts.iter().any(|h| h == &host);
        let ctx_id = NEXT_CTX_ID.fetch_add(1, Ordering::Relaxed);

        // A request that demands a fresh connection bypasses the pool.
        let fresh = headers
            .iter()
            .any(|(n, v)| n.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"));

        if force_h3 {
            if !is_https {
                return Err(Error::request("HTTP/3 requires an https URL"));
            }
            let entry = if fresh {
                let conn = self.dial_h3(&host, port).await?;
                let entry = PoolEntry::new(conn);
                if !entry.conn.reserve_new_request() {
                    return Err(Error::network("fresh h3 connection unusable"));
                }
                entry
            } else {
                let host = host.clone();
                let this = self.snapshot_h3();
                self.pool
                    .get_conn(&key, ctx_id, move || {
                        let host = host.clone();
                        let this = this.clone();
                        async move { this.dial(&host, port).await }
                    })
                    .await?
            };
            return self.send_h3(entry, method, uri, headers, body, deadline).await;
        }

        let entry = if fresh {
            let conn = self.dial_tcp_tls(uri, version).await?;
            let entry = PoolEntry::new(conn);
            if !entry.conn.reserve_new_request() {
                return Err(Error::network("fresh connection unusable"));
            }
            entry
        } else {
            let dial_snapshot = self.snapshot_tcp(version);
            let dial_uri = uri.clone();
            self.pool
                .get_conn(&key, ctx_id, move || {
                    let this = dial_snapshot.clone();
                    let uri = dial_uri.clone();
                    async move { this.dial(&uri).await }
                })
                .await?
        };

        match &entry.conn {
            PooledConn::H2(_) => self.send_h2(entry, method, uri, headers, body, deadline).await,
            PooledConn::H1(_) => self.send_h1(entry, method, uri, headers, body, deadline).await,
            PooledConn::H3(_) => self.send_h3(entry, method, uri, headers, body, deadline).await,
        }
    }

    async fn send_h2(
        &self,
        entry: PoolEntry,
        method: &Method,
        uri: &Uri,
        headers: &[(String, String)],
        body: Option<Bytes>,
        deadline: Option<Instant>,
    ) -> Result<TransportResponse> {
        let PooledConn::H2(conn) = &entry.conn else {
            unreachable!("send_h2 called with non-h2 entry");
        };
        let result = conn.send_request(method, uri, headers, body, deadline).await;
        let tls = conn.tls_state();
        entry.conn.release();
        match result {
            Ok(resp) => Ok(TransportResponse {
                status: resp.status,
                headers: resp.headers,
                trailers: resp.trailers,
                body: resp.body,
                protocol: "HTTP/2",
                tls,
            }),
            Err(err) => {
                self.pool.mark_dead(&entry);
                Err(err)
            }
        }
    }

    async fn send_h1(
        &self,
        entry: PoolEntry,
        method: &Method,
        uri: &Uri,
        headers: &[(String, String)],
        body: Option<Bytes>,
        deadline: Option<Instant>,
    ) -> Result<TransportResponse> {
        let PooledConn::H1(conn) = &entry.conn else {
            unreachable!("send_h1 called with non-h1 entry");
        };
        let fut = conn.send_request(method, uri, headers, body, self.header_order.as_deref());
        let result = match deadline {
            Some(d) => match tokio::time::timeout_at(d, fut).await {
                Ok(r) => r,
                Err(_) => {
                    self.pool.mark_dead(&entry);
                    entry.conn.release();
                    return Err(Error::DeadlineExceeded("h1 request deadline".into()));
                }
            },
            None => fut.await,
        };
        let tls = conn.tls_state();
        let retired = conn.is_dead();
        entry.conn.release();
        if retired {
            self.pool.mark_dead(&entry);
        }
        match result {
            Ok(resp) => Ok(TransportResponse {
                status: resp.status,
                headers: resp.headers,
                trailers: Vec::new(),
                body: resp.body,
                protocol: "HTTP/1.1",
                tls,
            }),
            Err(err) => Err(err),
        }
    }

    async fn send_h3(
        &self,
        entry: PoolEntry,
        method: &Method,
        uri: &Uri,
        headers: &[(String, String)],
        body: Option<Bytes>,
        deadline: Option<Instant>,
    ) -> Result<TransportResponse> {
        let PooledConn::H3(conn) = &entry.conn else {
            unreachable!("send_h3 called with non-h3 entry");
        };
        let result = conn
            .send_request(method.as_str(), uri, headers, body, None, deadline)
            .await;
        entry.conn.release();
        match result {
            Ok(resp) => Ok(TransportResponse {
                status: resp.status,
                headers: resp.headers,
                trailers: resp.trailers,
                body: resp.body,
                protocol: "HTTP/3",
                tls: None,
            }),
            Err(err) => {
                if entry.conn.is_dead() {
                    self.pool.mark_dead(&entry);
                }
                Err(err)
            }
        }
    }

    async fn dial_h3(&self, host: &str, port: u16) -> Result<PooledConn> {
        self.snapshot_h3().dial(host, port).await
    }

    async fn dial_tcp_tls(&self, uri: &Uri, version: HttpVersion) -> Result<PooledConn> {
        self.snapshot_tcp(version).dial(uri).await
    }

    fn snapshot_h3(&self) -> H3DialSnapshot {
        H3DialSnapshot {
            config: self.h3_config.clone(),
            pseudo_order: self.h2_spec.pseudo_order.clone(),
            header_order: self.header_order.clone(),
        }
    }

    fn snapshot_tcp(&self, version: HttpVersion) -> TcpDialSnapshot {
        let mut handshaker = self.handshaker.clone();
        handshaker.options_mut().alpn_protos = version.alpn_protos().to_vec();
        TcpDialSnapshot {
            dialer: self.dialer.clone(),
            handshaker,
            h2_spec: self.h2_spec.clone(),
            header_order: self.header_order.clone(),
            version,
        }
    }
}

/// Owned state captured by an H3 dial closure.
#[derive(Clone)]
struct H3DialSnapshot {
    config: H3Config,
    pseudo_order: Vec<crate::fingerprint::h2spec::PseudoHeader>,
    header_order: Option<Vec<String>>,
}

impl H3DialSnapshot {
    async fn dial(&self, host: &str, port: u16) -> Result<PooledConn> {
        let client = H3Client::connect(
            host,
            port,
            host,
            self.config.clone(),
            self.pseudo_order.clone(),
            self.header_order.clone(),
        )
        .await?;
        Ok(PooledConn::H3(client))
    }
}

/// Owned state captured by a TCP+TLS dial closure.
#[derive(Clone)]
struct TcpDialSnapshot {
    dialer: Dialer,
    handshaker: Handshaker,
    h2_spec: H2Spec,
    header_order: Option<Vec<String>>,
    version: HttpVersion,
}

impl TcpDialSnapshot {
    async fn dial(&self, uri: &Uri) -> Result<PooledConn> {
        let (stream, tls) = self.dialer.dial(uri, &self.handshaker).await?;
        let alpn = stream.alpn_protocol();
        let use_h2 = match self.version {
            HttpVersion::ForceHttp1 => false,
            HttpVersion::ForceHttp2 => {
                if alpn.as_deref() != Some("h2") {
                    return Err(Error::tls(format!(
                        "server refused h2 via ALPN (got {alpn:?})"
                    )));
                }
                true
            }
            _ => alpn.as_deref() == Some("h2"),
        };
        debug!(?alpn, use_h2, "transport dialed");
        if use_h2 {
            let conn =
                H2Connection::handshake(stream, self.h2_spec.clone(), self.header_order.clone())
                    .await?;
            Ok(PooledConn::H2(H2PooledConnection::new(conn, tls)))
        } else {
            Ok(PooledConn::H1(H1PooledConnection::new(
                H1Connection::new(stream),
                tls,
            )))
        }
    }
}
