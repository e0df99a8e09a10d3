//! HTTP/3 over QUIC: single-destination client, frame/QPACK codecs,
//! datagram multiplexing.

pub mod conn;
pub mod frame;
pub mod qpack;
pub mod varint;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::Uri;
use tokio::sync::Mutex;

pub use conn::{Datagrammer, H3Config, H3Connection, H3Response, H3State, METHOD_GET_0RTT, METHOD_HEAD_0RTT};
pub use frame::{error_code, H3Settings};

use crate::error::{Error, Result};
use crate::fingerprint::h2spec::PseudoHeader;
use crate::transport::h2::hpack::order_regular_headers;

/// Default request-stream concurrency assumed before the peer's
/// transport parameters are known.
const DEFAULT_MAX_STREAMS: u32 = 100;

/// Cloneable single-destination HTTP/3 client, poolable alongside H2
/// connections.
#[derive(Clone)]
pub struct H3Client {
    inner: Arc<Mutex<H3Connection>>,
    pseudo_order: Arc<Vec<PseudoHeader>>,
    header_order: Option<Arc<Vec<String>>>,
    in_flight: Arc<AtomicU32>,
    dead: Arc<AtomicBool>,
    last_used: Arc<std::sync::Mutex<Instant>>,
}

impl H3Client {
    /// Dial a destination and wrap the connection.
    pub async fn connect(
        host: &str,
        port: u16,
        server_name: &str,
        config: H3Config,
        pseudo_order: Vec<PseudoHeader>,
        header_order: Option<Vec<String>>,
    ) -> Result<Self> {
        let conn = H3Connection::dial(host, port, server_name, config).await?;
        Ok(Self {
            inner: Arc::new(Mutex::new(conn)),
            pseudo_order: Arc::new(pseudo_order),
            header_order: header_order.map(Arc::new),
            in_flight: Arc::new(AtomicU32::new(0)),
            dead: Arc::new(AtomicBool::new(false)),
            last_used: Arc::new(std::sync::Mutex::new(Instant::now())),
        })
    }

    /// Try to reserve a request slot.
    pub fn reserve_new_request(&self) -> bool {
        if self.dead.load(Ordering::Acquire) {
            return false;
        }
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= DEFAULT_MAX_STREAMS {
                return false;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if let Ok(mut t) = self.last_used.lock() {
            *t = Instant::now();
        }
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
            .lock()
            .map(|t| *t)
            .unwrap_or_else(|_| Instant::now())
    }

    /// Send a request. `protocol` carries the `:protocol` pseudo-header
    /// of an Extended CONNECT request.
    pub async fn send_request(
        &self,
        method: &str,
        uri: &Uri,
        headers: &[(String, String)],
        body: Option<Bytes>,
        protocol: Option<&str>,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<H3Response> {
        let fields = self.build_fields(method, uri, headers, protocol)?;
        let is_extended_connect = protocol.is_some();
        let mut conn = self.inner.lock().await;
        let result = conn
            .round_trip(method, fields, body, is_extended_connect, deadline)
            .await;
        if conn.is_closed() {
            self.mark_dead();
        }
        drop(conn);
        if let Err(err) = &result {
            if !matches!(err.kind(), crate::error::ErrorKind::Request) {
                self.mark_dead();
            }
        }
        result
    }

    /// Send an HTTP datagram associated with an open request stream.
    pub async fn send_datagram(&self, stream_id: u64, payload: &[u8]) -> Result<()> {
        self.inner.lock().await.send_datagram(stream_id, payload).await
    }

    /// Close the connection with `H3_NO_ERROR`.
    pub async fn shutdown(&self) {
        self.mark_dead();
        self.inner
            .lock()
            .await
            .close(error_code::H3_NO_ERROR, "client shutdown")
            .await;
    }

    fn build_fields(
        &self,
        method: &str,
        uri: &Uri,
        headers: &[(String, String)],
        protocol: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| Error::request("request URI has no authority"))?;
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let scheme = uri.scheme_str().unwrap_or("https").to_string();
        let wire_method = match method {
            METHOD_GET_0RTT => "GET",
            METHOD_HEAD_0RTT => "HEAD",
            other => other,
        };

        // Plain CONNECT omits :scheme and :path (RFC 9114 §4.4);
        // Extended CONNECT keeps them and adds :protocol.
        let plain_connect = wire_method == "CONNECT" && protocol.is_none();
        let mut fields = Vec::with_capacity(self.pseudo_order.len() + headers.len() + 1);
        for pseudo in self.pseudo_order.iter() {
            let (name, value) = match pseudo {
                PseudoHeader::Method => (":method", wire_method.to_string()),
                PseudoHeader::Authority => (":authority", authority.clone()),
                PseudoHeader::Scheme if plain_connect => continue,
                PseudoHeader::Scheme => (":scheme", scheme.clone()),
                PseudoHeader::Path if plain_connect => continue,
                PseudoHeader::Path => (":path", path.clone()),
            };
            fields.push((name.to_string(), value));
        }
        if let Some(protocol) = protocol {
            fields.push((":protocol".to_string(), protocol.to_string()));
        }
        for field in order_regular_headers(headers, self.header_order.as_deref().map(|v| &v[..])) {
            fields.push(field);
        }
        Ok(fields)
    }
}
