//! Shaped HTTP/2: frame codec, HPACK with configurable ordering, and
//! the client connection whose preamble and HEADERS match a configured
//! [`H2Spec`](crate::fingerprint::H2Spec).

pub mod connection;
pub mod frame;
pub mod hpack;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{Method, Uri};
use tokio::sync::Mutex;

pub use connection::{H2Connection, H2Response, PeerSettings};
pub use frame::{H2ErrorCode, CONNECTION_PREFACE};
pub use hpack::{HpackDecoder, HpackEncoder};

use crate::error::Result;
use crate::transport::connector::MaybeHttpsStream;

/// Shared per-connection accounting used by the pool.
#[derive(Debug)]
pub struct ConnState {
    in_flight: AtomicU32,
    max_concurrent: AtomicU32,
    dead: AtomicBool,
    last_used: std::sync::Mutex<Instant>,
}

impl ConnState {
    fn new() -> Self {
        Self {
            in_flight: AtomicU32::new(0),
            max_concurrent: AtomicU32::new(u32::MAX),
            dead: AtomicBool::new(false),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }
}

/// Cloneable handle to a pooled HTTP/2 connection.
///
/// Requests serialize on the inner connection; the reserve counter keeps
/// the pool from over-committing a connection past the peer's
/// max-concurrent-streams.
#[derive(Clone)]
pub struct H2PooledConnection {
    inner: Arc<Mutex<H2Connection<MaybeHttpsStream>>>,
    state: Arc<ConnState>,
    tls: Option<Arc<crate::tls::TlsState>>,
}

impl H2PooledConnection {
    pub fn new(conn: H2Connection<MaybeHttpsStream>, tls: Option<crate::tls::TlsState>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
            state: Arc::new(ConnState::new()),
            tls: tls.map(Arc::new),
        }
    }

    /// TLS state captured at dial time.
    pub fn tls_state(&self) -> Option<crate::tls::TlsState> {
        self.tls.as_deref().cloned()
    }

    /// Try to reserve a stream slot. Fails when the connection is dead
    /// or at the peer's concurrency limit.
    pub fn reserve_new_request(&self) -> bool {
        if self.state.dead.load(Ordering::Acquire) {
            return false;
        }
        let limit = self.state.max_concurrent.load(Ordering::Acquire);
        let mut current = self.state.in_flight.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return false;
            }
            match self.state.in_flight.compare_exchange_weak(
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

    /// Release a slot taken by [`reserve_new_request`].
    pub fn release(&self) {
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
        if let Ok(mut t) = self.state.last_used.lock() {
            *t = Instant::now();
        }
    }

    /// Mark this connection unusable; it is never handed out again.
    pub fn mark_dead(&self) {
        self.state.dead.store(true, Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.state.dead.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> u32 {
        self.state.in_flight.load(Ordering::Acquire)
    }

    pub fn last_used(&self) -> Instant {
        self.state
            .last_used
            .lock()
            .map(|t| *t)
            .unwrap_or_else(|_| Instant::now())
    }

    /// Send a request on this connection. The caller must hold a
    /// reservation. A transport failure marks the connection dead; a
    /// deadline expiry cancels the in-flight stream with CANCEL.
    pub async fn send_request(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &[(String, String)],
        body: Option<Bytes>,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<H2Response> {
        let mut conn = self.inner.lock().await;
        let result = match deadline {
            Some(limit) => {
                match tokio::time::timeout_at(limit, conn.send_request(method, uri, headers, body))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        if let Some(stream_id) = conn.last_stream_id() {
                            let _ = conn.cancel_stream(stream_id).await;
                        }
                        // Response state for the stream is unknown now.
                        self.mark_dead();
                        return Err(crate::error::Error::DeadlineExceeded(
                            "h2 request deadline".into(),
                        ));
                    }
                }
            }
            None => conn.send_request(method, uri, headers, body).await,
        };
        self.state.max_concurrent.store(
            conn.peer_settings().max_concurrent_streams,
            Ordering::Release,
        );
        if conn.is_closing() {
            self.mark_dead();
        }
        if result.is_err() {
            self.mark_dead();
        }
        result
    }
}
