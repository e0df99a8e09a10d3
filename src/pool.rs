//! Connection pool for HTTP/2 and HTTP/3 connections.
//!
//! Keyed by `host:port`. Concurrent requests for the same key coalesce
//! onto a single in-flight dial; a dial killed by a sibling request's
//! cancellation is retried by the surviving requests. The pool mutex is
//! held only across constant-time map operations, never across a dial.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::h1::H1PooledConnection;
use crate::transport::h2::H2PooledConnection;
use crate::transport::h3::H3Client;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// A poolable protocol connection.
#[derive(Clone)]
pub enum PooledConn {
    H1(H1PooledConnection),
    H2(H2PooledConnection),
    H3(H3Client),
}

impl PooledConn {
    pub fn reserve_new_request(&self) -> bool {
        match self {
            Self::H1(c) => c.reserve_new_request(),
            Self::H2(c) => c.reserve_new_request(),
            Self::H3(c) => c.reserve_new_request(),
        }
    }

    pub fn release(&self) {
        match self {
            Self::H1(c) => c.release(),
            Self::H2(c) => c.release(),
            Self::H3(c) => c.release(),
        }
    }

    pub fn mark_dead(&self) {
        match self {
            Self::H1(c) => c.mark_dead(),
            Self::H2(c) => c.mark_dead(),
            Self::H3(c) => c.mark_dead(),
        }
    }

    pub fn is_dead(&self) -> bool {
        match self {
            Self::H1(c) => c.is_dead(),
            Self::H2(c) => c.is_dead(),
            Self::H3(c) => c.is_dead(),
        }
    }

    pub fn in_flight(&self) -> u32 {
        match self {
            Self::H1(c) => c.in_flight(),
            Self::H2(c) => c.in_flight(),
            Self::H3(c) => c.in_flight(),
        }
    }

    pub fn last_used(&self) -> Instant {
        match self {
            Self::H1(c) => c.last_used(),
            Self::H2(c) => c.last_used(),
            Self::H3(c) => c.last_used(),
        }
    }
}

/// A pool entry: connection plus its pool-wide identity.
#[derive(Clone)]
pub struct PoolEntry {
    pub id: u64,
    pub conn: PooledConn,
}

impl PoolEntry {
    pub fn new(conn: PooledConn) -> Self {
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            conn,
        }
    }
}

type DialOutcome = Option<std::result::Result<PoolEntry, Arc<Error>>>;

/// One in-flight dial shared by all waiters for a key.
struct DialCall {
    /// Identity of the request context that started the dial.
    ctx_id: u64,
    rx: watch::Receiver<DialOutcome>,
}

#[derive(Default)]
struct PoolInner {
    conns: HashMap<String, Vec<PoolEntry>>,
    dialing: HashMap<String, Arc<DialCall>>,
    /// Reverse index: connection id → keys it is registered under.
    keys: HashMap<u64, Vec<String>>,
}

/// Shared connection pool.
#[derive(Clone, Default)]
pub struct ConnPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl ConnPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a connection for `key`, with a reservation already taken.
    ///
    /// `ctx_id` identifies the calling request; it decides whether a
    /// dial canceled by a sibling should be retried. `dial` is invoked
    /// at most once per started dial and runs detached so siblings can
    /// share its outcome.
    pub async fn get_conn<F, Fut>(&self, key: &str, ctx_id: u64, dial: F) -> Result<PoolEntry>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<PooledConn>> + Send + 'static,
    {
        loop {
            let call = {
                let mut inner = self.inner.lock().expect("pool lock poisoned");
                if let Some(entries) = inner.conns.get(key) {
                    if let Some(entry) = entries.iter().find(|e| e.conn.reserve_new_request()) {
                        return Ok(entry.clone());
                    }
                }
                match inner.dialing.get(key) {
                    Some(call) => Arc::clone(call),
                    None => {
                        let call = self.start_dial(&mut inner, key, ctx_id, dial());
                        call
                    }
                }
            };

            let mut rx = call.rx.clone();
            let outcome = loop {
                if let Some(outcome) = rx.borrow().clone() {
                    break outcome;
                }
                if rx.changed().await.is_err() {
                    return Err(Error::network("dial task dropped"));
                }
            };

            match outcome {
                Ok(entry) => {
                    if entry.conn.reserve_new_request() {
                        return Ok(entry);
                    }
                    // Full already; rescan.
                    continue;
                }
                Err(err) => {
                    if Self::should_retry_dial(&err, call.ctx_id, ctx_id) {
                        debug!(key, "shared dial canceled by sibling, retrying");
                        continue;
                    }
                    return Err(clone_error(&err));
                }
            }
        }
    }

    /// Register a dial started outside the single-flight path (e.g. a
    /// forced-fresh connection that turned out to be poolable).
    pub fn add_conn(&self, key: &str, entry: PoolEntry) {
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        Self::add_conn_locked(&mut inner, key, entry);
    }

    /// Remove a connection from every key, atomically.
    pub fn mark_dead(&self, entry: &PoolEntry) {
        entry.conn.mark_dead();
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let Some(keys) = inner.keys.remove(&entry.id) else {
            return;
        };
        for key in keys {
            if let Some(list) = inner.conns.get_mut(&key) {
                list.retain(|e| e.id != entry.id);
                if list.is_empty() {
                    inner.conns.remove(&key);
                }
            }
        }
    }

    /// Close every connection with no in-flight streams.
    pub fn close_idle(&self) {
        let idle: Vec<PoolEntry> = {
            let inner = self.inner.lock().expect("pool lock poisoned");
            inner
                .conns
                .values()
                .flatten()
                .filter(|e| e.conn.in_flight() == 0)
                .cloned()
                .collect()
        };
        for entry in idle {
            self.mark_dead(&entry);
        }
    }

    /// Number of live connections for a key. Test and introspection aid.
    pub fn len(&self, key: &str) -> usize {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner.conns.get(key).map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().expect("pool lock poisoned");
        inner.conns.is_empty()
    }

    fn start_dial<Fut>(
        &self,
        inner: &mut PoolInner,
        key: &str,
        ctx_id: u64,
        fut: Fut,
    ) -> Arc<DialCall>
    where
        Fut: Future<Output = Result<PooledConn>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let call = Arc::new(DialCall { ctx_id, rx });
        inner.dialing.insert(key.to_string(), Arc::clone(&call));

        let pool = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let result = fut.await;
            let outcome = {
                let mut inner = pool.inner.lock().expect("pool lock poisoned");
                inner.dialing.remove(&key);
                match result {
                    Ok(conn) => {
                        let entry = PoolEntry::new(conn);
                        Self::add_conn_locked(&mut inner, &key, entry.clone());
                        Ok(entry)
                    }
                    Err(err) => Err(Arc::new(err)),
                }
            };
            let _ = tx.send(Some(outcome));
        });
        call
    }

    fn add_conn_locked(inner: &mut PoolInner, key: &str, entry: PoolEntry) {
        inner
            .keys
            .entry(entry.id)
            .or_default()
            .push(key.to_string());
        inner.conns.entry(key.to_string()).or_default().push(entry);
    }

    /// A dial killed by cancellation is retried only when the canceled
    /// context was a sibling's, not the current request's own.
    fn should_retry_dial(err: &Error, dial_ctx: u64, req_ctx: u64) -> bool {
        if dial_ctx == req_ctx {
            return false;
        }
        err.is_canceled() || err.is_deadline_exceeded()
    }
}

/// Rebuild an error from a shared dial failure, preserving its kind.
fn clone_error(err: &Error) -> Error {
    match err {
        Error::Canceled(m) => Error::Canceled(m.clone()),
        Error::DeadlineExceeded(m) => Error::DeadlineExceeded(m.clone()),
        Error::Config(m) => Error::Config(m.clone()),
        Error::Tls(m) => Error::Tls(m.clone()),
        Error::Protocol(m) => Error::Protocol(m.clone()),
        Error::Request(m) => Error::Request(m.clone()),
        Error::Auth(m) => Error::Auth(m.clone()),
        other => Error::network(other.to_string()),
    }
}

/// Pool key for a request URI.
pub fn pool_key(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}
