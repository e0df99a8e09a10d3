//! Pool behavior: single-flight dialing, dead-connection eviction,
//! idle close.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use mimic::fingerprint::H2Spec;
use mimic::pool::{ConnPool, PooledConn};
use mimic::transport::connector::MaybeHttpsStream;
use mimic::transport::h2::{H2Connection, H2PooledConnection};

/// TCP sink that keeps accepted sockets open and discards input.
async fn start_sink() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

async fn dial_h2(addr: std::net::SocketAddr) -> mimic::Result<PooledConn> {
    let tcp = tokio::net::TcpStream::connect(addr)
        .await
        .map_err(|e| mimic::Error::network(e.to_string()))?;
    let conn = H2Connection::handshake(MaybeHttpsStream::Http(tcp), H2Spec::default(), None).await?;
    Ok(PooledConn::H2(H2PooledConnection::new(conn, None)))
}

#[tokio::test]
async fn concurrent_requests_share_one_dial() {
    let addr = start_sink().await;
    let pool = ConnPool::new();
    let dials = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for ctx_id in 1..=4u64 {
        let pool = pool.clone();
        let dials = Arc::clone(&dials);
        handles.push(tokio::spawn(async move {
            pool.get_conn("sink:0", ctx_id, move || {
                let dials = Arc::clone(&dials);
                async move {
                    dials.fetch_add(1, Ordering::SeqCst);
                    // Stretch the dial so all callers overlap it.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    dial_h2(addr).await
                }
            })
            .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let entry = handle.await.unwrap().unwrap();
        ids.push(entry.id);
        entry.conn.release();
    }
    assert_eq!(dials.load(Ordering::SeqCst), 1, "dials must coalesce");
    assert!(ids.windows(2).all(|w| w[0] == w[1]), "same connection shared");
    assert_eq!(pool.len("sink:0"), 1);
}

#[tokio::test]
async fn marked_dead_connections_are_never_handed_out() {
    let addr = start_sink().await;
    let pool = ConnPool::new();
    let dials = Arc::new(AtomicU32::new(0));

    let dial = {
        let dials = Arc::clone(&dials);
        move || {
            let dials = Arc::clone(&dials);
            async move {
                dials.fetch_add(1, Ordering::SeqCst);
                dial_h2(addr).await
            }
        }
    };

    let first = pool.get_conn("k", 1, dial.clone()).await.unwrap();
    first.conn.release();
    pool.mark_dead(&first);
    assert_eq!(pool.len("k"), 0);

    let second = pool.get_conn("k", 2, dial).await.unwrap();
    second.conn.release();
    assert_ne!(first.id, second.id);
    assert_eq!(dials.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn close_idle_removes_unused_connections() {
    let addr = start_sink().await;
    let pool = ConnPool::new();

    let entry = pool
        .get_conn("k", 1, move || async move { dial_h2(addr).await })
        .await
        .unwrap();
    // Still reserved: close_idle must not touch it.
    pool.close_idle();
    assert_eq!(pool.len("k"), 1);

    entry.conn.release();
    pool.close_idle();
    assert_eq!(pool.len("k"), 0);
}

#[tokio::test]
async fn sibling_cancellation_retries_the_dial() {
    let addr = start_sink().await;
    let pool = ConnPool::new();
    let dials = Arc::new(AtomicU32::new(0));

    let dial = {
        let dials = Arc::clone(&dials);
        move || {
            let dials = Arc::clone(&dials);
            async move {
                let n = dials.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                if n == 0 {
                    // The first dial dies with the canceled context of
                    // whichever request started it.
                    Err(mimic::Error::Canceled("request canceled".into()))
                } else {
                    dial_h2(addr).await
                }
            }
        }
    };

    let a = {
        let pool = pool.clone();
        let dial = dial.clone();
        tokio::spawn(async move { pool.get_conn("k", 1, dial).await })
    };
    // Give the first task time to start the dial so the second attaches.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let b = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get_conn("k", 2, dial).await })
    };

    let result_a = a.await.unwrap();
    let result_b = b.await.unwrap();

    // The dial's owner sees the cancellation; the sibling retries and
    // succeeds on the second dial.
    let (owner, sibling) = if result_a.is_err() {
        (result_a, result_b)
    } else {
        (result_b, result_a)
    };
    assert!(owner.unwrap_err().is_canceled());
    let entry = sibling.unwrap();
    entry.conn.release();
    assert_eq!(dials.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_dial_propagates_error_kind() {
    let pool = ConnPool::new();
    let result = pool
        .get_conn("k", 1, || async {
            Err(mimic::Error::tls("handshake refused"))
        })
        .await;
    assert_eq!(result.unwrap_err().kind(), mimic::ErrorKind::Tls);
}
