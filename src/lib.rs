//! # mimic
//!
//! HTTP client with spec-driven wire-signature control.
//!
//! mimic issues HTTP/1.1, HTTP/2 and HTTP/3 requests whose TLS
//! ClientHello, HTTP/2 preamble and header ordering match a chosen
//! browser. Fingerprints are a mechanism, not a database: a JA3 string
//! drives the ClientHello, an Akamai-style string drives the HTTP/2
//! SETTINGS order, WINDOW_UPDATE increment, priority frames and
//! pseudo-header order. Presets for common browsers sit on top.
//!
//! ```no_run
//! use mimic::{Client, Profile};
//!
//! # async fn example() -> mimic::Result<()> {
//! let client = Client::builder()
//!     .impersonate(Profile::Chrome)?
//!     .build();
//! let response = client.get("https://example.com").send().await?;
//! println!("{} via {}", response.status, response.protocol);
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod client;
pub mod cookie;
pub mod digest;
pub mod error;
pub mod middleware;
pub mod redirect;
pub mod request;
pub mod response;
pub mod retry;
pub mod version;

// Fingerprinting
pub mod fingerprint;

// TLS handshaking
pub mod tls;

// Transport layer
pub mod transport;

// Connection pooling
pub mod pool;

// Re-exports for convenient access
pub use client::{default_client, set_default_client, Client, ClientBuilder, RequestBuilder};
pub use cookie::{CookieJar, MemoryCookieJar};
pub use error::{Error, ErrorKind, Result};
pub use fingerprint::{ClientHelloSpec, H2Spec, Navigator, Profile};
pub use request::{Payload, Request};
pub use response::{Response, ResultState};
pub use retry::RetryPolicy;
pub use tls::TlsState;
pub use version::HttpVersion;

// Transport re-exports
pub use transport::h2::H2Connection;
pub use transport::h3::H3Client;
pub use transport::Transport;

// Pool re-exports
pub use pool::{ConnPool, PoolEntry, PooledConn};
