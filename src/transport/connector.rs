//! Dialing: TCP / proxy / Unix socket, then the TLS handshaker.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use http::Uri;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tokio_boring::SslStream;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::tls::{Handshaker, TlsState};

/// Transport-level stream: plain TCP, TLS, or a Unix socket.
pub enum MaybeHttpsStream {
    Http(TcpStream),
    Https(Box<SslStream<PlainStream>>),
    Unix(UnixStream),
}

/// Plaintext stream underneath TLS: TCP directly or through a proxy
/// tunnel (which is still a TcpStream once CONNECT succeeds).
pub enum PlainStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

macro_rules! forward_io {
    ($ty:ident, $($variant:ident),+) => {
        impl AsyncRead for $ty {
            fn poll_read(
                mut self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                match &mut *self {
                    $($ty::$variant(s) => Pin::new(s).poll_read(cx, buf),)+
                }
            }
        }

        impl AsyncWrite for $ty {
            fn poll_write(
                mut self: Pin<&mut Self>,
                cx: &mut Context<'_>,
                buf: &[u8],
            ) -> Poll<io::Result<usize>> {
                match &mut *self {
                    $($ty::$variant(s) => Pin::new(s).poll_write(cx, buf),)+
                }
            }

            fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
                match &mut *self {
                    $($ty::$variant(s) => Pin::new(s).poll_flush(cx),)+
                }
            }

            fn poll_shutdown(
                mut self: Pin<&mut Self>,
                cx: &mut Context<'_>,
            ) -> Poll<io::Result<()>> {
                match &mut *self {
                    $($ty::$variant(s) => Pin::new(s).poll_shutdown(cx),)+
                }
            }
        }
    };
}

forward_io!(PlainStream, Tcp, Unix);
forward_io!(MaybeHttpsStream, Http, Https, Unix);

impl MaybeHttpsStream {
    /// ALPN protocol negotiated on this stream, if TLS.
    pub fn alpn_protocol(&self) -> Option<String> {
        match self {
            Self::Https(stream) => stream
                .ssl()
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            _ => None,
        }
    }
}

/// Establishes transport connections for the client.
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    /// HTTP proxy to tunnel through, if any.
    pub proxy: Option<Url>,
    /// Dial a Unix socket instead of TCP.
    pub unix_socket: Option<std::path::PathBuf>,
    /// TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Dialer {
    /// Parse and set the proxy URL.
    pub fn set_proxy(&mut self, proxy_url: &str) -> Result<()> {
        let url = Url::parse(proxy_url)
            .map_err(|e| Error::config(format!("bad proxy url {proxy_url:?}: {e}")))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::config(format!("unsupported proxy scheme {other:?}")));
            }
        }
        self.proxy = Some(url);
        Ok(())
    }

    /// Dial the host of `uri` and, for https, run the TLS handshake.
    pub async fn dial(
        &self,
        uri: &Uri,
        handshaker: &Handshaker,
    ) -> Result<(MaybeHttpsStream, Option<TlsState>)> {
        let host = uri
            .host()
            .ok_or_else(|| Error::request("request URI has no host"))?;
        let is_https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if is_https { 443 } else { 80 });

        if let Some(path) = &self.unix_socket {
            let stream = UnixStream::connect(path)
                .await
                .map_err(|e| Error::network(format!("unix socket connect failed: {e}")))?;
            if !is_https {
                return Ok((MaybeHttpsStream::Unix(stream), None));
            }
            let (tls, state) = handshaker
                .handshake(PlainStream::Unix(stream), host)
                .await?;
            return Ok((MaybeHttpsStream::Https(Box::new(tls)), Some(state)));
        }

        let tcp = self.open_tcp(host, port).await?;
        if !is_https {
            return Ok((MaybeHttpsStream::Http(tcp), None));
        }
        let (tls, state) = handshaker.handshake(PlainStream::Tcp(tcp), host).await?;
        Ok((MaybeHttpsStream::Https(Box::new(tls)), Some(state)))
    }

    async fn open_tcp(&self, host: &str, port: u16) -> Result<TcpStream> {
        let (connect_host, connect_port, tunnel) = match &self.proxy {
            Some(proxy) => {
                let proxy_host = proxy
                    .host_str()
                    .ok_or_else(|| Error::config("proxy url has no host"))?
                    .to_string();
                let proxy_port = proxy.port_or_known_default().unwrap_or(8080);
                (proxy_host, proxy_port, true)
            }
            None => (host.to_string(), port, false),
        };

        let fut = TcpStream::connect((connect_host.as_str(), connect_port));
        let mut stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::DeadlineExceeded("TCP connect timed out".into()))?,
            None => fut.await,
        }
        .map_err(|e| {
            Error::network(format!("connect to {connect_host}:{connect_port} failed: {e}"))
        })?;

        if tunnel {
            debug!(host, port, "establishing proxy tunnel");
            self.establish_tunnel(&mut stream, host, port).await?;
        }
        Ok(stream)
    }

    /// Issue an HTTP CONNECT through an already-connected proxy stream.
    async fn establish_tunnel(&self, stream: &mut TcpStream, host: &str, port: u16) -> Result<()> {
        let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
        if let Some(proxy) = &self.proxy {
            if !proxy.username().is_empty() {
                let credentials = format!(
                    "{}:{}",
                    proxy.username(),
                    proxy.password().unwrap_or_default()
                );
                use base64::{engine::general_purpose::STANDARD, Engine as _};
                request.push_str(&format!(
                    "Proxy-Authorization: Basic {}\r\n",
                    STANDARD.encode(credentials)
                ));
            }
        }
        request.push_str("\r\n");
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| Error::network(format!("proxy CONNECT write failed: {e}")))?;

        let mut response = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        while !response.ends_with(b"\r\n\r\n") {
            if response.len() > 8192 {
                return Err(Error::protocol("oversized proxy CONNECT response"));
            }
            let n = stream
                .read(&mut byte)
                .await
                .map_err(|e| Error::network(format!("proxy CONNECT read failed: {e}")))?;
            if n == 0 {
                return Err(Error::network("proxy closed during CONNECT"));
            }
            response.push(byte[0]);
        }
        let head = String::from_utf8_lossy(&response);
        let status: u16 = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::protocol("malformed proxy CONNECT response"))?;
        if !(200..300).contains(&status) {
            return Err(Error::network(format!("proxy CONNECT failed: {status}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_url_validation() {
        let mut dialer = Dialer::default();
        dialer.set_proxy("http://proxy.local:3128").unwrap();
        assert_eq!(dialer.proxy.as_ref().unwrap().port(), Some(3128));

        assert!(dialer.set_proxy("socks5://x").is_err());
        assert!(dialer.set_proxy("not a url").is_err());
    }
}
