//! TLS handshaker: applies a [`ClientHelloSpec`] to BoringSSL and
//! performs the async handshake.
//!
//! The spec's ordered cipher/curve/sigalg lists, ALPN and ALPS
//! protocols, GREASE, certificate compression and version bounds are
//! mapped onto the connector builder; extension permutation mirrors
//! Chrome 110+ behavior. The canonical ClientHello byte form of the
//! spec (used for session-id derivation and order invariants) is
//! produced by [`ClientHelloSpec::serialize`] in the fingerprint module.

use std::path::PathBuf;
use std::time::Duration;

use boring::ssl::{
    SslConnector, SslFiletype, SslMethod, SslSessionCacheMode, SslVerifyMode, SslVersion,
};
use boring::x509::X509;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_boring::SslStream;

use crate::error::{Error, Result};
use crate::fingerprint::ext::{is_grease, Extension};
use crate::fingerprint::ja3::tlsver;
use crate::fingerprint::ClientHelloSpec;

// FFI bindings for BoringSSL fingerprint controls not surfaced by the
// boring crate.
use boring_sys::SSL_CTX;
use std::os::raw::c_int;

extern "C" {
    /// Enable GREASE (RFC 8701) code points in the ClientHello.
    fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
    /// Enable extension order permutation (Chrome 110+ behavior).
    fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
}

/// Snapshot of the negotiated TLS state, exposed on responses.
#[derive(Debug, Clone, Default)]
pub struct TlsState {
    /// ALPN protocol selected by the server, if any.
    pub alpn: Option<String>,
    /// Negotiated protocol version, e.g. "TLSv1.3".
    pub version: String,
    /// Negotiated cipher suite name.
    pub cipher: Option<String>,
    /// SNI sent during the handshake.
    pub server_name: String,
    /// Peer certificate chain, DER encoded, leaf first.
    pub peer_certificates: Vec<Vec<u8>>,
    /// Whether the session was resumed.
    pub resumed: bool,
}

/// TLS configuration knobs independent of the fingerprint spec.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Skip certificate verification. Testing only.
    pub insecure_skip_verify: bool,
    /// Additional root CA certificates, PEM content.
    pub root_cert_pems: Vec<Vec<u8>>,
    /// Client certificate and key, PEM file paths.
    pub client_cert: Option<(PathBuf, PathBuf)>,
    /// ALPN protocols in wire format; the spec's ALPN extension wins
    /// when present.
    pub alpn_protos: Vec<u8>,
    /// TLS handshake timeout.
    pub handshake_timeout: Option<Duration>,
}

/// Performs fingerprint-shaped TLS handshakes.
#[derive(Debug, Clone, Default)]
pub struct Handshaker {
    spec: Option<ClientHelloSpec>,
    options: TlsOptions,
}

impl Handshaker {
    pub fn new(spec: Option<ClientHelloSpec>, options: TlsOptions) -> Self {
        Self { spec, options }
    }

    /// Replace the ClientHello spec.
    pub fn set_spec(&mut self, spec: ClientHelloSpec) {
        self.spec = Some(spec);
    }

    pub fn spec(&self) -> Option<&ClientHelloSpec> {
        self.spec.as_ref()
    }

    pub fn options_mut(&mut self) -> &mut TlsOptions {
        &mut self.options
    }

    pub fn options(&self) -> &TlsOptions {
        &self.options
    }

    /// Perform the handshake over an established plaintext connection.
    pub async fn handshake<S>(&self, stream: S, server_name: &str) -> Result<(SslStream<S>, TlsState)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let connector = self.configure()?;
        let config = connector
            .configure()
            .map_err(|e| Error::tls(format!("failed to configure SSL: {e}")))?;

        let fut = tokio_boring::connect(config, server_name, stream);
        let tls_stream = match self.options.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::DeadlineExceeded("TLS handshake timed out".into()))?,
            None => fut.await,
        }
        .map_err(|e| Error::tls(format!("TLS handshake with {server_name} failed: {e}")))?;

        let state = snapshot(&tls_stream, server_name);
        Ok((tls_stream, state))
    }

    fn configure(&self) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("failed to create SSL connector: {e}")))?;

        let mut alpn_from_spec = None;
        if let Some(spec) = &self.spec {
            let ciphers = cipher_list_string(&spec.cipher_suites);
            if !ciphers.is_empty() {
                builder
                    .set_cipher_list(&ciphers)
                    .map_err(|e| Error::tls(format!("failed to set cipher list: {e}")))?;
            }

            for ext in &spec.extensions {
                match ext {
                    Extension::SupportedCurves { curves } => {
                        let names = curve_list_string(curves);
                        if !names.is_empty() {
                            builder
                                .set_curves_list(&names)
                                .map_err(|e| Error::tls(format!("failed to set curves: {e}")))?;
                        }
                    }
                    Extension::SignatureAlgorithms { algs } => {
                        let names = sigalg_list_string(algs);
                        if !names.is_empty() {
                            builder.set_sigalgs_list(&names).map_err(|e| {
                                Error::tls(format!("failed to set signature algorithms: {e}"))
                            })?;
                        }
                    }
                    Extension::Alpn { protocols } => {
                        alpn_from_spec = Some(alpn_wire_format(protocols));
                    }
                    _ => {}
                }
            }

            builder
                .set_min_proto_version(Some(ssl_version(spec.tls_vers_min)))
                .map_err(|e| Error::tls(format!("failed to set min TLS version: {e}")))?;
            builder
                .set_max_proto_version(Some(ssl_version(spec.tls_vers_max)))
                .map_err(|e| Error::tls(format!("failed to set max TLS version: {e}")))?;

            let grease = spec
                .extensions
                .iter()
                .any(|e| matches!(e, Extension::Grease { .. }));
            unsafe {
                let ctx = builder.as_ptr() as *mut SSL_CTX;
                SSL_CTX_set_grease_enabled(ctx, c_int::from(grease));
                SSL_CTX_set_permute_extensions(ctx, 0);
            }
        } else {
            builder
                .set_min_proto_version(Some(SslVersion::TLS1_2))
                .map_err(|e| Error::tls(format!("failed to set min TLS version: {e}")))?;
            builder
                .set_max_proto_version(Some(SslVersion::TLS1_3))
                .map_err(|e| Error::tls(format!("failed to set max TLS version: {e}")))?;
        }

        // Browsers keep a client-side session cache for resumption.
        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);

        let alpn = alpn_from_spec
            .unwrap_or_else(|| self.options.alpn_protos.clone());
        if !alpn.is_empty() {
            builder
                .set_alpn_protos(&alpn)
                .map_err(|e| Error::tls(format!("failed to set ALPN: {e}")))?;
        }

        if self.options.insecure_skip_verify {
            builder.set_verify(SslVerifyMode::NONE);
        }

        for pem in &self.options.root_cert_pems {
            let cert = X509::from_pem(pem)
                .map_err(|e| Error::config(format!("bad root certificate PEM: {e}")))?;
            builder
                .cert_store_mut()
                .add_cert(cert)
                .map_err(|e| Error::config(format!("failed to add root certificate: {e}")))?;
        }

        if let Some((cert_path, key_path)) = &self.options.client_cert {
            builder
                .set_certificate_file(cert_path, SslFiletype::PEM)
                .map_err(|e| Error::config(format!("failed to load client cert: {e}")))?;
            builder
                .set_private_key_file(key_path, SslFiletype::PEM)
                .map_err(|e| Error::config(format!("failed to load client key: {e}")))?;
        }

        Ok(builder.build())
    }
}

fn snapshot<S>(stream: &SslStream<S>, server_name: &str) -> TlsState {
    let ssl = stream.ssl();
    TlsState {
        alpn: ssl
            .selected_alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned()),
        version: ssl.version_str().to_string(),
        cipher: ssl.current_cipher().map(|c| c.name().to_string()),
        server_name: server_name.to_string(),
        peer_certificates: ssl
            .peer_cert_chain()
            .map(|chain| {
                chain
                    .iter()
                    .filter_map(|c| c.to_der().ok())
                    .collect()
            })
            .unwrap_or_default(),
        resumed: ssl.session_reused(),
    }
}

fn ssl_version(v: u16) -> SslVersion {
    match v {
        tlsver::TLS1_0 => SslVersion::TLS1,
        tlsver::TLS1_1 => SslVersion::TLS1_1,
        tlsver::TLS1_2 => SslVersion::TLS1_2,
        _ => SslVersion::TLS1_3,
    }
}

/// ALPN protocol list in wire format: length-prefixed strings.
pub fn alpn_wire_format(protocols: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for p in protocols {
        out.push(p.len() as u8);
        out.extend_from_slice(p.as_bytes());
    }
    out
}

/// Map TLS 1.2 cipher suite IDs to OpenSSL names, preserving order.
/// TLS 1.3 suites and GREASE are skipped: BoringSSL manages 1.3 suites
/// itself and GREASE is injected by `SSL_CTX_set_grease_enabled`.
fn cipher_list_string(ids: &[u16]) -> String {
    ids.iter()
        .filter(|id| !is_grease(**id))
        .filter_map(|id| cipher_name(*id))
        .collect::<Vec<_>>()
        .join(":")
}

fn cipher_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0xc02b => "ECDHE-ECDSA-AES128-GCM-SHA256",
        0xc02f => "ECDHE-RSA-AES128-GCM-SHA256",
        0xc02c => "ECDHE-ECDSA-AES256-GCM-SHA384",
        0xc030 => "ECDHE-RSA-AES256-GCM-SHA384",
        0xcca9 => "ECDHE-ECDSA-CHACHA20-POLY1305",
        0xcca8 => "ECDHE-RSA-CHACHA20-POLY1305",
        0xc009 => "ECDHE-ECDSA-AES128-SHA",
        0xc00a => "ECDHE-ECDSA-AES256-SHA",
        0xc013 => "ECDHE-RSA-AES128-SHA",
        0xc014 => "ECDHE-RSA-AES256-SHA",
        0xc008 => "ECDHE-ECDSA-DES-CBC3-SHA",
        0xc012 => "ECDHE-RSA-DES-CBC3-SHA",
        0x009c => "AES128-GCM-SHA256",
        0x009d => "AES256-GCM-SHA384",
        0x002f => "AES128-SHA",
        0x0035 => "AES256-SHA",
        0x000a => "DES-CBC3-SHA",
        // TLS 1.3 suites (0x1301..0x1303) and anything unknown.
        _ => return None,
    })
}

fn curve_list_string(ids: &[u16]) -> String {
    ids.iter()
        .filter(|id| !is_grease(**id))
        .filter_map(|id| curve_name(*id))
        .collect::<Vec<_>>()
        .join(":")
}

fn curve_name(id: u16) -> Option<&'static str> {
    Some(match id {
        29 => "X25519",
        23 => "P-256",
        24 => "P-384",
        25 => "P-521",
        _ => return None,
    })
}

fn sigalg_list_string(ids: &[u16]) -> String {
    use crate::fingerprint::ext::sigscheme::*;
    ids.iter()
        .filter_map(|id| {
            Some(match *id {
                ECDSA_SECP256R1_SHA256 => "ecdsa_secp256r1_sha256",
                ECDSA_SECP384R1_SHA384 => "ecdsa_secp384r1_sha384",
                ECDSA_SECP521R1_SHA512 => "ecdsa_secp521r1_sha512",
                PSS_SHA256 => "rsa_pss_rsae_sha256",
                PSS_SHA384 => "rsa_pss_rsae_sha384",
                PSS_SHA512 => "rsa_pss_rsae_sha512",
                PKCS1_SHA256 => "rsa_pkcs1_sha256",
                PKCS1_SHA384 => "rsa_pkcs1_sha384",
                PKCS1_SHA512 => "rsa_pkcs1_sha512",
                ECDSA_SHA1 => "ecdsa_sha1",
                PKCS1_SHA1 => "rsa_pkcs1_sha1",
                _ => return None,
            })
        })
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_mapping_skips_tls13_and_grease() {
        let s = cipher_list_string(&[0x0a0a, 4865, 0xc02b, 0xc02f]);
        assert_eq!(s, "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256");
    }

    #[test]
    fn alpn_wire_encoding() {
        let wire = alpn_wire_format(&["h2".into(), "http/1.1".into()]);
        assert_eq!(wire, b"\x02h2\x08http/1.1");
    }

    #[test]
    fn curve_mapping_preserves_order() {
        assert_eq!(curve_list_string(&[0x0a0a, 29, 23, 24]), "X25519:P-256:P-384");
    }

    #[test]
    fn connector_builds_from_chrome_spec() {
        let spec = crate::fingerprint::Profile::Chrome.client_hello().unwrap();
        let hs = Handshaker::new(Some(spec), TlsOptions::default());
        hs.configure().unwrap();
    }
}
