//! Typed TLS extension model for ClientHello synthesis.
//!
//! Each known extension ID materializes into a tagged variant carrying its
//! typed payload; unknown IDs carry opaque bytes. GREASE placeholders are
//! explicit values substituted with freshly sampled GREASE code points at
//! serialization time (RFC 8701).

use bytes::{BufMut, BytesMut};

/// Placeholder value for a GREASE code point inside a spec.
///
/// Substituted with a freshly sampled GREASE value per serialization.
pub const GREASE_PLACEHOLDER: u16 = 0x0a0a;

/// The sixteen GREASE code points defined by RFC 8701.
const GREASE_VALUES: [u16; 16] = [
    0x0a0a, 0x1a1a, 0x2a2a, 0x3a3a, 0x4a4a, 0x5a5a, 0x6a6a, 0x7a7a, 0x8a8a, 0x9a9a, 0xaaaa,
    0xbaba, 0xcaca, 0xdada, 0xeaea, 0xfafa,
];

/// Returns true if `v` is one of the RFC 8701 GREASE code points.
pub fn is_grease(v: u16) -> bool {
    v & 0x0f0f == 0x0a0a && (v >> 8) == (v & 0xff)
}

/// Freshly sampled GREASE values for one ClientHello.
///
/// A single hello uses distinct values for the cipher list, the named-group
/// list, the key-share entry and the two GREASE extensions.
#[derive(Debug, Clone, Copy)]
pub struct GreaseSeed {
    pub cipher: u16,
    pub group: u16,
    pub ext_first: u16,
    pub ext_last: u16,
    pub version: u16,
}

impl GreaseSeed {
    /// Sample a fresh seed from OS randomness.
    pub fn sample() -> Self {
        let mut raw = [0u8; 5];
        // getrandom only fails on broken OS entropy; fall back to fixed
        // offsets rather than propagating an error through every caller.
        let _ = getrandom::getrandom(&mut raw);
        let pick = |b: u8| GREASE_VALUES[(b & 0x0f) as usize];
        let ext_first = pick(raw[2]);
        let mut ext_last = pick(raw[3]);
        if ext_last == ext_first {
            ext_last = GREASE_VALUES[((raw[3].wrapping_add(1)) & 0x0f) as usize];
        }
        Self {
            cipher: pick(raw[0]),
            group: pick(raw[1]),
            ext_first,
            ext_last,
            version: pick(raw[4]),
        }
    }
}

/// TLS signature scheme code points used by the default tables.
pub mod sigscheme {
    pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;
    pub const ECDSA_SECP384R1_SHA384: u16 = 0x0503;
    pub const ECDSA_SECP521R1_SHA512: u16 = 0x0603;
    pub const ECDSA_SHA1: u16 = 0x0203;
    pub const PSS_SHA256: u16 = 0x0804;
    pub const PSS_SHA384: u16 = 0x0805;
    pub const PSS_SHA512: u16 = 0x0806;
    pub const PKCS1_SHA256: u16 = 0x0401;
    pub const PKCS1_SHA384: u16 = 0x0501;
    pub const PKCS1_SHA512: u16 = 0x0601;
    pub const PKCS1_SHA1: u16 = 0x0201;
}

/// Named-group code points.
pub mod group {
    pub const X25519: u16 = 0x001d;
    pub const SECP256R1: u16 = 0x0017;
    pub const SECP384R1: u16 = 0x0018;
}

/// Certificate compression algorithms (RFC 8879).
pub mod certcompress {
    pub const ZLIB: u16 = 1;
    pub const BROTLI: u16 = 2;
    pub const ZSTD: u16 = 3;
}

/// One key-share entry: a named group plus opaque key exchange bytes.
///
/// `Grease` entries get a fresh GREASE group and a single-byte payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyShare {
    Grease,
    Group { group: u16, key_len: usize },
}

/// Renegotiation indication mode (extension 65281).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenegotiationMode {
    #[default]
    RenegotiateOnceAsClient,
    Never,
}

/// A single ClientHello extension, in spec order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// Fresh GREASE extension. The trailing one carries a single zero byte.
    Grease { padded: bool },
    /// 0: server_name. Empty host is filled by the handshaker.
    ServerName { host: String },
    /// 5: status_request (OCSP).
    StatusRequest,
    /// 10: supported_groups. A leading placeholder becomes fresh GREASE.
    SupportedCurves { curves: Vec<u16> },
    /// 11: ec_point_formats.
    PointFormats { formats: Vec<u8> },
    /// 13: signature_algorithms.
    SignatureAlgorithms { algs: Vec<u16> },
    /// 16: application_layer_protocol_negotiation.
    Alpn { protocols: Vec<String> },
    /// 17: status_request_v2.
    StatusRequestV2,
    /// 18: signed_certificate_timestamp.
    Sct,
    /// 21: padding, Boring-style length policy.
    Padding,
    /// 23: extended_master_secret.
    ExtendedMasterSecret,
    /// 27: compress_certificate.
    CompressCertificate { algs: Vec<u16> },
    /// 28: record_size_limit.
    RecordSizeLimit { limit: u16 },
    /// 34: delegated_credentials.
    DelegatedCredentials { algs: Vec<u16> },
    /// 35: session_ticket.
    SessionTicket,
    /// 43: supported_versions, including the leading GREASE slot.
    SupportedVersions { versions: Vec<u16> },
    /// 45: psk_key_exchange_modes.
    PskKeyExchangeModes { modes: Vec<u8> },
    /// 50: signature_algorithms_cert.
    SignatureAlgorithmsCert { algs: Vec<u16> },
    /// 51: key_share.
    KeyShares { shares: Vec<KeyShare> },
    /// 57: quic_transport_parameters.
    QuicTransportParameters,
    /// 17513: application settings (ALPS).
    ApplicationSettings { protocols: Vec<String> },
    /// 30031/30032: channel_id. `old` selects the legacy code point.
    ChannelId { old: bool },
    /// 65037: GREASE encrypted_client_hello.
    EncryptedClientHello,
    /// 65281: renegotiation_info.
    RenegotiationInfo { mode: RenegotiationMode },
    /// Any other ID with an opaque (possibly empty) payload.
    Opaque { id: u16, data: Vec<u8> },
}

impl Extension {
    /// Materialize the default extension for a numeric ID, per the
    /// behavioral contract table. Unknown IDs become empty opaques.
    pub fn materialize(id: u16) -> Self {
        use sigscheme::*;
        match id {
            0 => Self::ServerName { host: String::new() },
            5 => Self::StatusRequest,
            10 => Self::SupportedCurves { curves: Vec::new() },
            11 => Self::PointFormats { formats: vec![0] },
            13 => Self::SignatureAlgorithms {
                algs: vec![
                    ECDSA_SECP256R1_SHA256,
                    PSS_SHA256,
                    PKCS1_SHA256,
                    ECDSA_SECP384R1_SHA384,
                    PSS_SHA384,
                    PKCS1_SHA384,
                    PSS_SHA512,
                    PKCS1_SHA512,
                ],
            },
            16 => Self::Alpn {
                protocols: vec!["h2".into(), "http/1.1".into()],
            },
            17 => Self::StatusRequestV2,
            18 => Self::Sct,
            21 => Self::Padding,
            23 => Self::ExtendedMasterSecret,
            27 => Self::CompressCertificate {
                algs: vec![certcompress::BROTLI],
            },
            28 => Self::RecordSizeLimit { limit: 0x4001 },
            34 => Self::DelegatedCredentials {
                algs: vec![
                    ECDSA_SECP256R1_SHA256,
                    ECDSA_SECP384R1_SHA384,
                    ECDSA_SECP521R1_SHA512,
                    ECDSA_SHA1,
                ],
            },
            35 => Self::SessionTicket,
            43 => Self::SupportedVersions { versions: Vec::new() },
            45 => Self::PskKeyExchangeModes { modes: vec![1] },
            50 => Self::SignatureAlgorithmsCert {
                algs: vec![
                    ECDSA_SECP256R1_SHA256,
                    ECDSA_SECP384R1_SHA384,
                    ECDSA_SECP521R1_SHA512,
                    PSS_SHA256,
                    PSS_SHA384,
                    PSS_SHA512,
                    PKCS1_SHA256,
                    PKCS1_SHA384,
                    PKCS1_SHA512,
                    ECDSA_SHA1,
                    PKCS1_SHA1,
                ],
            },
            51 => Self::KeyShares {
                shares: vec![
                    KeyShare::Grease,
                    KeyShare::Group {
                        group: group::X25519,
                        key_len: 32,
                    },
                    KeyShare::Group {
                        group: group::SECP256R1,
                        key_len: 65,
                    },
                ],
            },
            57 => Self::QuicTransportParameters,
            17513 => Self::ApplicationSettings {
                protocols: vec!["h2".into(), "http/1.1".into()],
            },
            30031 => Self::ChannelId { old: true },
            30032 => Self::ChannelId { old: false },
            65037 => Self::EncryptedClientHello,
            65281 => Self::RenegotiationInfo {
                mode: RenegotiationMode::RenegotiateOnceAsClient,
            },
            other => Self::Opaque {
                id: other,
                data: Vec::new(),
            },
        }
    }

    /// Wire extension ID, with GREASE slots resolved from the seed.
    pub fn id(&self, seed: &GreaseSeed, first: bool) -> u16 {
        match self {
            Self::Grease { .. } => {
                if first {
                    seed.ext_first
                } else {
                    seed.ext_last
                }
            }
            Self::ServerName { .. } => 0,
            Self::StatusRequest => 5,
            Self::SupportedCurves { .. } => 10,
            Self::PointFormats { .. } => 11,
            Self::SignatureAlgorithms { .. } => 13,
            Self::Alpn { .. } => 16,
            Self::StatusRequestV2 => 17,
            Self::Sct => 18,
            Self::Padding => 21,
            Self::ExtendedMasterSecret => 23,
            Self::CompressCertificate { .. } => 27,
            Self::RecordSizeLimit { .. } => 28,
            Self::DelegatedCredentials { .. } => 34,
            Self::SessionTicket => 35,
            Self::SupportedVersions { .. } => 43,
            Self::PskKeyExchangeModes { .. } => 45,
            Self::SignatureAlgorithmsCert { .. } => 50,
            Self::KeyShares { .. } => 51,
            Self::QuicTransportParameters => 57,
            Self::ApplicationSettings { .. } => 17513,
            Self::ChannelId { old } => {
                if *old {
                    30031
                } else {
                    30032
                }
            }
            Self::EncryptedClientHello => 65037,
            Self::RenegotiationInfo { .. } => 65281,
            Self::Opaque { id, .. } => *id,
        }
    }

    /// Stable ID for JA3 round-tripping: GREASE slots are excluded there,
    /// so any placeholder value works. Returns `None` for GREASE.
    pub fn ja3_id(&self) -> Option<u16> {
        match self {
            Self::Grease { .. } => None,
            other => Some(other.id(&NO_GREASE, false)),
        }
    }

    /// Serialize the extension payload (without the id/length header).
    ///
    /// `pad_len` is the computed payload length of the padding extension
    /// (resolved by the caller after a first sizing pass).
    pub fn marshal_payload(&self, buf: &mut BytesMut, seed: &GreaseSeed, pad_len: usize) {
        match self {
            Self::Grease { padded } => {
                if *padded {
                    buf.put_u8(0);
                }
            }
            Self::ServerName { host } => {
                if !host.is_empty() {
                    let name = host.as_bytes();
                    buf.put_u16(name.len() as u16 + 3);
                    buf.put_u8(0); // name_type host_name
                    buf.put_u16(name.len() as u16);
                    buf.put_slice(name);
                }
            }
            Self::StatusRequest => {
                buf.put_u8(1); // status_type ocsp
                buf.put_u16(0); // responder_id_list
                buf.put_u16(0); // request_extensions
            }
            Self::SupportedCurves { curves } => {
                buf.put_u16(curves.len() as u16 * 2);
                for c in curves {
                    buf.put_u16(resolve_grease(*c, seed.group));
                }
            }
            Self::PointFormats { formats } => {
                buf.put_u8(formats.len() as u8);
                buf.put_slice(formats);
            }
            Self::SignatureAlgorithms { algs } | Self::SignatureAlgorithmsCert { algs } => {
                buf.put_u16(algs.len() as u16 * 2);
                for a in algs {
                    buf.put_u16(*a);
                }
            }
            Self::Alpn { protocols } | Self::ApplicationSettings { protocols } => {
                let list_len: usize = protocols.iter().map(|p| p.len() + 1).sum();
                buf.put_u16(list_len as u16);
                for p in protocols {
                    buf.put_u8(p.len() as u8);
                    buf.put_slice(p.as_bytes());
                }
            }
            Self::StatusRequestV2 | Self::Sct | Self::ExtendedMasterSecret
            | Self::SessionTicket | Self::QuicTransportParameters => {}
            Self::Padding => {
                buf.put_bytes(0, pad_len);
            }
            Self::CompressCertificate { algs } => {
                buf.put_u8(algs.len() as u8 * 2);
                for a in algs {
                    buf.put_u16(*a);
                }
            }
            Self::RecordSizeLimit { limit } => {
                buf.put_u16(*limit);
            }
            Self::DelegatedCredentials { algs } => {
                buf.put_u16(algs.len() as u16 * 2);
                for a in algs {
                    buf.put_u16(*a);
                }
            }
            Self::SupportedVersions { versions } => {
                buf.put_u8(versions.len() as u8 * 2);
                for v in versions {
                    buf.put_u16(resolve_grease(*v, seed.version));
                }
            }
            Self::PskKeyExchangeModes { modes } => {
                buf.put_u8(modes.len() as u8);
                buf.put_slice(modes);
            }
            Self::KeyShares { shares } => {
                let mut inner = BytesMut::new();
                for share in shares {
                    match share {
                        KeyShare::Grease => {
                            inner.put_u16(seed.group);
                            inner.put_u16(1);
                            inner.put_u8(0);
                        }
                        KeyShare::Group { group, key_len } => {
                            inner.put_u16(*group);
                            inner.put_u16(*key_len as u16);
                            let mut key = vec![0u8; *key_len];
                            let _ = getrandom::getrandom(&mut key);
                            // Uncompressed EC points lead with 0x04.
                            if *group != group::X25519 && *key_len == 65 {
                                key[0] = 0x04;
                            }
                            inner.put_slice(&key);
                        }
                    }
                }
                buf.put_u16(inner.len() as u16);
                buf.put_slice(&inner);
            }
            Self::ChannelId { .. } => {}
            Self::EncryptedClientHello => {
                // GREASE ECH: outer hello type, HKDF-SHA256 / AES-128-GCM,
                // random config id, 32-byte enc, 144-byte payload.
                buf.put_u8(0);
                buf.put_u16(0x0001);
                buf.put_u16(0x0001);
                let mut rand_block = [0u8; 1 + 32 + 144];
                let _ = getrandom::getrandom(&mut rand_block);
                buf.put_u8(rand_block[0]);
                buf.put_u16(32);
                buf.put_slice(&rand_block[1..33]);
                buf.put_u16(144);
                buf.put_slice(&rand_block[33..]);
            }
            Self::RenegotiationInfo { .. } => {
                buf.put_u8(0); // empty renegotiated_connection
            }
            Self::Opaque { data, .. } => {
                buf.put_slice(data);
            }
        }
    }
}

const NO_GREASE: GreaseSeed = GreaseSeed {
    cipher: GREASE_PLACEHOLDER,
    group: GREASE_PLACEHOLDER,
    ext_first: GREASE_PLACEHOLDER,
    ext_last: GREASE_PLACEHOLDER,
    version: GREASE_PLACEHOLDER,
};

fn resolve_grease(v: u16, fresh: u16) -> u16 {
    if v == GREASE_PLACEHOLDER {
        fresh
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grease_detection() {
        assert!(is_grease(0x0a0a));
        assert!(is_grease(0xfafa));
        assert!(!is_grease(0x0a1a));
        assert!(!is_grease(0x1301));
    }

    #[test]
    fn seed_uses_distinct_extension_values() {
        for _ in 0..64 {
            let seed = GreaseSeed::sample();
            assert_ne!(seed.ext_first, seed.ext_last);
            assert!(is_grease(seed.cipher));
            assert!(is_grease(seed.ext_first));
            assert!(is_grease(seed.ext_last));
        }
    }

    #[test]
    fn materialize_alpn_defaults() {
        match Extension::materialize(16) {
            Extension::Alpn { protocols } => assert_eq!(protocols, vec!["h2", "http/1.1"]),
            other => panic!("expected ALPN, got {other:?}"),
        }
    }

    #[test]
    fn materialize_key_share_defaults() {
        match Extension::materialize(51) {
            Extension::KeyShares { shares } => {
                assert_eq!(shares.len(), 3);
                assert_eq!(shares[0], KeyShare::Grease);
                assert_eq!(
                    shares[1],
                    KeyShare::Group {
                        group: group::X25519,
                        key_len: 32
                    }
                );
            }
            other => panic!("expected key_share, got {other:?}"),
        }
    }

    #[test]
    fn materialize_unknown_is_opaque() {
        match Extension::materialize(0x1234) {
            Extension::Opaque { id, data } => {
                assert_eq!(id, 0x1234);
                assert!(data.is_empty());
            }
            other => panic!("expected opaque, got {other:?}"),
        }
    }

    #[test]
    fn channel_id_old_flag() {
        assert_eq!(
            Extension::materialize(30031),
            Extension::ChannelId { old: true }
        );
        assert_eq!(
            Extension::materialize(30032),
            Extension::ChannelId { old: false }
        );
    }

    #[test]
    fn sni_payload_layout() {
        let ext = Extension::ServerName {
            host: "example.com".into(),
        };
        let mut buf = BytesMut::new();
        ext.marshal_payload(&mut buf, &NO_GREASE, 0);
        // list len (2) + type (1) + name len (2) + name
        assert_eq!(buf.len(), 2 + 1 + 2 + 11);
        assert_eq!(buf[2], 0);
        assert_eq!(&buf[5..], b"example.com");
    }
}
