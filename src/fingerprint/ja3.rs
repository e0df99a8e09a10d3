//! JA3 string parsing and ClientHello synthesis.
//!
//! A JA3 string is `version,ciphers,extensions,curves,pointFormats` with
//! `-`-separated decimal fields. Parsing produces a [`ClientHelloSpec`]
//! whose canonical serialization preserves the extension order of the
//! input exactly (modulo the GREASE values prepended/appended per the
//! materialization rules).

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::fingerprint::ext::{is_grease, Extension, GreaseSeed, GREASE_PLACEHOLDER};

/// TLS protocol version code points.
pub mod tlsver {
    pub const TLS1_0: u16 = 0x0301;
    pub const TLS1_1: u16 = 0x0302;
    pub const TLS1_2: u16 = 0x0303;
    pub const TLS1_3: u16 = 0x0304;
}

/// How the ClientHello session id is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionIdPolicy {
    /// SHA-256 over the canonical hello bytes (serialized with an empty
    /// session id). Deterministic for a fixed GREASE seed.
    #[default]
    HashOfHello,
    /// 32 random bytes.
    Random,
}

/// A typed ClientHello description: ordered extensions, ciphers, curves.
#[derive(Debug, Clone)]
pub struct ClientHelloSpec {
    pub tls_vers_max: u16,
    pub tls_vers_min: u16,
    /// Ordered cipher suite IDs; a leading [`GREASE_PLACEHOLDER`] is
    /// substituted at serialization time.
    pub cipher_suites: Vec<u16>,
    /// Ordered extensions, GREASE head/tail included.
    pub extensions: Vec<Extension>,
    /// Always `{0}` (null compression).
    pub compression_methods: Vec<u8>,
    pub session_id: SessionIdPolicy,
}

impl ClientHelloSpec {
    /// Parse a JA3 string into a spec.
    ///
    /// The version token must be one of 769/770/771; the extension list
    /// has IDs 10/11/43 replaced in place by the curves, point-formats
    /// and supported-versions extensions built from the other fields, so
    /// extension ordering matches the JA3 exactly. The JA3 version token
    /// always wins over an explicit 43 entry.
    pub fn from_ja3(ja3: &str) -> Result<Self> {
        let tokens: Vec<&str> = ja3.split(',').collect();
        if tokens.len() != 5 {
            return Err(Error::config(format!(
                "JA3 must have 5 comma-separated fields, got {}",
                tokens.len()
            )));
        }

        let version: u16 = tokens[0]
            .parse()
            .map_err(|_| Error::config("JA3 version is not a number"))?;
        let (tls_vers_max, tls_vers_min) = match version {
            771 => (tlsver::TLS1_3, tlsver::TLS1_2),
            770 => (tlsver::TLS1_2, tlsver::TLS1_1),
            769 => (tlsver::TLS1_1, tlsver::TLS1_0),
            other => {
                return Err(Error::config(format!("unsupported JA3 TLS version {other}")));
            }
        };
        let supported_versions = Extension::SupportedVersions {
            versions: vec![GREASE_PLACEHOLDER, tls_vers_max, tls_vers_min],
        };

        let cipher_suites = parse_grease_prefixed_u16(tokens[1], "cipher")?;

        let curve_ids = parse_grease_prefixed_u16(tokens[3], "curve")?;
        let curves_ext = Extension::SupportedCurves { curves: curve_ids };

        let point_ids = parse_u8_list(tokens[4])?;
        let points_ext = Extension::PointFormats { formats: point_ids };

        let mut extensions = Vec::new();
        for field in split_dash(tokens[2]) {
            let id: u16 = field
                .parse()
                .map_err(|_| Error::config(format!("bad JA3 extension id {field:?}")))?;
            let ext = if is_grease(id) {
                Extension::Grease { padded: false }
            } else {
                match id {
                    10 => curves_ext.clone(),
                    11 => points_ext.clone(),
                    43 => supported_versions.clone(),
                    other => Extension::materialize(other),
                }
            };
            extensions.push(ext);
        }
        if !matches!(extensions.first(), Some(Extension::Grease { .. })) {
            extensions.insert(0, Extension::Grease { padded: false });
        }
        if !matches!(extensions.last(), Some(Extension::Grease { .. })) {
            extensions.push(Extension::Grease { padded: true });
        }

        Ok(Self {
            tls_vers_max,
            tls_vers_min,
            cipher_suites,
            extensions,
            compression_methods: vec![0],
            session_id: SessionIdPolicy::HashOfHello,
        })
    }

    /// Serialize the canonical ClientHello handshake message with a fresh
    /// GREASE seed.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_with_seed(&GreaseSeed::sample())
    }

    /// Serialize with the given GREASE seed (deterministic apart from the
    /// random and key-share bytes).
    pub fn serialize_with_seed(&self, seed: &GreaseSeed) -> Vec<u8> {
        let mut random = [0u8; 32];
        let _ = getrandom::getrandom(&mut random);

        let session_id = match self.session_id {
            SessionIdPolicy::HashOfHello => {
                let canonical = self.serialize_body(seed, &random, &[]);
                let digest = Sha256::digest(&canonical);
                let mut id = [0u8; 32];
                id.copy_from_slice(&digest);
                id
            }
            SessionIdPolicy::Random => {
                let mut id = [0u8; 32];
                let _ = getrandom::getrandom(&mut id);
                id
            }
        };

        let body = self.serialize_body(seed, &random, &session_id);
        let mut msg = BytesMut::with_capacity(body.len() + 4);
        msg.put_u8(0x01); // handshake type client_hello
        msg.put_u8((body.len() >> 16) as u8);
        msg.put_u8((body.len() >> 8) as u8);
        msg.put_u8(body.len() as u8);
        msg.put_slice(&body);
        msg.to_vec()
    }

    fn serialize_body(&self, seed: &GreaseSeed, random: &[u8; 32], session_id: &[u8]) -> Vec<u8> {
        // First pass with zero padding to learn the unpadded length.
        let unpadded = self.serialize_body_inner(seed, random, session_id, 0);
        let pad_len = boring_padding_len(unpadded.len() + 4);
        if pad_len == 0 || !self.extensions.iter().any(|e| matches!(e, Extension::Padding)) {
            return unpadded;
        }
        self.serialize_body_inner(seed, random, session_id, pad_len)
    }

    fn serialize_body_inner(
        &self,
        seed: &GreaseSeed,
        random: &[u8; 32],
        session_id: &[u8],
        pad_len: usize,
    ) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(512);
        buf.put_u16(tlsver::TLS1_2); // legacy_version
        buf.put_slice(random);
        buf.put_u8(session_id.len() as u8);
        buf.put_slice(session_id);

        buf.put_u16(self.cipher_suites.len() as u16 * 2);
        for suite in &self.cipher_suites {
            let v = if *suite == GREASE_PLACEHOLDER {
                seed.cipher
            } else {
                *suite
            };
            buf.put_u16(v);
        }

        buf.put_u8(self.compression_methods.len() as u8);
        buf.put_slice(&self.compression_methods);

        let mut ext_buf = BytesMut::new();
        let mut grease_seen = false;
        for ext in &self.extensions {
            let first = !grease_seen;
            if matches!(ext, Extension::Grease { .. }) {
                grease_seen = true;
            }
            ext_buf.put_u16(ext.id(seed, first));
            let mut payload = BytesMut::new();
            ext.marshal_payload(&mut payload, seed, pad_len);
            ext_buf.put_u16(payload.len() as u16);
            ext_buf.put_slice(&payload);
        }
        buf.put_u16(ext_buf.len() as u16);
        buf.put_slice(&ext_buf);
        buf.to_vec()
    }

    /// Regenerate the JA3 string for this spec, GREASE excluded.
    pub fn ja3(&self) -> String {
        let version = match self.tls_vers_max {
            tlsver::TLS1_3 => 771,
            tlsver::TLS1_2 => 770,
            _ => 769,
        };
        let join = |ids: &[u16]| {
            ids.iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("-")
        };
        let ciphers: Vec<u16> = self
            .cipher_suites
            .iter()
            .copied()
            .filter(|c| !is_grease(*c))
            .collect();
        let ext_ids: Vec<u16> = self.extensions.iter().filter_map(|e| e.ja3_id()).collect();
        let mut curves: Vec<u16> = Vec::new();
        let mut points: Vec<u8> = Vec::new();
        for ext in &self.extensions {
            match ext {
                Extension::SupportedCurves { curves: cs } => {
                    curves = cs.iter().copied().filter(|c| !is_grease(*c)).collect();
                }
                Extension::PointFormats { formats } => points = formats.clone(),
                _ => {}
            }
        }
        format!(
            "{version},{},{},{},{}",
            join(&ciphers),
            join(&ext_ids),
            join(&curves),
            points
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("-")
        )
    }
}

/// BoringSSL padding policy: pad the hello to 512 bytes when the
/// unpadded handshake message falls in (255, 512).
fn boring_padding_len(unpadded_msg_len: usize) -> usize {
    if unpadded_msg_len > 0xff && unpadded_msg_len < 0x200 {
        let padding = 0x200 - unpadded_msg_len;
        if padding >= 5 {
            padding - 4 // account for the extension header itself
        } else {
            1
        }
    } else {
        0
    }
}

fn split_dash(s: &str) -> impl Iterator<Item = &str> {
    s.split('-').filter(|t| !t.is_empty())
}

fn parse_grease_prefixed_u16(field: &str, what: &str) -> Result<Vec<u16>> {
    let mut out = Vec::new();
    for (i, tok) in split_dash(field).enumerate() {
        let v: u16 = tok
            .parse()
            .map_err(|_| Error::config(format!("bad JA3 {what} value {tok:?}")))?;
        if i == 0 && v != GREASE_PLACEHOLDER {
            out.push(GREASE_PLACEHOLDER);
        }
        out.push(v);
    }
    Ok(out)
}

fn parse_u8_list(field: &str) -> Result<Vec<u8>> {
    split_dash(field)
        .map(|tok| {
            tok.parse::<u8>()
                .map_err(|_| Error::config(format!("bad JA3 point format {tok:?}")))
        })
        .collect()
}

/// Extract `(extension_id, payload_len)` pairs from a serialized
/// ClientHello handshake message. Used by tests to assert wire order.
pub fn parse_extension_ids(msg: &[u8]) -> Result<Vec<(u16, usize)>> {
    let body = msg
        .get(4..)
        .ok_or_else(|| Error::protocol("short ClientHello"))?;
    let mut pos = 2 + 32; // legacy_version + random
    let sid_len = *body
        .get(pos)
        .ok_or_else(|| Error::protocol("truncated session id"))? as usize;
    pos += 1 + sid_len;
    let cipher_len = read_u16(body, pos)? as usize;
    pos += 2 + cipher_len;
    let comp_len = *body
        .get(pos)
        .ok_or_else(|| Error::protocol("truncated compression methods"))? as usize;
    pos += 1 + comp_len;
    let ext_total = read_u16(body, pos)? as usize;
    pos += 2;
    let end = pos + ext_total;
    let mut out = Vec::new();
    while pos < end {
        let id = read_u16(body, pos)?;
        let len = read_u16(body, pos + 2)? as usize;
        pos += 4 + len;
        out.push((id, len));
    }
    Ok(out)
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16> {
    let hi = *buf
        .get(pos)
        .ok_or_else(|| Error::protocol("truncated ClientHello"))?;
    let lo = *buf
        .get(pos + 1)
        .ok_or_else(|| Error::protocol("truncated ClientHello"))?;
    Ok(u16::from(hi) << 8 | u16::from(lo))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_JA3: &str = "771,4865-4866-4867,0-23-65281,29-23-24,0";

    #[test]
    fn parses_version_pair() {
        let spec = ClientHelloSpec::from_ja3(CHROME_JA3).unwrap();
        assert_eq!(spec.tls_vers_max, tlsver::TLS1_3);
        assert_eq!(spec.tls_vers_min, tlsver::TLS1_2);
    }

    #[test]
    fn rejects_unknown_version() {
        let err = ClientHelloSpec::from_ja3("768,4865,0,29,0").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(ClientHelloSpec::from_ja3("771,4865,0,29").is_err());
        assert!(ClientHelloSpec::from_ja3("").is_err());
    }

    #[test]
    fn prepends_grease_to_ciphers_and_curves() {
        let spec = ClientHelloSpec::from_ja3(CHROME_JA3).unwrap();
        assert_eq!(spec.cipher_suites[0], GREASE_PLACEHOLDER);
        assert_eq!(&spec.cipher_suites[1..], &[4865, 4866, 4867]);
        match spec
            .extensions
            .iter()
            .find(|e| matches!(e, Extension::SupportedCurves { .. }))
        {
            Some(Extension::SupportedCurves { curves }) => {
                assert_eq!(curves[0], GREASE_PLACEHOLDER);
                assert_eq!(&curves[1..], &[29, 23, 24]);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn grease_bookends_inserted() {
        let spec = ClientHelloSpec::from_ja3(CHROME_JA3).unwrap();
        assert!(matches!(spec.extensions.first(), Some(Extension::Grease { .. })));
        assert!(matches!(spec.extensions.last(), Some(Extension::Grease { .. })));
        // 3 listed extensions + 2 inserted GREASE
        assert_eq!(spec.extensions.len(), 5);
    }

    #[test]
    fn ja3_version_wins_over_explicit_43() {
        let spec = ClientHelloSpec::from_ja3("770,4865,43-0,29,0").unwrap();
        let versions = spec
            .extensions
            .iter()
            .find_map(|e| match e {
                Extension::SupportedVersions { versions } => Some(versions.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            versions,
            vec![GREASE_PLACEHOLDER, tlsver::TLS1_2, tlsver::TLS1_1]
        );
    }

    #[test]
    fn serialized_extension_order_matches_spec() {
        let spec =
            ClientHelloSpec::from_ja3("771,4865-4866,0-23-13-16-65281,29-23,0").unwrap();
        let seed = GreaseSeed::sample();
        let msg = spec.serialize_with_seed(&seed);
        let wire: Vec<u16> = parse_extension_ids(&msg)
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(wire.len(), spec.extensions.len());
        assert_eq!(wire[0], seed.ext_first);
        assert_eq!(*wire.last().unwrap(), seed.ext_last);
        assert_eq!(&wire[1..wire.len() - 1], &[0, 23, 13, 16, 65281]);
    }

    #[test]
    fn ja3_round_trip() {
        let spec = ClientHelloSpec::from_ja3(CHROME_JA3).unwrap();
        assert_eq!(spec.ja3(), CHROME_JA3);
    }

    #[test]
    fn session_id_is_32_bytes() {
        let spec = ClientHelloSpec::from_ja3(CHROME_JA3).unwrap();
        let msg = spec.serialize();
        // body starts at 4; session id length at offset 4 + 2 + 32
        assert_eq!(msg[4 + 34], 32);
    }

    #[test]
    fn compression_methods_are_null_only() {
        let spec = ClientHelloSpec::from_ja3(CHROME_JA3).unwrap();
        assert_eq!(spec.compression_methods, vec![0]);
    }
}
