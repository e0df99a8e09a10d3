//! HTTP Digest authentication (RFC 7616).
//!
//! On a 401 with a `Digest` challenge, the dispatcher rebuilds the
//! original request with an `Authorization` header computed here and
//! round-trips it once more. The nonce counter is strictly monotonic
//! per credentials.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use md5::Md5;
use sha2::{Digest as _, Sha256, Sha512_256};

use crate::error::{Error, Result};

/// Parsed WWW-Authenticate Digest challenge.
#[derive(Debug, Clone, Default)]
pub struct Challenge {
    pub realm: String,
    pub domain: String,
    pub nonce: String,
    pub opaque: String,
    pub stale: String,
    pub algorithm: String,
    pub qop: String,
    pub userhash: bool,
}

impl Challenge {
    /// Parse a `WWW-Authenticate: Digest ...` header value. Unknown
    /// parameters and non-UTF-8 charsets are rejected.
    pub fn parse(header: &str) -> Result<Self> {
        let trimmed = header.trim();
        let body = trimmed
            .strip_prefix("Digest ")
            .ok_or_else(|| Error::auth("challenge is not a Digest challenge"))?;

        let mut challenge = Self::default();
        for part in split_challenge_params(body) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::auth("malformed challenge parameter"))?;
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "realm" => challenge.realm = value,
                "domain" => challenge.domain = value,
                "nonce" => challenge.nonce = value,
                "opaque" => challenge.opaque = value,
                "stale" => challenge.stale = value,
                "algorithm" => challenge.algorithm = value,
                "qop" => challenge.qop = value,
                "userhash" => challenge.userhash = value.eq_ignore_ascii_case("true"),
                "charset" => {
                    if !value.eq_ignore_ascii_case("UTF-8") {
                        return Err(Error::auth(format!("unsupported charset {value:?}")));
                    }
                }
                other => {
                    return Err(Error::auth(format!("unknown challenge parameter {other:?}")));
                }
            }
        }
        Ok(challenge)
    }

    fn is_session_algorithm(&self) -> bool {
        self.algorithm.ends_with("-sess")
    }

    /// Validate the qop list: only `auth` is supported. An empty qop is
    /// the legacy RFC 2069 mode.
    fn validate_qop(&self) -> Result<()> {
        if self.qop.is_empty() {
            return Ok(());
        }
        let supported = self
            .qop
            .split(',')
            .map(str::trim)
            .any(|q| q == "auth");
        if supported {
            Ok(())
        } else {
            Err(Error::auth(format!("no supported qop in {:?}", self.qop)))
        }
    }
}

/// Digest credentials with the per-credentials nonce counter.
pub struct DigestAuth {
    username: String,
    password: String,
    nc: AtomicU32,
}

impl DigestAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            username: username.into(),
            password: password.into(),
            nc: AtomicU32::new(0),
        })
    }

    /// Build the `Authorization` header value answering `challenge` for
    /// `method` on `uri`.
    pub fn authorization(&self, challenge: &Challenge, method: &str, uri: &str) -> Result<String> {
        let hash = hash_fn(&challenge.algorithm)?;
        challenge.validate_qop()?;

        let nc = self.nc.fetch_add(1, Ordering::SeqCst) + 1;
        let nc_hex = format!("{nc:08x}");
        let cnonce = generate_cnonce()?;

        let mut ha1 = hash(&format!(
            "{}:{}:{}",
            self.username, challenge.realm, self.password
        ));
        if challenge.is_session_algorithm() {
            ha1 = hash(&format!("{ha1}:{}:{cnonce}", challenge.nonce));
        }
        let ha2 = hash(&format!("{method}:{uri}"));

        let use_qop = !challenge.qop.is_empty();
        let response = if use_qop {
            hash(&format!(
                "{ha1}:{}:{nc_hex}:{cnonce}:auth:{ha2}",
                challenge.nonce
            ))
        } else {
            hash(&format!("{ha1}:{}:{ha2}", challenge.nonce))
        };

        let username = if challenge.userhash {
            hash(&format!("{}:{}", self.username, challenge.realm))
        } else {
            self.username.clone()
        };

        let mut fields = Vec::with_capacity(10);
        if challenge.userhash {
            fields.push("userhash=true".to_string());
        }
        fields.push(format!(r#"username="{username}""#));
        fields.push(format!(r#"realm="{}""#, challenge.realm));
        fields.push(format!(r#"nonce="{}""#, challenge.nonce));
        fields.push(format!(r#"uri="{uri}""#));
        fields.push(format!(r#"response="{response}""#));
        if !challenge.algorithm.is_empty() {
            fields.push(format!("algorithm={}", challenge.algorithm));
        }
        if !challenge.opaque.is_empty() {
            fields.push(format!(r#"opaque="{}""#, challenge.opaque));
        }
        if use_qop {
            fields.push("qop=auth".to_string());
            fields.push(format!("nc={nc_hex}"));
            fields.push(format!(r#"cnonce="{cnonce}""#));
        }
        Ok(format!("Digest {}", fields.join(", ")))
    }
}

type HashFn = fn(&str) -> String;

fn hash_fn(algorithm: &str) -> Result<HashFn> {
    match algorithm {
        "" | "MD5" | "MD5-sess" => Ok(md5_hex),
        "SHA-256" | "SHA-256-sess" => Ok(sha256_hex),
        "SHA-512-256" | "SHA-512-256-sess" => Ok(sha512_256_hex),
        other => Err(Error::auth(format!("unsupported algorithm {other:?}"))),
    }
}

fn md5_hex(data: &str) -> String {
    hex::encode(Md5::digest(data.as_bytes()))
}

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

fn sha512_256_hex(data: &str) -> String {
    hex::encode(Sha512_256::digest(data.as_bytes()))
}

/// 16 random bytes, hex-encoded: exactly 32 characters.
fn generate_cnonce() -> Result<String> {
    let mut raw = [0u8; 16];
    getrandom::getrandom(&mut raw)
        .map_err(|e| Error::auth(format!("failed to generate cnonce: {e}")))?;
    Ok(hex::encode(raw))
}

/// Split challenge parameters on commas outside quoted strings.
fn split_challenge_params(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut in_quotes = false;
    for (i, c) in body.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let piece = body[start..i].trim();
                if !piece.is_empty() {
                    parts.push(piece);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = body[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Parse an Authorization header produced here back into a map. Test
/// support for verifying the response value.
pub fn parse_authorization(header: &str) -> HashMap<String, String> {
    let body = header.strip_prefix("Digest ").unwrap_or(header);
    split_challenge_params(body)
        .into_iter()
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_challenge() {
        let challenge = Challenge::parse(
            r#"Digest realm="r", nonce="n", qop="auth", algorithm=MD5, opaque="xyz", userhash=true"#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "r");
        assert_eq!(challenge.nonce, "n");
        assert_eq!(challenge.qop, "auth");
        assert_eq!(challenge.algorithm, "MD5");
        assert_eq!(challenge.opaque, "xyz");
        assert!(challenge.userhash);
    }

    #[test]
    fn rejects_unknown_parameter_and_bad_charset() {
        assert!(Challenge::parse(r#"Digest realm="r", flavor="lemon""#).is_err());
        assert!(Challenge::parse(r#"Digest realm="r", charset=latin-1"#).is_err());
        assert!(Challenge::parse(r#"Digest realm="r", charset=UTF-8"#).is_ok());
        assert!(Challenge::parse("Basic xyz").is_err());
    }

    #[test]
    fn rejects_unsupported_algorithm_and_qop() {
        let auth = DigestAuth::new("a", "b");
        let mut challenge = Challenge::parse(r#"Digest realm="r", nonce="n""#).unwrap();
        challenge.algorithm = "SHA-1".into();
        assert!(auth.authorization(&challenge, "GET", "/").is_err());
        challenge.algorithm = "MD5".into();
        challenge.qop = "auth-int".into();
        assert!(auth.authorization(&challenge, "GET", "/").is_err());
    }

    #[test]
    fn md5_response_matches_formula() {
        let challenge =
            Challenge::parse(r#"Digest realm="r", nonce="n", qop="auth", algorithm=MD5"#).unwrap();
        let auth = DigestAuth::new("a", "b");
        let header = auth.authorization(&challenge, "GET", "/x").unwrap();
        let fields = parse_authorization(&header);

        let cnonce = &fields["cnonce"];
        assert_eq!(cnonce.len(), 32);
        assert_eq!(fields["nc"], "00000001");

        let ha1 = md5_hex("a:r:b");
        let ha2 = md5_hex("GET:/x");
        let expected = md5_hex(&format!("{ha1}:n:00000001:{cnonce}:auth:{ha2}"));
        assert_eq!(fields["response"], expected);
    }

    #[test]
    fn nc_is_strictly_monotonic() {
        let challenge =
            Challenge::parse(r#"Digest realm="r", nonce="n", qop="auth", algorithm=MD5"#).unwrap();
        let auth = DigestAuth::new("a", "b");
        for expected in 1..=3u32 {
            let header = auth.authorization(&challenge, "GET", "/").unwrap();
            let fields = parse_authorization(&header);
            assert_eq!(fields["nc"], format!("{expected:08x}"));
        }
    }

    #[test]
    fn session_algorithm_folds_nonce_and_cnonce() {
        let challenge = Challenge::parse(
            r#"Digest realm="r", nonce="n", qop="auth", algorithm=SHA-256-sess"#,
        )
        .unwrap();
        let auth = DigestAuth::new("user", "pass");
        let header = auth.authorization(&challenge, "GET", "/p").unwrap();
        let fields = parse_authorization(&header);
        let cnonce = &fields["cnonce"];

        let ha1 = sha256_hex(&format!("{}:n:{cnonce}", sha256_hex("user:r:pass")));
        let ha2 = sha256_hex("GET:/p");
        let expected = sha256_hex(&format!("{ha1}:n:00000001:{cnonce}:auth:{ha2}"));
        assert_eq!(fields["response"], expected);
    }

    #[test]
    fn userhash_replaces_username() {
        let challenge = Challenge::parse(
            r#"Digest realm="api@example.org", nonce="n", qop="auth", algorithm=SHA-256, userhash=true"#,
        )
        .unwrap();
        let auth = DigestAuth::new("j\u{00e4}s\u{00f8}n doe", "secret");
        let header = auth.authorization(&challenge, "GET", "/doe.json").unwrap();
        let fields = parse_authorization(&header);
        assert_eq!(fields["userhash"], "true");
        assert_eq!(
            fields["username"],
            sha256_hex("j\u{00e4}s\u{00f8}n doe:api@example.org")
        );
    }

    #[test]
    fn legacy_mode_without_qop() {
        let challenge = Challenge::parse(r#"Digest realm="r", nonce="n""#).unwrap();
        let auth = DigestAuth::new("a", "b");
        let header = auth.authorization(&challenge, "GET", "/x").unwrap();
        let fields = parse_authorization(&header);
        assert!(!fields.contains_key("nc"));
        assert!(!fields.contains_key("cnonce"));
        let expected = md5_hex(&format!("{}:n:{}", md5_hex("a:r:b"), md5_hex("GET:/x")));
        assert_eq!(fields["response"], expected);
    }
}
