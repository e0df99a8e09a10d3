//! Akamai-style HTTP/2 fingerprint strings.
//!
//! Grammar: `settings|conn_flow|priority|pseudo_order` where `settings`
//! is `k:v,k:v,...` (emitted in exactly that order), `conn_flow` is the
//! initial connection WINDOW_UPDATE increment, `priority` is `0` or a
//! comma list of `stream:exclusive:dependency:weight`, and
//! `pseudo_order` is the `m,a,s,p` shorthand.

use crate::error::{Error, Result};

/// HTTP/2 SETTINGS identifiers (RFC 9113 §6.5.2).
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// A pseudo-header name, for ordering purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoHeader {
    Method,
    Authority,
    Scheme,
    Path,
}

impl PseudoHeader {
    /// Wire name, colon included.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Method => ":method",
            Self::Authority => ":authority",
            Self::Scheme => ":scheme",
            Self::Path => ":path",
        }
    }

    fn from_shorthand(s: &str) -> Result<Self> {
        match s {
            "m" => Ok(Self::Method),
            "a" => Ok(Self::Authority),
            "s" => Ok(Self::Scheme),
            "p" => Ok(Self::Path),
            other => Err(Error::config(format!(
                "unknown pseudo-header shorthand {other:?}"
            ))),
        }
    }
}

/// An orphan PRIORITY frame sent during connection setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub stream_id: u32,
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

/// Typed HTTP/2 shaping parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Spec {
    /// `(id, value)` pairs for the initial SETTINGS frame, wire order
    /// preserved. Zero values are emitted, unspecified ids are not.
    pub settings: Vec<(u16, u32)>,
    /// Increment of the connection-level WINDOW_UPDATE sent right after
    /// SETTINGS.
    pub conn_flow: u32,
    /// Orphan PRIORITY frames sent after the WINDOW_UPDATE, in order.
    pub priorities: Vec<PrioritySpec>,
    /// Pseudo-header emission order for HEADERS frames.
    pub pseudo_order: Vec<PseudoHeader>,
}

impl Default for H2Spec {
    /// Chrome's shape: four settings in Chrome's order, 15 MiB window
    /// bump, `m,a,s,p`.
    fn default() -> Self {
        use settings_id::*;
        Self {
            settings: vec![
                (HEADER_TABLE_SIZE, 65536),
                (ENABLE_PUSH, 0),
                (INITIAL_WINDOW_SIZE, 6291456),
                (MAX_HEADER_LIST_SIZE, 262144),
            ],
            conn_flow: 15663105,
            priorities: Vec::new(),
            pseudo_order: vec![
                PseudoHeader::Method,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
                PseudoHeader::Path,
            ],
        }
    }
}

impl H2Spec {
    /// Parse an Akamai fingerprint string. Malformed input returns
    /// `Error::Config` without partial effect.
    pub fn from_akamai(spec: &str) -> Result<Self> {
        let tokens: Vec<&str> = spec.split('|').collect();
        if tokens.len() != 4 {
            return Err(Error::config(format!(
                "H2 spec must have 4 '|'-separated fields, got {}",
                tokens.len()
            )));
        }

        let mut settings = Vec::new();
        for pair in tokens[0].split(',').filter(|t| !t.is_empty()) {
            let (k, v) = pair
                .split_once(':')
                .ok_or_else(|| Error::config(format!("bad H2 setting {pair:?}")))?;
            let id: u16 = k
                .parse()
                .map_err(|_| Error::config(format!("bad H2 setting id {k:?}")))?;
            let value: u32 = v
                .parse()
                .map_err(|_| Error::config(format!("bad H2 setting value {v:?}")))?;
            settings.push((id, value));
        }

        let conn_flow: u32 = tokens[1]
            .parse()
            .map_err(|_| Error::config(format!("bad H2 connection flow {:?}", tokens[1])))?;

        let priorities = parse_priorities(tokens[2])?;

        let mut pseudo_order = Vec::new();
        for key in tokens[3].split(',').filter(|t| !t.is_empty()) {
            pseudo_order.push(PseudoHeader::from_shorthand(key)?);
        }
        if pseudo_order.is_empty() {
            return Err(Error::config("H2 spec pseudo-header order is empty"));
        }

        Ok(Self {
            settings,
            conn_flow,
            priorities,
            pseudo_order,
        })
    }

    /// Regenerate the Akamai string for this spec.
    pub fn akamai(&self) -> String {
        let settings = self
            .settings
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(",");
        let priorities = if self.priorities.is_empty() {
            "0".to_string()
        } else {
            self.priorities
                .iter()
                .map(|p| {
                    format!(
                        "{}:{}:{}:{}",
                        p.stream_id,
                        u8::from(p.exclusive),
                        p.dependency,
                        p.weight
                    )
                })
                .collect::<Vec<_>>()
                .join(",")
        };
        let order = self
            .pseudo_order
            .iter()
            .map(|p| match p {
                PseudoHeader::Method => "m",
                PseudoHeader::Authority => "a",
                PseudoHeader::Scheme => "s",
                PseudoHeader::Path => "p",
            })
            .collect::<Vec<_>>()
            .join(",");
        format!("{settings}|{}|{priorities}|{order}", self.conn_flow)
    }
}

fn parse_priorities(token: &str) -> Result<Vec<PrioritySpec>> {
    if token == "0" || token == "_" || token.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for group in token.split(',') {
        let parts: Vec<&str> = group.split(':').collect();
        if parts.len() != 4 {
            return Err(Error::config(format!("bad H2 priority group {group:?}")));
        }
        let parse =
            |s: &str| -> Result<u32> { s.parse().map_err(|_| Error::config("bad H2 priority")) };
        out.push(PrioritySpec {
            stream_id: parse(parts[0])?,
            exclusive: parse(parts[1])? != 0,
            dependency: parse(parts[2])?,
            weight: parse(parts[3])? as u8,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ordered_settings() {
        let spec = H2Spec::from_akamai("1:65536,4:131072|12517377|0|m,a,s,p").unwrap();
        assert_eq!(spec.settings, vec![(1, 65536), (4, 131072)]);
        assert_eq!(spec.conn_flow, 12517377);
        assert_eq!(
            spec.pseudo_order,
            vec![
                PseudoHeader::Method,
                PseudoHeader::Authority,
                PseudoHeader::Scheme,
                PseudoHeader::Path
            ]
        );
    }

    #[test]
    fn preserves_unsorted_setting_order() {
        let spec = H2Spec::from_akamai("4:131072,1:65536|1|0|m,s,a,p").unwrap();
        assert_eq!(spec.settings, vec![(4, 131072), (1, 65536)]);
    }

    #[test]
    fn zero_value_settings_survive() {
        let spec = H2Spec::from_akamai("2:0|1|0|m,a,s,p").unwrap();
        assert_eq!(spec.settings, vec![(2, 0)]);
    }

    #[test]
    fn parses_firefox_priorities() {
        let spec =
            H2Spec::from_akamai("1:65536|131072|3:0:0:201,5:0:0:101|m,p,a,s").unwrap();
        assert_eq!(spec.priorities.len(), 2);
        assert_eq!(
            spec.priorities[0],
            PrioritySpec {
                stream_id: 3,
                exclusive: false,
                dependency: 0,
                weight: 201
            }
        );
        assert_eq!(spec.pseudo_order[1], PseudoHeader::Path);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(H2Spec::from_akamai("1:65536|0|m,a,s,p").is_err());
        assert!(H2Spec::from_akamai("165536|0|0|m,a,s,p").is_err());
        assert!(H2Spec::from_akamai("1:65536|x|0|m,a,s,p").is_err());
        assert!(H2Spec::from_akamai("1:65536|0|0|m,a,q,p").is_err());
    }

    #[test]
    fn akamai_round_trip() {
        let s = "1:65536,2:0,4:6291456,6:262144|15663105|0|m,a,s,p";
        assert_eq!(H2Spec::from_akamai(s).unwrap().akamai(), s);
    }
}
