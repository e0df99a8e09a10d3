//! HTTP protocol version selection.

/// Protocol selection for a request or client default.
///
/// `Auto` negotiates via ALPN (h2 preferred when offered). The `Force*`
/// variants pin the protocol regardless of negotiation and take
/// precedence over everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    /// Negotiate: ALPN decides between HTTP/2 and HTTP/1.1.
    #[default]
    Auto,
    /// Force HTTP/1.1 (ALPN offers http/1.1 only).
    ForceHttp1,
    /// Force HTTP/2 over TLS (ALPN offers h2 only).
    ForceHttp2,
    /// Force HTTP/3 over QUIC.
    ForceHttp3,
}

impl HttpVersion {
    /// Whether this selection pins HTTP/3.
    pub fn is_h3(&self) -> bool {
        matches!(self, Self::ForceHttp3)
    }

    /// ALPN protocol list to offer for this selection, in wire format.
    pub fn alpn_protos(&self) -> &'static [u8] {
        match self {
            Self::ForceHttp1 => b"\x08http/1.1",
            Self::ForceHttp2 => b"\x02h2",
            _ => b"\x02h2\x08http/1.1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpn_wire_format() {
        assert_eq!(HttpVersion::Auto.alpn_protos(), b"\x02h2\x08http/1.1");
        assert_eq!(HttpVersion::ForceHttp2.alpn_protos(), b"\x02h2");
        assert_eq!(HttpVersion::ForceHttp1.alpn_protos(), b"\x08http/1.1");
    }
}
