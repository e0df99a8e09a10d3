//! HTTP/3 frame and stream-type codec (RFC 9114 §6–7).

use super::varint::{read_varint, write_varint};

/// Unidirectional stream types (RFC 9114 §6.2).
pub mod stream_type {
    pub const CONTROL: u64 = 0x00;
    pub const PUSH: u64 = 0x01;
    pub const QPACK_ENCODER: u64 = 0x02;
    pub const QPACK_DECODER: u64 = 0x03;
}

/// Frame types (RFC 9114 §7.2).
pub mod frame_type {
    pub const DATA: u64 = 0x00;
    pub const HEADERS: u64 = 0x01;
    pub const CANCEL_PUSH: u64 = 0x03;
    pub const SETTINGS: u64 = 0x04;
    pub const PUSH_PROMISE: u64 = 0x05;
    pub const GOAWAY: u64 = 0x07;
    pub const MAX_PUSH_ID: u64 = 0x0d;
}

/// HTTP/3 and HTTP-datagram error codes.
pub mod error_code {
    pub const H3_DATAGRAM_ERROR: u64 = 0x33;
    pub const H3_NO_ERROR: u64 = 0x100;
    pub const H3_GENERAL_PROTOCOL_ERROR: u64 = 0x101;
    pub const H3_INTERNAL_ERROR: u64 = 0x102;
    pub const H3_STREAM_CREATION_ERROR: u64 = 0x103;
    pub const H3_CLOSED_CRITICAL_STREAM: u64 = 0x104;
    pub const H3_FRAME_UNEXPECTED: u64 = 0x105;
    pub const H3_FRAME_ERROR: u64 = 0x106;
    pub const H3_ID_ERROR: u64 = 0x108;
    pub const H3_SETTINGS_ERROR: u64 = 0x109;
    pub const H3_MISSING_SETTINGS: u64 = 0x10a;
    pub const H3_REQUEST_CANCELLED: u64 = 0x10c;
}

/// SETTINGS identifiers.
pub mod setting {
    pub const QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
    pub const MAX_FIELD_SECTION_SIZE: u64 = 0x06;
    pub const QPACK_BLOCKED_STREAMS: u64 = 0x07;
    pub const ENABLE_CONNECT_PROTOCOL: u64 = 0x08;
    pub const H3_DATAGRAM: u64 = 0x33;
}

/// Append a complete frame (type, length, payload).
pub fn write_frame(out: &mut Vec<u8>, frame_type: u64, payload: &[u8]) {
    write_varint(out, frame_type);
    write_varint(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

/// Try to read one complete frame from the front of `buf`.
/// Returns `(type, payload, consumed)` or `None` when more bytes are
/// needed.
pub fn read_frame(buf: &[u8]) -> Option<(u64, Vec<u8>, usize)> {
    let (frame_type, n1) = read_varint(buf)?;
    let (len, n2) = read_varint(&buf[n1..])?;
    let start = n1 + n2;
    let end = start.checked_add(len as usize)?;
    if buf.len() < end {
        return None;
    }
    Some((frame_type, buf[start..end].to_vec(), end))
}

/// Peer SETTINGS, as relevant to the client.
#[derive(Debug, Clone, Default)]
pub struct H3Settings {
    pub enable_datagrams: bool,
    pub enable_extended_connect: bool,
    pub qpack_max_table_capacity: u64,
    pub max_field_section_size: Option<u64>,
    pub other: Vec<(u64, u64)>,
}

impl H3Settings {
    /// Parse a SETTINGS frame payload (a sequence of id/value varints).
    pub fn parse(payload: &[u8]) -> Result<Self, String> {
        let mut settings = Self::default();
        let mut pos = 0usize;
        while pos < payload.len() {
            let (id, n1) = read_varint(&payload[pos..]).ok_or("truncated SETTINGS id")?;
            pos += n1;
            let (value, n2) = read_varint(&payload[pos..]).ok_or("truncated SETTINGS value")?;
            pos += n2;
            match id {
                setting::H3_DATAGRAM => settings.enable_datagrams = value != 0,
                setting::ENABLE_CONNECT_PROTOCOL => settings.enable_extended_connect = value != 0,
                setting::QPACK_MAX_TABLE_CAPACITY => settings.qpack_max_table_capacity = value,
                setting::MAX_FIELD_SECTION_SIZE => settings.max_field_section_size = Some(value),
                other => settings.other.push((other, value)),
            }
        }
        Ok(settings)
    }

    /// Serialize the client's SETTINGS payload: zero QPACK capacity,
    /// datagram support when enabled, plus any additional settings.
    pub fn client_payload(enable_datagrams: bool, additional: &[(u64, u64)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        write_varint(&mut out, setting::QPACK_MAX_TABLE_CAPACITY);
        write_varint(&mut out, 0);
        write_varint(&mut out, setting::QPACK_BLOCKED_STREAMS);
        write_varint(&mut out, 0);
        if enable_datagrams {
            write_varint(&mut out, setting::H3_DATAGRAM);
            write_varint(&mut out, 1);
        }
        for (id, value) in additional {
            write_varint(&mut out, *id);
            write_varint(&mut out, *value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, frame_type::HEADERS, b"abc");
        let (ty, payload, consumed) = read_frame(&buf).unwrap();
        assert_eq!(ty, frame_type::HEADERS);
        assert_eq!(payload, b"abc");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn partial_frame_returns_none() {
        let mut buf = Vec::new();
        write_frame(&mut buf, frame_type::DATA, b"0123456789");
        assert!(read_frame(&buf[..buf.len() - 1]).is_none());
        assert!(read_frame(&[]).is_none());
    }

    #[test]
    fn settings_round_trip() {
        let payload = H3Settings::client_payload(true, &[(0x4242, 7)]);
        let settings = H3Settings::parse(&payload).unwrap();
        assert!(settings.enable_datagrams);
        assert_eq!(settings.qpack_max_table_capacity, 0);
        assert_eq!(settings.other, vec![(0x4242, 7)]);
    }

    #[test]
    fn extended_connect_flag_parsed() {
        let mut payload = Vec::new();
        super::super::varint::write_varint(&mut payload, setting::ENABLE_CONNECT_PROTOCOL);
        super::super::varint::write_varint(&mut payload, 1);
        let settings = H3Settings::parse(&payload).unwrap();
        assert!(settings.enable_extended_connect);
    }
}
