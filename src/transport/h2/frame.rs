//! HTTP/2 frame codec (RFC 9113).
//!
//! Frames serialize exactly as configured: SETTINGS preserves the order
//! of `set` calls (and emits zero values), which is what makes the
//! connection preamble shapeable.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::fingerprint::h2spec::PrioritySpec;

/// Frame header length (RFC 9113 §4.1).
pub const FRAME_HEADER_LEN: usize = 9;

/// Smallest allowed SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Client connection preface.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameKind {
    fn from(v: u8) -> Self {
        match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(kind: FrameKind) -> u8 {
        match kind {
            FrameKind::Data => 0x0,
            FrameKind::Headers => 0x1,
            FrameKind::Priority => 0x2,
            FrameKind::RstStream => 0x3,
            FrameKind::Settings => 0x4,
            FrameKind::PushPromise => 0x5,
            FrameKind::Ping => 0x6,
            FrameKind::GoAway => 0x7,
            FrameKind::WindowUpdate => 0x8,
            FrameKind::Continuation => 0x9,
            FrameKind::Unknown(v) => v,
        }
    }
}

/// Frame flag bits.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1; // SETTINGS / PING context
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Error codes (RFC 9113 §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H2ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    Unknown(u32),
}

impl From<u32> for H2ErrorCode {
    fn from(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            other => Self::Unknown(other),
        }
    }
}

impl From<H2ErrorCode> for u32 {
    fn from(code: H2ErrorCode) -> u32 {
        match code {
            H2ErrorCode::NoError => 0x0,
            H2ErrorCode::ProtocolError => 0x1,
            H2ErrorCode::InternalError => 0x2,
            H2ErrorCode::FlowControlError => 0x3,
            H2ErrorCode::SettingsTimeout => 0x4,
            H2ErrorCode::StreamClosed => 0x5,
            H2ErrorCode::FrameSizeError => 0x6,
            H2ErrorCode::RefusedStream => 0x7,
            H2ErrorCode::Cancel => 0x8,
            H2ErrorCode::CompressionError => 0x9,
            H2ErrorCode::ConnectError => 0xa,
            H2ErrorCode::EnhanceYourCalm => 0xb,
            H2ErrorCode::InadequateSecurity => 0xc,
            H2ErrorCode::Http11Required => 0xd,
            H2ErrorCode::Unknown(v) => v,
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub kind: FrameKind,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse 9 header bytes. Returns `None` if the reserved stream-id
    /// bit is set or the buffer is short.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        if buf[5] & 0x80 != 0 {
            return None;
        }
        Some(Self {
            length: (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]),
            kind: FrameKind::from(buf[3]),
            flags: buf[4],
            stream_id: (u32::from(buf[5] & 0x7f) << 24)
                | (u32::from(buf[6]) << 16)
                | (u32::from(buf[7]) << 8)
                | u32::from(buf[8]),
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8((self.length >> 16) as u8);
        buf.put_u8((self.length >> 8) as u8);
        buf.put_u8(self.length as u8);
        buf.put_u8(self.kind.into());
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & 0x7fff_ffff);
    }
}

/// SETTINGS frame. `entries` is emitted in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SettingsFrame {
    pub entries: Vec<(u16, u32)>,
    pub ack: bool,
}

impl SettingsFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ack() -> Self {
        Self {
            entries: Vec::new(),
            ack: true,
        }
    }

    /// Build from an ordered `(id, value)` list.
    pub fn from_entries(entries: &[(u16, u32)]) -> Self {
        Self {
            entries: entries.to_vec(),
            ack: false,
        }
    }

    /// Append a setting; call order is wire order.
    pub fn set(&mut self, id: u16, value: u32) -> &mut Self {
        self.entries.push((id, value));
        self
    }

    pub fn serialize(&self) -> BytesMut {
        let payload_len = if self.ack { 0 } else { self.entries.len() * 6 };
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload_len);
        FrameHeader {
            length: payload_len as u32,
            kind: FrameKind::Settings,
            flags: if self.ack { flags::ACK } else { 0 },
            stream_id: 0,
        }
        .write(&mut buf);
        if !self.ack {
            for (id, value) in &self.entries {
                buf.put_u16(*id);
                buf.put_u32(*value);
            }
        }
        buf
    }

    pub fn parse(frame_flags: u8, mut payload: Bytes) -> Self {
        let ack = frame_flags & flags::ACK != 0;
        let mut entries = Vec::new();
        while payload.remaining() >= 6 {
            let id = payload.get_u16();
            let value = payload.get_u32();
            entries.push((id, value));
        }
        Self { entries, ack }
    }
}

/// WINDOW_UPDATE frame.
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    pub stream_id: u32,
    pub increment: u32,
}

impl WindowUpdateFrame {
    pub fn new(stream_id: u32, increment: u32) -> Self {
        Self {
            stream_id,
            increment,
        }
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + 4);
        FrameHeader {
            length: 4,
            kind: FrameKind::WindowUpdate,
            flags: 0,
            stream_id: self.stream_id,
        }
        .write(&mut buf);
        buf.put_u32(self.increment & 0x7fff_ffff);
        buf
    }

    /// Returns `None` for a zero increment (connection error per
    /// RFC 9113 §6.9.1).
    pub fn parse(stream_id: u32, mut payload: Bytes) -> Option<Self> {
        if payload.remaining() < 4 {
            return None;
        }
        let increment = payload.get_u32() & 0x7fff_ffff;
        if increment == 0 {
            return None;
        }
        Some(Self {
            stream_id,
            increment,
        })
    }
}

/// PRIORITY frame for an orphan stream.
#[derive(Debug, Clone, Copy)]
pub struct PriorityFrame {
    pub stream_id: u32,
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

impl From<PrioritySpec> for PriorityFrame {
    fn from(spec: PrioritySpec) -> Self {
        Self {
            stream_id: spec.stream_id,
            exclusive: spec.exclusive,
            dependency: spec.dependency,
            weight: spec.weight,
        }
    }
}

impl PriorityFrame {
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + 5);
        FrameHeader {
            length: 5,
            kind: FrameKind::Priority,
            flags: 0,
            stream_id: self.stream_id,
        }
        .write(&mut buf);
        let dep = if self.exclusive {
            self.dependency | 0x8000_0000
        } else {
            self.dependency
        };
        buf.put_u32(dep);
        // Wire weight is weight-1.
        buf.put_u8(self.weight.saturating_sub(1));
        buf
    }
}

/// HEADERS frame carrying an already-encoded header block fragment.
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    pub stream_id: u32,
    pub block: Bytes,
    pub end_stream: bool,
    pub end_headers: bool,
}

impl HeadersFrame {
    pub fn new(stream_id: u32, block: Bytes) -> Self {
        Self {
            stream_id,
            block,
            end_stream: false,
            end_headers: true,
        }
    }

    pub fn end_stream(mut self, end: bool) -> Self {
        self.end_stream = end;
        self
    }

    pub fn end_headers(mut self, end: bool) -> Self {
        self.end_headers = end;
        self
    }

    pub fn serialize(&self) -> BytesMut {
        let mut frame_flags = 0u8;
        if self.end_stream {
            frame_flags |= flags::END_STREAM;
        }
        if self.end_headers {
            frame_flags |= flags::END_HEADERS;
        }
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.block.len());
        FrameHeader {
            length: self.block.len() as u32,
            kind: FrameKind::Headers,
            flags: frame_flags,
            stream_id: self.stream_id,
        }
        .write(&mut buf);
        buf.extend_from_slice(&self.block);
        buf
    }

    /// Strip padding and priority from a received HEADERS payload,
    /// leaving the header block fragment.
    pub fn strip_payload(frame_flags: u8, mut payload: Bytes) -> Result<Bytes, String> {
        let pad_len = if frame_flags & flags::PADDED != 0 {
            if payload.remaining() < 1 {
                return Err("padded HEADERS missing pad length".into());
            }
            let n = payload.get_u8() as usize;
            if n >= payload.remaining() {
                return Err("HEADERS padding exceeds payload".into());
            }
            n
        } else {
            0
        };
        if frame_flags & flags::PRIORITY != 0 {
            if payload.remaining() < 5 {
                return Err("HEADERS priority data truncated".into());
            }
            payload.advance(5);
        }
        let block_len = payload.remaining() - pad_len;
        Ok(payload.copy_to_bytes(block_len))
    }
}

/// CONTINUATION frame.
#[derive(Debug, Clone)]
pub struct ContinuationFrame {
    pub stream_id: u32,
    pub fragment: Bytes,
    pub end_headers: bool,
}

impl ContinuationFrame {
    pub fn new(stream_id: u32, fragment: Bytes, end_headers: bool) -> Self {
        Self {
            stream_id,
            fragment,
            end_headers,
        }
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.fragment.len());
        FrameHeader {
            length: self.fragment.len() as u32,
            kind: FrameKind::Continuation,
            flags: if self.end_headers { flags::END_HEADERS } else { 0 },
            stream_id: self.stream_id,
        }
        .write(&mut buf);
        buf.extend_from_slice(&self.fragment);
        buf
    }
}

/// DATA frame.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub stream_id: u32,
    pub data: Bytes,
    pub end_stream: bool,
}

impl DataFrame {
    pub fn new(stream_id: u32, data: Bytes) -> Self {
        Self {
            stream_id,
            data,
            end_stream: false,
        }
    }

    pub fn end_stream(mut self, end: bool) -> Self {
        self.end_stream = end;
        self
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.data.len());
        FrameHeader {
            length: self.data.len() as u32,
            kind: FrameKind::Data,
            flags: if self.end_stream { flags::END_STREAM } else { 0 },
            stream_id: self.stream_id,
        }
        .write(&mut buf);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Strip padding from a received DATA payload.
    pub fn strip_payload(frame_flags: u8, mut payload: Bytes) -> Result<Bytes, String> {
        if frame_flags & flags::PADDED != 0 {
            if payload.remaining() < 1 {
                return Err("padded DATA missing pad length".into());
            }
            let n = payload.get_u8() as usize;
            if n > payload.remaining() {
                return Err("DATA padding exceeds payload".into());
            }
            let data_len = payload.remaining() - n;
            return Ok(payload.copy_to_bytes(data_len));
        }
        Ok(payload)
    }
}

/// RST_STREAM frame.
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    pub stream_id: u32,
    pub code: H2ErrorCode,
}

impl RstStreamFrame {
    pub fn new(stream_id: u32, code: H2ErrorCode) -> Self {
        Self { stream_id, code }
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + 4);
        FrameHeader {
            length: 4,
            kind: FrameKind::RstStream,
            flags: 0,
            stream_id: self.stream_id,
        }
        .write(&mut buf);
        buf.put_u32(self.code.into());
        buf
    }

    pub fn parse(stream_id: u32, mut payload: Bytes) -> Option<Self> {
        if payload.remaining() < 4 {
            return None;
        }
        Some(Self {
            stream_id,
            code: H2ErrorCode::from(payload.get_u32()),
        })
    }
}

/// GOAWAY frame.
#[derive(Debug, Clone)]
pub struct GoAwayFrame {
    pub last_stream_id: u32,
    pub code: H2ErrorCode,
    pub debug_data: Bytes,
}

impl GoAwayFrame {
    pub fn new(last_stream_id: u32, code: H2ErrorCode) -> Self {
        Self {
            last_stream_id,
            code,
            debug_data: Bytes::new(),
        }
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + 8 + self.debug_data.len());
        FrameHeader {
            length: (8 + self.debug_data.len()) as u32,
            kind: FrameKind::GoAway,
            flags: 0,
            stream_id: 0,
        }
        .write(&mut buf);
        buf.put_u32(self.last_stream_id & 0x7fff_ffff);
        buf.put_u32(self.code.into());
        buf.extend_from_slice(&self.debug_data);
        buf
    }

    pub fn parse(mut payload: Bytes) -> Option<Self> {
        if payload.remaining() < 8 {
            return None;
        }
        let last_stream_id = payload.get_u32() & 0x7fff_ffff;
        let code = H2ErrorCode::from(payload.get_u32());
        Some(Self {
            last_stream_id,
            code,
            debug_data: payload,
        })
    }
}

/// PING frame.
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    pub payload: [u8; 8],
    pub ack: bool,
}

impl PingFrame {
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + 8);
        FrameHeader {
            length: 8,
            kind: FrameKind::Ping,
            flags: if self.ack { flags::ACK } else { 0 },
            stream_id: 0,
        }
        .write(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let mut buf = BytesMut::new();
        FrameHeader {
            length: 1234,
            kind: FrameKind::Headers,
            flags: flags::END_HEADERS,
            stream_id: 7,
        }
        .write(&mut buf);
        let parsed = FrameHeader::parse(&buf).unwrap();
        assert_eq!(parsed.length, 1234);
        assert_eq!(parsed.kind, FrameKind::Headers);
        assert_eq!(parsed.flags, flags::END_HEADERS);
        assert_eq!(parsed.stream_id, 7);
    }

    #[test]
    fn reserved_bit_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader {
            length: 0,
            kind: FrameKind::Data,
            flags: 0,
            stream_id: 1,
        }
        .write(&mut buf);
        buf[5] |= 0x80;
        assert!(FrameHeader::parse(&buf).is_none());
    }

    #[test]
    fn settings_preserves_insertion_order() {
        let frame = SettingsFrame::from_entries(&[(4, 131072), (1, 65536), (2, 0)]);
        let wire = frame.serialize();
        let parsed = SettingsFrame::parse(0, Bytes::copy_from_slice(&wire[FRAME_HEADER_LEN..]));
        assert_eq!(parsed.entries, vec![(4, 131072), (1, 65536), (2, 0)]);
    }

    #[test]
    fn settings_zero_value_is_emitted() {
        let frame = SettingsFrame::from_entries(&[(2, 0)]);
        let wire = frame.serialize();
        assert_eq!(wire.len(), FRAME_HEADER_LEN + 6);
        assert_eq!(&wire[FRAME_HEADER_LEN..], &[0, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn window_update_zero_increment_invalid() {
        let frame = WindowUpdateFrame::new(0, 15663105);
        let wire = frame.serialize();
        let parsed =
            WindowUpdateFrame::parse(0, Bytes::copy_from_slice(&wire[FRAME_HEADER_LEN..])).unwrap();
        assert_eq!(parsed.increment, 15663105);
        assert!(WindowUpdateFrame::parse(0, Bytes::from_static(&[0, 0, 0, 0])).is_none());
    }

    #[test]
    fn priority_frame_layout() {
        let frame = PriorityFrame {
            stream_id: 3,
            exclusive: true,
            dependency: 0,
            weight: 201,
        };
        let wire = frame.serialize();
        assert_eq!(wire[3], 0x2); // type
        assert_eq!(wire[FRAME_HEADER_LEN] & 0x80, 0x80); // exclusive bit
        assert_eq!(wire[FRAME_HEADER_LEN + 4], 200); // weight - 1
    }

    #[test]
    fn data_padding_stripped() {
        // pad_len byte (2), "hi", two pad bytes
        let payload = Bytes::from_static(&[2, b'h', b'i', 0, 0]);
        let data = DataFrame::strip_payload(flags::PADDED, payload).unwrap();
        assert_eq!(&data[..], b"hi");
    }

    #[test]
    fn goaway_round_trip() {
        let wire = GoAwayFrame::new(5, H2ErrorCode::EnhanceYourCalm).serialize();
        let parsed = GoAwayFrame::parse(Bytes::copy_from_slice(&wire[FRAME_HEADER_LEN..])).unwrap();
        assert_eq!(parsed.last_stream_id, 5);
        assert_eq!(parsed.code, H2ErrorCode::EnhanceYourCalm);
    }
}
