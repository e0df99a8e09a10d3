//! HTTP/2 client connection with a shaped preamble.
//!
//! Immediately after the connection preface the peer sees, in order: one
//! SETTINGS frame with the spec's `(id, value)` pairs in spec order, one
//! WINDOW_UPDATE on stream 0 with the spec's increment, then the spec's
//! PRIORITY frames. All of it goes out in a single write so the first
//! flight matches the browser being impersonated.

use bytes::{Buf, Bytes, BytesMut};
use http::{Method, Uri};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::fingerprint::h2spec::{settings_id, H2Spec};

use super::frame::*;
use super::hpack::{HpackDecoder, HpackEncoder};

/// Default initial stream window (RFC 9113 §6.9.2).
const DEFAULT_INITIAL_WINDOW: i64 = 65_535;

/// Replenish the connection receive window once it dips below this.
const WINDOW_REPLENISH_THRESHOLD: i64 = 16_384;

/// Informational responses tolerated before the final response.
const MAX_INFORMATIONAL_RESPONSES: usize = 5;

/// Settings advertised by the peer.
#[derive(Debug, Clone, Copy)]
pub struct PeerSettings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: u32::MAX,
            initial_window_size: DEFAULT_INITIAL_WINDOW as u32,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: u32::MAX,
        }
    }
}

/// A complete exchanged response on one stream.
#[derive(Debug, Clone)]
pub struct H2Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub trailers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Fingerprint-shaped HTTP/2 client connection.
pub struct H2Connection<S> {
    stream: S,
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    spec: H2Spec,
    next_stream_id: u32,
    peer: PeerSettings,
    conn_send_window: i64,
    conn_recv_window: i64,
    read_buf: BytesMut,
    goaway_last_stream: Option<u32>,
}

impl<S> H2Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Perform the shaped HTTP/2 handshake over an established stream.
    ///
    /// The server's SETTINGS frame is not waited for: browsers put the
    /// first HEADERS into the same flight, and the frame is consumed
    /// later by the response read loop.
    pub async fn handshake(
        mut stream: S,
        spec: H2Spec,
        header_order: Option<Vec<String>>,
    ) -> Result<Self> {
        let mut preamble = BytesMut::with_capacity(128);
        preamble.extend_from_slice(CONNECTION_PREFACE);
        preamble.extend_from_slice(&SettingsFrame::from_entries(&spec.settings).serialize());
        preamble.extend_from_slice(&WindowUpdateFrame::new(0, spec.conn_flow).serialize());
        for priority in &spec.priorities {
            preamble.extend_from_slice(&PriorityFrame::from(*priority).serialize());
        }
        stream
            .write_all(&preamble)
            .await
            .map_err(|e| Error::network(format!("h2 handshake write failed: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::network(format!("h2 handshake flush failed: {e}")))?;

        let encoder = HpackEncoder::new(spec.pseudo_order.clone(), header_order);
        Ok(Self {
            stream,
            encoder,
            decoder: HpackDecoder::new(),
            next_stream_id: 1,
            peer: PeerSettings::default(),
            conn_send_window: DEFAULT_INITIAL_WINDOW,
            conn_recv_window: DEFAULT_INITIAL_WINDOW + i64::from(spec.conn_flow),
            read_buf: BytesMut::with_capacity(16_384),
            goaway_last_stream: None,
            spec,
        })
    }

    /// The shaping spec this connection was opened with.
    pub fn spec(&self) -> &H2Spec {
        &self.spec
    }

    /// Peer settings seen so far.
    pub fn peer_settings(&self) -> &PeerSettings {
        &self.peer
    }

    /// Whether the peer announced it is going away.
    pub fn is_closing(&self) -> bool {
        self.goaway_last_stream.is_some()
    }

    /// ID of the most recently opened stream, if any.
    pub fn last_stream_id(&self) -> Option<u32> {
        (self.next_stream_id > 1).then(|| self.next_stream_id - 2)
    }

    /// Send one request and read its response to completion.
    pub async fn send_request(
        &mut self,
        method: &Method,
        uri: &Uri,
        headers: &[(String, String)],
        body: Option<Bytes>,
    ) -> Result<H2Response> {
        if self.goaway_last_stream.is_some() {
            return Err(Error::protocol("connection received GOAWAY"));
        }
        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .unwrap_or_default();
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let scheme = uri.scheme_str().unwrap_or("https");

        let block =
            self.encoder
                .encode_request(method.as_str(), scheme, &authority, &path, headers);
        let end_stream = body.as_ref().map(|b| b.is_empty()).unwrap_or(true);
        self.write_header_block(stream_id, block, end_stream).await?;

        if let Some(body) = body {
            if !body.is_empty() {
                self.write_body(stream_id, body).await?;
            }
        }

        self.read_response(stream_id).await
    }

    /// Abort a stream with CANCEL. Used on caller-side cancellation.
    pub async fn cancel_stream(&mut self, stream_id: u32) -> Result<()> {
        let frame = RstStreamFrame::new(stream_id, H2ErrorCode::Cancel);
        self.stream
            .write_all(&frame.serialize())
            .await
            .map_err(|e| Error::network(format!("h2 RST_STREAM write failed: {e}")))?;
        Ok(())
    }

    async fn write_header_block(
        &mut self,
        stream_id: u32,
        block: Bytes,
        end_stream: bool,
    ) -> Result<()> {
        let max = self.peer.max_frame_size as usize;
        let mut out = BytesMut::new();
        if block.len() <= max {
            out.extend_from_slice(
                &HeadersFrame::new(stream_id, block)
                    .end_stream(end_stream)
                    .serialize(),
            );
        } else {
            let mut chunks = block.chunks(max);
            let first = Bytes::copy_from_slice(chunks.next().unwrap_or_default());
            out.extend_from_slice(
                &HeadersFrame::new(stream_id, first)
                    .end_stream(end_stream)
                    .end_headers(false)
                    .serialize(),
            );
            let rest: Vec<&[u8]> = chunks.collect();
            for (i, chunk) in rest.iter().enumerate() {
                let last = i == rest.len() - 1;
                out.extend_from_slice(
                    &ContinuationFrame::new(stream_id, Bytes::copy_from_slice(chunk), last)
                        .serialize(),
                );
            }
        }
        self.stream
            .write_all(&out)
            .await
            .map_err(|e| Error::network(format!("h2 HEADERS write failed: {e}")))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::network(format!("h2 flush failed: {e}")))?;
        Ok(())
    }

    async fn write_body(&mut self, stream_id: u32, body: Bytes) -> Result<()> {
        let mut stream_window = i64::from(self.peer.initial_window_size);
        let mut offset = 0usize;
        while offset < body.len() {
            while self.conn_send_window <= 0 || stream_window <= 0 {
                // Drain frames until the peer opens the window.
                let opened = self.process_one_frame(stream_id, &mut NoStream).await?;
                if let FrameEvent::WindowUpdate { stream, increment } = opened {
                    if stream == stream_id {
                        stream_window += i64::from(increment);
                    }
                }
            }
            let budget = self
                .conn_send_window
                .min(stream_window)
                .min(self.peer.max_frame_size as i64) as usize;
            let end = (offset + budget).min(body.len());
            let last = end == body.len();
            let frame = DataFrame::new(stream_id, body.slice(offset..end)).end_stream(last);
            self.stream
                .write_all(&frame.serialize())
                .await
                .map_err(|e| Error::network(format!("h2 DATA write failed: {e}")))?;
            self.conn_send_window -= (end - offset) as i64;
            stream_window -= (end - offset) as i64;
            offset = end;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| Error::network(format!("h2 flush failed: {e}")))?;
        Ok(())
    }

    async fn read_response(&mut self, stream_id: u32) -> Result<H2Response> {
        let mut state = StreamRead::default();
        let mut informational = 0usize;
        loop {
            let event = self.process_one_frame(stream_id, &mut state).await?;
            match event {
                FrameEvent::Headers { end_stream } => {
                    let fields = std::mem::take(&mut state.pending_fields);
                    if state.status.is_none() {
                        let status = parse_status(&fields)?;
                        if (100..200).contains(&status) && status != 101 {
                            informational += 1;
                            if informational > MAX_INFORMATIONAL_RESPONSES {
                                return Err(Error::request(
                                    "too many 1xx informational responses",
                                ));
                            }
                            continue;
                        }
                        state.status = Some(status);
                        state.headers = fields
                            .into_iter()
                            .filter(|(n, _)| !n.starts_with(':'))
                            .collect();
                    } else {
                        state.trailers = fields;
                    }
                    if end_stream {
                        return self.finish(state);
                    }
                }
                FrameEvent::Data { end_stream } => {
                    if end_stream {
                        return self.finish(state);
                    }
                }
                FrameEvent::Reset(code) => {
                    return Err(Error::protocol(format!(
                        "stream {stream_id} reset by peer: {code:?}"
                    )));
                }
                FrameEvent::GoAway { last_stream_id } => {
                    if stream_id > last_stream_id {
                        return Err(Error::protocol(
                            "connection going away before stream completion",
                        ));
                    }
                }
                _ => {}
            }
        }
    }

    fn finish(&mut self, state: StreamRead) -> Result<H2Response> {
        let status = state
            .status
            .ok_or_else(|| Error::protocol("stream ended without response headers"))?;
        Ok(H2Response {
            status,
            headers: state.headers,
            trailers: state.trailers,
            body: state.body.freeze(),
        })
    }

    /// Read and dispatch a single frame, returning what happened to the
    /// stream of interest. Connection-level frames are handled inline.
    async fn process_one_frame(
        &mut self,
        interest: u32,
        state: &mut dyn StreamSink,
    ) -> Result<FrameEvent> {
        let (header, payload) = self.read_frame().await?;
        match header.kind {
            FrameKind::Settings => {
                let frame = SettingsFrame::parse(header.flags, payload);
                if !frame.ack {
                    self.apply_peer_settings(&frame);
                    self.stream
                        .write_all(&SettingsFrame::ack().serialize())
                        .await
                        .map_err(|e| Error::network(format!("h2 SETTINGS ack failed: {e}")))?;
                }
                Ok(FrameEvent::Control)
            }
            FrameKind::Ping => {
                if header.flags & flags::ACK == 0 && payload.len() >= 8 {
                    let mut pong = [0u8; 8];
                    pong.copy_from_slice(&payload[..8]);
                    let frame = PingFrame {
                        payload: pong,
                        ack: true,
                    };
                    self.stream
                        .write_all(&frame.serialize())
                        .await
                        .map_err(|e| Error::network(format!("h2 PING ack failed: {e}")))?;
                }
                Ok(FrameEvent::Control)
            }
            FrameKind::WindowUpdate => {
                match WindowUpdateFrame::parse(header.stream_id, payload) {
                    Some(update) if update.stream_id == 0 => {
                        self.conn_send_window += i64::from(update.increment);
                        Ok(FrameEvent::Control)
                    }
                    Some(update) => Ok(FrameEvent::WindowUpdate {
                        stream: update.stream_id,
                        increment: update.increment,
                    }),
                    None => Err(Error::protocol("WINDOW_UPDATE with zero increment")),
                }
            }
            FrameKind::GoAway => {
                let frame = GoAwayFrame::parse(payload)
                    .ok_or_else(|| Error::protocol("truncated GOAWAY"))?;
                debug!(last_stream_id = frame.last_stream_id, code = ?frame.code, "received GOAWAY");
                self.goaway_last_stream = Some(frame.last_stream_id);
                Ok(FrameEvent::GoAway {
                    last_stream_id: frame.last_stream_id,
                })
            }
            FrameKind::RstStream if header.stream_id == interest => {
                let frame = RstStreamFrame::parse(header.stream_id, payload)
                    .ok_or_else(|| Error::protocol("truncated RST_STREAM"))?;
                Ok(FrameEvent::Reset(frame.code))
            }
            FrameKind::PushPromise => {
                // Push is disabled in every browser spec; refuse it.
                let promised = payload
                    .get(0..4)
                    .map(|b| u32::from_be_bytes([b[0] & 0x7f, b[1], b[2], b[3]]))
                    .unwrap_or(0);
                let frame = RstStreamFrame::new(promised, H2ErrorCode::RefusedStream);
                self.stream
                    .write_all(&frame.serialize())
                    .await
                    .map_err(|e| Error::network(format!("h2 push refusal failed: {e}")))?;
                Ok(FrameEvent::Control)
            }
            FrameKind::Headers if header.stream_id == interest => {
                let block = HeadersFrame::strip_payload(header.flags, payload)
                    .map_err(Error::protocol)?;
                state.push_fragment(&block);
                if header.flags & flags::END_HEADERS != 0 {
                    let fields = self
                        .decoder
                        .decode(&state.take_fragments())
                        .map_err(Error::protocol)?;
                    state.set_fields(fields);
                    Ok(FrameEvent::Headers {
                        end_stream: header.flags & flags::END_STREAM != 0,
                    })
                } else {
                    state.expect_continuation(header.flags & flags::END_STREAM != 0);
                    Ok(FrameEvent::Control)
                }
            }
            FrameKind::Continuation if header.stream_id == interest => {
                state.push_fragment(&payload);
                if header.flags & flags::END_HEADERS != 0 {
                    let end_stream = state.continuation_end_stream();
                    let fields = self
                        .decoder
                        .decode(&state.take_fragments())
                        .map_err(Error::protocol)?;
                    state.set_fields(fields);
                    Ok(FrameEvent::Headers { end_stream })
                } else {
                    Ok(FrameEvent::Control)
                }
            }
            FrameKind::Data if header.stream_id == interest => {
                let data =
                    DataFrame::strip_payload(header.flags, payload).map_err(Error::protocol)?;
                self.account_data(header.stream_id, data.len()).await?;
                state.push_data(&data);
                Ok(FrameEvent::Data {
                    end_stream: header.flags & flags::END_STREAM != 0,
                })
            }
            _ => {
                trace!(kind = ?header.kind, stream = header.stream_id, "ignoring frame");
                Ok(FrameEvent::Control)
            }
        }
    }

    async fn account_data(&mut self, stream_id: u32, len: usize) -> Result<()> {
        self.conn_recv_window -= len as i64;
        if self.conn_recv_window < WINDOW_REPLENISH_THRESHOLD {
            let bump = i64::from(self.spec.conn_flow).max(DEFAULT_INITIAL_WINDOW);
            let mut out = BytesMut::new();
            out.extend_from_slice(&WindowUpdateFrame::new(0, bump as u32).serialize());
            out.extend_from_slice(&WindowUpdateFrame::new(stream_id, bump as u32).serialize());
            self.stream
                .write_all(&out)
                .await
                .map_err(|e| Error::network(format!("h2 WINDOW_UPDATE write failed: {e}")))?;
            self.conn_recv_window += bump;
        }
        Ok(())
    }

    fn apply_peer_settings(&mut self, frame: &SettingsFrame) {
        for (id, value) in &frame.entries {
            match *id {
                settings_id::HEADER_TABLE_SIZE => {
                    self.peer.header_table_size = *value;
                    self.encoder.set_max_table_size(*value as usize);
                }
                settings_id::ENABLE_PUSH => self.peer.enable_push = *value != 0,
                settings_id::MAX_CONCURRENT_STREAMS => {
                    self.peer.max_concurrent_streams = *value;
                }
                settings_id::INITIAL_WINDOW_SIZE => {
                    if *value <= i32::MAX as u32 {
                        self.peer.initial_window_size = *value;
                    }
                }
                settings_id::MAX_FRAME_SIZE => {
                    if (16_384..=16_777_215).contains(value) {
                        self.peer.max_frame_size = *value;
                    }
                }
                settings_id::MAX_HEADER_LIST_SIZE => {
                    self.peer.max_header_list_size = *value;
                }
                _ => {} // unknown (including GREASE) settings are ignored
            }
        }
    }

    async fn read_frame(&mut self) -> Result<(FrameHeader, Bytes)> {
        loop {
            if self.read_buf.len() >= FRAME_HEADER_LEN {
                if let Some(header) = FrameHeader::parse(&self.read_buf) {
                    let total = FRAME_HEADER_LEN + header.length as usize;
                    if self.read_buf.len() >= total {
                        self.read_buf.advance(FRAME_HEADER_LEN);
                        let payload = self.read_buf.split_to(header.length as usize).freeze();
                        return Ok((header, payload));
                    }
                } else {
                    return Err(Error::protocol("invalid frame header"));
                }
            }
            let n = self
                .stream
                .read_buf(&mut self.read_buf)
                .await
                .map_err(|e| Error::network(format!("h2 read failed: {e}")))?;
            if n == 0 {
                return Err(Error::network("connection closed by peer"));
            }
        }
    }
}

/// What a processed frame meant for the stream being awaited.
#[derive(Debug)]
enum FrameEvent {
    Control,
    Headers { end_stream: bool },
    Data { end_stream: bool },
    WindowUpdate { stream: u32, increment: u32 },
    Reset(H2ErrorCode),
    GoAway { last_stream_id: u32 },
}

/// Per-stream accumulation while reading a response.
trait StreamSink {
    fn push_fragment(&mut self, fragment: &[u8]);
    fn take_fragments(&mut self) -> Bytes;
    fn set_fields(&mut self, fields: Vec<(String, String)>);
    fn push_data(&mut self, data: &[u8]);
    fn expect_continuation(&mut self, end_stream: bool);
    fn continuation_end_stream(&self) -> bool;
}

#[derive(Default)]
struct StreamRead {
    fragments: BytesMut,
    pending_fields: Vec<(String, String)>,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    trailers: Vec<(String, String)>,
    body: BytesMut,
    continuation_end_stream: bool,
}

impl StreamSink for StreamRead {
    fn push_fragment(&mut self, fragment: &[u8]) {
        self.fragments.extend_from_slice(fragment);
    }
    fn take_fragments(&mut self) -> Bytes {
        self.fragments.split().freeze()
    }
    fn set_fields(&mut self, fields: Vec<(String, String)>) {
        self.pending_fields = fields;
    }
    fn push_data(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }
    fn expect_continuation(&mut self, end_stream: bool) {
        self.continuation_end_stream = end_stream;
    }
    fn continuation_end_stream(&self) -> bool {
        self.continuation_end_stream
    }
}

/// Sink used while only pumping control frames (body write path).
struct NoStream;

impl StreamSink for NoStream {
    fn push_fragment(&mut self, _: &[u8]) {}
    fn take_fragments(&mut self) -> Bytes {
        Bytes::new()
    }
    fn set_fields(&mut self, _: Vec<(String, String)>) {}
    fn push_data(&mut self, _: &[u8]) {}
    fn expect_continuation(&mut self, _: bool) {}
    fn continuation_end_stream(&self) -> bool {
        false
    }
}

fn parse_status(fields: &[(String, String)]) -> Result<u16> {
    fields
        .iter()
        .find(|(n, _)| n == ":status")
        .and_then(|(_, v)| v.parse().ok())
        .ok_or_else(|| Error::protocol("response missing :status"))
}
