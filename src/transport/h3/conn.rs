//! Single-destination HTTP/3 connection over quiche.
//!
//! The connection runs a settings state machine:
//!
//! ```text
//! Dialed ── control stream opened, SETTINGS sent ──▶ SettingsSent
//! SettingsSent ── peer SETTINGS received ──▶ Ready
//! any ── idle timeout / peer close / fatal error ──▶ Closed
//! ```
//!
//! Extended CONNECT blocks until `Ready` and requires the peer's
//! `ENABLE_CONNECT_PROTOCOL`. Request streams carry HTTP datagrams via
//! per-stream FIFOs keyed by quarter stream ID.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::frame::{error_code, frame_type, read_frame, stream_type, write_frame, H3Settings};
use super::qpack;
use super::varint::{read_varint, write_varint};

/// 0-RTT method aliases. Idempotent methods only; no replay protection
/// is provided.
pub const METHOD_GET_0RTT: &str = "GET_0RTT";
pub const METHOD_HEAD_0RTT: &str = "HEAD_0RTT";

/// Informational responses tolerated before the final response.
const MAX_INFORMATIONAL_RESPONSES: usize = 5;

/// Largest valid quarter stream ID: stream IDs cap at 2^62-1.
const MAX_QUARTER_STREAM_ID: u64 = (1 << 60) - 1;

const MAX_UDP_PAYLOAD: usize = 1350;

/// Settings-exchange state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H3State {
    Dialed,
    SettingsSent,
    Ready,
    Closed,
}

/// HTTP/3 connection configuration.
#[derive(Debug, Clone)]
pub struct H3Config {
    pub enable_datagrams: bool,
    pub additional_settings: Vec<(u64, u64)>,
    /// Close the connection with `H3_NO_ERROR` after this long with no
    /// open request streams.
    pub idle_timeout: Option<Duration>,
    /// QUIC transport idle timeout.
    pub max_idle_timeout: Duration,
    pub verify_peer: bool,
}

impl Default for H3Config {
    fn default() -> Self {
        Self {
            enable_datagrams: false,
            additional_settings: Vec::new(),
            idle_timeout: None,
            max_idle_timeout: Duration::from_secs(30),
            verify_peer: true,
        }
    }
}

/// Inbound-datagram FIFO for one request stream.
#[derive(Debug, Default)]
pub struct Datagrammer {
    queue: VecDeque<Bytes>,
}

impl Datagrammer {
    fn enqueue(&mut self, payload: Bytes) {
        self.queue.push_back(payload);
    }

    pub fn dequeue(&mut self) -> Option<Bytes> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// A complete HTTP/3 response.
#[derive(Debug, Clone)]
pub struct H3Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub trailers: Vec<(String, String)>,
    pub body: Bytes,
}

/// HTTP/3 connection over a quiche QUIC transport.
pub struct H3Connection {
    quic: quiche::Connection,
    socket: UdpSocket,
    /// Remote endpoint this connection is bound to.
    pub peer_addr: SocketAddr,
    local_addr: SocketAddr,
    config: H3Config,
    state: H3State,
    control_sent: bool,
    next_request_stream: u64,
    peer_control: Option<u64>,
    peer_qpack_encoder: Option<u64>,
    peer_qpack_decoder: Option<u64>,
    /// Peer uni streams whose type varint has not fully arrived.
    uni_pending: HashMap<u64, Vec<u8>>,
    /// Peer uni streams whose content we discard (QPACK streams).
    uni_drain: HashSet<u64>,
    control_buf: Vec<u8>,
    peer_settings: Option<H3Settings>,
    goaway: bool,
    datagrammers: HashMap<u64, Datagrammer>,
    open_streams: usize,
    idle_since: Option<Instant>,
}

impl H3Connection {
    /// Dial `host:port` and start the QUIC handshake. The handshake is
    /// not awaited here so 0-RTT requests can go out early.
    pub async fn dial(host: &str, port: u16, server_name: &str, config: H3Config) -> Result<Self> {
        let peer_addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::network(format!("DNS resolution for {host}:{port} failed: {e}")))?
            .next()
            .ok_or_else(|| Error::network(format!("no addresses for {host}:{port}")))?;

        let bind_addr: SocketAddr = if peer_addr.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr).await.map_err(Error::Io)?;
        let local_addr = socket.local_addr().map_err(Error::Io)?;

        let mut quic_config = quiche::Config::new(quiche::PROTOCOL_VERSION)
            .map_err(|e| Error::network(format!("quiche config failed: {e}")))?;
        quic_config
            .set_application_protos(&[b"h3".as_slice()])
            .map_err(|e| Error::network(format!("failed to set ALPN: {e}")))?;
        quic_config.set_max_idle_timeout(config.max_idle_timeout.as_millis() as u64);
        quic_config.set_max_recv_udp_payload_size(65535);
        quic_config.set_max_send_udp_payload_size(MAX_UDP_PAYLOAD);
        quic_config.set_initial_max_data(10_000_000);
        quic_config.set_initial_max_stream_data_bidi_local(1_000_000);
        quic_config.set_initial_max_stream_data_bidi_remote(1_000_000);
        quic_config.set_initial_max_stream_data_uni(1_000_000);
        quic_config.set_initial_max_streams_bidi(100);
        quic_config.set_initial_max_streams_uni(100);
        quic_config.set_disable_active_migration(true);
        quic_config.verify_peer(config.verify_peer);
        quic_config.enable_early_data();
        if config.enable_datagrams {
            quic_config.enable_dgram(true, 1024, 1024);
        }

        let mut scid = [0u8; 16];
        getrandom::getrandom(&mut scid)
            .map_err(|e| Error::network(format!("failed to generate connection id: {e}")))?;
        let scid = quiche::ConnectionId::from_ref(&scid);

        let quic = quiche::connect(Some(server_name), &scid, local_addr, peer_addr, &mut quic_config)
            .map_err(|e| Error::network(format!("QUIC connect failed: {e}")))?;

        let mut conn = Self {
            quic,
            socket,
            peer_addr,
            local_addr,
            config,
            state: H3State::Dialed,
            control_sent: false,
            next_request_stream: 0,
            peer_control: None,
            peer_qpack_encoder: None,
            peer_qpack_decoder: None,
            uni_pending: HashMap::new(),
            uni_drain: HashSet::new(),
            control_buf: Vec::new(),
            peer_settings: None,
            goaway: false,
            datagrammers: HashMap::new(),
            open_streams: 0,
            idle_since: None,
        };
        conn.flush_egress().await?;
        Ok(conn)
    }

    pub fn state(&self) -> H3State {
        self.state
    }

    /// Peer SETTINGS; `None` until the state machine reaches `Ready`.
    pub fn peer_settings(&self) -> Option<&H3Settings> {
        self.peer_settings.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.state == H3State::Closed || self.quic.is_closed() || self.goaway
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams
    }

    /// Send a complete request and read the response.
    ///
    /// `fields` is the fully ordered header list, pseudo-headers first in
    /// spec order. 0-RTT method aliases skip the handshake-complete
    /// wait; everything else blocks until the handshake finishes.
    pub async fn round_trip(
        &mut self,
        method: &str,
        fields: Vec<(String, String)>,
        body: Option<Bytes>,
        is_extended_connect: bool,
        deadline: Option<Instant>,
    ) -> Result<H3Response> {
        let zero_rtt = matches!(method, METHOD_GET_0RTT | METHOD_HEAD_0RTT);
        if !zero_rtt {
            while !self.quic.is_established() {
                self.check_deadline(deadline)?;
                self.pump(deadline).await?;
            }
        }
        self.maybe_setup_control().await?;

        if is_extended_connect {
            // RFC 8441 §3: Extended CONNECT only after SETTINGS arrive.
            while self.state != H3State::Ready {
                self.check_deadline(deadline)?;
                if self.is_closed() {
                    return Err(Error::protocol("connection closed before SETTINGS"));
                }
                self.pump(deadline).await?;
            }
            let enabled = self
                .peer_settings
                .as_ref()
                .map(|s| s.enable_extended_connect)
                .unwrap_or(false);
            if !enabled {
                return Err(Error::protocol("server did not enable Extended CONNECT"));
            }
        }

        if self.goaway {
            return Err(Error::protocol("connection received GOAWAY"));
        }

        let stream_id = self.next_request_stream;
        self.next_request_stream += 4;
        self.datagrammers.insert(stream_id, Datagrammer::default());
        self.open_streams += 1;
        self.idle_since = None;

        let result = self
            .run_request(stream_id, fields, body, deadline)
            .await;

        self.datagrammers.remove(&stream_id);
        self.open_streams -= 1;
        if self.open_streams == 0 {
            self.idle_since = Some(Instant::now());
        }

        if let Err(err) = &result {
            if err.is_deadline_exceeded() || err.is_canceled() {
                // Cancel both halves of the stream.
                let _ = self
                    .quic
                    .stream_shutdown(stream_id, quiche::Shutdown::Read, error_code::H3_REQUEST_CANCELLED);
                let _ = self
                    .quic
                    .stream_shutdown(stream_id, quiche::Shutdown::Write, error_code::H3_REQUEST_CANCELLED);
                let _ = self.flush_egress().await;
            }
        }
        result
    }

    async fn run_request(
        &mut self,
        stream_id: u64,
        fields: Vec<(String, String)>,
        body: Option<Bytes>,
        deadline: Option<Instant>,
    ) -> Result<H3Response> {
        let mut wire = Vec::with_capacity(256);
        write_frame(
            &mut wire,
            frame_type::HEADERS,
            &qpack::encode_field_section(&fields),
        );
        let has_body = body.as_ref().map(|b| !b.is_empty()).unwrap_or(false);
        if has_body {
            let body = body.unwrap();
            write_frame(&mut wire, frame_type::DATA, &body);
        }
        self.stream_write_all(stream_id, &wire, true, deadline).await?;

        // Read the response.
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; 65536];
        let mut status: Option<u16> = None;
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut trailers: Vec<(String, String)> = Vec::new();
        let mut body_out: Vec<u8> = Vec::new();
        let mut informational = 0usize;
        let mut fin = false;

        loop {
            loop {
                match self.quic.stream_recv(stream_id, &mut chunk) {
                    Ok((n, stream_fin)) => {
                        buf.extend_from_slice(&chunk[..n]);
                        if stream_fin {
                            fin = true;
                        }
                    }
                    Err(quiche::Error::Done) => break,
                    Err(quiche::Error::StreamReset(code)) => {
                        return Err(Error::protocol(format!(
                            "request stream reset by peer (code {code:#x})"
                        )));
                    }
                    Err(e) => return Err(Error::network(format!("stream read failed: {e}"))),
                }
            }

            while let Some((ftype, payload, consumed)) = read_frame(&buf) {
                buf.drain(..consumed);
                match ftype {
                    frame_type::HEADERS => {
                        let section =
                            qpack::decode_field_section(&payload).map_err(Error::protocol)?;
                        if status.is_none() {
                            let code = parse_status(&section)?;
                            if (100..200).contains(&code) && code != 101 {
                                informational += 1;
                                if informational > MAX_INFORMATIONAL_RESPONSES {
                                    return Err(Error::request(
                                        "too many 1xx informational responses",
                                    ));
                                }
                                continue;
                            }
                            status = Some(code);
                            headers = section
                                .into_iter()
                                .filter(|(n, _)| !n.starts_with(':'))
                                .collect();
                        } else {
                            trailers = section;
                        }
                    }
                    frame_type::DATA => body_out.extend_from_slice(&payload),
                    frame_type::PUSH_PROMISE => {
                        // Push ID was never raised; any push is an error.
                        self.close(error_code::H3_ID_ERROR, "unexpected PUSH_PROMISE")
                            .await;
                        return Err(Error::protocol("unexpected PUSH_PROMISE"));
                    }
                    other => trace!(frame = other, "ignoring frame on request stream"),
                }
            }

            if fin && buf.is_empty() {
                break;
            }
            self.check_deadline(deadline)?;
            self.pump(deadline).await?;
            if self.quic.is_closed() {
                self.state = H3State::Closed;
                return Err(Error::network("QUIC connection closed"));
            }
        }

        let status = status.ok_or_else(|| Error::protocol("stream ended without HEADERS"))?;
        Ok(H3Response {
            status,
            headers,
            trailers,
            body: Bytes::from(body_out),
        })
    }

    /// Send an HTTP datagram bound to `stream_id`:
    /// `varint(stream_id / 4) || payload`.
    pub async fn send_datagram(&mut self, stream_id: u64, payload: &[u8]) -> Result<()> {
        let mut wire = Vec::with_capacity(payload.len() + 8);
        write_varint(&mut wire, stream_id / 4);
        wire.extend_from_slice(payload);
        self.quic
            .dgram_send(&wire)
            .map_err(|e| Error::network(format!("datagram send failed: {e}")))?;
        self.flush_egress().await
    }

    /// Pop the next inbound datagram for a request stream.
    pub fn recv_datagram(&mut self, stream_id: u64) -> Option<Bytes> {
        self.datagrammers.get_mut(&stream_id)?.dequeue()
    }

    /// Close the connection with an application error code.
    pub async fn close(&mut self, code: u64, reason: &str) {
        let _ = self.quic.close(true, code, reason.as_bytes());
        let _ = self.flush_egress().await;
        self.state = H3State::Closed;
    }

    fn check_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded("h3 request deadline".into()));
            }
        }
        Ok(())
    }

    async fn stream_write_all(
        &mut self,
        stream_id: u64,
        mut data: &[u8],
        fin: bool,
        deadline: Option<Instant>,
    ) -> Result<()> {
        loop {
            match self.quic.stream_send(stream_id, data, fin) {
                Ok(written) if written == data.len() => {
                    self.flush_egress().await?;
                    return Ok(());
                }
                Ok(written) => {
                    data = &data[written..];
                    self.check_deadline(deadline)?;
                    self.pump(deadline).await?;
                }
                Err(quiche::Error::Done) => {
                    self.check_deadline(deadline)?;
                    self.pump(deadline).await?;
                }
                Err(e) => {
                    return Err(Error::network(format!("stream write failed: {e}")));
                }
            }
        }
    }

    /// Open the control and QPACK streams and send our SETTINGS, once
    /// the transport allows it.
    async fn maybe_setup_control(&mut self) -> Result<()> {
        if self.control_sent || !(self.quic.is_established() || self.quic.is_in_early_data()) {
            return Ok(());
        }
        // Client unidirectional streams: control 2, QPACK encoder 6,
        // QPACK decoder 10.
        let mut control = Vec::with_capacity(32);
        write_varint(&mut control, stream_type::CONTROL);
        write_frame(
            &mut control,
            frame_type::SETTINGS,
            &H3Settings::client_payload(
                self.config.enable_datagrams,
                &self.config.additional_settings,
            ),
        );
        self.quic
            .stream_send(2, &control, false)
            .map_err(|e| Error::network(format!("control stream open failed: {e}")))?;

        let mut tbuf = Vec::with_capacity(1);
        write_varint(&mut tbuf, stream_type::QPACK_ENCODER);
        self.quic
            .stream_send(6, &tbuf, false)
            .map_err(|e| Error::network(format!("qpack encoder stream failed: {e}")))?;
        tbuf.clear();
        write_varint(&mut tbuf, stream_type::QPACK_DECODER);
        self.quic
            .stream_send(10, &tbuf, false)
            .map_err(|e| Error::network(format!("qpack decoder stream failed: {e}")))?;

        self.control_sent = true;
        self.state = H3State::SettingsSent;
        self.flush_egress().await
    }

    /// One I/O iteration: drain egress, wait briefly for ingress,
    /// process streams, datagrams and timers.
    pub async fn pump(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.flush_egress().await?;
        self.maybe_setup_control().await?;

        let wait = self
            .quic
            .timeout()
            .unwrap_or(Duration::from_millis(50))
            .min(Duration::from_millis(50));
        let wait = match deadline {
            Some(d) => wait.min(d.saturating_duration_since(Instant::now())),
            None => wait,
        };

        let mut buf = vec![0u8; 65535];
        match tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                let info = quiche::RecvInfo {
                    from,
                    to: self.local_addr,
                };
                match self.quic.recv(&mut buf[..len], info) {
                    Ok(_) | Err(quiche::Error::Done) => {}
                    Err(e) => return Err(Error::network(format!("QUIC recv failed: {e}"))),
                }
            }
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => {
                self.quic.on_timeout();
            }
        }

        self.process_uni_streams().await?;
        self.process_datagrams().await?;
        self.check_idle().await;
        self.flush_egress().await?;
        Ok(())
    }

    async fn flush_egress(&mut self) -> Result<()> {
        let mut out = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            match self.quic.send(&mut out) {
                Ok((len, info)) => {
                    self.socket
                        .send_to(&out[..len], info.to)
                        .await
                        .map_err(Error::Io)?;
                }
                Err(quiche::Error::Done) => return Ok(()),
                Err(e) => return Err(Error::network(format!("QUIC send failed: {e}"))),
            }
        }
    }

    async fn process_uni_streams(&mut self) -> Result<()> {
        let readable: Vec<u64> = self.quic.readable().filter(|id| id & 0x3 == 3).collect();
        let mut chunk = vec![0u8; 4096];
        for id in readable {
            loop {
                match self.quic.stream_recv(id, &mut chunk) {
                    Ok((n, _fin)) => {
                        let data = chunk[..n].to_vec();
                        self.accept_uni_bytes(id, &data).await?;
                    }
                    Err(quiche::Error::Done) => break,
                    Err(quiche::Error::StreamReset(_)) => break,
                    Err(e) => {
                        return Err(Error::network(format!("uni stream read failed: {e}")))
                    }
                }
            }
        }
        Ok(())
    }

    async fn accept_uni_bytes(&mut self, id: u64, data: &[u8]) -> Result<()> {
        if self.uni_drain.contains(&id) {
            return Ok(());
        }
        if Some(id) == self.peer_control {
            self.control_buf.extend_from_slice(data);
            return self.process_control().await;
        }

        let pending = self.uni_pending.entry(id).or_default();
        pending.extend_from_slice(data);
        let Some((stype, consumed)) = read_varint(pending) else {
            return Ok(());
        };
        let rest = pending[consumed..].to_vec();
        self.uni_pending.remove(&id);

        match stype {
            stream_type::CONTROL => {
                if self.peer_control.is_some() {
                    self.close(error_code::H3_STREAM_CREATION_ERROR, "duplicate control stream")
                        .await;
                    return Err(Error::protocol("duplicate control stream"));
                }
                self.peer_control = Some(id);
                self.control_buf.extend_from_slice(&rest);
                self.process_control().await
            }
            stream_type::QPACK_ENCODER => {
                if self.peer_qpack_encoder.is_some() {
                    self.close(
                        error_code::H3_STREAM_CREATION_ERROR,
                        "duplicate QPACK encoder stream",
                    )
                    .await;
                    return Err(Error::protocol("duplicate QPACK encoder stream"));
                }
                self.peer_qpack_encoder = Some(id);
                self.uni_drain.insert(id);
                Ok(())
            }
            stream_type::QPACK_DECODER => {
                if self.peer_qpack_decoder.is_some() {
                    self.close(
                        error_code::H3_STREAM_CREATION_ERROR,
                        "duplicate QPACK decoder stream",
                    )
                    .await;
                    return Err(Error::protocol("duplicate QPACK decoder stream"));
                }
                self.peer_qpack_decoder = Some(id);
                self.uni_drain.insert(id);
                Ok(())
            }
            stream_type::PUSH => {
                // The client never raises the Push ID.
                self.close(error_code::H3_ID_ERROR, "unexpected push stream")
                    .await;
                Err(Error::protocol("unexpected push stream"))
            }
            other => {
                debug!(stream = id, stream_type = other, "dropping unknown uni stream");
                let _ = self.quic.stream_shutdown(
                    id,
                    quiche::Shutdown::Read,
                    error_code::H3_STREAM_CREATION_ERROR,
                );
                self.uni_drain.insert(id);
                Ok(())
            }
        }
    }

    async fn process_control(&mut self) -> Result<()> {
        while let Some((ftype, payload, consumed)) = read_frame(&self.control_buf) {
            self.control_buf.drain(..consumed);
            match ftype {
                frame_type::SETTINGS => {
                    if self.peer_settings.is_some() {
                        self.close(error_code::H3_FRAME_UNEXPECTED, "second SETTINGS")
                            .await;
                        return Err(Error::protocol("second SETTINGS frame"));
                    }
                    let settings = H3Settings::parse(&payload).map_err(Error::protocol)?;
                    debug!(?settings, "peer SETTINGS received");
                    self.peer_settings = Some(settings);
                    self.state = H3State::Ready;
                }
                frame_type::GOAWAY => {
                    debug!("peer GOAWAY");
                    self.goaway = true;
                }
                _ if self.peer_settings.is_none() => {
                    self.close(error_code::H3_MISSING_SETTINGS, "first frame not SETTINGS")
                        .await;
                    return Err(Error::protocol("control stream did not start with SETTINGS"));
                }
                other => trace!(frame = other, "ignoring control frame"),
            }
        }
        Ok(())
    }

    async fn process_datagrams(&mut self) -> Result<()> {
        let mut buf = vec![0u8; 65535];
        loop {
            let len = match self.quic.dgram_recv(&mut buf) {
                Ok(len) => len,
                Err(quiche::Error::Done) => return Ok(()),
                Err(quiche::Error::InvalidState) => return Ok(()),
                Err(e) => return Err(Error::network(format!("datagram recv failed: {e}"))),
            };
            if let Err(err) = self.dispatch_datagram(&buf[..len]).await {
                return Err(err);
            }
        }
    }

    /// Route one inbound HTTP datagram. Unknown streams are dropped
    /// silently; an invalid quarter stream ID is fatal.
    async fn dispatch_datagram(&mut self, wire: &[u8]) -> Result<()> {
        let (stream_id, payload) = match parse_datagram(wire) {
            Ok(parsed) => parsed,
            Err(reason) => {
                self.close(error_code::H3_DATAGRAM_ERROR, reason).await;
                return Err(Error::protocol(format!("datagram error: {reason}")));
            }
        };
        match self.datagrammers.get_mut(&stream_id) {
            Some(dg) => dg.enqueue(Bytes::copy_from_slice(payload)),
            None => trace!(stream = stream_id, "dropping datagram for unknown stream"),
        }
        Ok(())
    }

    async fn check_idle(&mut self) {
        let Some(limit) = self.config.idle_timeout else {
            return;
        };
        if let Some(since) = self.idle_since {
            if since.elapsed() >= limit && self.state != H3State::Closed {
                warn!("h3 connection idle, closing");
                self.close(error_code::H3_NO_ERROR, "idle timeout").await;
            }
        }
    }
}

/// Split an HTTP datagram into its stream ID and payload. The framing
/// is `varint(stream_id / 4) || payload`; a malformed or out-of-range
/// quarter stream ID must close the connection with
/// `H3_DATAGRAM_ERROR`.
pub fn parse_datagram(wire: &[u8]) -> std::result::Result<(u64, &[u8]), &'static str> {
    let Some((quarter_id, consumed)) = read_varint(wire) else {
        return Err("malformed quarter stream id");
    };
    if quarter_id > MAX_QUARTER_STREAM_ID {
        return Err("quarter stream id out of range");
    }
    Ok((quarter_id * 4, &wire[consumed..]))
}

fn parse_status(fields: &[(String, String)]) -> Result<u16> {
    fields
        .iter()
        .find(|(n, _)| n == ":status")
        .and_then(|(_, v)| v.parse().ok())
        .ok_or_else(|| Error::protocol("response missing :status"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagrammer_is_fifo() {
        let mut dg = Datagrammer::default();
        dg.enqueue(Bytes::from_static(b"one"));
        dg.enqueue(Bytes::from_static(b"two"));
        assert_eq!(dg.dequeue().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(dg.dequeue().unwrap(), Bytes::from_static(b"two"));
        assert!(dg.dequeue().is_none());
    }

    #[test]
    fn quarter_stream_id_bound() {
        // Stream IDs cap at 2^62-1, so quarter IDs cap at 2^60-1.
        assert_eq!(MAX_QUARTER_STREAM_ID, (1u64 << 60) - 1);
    }

    #[test]
    fn datagram_framing_round_trip() {
        let mut wire = Vec::new();
        super::super::varint::write_varint(&mut wire, 84 / 4);
        wire.extend_from_slice(b"payload");
        let (stream_id, payload) = parse_datagram(&wire).unwrap();
        assert_eq!(stream_id, 84);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn oversized_quarter_stream_id_is_fatal() {
        // 8-byte varint encoding 2^61: parses but exceeds the bound.
        let mut wire = Vec::new();
        super::super::varint::write_varint(&mut wire, 1u64 << 61);
        wire.extend_from_slice(b"x");
        assert!(parse_datagram(&wire).is_err());
    }

    #[test]
    fn truncated_quarter_stream_id_is_fatal() {
        // First byte announces an 8-byte varint that never arrives.
        assert!(parse_datagram(&[0xc0]).is_err());
        assert!(parse_datagram(&[]).is_err());
    }

    #[test]
    fn zero_rtt_method_aliases() {
        assert!(matches!(METHOD_GET_0RTT, "GET_0RTT"));
        assert!(matches!(METHOD_HEAD_0RTT, "HEAD_0RTT"));
    }
}
