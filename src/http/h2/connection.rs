//! Server side of one HTTP/2 connection, without I/O
//!
//! [`ServerConnection`] consumes bytes read from the peer, produces bytes to
//! write, and surfaces requests as [`ConnectionEvent`]s. Time is passed in
//! explicitly so that timers (PING deadlines, keepalive, connection age and
//! the shutdown watchdog) can be driven by any clock.
//!
//! The connection is the single owner of the write queue, the PING tracker,
//! the stream registry and the shutdown controller; the controller is handed
//! the others for the duration of each call.

use super::codec::{FrameCodec, FrameWriter};
use super::error::{Error, ErrorCode, Result};
use super::frames::{DataFrame, Frame, FrameType, HeadersFrame, SettingsFrame};
use super::hpack::{DecodedHeader, HeaderDecoder, HpackTable};
use super::ping::{PingPurpose, PingTracker};
use super::server::ServerConfig;
use super::settings::Settings;
use super::shutdown::{Phase, ShutdownController, StreamAcceptance};
use super::stream::{StreamId, StreamRegistry};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID};
use bytes::{Bytes, BytesMut};
use hpack::Encoder as HpackEncoder;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Debug data of the GOAWAY started when the connection reaches its maximum age
pub const MAX_AGE_REASON: &[u8] = b"max_age";

/// Something the application needs to know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Request headers arrived on an accepted stream
    Request {
        stream_id: StreamId,
        headers: Vec<DecodedHeader>,
        end_stream: bool,
    },
    /// Request body data
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    /// Trailing headers; always end the stream
    Trailers {
        stream_id: StreamId,
        headers: Vec<DecodedHeader>,
    },
    /// The stream was reset, by the peer or locally
    StreamReset { stream_id: StreamId, error_code: u32 },
    /// The peer sent GOAWAY
    PeerGoaway {
        last_stream_id: StreamId,
        error_code: u32,
        debug_data: Bytes,
    },
    /// The final GOAWAY of a shutdown was queued
    FinalGoawaySent {
        last_stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// The connection is finished; drop the endpoint once writes are flushed
    Closed,
}

struct PendingHeaders {
    stream_id: StreamId,
    block: BytesMut,
    end_stream: bool,
}

/// Sans-I/O HTTP/2 server connection
pub struct ServerConnection {
    config: ServerConfig,
    recv_buf: BytesMut,
    writer: FrameWriter,
    decoder: HeaderDecoder,
    encoder: HpackEncoder<'static>,
    streams: StreamRegistry,
    pings: PingTracker,
    shutdown: ShutdownController,
    events: VecDeque<ConnectionEvent>,
    remote_settings: Settings,
    preface_received: bool,
    settings_received: bool,
    settings_acked: bool,
    // HEADERS awaiting CONTINUATION
    pending_headers: Option<PendingHeaders>,
    opened_at: Instant,
    next_keepalive: Option<Instant>,
    bdp_bytes: u64,
    bdp_estimate: Option<u64>,
    closed_reported: bool,
}

impl ServerConnection {
    /// Create a connection and queue the server SETTINGS
    pub fn new(config: ServerConfig, now: Instant) -> Self {
        Self::with_ping_tracker(config, now, PingTracker::new())
    }

    /// Create a connection using a specific PING token allocator
    pub fn with_ping_tracker(config: ServerConfig, now: Instant, pings: PingTracker) -> Self {
        let mut streams = StreamRegistry::new();
        streams.set_max_concurrent_streams(config.settings.get_max_concurrent_streams());

        let mut writer = FrameWriter::new();
        writer.append_settings(&SettingsFrame::new(config.settings.clone()));

        let next_keepalive = config.keepalive_time.map(|t| now + t);

        ServerConnection {
            shutdown: ShutdownController::new(config.ping_timeout),
            config,
            recv_buf: BytesMut::with_capacity(16384),
            writer,
            decoder: HeaderDecoder::new(),
            encoder: HpackEncoder::new(),
            streams,
            pings,
            events: VecDeque::new(),
            remote_settings: Settings::new(),
            preface_received: false,
            settings_received: false,
            settings_acked: false,
            pending_headers: None,
            opened_at: now,
            next_keepalive,
            bdp_bytes: 0,
            bdp_estimate: None,
            closed_reported: false,
        }
    }

    /// Current shutdown phase
    pub fn phase(&self) -> Phase {
        self.shutdown.phase()
    }

    /// Whether the connection is finished
    pub fn is_closed(&self) -> bool {
        self.shutdown.phase() == Phase::Closed
    }

    /// Shutdown controller state
    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Stream registry
    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    /// Highest stream ID the server has begun processing
    pub fn last_accepted_stream_id(&self) -> StreamId {
        self.streams.last_accepted_stream_id()
    }

    /// HPACK decoding table
    pub fn hpack_table(&self) -> &HpackTable {
        self.decoder.table()
    }

    /// Settings received from the peer
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Whether the peer acknowledged our SETTINGS
    pub fn settings_acked(&self) -> bool {
        self.settings_acked
    }

    /// Bytes received during the last completed BDP probe
    pub fn bdp_estimate(&self) -> Option<u64> {
        self.bdp_estimate
    }

    /// Connection configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Next queued event
    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    /// Whether bytes are waiting to be written
    pub fn has_pending_send(&self) -> bool {
        !self.writer.is_empty()
    }

    /// Take bytes to write to the endpoint, in order
    pub fn take_pending_send(&mut self) -> Option<Bytes> {
        if self.writer.is_empty() {
            None
        } else {
            Some(self.writer.take())
        }
    }

    /// Feed bytes read from the peer
    ///
    /// A connection error queues a GOAWAY carrying its error code, closes the
    /// connection, and is returned.
    pub fn recv(&mut self, data: &[u8], now: Instant) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.recv_buf.extend_from_slice(data);

        match self.process_recv_buf(now) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.connection_error(err)),
        }
    }

    fn process_recv_buf(&mut self, now: Instant) -> Result<()> {
        if !self.preface_received {
            let n = self.recv_buf.len().min(CONNECTION_PREFACE.len());
            if self.recv_buf[..n] != CONNECTION_PREFACE[..n] {
                return Err(Error::MissingPreface);
            }
            if n < CONNECTION_PREFACE.len() {
                return Ok(());
            }
            let _ = self.recv_buf.split_to(CONNECTION_PREFACE.len());
            self.preface_received = true;
            trace!("connection preface received");
        }

        let max_frame_size = self.config.settings.get_max_frame_size() as usize;
        while let Some(frame) = FrameCodec::parse_frame(&mut self.recv_buf, max_frame_size)? {
            self.handle_frame(frame, now)?;
            if self.is_closed() {
                break;
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame, now: Instant) -> Result<()> {
        trace!(
            frame_type = frame.frame_type,
            stream_id = frame.stream_id,
            len = frame.payload_len(),
            "recv frame"
        );

        if !self.settings_received && frame.kind() != Some(FrameType::Settings) {
            return Err(Error::Protocol("first frame must be SETTINGS".to_string()));
        }

        if let Some(pending) = &self.pending_headers {
            if frame.kind() != Some(FrameType::Continuation) || frame.stream_id != pending.stream_id {
                return Err(Error::Protocol(format!(
                    "expected CONTINUATION for stream {}",
                    pending.stream_id
                )));
            }
        }

        match frame.kind() {
            Some(FrameType::Settings) => self.handle_settings(&frame),
            Some(FrameType::Headers) => {
                let headers = FrameCodec::decode_headers_payload(frame.flags, frame.stream_id, &frame.payload)?;
                self.handle_headers(headers)
            }
            Some(FrameType::Continuation) => self.handle_continuation(&frame),
            Some(FrameType::Data) => self.handle_data(&frame, now),
            Some(FrameType::RstStream) => {
                let rst = FrameCodec::decode_rst_stream_payload(frame.stream_id, &frame.payload)?;
                self.handle_rst_stream(rst.stream_id, rst.error_code)
            }
            Some(FrameType::Ping) => {
                let ping = FrameCodec::decode_ping_payload(frame.flags, frame.stream_id, &frame.payload)?;
                if ping.ack {
                    self.handle_ping_ack(ping.opaque, now);
                } else {
                    self.writer.append_ping(true, ping.opaque);
                }
                Ok(())
            }
            Some(FrameType::Goaway) => {
                let goaway = FrameCodec::decode_goaway_payload(frame.stream_id, &frame.payload)?;
                debug!(
                    last_stream_id = goaway.last_stream_id,
                    error_code = goaway.error_code,
                    "peer sent GOAWAY"
                );
                self.events.push_back(ConnectionEvent::PeerGoaway {
                    last_stream_id: goaway.last_stream_id,
                    error_code: goaway.error_code,
                    debug_data: goaway.debug_data,
                });
                Ok(())
            }
            Some(FrameType::PushPromise) => {
                Err(Error::Protocol("client sent PUSH_PROMISE".to_string()))
            }
            // PRIORITY, WINDOW_UPDATE and unknown frame types carry nothing we act on
            _ => Ok(()),
        }
    }

    fn handle_settings(&mut self, frame: &Frame) -> Result<()> {
        if frame.stream_id != CONNECTION_STREAM_ID {
            return Err(Error::Protocol("SETTINGS on non-zero stream".to_string()));
        }

        if frame.flags.is_ack() {
            if frame.payload_len() != 0 {
                return Err(Error::FrameSize("SETTINGS ACK with payload".to_string()));
            }
            self.settings_acked = true;
            // The peer's encoder now honors our advertised table size
            let table_size = self.config.settings.get_header_table_size();
            self.decoder.table_mut().set_max_bytes(table_size);
            trace!(header_table_size = table_size, "settings acknowledged");
            return Ok(());
        }

        let settings = Settings::decode(&frame.payload)?;
        settings.validate()?;
        self.remote_settings.merge(&settings);
        self.settings_received = true;
        self.writer.append_settings(&SettingsFrame::ack());
        trace!(?settings, "peer settings");
        Ok(())
    }

    fn handle_headers(&mut self, frame: HeadersFrame) -> Result<()> {
        if frame.end_headers {
            return self.finish_header_block(frame.stream_id, &frame.header_block, frame.end_stream);
        }

        let mut block = BytesMut::with_capacity(frame.header_block.len() * 2);
        block.extend_from_slice(&frame.header_block);
        self.pending_headers = Some(PendingHeaders {
            stream_id: frame.stream_id,
            block,
            end_stream: frame.end_stream,
        });
        Ok(())
    }

    fn handle_continuation(&mut self, frame: &Frame) -> Result<()> {
        let Some(mut pending) = self.pending_headers.take() else {
            return Err(Error::Protocol("CONTINUATION without HEADERS".to_string()));
        };
        pending.block.extend_from_slice(&frame.payload);

        if !frame.flags.is_end_headers() {
            self.pending_headers = Some(pending);
            return Ok(());
        }

        let block = pending.block.freeze();
        self.finish_header_block(pending.stream_id, &block, pending.end_stream)
    }

    fn finish_header_block(&mut self, stream_id: StreamId, block: &Bytes, end_stream: bool) -> Result<()> {
        // Decode unconditionally so the dynamic table tracks the peer's encoder
        let headers = self.decoder.decode(block)?;

        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            if let Err(err) = stream.receive_headers(headers.clone(), end_stream) {
                debug!(stream_id, %err, "resetting stream");
                self.reset_stream(stream_id, err.error_code());
                return Ok(());
            }
            self.events.push_back(ConnectionEvent::Trailers { stream_id, headers });
            self.release_closed_streams();
            return Ok(());
        }

        if self.streams.is_known(stream_id) {
            debug!(stream_id, "HEADERS for finished or rejected stream ignored");
            return Ok(());
        }

        self.streams.observe(stream_id)?;

        if self.shutdown.accept_new_stream(stream_id) == StreamAcceptance::Reject {
            debug!(
                stream_id,
                last_stream_id = ?self.shutdown.final_last_stream_id(),
                "rejected stream after final GOAWAY"
            );
            return Ok(());
        }

        if let Some(bad) = headers.iter().find_map(|h| h.parse_status) {
            debug!(stream_id, status = %bad, "malformed request header");
            self.writer.append_rst_stream(stream_id, ErrorCode::ProtocolError);
            return Ok(());
        }

        let stream = match self.streams.accept(stream_id) {
            Ok(stream) => stream,
            Err(Error::TooManyStreams) => {
                debug!(stream_id, "refusing stream over concurrency limit");
                self.writer.append_rst_stream(stream_id, ErrorCode::RefusedStream);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        stream.receive_headers(headers.clone(), end_stream)?;
        self.events.push_back(ConnectionEvent::Request {
            stream_id,
            headers,
            end_stream,
        });
        Ok(())
    }

    fn handle_data(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        let data = FrameCodec::decode_data_payload(frame.flags, frame.stream_id, &frame.payload)?;

        let Some(stream) = self.streams.get_stream_mut(data.stream_id) else {
            if self.streams.is_known(data.stream_id) {
                trace!(stream_id = data.stream_id, "DATA for finished or rejected stream ignored");
                return Ok(());
            }
            return Err(Error::Protocol(format!(
                "DATA on idle stream {}",
                data.stream_id
            )));
        };

        if let Err(err) = stream.receive_data(&data) {
            debug!(stream_id = data.stream_id, %err, "resetting stream");
            self.reset_stream(data.stream_id, ErrorCode::StreamClosed);
            return Ok(());
        }

        self.bdp_bytes += frame.payload_len() as u64;
        self.maybe_start_bdp_ping(now);

        self.events.push_back(ConnectionEvent::Data {
            stream_id: data.stream_id,
            data: data.data,
            end_stream: data.end_stream,
        });
        if data.end_stream {
            self.release_closed_streams();
        }
        Ok(())
    }

    fn handle_rst_stream(&mut self, stream_id: StreamId, error_code: u32) -> Result<()> {
        if !self.streams.is_known(stream_id) {
            return Err(Error::Protocol(format!(
                "RST_STREAM on idle stream {}",
                stream_id
            )));
        }
        if let Some(mut stream) = self.streams.remove_stream(stream_id) {
            stream.reset();
            debug!(stream_id, error_code, "peer reset stream");
            self.events.push_back(ConnectionEvent::StreamReset { stream_id, error_code });
            self.check_drained();
        }
        Ok(())
    }

    fn handle_ping_ack(&mut self, opaque: u64, now: Instant) {
        let Some(ack) = self.pings.on_ack(opaque, now) else {
            return;
        };

        match ack.purpose {
            PingPurpose::Shutdown => {
                let last = self.streams.last_accepted_stream_id();
                if self.shutdown.on_ping_ack(opaque, last, &mut self.writer) {
                    self.after_final_goaway();
                }
            }
            PingPurpose::Keepalive => {
                trace!(rtt_us = ack.rtt.as_micros() as u64, "keepalive acked");
            }
            PingPurpose::Bdp => {
                self.bdp_estimate = Some(self.bdp_bytes);
                trace!(bytes = self.bdp_bytes, rtt_us = ack.rtt.as_micros() as u64, "bdp sample");
                self.bdp_bytes = 0;
            }
        }
    }

    fn maybe_start_bdp_ping(&mut self, now: Instant) {
        if !self.config.http2_bdp_probe
            || self.shutdown.phase() != Phase::Open
            || self.pings.is_outstanding(PingPurpose::Bdp)
        {
            return;
        }
        self.pings
            .start_ping(PingPurpose::Bdp, now, self.config.ping_timeout, &mut self.writer);
    }

    /// Begin a graceful shutdown
    pub fn initiate_shutdown(&mut self, reason: &[u8], now: Instant) -> bool {
        self.shutdown
            .initiate_shutdown(reason, now, &mut self.pings, &mut self.writer)
    }

    /// Abort every call: final GOAWAY with an error code, reset all streams
    pub fn cancel_all_calls(&mut self) {
        let last = self.streams.last_accepted_stream_id();
        let sent = self.shutdown.cancel_all_calls(last, &mut self.writer);

        for stream_id in self.streams.reset_all() {
            self.writer.append_rst_stream(stream_id, ErrorCode::Cancel);
            self.events.push_back(ConnectionEvent::StreamReset {
                stream_id,
                error_code: ErrorCode::Cancel.as_u32(),
            });
        }

        if sent {
            self.after_final_goaway();
        } else {
            self.check_drained();
        }
    }

    /// The endpoint reported EOF or a read error
    pub fn on_peer_disconnect(&mut self) {
        let last = self.streams.last_accepted_stream_id();
        self.shutdown.on_peer_disconnect(last, &mut self.writer);
        self.drop_streams();
        self.report_closed();
    }

    /// Writing to the endpoint failed
    pub fn on_write_error(&mut self, error: &str) {
        self.shutdown.on_write_error(error);
        // Nothing more can reach the peer
        let _ = self.writer.take();
        self.drop_streams();
        self.report_closed();
    }

    /// Send a complete response on an accepted stream
    pub fn send_response(
        &mut self,
        stream_id: StreamId,
        status: u16,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let stream = self
            .streams
            .get_stream_mut(stream_id)
            .ok_or(Error::StreamClosed(stream_id))?;
        stream.send_headers(body.is_empty())?;
        if !body.is_empty() {
            stream.send_data(true)?;
        }

        let status = status.to_string();
        let mut fields: Vec<(&[u8], &[u8])> = Vec::with_capacity(headers.len() + 1);
        fields.push((&b":status"[..], status.as_bytes()));
        fields.extend(headers.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())));

        let mut block = Vec::new();
        self.encoder
            .encode_into(fields, &mut block)
            .map_err(|e| Error::Compression(format!("HPACK encode error: {}", e)))?;

        let max_frame = self.remote_settings.get_max_frame_size() as usize;
        self.write_header_block(stream_id, &block, body.is_empty(), max_frame);

        if !body.is_empty() {
            let mut chunks = body.chunks(max_frame).peekable();
            while let Some(chunk) = chunks.next() {
                let last = chunks.peek().is_none();
                self.writer.append_raw(&FrameCodec::encode_data_frame(
                    &DataFrame::new(stream_id, Bytes::copy_from_slice(chunk), last),
                ));
            }
        }

        trace!(stream_id, status = %status, body_len = body.len(), "sent response");
        self.release_closed_streams();
        Ok(())
    }

    fn write_header_block(&mut self, stream_id: StreamId, block: &[u8], end_stream: bool, max_frame: usize) {
        let first_len = block.len().min(max_frame);
        let (first, mut rest) = block.split_at(first_len);

        self.writer.append_raw(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
            stream_id,
            Bytes::copy_from_slice(first),
            end_stream,
            rest.is_empty(),
        )));

        while !rest.is_empty() {
            let (fragment, tail) = rest.split_at(rest.len().min(max_frame));
            self.writer.append_raw(&FrameCodec::encode_continuation_frame(
                stream_id,
                fragment,
                tail.is_empty(),
            ));
            rest = tail;
        }
    }

    /// Reset one stream locally
    pub fn reset_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        if let Some(mut stream) = self.streams.remove_stream(stream_id) {
            stream.reset();
            self.writer.append_rst_stream(stream_id, error_code);
            self.events.push_back(ConnectionEvent::StreamReset {
                stream_id,
                error_code: error_code.as_u32(),
            });
            self.check_drained();
        }
    }

    /// Earliest instant at which [`ServerConnection::poll_timeout`] has work
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_closed() {
            return None;
        }

        let mut deadlines = Vec::with_capacity(4);
        deadlines.extend(self.pings.next_deadline());

        if self.shutdown.phase() == Phase::Open {
            if let Some(age) = self.config.max_connection_age {
                deadlines.push(self.opened_at + age);
            }
        }
        if !self.pings.is_outstanding(PingPurpose::Keepalive) {
            deadlines.extend(self.next_keepalive);
        }
        if let Some(started) = self.shutdown.started_at() {
            deadlines.push(started + self.config.shutdown_watchdog);
        }

        deadlines.into_iter().min()
    }

    /// Run timers that are due at `now`
    pub fn poll_timeout(&mut self, now: Instant) {
        if self.is_closed() {
            return;
        }

        while let Some(purpose) = self.pings.poll_timeout(now) {
            match purpose {
                PingPurpose::Shutdown => {
                    let last = self.streams.last_accepted_stream_id();
                    if self.shutdown.on_ping_timeout(last, &mut self.writer) {
                        self.after_final_goaway();
                    }
                }
                PingPurpose::Keepalive => {
                    warn!(
                        timeout_ms = self.config.keepalive_timeout.as_millis() as u64,
                        "keepalive ping timed out, closing connection"
                    );
                    let last = self.streams.last_accepted_stream_id();
                    let was_final = self.shutdown.final_last_stream_id().is_some();
                    self.shutdown.on_keepalive_timeout(last, &mut self.writer);
                    if !was_final {
                        self.push_final_event();
                    }
                    self.drop_streams();
                    self.report_closed();
                    return;
                }
                PingPurpose::Bdp => {
                    trace!("bdp ping unanswered");
                    self.bdp_bytes = 0;
                }
            }
        }

        if let Some(age) = self.config.max_connection_age {
            if self.shutdown.phase() == Phase::Open && now >= self.opened_at + age {
                debug!(age_ms = age.as_millis() as u64, "max connection age reached");
                self.initiate_shutdown(MAX_AGE_REASON, now);
            }
        }

        if let (Some(interval), Some(due)) = (self.config.keepalive_time, self.next_keepalive) {
            if now >= due && !self.pings.is_outstanding(PingPurpose::Keepalive) {
                self.pings.start_ping(
                    PingPurpose::Keepalive,
                    now,
                    self.config.keepalive_timeout,
                    &mut self.writer,
                );
                self.next_keepalive = Some(now + interval);
            }
        }

        let last = self.streams.last_accepted_stream_id();
        let was_final = self.shutdown.final_last_stream_id().is_some();
        if self
            .shutdown
            .on_watchdog(now, self.config.shutdown_watchdog, last, &mut self.writer)
        {
            if !was_final {
                self.push_final_event();
            }
            for stream_id in self.streams.reset_all() {
                self.writer.append_rst_stream(stream_id, ErrorCode::Cancel);
                self.events.push_back(ConnectionEvent::StreamReset {
                    stream_id,
                    error_code: ErrorCode::Cancel.as_u32(),
                });
            }
            self.report_closed();
        }
    }

    fn after_final_goaway(&mut self) {
        self.pings.cancel(PingPurpose::Shutdown);
        self.push_final_event();
        self.check_drained();
    }

    fn push_final_event(&mut self) {
        if let (Some(last_stream_id), Some(error_code)) =
            (self.shutdown.final_last_stream_id(), self.shutdown.final_error_code())
        {
            self.events.push_back(ConnectionEvent::FinalGoawaySent {
                last_stream_id,
                error_code,
            });
        }
    }

    // Streams closed in both directions leave the registry
    fn release_closed_streams(&mut self) {
        for stream_id in self.streams.cleanup_closed_streams() {
            trace!(stream_id, "stream closed");
        }
        self.check_drained();
    }

    fn check_drained(&mut self) {
        if self.shutdown.phase() == Phase::Final
            && self.streams.active_stream_count() == 0
            && self.shutdown.on_streams_drained()
        {
            self.report_closed();
        }
    }

    fn drop_streams(&mut self) {
        for stream_id in self.streams.reset_all() {
            self.events.push_back(ConnectionEvent::StreamReset {
                stream_id,
                error_code: ErrorCode::Cancel.as_u32(),
            });
        }
    }

    fn report_closed(&mut self) {
        if self.is_closed() && !self.closed_reported {
            self.closed_reported = true;
            self.events.push_back(ConnectionEvent::Closed);
        }
    }

    fn connection_error(&mut self, err: Error) -> Error {
        let code = err.error_code();
        warn!(%err, error_code = %code, "connection error");

        if !self.is_closed() {
            let last = self.streams.last_accepted_stream_id();
            self.writer
                .append_goaway(last, code, err.to_string().as_bytes());
            self.shutdown.close();
        }
        self.drop_streams();
        self.report_closed();
        err
    }

    /// Time since the connection was created
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.opened_at)
    }
}
