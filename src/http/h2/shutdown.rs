//! Graceful connection shutdown
//!
//! Draining an HTTP/2 connection takes two GOAWAY frames. The first
//! advertises stream 2^31-1 so that streams the peer is already starting are
//! still accepted, and is followed by a PING. Once that PING is acknowledged
//! (or its deadline passes) the second GOAWAY names the last stream the
//! server actually began processing; anything above it is dropped.
//!
//! ```text
//!   Open --initiate_shutdown--> Graceful --ack | timeout | cancel--> Final --drained--> Closed
//! ```
//!
//! The controller owns no I/O. It appends frames to the connection's
//! [`FrameWriter`] and starts PINGs through the connection's
//! [`PingTracker`], both passed in by the caller.

use super::codec::FrameWriter;
use super::error::ErrorCode;
use super::ping::{PingPurpose, PingTracker};
use super::stream::StreamId;
use super::MAX_STREAM_ID;
use bytes::Bytes;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Debug data carried by the GOAWAY sent from [`ShutdownController::cancel_all_calls`]
pub const CANCEL_ALL_DEBUG: &[u8] = b"Cancelling all calls";

/// Error code carried by the GOAWAY sent from [`ShutdownController::cancel_all_calls`]
pub const CANCEL_ALL_CODE: ErrorCode = ErrorCode::InternalError;

/// Shutdown phase of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Accepting streams normally
    Open,
    /// First GOAWAY sent, waiting on the PING round trip
    Graceful,
    /// Final GOAWAY sent; no stream above its last stream ID is accepted
    Final,
    /// Connection done
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Open => "open",
            Phase::Graceful => "graceful",
            Phase::Final => "final",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Whether a new peer stream should be processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAcceptance {
    /// Deliver the stream to the application
    Accept,
    /// Drop the stream without delivering it
    Reject,
}

/// Two-phase GOAWAY state machine for one connection
#[derive(Debug)]
pub struct ShutdownController {
    phase: Phase,
    reason: Bytes,
    ping_timeout: Duration,
    ping_token: Option<u64>,
    ping_deadline: Option<Instant>,
    started_at: Option<Instant>,
    // Last stream ID carried by the final GOAWAY
    final_last_stream_id: Option<StreamId>,
    final_error_code: Option<ErrorCode>,
    write_error: Option<String>,
}

impl ShutdownController {
    /// Create a controller in [`Phase::Open`]
    pub fn new(ping_timeout: Duration) -> Self {
        ShutdownController {
            phase: Phase::Open,
            reason: Bytes::new(),
            ping_timeout,
            ping_token: None,
            ping_deadline: None,
            started_at: None,
            final_last_stream_id: None,
            final_error_code: None,
            write_error: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Debug data sent with the GOAWAYs
    pub fn reason(&self) -> &Bytes {
        &self.reason
    }

    /// PING timeout
    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Token of the shutdown PING, once sent
    pub fn ping_token(&self) -> Option<u64> {
        self.ping_token
    }

    /// When the shutdown PING stops being waited for
    pub fn ping_deadline(&self) -> Option<Instant> {
        self.ping_deadline
    }

    /// When shutdown began
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Last stream ID of the final GOAWAY, once sent
    pub fn final_last_stream_id(&self) -> Option<StreamId> {
        self.final_last_stream_id
    }

    /// Error code of the final GOAWAY, once sent
    pub fn final_error_code(&self) -> Option<ErrorCode> {
        self.final_error_code
    }

    /// Write failure that closed the connection, if any
    pub fn write_error(&self) -> Option<&str> {
        self.write_error.as_deref()
    }

    /// Begin draining: first GOAWAY, then a PING
    ///
    /// Only acts in [`Phase::Open`]; returns whether it did.
    pub fn initiate_shutdown(
        &mut self,
        reason: &[u8],
        now: Instant,
        pings: &mut PingTracker,
        writer: &mut FrameWriter,
    ) -> bool {
        if self.phase != Phase::Open {
            debug!(phase = %self.phase, "shutdown already in progress");
            return false;
        }

        self.reason = Bytes::copy_from_slice(reason);
        self.started_at = Some(now);

        writer.append_goaway(MAX_STREAM_ID, ErrorCode::NoError, reason);
        let token = pings.start_ping(PingPurpose::Shutdown, now, self.ping_timeout, writer);
        self.ping_token = Some(token);
        self.ping_deadline = Some(now + self.ping_timeout);

        self.transition(Phase::Graceful);
        debug!(
            last_stream_id = MAX_STREAM_ID,
            reason = %String::from_utf8_lossy(reason),
            "sent initial GOAWAY"
        );
        true
    }

    /// The peer acknowledged a PING
    ///
    /// Moves to [`Phase::Final`] if `opaque` is the shutdown PING's token.
    pub fn on_ping_ack(&mut self, opaque: u64, last_accepted: StreamId, writer: &mut FrameWriter) -> bool {
        if self.phase != Phase::Graceful {
            return false;
        }
        if self.ping_token != Some(opaque) {
            warn!(opaque, expected = ?self.ping_token, "ping_ack_mismatch during shutdown");
            return false;
        }

        self.send_final(last_accepted, ErrorCode::NoError, None, writer);
        true
    }

    /// The shutdown PING was not acknowledged in time; treated as assent
    pub fn on_ping_timeout(&mut self, last_accepted: StreamId, writer: &mut FrameWriter) -> bool {
        if self.phase != Phase::Graceful {
            return false;
        }

        debug!(timeout_ms = self.ping_timeout.as_millis() as u64, "shutdown ping timed out");
        self.send_final(last_accepted, ErrorCode::NoError, None, writer);
        true
    }

    /// Abort all calls: send the final GOAWAY now with an error code
    ///
    /// Preempts the PING wait. Returns false once the final GOAWAY has
    /// already been sent.
    pub fn cancel_all_calls(&mut self, last_accepted: StreamId, writer: &mut FrameWriter) -> bool {
        match self.phase {
            Phase::Open | Phase::Graceful => {
                if self.started_at.is_none() {
                    self.reason = Bytes::from_static(CANCEL_ALL_DEBUG);
                }
                self.send_final(last_accepted, CANCEL_ALL_CODE, Some(CANCEL_ALL_DEBUG), writer);
                true
            }
            Phase::Final | Phase::Closed => false,
        }
    }

    /// The peer went away
    ///
    /// During [`Phase::Graceful`] the final GOAWAY is still written best
    /// effort before closing.
    pub fn on_peer_disconnect(&mut self, last_accepted: StreamId, writer: &mut FrameWriter) {
        if self.phase != Phase::Closed {
            debug!("peer disconnected");
        }
        self.close_with_final(last_accepted, writer);
    }

    /// The peer stopped answering keepalive PINGs
    ///
    /// Same as a disconnect: a pending final GOAWAY is written best effort.
    pub fn on_keepalive_timeout(&mut self, last_accepted: StreamId, writer: &mut FrameWriter) {
        if self.phase != Phase::Closed {
            debug!(phase = %self.phase, "keepalive timed out");
        }
        self.close_with_final(last_accepted, writer);
    }

    fn close_with_final(&mut self, last_accepted: StreamId, writer: &mut FrameWriter) {
        if self.phase == Phase::Graceful {
            self.send_final(last_accepted, ErrorCode::NoError, None, writer);
        }
        self.transition(Phase::Closed);
    }

    /// Writing to the endpoint failed; nothing more can be sent
    pub fn on_write_error(&mut self, error: &str) {
        warn!(error, phase = %self.phase, "write failed, closing connection");
        self.write_error = Some(error.to_string());
        self.transition(Phase::Closed);
    }

    /// Every accepted stream finished after the final GOAWAY
    pub fn on_streams_drained(&mut self) -> bool {
        if self.phase != Phase::Final {
            return false;
        }
        self.transition(Phase::Closed);
        true
    }

    /// Force completion once shutdown has run longer than `watchdog`
    ///
    /// Returns true if the deadline had passed and the connection is now closed.
    pub fn on_watchdog(
        &mut self,
        now: Instant,
        watchdog: Duration,
        last_accepted: StreamId,
        writer: &mut FrameWriter,
    ) -> bool {
        let Some(started) = self.started_at else {
            return false;
        };
        if self.phase == Phase::Closed || now < started + watchdog {
            return false;
        }

        warn!(phase = %self.phase, watchdog_ms = watchdog.as_millis() as u64, "shutdown watchdog fired");
        if self.phase == Phase::Graceful {
            self.send_final(last_accepted, ErrorCode::NoError, None, writer);
        }
        self.transition(Phase::Closed);
        true
    }

    /// Close without any further frames, e.g. after a connection error GOAWAY
    pub fn close(&mut self) {
        self.transition(Phase::Closed);
    }

    /// Decide whether a newly opened peer stream is processed
    pub fn accept_new_stream(&self, stream_id: StreamId) -> StreamAcceptance {
        match self.phase {
            Phase::Open | Phase::Graceful => StreamAcceptance::Accept,
            Phase::Final | Phase::Closed => match self.final_last_stream_id {
                Some(last) if stream_id <= last => StreamAcceptance::Accept,
                _ => StreamAcceptance::Reject,
            },
        }
    }

    fn send_final(
        &mut self,
        last_accepted: StreamId,
        code: ErrorCode,
        debug_data: Option<&[u8]>,
        writer: &mut FrameWriter,
    ) {
        let debug_data = debug_data.unwrap_or(&self.reason[..]);
        writer.append_goaway(last_accepted, code, debug_data);

        self.final_last_stream_id = Some(last_accepted);
        self.final_error_code = Some(code);
        self.ping_deadline = None;
        self.transition(Phase::Final);
        debug!(last_stream_id = last_accepted, error_code = %code, "sent final GOAWAY");
    }

    fn transition(&mut self, to: Phase) {
        if self.phase == to {
            return;
        }
        debug_assert!(to > self.phase, "shutdown phase moved backwards");
        debug!(from = %self.phase, to = %to, "shutdown phase");
        self.phase = to;
    }
}
