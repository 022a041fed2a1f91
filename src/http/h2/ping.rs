//! PING round-trip tracking
//!
//! Every PING the server originates (graceful shutdown, keepalive, BDP
//! probes) draws its opaque payload from one per-connection allocator: a
//! monotonic counter offset by a random salt chosen when the connection is
//! created. Tokens therefore never collide between purposes, and an ACK is
//! routed back to whichever purpose issued it.

use super::codec::FrameWriter;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Why a PING was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PingPurpose {
    /// Round trip between the two GOAWAY frames of a graceful shutdown
    Shutdown,
    /// Liveness probe
    Keepalive,
    /// Bandwidth-delay product probe
    Bdp,
}

/// A PING ACK matched to the PING that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingAck {
    /// Token carried in the ACK
    pub token: u64,
    /// Purpose of the original PING
    pub purpose: PingPurpose,
    /// Time between sending the PING and receiving the ACK
    pub rtt: Duration,
}

#[derive(Debug, Clone, Copy)]
struct OutstandingPing {
    token: u64,
    purpose: PingPurpose,
    sent_at: Instant,
    deadline: Instant,
}

/// Outstanding PINGs for one connection
#[derive(Debug)]
pub struct PingTracker {
    salt: u64,
    next_seq: u64,
    // At most one entry per purpose
    outstanding: Vec<OutstandingPing>,
}

impl Default for PingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PingTracker {
    /// Create a tracker with a random salt
    pub fn new() -> Self {
        Self::with_salt(rand::random())
    }

    /// Create a tracker with a fixed salt
    pub fn with_salt(salt: u64) -> Self {
        PingTracker {
            salt,
            next_seq: 0,
            outstanding: Vec::with_capacity(3),
        }
    }

    fn next_token(&mut self) -> u64 {
        let token = self.salt.wrapping_add(self.next_seq);
        self.next_seq += 1;
        token
    }

    /// Queue a PING for `purpose`, replacing any still outstanding for it
    ///
    /// Returns the opaque token written into the frame.
    pub fn start_ping(
        &mut self,
        purpose: PingPurpose,
        now: Instant,
        timeout: Duration,
        writer: &mut FrameWriter,
    ) -> u64 {
        self.cancel(purpose);

        let token = self.next_token();
        writer.append_ping(false, token);
        self.outstanding.push(OutstandingPing {
            token,
            purpose,
            sent_at: now,
            deadline: now + timeout,
        });

        trace!(token, ?purpose, timeout_ms = timeout.as_millis() as u64, "ping sent");
        token
    }

    /// Match an incoming PING ACK
    ///
    /// ACKs that match nothing outstanding are logged and dropped.
    pub fn on_ack(&mut self, opaque: u64, now: Instant) -> Option<PingAck> {
        let Some(pos) = self.outstanding.iter().position(|p| p.token == opaque) else {
            warn!(opaque, "ping_ack_mismatch: no outstanding ping");
            return None;
        };

        let ping = self.outstanding.swap_remove(pos);
        let rtt = now.saturating_duration_since(ping.sent_at);
        trace!(token = opaque, purpose = ?ping.purpose, rtt_us = rtt.as_micros() as u64, "ping acked");
        Some(PingAck {
            token: opaque,
            purpose: ping.purpose,
            rtt,
        })
    }

    /// Pop one PING whose deadline has passed
    pub fn poll_timeout(&mut self, now: Instant) -> Option<PingPurpose> {
        let pos = self
            .outstanding
            .iter()
            .enumerate()
            .filter(|(_, p)| p.deadline <= now)
            .min_by_key(|(_, p)| p.deadline)
            .map(|(i, _)| i)?;

        let ping = self.outstanding.swap_remove(pos);
        trace!(token = ping.token, purpose = ?ping.purpose, "ping timed out");
        Some(ping.purpose)
    }

    /// Earliest deadline among outstanding PINGs
    pub fn next_deadline(&self) -> Option<Instant> {
        self.outstanding.iter().map(|p| p.deadline).min()
    }

    /// Whether a PING for `purpose` awaits its ACK
    pub fn is_outstanding(&self, purpose: PingPurpose) -> bool {
        self.outstanding.iter().any(|p| p.purpose == purpose)
    }

    /// Token of the outstanding PING for `purpose`
    pub fn token_for(&self, purpose: PingPurpose) -> Option<u64> {
        self.outstanding
            .iter()
            .find(|p| p.purpose == purpose)
            .map(|p| p.token)
    }

    /// Forget the PING for `purpose`; a late ACK for it will be a mismatch
    pub fn cancel(&mut self, purpose: PingPurpose) {
        self.outstanding.retain(|p| p.purpose != purpose);
    }
}
