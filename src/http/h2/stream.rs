//! HTTP/2 stream management
//!
//! This module implements server-side stream state as defined in RFC 7540
//! Section 5.1, and the per-connection registry that tracks which streams
//! the server has begun processing.

use super::error::{Error, Result};
use super::frames::DataFrame;
use super::hpack::DecodedHeader;
use std::collections::HashMap;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
///
/// Server push is not supported, so the reserved states never occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    /// Stream ID
    id: StreamId,
    /// Stream state
    state: StreamState,
    /// Decoded request headers (and trailers, appended)
    headers: Vec<DecodedHeader>,
    /// Accumulated body data
    body: Vec<u8>,
    /// Whether we've received END_STREAM
    stream_complete: bool,
}

impl H2Stream {
    /// Create a new stream
    pub fn new(id: StreamId) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            headers: Vec::new(),
            body: Vec::new(),
            stream_complete: false,
        }
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether we've received END_STREAM
    pub fn stream_complete(&self) -> bool {
        self.stream_complete
    }

    /// Decoded headers received so far
    pub fn headers(&self) -> &[DecodedHeader] {
        &self.headers
    }

    /// Body received so far
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Take the accumulated body
    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    /// Process a decoded HEADERS block
    pub fn receive_headers(&mut self, headers: Vec<DecodedHeader>, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            StreamState::Open | StreamState::HalfClosedLocal => {
                // Trailers must end the stream
                if !end_stream {
                    return Err(Error::Protocol(format!(
                        "Trailers without END_STREAM on stream {}",
                        self.id
                    )));
                }
                self.state = if self.state == StreamState::Open {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Closed
                };
            }
            _ => {
                return Err(Error::StreamClosed(self.id));
            }
        }

        self.headers.extend(headers);
        if end_stream {
            self.stream_complete = true;
        }

        Ok(())
    }

    /// Process incoming DATA frame
    pub fn receive_data(&mut self, frame: &DataFrame) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }

        self.body.extend_from_slice(&frame.data);

        if frame.end_stream {
            self.stream_complete = true;
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                StreamState::HalfClosedLocal => StreamState::Closed,
                _ => self.state,
            };
        }

        Ok(())
    }

    /// Prepare to send response HEADERS
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::StreamClosed(self.id));
        }
        if end_stream {
            self.end_local();
        }
        Ok(())
    }

    /// Prepare to send DATA
    pub fn send_data(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::StreamClosed(self.id));
        }
        if end_stream {
            self.end_local();
        }
        Ok(())
    }

    fn end_local(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            _ => self.state,
        };
    }

    /// Reset the stream
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.headers.clear();
        self.body.clear();
    }
}

/// Stream registry
///
/// Tracks the open peer-initiated streams of one server connection and the
/// highest stream ID the server has begun processing.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    /// Accepted streams that have not finished
    streams: HashMap<StreamId, H2Stream>,
    /// Highest stream ID accepted for processing
    last_accepted_stream_id: StreamId,
    /// Highest stream ID seen from the peer, accepted or not
    highest_seen_stream_id: StreamId,
    /// Maximum number of concurrent streams (our SETTINGS)
    max_concurrent_streams: Option<u32>,
}

impl StreamRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrent streams
    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    /// Get maximum concurrent streams
    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Validate a new peer stream ID and record it as seen
    ///
    /// Peer streams must be odd and strictly increasing (RFC 7540 Section 5.1.1).
    pub fn observe(&mut self, stream_id: StreamId) -> Result<()> {
        if stream_id % 2 == 0 {
            return Err(Error::Protocol(format!(
                "Client opened even stream {}",
                stream_id
            )));
        }
        if stream_id <= self.highest_seen_stream_id {
            return Err(Error::Protocol(format!(
                "Stream {} not above previous stream {}",
                stream_id, self.highest_seen_stream_id
            )));
        }
        self.highest_seen_stream_id = stream_id;
        Ok(())
    }

    /// Begin processing a stream already passed to [`StreamRegistry::observe`]
    pub fn accept(&mut self, stream_id: StreamId) -> Result<&mut H2Stream> {
        if let Some(max) = self.max_concurrent_streams {
            if self.active_stream_count() >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }

        self.last_accepted_stream_id = self.last_accepted_stream_id.max(stream_id);
        Ok(self
            .streams
            .entry(stream_id)
            .or_insert_with(|| H2Stream::new(stream_id)))
    }

    /// Highest stream ID the server has begun processing
    pub fn last_accepted_stream_id(&self) -> StreamId {
        self.last_accepted_stream_id
    }

    /// Highest stream ID the peer has used
    pub fn highest_seen_stream_id(&self) -> StreamId {
        self.highest_seen_stream_id
    }

    /// Whether `stream_id` is at or below the highest seen ID
    pub fn is_known(&self, stream_id: StreamId) -> bool {
        stream_id != 0 && stream_id <= self.highest_seen_stream_id
    }

    /// Get a stream by ID
    pub fn get_stream(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_stream_mut(&mut self, stream_id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&stream_id)
    }

    /// Remove a stream
    pub fn remove_stream(&mut self, stream_id: StreamId) -> Option<H2Stream> {
        self.streams.remove(&stream_id)
    }

    /// Get number of active streams
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    /// Get all stream IDs, ascending
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Clean up closed streams, returning their IDs
    pub fn cleanup_closed_streams(&mut self) -> Vec<StreamId> {
        let mut closed: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|(_, s)| s.state().is_closed())
            .map(|(&id, _)| id)
            .collect();
        closed.sort_unstable();
        for id in &closed {
            self.streams.remove(id);
        }
        closed
    }

    /// Reset and drop every stream, returning their IDs
    pub fn reset_all(&mut self) -> Vec<StreamId> {
        let ids = self.stream_ids();
        for stream in self.streams.values_mut() {
            stream.reset();
        }
        self.streams.clear();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn header(name: &'static str, value: &'static str) -> DecodedHeader {
        DecodedHeader {
            name: Bytes::from_static(name.as_bytes()),
            value: Bytes::from_static(value.as_bytes()),
            parse_status: None,
            never_indexed: false,
        }
    }

    #[test]
    fn test_stream_request_response_lifecycle() {
        let mut stream = H2Stream::new(1);
        assert_eq!(stream.state(), StreamState::Idle);

        stream.receive_headers(vec![header(":method", "POST")], false).unwrap();
        assert_eq!(stream.state(), StreamState::Open);

        stream.receive_data(&DataFrame::new(1, Bytes::from("body"), true)).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
        assert!(stream.stream_complete());
        assert_eq!(stream.body(), b"body");

        stream.send_headers(false).unwrap();
        stream.send_data(true).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn test_stream_trailers_need_end_stream() {
        let mut stream = H2Stream::new(1);
        stream.receive_headers(vec![header(":method", "POST")], false).unwrap();
        assert!(stream.receive_headers(vec![header("grpc-status", "0")], false).is_err());
        stream.receive_headers(vec![header("grpc-status", "0")], true).unwrap();
        assert_eq!(stream.headers().len(), 2);
    }

    #[test]
    fn test_stream_data_after_end_stream() {
        let mut stream = H2Stream::new(1);
        stream.receive_headers(vec![], true).unwrap();
        let result = stream.receive_data(&DataFrame::new(1, Bytes::from("x"), false));
        assert!(matches!(result, Err(Error::StreamClosed(1))));
    }

    #[test]
    fn test_registry_tracks_last_accepted() {
        let mut registry = StreamRegistry::new();
        assert_eq!(registry.last_accepted_stream_id(), 0);

        registry.observe(1).unwrap();
        registry.accept(1).unwrap();
        registry.observe(5).unwrap();
        assert_eq!(registry.last_accepted_stream_id(), 1);
        assert_eq!(registry.highest_seen_stream_id(), 5);
        assert!(registry.is_known(3));
        assert!(!registry.is_known(7));
    }

    #[test]
    fn test_registry_rejects_bad_ids() {
        let mut registry = StreamRegistry::new();
        assert!(registry.observe(2).is_err());
        registry.observe(3).unwrap();
        assert!(registry.observe(3).is_err());
        assert!(registry.observe(1).is_err());
    }

    #[test]
    fn test_registry_max_concurrent() {
        let mut registry = StreamRegistry::new();
        registry.set_max_concurrent_streams(Some(1));
        registry.observe(1).unwrap();
        registry.accept(1).unwrap();
        registry.observe(3).unwrap();
        assert!(matches!(registry.accept(3), Err(Error::TooManyStreams)));
        assert_eq!(registry.last_accepted_stream_id(), 1);
    }

    #[test]
    fn test_registry_cleanup_and_reset() {
        let mut registry = StreamRegistry::new();
        for id in [1, 3, 5] {
            registry.observe(id).unwrap();
            registry.accept(id).unwrap().receive_headers(vec![], true).unwrap();
        }
        let stream = registry.get_stream_mut(3).unwrap();
        stream.send_headers(true).unwrap();

        assert_eq!(registry.cleanup_closed_streams(), vec![3]);
        assert_eq!(registry.active_stream_count(), 2);

        assert_eq!(registry.reset_all(), vec![1, 5]);
        assert_eq!(registry.active_stream_count(), 0);
        assert_eq!(registry.last_accepted_stream_id(), 5);
    }
}
