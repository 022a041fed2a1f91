//! HTTP/2 server core
//!
//! This module implements the server side of an HTTP/2 connection with a
//! focus on two pieces of connection state:
//!
//! - **HPACK dynamic table** ([`hpack`]): the size-bounded ring of recently
//!   indexed header fields that the header decoder reads from and inserts
//!   into, with eviction statistics.
//! - **Graceful shutdown** ([`shutdown`]): the two-phase GOAWAY sequence.
//!   A first GOAWAY with the maximum stream id is followed by a PING; the
//!   PING ACK (or its timeout) triggers the final GOAWAY naming the last
//!   stream actually accepted, after which new streams are refused.
//!
//! # Architecture
//!
//! - [`codec`] encodes and decodes frames, [`frames`] holds their types
//! - [`connection::ServerConnection`] is a sans-I/O state machine: bytes in,
//!   bytes and events out, with time passed in by the caller
//! - [`server::H2Server`] drives a connection over a [`SessionOps`] endpoint
//!   and exposes a thread-safe [`ServerHandle`]
//!
//! Flow control, server push and priority are not implemented.
//!
//! # Examples
//!
//! ```
//! use h2drain::http::h2::{Phase, ServerConfig, ServerConnection};
//! use std::time::Instant;
//!
//! let now = Instant::now();
//! let mut conn = ServerConnection::new(ServerConfig::default(), now);
//!
//! // Client preface followed by an empty SETTINGS frame
//! let mut input = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n".to_vec();
//! input.extend_from_slice(&[0, 0, 0, 0x4, 0, 0, 0, 0, 0]);
//! conn.recv(&input, now).unwrap();
//!
//! assert!(conn.initiate_shutdown(b"Server shutdown", now));
//! assert_eq!(conn.phase(), Phase::Graceful);
//! assert!(conn.take_pending_send().is_some());
//! assert!(!conn.is_closed());
//! ```
//!
//! [`SessionOps`]: crate::http::SessionOps

pub mod codec;
pub mod connection;
pub mod error;
pub mod frames;
pub mod hpack;
pub mod ping;
pub mod server;
pub mod settings;
pub mod shutdown;
pub mod stream;

pub use codec::{FrameCodec, FrameWriter};
pub use connection::{ConnectionEvent, ServerConnection};
pub use error::{Error, ErrorCode, HpackError, Result};
pub use frames::{
    DataFrame, Frame, FrameFlags, FrameType, GoawayFrame, HeadersFrame, PingFrame, RstStreamFrame,
    SettingsFrame,
};
pub use hpack::{DecodedHeader, HeaderDecoder, HpackTable, Memento, ParseStatus, TableStats};
pub use ping::{PingAck, PingPurpose, PingTracker};
pub use server::{H2Server, H2ServerBuilder, Request, ServerConfig, ServerHandle};
pub use settings::{Settings, SettingsBuilder};
pub use shutdown::{Phase, ShutdownController, StreamAcceptance};
pub use stream::{H2Stream, StreamId, StreamRegistry, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
