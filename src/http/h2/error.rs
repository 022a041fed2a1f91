//! HTTP/2 error types
//!
//! This module defines error types for the HTTP/2 transport, mapping them to
//! the error codes defined in RFC 7540 Section 7.

use std::fmt;

/// HTTP/2 transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the endpoint session layer
    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),

    /// Protocol error detected (RFC 7540 Section 7 - Error code 0x1)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame size error (RFC 7540 Section 7 - Error code 0x6)
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Compression error (RFC 7540 Section 7 - Error code 0x9)
    #[error("Compression error: {0}")]
    Compression(String),

    /// HPACK decoding failure
    #[error("HPACK error: {0}")]
    Hpack(#[from] HpackError),

    /// Stream closed (RFC 7540 Section 7 - Error code 0x5)
    #[error("Stream closed: {0}")]
    StreamClosed(u32),

    /// Peer exceeded SETTINGS_MAX_CONCURRENT_STREAMS
    #[error("Too many concurrent streams")]
    TooManyStreams,

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Not enough bytes buffered to decode a frame
    #[error("Short read: needed {needed} bytes, {available} available")]
    ShortRead { needed: usize, available: usize },

    /// Writing to the endpoint failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Missing connection preface
    #[error("Missing connection preface")]
    MissingPreface,

    /// Timeout waiting for operation
    #[error("Timeout")]
    Timeout,
}

impl Error {
    /// The error code carried in the GOAWAY sent for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_) | Error::MissingPreface => ErrorCode::ProtocolError,
            Error::FrameSize(_) | Error::ShortRead { .. } => ErrorCode::FrameSizeError,
            Error::Compression(_) | Error::Hpack(_) => ErrorCode::CompressionError,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::TooManyStreams => ErrorCode::RefusedStream,
            Error::InvalidSettings(_) => ErrorCode::ProtocolError,
            _ => ErrorCode::InternalError,
        }
    }
}

/// HPACK decoding errors (RFC 7541)
///
/// All of these are connection errors of type COMPRESSION_ERROR.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HpackError {
    /// Index 0, or an index past the end of the dynamic table
    #[error("invalid table index {0}")]
    InvalidIndex(u32),

    /// Dynamic table size update above the advertised maximum
    #[error("dynamic table size update to {requested} exceeds maximum {max}")]
    SizeUpdateExceedsMax { requested: u32, max: u32 },

    /// Dynamic table size update after the first header field of a block
    #[error("dynamic table size update after header field")]
    SizeUpdateAfterHeader,

    /// Header block ended in the middle of a representation
    #[error("truncated header block")]
    Truncated,

    /// Prefix integer does not fit in 32 bits
    #[error("integer overflow")]
    IntegerOverflow,

    /// Huffman-coded string literal
    #[error("huffman-coded strings are not supported")]
    HuffmanUnsupported,
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits exceeded
    FlowControlError = 0x3,
    /// Settings not acknowledged
    SettingsTimeout = 0x4,
    /// Frame received for closed stream
    StreamClosed = 0x5,
    /// Frame size incorrect
    FrameSizeError = 0x6,
    /// Stream not processed
    RefusedStream = 0x7,
    /// Stream cancelled
    Cancel = 0x8,
    /// Compression state not updated
    CompressionError = 0x9,
    /// TCP connection error for CONNECT method
    ConnectError = 0xa,
    /// Processing capacity exceeded
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity = 0xc,
    /// Use HTTP/1.1 for the request
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Convert error code to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create error code from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(ErrorCode::NoError),
            0x1 => Some(ErrorCode::ProtocolError),
            0x2 => Some(ErrorCode::InternalError),
            0x3 => Some(ErrorCode::FlowControlError),
            0x4 => Some(ErrorCode::SettingsTimeout),
            0x5 => Some(ErrorCode::StreamClosed),
            0x6 => Some(ErrorCode::FrameSizeError),
            0x7 => Some(ErrorCode::RefusedStream),
            0x8 => Some(ErrorCode::Cancel),
            0x9 => Some(ErrorCode::CompressionError),
            0xa => Some(ErrorCode::ConnectError),
            0xb => Some(ErrorCode::EnhanceYourCalm),
            0xc => Some(ErrorCode::InadequateSecurity),
            0xd => Some(ErrorCode::Http11Required),
            _ => None,
        }
    }

    /// Get error name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;
