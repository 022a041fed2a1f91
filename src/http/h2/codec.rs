//! HTTP/2 frame encoding and decoding
//!
//! This module provides the low-level frame codec used by the server
//! transport: the 9-byte frame header, the control frames the shutdown
//! protocol writes (GOAWAY, PING, SETTINGS), and just enough of HEADERS,
//! DATA and RST_STREAM to carry requests and responses.
//!
//! All multi-byte integers are big-endian.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FFFFFF;

/// PING payload size
pub const PING_PAYLOAD_SIZE: usize = 8;

/// Fixed part of a GOAWAY payload (last stream ID + error code)
pub const GOAWAY_MIN_PAYLOAD_SIZE: usize = 8;

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header
    pub fn encode_header(frame_type: FrameType, flags: FrameFlags, stream_id: u32, length: usize) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();

        // Stream ID (31 bits, reserved bit is 0)
        header[5..9].copy_from_slice(&(stream_id & 0x7FFFFFFF).to_be_bytes());

        header
    }

    /// Decode a frame header into (type byte, flags, stream ID, payload length)
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (u8, FrameFlags, u32, usize) {
        let length = ((bytes[0] as usize) << 16)
            | ((bytes[1] as usize) << 8)
            | (bytes[2] as usize);

        let flags = FrameFlags::from_u8(bytes[4]);

        // Stream ID (31 bits, ignore reserved bit)
        let stream_id = u32::from_be_bytes([bytes[5] & 0x7F, bytes[6], bytes[7], bytes[8]]);

        (bytes[3], flags, stream_id, length)
    }

    /// Parse one complete frame from the front of `buf`
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a whole frame; the
    /// buffer is left untouched in that case. Frames whose declared length
    /// exceeds `max_frame_size` are a FRAME_SIZE_ERROR.
    pub fn parse_frame(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let (frame_type, flags, stream_id, length) = Self::decode_header(&header);

        if length > max_frame_size {
            return Err(Error::FrameSize(format!(
                "Frame payload too large: {} > {}",
                length, max_frame_size
            )));
        }

        if buf.len() < FRAME_HEADER_SIZE + length {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(length).freeze();

        Ok(Some(Frame {
            frame_type,
            flags,
            stream_id,
            payload,
        }))
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.data.len());

        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }

        let header = Self::encode_header(FrameType::Data, flags, frame.stream_id, frame.data.len());
        buf.put_slice(&header);
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());

        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let header = Self::encode_header(FrameType::Headers, flags, frame.stream_id, frame.header_block.len());
        buf.put_slice(&header);
        buf.put_slice(&frame.header_block);

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(stream_id: u32, fragment: &[u8], end_headers: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + fragment.len());

        let mut flags = FrameFlags::empty();
        if end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let header = Self::encode_header(FrameType::Continuation, flags, stream_id, fragment.len());
        buf.put_slice(&header);
        buf.put_slice(fragment);

        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let mut buf = BytesMut::new();

        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        let mut settings_data = BytesMut::new();
        if !frame.ack {
            frame.settings.encode_payload(&mut settings_data);
        }

        // Stream ID must be 0 for SETTINGS
        let header = Self::encode_header(FrameType::Settings, flags, 0, settings_data.len());
        buf.put_slice(&header);
        buf.put_slice(&settings_data);

        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + PING_PAYLOAD_SIZE);

        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        // Stream ID must be 0 for PING, payload is always 8 bytes
        let header = Self::encode_header(FrameType::Ping, flags, 0, PING_PAYLOAD_SIZE);
        buf.put_slice(&header);
        buf.put_u64(frame.opaque);

        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let payload_len = GOAWAY_MIN_PAYLOAD_SIZE + frame.debug_data.len();
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);

        // Stream ID must be 0 for GOAWAY
        let header = Self::encode_header(FrameType::Goaway, FrameFlags::empty(), 0, payload_len);
        buf.put_slice(&header);

        buf.put_u32(frame.last_stream_id & 0x7FFFFFFF);
        buf.put_u32(frame.error_code);
        buf.put_slice(&frame.debug_data);

        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);

        let header = Self::encode_header(FrameType::RstStream, FrameFlags::empty(), frame.stream_id, 4);
        buf.put_slice(&header);
        buf.put_u32(frame.error_code);

        buf.freeze()
    }

    /// Decode a PING payload
    pub fn decode_ping_payload(flags: FrameFlags, stream_id: u32, payload: &[u8]) -> Result<PingFrame> {
        if stream_id != 0 {
            return Err(Error::Protocol(format!(
                "PING frame on stream {}",
                stream_id
            )));
        }
        if payload.len() != PING_PAYLOAD_SIZE {
            return Err(Error::FrameSize(format!(
                "PING payload must be 8 bytes, got {}",
                payload.len()
            )));
        }

        let mut opaque = [0u8; PING_PAYLOAD_SIZE];
        opaque.copy_from_slice(payload);

        Ok(PingFrame {
            ack: flags.is_ack(),
            opaque: u64::from_be_bytes(opaque),
        })
    }

    /// Decode a GOAWAY payload
    pub fn decode_goaway_payload(stream_id: u32, payload: &Bytes) -> Result<GoawayFrame> {
        if stream_id != 0 {
            return Err(Error::Protocol(format!(
                "GOAWAY frame on stream {}",
                stream_id
            )));
        }
        if payload.len() < GOAWAY_MIN_PAYLOAD_SIZE {
            return Err(Error::FrameSize(format!(
                "GOAWAY payload must be at least 8 bytes, got {}",
                payload.len()
            )));
        }

        let last_stream_id =
            u32::from_be_bytes([payload[0] & 0x7F, payload[1], payload[2], payload[3]]);
        let error_code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);

        Ok(GoawayFrame {
            last_stream_id,
            error_code,
            debug_data: payload.slice(GOAWAY_MIN_PAYLOAD_SIZE..),
        })
    }

    /// Decode a RST_STREAM payload
    pub fn decode_rst_stream_payload(stream_id: u32, payload: &[u8]) -> Result<RstStreamFrame> {
        if stream_id == 0 {
            return Err(Error::Protocol("RST_STREAM frame on stream 0".to_string()));
        }
        if payload.len() != 4 {
            return Err(Error::FrameSize(format!(
                "RST_STREAM payload must be 4 bytes, got {}",
                payload.len()
            )));
        }

        Ok(RstStreamFrame {
            stream_id,
            error_code: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
        })
    }

    /// Decode a HEADERS payload, stripping padding and priority fields
    pub fn decode_headers_payload(flags: FrameFlags, stream_id: u32, payload: &Bytes) -> Result<HeadersFrame> {
        if stream_id == 0 {
            return Err(Error::Protocol("HEADERS frame on stream 0".to_string()));
        }

        let mut block = Self::strip_padding(flags, payload)?;
        if flags.is_priority() {
            if block.len() < 5 {
                return Err(Error::FrameSize("HEADERS priority fields truncated".to_string()));
            }
            block = block.slice(5..);
        }

        Ok(HeadersFrame {
            stream_id,
            header_block: block,
            end_stream: flags.is_end_stream(),
            end_headers: flags.is_end_headers(),
        })
    }

    /// Decode a DATA payload, stripping padding
    pub fn decode_data_payload(flags: FrameFlags, stream_id: u32, payload: &Bytes) -> Result<DataFrame> {
        if stream_id == 0 {
            return Err(Error::Protocol("DATA frame on stream 0".to_string()));
        }

        Ok(DataFrame {
            stream_id,
            data: Self::strip_padding(flags, payload)?,
            end_stream: flags.is_end_stream(),
        })
    }

    fn strip_padding(flags: FrameFlags, payload: &Bytes) -> Result<Bytes> {
        if !flags.is_padded() {
            return Ok(payload.clone());
        }
        let pad_len = *payload
            .first()
            .ok_or_else(|| Error::FrameSize("padded frame without pad length".to_string()))?
            as usize;
        if pad_len + 1 > payload.len() {
            return Err(Error::Protocol(format!(
                "padding length {} exceeds payload",
                pad_len
            )));
        }
        Ok(payload.slice(1..payload.len() - pad_len))
    }

    /// Read a frame from a reader (works with any Read impl)
    pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let (frame_type, flags, stream_id, payload_len) = Self::decode_header(&header);

        if payload_len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Frame payload too large: {}", payload_len),
            ));
        }

        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            reader.read_exact(&mut payload)?;
        }

        Ok(Frame {
            frame_type,
            flags,
            stream_id,
            payload: Bytes::from(payload),
        })
    }
}

/// Encode a GOAWAY frame; the high bit of `last_stream_id` is cleared
pub fn encode_goaway(last_stream_id: u32, error_code: u32, debug: &[u8]) -> Bytes {
    FrameCodec::encode_goaway_frame(&GoawayFrame {
        last_stream_id,
        error_code,
        debug_data: Bytes::copy_from_slice(debug),
    })
}

/// Encode a PING frame
pub fn encode_ping(ack: bool, opaque: u64) -> Bytes {
    FrameCodec::encode_ping_frame(&PingFrame { ack, opaque })
}

/// Decode a complete PING frame into (ack, opaque)
pub fn decode_ping(bytes: &[u8]) -> Result<(bool, u64)> {
    let frame = decode_single(bytes, FrameType::Ping)?;
    let ping = FrameCodec::decode_ping_payload(frame.flags, frame.stream_id, &frame.payload)?;
    Ok((ping.ack, ping.opaque))
}

/// Decode a complete GOAWAY frame into (last_stream_id, error_code, debug)
pub fn decode_goaway(bytes: &[u8]) -> Result<(u32, u32, Bytes)> {
    let frame = decode_single(bytes, FrameType::Goaway)?;
    let goaway = FrameCodec::decode_goaway_payload(frame.stream_id, &frame.payload)?;
    Ok((goaway.last_stream_id, goaway.error_code, goaway.debug_data))
}

fn decode_single(bytes: &[u8], expected: FrameType) -> Result<Frame> {
    let mut buf = BytesMut::from(bytes);
    let frame = FrameCodec::parse_frame(&mut buf, MAX_FRAME_SIZE)?.ok_or_else(|| {
        let needed = if bytes.len() < FRAME_HEADER_SIZE {
            FRAME_HEADER_SIZE
        } else {
            FRAME_HEADER_SIZE + (((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize)
        };
        Error::ShortRead {
            needed,
            available: bytes.len(),
        }
    })?;

    if frame.frame_type != expected.as_u8() {
        return Err(Error::Protocol(format!(
            "expected {} frame, got type 0x{:x}",
            expected.name(),
            frame.frame_type
        )));
    }
    Ok(frame)
}

/// Per-connection outbound write queue
///
/// Frames are serialized in the order they are appended; the transport
/// drains the buffer with [`FrameWriter::take`].
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    /// Create an empty write queue
    pub fn new() -> Self {
        FrameWriter {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append raw, already-encoded bytes
    pub fn append_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Append a GOAWAY frame
    pub fn append_goaway(&mut self, last_stream_id: u32, error_code: ErrorCode, debug: &[u8]) {
        self.append_raw(&encode_goaway(last_stream_id, error_code.as_u32(), debug));
    }

    /// Append a PING frame
    pub fn append_ping(&mut self, ack: bool, opaque: u64) {
        self.append_raw(&encode_ping(ack, opaque));
    }

    /// Append a SETTINGS frame
    pub fn append_settings(&mut self, frame: &SettingsFrame) {
        self.append_raw(&FrameCodec::encode_settings_frame(frame));
    }

    /// Append a RST_STREAM frame
    pub fn append_rst_stream(&mut self, stream_id: u32, error_code: ErrorCode) {
        self.append_raw(&FrameCodec::encode_rst_stream_frame(&RstStreamFrame {
            stream_id,
            error_code: error_code.as_u32(),
        }));
    }

    /// Number of bytes waiting to be written
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is waiting to be written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take everything queued so far
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
