//! HPACK header block decoder (RFC 7541 Section 6)

use super::table::{HpackTable, Memento, ParseStatus};
use crate::http::h2::error::HpackError;
use bytes::Bytes;
use tracing::trace;

/// One header field decoded from a header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    /// Header name
    pub name: Bytes,
    /// Header value
    pub value: Bytes,
    /// Diagnostic if the header is malformed
    pub parse_status: Option<ParseStatus>,
    /// Sent as "literal never indexed"
    pub never_indexed: bool,
}

impl DecodedHeader {
    fn from_memento(memento: &Memento, never_indexed: bool) -> Self {
        DecodedHeader {
            name: memento.key().clone(),
            value: memento.value().clone(),
            parse_status: memento.parse_status(),
            never_indexed,
        }
    }
}

/// Decode a prefix integer starting at `buf[*pos]` (RFC 7541 Section 5.1)
pub fn decode_prefix_int(buf: &[u8], pos: &mut usize, prefix_bits: u8) -> Result<u32, HpackError> {
    let first = *buf.get(*pos).ok_or(HpackError::Truncated)?;
    *pos += 1;

    let max = (1u32 << prefix_bits) - 1;
    let value = u32::from(first) & max;
    if value < max {
        return Ok(value);
    }

    let mut value = u64::from(max);
    let mut shift = 0u32;
    loop {
        let b = *buf.get(*pos).ok_or(HpackError::Truncated)?;
        *pos += 1;
        value += u64::from(b & 0x7f) << shift;
        if value > u64::from(u32::MAX) {
            return Err(HpackError::IntegerOverflow);
        }
        if b & 0x80 == 0 {
            return Ok(value as u32);
        }
        shift += 7;
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
    }
}

/// Decodes header blocks for one connection, owning its dynamic table
#[derive(Debug, Default)]
pub struct HeaderDecoder {
    table: HpackTable,
}

impl HeaderDecoder {
    /// Create a decoder with a fresh table
    pub fn new() -> Self {
        HeaderDecoder {
            table: HpackTable::new(),
        }
    }

    /// The decoding table
    pub fn table(&self) -> &HpackTable {
        &self.table
    }

    /// The decoding table, mutably
    pub fn table_mut(&mut self) -> &mut HpackTable {
        &mut self.table
    }

    /// Decode a complete header block
    ///
    /// Entries added with incremental indexing are inserted into the dynamic
    /// table as they are decoded. Any error leaves the table out of sync with
    /// the peer and must be treated as a connection error.
    pub fn decode(&mut self, block: &Bytes) -> Result<Vec<DecodedHeader>, HpackError> {
        let mut headers = Vec::new();
        let mut pos = 0;
        let buf = block.as_ref();

        while pos < buf.len() {
            let b = buf[pos];

            if b & 0x80 != 0 {
                // Indexed header field
                let index = decode_prefix_int(buf, &mut pos, 7)?;
                let memento = self
                    .table
                    .lookup(index)
                    .ok_or(HpackError::InvalidIndex(index))?;
                headers.push(DecodedHeader::from_memento(memento, false));
            } else if b & 0xc0 == 0x40 {
                // Literal with incremental indexing
                let name = self.literal_name(block, &mut pos, 6)?;
                let value = read_string(block, &mut pos)?;
                let memento = Memento::new(name, value);
                headers.push(DecodedHeader::from_memento(&memento, false));
                if !self.table.add(memento) {
                    trace!("hpack entry larger than table, table cleared");
                }
            } else if b & 0xe0 == 0x20 {
                // Dynamic table size update
                if !headers.is_empty() {
                    return Err(HpackError::SizeUpdateAfterHeader);
                }
                let size = decode_prefix_int(buf, &mut pos, 5)?;
                if !self.table.set_current_size(size) {
                    return Err(HpackError::SizeUpdateExceedsMax {
                        requested: size,
                        max: self.table.max_bytes(),
                    });
                }
            } else {
                // Literal without indexing (0000) or never indexed (0001)
                let never_indexed = b & 0x10 != 0;
                let name = self.literal_name(block, &mut pos, 4)?;
                let value = read_string(block, &mut pos)?;
                headers.push(DecodedHeader::from_memento(&Memento::new(name, value), never_indexed));
            }
        }

        Ok(headers)
    }

    fn literal_name(&mut self, block: &Bytes, pos: &mut usize, prefix_bits: u8) -> Result<Bytes, HpackError> {
        let index = decode_prefix_int(block, pos, prefix_bits)?;
        if index == 0 {
            return read_string(block, pos);
        }
        self.table
            .lookup(index)
            .map(|m| m.key().clone())
            .ok_or(HpackError::InvalidIndex(index))
    }
}

fn read_string(block: &Bytes, pos: &mut usize) -> Result<Bytes, HpackError> {
    let first = *block.get(*pos).ok_or(HpackError::Truncated)?;
    if first & 0x80 != 0 {
        return Err(HpackError::HuffmanUnsupported);
    }
    let len = decode_prefix_int(block, pos, 7)? as usize;
    let end = pos.checked_add(len).ok_or(HpackError::Truncated)?;
    if end > block.len() {
        return Err(HpackError::Truncated);
    }
    let s = block.slice(*pos..end);
    *pos = end;
    Ok(s)
}
