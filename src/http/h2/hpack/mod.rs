//! HPACK header compression state (RFC 7541)
//!
//! The decoding side of HPACK: a process-wide static table, a per-connection
//! dynamic table of [`Memento`] entries, and a header block decoder that keeps
//! the two in sync with the peer's encoder.
//!
//! Huffman-coded string literals are rejected rather than decoded.

pub mod decoder;
pub mod static_table;
pub mod table;

pub use decoder::{DecodedHeader, HeaderDecoder};
pub use table::{HpackTable, Memento, ParseStatus, TableStats};

/// Index of the last static table entry
pub const LAST_STATIC_ENTRY: u32 = 61;

/// Initial dynamic table size, before any SETTINGS exchange
pub const INITIAL_TABLE_SIZE: u32 = 4096;

/// Per-entry accounting overhead (RFC 7541 Section 4.1)
pub const ENTRY_OVERHEAD: u32 = 32;

/// Ring capacity the dynamic table never shrinks below
pub const INITIAL_TABLE_ENTRIES: u32 = 128;

/// Number of minimum-size entries that fit in `bytes`
pub fn entries_for_bytes(bytes: u32) -> u32 {
    bytes.div_ceil(ENTRY_OVERHEAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_for_bytes() {
        assert_eq!(entries_for_bytes(0), 0);
        assert_eq!(entries_for_bytes(1), 1);
        assert_eq!(entries_for_bytes(32), 1);
        assert_eq!(entries_for_bytes(33), 2);
        assert_eq!(entries_for_bytes(INITIAL_TABLE_SIZE), 128);
    }
}
