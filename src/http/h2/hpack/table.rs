//! HPACK dynamic table
//!
//! The dynamic table is a FIFO of [`Memento`]s stored in a ring buffer.
//! Entries are evicted oldest-first so that the sum of entry sizes never
//! exceeds the currently agreed table size, which in turn never exceeds the
//! maximum the local endpoint advertised in SETTINGS_HEADER_TABLE_SIZE.
//!
//! HPACK index space: `1..=61` is the static table, `62..` the dynamic table
//! with the most recently inserted entry at 62.

use super::{
    entries_for_bytes, static_table, ENTRY_OVERHEAD, INITIAL_TABLE_ENTRIES, INITIAL_TABLE_SIZE,
    LAST_STATIC_ENTRY,
};
use bytes::Bytes;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

/// Longest header name accepted without a diagnostic
pub const MAX_KEY_LEN: usize = 1 << 14;

/// Longest header value accepted without a diagnostic
pub const MAX_VALUE_LEN: usize = 1 << 24;

/// Diagnostic attached to a malformed header entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Header name is empty
    EmptyKey,
    /// Header name longer than [`MAX_KEY_LEN`]
    KeyTooLong(usize),
    /// Header name contains a byte outside the lowercase token set
    InvalidKeyChar(u8),
    /// Header value longer than [`MAX_VALUE_LEN`]
    ValueTooLong(usize),
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseStatus::EmptyKey => write!(f, "empty header name"),
            ParseStatus::KeyTooLong(len) => write!(f, "header name too long: {} bytes", len),
            ParseStatus::InvalidKeyChar(b) => write!(f, "invalid header name byte 0x{:02x}", b),
            ParseStatus::ValueTooLong(len) => write!(f, "header value too long: {} bytes", len),
        }
    }
}

fn is_token_byte(b: u8) -> bool {
    matches!(b,
        b'a'..=b'z' | b'0'..=b'9' |
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' |
        b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~')
}

fn validate(key: &[u8], value: &[u8]) -> Option<ParseStatus> {
    if key.is_empty() {
        return Some(ParseStatus::EmptyKey);
    }
    if key.len() > MAX_KEY_LEN {
        return Some(ParseStatus::KeyTooLong(key.len()));
    }
    let name = key.strip_prefix(b":").unwrap_or(key);
    if name.is_empty() {
        return Some(ParseStatus::InvalidKeyChar(b':'));
    }
    if let Some(&bad) = name.iter().find(|&&b| !is_token_byte(b)) {
        return Some(ParseStatus::InvalidKeyChar(bad));
    }
    if value.len() > MAX_VALUE_LEN {
        return Some(ParseStatus::ValueTooLong(value.len()));
    }
    None
}

/// A header table entry: the parsed header plus its diagnostics
///
/// The key and value are immutable once built. The `used` bit is set the
/// first time the entry is returned from a dynamic table lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memento {
    key: Bytes,
    value: Bytes,
    parse_status: Option<ParseStatus>,
    used: bool,
}

impl Memento {
    /// Build an entry, recording a diagnostic if the header is malformed
    pub fn new(key: Bytes, value: Bytes) -> Self {
        let parse_status = validate(&key, &value);
        Memento {
            key,
            value,
            parse_status,
            used: false,
        }
    }

    /// Header name
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Header value
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Diagnostic for a malformed header, if any
    pub fn parse_status(&self) -> Option<ParseStatus> {
        self.parse_status
    }

    /// Whether a lookup has ever returned this entry
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Size for table accounting: `len(key) + len(value) + 32`
    pub fn size(&self) -> u32 {
        (self.key.len() + self.value.len()) as u32 + ENTRY_OVERHEAD
    }
}

impl fmt::Display for Memento {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            String::from_utf8_lossy(&self.key),
            String::from_utf8_lossy(&self.value)
        )
    }
}

/// Counters reported as entries leave the dynamic table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Evicted entries that had been looked up at least once
    pub hits: u64,
    /// Evicted entries that were never looked up
    pub misses: u64,
    /// Time the most recently retired timestamped entry spent in the table
    pub last_entry_lifetime: Option<Duration>,
}

/// Ring buffer of mementos
///
/// Slot `first` holds the oldest entry; the newest lives at
/// `(first + num_entries - 1) % max_entries`.
#[derive(Debug)]
struct MementoRing {
    entries: Vec<Option<Memento>>,
    first: usize,
    num_entries: usize,
    max_entries: usize,
    // Slot holding the entry whose insertion time is tracked
    timestamp_index: Option<usize>,
    timestamp: Option<Instant>,
    stats: TableStats,
}

impl MementoRing {
    fn new() -> Self {
        let max_entries = INITIAL_TABLE_ENTRIES as usize;
        MementoRing {
            entries: (0..max_entries).map(|_| None).collect(),
            first: 0,
            num_entries: 0,
            max_entries,
            timestamp_index: None,
            timestamp: None,
            stats: TableStats::default(),
        }
    }

    /// Resize the ring, keeping entries in insertion order
    fn rebuild(&mut self, max_entries: usize) {
        if max_entries == self.max_entries {
            return;
        }
        debug_assert!(self.num_entries <= max_entries);

        let mut entries: Vec<Option<Memento>> = (0..max_entries).map(|_| None).collect();
        let mut timestamp_index = None;
        for i in 0..self.num_entries {
            let old = (self.first + i) % self.max_entries;
            if self.timestamp_index == Some(old) {
                timestamp_index = Some(i);
            }
            entries[i] = self.entries[old].take();
        }

        trace!(
            from = self.max_entries,
            to = max_entries,
            entries = self.num_entries,
            "rebuilt hpack ring"
        );
        self.entries = entries;
        self.first = 0;
        self.max_entries = max_entries;
        self.timestamp_index = timestamp_index;
    }

    fn put(&mut self, memento: Memento) {
        debug_assert!(self.num_entries < self.max_entries);
        let index = (self.first + self.num_entries) % self.max_entries;
        if self.timestamp_index.is_none() {
            self.timestamp_index = Some(index);
            self.timestamp = Some(Instant::now());
        }
        self.entries[index] = Some(memento);
        self.num_entries += 1;
    }

    fn pop_one(&mut self) -> Option<Memento> {
        if self.num_entries == 0 {
            return None;
        }
        let index = self.first;
        let memento = self.entries[index].take()?;

        if self.timestamp_index == Some(index) {
            self.stats.last_entry_lifetime = self.timestamp.take().map(|t| t.elapsed());
            self.timestamp_index = None;
        }
        if memento.used {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }

        self.first = (self.first + 1) % self.max_entries;
        self.num_entries -= 1;
        Some(memento)
    }

    fn slot(&self, index: usize) -> Option<usize> {
        if index >= self.num_entries {
            return None;
        }
        Some((self.num_entries - 1 - index + self.first) % self.max_entries)
    }

    /// Entry `index` counting from the newest, marking it used
    fn lookup(&mut self, index: usize) -> Option<&Memento> {
        let slot = self.slot(index)?;
        let memento = self.entries[slot].as_mut()?;
        memento.used = true;
        Some(&*memento)
    }

    /// Entry `index` counting from the newest, without marking it
    fn peek(&self, index: usize) -> Option<&Memento> {
        let slot = self.slot(index)?;
        self.entries[slot].as_ref()
    }
}

/// HPACK decoding table: static entries followed by the dynamic ring
#[derive(Debug)]
pub struct HpackTable {
    // Sum of entry sizes currently in the ring
    mem_used: u32,
    // Upper bound we advertised via SETTINGS_HEADER_TABLE_SIZE
    max_bytes: u32,
    // Size most recently agreed through a dynamic table size update
    current_table_bytes: u32,
    entries: MementoRing,
}

impl Default for HpackTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackTable {
    /// Create an empty table with the RFC 7541 initial size
    pub fn new() -> Self {
        HpackTable {
            mem_used: 0,
            max_bytes: INITIAL_TABLE_SIZE,
            current_table_bytes: INITIAL_TABLE_SIZE,
            entries: MementoRing::new(),
        }
    }

    /// Record a new advertised maximum, shrinking the table if needed
    pub fn set_max_bytes(&mut self, max_bytes: u32) {
        if self.max_bytes == max_bytes {
            return;
        }
        trace!(from = self.max_bytes, to = max_bytes, "hpack max table size");
        self.max_bytes = max_bytes;
        if self.current_table_bytes > max_bytes {
            self.resize(max_bytes);
        }
    }

    /// Apply a dynamic table size update
    ///
    /// Returns false if `bytes` exceeds the advertised maximum; the caller
    /// treats that as a COMPRESSION_ERROR.
    #[must_use]
    pub fn set_current_size(&mut self, bytes: u32) -> bool {
        if self.current_table_bytes == bytes {
            return true;
        }
        if bytes > self.max_bytes {
            return false;
        }
        self.resize(bytes);
        true
    }

    fn resize(&mut self, bytes: u32) {
        trace!(from = self.current_table_bytes, to = bytes, "hpack table size update");
        while self.mem_used > bytes {
            self.evict_one();
        }
        self.current_table_bytes = bytes;
        self.entries
            .rebuild(entries_for_bytes(bytes).max(INITIAL_TABLE_ENTRIES) as usize);
    }

    /// Insert an entry at the front of the dynamic table
    ///
    /// An entry larger than the whole table empties it and is not inserted;
    /// that is reported as `false` but is not an error.
    pub fn add(&mut self, memento: Memento) -> bool {
        let size = memento.size();
        if size > self.current_table_bytes {
            trace!(size, table = self.current_table_bytes, "oversized hpack entry clears table");
            while self.entries.num_entries > 0 {
                self.evict_one();
            }
            return false;
        }

        while self.mem_used + size > self.current_table_bytes {
            self.evict_one();
        }

        self.mem_used += size;
        self.entries.put(memento);
        true
    }

    fn evict_one(&mut self) {
        if let Some(memento) = self.entries.pop_one() {
            debug_assert!(memento.size() <= self.mem_used);
            self.mem_used -= memento.size();
            trace!(entry = %memento, used = memento.used, "hpack eviction");
        }
    }

    /// Map an HPACK index to an entry
    ///
    /// Index 0 and indices past the end of the dynamic table yield `None`.
    pub fn lookup(&mut self, index: u32) -> Option<&Memento> {
        if index <= LAST_STATIC_ENTRY {
            return static_table::lookup(index);
        }
        self.entries
            .lookup((index - (LAST_STATIC_ENTRY + 1)) as usize)
    }

    /// Like [`HpackTable::lookup`], without marking dynamic entries as used
    pub fn peek(&self, index: u32) -> Option<&Memento> {
        if index <= LAST_STATIC_ENTRY {
            return static_table::lookup(index);
        }
        self.entries.peek((index - (LAST_STATIC_ENTRY + 1)) as usize)
    }

    /// Number of entries in the dynamic table
    pub fn num_entries(&self) -> u32 {
        self.entries.num_entries as u32
    }

    /// Currently agreed table size
    pub fn current_size_bytes(&self) -> u32 {
        self.current_table_bytes
    }

    /// Sum of entry sizes in the dynamic table
    pub fn bytes_used(&self) -> u32 {
        self.mem_used
    }

    /// Advertised maximum table size
    pub fn max_bytes(&self) -> u32 {
        self.max_bytes
    }

    /// Capacity of the backing ring
    pub fn max_entries(&self) -> u32 {
        self.entries.max_entries as u32
    }

    /// Eviction counters
    pub fn stats(&self) -> TableStats {
        self.entries.stats
    }

    /// Dynamic entries, newest first
    pub fn dynamic_entries(&self) -> impl Iterator<Item = &Memento> + '_ {
        (0..self.entries.num_entries).filter_map(move |i| self.entries.peek(i))
    }

    /// Dynamic table rendered one `[index] key: value` line per entry
    pub fn dynamic_table_as_string(&self) -> String {
        self.dynamic_entries()
            .enumerate()
            .map(|(i, m)| format!("[{}] {}\n", i as u32 + LAST_STATIC_ENTRY + 1, m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: &str) -> Memento {
        Memento::new(Bytes::copy_from_slice(key.as_bytes()), Bytes::copy_from_slice(value.as_bytes()))
    }

    #[test]
    fn test_memento_size() {
        assert_eq!(entry("a", "bc").size(), 35);
        assert_eq!(entry("content-type", "").size(), 44);
    }

    #[test]
    fn test_memento_parse_status() {
        assert_eq!(entry("x-ok", "v").parse_status(), None);
        assert_eq!(entry(":path", "/").parse_status(), None);
        assert_eq!(entry("", "v").parse_status(), Some(ParseStatus::EmptyKey));
        assert_eq!(entry("X-Upper", "v").parse_status(), Some(ParseStatus::InvalidKeyChar(b'X')));
        assert_eq!(entry(":", "v").parse_status(), Some(ParseStatus::InvalidKeyChar(b':')));
        assert_eq!(entry("a b", "v").parse_status(), Some(ParseStatus::InvalidKeyChar(b' ')));

        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert_eq!(
            entry(&long, "").parse_status(),
            Some(ParseStatus::KeyTooLong(MAX_KEY_LEN + 1))
        );
    }

    #[test]
    fn test_add_and_lookup_newest_first() {
        let mut table = HpackTable::new();
        assert!(table.add(entry("a", "1")));
        assert!(table.add(entry("b", "2")));
        assert!(table.add(entry("c", "3")));

        assert_eq!(table.num_entries(), 3);
        assert_eq!(table.lookup(62).unwrap().key().as_ref(), b"c");
        assert_eq!(table.lookup(63).unwrap().key().as_ref(), b"b");
        assert_eq!(table.lookup(64).unwrap().key().as_ref(), b"a");
        assert!(table.lookup(65).is_none());
        assert!(table.lookup(0).is_none());
    }

    #[test]
    fn test_lookup_marks_used() {
        let mut table = HpackTable::new();
        assert!(table.add(entry("a", "1")));
        assert!(!table.peek(62).unwrap().is_used());
        table.lookup(62);
        assert!(table.peek(62).unwrap().is_used());
    }

    #[test]
    fn test_eviction_oldest_first() {
        let mut table = HpackTable::new();
        assert!(table.set_current_size(100));

        // each entry is 1 + 7 + 32 = 40 bytes
        assert!(table.add(entry("a", "aaaaaaa")));
        assert!(table.add(entry("b", "bbbbbbb")));
        assert_eq!(table.bytes_used(), 80);

        assert!(table.add(entry("c", "ccccccc")));
        assert_eq!(table.num_entries(), 2);
        assert_eq!(table.bytes_used(), 80);
        assert_eq!(table.lookup(62).unwrap().key().as_ref(), b"c");
        assert_eq!(table.lookup(63).unwrap().key().as_ref(), b"b");
    }

    #[test]
    fn test_entry_equal_to_table_size() {
        let mut table = HpackTable::new();
        assert!(table.set_current_size(40));
        assert!(table.add(entry("a", "1")));
        assert!(table.add(entry("b", "bbbbbbb")));
        assert_eq!(table.num_entries(), 1);
        assert_eq!(table.bytes_used(), 40);
        assert_eq!(table.lookup(62).unwrap().key().as_ref(), b"b");
    }

    #[test]
    fn test_oversized_entry_clears_table() {
        let mut table = HpackTable::new();
        assert!(table.set_current_size(64));
        assert!(table.add(entry("a", "1")));
        assert!(!table.add(entry("big", &"x".repeat(64))));
        assert_eq!(table.num_entries(), 0);
        assert_eq!(table.bytes_used(), 0);
    }

    #[test]
    fn test_set_current_size_above_max_fails() {
        let mut table = HpackTable::new();
        assert!(!table.set_current_size(INITIAL_TABLE_SIZE + 1));
        assert_eq!(table.current_size_bytes(), INITIAL_TABLE_SIZE);

        table.set_max_bytes(8192);
        assert!(table.set_current_size(8192));
        assert_eq!(table.max_entries(), 256);
    }

    #[test]
    fn test_set_max_bytes_shrinks_current() {
        let mut table = HpackTable::new();
        for i in 0..10 {
            assert!(table.add(entry("k", &format!("{:07}", i))));
        }
        assert_eq!(table.bytes_used(), 400);

        table.set_max_bytes(100);
        assert_eq!(table.current_size_bytes(), 100);
        assert_eq!(table.num_entries(), 2);
        assert_eq!(table.lookup(62).unwrap().value().as_ref(), b"0000009");
    }

    #[test]
    fn test_size_zero_then_reenable() {
        let mut table = HpackTable::new();
        assert!(table.add(entry("a", "1")));
        assert!(table.set_current_size(0));
        assert_eq!(table.num_entries(), 0);
        assert!(!table.add(entry("b", "2")));
        assert_eq!(table.num_entries(), 0);

        assert!(table.set_current_size(128));
        assert!(table.add(entry("c", "3")));
        assert_eq!(table.num_entries(), 1);
    }

    #[test]
    fn test_rebuild_preserves_order_across_wrap() {
        let mut table = HpackTable::new();
        // 128 slots at 4096 bytes; 40-byte entries wrap the ring
        for i in 0..300 {
            assert!(table.add(entry("k", &format!("{:07}", i))));
        }
        let before: Vec<Bytes> = table.dynamic_entries().map(|m| m.value().clone()).collect();

        table.set_max_bytes(16384);
        assert!(table.set_current_size(16384));
        assert_eq!(table.max_entries(), 512);

        let after: Vec<Bytes> = table.dynamic_entries().map(|m| m.value().clone()).collect();
        assert_eq!(before, after);
        assert_eq!(table.lookup(62).unwrap().value().as_ref(), b"0000299");
    }

    #[test]
    fn test_stats_hits_and_misses() {
        let mut table = HpackTable::new();
        assert!(table.set_current_size(80));
        assert!(table.add(entry("a", "aaaaaaa")));
        assert!(table.add(entry("b", "bbbbbbb")));
        table.lookup(63); // "a"

        assert!(table.add(entry("c", "ccccccc")));
        assert!(table.add(entry("d", "ddddddd")));

        let stats = table.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.last_entry_lifetime.is_some());
    }

    #[test]
    fn test_dynamic_table_as_string() {
        let mut table = HpackTable::new();
        assert!(table.add(entry("a", "1")));
        assert!(table.add(entry("b", "2")));
        assert_eq!(table.dynamic_table_as_string(), "[62] b: 2\n[63] a: 1\n");
    }
}
