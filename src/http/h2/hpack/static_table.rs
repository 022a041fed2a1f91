//! HPACK static table (RFC 7541 Appendix A)

use super::table::Memento;
use super::LAST_STATIC_ENTRY;
use bytes::Bytes;
use std::sync::OnceLock;

/// Static table entries as (name, value), indexed 1..=61
pub const STATIC_TABLE: [(&str, &str); LAST_STATIC_ENTRY as usize] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

static STATIC_MEMENTOS: OnceLock<Vec<Memento>> = OnceLock::new();

/// Static table as mementos, built on first use and shared by every connection
pub fn static_mementos() -> &'static [Memento] {
    STATIC_MEMENTOS.get_or_init(|| {
        STATIC_TABLE
            .iter()
            .map(|(name, value)| {
                Memento::new(
                    Bytes::from_static(name.as_bytes()),
                    Bytes::from_static(value.as_bytes()),
                )
            })
            .collect()
    })
}

/// Look up a static entry by its 1-based HPACK index
pub fn lookup(index: u32) -> Option<&'static Memento> {
    if index == 0 {
        return None;
    }
    static_mementos().get(index as usize - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_table_bounds() {
        assert!(lookup(0).is_none());
        assert!(lookup(LAST_STATIC_ENTRY + 1).is_none());

        let first = lookup(1).unwrap();
        assert_eq!(first.key().as_ref(), b":authority");
        assert_eq!(first.value().as_ref(), b"");

        let last = lookup(LAST_STATIC_ENTRY).unwrap();
        assert_eq!(last.key().as_ref(), b"www-authenticate");
    }

    #[test]
    fn test_static_entries_are_well_formed() {
        for memento in static_mementos() {
            assert!(memento.parse_status().is_none(), "{:?}", memento);
        }
        assert_eq!(lookup(2).unwrap().value().as_ref(), b"GET");
        assert_eq!(lookup(8).unwrap().value().as_ref(), b"200");
    }
}
