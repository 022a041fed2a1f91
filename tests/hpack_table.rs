//! HPACK dynamic table invariants under long operation sequences

use bytes::Bytes;
use h2drain::http::h2::hpack::{HeaderDecoder, HpackTable, Memento, ENTRY_OVERHEAD, LAST_STATIC_ENTRY};
use h2drain::http::h2::HpackError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn entry_of_size(rng: &mut StdRng, size: u32) -> Memento {
    let payload = (size - ENTRY_OVERHEAD) as usize;
    let key_len = rng.gen_range(1..=payload.clamp(1, 16));
    let key: String = (0..key_len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    let value: String = (0..payload - key_len)
        .map(|_| rng.gen_range(b'!'..=b'~') as char)
        .collect();
    Memento::new(Bytes::from(key), Bytes::from(value))
}

fn sum_of_entries(table: &HpackTable) -> u32 {
    table.dynamic_entries().map(Memento::size).sum()
}

fn check_invariants(table: &HpackTable) {
    assert_eq!(table.bytes_used(), sum_of_entries(table));
    assert!(table.bytes_used() <= table.current_size_bytes());
    assert!(table.current_size_bytes() <= table.max_bytes());
    assert_eq!(table.dynamic_entries().count() as u32, table.num_entries());
    for i in 0..table.num_entries() {
        let entry = table.peek(LAST_STATIC_ENTRY + 1 + i).unwrap();
        assert!(entry.size() >= ENTRY_OVERHEAD);
    }
    assert!(table.peek(LAST_STATIC_ENTRY + 1 + table.num_entries()).is_none());
}

#[test]
fn test_random_inserts_keep_accounting() {
    let mut rng = StdRng::seed_from_u64(0x4b1d);
    let mut table = HpackTable::new();
    assert_eq!(table.max_bytes(), 4096);

    for _ in 0..5000 {
        let size = ENTRY_OVERHEAD + rng.gen_range(20..=200);
        let entry = entry_of_size(&mut rng, size);
        assert_eq!(entry.size(), size);

        assert!(table.add(entry.clone()));
        assert_eq!(table.bytes_used(), sum_of_entries(&table));

        let newest = table.peek(LAST_STATIC_ENTRY + 1).unwrap();
        assert_eq!(newest.key(), entry.key());
        assert_eq!(newest.value(), entry.value());
    }
    check_invariants(&table);
}

#[test]
fn test_random_operations_keep_invariants() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut table = HpackTable::new();
    let mut inserted: Vec<Memento> = Vec::new();

    for _ in 0..3000 {
        match rng.gen_range(0..10) {
            0 => {
                let max = rng.gen_range(0..=8192);
                table.set_max_bytes(max);
            }
            1 => {
                let size = rng.gen_range(0..=table.max_bytes() + 64);
                let ok = table.set_current_size(size);
                assert_eq!(ok, size <= table.max_bytes() || size == table.current_size_bytes());
            }
            _ => {
                let size = rng.gen_range(ENTRY_OVERHEAD + 1..=400);
                let entry = entry_of_size(&mut rng, size);
                if table.add(entry.clone()) {
                    inserted.push(entry);
                } else {
                    assert!(size > table.current_size_bytes());
                    assert_eq!(table.num_entries(), 0);
                    inserted.clear();
                }
            }
        }
        check_invariants(&table);

        // Survivors are exactly the most recent insertions, newest first
        let survivors: Vec<&Memento> = table.dynamic_entries().collect();
        let expected = inserted.iter().rev().take(survivors.len());
        for (got, want) in survivors.iter().zip(expected) {
            assert_eq!(got.key(), want.key());
            assert_eq!(got.value(), want.value());
        }
    }
}

#[test]
fn test_index_bounds() {
    let mut table = HpackTable::new();
    for i in 0..5 {
        assert!(table.add(Memento::new(
            Bytes::from(format!("k{}", i)),
            Bytes::from_static(b"v"),
        )));
    }

    assert!(table.lookup(0).is_none());
    assert_eq!(table.lookup(1).unwrap().key().as_ref(), b":authority");
    assert_eq!(table.lookup(61).unwrap().key().as_ref(), b"www-authenticate");
    assert_eq!(table.lookup(61 + 5).unwrap().key().as_ref(), b"k0");
    assert!(table.lookup(61 + 5 + 1).is_none());
}

#[test]
fn test_insertion_order_is_monotonic() {
    let mut table = HpackTable::new();
    for i in 0..200u32 {
        table.add(Memento::new(
            Bytes::from(format!("header-{:03}", i)),
            Bytes::from(format!("{}", i)),
        ));
    }

    let ids: Vec<u32> = table
        .dynamic_entries()
        .map(|m| std::str::from_utf8(m.value()).unwrap().parse().unwrap())
        .collect();
    assert!(!ids.is_empty());
    assert_eq!(ids[0], 199);
    assert!(ids.windows(2).all(|w| w[0] == w[1] + 1));
}

#[test]
fn test_size_zero_disables_then_reenables() {
    let mut table = HpackTable::new();
    table.add(Memento::new(Bytes::from_static(b"a"), Bytes::from_static(b"b")));

    assert!(table.set_current_size(0));
    assert_eq!(table.num_entries(), 0);
    assert!(!table.add(Memento::new(Bytes::from_static(b"a"), Bytes::from_static(b"b"))));
    assert_eq!(table.num_entries(), 0);

    assert!(table.set_current_size(100));
    assert!(table.add(Memento::new(Bytes::from_static(b"a"), Bytes::from_static(b"b"))));
    assert_eq!(table.num_entries(), 1);
    assert_eq!(table.bytes_used(), 34);
}

#[test]
fn test_ring_grows_and_shrinks_with_size() {
    let mut table = HpackTable::new();
    assert!(table.max_entries() >= 128);

    table.set_max_bytes(65536);
    assert!(table.set_current_size(65536));
    assert_eq!(table.max_entries(), 2048);

    for i in 0..1500u32 {
        assert!(table.add(Memento::new(Bytes::from(format!("{}", i)), Bytes::new())));
    }
    assert_eq!(table.num_entries(), 1500);

    assert!(table.set_current_size(4096));
    assert_eq!(table.max_entries(), 128);
    assert!(table.num_entries() <= 128);
    assert_eq!(table.peek(62).unwrap().key().as_ref(), b"1499");
    check_invariants(&table);
}

#[test]
fn test_decoder_size_update_above_max() {
    let mut decoder = HeaderDecoder::new();
    decoder.table_mut().set_max_bytes(1024);

    // Dynamic table size update to 2048 (001xxxxx with a 5-bit prefix)
    let block = Bytes::from_static(&[0x3f, 0xe1, 0x0f]);
    let result = decoder.decode(&block);
    assert!(matches!(
        result,
        Err(HpackError::SizeUpdateExceedsMax { requested: 2048, max: 1024 })
    ));
}

#[test]
fn test_decoder_out_of_range_index() {
    let mut decoder = HeaderDecoder::new();
    // Indexed field 62 on an empty dynamic table
    let result = decoder.decode(&Bytes::from_static(&[0xbe]));
    assert!(matches!(result, Err(HpackError::InvalidIndex(62))));
}

#[test]
fn test_decoder_tracks_hpack_encoder() {
    let mut encoder = hpack::Encoder::new();
    let mut decoder = HeaderDecoder::new();

    let requests = [
        [(":method", "GET"), (":path", "/index.html"), ("user-agent", "h2drain-test")],
        [(":method", "GET"), (":path", "/style.css"), ("user-agent", "h2drain-test")],
    ];

    for fields in requests {
        let block = Bytes::from(encoder.encode(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes()))));
        let decoded = decoder.decode(&block).unwrap();
        assert_eq!(decoded.len(), fields.len());
        for (header, (name, value)) in decoded.iter().zip(&fields) {
            assert_eq!(header.name.as_ref(), name.as_bytes());
            assert_eq!(header.value.as_ref(), value.as_bytes());
        }
        assert_eq!(decoder.table().bytes_used(), sum_of_entries(decoder.table()));
    }
}
