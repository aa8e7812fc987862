use super::*;

// -------------------- Helpers --------------------

fn sample_entry() -> Entry {
    Entry::new(
        b"bucket001".to_vec(),
        b"key001".to_vec(),
        b"value001".to_vec(),
        MetaData {
            timestamp: 1_547_707_905,
            ttl: PERSISTENT,
            flag: DATA_SET_FLAG,
            status: COMMITTED,
            ds: DATA_STRUCTURE_BPTREE,
            tx_id: 1_547_707_905_001,
            ..MetaData::default()
        },
    )
}

fn decode_roundtrip(buf: &[u8]) -> Result<Option<Entry>, CodecError> {
    match decode_header(buf)? {
        None => Ok(None),
        Some(header) => Entry::from_payload(header, &buf[ENTRY_HEADER_SIZE..]).map(Some),
    }
}

// -------------------- Round trip --------------------

#[test]
fn encode_then_decode_is_identity() {
    let e = sample_entry();
    let buf = e.encode();
    assert_eq!(buf.len() as u64, e.size());

    let decoded = decode_roundtrip(&buf).unwrap().unwrap();
    assert_eq!(decoded, e);
}

#[test]
fn encoding_is_deterministic() {
    let e = sample_entry();
    assert_eq!(e.encode(), e.encode());
    assert_eq!(e.encode(), e.clone().encode());
}

#[test]
fn empty_value_and_bucket_roundtrip() {
    let e = Entry::new(
        Vec::new(),
        b"k".to_vec(),
        Vec::new(),
        MetaData {
            timestamp: 9,
            flag: DATA_ZPOP_MAX_FLAG,
            ds: DATA_STRUCTURE_SORTED_SET,
            tx_id: 3,
            ..MetaData::default()
        },
    );
    let decoded = decode_roundtrip(&e.encode()).unwrap().unwrap();
    assert_eq!(decoded, e);
}

#[test]
fn binary_payload_roundtrip() {
    let e = Entry::new(
        vec![0x00, 0xFF],
        vec![0xDE, 0xAD, 0x00],
        vec![0xBE, 0xEF, 0x80, 0x00],
        MetaData {
            timestamp: 1,
            flag: DATA_SET_FLAG,
            ds: DATA_STRUCTURE_BPTREE,
            tx_id: 1,
            ..MetaData::default()
        },
    );
    let decoded = decode_roundtrip(&e.encode()).unwrap().unwrap();
    assert_eq!(decoded, e);
}

// -------------------- Wire layout --------------------

#[test]
fn header_is_42_bytes_and_payload_order_is_bucket_key_value() {
    let e = sample_entry();
    let buf = e.encode();

    let b = e.bucket.len();
    let k = e.key.len();
    assert_eq!(&buf[ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + b], &e.bucket[..]);
    assert_eq!(
        &buf[ENTRY_HEADER_SIZE + b..ENTRY_HEADER_SIZE + b + k],
        &e.key[..]
    );
    assert_eq!(&buf[ENTRY_HEADER_SIZE + b + k..], &e.value[..]);
}

#[test]
fn stored_crc_covers_everything_after_itself() {
    let e = sample_entry();
    let buf = e.encode();

    let stored = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[4..]);
    assert_eq!(stored, hasher.finalize());
}

#[test]
fn integer_fields_are_little_endian() {
    let e = sample_entry();
    let buf = e.encode();

    assert_eq!(
        u64::from_le_bytes(buf[4..12].try_into().unwrap()),
        e.meta.timestamp
    );
    assert_eq!(
        u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        e.meta.key_size
    );
    assert_eq!(
        u16::from_le_bytes(buf[20..22].try_into().unwrap()),
        e.meta.flag
    );
    assert_eq!(
        u64::from_le_bytes(buf[34..42].try_into().unwrap()),
        e.meta.tx_id
    );
}

// -------------------- End-of-stream marker --------------------

#[test]
fn all_zero_header_is_end_of_stream() {
    let zeroes = [0u8; ENTRY_HEADER_SIZE];
    assert_eq!(decode_header(&zeroes).unwrap(), None);
}

#[test]
fn zero_header_with_trailing_garbage_is_still_end_of_stream() {
    let mut buf = vec![0u8; ENTRY_HEADER_SIZE];
    buf.extend_from_slice(b"leftover bytes from an overwritten tail");
    assert_eq!(decode_header(&buf).unwrap(), None);
}

// -------------------- Corruption detection --------------------

#[test]
fn flipped_payload_byte_fails_crc() {
    let e = sample_entry();
    let mut buf = e.encode();
    let last = buf.len() - 1;
    buf[last] ^= 0xFF;

    assert_eq!(decode_roundtrip(&buf), Err(CodecError::Crc));
}

#[test]
fn flipped_header_byte_fails_crc() {
    let e = sample_entry();
    let mut buf = e.encode();
    buf[8] ^= 0x01; // inside the timestamp

    assert_eq!(decode_roundtrip(&buf), Err(CodecError::Crc));
}

#[test]
fn zero_crc_with_nonzero_header_is_rejected() {
    let e = sample_entry();
    let mut buf = e.encode();
    buf[0..4].copy_from_slice(&[0, 0, 0, 0]);

    assert_eq!(decode_header(&buf), Err(CodecError::CrcZero));
}

#[test]
fn short_header_is_a_decode_error() {
    let buf = [1u8; ENTRY_HEADER_SIZE - 1];
    assert_eq!(decode_header(&buf), Err(CodecError::Decode));
}

#[test]
fn truncated_payload_is_a_decode_error() {
    let e = sample_entry();
    let buf = e.encode();
    let truncated = &buf[..buf.len() - 3];

    assert_eq!(decode_roundtrip(truncated), Err(CodecError::Decode));
}

// -------------------- Metadata --------------------

#[test]
fn new_fixes_up_declared_sizes() {
    let e = Entry::new(
        b"b".to_vec(),
        b"kk".to_vec(),
        b"vvv".to_vec(),
        MetaData::default(),
    );
    assert_eq!(e.meta.bucket_size, 1);
    assert_eq!(e.meta.key_size, 2);
    assert_eq!(e.meta.value_size, 3);
    assert_eq!(e.size(), ENTRY_HEADER_SIZE as u64 + 6);
}

#[test]
fn persistent_entries_never_expire() {
    let meta = MetaData {
        timestamp: 100,
        ttl: PERSISTENT,
        ..MetaData::default()
    };
    assert!(!meta.is_expired(u64::MAX));
}

#[test]
fn ttl_expiry_boundary() {
    let meta = MetaData {
        timestamp: 100,
        ttl: 10,
        ..MetaData::default()
    };
    assert!(!meta.is_expired(109));
    assert!(meta.is_expired(110));
    assert!(meta.is_expired(200));
}

#[test]
fn hint_entry_size_matches_entry() {
    let e = sample_entry();
    let hint = Hint {
        key: e.key.clone(),
        file_id: 0,
        data_pos: 0,
        meta: e.meta.clone(),
    };
    assert_eq!(hint.entry_size(), e.size());
}
