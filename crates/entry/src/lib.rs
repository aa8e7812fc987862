//! # Entry — the unit of the log
//!
//! Every mutation in SiltKV is serialized into an `Entry` and appended to a
//! segment file **before** the corresponding in-memory index update. On
//! restart the segments are replayed to reconstruct the indexes, so this
//! codec defines the on-disk contract: encoding must be byte-identical for
//! the same input, and decoding must reject anything the CRC does not vouch
//! for.
//!
//! ## Binary Entry Format (little-endian)
//!
//! ```text
//! offset  size  field
//! 0       4     crc32
//! 4       8     timestamp
//! 12      4     key_size
//! 16      4     value_size
//! 20      2     flag
//! 22      4     ttl
//! 26      4     bucket_size
//! 30      2     status (0=uncommitted, 1=committed)
//! 32      2     ds (0=set, 1=sortedset, 2=bptree, 3=list)
//! 34      8     tx_id
//! 42      B     bucket
//! 42+B    K     key
//! 42+B+K  V     value
//! ```
//!
//! The CRC covers bytes `[4 .. 42+B+K+V)` — everything after itself.
//!
//! A header of 42 zero bytes is not an entry at all: segment files are
//! pre-sized to their capacity, so an all-zero header marks the end of the
//! written region (`decode_header` returns `Ok(None)`).
//!
//! ## Example
//!
//! ```rust
//! use entry::{Entry, MetaData, DATA_SET_FLAG, DATA_STRUCTURE_BPTREE, UNCOMMITTED};
//!
//! let e = Entry::new(
//!     b"bucket".to_vec(),
//!     b"key".to_vec(),
//!     b"value".to_vec(),
//!     MetaData {
//!         timestamp: 1,
//!         ttl: 0,
//!         flag: DATA_SET_FLAG,
//!         status: UNCOMMITTED,
//!         ds: DATA_STRUCTURE_BPTREE,
//!         tx_id: 7,
//!         ..MetaData::default()
//!     },
//! );
//! let buf = e.encode();
//! assert_eq!(buf.len() as u64, e.size());
//! ```

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use thiserror::Error;

/// Size of the fixed entry header in bytes.
pub const ENTRY_HEADER_SIZE: usize = 42;

/// File-name suffix of segment files (`<decimal id>.dat`).
pub const DATA_SUFFIX: &str = ".dat";

/// Deletes a key from the B+ tree keyspace (writes a tombstone).
pub const DATA_DELETE_FLAG: u16 = 0;
/// Sets a key in the B+ tree keyspace.
pub const DATA_SET_FLAG: u16 = 1;
/// Pushes an item onto the head of a list.
pub const DATA_LPUSH_FLAG: u16 = 2;
/// Pushes an item onto the tail of a list.
pub const DATA_RPUSH_FLAG: u16 = 3;
/// Removes occurrences of an item from a list.
pub const DATA_LREM_FLAG: u16 = 4;
/// Pops the head item of a list.
pub const DATA_LPOP_FLAG: u16 = 5;
/// Pops the tail item of a list.
pub const DATA_RPOP_FLAG: u16 = 6;
/// Overwrites the item at a list index.
pub const DATA_LSET_FLAG: u16 = 7;
/// Trims a list to a rank range.
pub const DATA_LTRIM_FLAG: u16 = 8;
/// Adds a scored member to a sorted set.
pub const DATA_ZADD_FLAG: u16 = 9;
/// Removes a member from a sorted set.
pub const DATA_ZREM_FLAG: u16 = 10;
/// Removes a rank range from a sorted set.
pub const DATA_ZREM_RANGE_BY_RANK_FLAG: u16 = 11;
/// Pops the highest-scored member of a sorted set.
pub const DATA_ZPOP_MAX_FLAG: u16 = 12;
/// Pops the lowest-scored member of a sorted set.
pub const DATA_ZPOP_MIN_FLAG: u16 = 13;

/// Transaction status: not yet covered by a committed marker.
pub const UNCOMMITTED: u16 = 0;
/// Transaction status: the committed marker itself.
pub const COMMITTED: u16 = 1;

/// TTL value meaning "never expires".
pub const PERSISTENT: u32 = 0;

/// Data-structure tag: unordered set.
pub const DATA_STRUCTURE_SET: u16 = 0;
/// Data-structure tag: sorted set.
pub const DATA_STRUCTURE_SORTED_SET: u16 = 1;
/// Data-structure tag: B+ tree keyspace.
pub const DATA_STRUCTURE_BPTREE: u16 = 2;
/// Data-structure tag: list.
pub const DATA_STRUCTURE_LIST: u16 = 3;

/// Errors produced while decoding entries from a segment file.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The stored CRC does not match the CRC computed over the frame.
    #[error("crc mismatch")]
    Crc,

    /// The stored CRC is zero but the rest of the header is not — a frame
    /// this codec never produces.
    #[error("crc is zero on a non-empty header")]
    CrcZero,

    /// The declared payload sizes would extend past the segment capacity.
    #[error("entry extends past segment capacity")]
    Capacity,

    /// The buffer is too short to hold what its header declares.
    #[error("truncated or malformed entry")]
    Decode,
}

/// The metadata half of an entry: everything in the header except the CRC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaData {
    /// Wall-clock seconds at write time.
    pub timestamp: u64,
    /// Byte length of the key.
    pub key_size: u32,
    /// Byte length of the value.
    pub value_size: u32,
    /// Seconds until expiry; [`PERSISTENT`] (0) means never.
    pub ttl: u32,
    /// Operation tag (`DATA_*_FLAG`).
    pub flag: u16,
    /// Byte length of the bucket label.
    pub bucket_size: u32,
    /// [`UNCOMMITTED`] or [`COMMITTED`].
    pub status: u16,
    /// Which collection the op targets (`DATA_STRUCTURE_*`).
    pub ds: u16,
    /// Monotonic transaction ID this entry belongs to.
    pub tx_id: u64,
}

impl MetaData {
    /// Total payload length declared by this header.
    pub fn payload_size(&self) -> u64 {
        self.bucket_size as u64 + self.key_size as u64 + self.value_size as u64
    }

    /// Whether an entry stamped with this metadata has expired at `now`
    /// (wall-clock seconds). Persistent entries never expire.
    pub fn is_expired(&self, now: u64) -> bool {
        self.ttl != PERSISTENT && self.timestamp + self.ttl as u64 <= now
    }

    /// Serializes the metadata into the 38 header bytes after the CRC.
    fn write_to(&self, buf: &mut Vec<u8>) {
        let mut tmp = [0u8; ENTRY_HEADER_SIZE - 4];
        LittleEndian::write_u64(&mut tmp[0..8], self.timestamp);
        LittleEndian::write_u32(&mut tmp[8..12], self.key_size);
        LittleEndian::write_u32(&mut tmp[12..16], self.value_size);
        LittleEndian::write_u16(&mut tmp[16..18], self.flag);
        LittleEndian::write_u32(&mut tmp[18..22], self.ttl);
        LittleEndian::write_u32(&mut tmp[22..26], self.bucket_size);
        LittleEndian::write_u16(&mut tmp[26..28], self.status);
        LittleEndian::write_u16(&mut tmp[28..30], self.ds);
        LittleEndian::write_u64(&mut tmp[30..38], self.tx_id);
        buf.extend_from_slice(&tmp);
    }
}

/// A decoded entry header: the stored CRC plus the metadata it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    /// CRC-32 stored in the first four bytes of the frame.
    pub crc: u32,
    /// The remaining 38 header bytes, parsed.
    pub meta: MetaData,
}

/// Parses a 42-byte entry header.
///
/// Returns `Ok(None)` when the header is all zeroes — the end-of-data marker
/// in a pre-sized segment file, not a corruption.
///
/// # Errors
///
/// * [`CodecError::Decode`] — `buf` is shorter than [`ENTRY_HEADER_SIZE`].
/// * [`CodecError::CrcZero`] — the CRC field is zero while other header
///   fields are not.
pub fn decode_header(buf: &[u8]) -> Result<Option<DecodedHeader>, CodecError> {
    if buf.len() < ENTRY_HEADER_SIZE {
        return Err(CodecError::Decode);
    }
    let buf = &buf[..ENTRY_HEADER_SIZE];

    if buf.iter().all(|&b| b == 0) {
        return Ok(None);
    }

    let crc = LittleEndian::read_u32(&buf[0..4]);
    let meta = MetaData {
        timestamp: LittleEndian::read_u64(&buf[4..12]),
        key_size: LittleEndian::read_u32(&buf[12..16]),
        value_size: LittleEndian::read_u32(&buf[16..20]),
        flag: LittleEndian::read_u16(&buf[20..22]),
        ttl: LittleEndian::read_u32(&buf[22..26]),
        bucket_size: LittleEndian::read_u32(&buf[26..30]),
        status: LittleEndian::read_u16(&buf[30..32]),
        ds: LittleEndian::read_u16(&buf[32..34]),
        tx_id: LittleEndian::read_u64(&buf[34..42]),
    };

    if crc == 0 {
        return Err(CodecError::CrcZero);
    }

    Ok(Some(DecodedHeader { crc, meta }))
}

/// The unit of the log: a self-describing record of one operation against
/// one key in one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Namespace label.
    pub bucket: Vec<u8>,
    /// The user key (or collection member, depending on the flag).
    pub key: Vec<u8>,
    /// The payload (operation-specific; may be empty).
    pub value: Vec<u8>,
    /// Header metadata.
    pub meta: MetaData,
}

impl Entry {
    /// Builds an entry, fixing up the size fields in `meta` to match the
    /// supplied byte strings.
    pub fn new(bucket: Vec<u8>, key: Vec<u8>, value: Vec<u8>, mut meta: MetaData) -> Self {
        meta.bucket_size = bucket.len() as u32;
        meta.key_size = key.len() as u32;
        meta.value_size = value.len() as u32;
        Entry {
            bucket,
            key,
            value,
            meta,
        }
    }

    /// Encoded size of this entry in bytes.
    pub fn size(&self) -> u64 {
        ENTRY_HEADER_SIZE as u64 + self.meta.payload_size()
    }

    /// Computes the CRC-32 this entry encodes to: the checksum of the header
    /// bytes after the CRC field, followed by bucket, key, and value.
    pub fn crc(&self) -> u32 {
        let mut header = Vec::with_capacity(ENTRY_HEADER_SIZE - 4);
        self.meta.write_to(&mut header);

        let mut hasher = Crc32::new();
        hasher.update(&header);
        hasher.update(&self.bucket);
        hasher.update(&self.key);
        hasher.update(&self.value);
        hasher.finalize()
    }

    /// Serializes the entry into a fresh buffer.
    ///
    /// Deterministic: the same entry always encodes to the same bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size() as usize);
        buf.extend_from_slice(&self.crc().to_le_bytes());
        self.meta.write_to(&mut buf);
        buf.extend_from_slice(&self.bucket);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Reassembles an entry from a decoded header and the payload bytes that
    /// followed it, verifying the CRC.
    ///
    /// # Errors
    ///
    /// * [`CodecError::Decode`] — `payload` is shorter than the header
    ///   declares.
    /// * [`CodecError::Crc`] — checksum mismatch.
    pub fn from_payload(header: DecodedHeader, payload: &[u8]) -> Result<Entry, CodecError> {
        let meta = header.meta;
        let b = meta.bucket_size as usize;
        let k = meta.key_size as usize;
        let v = meta.value_size as usize;
        if payload.len() < b + k + v {
            return Err(CodecError::Decode);
        }

        let entry = Entry {
            bucket: payload[..b].to_vec(),
            key: payload[b..b + k].to_vec(),
            value: payload[b + k..b + k + v].to_vec(),
            meta,
        };

        if entry.crc() != header.crc {
            return Err(CodecError::Crc);
        }

        Ok(entry)
    }
}

/// In-memory locator for an entry: where it lives in the log, plus its
/// decoded metadata. Hints never own payload bytes beyond the key itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    /// The user key.
    pub key: Vec<u8>,
    /// Segment file the entry was appended to.
    pub file_id: u64,
    /// Byte offset of the entry frame within that segment.
    pub data_pos: u64,
    /// The entry's header metadata.
    pub meta: MetaData,
}

impl Hint {
    /// Encoded size of the entry this hint points at.
    pub fn entry_size(&self) -> u64 {
        ENTRY_HEADER_SIZE as u64 + self.meta.payload_size()
    }
}

#[cfg(test)]
mod tests;
