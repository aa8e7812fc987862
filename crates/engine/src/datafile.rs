//! One segment file: a fixed-capacity, append-only container of framed
//! entries. Segments are named `<decimal file id>.dat`; the highest ID is
//! the active file and the only write target.

use crate::errors::Result;
use crate::options::RwMode;
use crate::rwmanager::{open_rw_manager, RwManager};
use entry::{decode_header, CodecError, Entry, DATA_SUFFIX, ENTRY_HEADER_SIZE};
use std::path::{Path, PathBuf};

/// Path of the segment with the given file ID under `dir`.
pub fn data_file_path(dir: &Path, file_id: u64) -> PathBuf {
    dir.join(format!("{}{}", file_id, DATA_SUFFIX))
}

/// Parses a segment file name (`"17.dat"`) back into its file ID.
pub fn parse_data_file_id(name: &str) -> Option<u64> {
    name.strip_suffix(DATA_SUFFIX)?.parse().ok()
}

/// An open segment file.
pub struct DataFile {
    /// Decimal ID encoded in the file name.
    pub file_id: u64,
    /// Next append position; maintained by the transaction engine and
    /// re-established by recovery.
    pub write_off: u64,
    capacity: u64,
    rw: Box<dyn RwManager>,
}

impl DataFile {
    /// Opens (creating and pre-sizing if needed) the segment at `path`.
    pub fn open(path: &Path, file_id: u64, capacity: u64, mode: RwMode) -> Result<DataFile> {
        let rw = open_rw_manager(path, capacity, mode)?;
        Ok(DataFile {
            file_id,
            write_off: 0,
            capacity,
            rw,
        })
    }

    /// The fixed capacity this segment was created with.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Decodes the entry at byte offset `off`.
    ///
    /// Returns `Ok(None)` when `off` points into the unused zeroed tail (or
    /// past a capacity too small for another header) — the end-of-data
    /// signal.
    ///
    /// # Errors
    ///
    /// [`CodecError::CrcZero`], [`CodecError::Crc`], or
    /// [`CodecError::Capacity`] on corruption; I/O errors verbatim.
    pub fn read_entry_at(&self, off: u64) -> Result<Option<Entry>> {
        if off + ENTRY_HEADER_SIZE as u64 > self.capacity {
            return Ok(None);
        }

        let mut header = [0u8; ENTRY_HEADER_SIZE];
        self.rw.read_at(&mut header, off)?;
        let decoded = match decode_header(&header)? {
            None => return Ok(None),
            Some(decoded) => decoded,
        };

        let payload_len = decoded.meta.payload_size();
        if off + ENTRY_HEADER_SIZE as u64 + payload_len > self.capacity {
            return Err(CodecError::Capacity.into());
        }

        let mut payload = vec![0u8; payload_len as usize];
        self.rw.read_at(&mut payload, off + ENTRY_HEADER_SIZE as u64)?;
        Ok(Some(Entry::from_payload(decoded, &payload)?))
    }

    /// Writes pre-encoded entry bytes at `off`. The caller sizes the batch
    /// against the capacity before calling.
    pub fn write_at(&mut self, buf: &[u8], off: u64) -> Result<usize> {
        Ok(self.rw.write_at(buf, off)?)
    }

    /// Flushes written data to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        Ok(self.rw.sync()?)
    }

    /// Releases the file. The struct is unusable afterwards.
    pub fn close(&mut self) -> Result<()> {
        Ok(self.rw.close()?)
    }
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile")
            .field("file_id", &self.file_id)
            .field("write_off", &self.write_off)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entry::{MetaData, COMMITTED, DATA_SET_FLAG, DATA_STRUCTURE_BPTREE};
    use tempfile::tempdir;

    fn sample(key: &[u8], value: &[u8]) -> Entry {
        Entry::new(
            b"b".to_vec(),
            key.to_vec(),
            value.to_vec(),
            MetaData {
                timestamp: 42,
                flag: DATA_SET_FLAG,
                status: COMMITTED,
                ds: DATA_STRUCTURE_BPTREE,
                tx_id: 7,
                ..MetaData::default()
            },
        )
    }

    fn open_both_modes(test: impl Fn(RwMode)) {
        test(RwMode::FileIo);
        test(RwMode::Mmap);
    }

    #[test]
    fn write_then_read_back() {
        open_both_modes(|mode| {
            let dir = tempdir().unwrap();
            let path = data_file_path(dir.path(), 0);
            let mut df = DataFile::open(&path, 0, 4096, mode).unwrap();

            let e = sample(b"k", b"v");
            let buf = e.encode();
            df.write_at(&buf, 0).unwrap();
            df.sync().unwrap();

            let got = df.read_entry_at(0).unwrap().unwrap();
            assert_eq!(got, e);
        });
    }

    #[test]
    fn zeroed_tail_reads_as_end_of_data() {
        open_both_modes(|mode| {
            let dir = tempdir().unwrap();
            let path = data_file_path(dir.path(), 0);
            let mut df = DataFile::open(&path, 0, 4096, mode).unwrap();

            let e = sample(b"k", b"v");
            let buf = e.encode();
            df.write_at(&buf, 0).unwrap();

            assert!(df.read_entry_at(buf.len() as u64).unwrap().is_none());
            // Offsets too close to capacity for a header also end the scan.
            assert!(df.read_entry_at(4096 - 10).unwrap().is_none());
        });
    }

    #[test]
    fn oversized_declared_payload_is_a_capacity_error() {
        let dir = tempdir().unwrap();
        let path = data_file_path(dir.path(), 0);
        let mut df = DataFile::open(&path, 0, 256, RwMode::FileIo).unwrap();

        // Declare a value far bigger than the capacity; the size check fires
        // before any CRC verification.
        let mut e = sample(b"k", b"v");
        e.meta.value_size = 100_000;
        df.write_at(&e.encode(), 0).unwrap();

        match df.read_entry_at(0) {
            Err(crate::errors::Error::Codec(CodecError::Capacity)) => {}
            other => panic!("expected capacity error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn corrupt_payload_is_a_crc_error() {
        let dir = tempdir().unwrap();
        let path = data_file_path(dir.path(), 0);
        let mut df = DataFile::open(&path, 0, 4096, RwMode::FileIo).unwrap();

        let e = sample(b"k", b"value-to-corrupt");
        let mut buf = e.encode();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        df.write_at(&buf, 0).unwrap();

        match df.read_entry_at(0) {
            Err(crate::errors::Error::Codec(CodecError::Crc)) => {}
            other => panic!("expected crc error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn file_names_roundtrip_through_ids() {
        assert_eq!(parse_data_file_id("0.dat"), Some(0));
        assert_eq!(parse_data_file_id("1234.dat"), Some(1234));
        assert_eq!(parse_data_file_id("x.dat"), None);
        assert_eq!(parse_data_file_id("12.sst"), None);

        let p = data_file_path(Path::new("/tmp/db"), 17);
        assert_eq!(p.file_name().unwrap(), "17.dat");
    }
}
