use crate::{Options, DB};
use std::fs;
use std::path::Path;

/// Options tuned for tests: small segments, no per-commit fsync.
pub fn small_options(dir: &Path, segment_size: u64) -> Options {
    Options {
        segment_size,
        sync_enable: false,
        ..Options::new(dir)
    }
}

pub fn open_small(dir: &Path, segment_size: u64) -> DB {
    DB::open(small_options(dir, segment_size)).unwrap()
}

pub fn count_dat_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "dat")
                .unwrap_or(false)
        })
        .count()
}

/// Commits `key -> value` in `bucket` as a single one-entry transaction.
pub fn put_one(db: &DB, bucket: &str, key: &[u8], value: &[u8]) {
    let mut tx = db.begin(true).unwrap();
    tx.put(bucket, key, value).unwrap();
    tx.commit().unwrap();
}

/// Reads `key` from `bucket` under a fresh read-only transaction.
pub fn get_one(db: &DB, bucket: &str, key: &[u8]) -> crate::Result<Vec<u8>> {
    let tx = db.begin(false)?;
    tx.get(bucket, key)
}
