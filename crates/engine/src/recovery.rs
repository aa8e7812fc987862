//! Cold-start recovery: scan the segment files and rebuild every index.
//!
//! Segments are scanned in ascending file-ID order. Entries are grouped by
//! transaction ID: an uncommitted entry is buffered, and the moment a
//! committed marker for its transaction appears, the whole group is replayed
//! into the indexes — in log order, through the same dispatch commit uses.
//! Groups whose marker never shows up are dropped at the end of the scan,
//! which is what makes a half-written batch invisible after a crash.
//!
//! Corruption (CRC mismatch, impossible sizes) ends the scan of that file at
//! the last good offset with a warning; everything past it is treated as
//! lost unacknowledged writes. The highest-numbered file becomes the active
//! file, its write offset re-established at its end-of-data marker.

use crate::datafile::{data_file_path, parse_data_file_id, DataFile};
use crate::errors::{Error, Result};
use crate::options::Options;
use crate::{DbState, Indexes};
use entry::{Entry, COMMITTED};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Scratch directory used by merge; leftovers mean an interrupted merge.
pub(crate) const MERGE_TMP_DIR: &str = "merge.tmp";

/// Removes an interrupted merge's scratch directory. The original segments
/// are still in place, so there is nothing to repair.
pub(crate) fn cleanup_merge_tmp(dir: &Path) {
    let tmp = dir.join(MERGE_TMP_DIR);
    if tmp.exists() {
        let _ = std::fs::remove_dir_all(&tmp);
    }
}

/// Scans `opt.dir` and builds the full in-memory state.
pub(crate) fn build(opt: &Options) -> Result<DbState> {
    let mut ids = list_segment_ids(&opt.dir)?;
    ids.sort_unstable();

    let mut idx = Indexes::new();
    let mut committed: HashSet<u64> = HashSet::new();
    let mut unconfirmed: HashMap<u64, Vec<(u64, u64, Entry)>> = HashMap::new();
    let mut active_off = 0u64;

    for (pos, &file_id) in ids.iter().enumerate() {
        let path = data_file_path(&opt.dir, file_id);
        let df = DataFile::open(&path, file_id, opt.segment_size, opt.start_file_loading_mode)?;

        let mut off = 0u64;
        loop {
            match df.read_entry_at(off) {
                Ok(None) => break,
                Ok(Some(e)) => {
                    let size = e.size();
                    if e.meta.status == COMMITTED {
                        committed.insert(e.meta.tx_id);
                        if let Some(buffered) = unconfirmed.remove(&e.meta.tx_id) {
                            for (bfid, boff, be) in buffered {
                                idx.apply_entry(&be, bfid, boff, opt.entry_idx_mode);
                            }
                        }
                        idx.apply_entry(&e, file_id, off, opt.entry_idx_mode);
                    } else {
                        unconfirmed
                            .entry(e.meta.tx_id)
                            .or_default()
                            .push((file_id, off, e));
                    }
                    off += size;
                    if off >= opt.segment_size {
                        break;
                    }
                }
                Err(Error::Codec(err)) => {
                    log::warn!(
                        "segment {}: truncating at offset {} ({}); the remainder is discarded",
                        file_id,
                        off,
                        err
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        if pos == ids.len() - 1 {
            active_off = off;
        }
    }

    // Transactions that never got their committed marker on disk.
    drop(unconfirmed);

    let max_file_id = ids.last().copied().unwrap_or(0);
    let path = data_file_path(&opt.dir, max_file_id);
    let mut active_file = DataFile::open(&path, max_file_id, opt.segment_size, opt.rw_mode)?;
    active_file.write_off = active_off;

    Ok(DbState {
        idx,
        active_file,
        max_file_id,
        committed_txs: committed,
        merging: false,
    })
}

/// File IDs of every segment in `dir` (names that parse as `<decimal>.dat`).
fn list_segment_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for dent in std::fs::read_dir(dir)? {
        let dent = dent?;
        if let Some(name) = dent.file_name().to_str() {
            if let Some(id) = parse_data_file_id(name) {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}
