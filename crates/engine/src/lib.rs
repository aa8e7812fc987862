//! # Engine — the SiltKV storage engine
//!
//! An embeddable, single-process, ordered key/value store. Every mutation is
//! appended to a log of fixed-size segment files; reads are served from
//! in-memory indexes rebuilt from that log at open.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌─────────────────────────────────────────────────┐
//! │                      DB                         │
//! │                                                 │
//! │ begin() → Tx ── put/delete/sadd/lpush/zadd ──┐  │
//! │                (staged pending entries)      │  │
//! │                                              v  │
//! │ commit() → committed marker on last entry       │
//! │          → append batch to active DataFile      │
//! │            (rotate to file-ID+1 when full)      │
//! │          → apply entries to in-memory indexes   │
//! │                                                 │
//! │ indexes: bucket → B+ tree | set | zset | list   │
//! │ reads:   Tx → index → (key-only mode) ReadAt    │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | `lib.rs`      | `DB` facade: open/close, state, index dispatch       |
//! | [`rwmanager`] | positional vs memory-mapped segment I/O              |
//! | [`datafile`]  | one segment: framed entry read, raw append           |
//! | [`options`]   | open-time configuration                              |
//! | [`tx`]        | Begin/Commit/Rollback and every per-key operation    |
//! | [`recovery`]  | cold-start scan: committed-tx grouping, index build  |
//! | [`merge`]     | rewrite live entries into a fresh segment sequence   |
//!
//! ## Crash Safety
//!
//! A transaction's entries are written back-to-back with only the last one
//! carrying the committed status. Recovery admits a transaction into the
//! indexes exactly when it sees that marker, so a batch that dies mid-write
//! leaves only uncommitted entries behind and is ignored. Corrupt tails are
//! truncated at the last good offset.
//!
//! ## Concurrency
//!
//! One process-wide reader/writer lock: any number of read-only transactions
//! or exactly one writable transaction. Index updates happen after the log
//! append and before the lock is released, so every reader sees a consistent
//! view.

mod datafile;
mod errors;
mod merge;
mod options;
mod recovery;
mod rwmanager;
mod tx;
mod txid;

pub use datafile::{data_file_path, parse_data_file_id, DataFile};
pub use errors::{Error, Result};
pub use options::{EntryIdxMode, Options, RwMode, DEFAULT_SEGMENT_SIZE};
pub use rwmanager::{FileIoRwManager, MmapRwManager, RwManager};
pub use tx::Tx;

use bptree::{BPTree, COUNT_FLAG_ENABLED};
use ds::{List, Set, SortedSet};
use entry::{
    CodecError, Entry, Hint, DATA_DELETE_FLAG, DATA_LPOP_FLAG, DATA_LPUSH_FLAG, DATA_LREM_FLAG,
    DATA_LSET_FLAG, DATA_LTRIM_FLAG, DATA_RPOP_FLAG, DATA_RPUSH_FLAG, DATA_SET_FLAG,
    DATA_STRUCTURE_BPTREE, DATA_STRUCTURE_LIST, DATA_STRUCTURE_SET, DATA_STRUCTURE_SORTED_SET,
    DATA_ZADD_FLAG, DATA_ZPOP_MAX_FLAG, DATA_ZPOP_MIN_FLAG, DATA_ZREM_FLAG,
    DATA_ZREM_RANGE_BY_RANK_FLAG,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use txid::TxIdGen;

/// The database: owner of the segment files, the indexes, and the lock.
pub struct DB {
    pub(crate) opt: Options,
    pub(crate) state: RwLock<DbState>,
    pub(crate) closed: AtomicBool,
    pub(crate) tx_ids: Mutex<TxIdGen>,
}

impl DB {
    /// Opens (or creates) the store rooted at `opt.dir`, scanning existing
    /// segments to rebuild the in-memory indexes.
    pub fn open(opt: Options) -> Result<DB> {
        opt.validate()?;
        std::fs::create_dir_all(&opt.dir)?;
        recovery::cleanup_merge_tmp(&opt.dir);
        let state = recovery::build(&opt)?;
        Ok(DB {
            tx_ids: Mutex::new(TxIdGen::new(opt.node_num)),
            opt,
            state: RwLock::new(state),
            closed: AtomicBool::new(false),
        })
    }

    /// Syncs and closes the active file and refuses all further operations.
    /// Blocks until in-flight transactions release the lock.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::DbClosed);
        }
        let mut state = self.state.write();
        state.active_file.sync()?;
        state.active_file.close()?;
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Best-effort close on drop; the log already holds everything a reopen
/// needs, so failures here are ignored.
impl Drop for DB {
    fn drop(&mut self) {
        if !self.is_closed() {
            let _ = self.close();
        }
    }
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB")
            .field("dir", &self.opt.dir)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Everything guarded by the process-wide lock.
pub(crate) struct DbState {
    pub(crate) idx: Indexes,
    pub(crate) active_file: DataFile,
    pub(crate) max_file_id: u64,
    pub(crate) committed_txs: HashSet<u64>,
    pub(crate) merging: bool,
}

impl DbState {
    /// Loads the entry a hint points at, from the active file or by opening
    /// the read-only segment that holds it.
    pub(crate) fn read_entry(&self, opt: &Options, file_id: u64, off: u64) -> Result<Entry> {
        let found = if file_id == self.active_file.file_id {
            self.active_file.read_entry_at(off)?
        } else {
            let path = data_file_path(&opt.dir, file_id);
            let df = DataFile::open(&path, file_id, opt.segment_size, RwMode::FileIo)?;
            df.read_entry_at(off)?
        };
        // A hint always points at a written entry; a zero header here means
        // the segment was truncated underneath us.
        found.ok_or(Error::Codec(CodecError::Decode))
    }

    /// Seals the active file and switches appends to a fresh segment with
    /// the next file ID.
    pub(crate) fn rotate(&mut self, opt: &Options) -> Result<()> {
        self.active_file.sync()?;
        let new_id = self.active_file.file_id + 1;
        let path = data_file_path(&opt.dir, new_id);
        let new_file = DataFile::open(&path, new_id, opt.segment_size, opt.rw_mode)?;
        let mut old = std::mem::replace(&mut self.active_file, new_file);
        old.close()?;
        self.max_file_id = new_id;
        Ok(())
    }
}

/// The per-bucket indexes for all four datatypes. Buckets come into being
/// on first write.
#[derive(Default)]
pub(crate) struct Indexes {
    pub(crate) bptree: HashMap<Vec<u8>, BPTree>,
    pub(crate) set: HashMap<Vec<u8>, Set>,
    pub(crate) sorted_set: HashMap<Vec<u8>, SortedSet>,
    pub(crate) list: HashMap<Vec<u8>, List>,
}

impl Indexes {
    pub(crate) fn new() -> Indexes {
        Indexes::default()
    }

    /// Applies one logged entry to the matching index. Commit and recovery
    /// both funnel through here, which is what makes replay deterministic:
    /// the mutation is fully described by (ds, flag, key, value).
    pub(crate) fn apply_entry(&mut self, e: &Entry, file_id: u64, off: u64, mode: EntryIdxMode) {
        match e.meta.ds {
            DATA_STRUCTURE_BPTREE => {
                let tree = self.bptree.entry(e.bucket.clone()).or_default();
                let hint = Hint {
                    key: e.key.clone(),
                    file_id,
                    data_pos: off,
                    meta: e.meta.clone(),
                };
                let cached = match mode {
                    EntryIdxMode::KeyValInRAM => Some(e.clone()),
                    EntryIdxMode::KeyOnlyInRAM => None,
                };
                tree.insert(hint, cached, COUNT_FLAG_ENABLED);
            }
            DATA_STRUCTURE_SET => {
                let set = self.set.entry(e.bucket.clone()).or_default();
                let key = String::from_utf8_lossy(&e.key).into_owned();
                match e.meta.flag {
                    DATA_SET_FLAG => set.sadd(&key, e.value.clone()),
                    DATA_DELETE_FLAG => {
                        let _ = set.srem(&key, &e.value);
                    }
                    _ => {}
                }
            }
            DATA_STRUCTURE_LIST => {
                let list = self.list.entry(e.bucket.clone()).or_default();
                let key = String::from_utf8_lossy(&e.key).into_owned();
                match e.meta.flag {
                    DATA_LPUSH_FLAG => list.lpush(&key, e.value.clone()),
                    DATA_RPUSH_FLAG => list.rpush(&key, e.value.clone()),
                    DATA_LPOP_FLAG => {
                        list.lpop(&key);
                    }
                    DATA_RPOP_FLAG => {
                        list.rpop(&key);
                    }
                    DATA_LREM_FLAG => {
                        if let Some((count, item)) = payload::decode_lrem(&e.value) {
                            let _ = list.lrem(&key, count as i64, item);
                        }
                    }
                    DATA_LSET_FLAG => {
                        if let Some((index, item)) = payload::decode_lset(&e.value) {
                            let _ = list.lset(&key, index as usize, item.to_vec());
                        }
                    }
                    DATA_LTRIM_FLAG => {
                        if let Some((start, end)) = payload::decode_bounds(&e.value) {
                            let _ = list.ltrim(&key, start as i64, end as i64);
                        }
                    }
                    _ => {}
                }
            }
            DATA_STRUCTURE_SORTED_SET => {
                let zset = self.sorted_set.entry(e.bucket.clone()).or_default();
                match e.meta.flag {
                    DATA_ZADD_FLAG => {
                        if let Some((score, value)) = payload::decode_zadd(&e.value) {
                            zset.zadd(&e.key, score, value.to_vec());
                        }
                    }
                    DATA_ZREM_FLAG => {
                        let _ = zset.zrem(&e.key);
                    }
                    DATA_ZREM_RANGE_BY_RANK_FLAG => {
                        if let Some((start, end)) = payload::decode_bounds(&e.value) {
                            zset.zrem_range_by_rank(start as i64, end as i64);
                        }
                    }
                    DATA_ZPOP_MAX_FLAG => {
                        zset.zpop_max();
                    }
                    DATA_ZPOP_MIN_FLAG => {
                        zset.zpop_min();
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

/// Value encodings for the collection operations whose arguments do not fit
/// the plain (key, item) shape. The transaction layer encodes, the index
/// apply path decodes; both sides live in this crate so the layouts stay in
/// lockstep.
pub(crate) mod payload {
    pub(crate) fn encode_lrem(count: i32, item: &[u8]) -> Vec<u8> {
        let mut v = Vec::with_capacity(4 + item.len());
        v.extend_from_slice(&count.to_le_bytes());
        v.extend_from_slice(item);
        v
    }

    pub(crate) fn decode_lrem(value: &[u8]) -> Option<(i32, &[u8])> {
        let count = i32::from_le_bytes(value.get(..4)?.try_into().ok()?);
        Some((count, &value[4..]))
    }

    pub(crate) fn encode_lset(index: u32, item: &[u8]) -> Vec<u8> {
        let mut v = Vec::with_capacity(4 + item.len());
        v.extend_from_slice(&index.to_le_bytes());
        v.extend_from_slice(item);
        v
    }

    pub(crate) fn decode_lset(value: &[u8]) -> Option<(u32, &[u8])> {
        let index = u32::from_le_bytes(value.get(..4)?.try_into().ok()?);
        Some((index, &value[4..]))
    }

    pub(crate) fn encode_bounds(start: i32, end: i32) -> Vec<u8> {
        let mut v = Vec::with_capacity(8);
        v.extend_from_slice(&start.to_le_bytes());
        v.extend_from_slice(&end.to_le_bytes());
        v
    }

    pub(crate) fn decode_bounds(value: &[u8]) -> Option<(i32, i32)> {
        let start = i32::from_le_bytes(value.get(..4)?.try_into().ok()?);
        let end = i32::from_le_bytes(value.get(4..8)?.try_into().ok()?);
        Some((start, end))
    }

    pub(crate) fn encode_zadd(score: f64, value: &[u8]) -> Vec<u8> {
        let mut v = Vec::with_capacity(8 + value.len());
        v.extend_from_slice(&score.to_le_bytes());
        v.extend_from_slice(value);
        v
    }

    pub(crate) fn decode_zadd(value: &[u8]) -> Option<(f64, &[u8])> {
        let score = f64::from_le_bytes(value.get(..8)?.try_into().ok()?);
        Some((score, &value[8..]))
    }
}

#[cfg(test)]
mod tests;
