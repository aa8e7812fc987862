//! Transactions: Begin/Commit/Rollback plus every per-key operation.
//!
//! A `Tx` holds one side of the process-wide reader/writer lock for its whole
//! lifetime — many readers or a single writer. Write operations never touch
//! the indexes directly: they stage entries in `pending`, and commit appends
//! the batch to the active segment (last entry carrying the committed
//! status) before applying it in memory. Dropping a transaction without
//! committing releases the lock and discards the staged entries, which is
//! exactly a rollback.

use crate::errors::{Error, Result};
use crate::payload;
use crate::{DbState, DB};
use bptree::IndexError;
use ds::ZItem;
use entry::{
    Entry, MetaData, DATA_DELETE_FLAG, DATA_LPOP_FLAG, DATA_LPUSH_FLAG, DATA_LREM_FLAG,
    DATA_LSET_FLAG, DATA_LTRIM_FLAG, DATA_RPOP_FLAG, DATA_RPUSH_FLAG, DATA_SET_FLAG,
    DATA_STRUCTURE_BPTREE, DATA_STRUCTURE_LIST, DATA_STRUCTURE_SET, DATA_STRUCTURE_SORTED_SET,
    DATA_ZADD_FLAG, DATA_ZPOP_MAX_FLAG, DATA_ZPOP_MIN_FLAG, DATA_ZREM_FLAG,
    DATA_ZREM_RANGE_BY_RANK_FLAG, COMMITTED, PERSISTENT, UNCOMMITTED,
};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

enum TxGuard<'db> {
    Read(RwLockReadGuard<'db, DbState>),
    Write(RwLockWriteGuard<'db, DbState>),
}

/// One transaction. Read-only transactions share the lock; a writable
/// transaction owns it exclusively until commit or rollback.
pub struct Tx<'db> {
    db: &'db DB,
    id: u64,
    writable: bool,
    pending: Vec<Entry>,
    guard: Option<TxGuard<'db>>,
}

pub(crate) fn wall_clock_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl DB {
    /// Starts a transaction, blocking until the lock is available.
    ///
    /// # Errors
    ///
    /// [`Error::DbClosed`] once [`DB::close`] has been called.
    pub fn begin(&self, writable: bool) -> Result<Tx<'_>> {
        if self.is_closed() {
            return Err(Error::DbClosed);
        }
        let id = self.tx_ids.lock().next();
        let guard = if writable {
            TxGuard::Write(self.state.write())
        } else {
            TxGuard::Read(self.state.read())
        };
        // close() may have slipped in while we were blocked on the lock.
        if self.is_closed() {
            return Err(Error::DbClosed);
        }
        Ok(Tx {
            db: self,
            id,
            writable,
            pending: Vec::new(),
            guard: Some(guard),
        })
    }
}

impl<'db> Tx<'db> {
    /// This transaction's monotonic ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> Result<&DbState> {
        match self.guard.as_ref().ok_or(Error::TxClosed)? {
            TxGuard::Read(g) => Ok(g),
            TxGuard::Write(g) => Ok(g),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.guard.is_none() {
            return Err(Error::TxClosed);
        }
        if !self.writable {
            return Err(Error::TxNotWritable);
        }
        Ok(())
    }

    /// Builds and stages one uncommitted entry carrying this tx's ID.
    fn stage(
        &mut self,
        ds: u16,
        flag: u16,
        bucket: &str,
        key: &[u8],
        value: Vec<u8>,
        ttl: u32,
    ) -> Result<()> {
        self.ensure_writable()?;
        let entry = Entry::new(
            bucket.as_bytes().to_vec(),
            key.to_vec(),
            value,
            MetaData {
                timestamp: wall_clock_secs(),
                ttl,
                flag,
                status: UNCOMMITTED,
                ds,
                tx_id: self.id,
                ..MetaData::default()
            },
        );
        if entry.size() > self.db.opt.segment_size {
            return Err(Error::KeyAndValueSize);
        }
        self.pending.push(entry);
        Ok(())
    }

    // -------------------- Commit / rollback --------------------

    /// Commits the staged batch: the last entry is rewritten as the
    /// committed marker, the batch is appended to the active file (rotating
    /// first if it does not fit), synced when `sync_enable` is set, and then
    /// applied to the in-memory indexes in order.
    ///
    /// Any I/O failure aborts before the in-memory apply; the log is left
    /// with uncommitted entries that recovery will ignore.
    pub fn commit(&mut self) -> Result<()> {
        let guard = self.guard.take().ok_or(Error::TxClosed)?;
        let mut pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }
        let mut guard = match guard {
            TxGuard::Write(g) => g,
            TxGuard::Read(_) => return Err(Error::TxNotWritable),
        };
        let opt = &self.db.opt;
        let state = &mut *guard;

        // The committed marker: only the final entry of the batch.
        let last = pending.len() - 1;
        pending[last].meta.status = COMMITTED;

        let mut buf = Vec::new();
        let mut offsets = Vec::with_capacity(pending.len());
        for e in &pending {
            offsets.push(buf.len() as u64);
            buf.extend_from_slice(&e.encode());
        }
        let batch_size = buf.len() as u64;
        if batch_size > opt.segment_size {
            return Err(Error::KeyAndValueSize);
        }

        if state.active_file.write_off + batch_size > opt.segment_size {
            state.rotate(opt)?;
        }

        let start_off = state.active_file.write_off;
        state.active_file.write_at(&buf, start_off)?;
        state.active_file.write_off += batch_size;
        if opt.sync_enable {
            state.active_file.sync()?;
        }

        let file_id = state.active_file.file_id;
        for (e, off) in pending.iter().zip(&offsets) {
            state
                .idx
                .apply_entry(e, file_id, start_off + off, opt.entry_idx_mode);
        }
        state.committed_txs.insert(self.id);
        Ok(())
    }

    /// Discards the staged entries and releases the lock.
    pub fn rollback(&mut self) -> Result<()> {
        self.guard.take().ok_or(Error::TxClosed)?;
        self.pending.clear();
        Ok(())
    }

    // -------------------- B+ tree keyspace --------------------

    /// Stages a persistent write of `key` → `value` in `bucket`.
    pub fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_with_ttl(bucket, key, value, PERSISTENT)
    }

    /// Stages a write that expires `ttl` seconds after its commit timestamp.
    pub fn put_with_ttl(&mut self, bucket: &str, key: &[u8], value: &[u8], ttl: u32) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        self.stage(
            DATA_STRUCTURE_BPTREE,
            DATA_SET_FLAG,
            bucket,
            key,
            value.to_vec(),
            ttl,
        )
    }

    /// Stages a tombstone for `key` in `bucket`.
    pub fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        self.stage(
            DATA_STRUCTURE_BPTREE,
            DATA_DELETE_FLAG,
            bucket,
            key,
            Vec::new(),
            PERSISTENT,
        )
    }

    /// Point lookup. Sees this transaction's own staged writes first, then
    /// the committed index; tombstones and expired entries read as missing.
    pub fn get(&self, bucket: &str, key: &[u8]) -> Result<Vec<u8>> {
        let state = self.state()?;

        for e in self.pending.iter().rev() {
            if e.meta.ds == DATA_STRUCTURE_BPTREE
                && e.bucket == bucket.as_bytes()
                && e.key == key
            {
                return match e.meta.flag {
                    DATA_DELETE_FLAG => Err(IndexError::KeyNotFound.into()),
                    _ => Ok(e.value.clone()),
                };
            }
        }

        let tree = state
            .idx
            .bptree
            .get(bucket.as_bytes())
            .ok_or(Error::Index(IndexError::KeyNotFound))?;
        let rec = tree.find(key)?;
        if !rec.is_live(wall_clock_secs()) {
            return Err(IndexError::KeyNotFound.into());
        }
        self.materialize(state, rec)
    }

    /// All live pairs with `start <= key <= end`, ascending, with this
    /// transaction's staged writes overlaid.
    pub fn range_scan(
        &self,
        bucket: &str,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if start > end {
            return Err(IndexError::StartKey.into());
        }
        let state = self.state()?;
        let now = wall_clock_secs();

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        if let Some(tree) = state.idx.bptree.get(bucket.as_bytes()) {
            match tree.range(start, end) {
                Ok(records) => {
                    for rec in records {
                        if rec.is_live(now) {
                            merged.insert(rec.key().to_vec(), self.materialize(state, rec)?);
                        }
                    }
                }
                Err(IndexError::NoResult) => {}
                Err(e) => return Err(e.into()),
            }
        }

        for e in &self.pending {
            if e.meta.ds != DATA_STRUCTURE_BPTREE || e.bucket != bucket.as_bytes() {
                continue;
            }
            if e.key.as_slice() < start || e.key.as_slice() > end {
                continue;
            }
            match e.meta.flag {
                DATA_SET_FLAG => {
                    merged.insert(e.key.clone(), e.value.clone());
                }
                DATA_DELETE_FLAG => {
                    merged.remove(&e.key);
                }
                _ => {}
            }
        }

        if merged.is_empty() {
            return Err(IndexError::NoResult.into());
        }
        Ok(merged.into_iter().collect())
    }

    /// Up to `limit` live pairs whose keys begin with `prefix`, ascending;
    /// `limit <= 0` means unlimited. Staged writes overlay the index.
    pub fn prefix_scan(
        &self,
        bucket: &str,
        prefix: &[u8],
        limit: i64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.state()?;
        let now = wall_clock_secs();

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        if let Some(tree) = state.idx.bptree.get(bucket.as_bytes()) {
            match tree.prefix_scan(prefix, 0) {
                Ok(records) => {
                    for rec in records {
                        if rec.is_live(now) {
                            merged.insert(rec.key().to_vec(), self.materialize(state, rec)?);
                        }
                    }
                }
                Err(IndexError::PrefixNoResult) => {}
                Err(e) => return Err(e.into()),
            }
        }

        for e in &self.pending {
            if e.meta.ds != DATA_STRUCTURE_BPTREE
                || e.bucket != bucket.as_bytes()
                || !e.key.starts_with(prefix)
            {
                continue;
            }
            match e.meta.flag {
                DATA_SET_FLAG => {
                    merged.insert(e.key.clone(), e.value.clone());
                }
                DATA_DELETE_FLAG => {
                    merged.remove(&e.key);
                }
                _ => {}
            }
        }

        if merged.is_empty() {
            return Err(IndexError::PrefixNoResult.into());
        }
        let mut out: Vec<(Vec<u8>, Vec<u8>)> = merged.into_iter().collect();
        if limit > 0 {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    /// Resolves a record to its value: from the cached entry in full-RAM
    /// index mode, or back from the segment file in key-only mode.
    fn materialize(&self, state: &DbState, rec: &bptree::Record) -> Result<Vec<u8>> {
        match &rec.entry {
            Some(e) => Ok(e.value.clone()),
            None => Ok(state
                .read_entry(&self.db.opt, rec.hint.file_id, rec.hint.data_pos)?
                .value),
        }
    }

    // -------------------- Set --------------------

    /// Stages adding `item` to the set `key` in `bucket`.
    pub fn sadd(&mut self, bucket: &str, key: &str, item: &[u8]) -> Result<()> {
        self.stage(
            DATA_STRUCTURE_SET,
            DATA_SET_FLAG,
            bucket,
            key.as_bytes(),
            item.to_vec(),
            PERSISTENT,
        )
    }

    /// Stages removing `item` from the set `key` in `bucket`.
    pub fn srem(&mut self, bucket: &str, key: &str, item: &[u8]) -> Result<()> {
        self.stage(
            DATA_STRUCTURE_SET,
            DATA_DELETE_FLAG,
            bucket,
            key.as_bytes(),
            item.to_vec(),
            PERSISTENT,
        )
    }

    /// Picks an arbitrary committed member, stages its removal, and returns
    /// it. The logged entry names the member, so replay is deterministic.
    pub fn spop(&mut self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_writable()?;
        let item = {
            let state = self.state()?;
            state
                .idx
                .set
                .get(bucket.as_bytes())
                .and_then(|s| s.smembers(key).ok())
                .and_then(|members| members.first().map(|m| m.to_vec()))
        };
        match item {
            Some(item) => {
                self.srem(bucket, key, &item)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Members of the committed set `key`.
    pub fn smembers(&self, bucket: &str, key: &str) -> Result<Vec<Vec<u8>>> {
        let state = self.state()?;
        let set = state.idx.set.get(bucket.as_bytes()).ok_or(Error::Bucket)?;
        Ok(set.smembers(key)?.into_iter().map(<[u8]>::to_vec).collect())
    }

    /// Whether `item` is a committed member of set `key`.
    pub fn sis_member(&self, bucket: &str, key: &str, item: &[u8]) -> Result<bool> {
        let state = self.state()?;
        let set = state.idx.set.get(bucket.as_bytes()).ok_or(Error::Bucket)?;
        Ok(set.sis_member(key, item))
    }

    /// Cardinality of the committed set `key`.
    pub fn scard(&self, bucket: &str, key: &str) -> Result<usize> {
        let state = self.state()?;
        let set = state.idx.set.get(bucket.as_bytes()).ok_or(Error::Bucket)?;
        Ok(set.scard(key))
    }

    /// Members of `key1` not in `key2`.
    pub fn sdiff(&self, bucket: &str, key1: &str, key2: &str) -> Result<Vec<Vec<u8>>> {
        let state = self.state()?;
        let set = state.idx.set.get(bucket.as_bytes()).ok_or(Error::Bucket)?;
        Ok(set.sdiff(key1, key2)?)
    }

    /// Members of both `key1` and `key2`.
    pub fn sinter(&self, bucket: &str, key1: &str, key2: &str) -> Result<Vec<Vec<u8>>> {
        let state = self.state()?;
        let set = state.idx.set.get(bucket.as_bytes()).ok_or(Error::Bucket)?;
        Ok(set.sinter(key1, key2)?)
    }

    /// Members of `key1` or `key2`.
    pub fn sunion(&self, bucket: &str, key1: &str, key2: &str) -> Result<Vec<Vec<u8>>> {
        let state = self.state()?;
        let set = state.idx.set.get(bucket.as_bytes()).ok_or(Error::Bucket)?;
        Ok(set.sunion(key1, key2)?)
    }

    // -------------------- List --------------------

    /// Stages pushing `item` onto the head of list `key`.
    pub fn lpush(&mut self, bucket: &str, key: &str, item: &[u8]) -> Result<()> {
        self.stage(
            DATA_STRUCTURE_LIST,
            DATA_LPUSH_FLAG,
            bucket,
            key.as_bytes(),
            item.to_vec(),
            PERSISTENT,
        )
    }

    /// Stages pushing `item` onto the tail of list `key`.
    pub fn rpush(&mut self, bucket: &str, key: &str, item: &[u8]) -> Result<()> {
        self.stage(
            DATA_STRUCTURE_LIST,
            DATA_RPUSH_FLAG,
            bucket,
            key.as_bytes(),
            item.to_vec(),
            PERSISTENT,
        )
    }

    /// Stages popping the committed head of list `key` and returns it.
    pub fn lpop(&mut self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_writable()?;
        let head = self.peek_list(bucket, key, 0)?;
        match head {
            Some(item) => {
                self.stage(
                    DATA_STRUCTURE_LIST,
                    DATA_LPOP_FLAG,
                    bucket,
                    key.as_bytes(),
                    Vec::new(),
                    PERSISTENT,
                )?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Stages popping the committed tail of list `key` and returns it.
    pub fn rpop(&mut self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_writable()?;
        let tail = self.peek_list(bucket, key, -1)?;
        match tail {
            Some(item) => {
                self.stage(
                    DATA_STRUCTURE_LIST,
                    DATA_RPOP_FLAG,
                    bucket,
                    key.as_bytes(),
                    Vec::new(),
                    PERSISTENT,
                )?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    fn peek_list(&self, bucket: &str, key: &str, pos: i64) -> Result<Option<Vec<u8>>> {
        let state = self.state()?;
        Ok(state
            .idx
            .list
            .get(bucket.as_bytes())
            .and_then(|l| l.lrange(key, pos, pos).ok())
            .and_then(|mut items| items.pop()))
    }

    /// Stages removing occurrences of `item` (the usual count convention:
    /// positive from the head, negative from the tail, zero for all).
    pub fn lrem(&mut self, bucket: &str, key: &str, count: i32, item: &[u8]) -> Result<()> {
        self.stage(
            DATA_STRUCTURE_LIST,
            DATA_LREM_FLAG,
            bucket,
            key.as_bytes(),
            payload::encode_lrem(count, item),
            PERSISTENT,
        )
    }

    /// Stages overwriting the item at `index` of the committed list `key`.
    pub fn lset(&mut self, bucket: &str, key: &str, index: u32, item: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        {
            let state = self.state()?;
            let list = state.idx.list.get(bucket.as_bytes()).ok_or(Error::Bucket)?;
            if index as usize >= list.lsize(key)? {
                return Err(ds::ListError::IndexOutOfRange.into());
            }
        }
        self.stage(
            DATA_STRUCTURE_LIST,
            DATA_LSET_FLAG,
            bucket,
            key.as_bytes(),
            payload::encode_lset(index, item),
            PERSISTENT,
        )
    }

    /// Stages trimming list `key` to the inclusive window `[start, end]`.
    pub fn ltrim(&mut self, bucket: &str, key: &str, start: i32, end: i32) -> Result<()> {
        self.stage(
            DATA_STRUCTURE_LIST,
            DATA_LTRIM_FLAG,
            bucket,
            key.as_bytes(),
            payload::encode_bounds(start, end),
            PERSISTENT,
        )
    }

    /// Committed items of list `key` in positions `[start, end]`.
    pub fn lrange(&self, bucket: &str, key: &str, start: i64, end: i64) -> Result<Vec<Vec<u8>>> {
        let state = self.state()?;
        let list = state.idx.list.get(bucket.as_bytes()).ok_or(Error::Bucket)?;
        Ok(list.lrange(key, start, end)?)
    }

    /// Committed length of list `key`.
    pub fn lsize(&self, bucket: &str, key: &str) -> Result<usize> {
        let state = self.state()?;
        let list = state.idx.list.get(bucket.as_bytes()).ok_or(Error::Bucket)?;
        Ok(list.lsize(key)?)
    }

    // -------------------- Sorted set --------------------

    /// Stages adding (or re-scoring) `member` with `score` and a payload.
    pub fn zadd(&mut self, bucket: &str, member: &[u8], score: f64, value: &[u8]) -> Result<()> {
        self.stage(
            DATA_STRUCTURE_SORTED_SET,
            DATA_ZADD_FLAG,
            bucket,
            member,
            payload::encode_zadd(score, value),
            PERSISTENT,
        )
    }

    /// Stages removing `member`.
    pub fn zrem(&mut self, bucket: &str, member: &[u8]) -> Result<()> {
        self.stage(
            DATA_STRUCTURE_SORTED_SET,
            DATA_ZREM_FLAG,
            bucket,
            member,
            Vec::new(),
            PERSISTENT,
        )
    }

    /// Stages removing the committed members ranked in `[start, end]`.
    pub fn zrem_range_by_rank(&mut self, bucket: &str, start: i32, end: i32) -> Result<()> {
        self.stage(
            DATA_STRUCTURE_SORTED_SET,
            DATA_ZREM_RANGE_BY_RANK_FLAG,
            bucket,
            &[],
            payload::encode_bounds(start, end),
            PERSISTENT,
        )
    }

    /// Stages popping the committed highest-scored member and returns it.
    pub fn zpop_max(&mut self, bucket: &str) -> Result<Option<ZItem>> {
        self.ensure_writable()?;
        let item = {
            let state = self.state()?;
            state
                .idx
                .sorted_set
                .get(bucket.as_bytes())
                .and_then(|z| z.zpeek_max())
        };
        match item {
            Some(item) => {
                self.stage(
                    DATA_STRUCTURE_SORTED_SET,
                    DATA_ZPOP_MAX_FLAG,
                    bucket,
                    &[],
                    Vec::new(),
                    PERSISTENT,
                )?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Stages popping the committed lowest-scored member and returns it.
    pub fn zpop_min(&mut self, bucket: &str) -> Result<Option<ZItem>> {
        self.ensure_writable()?;
        let item = {
            let state = self.state()?;
            state
                .idx
                .sorted_set
                .get(bucket.as_bytes())
                .and_then(|z| z.zpeek_min())
        };
        match item {
            Some(item) => {
                self.stage(
                    DATA_STRUCTURE_SORTED_SET,
                    DATA_ZPOP_MIN_FLAG,
                    bucket,
                    &[],
                    Vec::new(),
                    PERSISTENT,
                )?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Committed score of `member`.
    pub fn zscore(&self, bucket: &str, member: &[u8]) -> Result<Option<f64>> {
        let state = self.state()?;
        let zset = state
            .idx
            .sorted_set
            .get(bucket.as_bytes())
            .ok_or(Error::Bucket)?;
        Ok(zset.zscore(member))
    }

    /// Committed member count.
    pub fn zcard(&self, bucket: &str) -> Result<usize> {
        let state = self.state()?;
        let zset = state
            .idx
            .sorted_set
            .get(bucket.as_bytes())
            .ok_or(Error::Bucket)?;
        Ok(zset.zcard())
    }

    /// Committed members with scores in `[min, max]`.
    pub fn zcount(&self, bucket: &str, min: f64, max: f64) -> Result<usize> {
        let state = self.state()?;
        let zset = state
            .idx
            .sorted_set
            .get(bucket.as_bytes())
            .ok_or(Error::Bucket)?;
        Ok(zset.zcount(min, max))
    }

    /// 1-based committed rank of `member`.
    pub fn zrank(&self, bucket: &str, member: &[u8]) -> Result<Option<usize>> {
        let state = self.state()?;
        let zset = state
            .idx
            .sorted_set
            .get(bucket.as_bytes())
            .ok_or(Error::Bucket)?;
        Ok(zset.zrank(member))
    }

    /// Committed members ranked in `[start, end]` (negative ranks count from
    /// the tail).
    pub fn zrange_by_rank(&self, bucket: &str, start: i64, end: i64) -> Result<Vec<ZItem>> {
        let state = self.state()?;
        let zset = state
            .idx
            .sorted_set
            .get(bucket.as_bytes())
            .ok_or(Error::Bucket)?;
        Ok(zset.zrange_by_rank(start, end))
    }

    /// Committed members with `min <= score <= max`, ascending.
    pub fn zrange_by_score(&self, bucket: &str, min: f64, max: f64) -> Result<Vec<ZItem>> {
        let state = self.state()?;
        let zset = state
            .idx
            .sorted_set
            .get(bucket.as_bytes())
            .ok_or(Error::Bucket)?;
        Ok(zset.zrange_by_score(min, max))
    }
}
