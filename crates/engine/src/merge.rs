//! Merge: rewrite the live contents of the store into a fresh, compact
//! segment sequence and drop the old files.
//!
//! The merge runs entirely under the exclusive lock, so no transaction can
//! observe the swap. New segments are staged in a scratch directory and only
//! replace the originals at the end; an interrupted merge therefore leaves
//! the original files intact, and the scratch directory is discarded on the
//! next open.

use crate::datafile::{data_file_path, parse_data_file_id, DataFile};
use crate::errors::{Error, Result};
use crate::payload;
use crate::recovery::MERGE_TMP_DIR;
use crate::tx::wall_clock_secs;
use crate::{DbState, Indexes, DB};
use entry::{
    Entry, MetaData, COMMITTED, DATA_RPUSH_FLAG, DATA_SET_FLAG, DATA_STRUCTURE_LIST,
    DATA_STRUCTURE_SET, DATA_STRUCTURE_SORTED_SET, DATA_ZADD_FLAG,
};

impl DB {
    /// Rewrites all live entries into a fresh segment sequence starting at
    /// file 0, swaps it in, and deletes the old segments. Tombstoned and
    /// expired keys do not survive the rewrite.
    pub fn merge(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DbClosed);
        }
        let mut state = self.state.write();
        if state.merging {
            return Err(Error::MergeInProgress);
        }
        state.merging = true;
        let result = self.merge_locked(&mut state);
        state.merging = false;
        result
    }

    fn merge_locked(&self, state: &mut DbState) -> Result<()> {
        let opt = &self.opt;
        let now = wall_clock_secs();
        let merge_tx_id = self.tx_ids.lock().next();

        // Gather everything the indexes still consider live. B+ tree entries
        // keep their original metadata (timestamps drive TTL); collection
        // state is re-emitted as a minimal op sequence. Every entry is
        // written as its own committed marker so replay admits each one.
        let mut entries: Vec<Entry> = Vec::new();

        for tree in state.idx.bptree.values() {
            for rec in tree.records() {
                if !rec.is_live(now) {
                    continue;
                }
                let mut e = match &rec.entry {
                    Some(e) => e.clone(),
                    None => state.read_entry(opt, rec.hint.file_id, rec.hint.data_pos)?,
                };
                e.meta.status = COMMITTED;
                entries.push(e);
            }
        }

        for (bucket, set) in &state.idx.set {
            for key in set.keys() {
                for member in set.smembers(key)? {
                    entries.push(Entry::new(
                        bucket.clone(),
                        key.as_bytes().to_vec(),
                        member.to_vec(),
                        MetaData {
                            timestamp: now,
                            flag: DATA_SET_FLAG,
                            status: COMMITTED,
                            ds: DATA_STRUCTURE_SET,
                            tx_id: merge_tx_id,
                            ..MetaData::default()
                        },
                    ));
                }
            }
        }

        for (bucket, list) in &state.idx.list {
            for key in list.keys() {
                for item in list.lrange(key, 0, -1)? {
                    entries.push(Entry::new(
                        bucket.clone(),
                        key.as_bytes().to_vec(),
                        item,
                        MetaData {
                            timestamp: now,
                            flag: DATA_RPUSH_FLAG,
                            status: COMMITTED,
                            ds: DATA_STRUCTURE_LIST,
                            tx_id: merge_tx_id,
                            ..MetaData::default()
                        },
                    ));
                }
            }
        }

        for (bucket, zset) in &state.idx.sorted_set {
            for item in zset.zrange_by_rank(1, -1) {
                entries.push(Entry::new(
                    bucket.clone(),
                    item.member,
                    payload::encode_zadd(item.score, &item.value),
                    MetaData {
                        timestamp: now,
                        flag: DATA_ZADD_FLAG,
                        status: COMMITTED,
                        ds: DATA_STRUCTURE_SORTED_SET,
                        tx_id: merge_tx_id,
                        ..MetaData::default()
                    },
                ));
            }
        }

        // Stage the new sequence in the scratch directory, building the
        // replacement indexes as we go.
        let tmp_dir = opt.dir.join(MERGE_TMP_DIR);
        let _ = std::fs::remove_dir_all(&tmp_dir);
        std::fs::create_dir_all(&tmp_dir)?;

        let mut idx = Indexes::new();
        let mut file_id = 0u64;
        let mut df = DataFile::open(
            &data_file_path(&tmp_dir, file_id),
            file_id,
            opt.segment_size,
            opt.rw_mode,
        )?;
        for e in &entries {
            let buf = e.encode();
            if df.write_off + buf.len() as u64 > opt.segment_size {
                df.sync()?;
                df.close()?;
                file_id += 1;
                df = DataFile::open(
                    &data_file_path(&tmp_dir, file_id),
                    file_id,
                    opt.segment_size,
                    opt.rw_mode,
                )?;
            }
            let off = df.write_off;
            df.write_at(&buf, off)?;
            df.write_off += buf.len() as u64;
            idx.apply_entry(e, file_id, off, opt.entry_idx_mode);
        }
        df.sync()?;
        let active_off = df.write_off;
        df.close()?;

        // The swap: retire the old sequence, move the new one into place.
        state.active_file.sync()?;
        state.active_file.close()?;
        for dent in std::fs::read_dir(&opt.dir)? {
            let dent = dent?;
            if let Some(name) = dent.file_name().to_str() {
                if parse_data_file_id(name).is_some() {
                    std::fs::remove_file(dent.path())?;
                }
            }
        }
        for id in 0..=file_id {
            std::fs::rename(data_file_path(&tmp_dir, id), data_file_path(&opt.dir, id))?;
        }
        let _ = std::fs::remove_dir_all(&tmp_dir);

        let mut active_file = DataFile::open(
            &data_file_path(&opt.dir, file_id),
            file_id,
            opt.segment_size,
            opt.rw_mode,
        )?;
        active_file.write_off = active_off;

        state.active_file = active_file;
        state.max_file_id = file_id;
        state.idx = idx;
        state.committed_txs.insert(merge_tx_id);

        log::info!(
            "merge complete: {} entries across {} segment(s)",
            entries.len(),
            file_id + 1
        );
        Ok(())
    }
}
