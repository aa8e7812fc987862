use crate::tests::helpers::*;
use crate::{
    data_file_path, DataFile, EntryIdxMode, Error, Options, RwMode, DB, DEFAULT_SEGMENT_SIZE,
};
use anyhow::Result;
use bptree::IndexError;
use entry::{
    Entry, MetaData, COMMITTED, DATA_SET_FLAG, DATA_STRUCTURE_BPTREE, UNCOMMITTED,
};
use std::fs;
use tempfile::tempdir;

fn raw_entry(key: &[u8], value: &[u8], status: u16, tx_id: u64) -> Entry {
    Entry::new(
        b"b".to_vec(),
        key.to_vec(),
        value.to_vec(),
        MetaData {
            timestamp: 1,
            flag: DATA_SET_FLAG,
            status,
            ds: DATA_STRUCTURE_BPTREE,
            tx_id,
            ..MetaData::default()
        },
    )
}

// -------------------- Committed-marker grouping --------------------

#[test]
fn uncommitted_entries_without_a_marker_are_ignored() -> Result<()> {
    let dir = tempdir()?;
    fs::create_dir_all(dir.path())?;

    // Simulate a crash mid-commit: two entries on disk, no committed marker.
    {
        let mut df = DataFile::open(
            &data_file_path(dir.path(), 0),
            0,
            DEFAULT_SEGMENT_SIZE,
            RwMode::FileIo,
        )?;
        let a = raw_entry(b"a", b"1", UNCOMMITTED, 99);
        let b = raw_entry(b"b", b"2", UNCOMMITTED, 99);
        let buf_a = a.encode();
        df.write_at(&buf_a, 0)?;
        df.write_at(&b.encode(), buf_a.len() as u64)?;
        df.sync()?;
    }

    let db = DB::open(small_options(dir.path(), DEFAULT_SEGMENT_SIZE))?;
    assert!(matches!(
        get_one(&db, "b", b"a"),
        Err(Error::Index(IndexError::KeyNotFound))
    ));
    assert!(matches!(
        get_one(&db, "b", b"b"),
        Err(Error::Index(IndexError::KeyNotFound))
    ));

    // The abandoned batch still advanced the write offset; new commits
    // land after it and work normally.
    put_one(&db, "b", b"c", b"3");
    assert_eq!(get_one(&db, "b", b"c")?, b"3");
    Ok(())
}

#[test]
fn committed_marker_admits_the_whole_batch() -> Result<()> {
    let dir = tempdir()?;
    fs::create_dir_all(dir.path())?;

    {
        let mut df = DataFile::open(
            &data_file_path(dir.path(), 0),
            0,
            DEFAULT_SEGMENT_SIZE,
            RwMode::FileIo,
        )?;
        let mut off = 0u64;
        for (key, value, status) in [
            (b"a".as_slice(), b"1".as_slice(), UNCOMMITTED),
            (b"b", b"2", UNCOMMITTED),
            (b"c", b"3", COMMITTED),
        ] {
            let buf = raw_entry(key, value, status, 7).encode();
            df.write_at(&buf, off)?;
            off += buf.len() as u64;
        }
        df.sync()?;
    }

    let db = DB::open(small_options(dir.path(), DEFAULT_SEGMENT_SIZE))?;
    assert_eq!(get_one(&db, "b", b"a")?, b"1");
    assert_eq!(get_one(&db, "b", b"b")?, b"2");
    assert_eq!(get_one(&db, "b", b"c")?, b"3");
    Ok(())
}

// -------------------- Corruption --------------------

#[test]
fn corrupt_tail_is_truncated_and_prior_commits_survive() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = DB::open(Options::new(dir.path()))?;
        for i in 0..5u32 {
            put_one(&db, "b", format!("k{i}").as_bytes(), format!("v{i}").as_bytes());
        }
        db.close()?;
    }

    // Find the end of the written region, then flip its last 10 bytes.
    let path = data_file_path(dir.path(), 0);
    let write_end = {
        let df = DataFile::open(&path, 0, DEFAULT_SEGMENT_SIZE, RwMode::FileIo)?;
        let mut off = 0;
        while let Some(e) = df.read_entry_at(off)? {
            off += e.size();
        }
        off as usize
    };
    let mut bytes = fs::read(&path)?;
    for b in &mut bytes[write_end - 10..write_end] {
        *b ^= 0xFF;
    }
    fs::write(&path, &bytes)?;

    // Reopen succeeds; only the trailing entry is lost.
    let db = DB::open(small_options(dir.path(), DEFAULT_SEGMENT_SIZE))?;
    for i in 0..4u32 {
        assert_eq!(
            get_one(&db, "b", format!("k{i}").as_bytes())?,
            format!("v{i}").into_bytes()
        );
    }
    assert!(get_one(&db, "b", b"k4").is_err());

    // The store keeps accepting writes after the truncation.
    put_one(&db, "b", b"k5", b"v5");
    assert_eq!(get_one(&db, "b", b"k5")?, b"v5");
    Ok(())
}

// -------------------- Determinism --------------------

#[test]
fn recovery_is_deterministic_across_reopens() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = open_small(dir.path(), 2048);
        let mut tx = db.begin(true)?;
        for i in 0..50u32 {
            tx.put("kv", format!("k{i:02}").as_bytes(), format!("v{i}").as_bytes())?;
        }
        tx.commit()?;
        let mut tx = db.begin(true)?;
        tx.delete("kv", b"k10")?;
        tx.sadd("col", "s", b"m1")?;
        tx.rpush("col", "l", b"i1")?;
        tx.rpush("col", "l", b"i2")?;
        tx.zadd("col", b"z1", 4.0, b"p")?;
        tx.commit()?;
        db.close()?;
    }

    let dump = |db: &DB| -> Result<_> {
        let tx = db.begin(false)?;
        let kv = tx.range_scan("kv", b"k00", b"k99")?;
        let s = tx.smembers("col", "s")?;
        let l = tx.lrange("col", "l", 0, -1)?;
        let z = tx
            .zrange_by_rank("col", 1, -1)?
            .into_iter()
            .map(|i| (i.member, i.value))
            .collect::<Vec<_>>();
        let count = db
            .state
            .read()
            .idx
            .bptree
            .get(b"kv".as_slice())
            .unwrap()
            .valid_key_count();
        Ok((kv, s, l, z, count))
    };

    let first = {
        let db = open_small(dir.path(), 2048);
        let d = dump(&db)?;
        db.close()?;
        d
    };
    let second = {
        let db = open_small(dir.path(), 2048);
        let d = dump(&db)?;
        db.close()?;
        d
    };

    assert_eq!(first, second);
    assert_eq!(first.0.len(), 49);
    assert_eq!(first.4, 49);
    Ok(())
}

// -------------------- Index & I/O modes --------------------

#[test]
fn key_only_mode_reloads_values_from_disk() -> Result<()> {
    let dir = tempdir()?;
    let opt = Options {
        entry_idx_mode: EntryIdxMode::KeyOnlyInRAM,
        sync_enable: false,
        ..Options::new(dir.path())
    };

    {
        let db = DB::open(opt.clone())?;
        let mut tx = db.begin(true)?;
        for i in 0..20u32 {
            tx.put("b", format!("k{i:02}").as_bytes(), format!("v{i}").as_bytes())?;
        }
        tx.commit()?;
        assert_eq!(get_one(&db, "b", b"k07")?, b"v7");
        db.close()?;
    }

    let db = DB::open(opt)?;
    assert_eq!(get_one(&db, "b", b"k07")?, b"v7");
    let tx = db.begin(false)?;
    assert_eq!(tx.range_scan("b", b"k00", b"k19")?.len(), 20);
    Ok(())
}

#[test]
fn mmap_mode_roundtrips() -> Result<()> {
    let dir = tempdir()?;
    let opt = Options {
        rw_mode: RwMode::Mmap,
        start_file_loading_mode: RwMode::Mmap,
        sync_enable: false,
        ..Options::new(dir.path())
    };

    {
        let db = DB::open(opt.clone())?;
        put_one(&db, "b", b"k", b"mapped");
        db.close()?;
    }

    let db = DB::open(opt)?;
    assert_eq!(get_one(&db, "b", b"k")?, b"mapped");
    Ok(())
}

// -------------------- Housekeeping --------------------

#[test]
fn leftover_merge_scratch_is_removed_at_open() -> Result<()> {
    let dir = tempdir()?;
    let scratch = dir.path().join("merge.tmp");
    fs::create_dir_all(&scratch)?;
    fs::write(scratch.join("0.dat"), b"garbage")?;

    let _db = DB::open(small_options(dir.path(), DEFAULT_SEGMENT_SIZE))?;
    assert!(!scratch.exists());
    Ok(())
}

#[test]
fn invalid_options_are_rejected() {
    assert!(matches!(
        DB::open(Options::default()),
        Err(Error::Options(_))
    ));
    assert!(matches!(
        DB::open(Options {
            node_num: 0,
            ..Options::new("/tmp/whatever")
        }),
        Err(Error::Options(_))
    ));
    assert!(matches!(
        DB::open(Options {
            node_num: 1024,
            ..Options::new("/tmp/whatever")
        }),
        Err(Error::Options(_))
    ));
    assert!(matches!(
        DB::open(Options {
            segment_size: 10,
            ..Options::new("/tmp/whatever")
        }),
        Err(Error::Options(_))
    ));
}
