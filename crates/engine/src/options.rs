//! Open-time configuration.

use crate::errors::{Error, Result};
use entry::ENTRY_HEADER_SIZE;
use std::path::PathBuf;

/// What the B+ tree keeps in memory per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryIdxMode {
    /// Records cache the whole entry: reads never touch disk.
    KeyValInRAM,
    /// Records hold only the locator: reads reload the entry from its
    /// segment file.
    KeyOnlyInRAM,
}

/// How segment files are read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwMode {
    /// Positional read/write syscalls.
    FileIo,
    /// A shared memory mapping of the whole segment.
    Mmap,
}

/// Default segment capacity: 8 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 8 * 1024 * 1024;

/// Parameters for [`crate::DB::open`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the segment files. Created if absent.
    pub dir: PathBuf,

    /// Key-only or key-and-value index mode.
    pub entry_idx_mode: EntryIdxMode,

    /// I/O mode for the active file.
    pub rw_mode: RwMode,

    /// Fixed capacity of every segment file. Must leave room for at least
    /// one entry beyond its header.
    pub segment_size: u64,

    /// Node identity baked into transaction IDs; range `1..=1023`.
    pub node_num: u64,

    /// Whether every commit fsyncs before returning. Off trades durability
    /// of the tail for write throughput.
    pub sync_enable: bool,

    /// I/O mode used while scanning existing segments at open.
    pub start_file_loading_mode: RwMode,
}

impl Options {
    /// Default options rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Options {
            dir: dir.into(),
            ..Options::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(Error::Options("dir must be set"));
        }
        if !(1..=1023).contains(&self.node_num) {
            return Err(Error::Options("node_num must be in 1..=1023"));
        }
        if self.segment_size <= ENTRY_HEADER_SIZE as u64 {
            return Err(Error::Options("segment_size cannot hold a single entry"));
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dir: PathBuf::new(),
            entry_idx_mode: EntryIdxMode::KeyValInRAM,
            rw_mode: RwMode::FileIo,
            segment_size: DEFAULT_SEGMENT_SIZE,
            node_num: 1,
            sync_enable: true,
            start_file_loading_mode: RwMode::Mmap,
        }
    }
}
