//! The engine's error type. Callers of an embeddable store match on error
//! kinds (`KeyNotFound` vs corruption vs misuse), so everything user-visible
//! is a variant here; errors from the leaf crates pass through transparently
//! and I/O errors surface verbatim.

use bptree::IndexError;
use ds::{ListError, SetError, ZSetError};
use entry::CodecError;
use thiserror::Error;

/// Any error the engine can return.
#[derive(Debug, Error)]
pub enum Error {
    /// The DB has been closed.
    #[error("db is closed")]
    DbClosed,

    /// The addressed bucket does not exist.
    #[error("bucket not found")]
    Bucket,

    /// A rejected configuration value at open time.
    #[error("invalid options: {0}")]
    Options(&'static str),

    /// The transaction has already been committed or rolled back.
    #[error("tx is closed")]
    TxClosed,

    /// A write operation on a read-only transaction.
    #[error("tx not writable")]
    TxNotWritable,

    /// An update was given an empty key.
    #[error("key cannot be empty")]
    KeyEmpty,

    /// An entry (or a commit batch) exceeds the segment capacity.
    #[error("key and value size too big")]
    KeyAndValueSize,

    /// A merge is already running.
    #[error("merge already in progress")]
    MergeInProgress,

    /// Lookup and scan misses from the B+ tree index.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Segment-file corruption or truncation.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Set index errors.
    #[error(transparent)]
    Set(#[from] SetError),

    /// Sorted-set index errors.
    #[error(transparent)]
    SortedSet(#[from] ZSetError),

    /// List index errors.
    #[error(transparent)]
    List(#[from] ListError),

    /// An underlying I/O failure, surfaced verbatim.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The engine's result alias.
pub type Result<T> = std::result::Result<T, Error>;
