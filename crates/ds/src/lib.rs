//! # ds — auxiliary in-memory collections
//!
//! The non-B+-tree datatypes SiltKV serves: unordered [`Set`]s, score-ordered
//! [`SortedSet`]s, and [`List`]s. Each bucket owns one instance of each, and
//! each instance namespaces its contents by a string key.
//!
//! These structures never touch disk themselves: the engine reconstructs them
//! at startup by replaying committed log entries, and mutates them at commit
//! time by applying the same entries. Everything here is therefore plain
//! in-memory data with no durability concerns of its own.

mod list;
mod set;
mod sorted_set;

pub use list::{List, ListError};
pub use set::{Set, SetError};
pub use sorted_set::{SortedSet, ZItem, ZSetError};
