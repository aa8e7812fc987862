//! Unordered membership sets, one per string key.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors from set operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SetError {
    /// No set exists at the given key.
    #[error("set not found")]
    NotFound,
}

/// All sets of one bucket, keyed by set name.
#[derive(Debug, Default)]
pub struct Set {
    m: HashMap<String, HashSet<Vec<u8>>>,
}

impl Set {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Set::default()
    }

    /// Adds `item` to the set at `key`, creating the set on first write.
    pub fn sadd(&mut self, key: &str, item: Vec<u8>) {
        self.m.entry(key.to_string()).or_default().insert(item);
    }

    /// Removes `item` from the set at `key`. Removing an absent item is not
    /// an error; an absent set is.
    pub fn srem(&mut self, key: &str, item: &[u8]) -> Result<(), SetError> {
        let set = self.m.get_mut(key).ok_or(SetError::NotFound)?;
        set.remove(item);
        Ok(())
    }

    /// Removes and returns an arbitrary member of the set at `key`.
    pub fn spop(&mut self, key: &str) -> Option<Vec<u8>> {
        let set = self.m.get_mut(key)?;
        let item = set.iter().next()?.clone();
        set.remove(&item);
        Some(item)
    }

    /// Whether a set exists at `key`.
    pub fn shas_key(&self, key: &str) -> bool {
        self.m.contains_key(key)
    }

    /// The keys of every set in this collection.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.m.keys().map(String::as_str)
    }

    /// Cardinality of the set at `key`; 0 when absent.
    pub fn scard(&self, key: &str) -> usize {
        self.m.get(key).map_or(0, HashSet::len)
    }

    /// Whether `item` is a member of the set at `key`.
    pub fn sis_member(&self, key: &str, item: &[u8]) -> bool {
        self.m.get(key).is_some_and(|s| s.contains(item))
    }

    /// Whether every one of `items` is a member of the set at `key`.
    pub fn sare_members(&self, key: &str, items: &[&[u8]]) -> bool {
        match self.m.get(key) {
            Some(s) => items.iter().all(|i| s.contains(*i)),
            None => false,
        }
    }

    /// All members of the set at `key`.
    pub fn smembers(&self, key: &str) -> Result<Vec<&[u8]>, SetError> {
        let set = self.m.get(key).ok_or(SetError::NotFound)?;
        Ok(set.iter().map(Vec::as_slice).collect())
    }

    /// Moves `item` from the set at `src` to the set at `dst`. Returns
    /// whether the item was present at `src`.
    pub fn smove(&mut self, src: &str, dst: &str, item: &[u8]) -> Result<bool, SetError> {
        if !self.m.contains_key(src) || !self.m.contains_key(dst) {
            return Err(SetError::NotFound);
        }
        let moved = self
            .m
            .get_mut(src)
            .expect("checked above")
            .take(item)
            .is_some();
        if moved {
            self.m
                .get_mut(dst)
                .expect("checked above")
                .insert(item.to_vec());
        }
        Ok(moved)
    }

    /// Members of `key1` that are not members of `key2`.
    pub fn sdiff(&self, key1: &str, key2: &str) -> Result<Vec<Vec<u8>>, SetError> {
        let (a, b) = self.pair(key1, key2)?;
        Ok(a.difference(b).cloned().collect())
    }

    /// Members of both `key1` and `key2`.
    pub fn sinter(&self, key1: &str, key2: &str) -> Result<Vec<Vec<u8>>, SetError> {
        let (a, b) = self.pair(key1, key2)?;
        Ok(a.intersection(b).cloned().collect())
    }

    /// Members of `key1` or `key2`.
    pub fn sunion(&self, key1: &str, key2: &str) -> Result<Vec<Vec<u8>>, SetError> {
        let (a, b) = self.pair(key1, key2)?;
        Ok(a.union(b).cloned().collect())
    }

    fn pair(&self, key1: &str, key2: &str) -> Result<(&HashSet<Vec<u8>>, &HashSet<Vec<u8>>), SetError> {
        let a = self.m.get(key1).ok_or(SetError::NotFound)?;
        let b = self.m.get(key2).ok_or(SetError::NotFound)?;
        Ok((a, b))
    }
}
