//! Score-ordered sets backed by a skip list.
//!
//! Members are ordered by (score, member) with lexicographic tie-break, the
//! classic zset shape: a dict for O(1) member lookup plus a skip list whose
//! per-level spans make rank queries O(log n). Nodes live in an arena and
//! forward/backward links are indices (slot 0 is the header), so the
//! many-pointers-per-node structure stays free of ownership cycles.

use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;

/// Maximum skip-list level.
const SKIPLIST_MAX_LEVEL: usize = 32;

/// Probability of promoting a node one more level.
const SKIPLIST_P: f64 = 0.25;

/// The "none" link; also the header's arena slot.
const NIL: usize = 0;

/// Errors from sorted-set operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ZSetError {
    /// The member is not present.
    #[error("member not found")]
    NotFound,
}

/// An owned view of one member: its name, payload, and score.
#[derive(Debug, Clone, PartialEq)]
pub struct ZItem {
    /// Member name (unique within the set).
    pub member: Vec<u8>,
    /// Associated payload.
    pub value: Vec<u8>,
    /// Ordering score.
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
struct Level {
    forward: usize,
    /// Number of bottom-level hops this forward link crosses.
    span: usize,
}

#[derive(Debug)]
struct ZNode {
    member: Vec<u8>,
    value: Vec<u8>,
    score: f64,
    backward: usize,
    levels: Vec<Level>,
}

impl ZNode {
    fn placeholder(levels: usize) -> ZNode {
        ZNode {
            member: Vec::new(),
            value: Vec::new(),
            score: 0.0,
            backward: NIL,
            levels: vec![
                Level {
                    forward: NIL,
                    span: 0,
                };
                levels
            ],
        }
    }
}

/// A sorted set: skip list + member dict.
#[derive(Debug)]
pub struct SortedSet {
    arena: Vec<ZNode>,
    free: Vec<usize>,
    tail: usize,
    length: usize,
    level: usize,
    dict: HashMap<Vec<u8>, usize>,
}

impl Default for SortedSet {
    fn default() -> Self {
        SortedSet::new()
    }
}

impl SortedSet {
    /// Creates an empty sorted set.
    pub fn new() -> Self {
        SortedSet {
            arena: vec![ZNode::placeholder(SKIPLIST_MAX_LEVEL)],
            free: Vec::new(),
            tail: NIL,
            length: 0,
            level: 1,
            dict: HashMap::new(),
        }
    }

    /// Number of members.
    pub fn zcard(&self) -> usize {
        self.length
    }

    /// The score of `member`, if present.
    pub fn zscore(&self, member: &[u8]) -> Option<f64> {
        self.dict.get(member).map(|&idx| self.arena[idx].score)
    }

    /// Adds `member` with `score`, or updates it. A changed score moves the
    /// member to its new position; a same-score add just replaces the value.
    pub fn zadd(&mut self, member: &[u8], score: f64, value: Vec<u8>) {
        if let Some(&idx) = self.dict.get(member) {
            if self.arena[idx].score == score {
                self.arena[idx].value = value;
                return;
            }
            let old_score = self.arena[idx].score;
            let removed = self
                .unlink(old_score, member)
                .expect("dict entry must be linked");
            self.dict.remove(member);
            self.release(removed);
        }
        self.insert_node(member.to_vec(), score, value);
    }

    /// Removes `member`, returning its final state.
    pub fn zrem(&mut self, member: &[u8]) -> Result<ZItem, ZSetError> {
        let &idx = self.dict.get(member).ok_or(ZSetError::NotFound)?;
        let score = self.arena[idx].score;
        let removed = self
            .unlink(score, member)
            .expect("dict entry must be linked");
        self.dict.remove(member);
        let item = self.item_at(removed);
        self.release(removed);
        Ok(item)
    }

    /// 1-based rank of `member` in ascending (score, member) order.
    pub fn zrank(&self, member: &[u8]) -> Option<usize> {
        let &idx = self.dict.get(member)?;
        let score = self.arena[idx].score;

        let mut rank = 0usize;
        let mut x = NIL;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.arena[x].levels[i].forward;
                if fwd != NIL
                    && (self.arena[fwd].score < score
                        || (self.arena[fwd].score == score
                            && self.arena[fwd].member.as_slice() <= member))
                {
                    rank += self.arena[x].levels[i].span;
                    x = fwd;
                } else {
                    break;
                }
            }
            if x != NIL && self.arena[x].member.as_slice() == member {
                return Some(rank);
            }
        }
        None
    }

    /// Members with rank in `[start, end]`, 1-based, negative ranks counting
    /// from the tail (-1 = highest).
    pub fn zrange_by_rank(&self, start: i64, end: i64) -> Vec<ZItem> {
        let (start, end) = match self.normalize_ranks(start, end) {
            Some(bounds) => bounds,
            None => return Vec::new(),
        };

        let mut out = Vec::with_capacity(end - start + 1);
        let mut x = match self.element_by_rank(start) {
            Some(idx) => idx,
            None => return Vec::new(),
        };
        for _ in start..=end {
            out.push(self.item_at(x));
            x = self.arena[x].levels[0].forward;
            if x == NIL {
                break;
            }
        }
        out
    }

    /// Members with `min <= score <= max`, ascending.
    pub fn zrange_by_score(&self, min: f64, max: f64) -> Vec<ZItem> {
        let mut out = Vec::new();

        // Descend to the last node with score < min.
        let mut x = NIL;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.arena[x].levels[i].forward;
                if fwd != NIL && self.arena[fwd].score < min {
                    x = fwd;
                } else {
                    break;
                }
            }
        }

        let mut x = self.arena[x].levels[0].forward;
        while x != NIL && self.arena[x].score <= max {
            out.push(self.item_at(x));
            x = self.arena[x].levels[0].forward;
        }
        out
    }

    /// Number of members with `min <= score <= max`.
    pub fn zcount(&self, min: f64, max: f64) -> usize {
        self.zrange_by_score(min, max).len()
    }

    /// Removes the members with rank in `[start, end]` (the same
    /// normalization as [`SortedSet::zrange_by_rank`]); returns how many.
    pub fn zrem_range_by_rank(&mut self, start: i64, end: i64) -> usize {
        let (start, end) = match self.normalize_ranks(start, end) {
            Some(bounds) => bounds,
            None => return 0,
        };

        let mut removed = 0;
        // Each removal shifts later ranks down, so keep deleting at `start`.
        for _ in start..=end {
            let idx = match self.element_by_rank(start) {
                Some(idx) => idx,
                None => break,
            };
            let member = self.arena[idx].member.clone();
            self.zrem(&member).expect("ranked member exists");
            removed += 1;
        }
        removed
    }

    /// The lowest-scored member, without removing it.
    pub fn zpeek_min(&self) -> Option<ZItem> {
        let first = self.arena[NIL].levels[0].forward;
        (first != NIL).then(|| self.item_at(first))
    }

    /// The highest-scored member, without removing it.
    pub fn zpeek_max(&self) -> Option<ZItem> {
        (self.tail != NIL).then(|| self.item_at(self.tail))
    }

    /// Removes and returns the lowest-scored member.
    pub fn zpop_min(&mut self) -> Option<ZItem> {
        let item = self.zpeek_min()?;
        self.zrem(&item.member).expect("peeked member exists");
        Some(item)
    }

    /// Removes and returns the highest-scored member.
    pub fn zpop_max(&mut self) -> Option<ZItem> {
        let item = self.zpeek_max()?;
        self.zrem(&item.member).expect("peeked member exists");
        Some(item)
    }

    // -------------------- Skip-list internals --------------------

    fn item_at(&self, idx: usize) -> ZItem {
        let n = &self.arena[idx];
        ZItem {
            member: n.member.clone(),
            value: n.value.clone(),
            score: n.score,
        }
    }

    fn alloc(&mut self, node: ZNode) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = node;
                idx
            }
            None => {
                self.arena.push(node);
                self.arena.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.arena[idx] = ZNode::placeholder(0);
        self.free.push(idx);
    }

    /// Whether the node at `idx` orders strictly before (score, member).
    fn before(&self, idx: usize, score: f64, member: &[u8]) -> bool {
        let n = &self.arena[idx];
        n.score < score || (n.score == score && n.member.as_slice() < member)
    }

    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < SKIPLIST_MAX_LEVEL && rng.gen::<f64>() < SKIPLIST_P {
            level += 1;
        }
        level
    }

    fn insert_node(&mut self, member: Vec<u8>, score: f64, value: Vec<u8>) {
        let mut update = [NIL; SKIPLIST_MAX_LEVEL];
        let mut rank = [0usize; SKIPLIST_MAX_LEVEL];

        let mut x = NIL;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            loop {
                let fwd = self.arena[x].levels[i].forward;
                if fwd != NIL && self.before(fwd, score, &member) {
                    rank[i] += self.arena[x].levels[i].span;
                    x = fwd;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let level = self.random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = NIL;
                self.arena[NIL].levels[i].span = self.length;
            }
            self.level = level;
        }

        let idx = self.alloc(ZNode {
            member: member.clone(),
            value,
            score,
            backward: NIL,
            levels: vec![
                Level {
                    forward: NIL,
                    span: 0,
                };
                level
            ],
        });

        for i in 0..level {
            let upd = update[i];
            let fwd = self.arena[upd].levels[i].forward;
            self.arena[idx].levels[i].forward = fwd;
            self.arena[upd].levels[i].forward = idx;

            let upd_span = self.arena[upd].levels[i].span;
            self.arena[idx].levels[i].span = upd_span - (rank[0] - rank[i]);
            self.arena[upd].levels[i].span = (rank[0] - rank[i]) + 1;
        }
        for i in level..self.level {
            self.arena[update[i]].levels[i].span += 1;
        }

        self.arena[idx].backward = update[0];
        let fwd0 = self.arena[idx].levels[0].forward;
        if fwd0 != NIL {
            self.arena[fwd0].backward = idx;
        } else {
            self.tail = idx;
        }

        self.length += 1;
        self.dict.insert(member, idx);
    }

    /// Detaches the node matching (score, member) from every level without
    /// touching the dict or the arena slot.
    fn unlink(&mut self, score: f64, member: &[u8]) -> Option<usize> {
        let mut update = [NIL; SKIPLIST_MAX_LEVEL];

        let mut x = NIL;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.arena[x].levels[i].forward;
                if fwd != NIL && self.before(fwd, score, member) {
                    x = fwd;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let target = self.arena[x].levels[0].forward;
        if target == NIL
            || self.arena[target].score != score
            || self.arena[target].member.as_slice() != member
        {
            return None;
        }

        for i in 0..self.level {
            let upd = update[i];
            if self.arena[upd].levels[i].forward == target {
                let t_span = self.arena[target].levels[i].span;
                let t_fwd = self.arena[target].levels[i].forward;
                self.arena[upd].levels[i].span += t_span - 1;
                self.arena[upd].levels[i].forward = t_fwd;
            } else {
                self.arena[upd].levels[i].span -= 1;
            }
        }

        let t_fwd0 = self.arena[target].levels[0].forward;
        let t_back = self.arena[target].backward;
        if t_fwd0 != NIL {
            self.arena[t_fwd0].backward = t_back;
        } else {
            self.tail = t_back;
        }

        while self.level > 1 && self.arena[NIL].levels[self.level - 1].forward == NIL {
            self.level -= 1;
        }
        self.length -= 1;
        Some(target)
    }

    /// Arena index of the node at 1-based `rank`.
    fn element_by_rank(&self, rank: usize) -> Option<usize> {
        let mut traversed = 0usize;
        let mut x = NIL;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.arena[x].levels[i].forward;
                if fwd != NIL && traversed + self.arena[x].levels[i].span <= rank {
                    traversed += self.arena[x].levels[i].span;
                    x = fwd;
                } else {
                    break;
                }
            }
            if x != NIL && traversed == rank {
                return Some(x);
            }
        }
        None
    }

    /// Maps 1-based, possibly negative rank bounds onto `[1, length]`.
    fn normalize_ranks(&self, start: i64, end: i64) -> Option<(usize, usize)> {
        if self.length == 0 {
            return None;
        }
        let len = self.length as i64;
        let start = (if start < 0 { len + start + 1 } else { start }).max(1);
        let end = (if end < 0 { len + end + 1 } else { end }).min(len);
        if start > end {
            return None;
        }
        Some((start as usize, end as usize))
    }
}
