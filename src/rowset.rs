//! Ordered row-key sets.
//!
//! A [`RowSet`] is an ordered set of 64-bit row keys stored as sorted,
//! disjoint, inclusive ranges. Row keys identify rows in a table and are
//! not densely assigned; the engine relies on efficient range iteration,
//! containment, and inversion (key → position) rather than hashing.
//!
//! [`TrackingRowSet`] pairs a current row set with an optional snapshot of
//! the previous cycle's contents. The snapshot is armed lazily at the
//! first mutation of a cycle and dropped at commit, so previous-version
//! queries outside a cycle read the current contents.

use std::fmt;

use crate::clock::CycleCommitter;
use crate::error::RillError;

/// A 64-bit row key. Keys are not densely assigned.
pub type RowKey = u64;

/// Reserved key meaning "no row".
pub const NULL_ROW_KEY: RowKey = u64::MAX;

/// An inclusive range of row keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub first: RowKey,
    pub last: RowKey,
}

impl RowRange {
    pub fn new(first: RowKey, last: RowKey) -> Self {
        debug_assert!(first <= last);
        RowRange { first, last }
    }

    /// Number of keys in the range.
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn contains(&self, key: RowKey) -> bool {
        self.first <= key && key <= self.last
    }
}

/// An ordered set of row keys, stored as sorted disjoint inclusive ranges.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    ranges: Vec<RowRange>,
    cardinality: u64,
}

impl RowSet {
    /// The empty row set.
    pub fn empty() -> Self {
        RowSet::default()
    }

    /// A row set holding the single inclusive range `[first, last]`.
    pub fn from_range(first: RowKey, last: RowKey) -> Self {
        debug_assert!(first <= last && last < NULL_ROW_KEY);
        RowSet {
            ranges: vec![RowRange::new(first, last)],
            cardinality: last - first + 1,
        }
    }

    /// The dense row set `[0, size)`. Empty when `size == 0`.
    pub fn flat(size: u64) -> Self {
        if size == 0 {
            RowSet::empty()
        } else {
            RowSet::from_range(0, size - 1)
        }
    }

    /// Build from an arbitrary collection of keys.
    pub fn from_keys<I: IntoIterator<Item = RowKey>>(keys: I) -> Self {
        let mut builder = RowSetBuilderRandom::new();
        for k in keys {
            builder.add_key(k);
        }
        builder.build()
    }

    /// Number of keys in the set.
    pub fn size(&self) -> u64 {
        self.cardinality
    }

    pub fn is_empty(&self) -> bool {
        self.cardinality == 0
    }

    /// Smallest key, or [`NULL_ROW_KEY`] if empty.
    pub fn first_row_key(&self) -> RowKey {
        self.ranges.first().map_or(NULL_ROW_KEY, |r| r.first)
    }

    /// Largest key, or [`NULL_ROW_KEY`] if empty.
    pub fn last_row_key(&self) -> RowKey {
        self.ranges.last().map_or(NULL_ROW_KEY, |r| r.last)
    }

    /// Whether `key` is a member.
    pub fn contains(&self, key: RowKey) -> bool {
        self.range_index_for(key).is_some()
    }

    /// Index of the range containing `key`, if any.
    fn range_index_for(&self, key: RowKey) -> Option<usize> {
        let idx = self.ranges.partition_point(|r| r.last < key);
        (idx < self.ranges.len() && self.ranges[idx].contains(key)).then_some(idx)
    }

    /// The `pos`-th key in ascending order, or [`NULL_ROW_KEY`] when
    /// `pos >= size()`.
    pub fn get(&self, pos: u64) -> RowKey {
        let mut remaining = pos;
        for r in &self.ranges {
            if remaining < r.len() {
                return r.first + remaining;
            }
            remaining -= r.len();
        }
        NULL_ROW_KEY
    }

    /// Position (rank) of `key` in ascending order, if present.
    pub fn find(&self, key: RowKey) -> Option<u64> {
        let idx = self.range_index_for(key)?;
        let base: u64 = self.ranges[..idx].iter().map(|r| r.len()).sum();
        Some(base + (key - self.ranges[idx].first))
    }

    /// Insert a single key.
    pub fn insert(&mut self, key: RowKey) {
        self.insert_range(key, key);
    }

    /// Insert the inclusive range `[first, last]`, coalescing with
    /// overlapping or adjacent ranges.
    pub fn insert_range(&mut self, first: RowKey, last: RowKey) {
        debug_assert!(first <= last && last < NULL_ROW_KEY);
        // Ranges that end before `first - 1` are unaffected; ranges that
        // start after `last + 1` are unaffected. Everything between merges.
        let lo = self.ranges.partition_point(|r| r.last.saturating_add(1) < first);
        let hi = self.ranges.partition_point(|r| r.first <= last.saturating_add(1));
        if lo == hi {
            self.ranges.insert(lo, RowRange::new(first, last));
            self.cardinality += last - first + 1;
            return;
        }
        let merged_first = first.min(self.ranges[lo].first);
        let merged_last = last.max(self.ranges[hi - 1].last);
        let removed: u64 = self.ranges[lo..hi].iter().map(|r| r.len()).sum();
        self.ranges.drain(lo..hi);
        self.ranges.insert(lo, RowRange::new(merged_first, merged_last));
        self.cardinality += (merged_last - merged_first + 1) - removed;
    }

    /// Remove a single key.
    pub fn remove(&mut self, key: RowKey) {
        self.remove_range(key, key);
    }

    /// Remove every key in the inclusive range `[first, last]`.
    pub fn remove_range(&mut self, first: RowKey, last: RowKey) {
        debug_assert!(first <= last);
        let lo = self.ranges.partition_point(|r| r.last < first);
        let hi = self.ranges.partition_point(|r| r.first <= last);
        if lo == hi {
            return;
        }
        let mut replacement: Vec<RowRange> = Vec::with_capacity(2);
        let head = self.ranges[lo];
        let tail = self.ranges[hi - 1];
        if head.first < first {
            replacement.push(RowRange::new(head.first, first - 1));
        }
        if tail.last > last {
            replacement.push(RowRange::new(last + 1, tail.last));
        }
        let removed: u64 = self.ranges[lo..hi].iter().map(|r| r.len()).sum();
        let kept: u64 = replacement.iter().map(|r| r.len()).sum();
        self.ranges.splice(lo..hi, replacement);
        self.cardinality -= removed - kept;
    }

    /// Insert every key of `other`.
    pub fn insert_row_set(&mut self, other: &RowSet) {
        for r in &other.ranges {
            self.insert_range(r.first, r.last);
        }
    }

    /// Remove every key of `other`.
    pub fn remove_row_set(&mut self, other: &RowSet) {
        for r in &other.ranges {
            self.remove_range(r.first, r.last);
        }
    }

    /// Set union.
    pub fn union(&self, other: &RowSet) -> RowSet {
        let mut out = self.clone();
        out.insert_row_set(other);
        out
    }

    /// Set difference `self − other`.
    pub fn minus(&self, other: &RowSet) -> RowSet {
        let mut out = self.clone();
        out.remove_row_set(other);
        out
    }

    /// Set intersection.
    pub fn intersect(&self, other: &RowSet) -> RowSet {
        let mut builder = RowSetBuilderSequential::new();
        let mut oi = other.ranges.iter().peekable();
        for r in &self.ranges {
            while let Some(o) = oi.peek() {
                if o.last < r.first {
                    oi.next();
                    continue;
                }
                if o.first > r.last {
                    break;
                }
                builder.append_range(r.first.max(o.first), r.last.min(o.last));
                if o.last <= r.last {
                    oi.next();
                } else {
                    break;
                }
            }
        }
        builder.build()
    }

    /// Whether every key of `other` is a member of `self`.
    pub fn contains_row_set(&self, other: &RowSet) -> bool {
        other.ranges.iter().all(|r| {
            self.range_index_for(r.first)
                .is_some_and(|idx| self.ranges[idx].last >= r.last)
        })
    }

    /// Translate a subset of this row set into positions.
    ///
    /// For each key of `subset` (which must be contained in `self`),
    /// the result holds its rank in `self`. Fails with
    /// [`RillError::KeyNotFound`] on the first key not present.
    pub fn invert(&self, subset: &RowSet) -> Result<RowSet, RillError> {
        let mut builder = RowSetBuilderSequential::new();
        let mut idx = 0usize;
        let mut base = 0u64;
        for sub in &subset.ranges {
            while idx < self.ranges.len() && self.ranges[idx].last < sub.first {
                base += self.ranges[idx].len();
                idx += 1;
            }
            if idx == self.ranges.len() || sub.first < self.ranges[idx].first {
                return Err(RillError::KeyNotFound(sub.first));
            }
            if sub.last > self.ranges[idx].last {
                return Err(RillError::KeyNotFound(self.ranges[idx].last + 1));
            }
            let pos = base + (sub.first - self.ranges[idx].first);
            builder.append_range(pos, pos + (sub.last - sub.first));
        }
        Ok(builder.build())
    }

    /// Iterate the ranges in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = RowRange> + '_ {
        self.ranges.iter().copied()
    }

    /// Iterate the keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = RowKey> + '_ {
        self.ranges.iter().flat_map(|r| r.first..=r.last)
    }

    /// Iterate the keys in descending order.
    pub fn keys_rev(&self) -> impl Iterator<Item = RowKey> + '_ {
        self.ranges.iter().rev().flat_map(|r| (r.first..=r.last).rev())
    }

    /// Number of stored ranges (diagnostic).
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }
}

impl fmt::Debug for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if r.first == r.last {
                write!(f, "{}", r.first)?;
            } else {
                write!(f, "[{}-{}]", r.first, r.last)?;
            }
        }
        write!(f, "}}")
    }
}

impl FromIterator<RowKey> for RowSet {
    fn from_iter<I: IntoIterator<Item = RowKey>>(iter: I) -> Self {
        RowSet::from_keys(iter)
    }
}

// ── Builders ───────────────────────────────────────────────────────────────

/// Builder for ascending append-only construction.
///
/// Appended keys must be strictly increasing; adjacent runs coalesce.
#[derive(Default)]
pub struct RowSetBuilderSequential {
    ranges: Vec<RowRange>,
    cardinality: u64,
}

impl RowSetBuilderSequential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_key(&mut self, key: RowKey) {
        self.append_range(key, key);
    }

    pub fn append_range(&mut self, first: RowKey, last: RowKey) {
        debug_assert!(first <= last && last < NULL_ROW_KEY);
        self.cardinality += last - first + 1;
        if let Some(prev) = self.ranges.last_mut() {
            debug_assert!(prev.last < first, "sequential builder requires ascending keys");
            if prev.last + 1 == first {
                prev.last = last;
                return;
            }
        }
        self.ranges.push(RowRange::new(first, last));
    }

    pub fn build(self) -> RowSet {
        RowSet {
            ranges: self.ranges,
            cardinality: self.cardinality,
        }
    }
}

/// Builder for unordered construction; sorts and coalesces on build.
#[derive(Default)]
pub struct RowSetBuilderRandom {
    pending: Vec<RowRange>,
}

impl RowSetBuilderRandom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, key: RowKey) {
        self.add_range(key, key);
    }

    pub fn add_range(&mut self, first: RowKey, last: RowKey) {
        debug_assert!(first <= last && last < NULL_ROW_KEY);
        self.pending.push(RowRange::new(first, last));
    }

    pub fn build(mut self) -> RowSet {
        self.pending.sort_by_key(|r| r.first);
        let mut out = RowSet::empty();
        for r in self.pending {
            out.insert_range(r.first, r.last);
        }
        out
    }
}

// ── Tracking row set ───────────────────────────────────────────────────────

/// A row set that remembers its previous cycle's contents.
///
/// `snapshot_prev` arms the pre-image lazily; it is idempotent within a
/// cycle. With no snapshot armed, previous accessors read the current
/// contents, matching the column-store rule that `get_prev ≡ get` outside
/// an active cycle.
#[derive(Debug, Default)]
pub struct TrackingRowSet {
    current: RowSet,
    prev: Option<RowSet>,
}

impl TrackingRowSet {
    pub fn new(initial: RowSet) -> Self {
        TrackingRowSet {
            current: initial,
            prev: None,
        }
    }

    pub fn current(&self) -> &RowSet {
        &self.current
    }

    /// Mutable access to the current contents. Callers inside an update
    /// cycle must call [`snapshot_prev`](Self::snapshot_prev) first.
    pub fn current_mut(&mut self) -> &mut RowSet {
        &mut self.current
    }

    /// The row set as of the last commit point.
    pub fn prev(&self) -> &RowSet {
        self.prev.as_ref().unwrap_or(&self.current)
    }

    pub fn size(&self) -> u64 {
        self.current.size()
    }

    pub fn size_prev(&self) -> u64 {
        self.prev().size()
    }

    /// Capture the pre-image for this cycle. Idempotent.
    pub fn snapshot_prev(&mut self) {
        if self.prev.is_none() {
            self.prev = Some(self.current.clone());
        }
    }

    /// Whether a pre-image snapshot is currently armed.
    pub fn has_snapshot(&self) -> bool {
        self.prev.is_some()
    }
}

impl CycleCommitter for TrackingRowSet {
    fn commit_cycle(&mut self) {
        self.prev = None;
    }

    fn rollback_cycle(&mut self) {
        // Restore the pre-image: an aborted cycle never happened.
        if let Some(prev) = self.prev.take() {
            self.current = prev;
        }
    }
}
