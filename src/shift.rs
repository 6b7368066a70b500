//! Shift programs: ordered range re-keyings.
//!
//! A [`RowSetShiftData`] describes an isometric re-keying applied between
//! two versions of a row set: an ascending sequence of disjoint key ranges,
//! each moved by a signed delta, preserving relative order. Programs are
//! assembled through [`ShiftBuilder`], which rejects out-of-order input and
//! coalesces adjacent ranges with equal delta so the emitted program is
//! minimal.

use std::fmt;

use crate::error::RillError;
use crate::rowset::{RowKey, RowSet, RowSetBuilderRandom};

/// One shifted range: every key in `[begin, end]` moves by `delta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftRange {
    pub begin: RowKey,
    pub end: RowKey,
    pub delta: i64,
}

impl ShiftRange {
    /// Destination of `key`, which must lie within the range.
    fn shift(&self, key: RowKey) -> RowKey {
        debug_assert!(self.begin <= key && key <= self.end);
        apply_delta(key, self.delta)
    }
}

fn apply_delta(key: RowKey, delta: i64) -> RowKey {
    let shifted = key as i128 + delta as i128;
    debug_assert!((0..=u64::MAX as i128).contains(&shifted));
    shifted as RowKey
}

/// An ordered, disjoint, order-preserving shift program.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RowSetShiftData {
    ranges: Vec<ShiftRange>,
}

impl RowSetShiftData {
    /// The empty program (no keys move).
    pub fn empty() -> Self {
        RowSetShiftData::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ShiftRange> + '_ {
        self.ranges.iter().copied()
    }

    /// Destination of `key` under this program. Keys outside every range
    /// are unmoved.
    pub fn shift_key(&self, key: RowKey) -> RowKey {
        let idx = self.ranges.partition_point(|r| r.end < key);
        match self.ranges.get(idx) {
            Some(r) if r.begin <= key => r.shift(key),
            _ => key,
        }
    }

    /// Apply the program to a row set, producing the re-keyed set.
    pub fn apply_to(&self, rows: &RowSet) -> RowSet {
        if self.is_empty() {
            return rows.clone();
        }
        let mut builder = RowSetBuilderRandom::new();
        for range in rows.ranges() {
            // Split the input range at program boundaries so whole
            // segments map with a single delta.
            let mut cursor = range.first;
            while cursor <= range.last {
                let idx = self.ranges.partition_point(|r| r.end < cursor);
                match self.ranges.get(idx) {
                    Some(r) if r.begin <= cursor => {
                        let seg_last = range.last.min(r.end);
                        builder.add_range(r.shift(cursor), r.shift(seg_last));
                        if seg_last == range.last {
                            break;
                        }
                        cursor = seg_last + 1;
                    }
                    Some(r) => {
                        let seg_last = range.last.min(r.begin - 1);
                        builder.add_range(cursor, seg_last);
                        if seg_last == range.last {
                            break;
                        }
                        cursor = seg_last + 1;
                    }
                    None => {
                        builder.add_range(cursor, range.last);
                        break;
                    }
                }
            }
        }
        builder.build()
    }

    /// Check the program invariants: ascending disjoint sources, nonzero
    /// deltas, order-preserving destinations, and minimality (no two
    /// adjacent contiguous ranges with equal delta).
    pub fn validate(&self) -> Result<(), RillError> {
        for (i, r) in self.ranges.iter().enumerate() {
            if r.begin > r.end {
                return Err(RillError::InvalidShiftData(format!(
                    "range {i} is empty: [{}-{}]",
                    r.begin, r.end
                )));
            }
            if r.delta == 0 {
                return Err(RillError::InvalidShiftData(format!(
                    "range {i} has zero delta"
                )));
            }
            if (r.begin as i128 + r.delta as i128) < 0 {
                return Err(RillError::InvalidShiftData(format!(
                    "range {i} shifts below key zero"
                )));
            }
            if i > 0 {
                let prev = self.ranges[i - 1];
                if prev.end >= r.begin {
                    return Err(RillError::InvalidShiftData(format!(
                        "ranges {} and {i} overlap or are out of order",
                        i - 1
                    )));
                }
                // Destinations must keep source order: a shift never
                // reorders rows.
                if prev.end as i128 + prev.delta as i128 >= r.begin as i128 + r.delta as i128 {
                    return Err(RillError::InvalidShiftData(format!(
                        "ranges {} and {i} reorder their destinations",
                        i - 1
                    )));
                }
                if prev.end + 1 == r.begin && prev.delta == r.delta {
                    return Err(RillError::InvalidShiftData(format!(
                        "ranges {} and {i} are contiguous with equal delta",
                        i - 1
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RowSetShiftData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{{[{}-{}] {:+}}}", r.begin, r.end, r.delta)?;
        }
        write!(f, "]")
    }
}

/// Accumulates shift ranges in ascending order.
///
/// Empty ranges and zero deltas are silently dropped; adjacent contiguous
/// ranges with equal delta coalesce. Out-of-order appends are rejected.
#[derive(Default)]
pub struct ShiftBuilder {
    ranges: Vec<ShiftRange>,
}

impl ShiftBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `[begin, end] → delta`. A no-op when the range is empty or
    /// the delta zero.
    pub fn append(&mut self, begin: RowKey, end: RowKey, delta: i64) -> Result<(), RillError> {
        if begin > end || delta == 0 {
            return Ok(());
        }
        if (begin as i128 + delta as i128) < 0 {
            return Err(RillError::InvalidShiftData(format!(
                "shift [{begin}-{end}] by {delta} moves below key zero"
            )));
        }
        if let Some(prev) = self.ranges.last_mut() {
            if prev.end >= begin {
                return Err(RillError::InvalidShiftData(format!(
                    "append out of order: [{begin}-{end}] after [{}-{}]",
                    prev.begin, prev.end
                )));
            }
            if prev.end as i128 + prev.delta as i128 >= begin as i128 + delta as i128 {
                return Err(RillError::InvalidShiftData(format!(
                    "append would reorder destinations at key {begin}"
                )));
            }
            if prev.end + 1 == begin && prev.delta == delta {
                prev.end = end;
                return Ok(());
            }
        }
        self.ranges.push(ShiftRange { begin, end, delta });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn build(self) -> RowSetShiftData {
        RowSetShiftData {
            ranges: self.ranges,
        }
    }
}
