//! Update propagation contracts.
//!
//! A [`TableUpdate`] describes the change between two successive states of
//! a table: row keys added, removed, and modified, a shift program
//! relocating surviving keys, and a [`ModifiedColumnSet`] narrowing which
//! columns' values may have changed for the modified keys.
//!
//! Listeners receive updates as shared read-only references; an update is
//! assembled once and never mutated afterwards. Delivery is synchronous
//! and single-threaded, in parent-before-child order.

use std::rc::Rc;

use crate::error::RillError;
use crate::rowset::RowSet;
use crate::shift::RowSetShiftData;

// ── Modified column set ────────────────────────────────────────────────────

/// Fixed-size bitset over a table's column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedColumnSet {
    columns: Rc<[String]>,
    words: Vec<u64>,
}

impl ModifiedColumnSet {
    /// An empty (all-clear) set over the given column list.
    pub fn empty_for(columns: Rc<[String]>) -> Self {
        let words = vec![0u64; columns.len().div_ceil(64)];
        ModifiedColumnSet { columns, words }
    }

    /// An all-dirty set over the given column list.
    pub fn all_for(columns: Rc<[String]>) -> Self {
        let mut set = Self::empty_for(columns);
        set.set_all();
        set
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &Rc<[String]> {
        &self.columns
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Mark a column dirty. Unknown names are an argument error.
    pub fn set_column(&mut self, name: &str) -> Result<(), RillError> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| RillError::InvalidArgument(format!("unknown column: {name}")))?;
        self.words[idx >> 6] |= 1 << (idx & 63);
        Ok(())
    }

    pub fn set_all(&mut self) {
        for (w, word) in self.words.iter_mut().enumerate() {
            let bits_here = (self.columns.len() - w * 64).min(64);
            *word = if bits_here == 64 {
                u64::MAX
            } else {
                (1u64 << bits_here) - 1
            };
        }
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn contains(&self, name: &str) -> bool {
        match self.index_of(name) {
            Some(idx) => self.words[idx >> 6] & (1 << (idx & 63)) != 0,
            None => false,
        }
    }

    pub fn is_dirty(&self, idx: usize) -> bool {
        idx < self.columns.len() && self.words[idx >> 6] & (1 << (idx & 63)) != 0
    }

    pub fn is_clear(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// OR another set over the same column list into this one.
    pub fn union_with(&mut self, other: &ModifiedColumnSet) -> Result<(), RillError> {
        if self.columns != other.columns {
            return Err(RillError::InvalidArgument(
                "modified column sets belong to different column lists".into(),
            ));
        }
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= src;
        }
        Ok(())
    }
}

/// Maps dirty bits from a source table's column list onto a destination's.
///
/// Non-identity transformers compose mappings: source column `i` marks
/// destination column `mapping[i]` when present.
#[derive(Debug, Clone)]
pub struct ModifiedColumnSetTransformer {
    dest_columns: Rc<[String]>,
    mapping: Vec<Option<usize>>,
}

impl ModifiedColumnSetTransformer {
    /// Identity transformer between two tables sharing a schema: bits are
    /// forwarded by name.
    pub fn identity(
        source_columns: &Rc<[String]>,
        dest_columns: Rc<[String]>,
    ) -> Self {
        let mapping = source_columns
            .iter()
            .map(|name| dest_columns.iter().position(|c| c == name))
            .collect();
        ModifiedColumnSetTransformer {
            dest_columns,
            mapping,
        }
    }

    /// Translate a source set into a fresh destination set.
    pub fn transform(&self, source: &ModifiedColumnSet) -> ModifiedColumnSet {
        let mut dest = ModifiedColumnSet::empty_for(self.dest_columns.clone());
        for (src_idx, dest_idx) in self.mapping.iter().enumerate() {
            if let Some(dest_idx) = dest_idx {
                if source.is_dirty(src_idx) {
                    dest.words[dest_idx >> 6] |= 1 << (dest_idx & 63);
                }
            }
        }
        dest
    }
}

// ── Table update ───────────────────────────────────────────────────────────

/// The change between two successive states of a table.
///
/// Invariants: `added`, `removed`, and `modified` are pairwise disjoint;
/// `shifted` is ascending, disjoint, and order-preserving; applying
/// `shifted` to the previous row set minus `removed`, then adding `added`,
/// yields the current row set.
#[derive(Debug, Clone)]
pub struct TableUpdate {
    pub added: RowSet,
    pub removed: RowSet,
    pub modified: RowSet,
    pub shifted: RowSetShiftData,
    pub modified_columns: ModifiedColumnSet,
}

impl TableUpdate {
    /// An update that changes nothing.
    pub fn empty(modified_columns: ModifiedColumnSet) -> Self {
        TableUpdate {
            added: RowSet::empty(),
            removed: RowSet::empty(),
            modified: RowSet::empty(),
            shifted: RowSetShiftData::empty(),
            modified_columns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.modified.is_empty()
            && self.shifted.is_empty()
    }

    /// Check this update against the producing table's row sets.
    ///
    /// `prev` is the row set before the update, `current` after. Every
    /// violation is a fatal contract error for the cycle.
    pub fn validate(&self, prev: &RowSet, current: &RowSet) -> Result<(), RillError> {
        if !self.added.intersect(&self.removed).is_empty()
            || !self.added.intersect(&self.modified).is_empty()
            || !self.removed.intersect(&self.modified).is_empty()
        {
            return Err(RillError::UpdateContractViolation(
                "added, removed, and modified must be pairwise disjoint".into(),
            ));
        }
        self.shifted.validate()?;
        if !prev.contains_row_set(&self.removed) {
            return Err(RillError::UpdateContractViolation(
                "removed keys missing from previous row set".into(),
            ));
        }
        if !current.contains_row_set(&self.added) {
            return Err(RillError::UpdateContractViolation(
                "added keys missing from current row set".into(),
            ));
        }
        if !current.contains_row_set(&self.modified) {
            return Err(RillError::UpdateContractViolation(
                "modified keys missing from current row set".into(),
            ));
        }
        // Replaying the update over the previous row set must land on the
        // current one.
        let mut replay = prev.minus(&self.removed);
        replay = self.shifted.apply_to(&replay);
        replay.insert_row_set(&self.added);
        if &replay != current {
            return Err(RillError::UpdateContractViolation(
                "previous row set does not replay to the current row set".into(),
            ));
        }
        Ok(())
    }
}

// ── Listener contract ──────────────────────────────────────────────────────

/// Receives table updates during the cycle they belong to.
///
/// Errors abort the enclosing cycle; the surrounding scheduler owns
/// recovery.
pub trait TableListener {
    fn on_update(&mut self, update: &TableUpdate) -> Result<(), RillError>;
}
