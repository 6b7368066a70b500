//! Sparse paged column store with previous-value capture.
//!
//! A [`SparseColumnStore`] holds an unbounded, sparsely populated column of
//! values indexed by 64-bit row keys. The key space is partitioned by the
//! low [`LOG_BLOCK_SIZE`] bits into leaf pages of [`BLOCK_SIZE`] cells; the
//! remaining high bits are split across three directory levels of
//! [`LOG_LEVEL_SIZE`] bits each. Pages and directories are allocated
//! lazily on first write, and unallocated paths read as the element's NULL
//! sentinel.
//!
//! # Previous values
//!
//! Once tracking is armed, the first mutation of each cell in an update
//! cycle captures the cell's pre-image into a shadow tree of the same
//! shape, gated by a parallel in-use bitset tree: one bit per cell,
//! set exactly when the shadow holds that cell's pre-image for this
//! cycle. Shadow value leaves come from a recycler pool and are not
//! null-filled, so reading a shadow cell is legal only where its in-use
//! bit is set.
//!
//! Commit walks the flushed-blocks list — never the directories — to
//! return shadow leaves and in-use leaves to their pools, then
//! deduplicates the list upward by level and recycles the level-2,
//! level-1, and root directories in that order. The sparse directory is
//! torn down in O(touched leaves).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::chunk::Chunk;
use crate::clock::{CycleCommitter, UpdateGraph};
use crate::column::element::Element;
use crate::column::recycler::Recycler;
use crate::column::{AnyColumn, ColumnSource, WritableColumnSource};
use crate::config::EngineConfig;
use crate::error::RillError;
use crate::rowset::{NULL_ROW_KEY, RowKey, RowSet};

/// log2 of the leaf page size.
pub const LOG_BLOCK_SIZE: u32 = 10;
/// Cells per leaf page.
pub const BLOCK_SIZE: usize = 1 << LOG_BLOCK_SIZE;
/// log2 of each directory level's span.
pub const LOG_LEVEL_SIZE: u32 = 18;
/// Words per in-use bitset leaf.
pub const IN_USE_WORDS: usize = BLOCK_SIZE / 64;

/// Mask selecting the within-leaf cell index.
pub const INNER_MASK: u64 = (BLOCK_SIZE - 1) as u64;
const LEVEL_MASK: u64 = (1 << LOG_LEVEL_SIZE) - 1;

const BLOCK2_SHIFT: u32 = LOG_BLOCK_SIZE;
const BLOCK1_SHIFT: u32 = BLOCK2_SHIFT + LOG_LEVEL_SIZE;
const BLOCK0_SHIFT: u32 = BLOCK1_SHIFT + LOG_LEVEL_SIZE;

#[inline]
fn slice0(key: RowKey) -> usize {
    (key >> BLOCK0_SHIFT) as usize
}

#[inline]
fn slice1(key: RowKey) -> usize {
    ((key >> BLOCK1_SHIFT) & LEVEL_MASK) as usize
}

#[inline]
fn slice2(key: RowKey) -> usize {
    ((key >> BLOCK2_SHIFT) & LEVEL_MASK) as usize
}

#[inline]
fn inner(key: RowKey) -> usize {
    (key & INNER_MASK) as usize
}

// ── Directory levels ───────────────────────────────────────────────────────

/// One directory level: a flat array indexed by the masked key slice,
/// grown geometrically up to the level span.
#[derive(Debug)]
struct Dir<C> {
    slots: Vec<Option<C>>,
}

impl<C> Dir<C> {
    fn new() -> Self {
        Dir { slots: Vec::new() }
    }

    fn get(&self, i: usize) -> Option<&C> {
        self.slots.get(i).and_then(|s| s.as_ref())
    }

    fn get_mut(&mut self, i: usize) -> Option<&mut C> {
        self.slots.get_mut(i).and_then(|s| s.as_mut())
    }

    /// Grow so index `i` exists and return its slot.
    fn ensure(&mut self, i: usize) -> &mut Option<C> {
        debug_assert!(i <= LEVEL_MASK as usize);
        if self.slots.len() <= i {
            let target = (self.slots.len().max(16) * 2)
                .max(i + 1)
                .min((LEVEL_MASK + 1) as usize);
            self.slots.resize_with(target, || None);
        }
        &mut self.slots[i]
    }

    fn take(&mut self, i: usize) -> Option<C> {
        self.slots.get_mut(i).and_then(|s| s.take())
    }
}

type Leaf<T> = Box<[T]>;
type InUseLeaf = Box<[u64]>;

type ValueDir2<T> = Dir<Leaf<T>>;
type ValueDir1<T> = Dir<ValueDir2<T>>;
type ValueDir0<T> = Dir<ValueDir1<T>>;
type InUseDir2 = Dir<InUseLeaf>;
type InUseDir1 = Dir<InUseDir2>;
type InUseDir0 = Dir<InUseDir1>;

fn fresh_leaf<T: Element>() -> Leaf<T> {
    vec![T::NULL; BLOCK_SIZE].into_boxed_slice()
}

fn fresh_in_use_leaf() -> InUseLeaf {
    vec![0u64; IN_USE_WORDS].into_boxed_slice()
}

// ── Recycler pools ─────────────────────────────────────────────────────────

/// Pools for transient shadow structures, parameterized by level. May be
/// shared across columns of the same element type.
#[derive(Debug)]
pub struct RecyclerSet<T> {
    leaves: Recycler<Leaf<T>>,
    in_use_leaves: Recycler<InUseLeaf>,
    value_dir2: Recycler<ValueDir2<T>>,
    value_dir1: Recycler<ValueDir1<T>>,
    value_dir0: Recycler<ValueDir0<T>>,
    in_use_dir2: Recycler<InUseDir2>,
    in_use_dir1: Recycler<InUseDir1>,
    in_use_dir0: Recycler<InUseDir0>,
}

impl<T> RecyclerSet<T> {
    pub fn new(config: &EngineConfig) -> Self {
        let leaves = config.leaf_pool_capacity;
        let dirs = config.directory_pool_capacity;
        RecyclerSet {
            leaves: Recycler::new(leaves),
            in_use_leaves: Recycler::new(leaves),
            value_dir2: Recycler::new(dirs),
            value_dir1: Recycler::new(dirs),
            value_dir0: Recycler::new(dirs),
            in_use_dir2: Recycler::new(dirs),
            in_use_dir1: Recycler::new(dirs),
            in_use_dir0: Recycler::new(dirs),
        }
    }

    /// Number of value leaves currently pooled (diagnostic).
    pub fn pooled_leaves(&self) -> usize {
        self.leaves.pooled()
    }
}

// ── Shadow state ───────────────────────────────────────────────────────────

/// Previous-value shadow for one active update cycle.
struct ShadowState<T> {
    values: ValueDir0<T>,
    in_use: InUseDir0,
    /// Leaf coordinates (`key >> LOG_BLOCK_SIZE`) allocated this cycle,
    /// in allocation order. Commit walks this list, not the directories.
    flushed_blocks: Vec<u64>,
}

impl<T: Element> ShadowState<T> {
    fn new(recyclers: &RecyclerSet<T>) -> Self {
        ShadowState {
            values: recyclers.value_dir0.borrow_or(Dir::new),
            in_use: recyclers.in_use_dir0.borrow_or(Dir::new),
            flushed_blocks: Vec::new(),
        }
    }

    fn value_leaf(&self, key: RowKey) -> Option<&Leaf<T>> {
        self.values
            .get(slice0(key))?
            .get(slice1(key))?
            .get(slice2(key))
    }

    fn in_use_leaf(&self, key: RowKey) -> Option<&InUseLeaf> {
        self.in_use
            .get(slice0(key))?
            .get(slice1(key))?
            .get(slice2(key))
    }
}

// ── The store ──────────────────────────────────────────────────────────────

/// Sparse paged column store for one element type.
pub struct SparseColumnStore<T: Element> {
    values: ValueDir0<T>,
    shadow: Option<ShadowState<T>>,
    tracking_armed: bool,
    recyclers: Rc<RecyclerSet<T>>,
}

impl<T: Element> SparseColumnStore<T> {
    pub fn new() -> Self {
        Self::with_recyclers(Rc::new(RecyclerSet::new(&EngineConfig::default())))
    }

    pub fn with_recyclers(recyclers: Rc<RecyclerSet<T>>) -> Self {
        SparseColumnStore {
            values: Dir::new(),
            shadow: None,
            tracking_armed: false,
            recyclers,
        }
    }

    /// Whether previous-value tracking has been armed.
    pub fn is_tracking(&self) -> bool {
        self.tracking_armed
    }

    /// Arm previous-value capture for subsequent writes. Fails if already
    /// armed.
    pub fn arm_tracking(&mut self) -> Result<(), RillError> {
        if self.tracking_armed {
            return Err(RillError::TrackingAlreadyStarted);
        }
        self.tracking_armed = true;
        Ok(())
    }

    fn leaf(&self, key: RowKey) -> Option<&Leaf<T>> {
        self.values
            .get(slice0(key))?
            .get(slice1(key))?
            .get(slice2(key))
    }

    /// Primary leaf for `key`, allocating (null-filled) along the path.
    fn ensure_leaf(&mut self, key: RowKey) -> &mut Leaf<T> {
        let dir1 = self
            .values
            .ensure(slice0(key))
            .get_or_insert_with(Dir::new);
        let dir2 = dir1.ensure(slice1(key)).get_or_insert_with(Dir::new);
        dir2.ensure(slice2(key)).get_or_insert_with(fresh_leaf)
    }

    /// Current value at `key`, or NULL if no page holds it.
    pub fn get(&self, key: RowKey) -> T {
        if key == NULL_ROW_KEY {
            return T::NULL;
        }
        match self.leaf(key) {
            Some(leaf) => leaf[inner(key)].clone(),
            None => T::NULL,
        }
    }

    /// Value at `key` as of the last commit point. With the in-use bit
    /// clear (or tracking disarmed), reads the current value.
    pub fn get_prev(&self, key: RowKey) -> T {
        if key == NULL_ROW_KEY {
            return T::NULL;
        }
        if let Some(shadow) = &self.shadow {
            let i = inner(key);
            if let (Some(bits), Some(vals)) =
                (shadow.in_use_leaf(key), shadow.value_leaf(key))
            {
                if bits[i >> 6] & (1 << (i & 63)) != 0 {
                    return vals[i].clone();
                }
            }
        }
        self.get(key)
    }

    /// Capture `key`'s pre-image if tracking is armed and this is the
    /// cell's first mutation of the cycle. Must run before the mutation.
    fn record_previous(&mut self, key: RowKey) {
        if !self.tracking_armed {
            return;
        }
        let pre = self.get(key);
        let block = key >> LOG_BLOCK_SIZE;
        let recyclers = &self.recyclers;
        let shadow = self
            .shadow
            .get_or_insert_with(|| ShadowState::new(recyclers));

        let in_use_dir1 = shadow
            .in_use
            .ensure(slice0(key))
            .get_or_insert_with(|| recyclers.in_use_dir1.borrow_or(Dir::new));
        let in_use_dir2 = in_use_dir1
            .ensure(slice1(key))
            .get_or_insert_with(|| recyclers.in_use_dir2.borrow_or(Dir::new));
        let in_use_slot = in_use_dir2.ensure(slice2(key));
        let newly_allocated = in_use_slot.is_none();
        let bits = in_use_slot
            .get_or_insert_with(|| recyclers.in_use_leaves.borrow_or(fresh_in_use_leaf));

        let i = inner(key);
        let word = i >> 6;
        let mask = 1u64 << (i & 63);
        if !newly_allocated && bits[word] & mask != 0 {
            // First capture of the cycle already holds the pre-image.
            return;
        }
        bits[word] |= mask;

        let value_dir1 = shadow
            .values
            .ensure(slice0(key))
            .get_or_insert_with(|| recyclers.value_dir1.borrow_or(Dir::new));
        let value_dir2 = value_dir1
            .ensure(slice1(key))
            .get_or_insert_with(|| recyclers.value_dir2.borrow_or(Dir::new));
        let vals = value_dir2
            .ensure(slice2(key))
            .get_or_insert_with(|| recyclers.leaves.borrow_or(fresh_leaf));
        vals[i] = pre;

        if newly_allocated {
            shadow.flushed_blocks.push(block);
        }
    }

    fn set_cell(&mut self, key: RowKey, value: T) {
        self.record_previous(key);
        let i = inner(key);
        self.ensure_leaf(key)[i] = value;
    }

    /// NULL a cell without allocating: an absent page already reads NULL.
    fn null_cell(&mut self, key: RowKey) {
        if self.leaf(key).is_none() {
            return;
        }
        self.set_cell(key, T::NULL);
    }

    /// Install `value` at `key`. Writing a NULL sentinel is legitimate and
    /// goes through the capture protocol like any other value.
    pub fn set(&mut self, key: RowKey, value: T) -> Result<(), RillError> {
        if key == NULL_ROW_KEY {
            return Err(RillError::ReservedRowKey(key));
        }
        self.set_cell(key, value);
        Ok(())
    }

    /// NULL every designated cell, capturing pre-images.
    pub fn remove(&mut self, rows: &RowSet) {
        for key in rows.keys() {
            self.null_cell(key);
        }
    }

    /// Relocate every key of `rows` by `delta`: the value moves to
    /// `key + delta` and the source cell becomes NULL.
    ///
    /// `rows` is ordered by construction; iteration runs in reverse for
    /// positive deltas so overlapping source and destination ranges never
    /// overwrite each other. Pre-images are captured for both cells.
    pub fn shift(&mut self, rows: &RowSet, delta: i64) -> Result<(), RillError> {
        if delta == 0 {
            return Err(RillError::InvalidArgument(
                "shift delta must be nonzero".into(),
            ));
        }
        if rows.is_empty() {
            return Ok(());
        }
        let first_dest = rows.first_row_key() as i128 + delta as i128;
        let last_dest = rows.last_row_key() as i128 + delta as i128;
        if first_dest < 0 || last_dest >= NULL_ROW_KEY as i128 {
            return Err(RillError::InvalidArgument(format!(
                "shift by {delta} leaves the row-key domain"
            )));
        }
        if delta > 0 {
            for key in rows.keys_rev() {
                self.move_cell(key, delta);
            }
        } else {
            for key in rows.keys() {
                self.move_cell(key, delta);
            }
        }
        Ok(())
    }

    fn move_cell(&mut self, key: RowKey, delta: i64) {
        let value = self.get(key);
        let dest = (key as i128 + delta as i128) as RowKey;
        if !value.is_null() || self.leaf(dest).is_some() {
            self.set_cell(dest, value);
        }
        self.null_cell(key);
    }

    /// Read current values for an ordered key sequence, in key order.
    /// Absent pages fill with NULL.
    pub fn fill_chunk(&self, rows: &RowSet, dest: &mut Chunk<T>) {
        dest.clear();
        for range in rows.ranges() {
            let mut key = range.first;
            loop {
                // Consume keys up to the leaf boundary in one slice.
                let seg_last = range.last.min(key | INNER_MASK);
                let n = (seg_last - key + 1) as usize;
                match self.leaf(key) {
                    Some(leaf) => {
                        let i = inner(key);
                        dest.extend_from_slice(&leaf[i..i + n]);
                    }
                    None => dest.push_nulls(n),
                }
                if seg_last == range.last {
                    break;
                }
                key = seg_last + 1;
            }
        }
    }

    /// Read previous values for an ordered key sequence.
    pub fn fill_prev_chunk(&self, rows: &RowSet, dest: &mut Chunk<T>) {
        let Some(shadow) = &self.shadow else {
            return self.fill_chunk(rows, dest);
        };
        dest.clear();
        for range in rows.ranges() {
            let mut key = range.first;
            loop {
                let seg_last = range.last.min(key | INNER_MASK);
                let n = (seg_last - key + 1) as usize;
                let primary = self.leaf(key);
                match (shadow.in_use_leaf(key), shadow.value_leaf(key)) {
                    (Some(bits), Some(vals)) => {
                        for k in key..=seg_last {
                            let i = inner(k);
                            if bits[i >> 6] & (1 << (i & 63)) != 0 {
                                dest.push(vals[i].clone());
                            } else {
                                match primary {
                                    Some(leaf) => dest.push(leaf[i].clone()),
                                    None => dest.push(T::NULL),
                                }
                            }
                        }
                    }
                    _ => match primary {
                        Some(leaf) => {
                            let i = inner(key);
                            dest.extend_from_slice(&leaf[i..i + n]);
                        }
                        None => dest.push_nulls(n),
                    },
                }
                if seg_last == range.last {
                    break;
                }
                key = seg_last + 1;
            }
        }
    }

    /// Install the chunk's values at the designated keys, in key order,
    /// capturing pre-images per cell.
    pub fn fill_from_chunk(&mut self, src: &Chunk<T>, rows: &RowSet) -> Result<(), RillError> {
        if src.len() as u64 != rows.size() {
            return Err(RillError::InvalidArgument(format!(
                "chunk holds {} values for {} keys",
                src.len(),
                rows.size()
            )));
        }
        for (key, value) in rows.keys().zip(src.as_slice()) {
            self.set_cell(key, value.clone());
        }
        Ok(())
    }

    /// Commit the active cycle's shadow: recycle leaves via the
    /// flushed-blocks list, compact the list upward by level, recycle the
    /// directories, and mark the shadow roots absent.
    fn commit_shadow(&mut self) {
        let Some(mut shadow) = self.shadow.take() else {
            return;
        };
        shadow.flushed_blocks.sort_unstable();
        shadow.flushed_blocks.dedup();
        let leaves = shadow.flushed_blocks.len();

        for &block in &shadow.flushed_blocks {
            let key = block << LOG_BLOCK_SIZE;
            let (s0, s1, s2) = (slice0(key), slice1(key), slice2(key));
            if let Some(leaf) = shadow
                .values
                .get_mut(s0)
                .and_then(|d1| d1.get_mut(s1))
                .and_then(|d2| d2.take(s2))
            {
                self.recyclers.leaves.give_back(leaf);
            }
            if let Some(mut bits) = shadow
                .in_use
                .get_mut(s0)
                .and_then(|d1| d1.get_mut(s1))
                .and_then(|d2| d2.take(s2))
            {
                bits.fill(0);
                self.recyclers.in_use_leaves.give_back(bits);
            }
        }

        // Compact by higher-order key groups: level 2, then level 1.
        let mut dir2_coords: Vec<u64> = shadow
            .flushed_blocks
            .iter()
            .map(|b| b >> LOG_LEVEL_SIZE)
            .collect();
        dir2_coords.dedup();
        for &coord in &dir2_coords {
            let key = coord << (LOG_BLOCK_SIZE + LOG_LEVEL_SIZE);
            let (s0, s1) = (slice0(key), slice1(key));
            if let Some(dir2) = shadow.values.get_mut(s0).and_then(|d1| d1.take(s1)) {
                self.recyclers.value_dir2.give_back(dir2);
            }
            if let Some(dir2) = shadow.in_use.get_mut(s0).and_then(|d1| d1.take(s1)) {
                self.recyclers.in_use_dir2.give_back(dir2);
            }
        }

        let mut dir1_coords: Vec<u64> =
            dir2_coords.iter().map(|c| c >> LOG_LEVEL_SIZE).collect();
        dir1_coords.dedup();
        for &coord in &dir1_coords {
            let key = coord << (LOG_BLOCK_SIZE + 2 * LOG_LEVEL_SIZE);
            let s0 = slice0(key);
            if let Some(dir1) = shadow.values.take(s0) {
                self.recyclers.value_dir1.give_back(dir1);
            }
            if let Some(dir1) = shadow.in_use.take(s0) {
                self.recyclers.in_use_dir1.give_back(dir1);
            }
        }

        self.recyclers.value_dir0.give_back(shadow.values);
        self.recyclers.in_use_dir0.give_back(shadow.in_use);
        trace!(leaves, "sparse column shadow committed");
    }

    /// Discard an aborted cycle's shadow: captured pre-images are copied
    /// back into the primary tree, then the shadow is dropped without
    /// recycling, so the next cycle rebuilds it from scratch.
    fn discard_shadow(&mut self) {
        let Some(shadow) = self.shadow.take() else {
            return;
        };
        for &block in &shadow.flushed_blocks {
            let base = block << LOG_BLOCK_SIZE;
            let (Some(bits), Some(vals)) =
                (shadow.in_use_leaf(base), shadow.value_leaf(base))
            else {
                continue;
            };
            for cell in 0..BLOCK_SIZE {
                if bits[cell >> 6] & (1 << (cell & 63)) != 0 {
                    self.ensure_leaf(base)[cell] = vals[cell].clone();
                }
            }
        }
        trace!("sparse column shadow discarded");
    }
}

impl<T: Element> Default for SparseColumnStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> CycleCommitter for SparseColumnStore<T> {
    fn commit_cycle(&mut self) {
        self.commit_shadow();
    }

    fn rollback_cycle(&mut self) {
        self.discard_shadow();
    }
}

// ── Shared handle ──────────────────────────────────────────────────────────

/// Cheap-to-clone handle to a [`SparseColumnStore`], shareable with tables
/// and redirection views.
pub struct SparseColumn<T: Element> {
    store: Rc<RefCell<SparseColumnStore<T>>>,
}

impl<T: Element> Clone for SparseColumn<T> {
    fn clone(&self) -> Self {
        SparseColumn {
            store: Rc::clone(&self.store),
        }
    }
}

impl<T: Element> SparseColumn<T> {
    pub fn new() -> Self {
        SparseColumn {
            store: Rc::new(RefCell::new(SparseColumnStore::new())),
        }
    }

    pub fn with_recyclers(recyclers: Rc<RecyclerSet<T>>) -> Self {
        SparseColumn {
            store: Rc::new(RefCell::new(SparseColumnStore::with_recyclers(recyclers))),
        }
    }

    /// Arm previous-value capture and register the end-of-cycle flush
    /// with the update graph. Fails if called twice.
    pub fn start_tracking_prev_values(
        &self,
        graph: &mut UpdateGraph,
    ) -> Result<(), RillError> {
        self.store.borrow_mut().arm_tracking()?;
        graph.register_committer(
            Rc::downgrade(&self.store) as Weak<RefCell<dyn CycleCommitter>>
        );
        Ok(())
    }

    pub fn is_tracking(&self) -> bool {
        self.store.borrow().is_tracking()
    }
}

impl<T: Element> Default for SparseColumn<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> ColumnSource<T> for SparseColumn<T> {
    fn get(&self, key: RowKey) -> T {
        self.store.borrow().get(key)
    }

    fn get_prev(&self, key: RowKey) -> T {
        self.store.borrow().get_prev(key)
    }

    fn fill_chunk(&self, rows: &RowSet, dest: &mut Chunk<T>) {
        self.store.borrow().fill_chunk(rows, dest);
    }

    fn fill_prev_chunk(&self, rows: &RowSet, dest: &mut Chunk<T>) {
        self.store.borrow().fill_prev_chunk(rows, dest);
    }
}

impl<T: Element> WritableColumnSource<T> for SparseColumn<T> {
    fn set(&self, key: RowKey, value: T) -> Result<(), RillError> {
        self.store.borrow_mut().set(key, value)
    }

    fn remove(&self, rows: &RowSet) {
        self.store.borrow_mut().remove(rows);
    }

    fn shift(&self, rows: &RowSet, delta: i64) -> Result<(), RillError> {
        self.store.borrow_mut().shift(rows, delta)
    }

    fn fill_from_chunk(&self, src: &Chunk<T>, rows: &RowSet) -> Result<(), RillError> {
        self.store.borrow_mut().fill_from_chunk(src, rows)
    }

    fn ensure_capacity(&self, _size: u64, _null_fill: bool) {
        // Pages allocate lazily; a sparse store has nothing to pre-size.
    }
}

impl<T: Element> AnyColumn for SparseColumn<T> {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn element_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn redirected(
        self: Rc<Self>,
        redirection: crate::column::redirected::RowRedirection,
    ) -> Rc<dyn AnyColumn> {
        Rc::new(crate::column::redirected::RedirectedColumn::new(
            self as Rc<dyn ColumnSource<T>>,
            redirection,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::element::{NULL_INT, NULL_LONG};

    fn rs(keys: &[u64]) -> RowSet {
        RowSet::from_keys(keys.iter().copied())
    }

    #[test]
    fn test_null_by_default() {
        let store: SparseColumnStore<i64> = SparseColumnStore::new();
        for key in [0u64, 1 << 40, (1 << 60) - 1] {
            assert_eq!(store.get(key), NULL_LONG);
            assert_eq!(store.get_prev(key), NULL_LONG);
        }
        // Reads never allocate.
        assert!(store.values.slots.is_empty());
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut store: SparseColumnStore<i32> = SparseColumnStore::new();
        store.set(7, 100).unwrap();
        store.set(7 + BLOCK_SIZE as u64, 200).unwrap();
        store.set(1 << 40, 300).unwrap();
        assert_eq!(store.get(7), 100);
        assert_eq!(store.get(7 + BLOCK_SIZE as u64), 200);
        assert_eq!(store.get(1 << 40), 300);
        assert_eq!(store.get(8), NULL_INT);
    }

    #[test]
    fn test_reserved_key_rejected_on_write() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        assert!(matches!(
            store.set(NULL_ROW_KEY, 1).unwrap_err(),
            RillError::ReservedRowKey(_)
        ));
        assert_eq!(store.get(NULL_ROW_KEY), NULL_LONG);
    }

    #[test]
    fn test_prev_value_capture_first_write_wins() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.set(7, 100).unwrap();
        store.arm_tracking().unwrap();

        store.set(7, 200).unwrap();
        store.set(7, 300).unwrap();
        assert_eq!(store.get(7), 300);
        assert_eq!(store.get_prev(7), 100);

        store.commit_cycle();
        assert_eq!(store.get(7), 300);
        assert_eq!(store.get_prev(7), 300);
    }

    #[test]
    fn test_prev_of_never_written_cell_is_null() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.arm_tracking().unwrap();
        store.set(5, 42).unwrap();
        assert_eq!(store.get_prev(5), NULL_LONG);
        assert_eq!(store.get_prev(6), NULL_LONG);
    }

    #[test]
    fn test_tracking_disarmed_prev_tracks_current() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.set(3, 10).unwrap();
        assert_eq!(store.get_prev(3), 10);
        store.set(3, 20).unwrap();
        assert_eq!(store.get_prev(3), 20);
    }

    #[test]
    fn test_double_arm_fails() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.arm_tracking().unwrap();
        assert!(matches!(
            store.arm_tracking().unwrap_err(),
            RillError::TrackingAlreadyStarted
        ));
    }

    #[test]
    fn test_set_null_goes_through_capture() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.set(9, 5).unwrap();
        store.arm_tracking().unwrap();
        store.set(9, NULL_LONG).unwrap();
        assert_eq!(store.get(9), NULL_LONG);
        assert_eq!(store.get_prev(9), 5);
    }

    #[test]
    fn test_remove_captures_and_nulls() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.set(1, 10).unwrap();
        store.set(2, 20).unwrap();
        store.arm_tracking().unwrap();
        store.remove(&rs(&[1, 2, 3]));
        assert_eq!(store.get(1), NULL_LONG);
        assert_eq!(store.get(2), NULL_LONG);
        assert_eq!(store.get_prev(1), 10);
        assert_eq!(store.get_prev(2), 20);
        assert_eq!(store.get_prev(3), NULL_LONG);
    }

    #[test]
    fn test_remove_absent_page_does_not_allocate() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.arm_tracking().unwrap();
        store.remove(&rs(&[1 << 50]));
        assert!(store.values.slots.is_empty());
        assert!(store.shadow.is_none());
    }

    #[test]
    fn test_shift_positive_overlapping() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        for k in 0..4u64 {
            store.set(k, k as i64 * 10).unwrap();
        }
        // Destinations overlap sources; reverse iteration must protect
        // the unread values.
        store.shift(&RowSet::from_range(0, 3), 2).unwrap();
        assert_eq!(store.get(0), NULL_LONG);
        assert_eq!(store.get(1), NULL_LONG);
        assert_eq!(store.get(2), 0);
        assert_eq!(store.get(3), 10);
        assert_eq!(store.get(4), 20);
        assert_eq!(store.get(5), 30);
    }

    #[test]
    fn test_shift_negative_overlapping() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        for k in 10..14u64 {
            store.set(k, k as i64).unwrap();
        }
        store.shift(&RowSet::from_range(10, 13), -2).unwrap();
        assert_eq!(store.get(8), 10);
        assert_eq!(store.get(9), 11);
        assert_eq!(store.get(10), 12);
        assert_eq!(store.get(11), 13);
        assert_eq!(store.get(12), NULL_LONG);
        assert_eq!(store.get(13), NULL_LONG);
    }

    #[test]
    fn test_shift_rejects_zero_delta_and_underflow() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.set(1, 1).unwrap();
        assert!(store.shift(&rs(&[1]), 0).is_err());
        assert!(store.shift(&rs(&[1]), -2).is_err());
    }

    #[test]
    fn test_shift_captures_both_cells() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.set(0, 5).unwrap();
        store.set(1, 6).unwrap();
        store.arm_tracking().unwrap();
        store.shift(&rs(&[0]), 1).unwrap();
        assert_eq!(store.get(1), 5);
        assert_eq!(store.get_prev(0), 5);
        assert_eq!(store.get_prev(1), 6);
    }

    #[test]
    fn test_fill_chunk_across_block_boundary() {
        let mut store: SparseColumnStore<i32> = SparseColumnStore::new();
        let boundary = BLOCK_SIZE as u64;
        store.set(boundary - 1, 1).unwrap();
        store.set(boundary, 2).unwrap();
        let mut chunk = Chunk::with_capacity(8);
        store.fill_chunk(&RowSet::from_range(boundary - 2, boundary + 1), &mut chunk);
        assert_eq!(chunk.as_slice(), &[NULL_INT, 1, 2, NULL_INT]);
    }

    #[test]
    fn test_fill_chunk_absent_pages_fill_null() {
        let store: SparseColumnStore<i32> = SparseColumnStore::new();
        let mut chunk = Chunk::with_capacity(4);
        store.fill_chunk(&rs(&[5, 1 << 30]), &mut chunk);
        assert_eq!(chunk.as_slice(), &[NULL_INT, NULL_INT]);
    }

    #[test]
    fn test_fill_from_chunk_roundtrip() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        let keys = rs(&[3, 4, 1000, 4096]);
        let src = Chunk::from_slice(&[30i64, 40, 50, 60]);
        store.fill_from_chunk(&src, &keys).unwrap();
        let mut out = Chunk::with_capacity(4);
        store.fill_chunk(&keys, &mut out);
        assert_eq!(out.as_slice(), src.as_slice());
    }

    #[test]
    fn test_fill_from_chunk_size_mismatch() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        let src = Chunk::from_slice(&[1i64]);
        assert!(store.fill_from_chunk(&src, &rs(&[1, 2])).is_err());
    }

    #[test]
    fn test_fill_prev_chunk_mixed_capture() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.set(0, 1).unwrap();
        store.set(1, 2).unwrap();
        store.arm_tracking().unwrap();
        store.set(0, 100).unwrap();
        let mut prev = Chunk::with_capacity(4);
        store.fill_prev_chunk(&rs(&[0, 1, 2]), &mut prev);
        assert_eq!(prev.as_slice(), &[1, 2, NULL_LONG]);
        let mut cur = Chunk::with_capacity(4);
        store.fill_chunk(&rs(&[0, 1, 2]), &mut cur);
        assert_eq!(cur.as_slice(), &[100, 2, NULL_LONG]);
    }

    #[test]
    fn test_commit_recycles_into_pools() {
        let recyclers = Rc::new(RecyclerSet::new(&EngineConfig::default()));
        let mut store: SparseColumnStore<i64> =
            SparseColumnStore::with_recyclers(Rc::clone(&recyclers));
        store.arm_tracking().unwrap();
        store.set(0, 1).unwrap();
        store.set(1 << 30, 2).unwrap();
        store.commit_cycle();
        assert_eq!(recyclers.pooled_leaves(), 2);
        // The next cycle draws shadow leaves from the pool.
        store.set(0, 3).unwrap();
        assert_eq!(recyclers.pooled_leaves(), 1);
        assert_eq!(store.get_prev(0), 1);
    }

    #[test]
    fn test_capture_at_most_once_across_commit_boundary() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.arm_tracking().unwrap();
        store.set(5, 1).unwrap();
        store.commit_cycle();
        // New cycle: a fresh capture records the committed value.
        store.set(5, 2).unwrap();
        store.set(5, 3).unwrap();
        assert_eq!(store.get_prev(5), 1);
        store.commit_cycle();
        assert_eq!(store.get_prev(5), 3);
    }

    #[test]
    fn test_rollback_restores_pre_images() {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        store.set(2, 10).unwrap();
        store.arm_tracking().unwrap();
        store.set(2, 99).unwrap();
        store.set(3, 7).unwrap();
        store.rollback_cycle();
        assert_eq!(store.get(2), 10);
        assert_eq!(store.get(3), NULL_LONG);
        assert_eq!(store.get_prev(2), 10);
    }

    #[test]
    fn test_handle_tracking_registration() {
        let mut graph = UpdateGraph::new();
        let col: SparseColumn<i64> = SparseColumn::new();
        col.set(1, 10).unwrap();
        col.start_tracking_prev_values(&mut graph).unwrap();
        assert!(col.is_tracking());
        assert!(col.start_tracking_prev_values(&mut graph).is_err());

        graph.begin_cycle().unwrap();
        col.set(1, 20).unwrap();
        assert_eq!(col.get_prev(1), 10);
        graph.end_cycle().unwrap();
        assert_eq!(col.get_prev(1), 20);
    }

    #[test]
    fn test_reference_elements() {
        let mut store: SparseColumnStore<Option<String>> = SparseColumnStore::new();
        store.set(0, Some("a".to_string())).unwrap();
        store.arm_tracking().unwrap();
        store.set(0, Some("b".to_string())).unwrap();
        store.set(1, Some("c".to_string())).unwrap();
        assert_eq!(store.get_prev(0).as_deref(), Some("a"));
        assert_eq!(store.get_prev(1), None);
        store.commit_cycle();
        assert_eq!(store.get_prev(0).as_deref(), Some("b"));
    }
}
