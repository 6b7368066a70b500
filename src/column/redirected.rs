//! Row redirection: read-through views in a translated key space.
//!
//! A [`RowRedirection`] maps an outer row key to an inner one by indexing
//! a shared row set: outer position `p` reads the `p`-th key of the
//! wrapped set. The flatten operation uses this to present a parent
//! table's columns in the dense `[0, N)` space without copying any data.

use std::cell::RefCell;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::column::element::Element;
use crate::column::{AnyColumn, ColumnSource};
use crate::rowset::{NULL_ROW_KEY, RowKey, RowSet, RowSetBuilderSequential, TrackingRowSet};

/// Maps outer (dense) positions to inner row keys through a shared
/// tracking row set.
#[derive(Clone)]
pub struct RowRedirection {
    rows: Rc<RefCell<TrackingRowSet>>,
}

impl RowRedirection {
    /// Wrap a shared row set. No data is copied; lookups read the set's
    /// live contents.
    pub fn wrap(rows: Rc<RefCell<TrackingRowSet>>) -> Self {
        RowRedirection { rows }
    }

    /// Inner key at outer position `pos`, or [`NULL_ROW_KEY`] past the end.
    pub fn get(&self, pos: u64) -> RowKey {
        self.rows.borrow().current().get(pos)
    }

    /// Inner key at outer position `pos` in the previous row set.
    pub fn get_prev(&self, pos: u64) -> RowKey {
        self.rows.borrow().prev().get(pos)
    }

    /// Translate a set of outer positions into inner keys, preserving
    /// order. Positions past the end are skipped.
    fn translate(&self, positions: &RowSet, prev: bool) -> RowSet {
        let rows = self.rows.borrow();
        let inner = if prev { rows.prev() } else { rows.current() };
        let mut builder = RowSetBuilderSequential::new();
        for pos in positions.keys() {
            let key = inner.get(pos);
            if key != NULL_ROW_KEY {
                builder.append_key(key);
            }
        }
        builder.build()
    }
}

/// A column view that reads through a [`RowRedirection`].
pub struct RedirectedColumn<T: Element> {
    inner: Rc<dyn ColumnSource<T>>,
    redirection: RowRedirection,
}

impl<T: Element> RedirectedColumn<T> {
    pub fn new(inner: Rc<dyn ColumnSource<T>>, redirection: RowRedirection) -> Self {
        RedirectedColumn { inner, redirection }
    }
}

impl<T: Element> ColumnSource<T> for RedirectedColumn<T> {
    fn get(&self, key: RowKey) -> T {
        self.inner.get(self.redirection.get(key))
    }

    fn get_prev(&self, key: RowKey) -> T {
        self.inner.get_prev(self.redirection.get_prev(key))
    }

    fn fill_chunk(&self, rows: &RowSet, dest: &mut Chunk<T>) {
        let translated = self.redirection.translate(rows, false);
        self.inner.fill_chunk(&translated, dest);
    }

    fn fill_prev_chunk(&self, rows: &RowSet, dest: &mut Chunk<T>) {
        let translated = self.redirection.translate(rows, true);
        self.inner.fill_prev_chunk(&translated, dest);
    }
}

impl<T: Element> AnyColumn for RedirectedColumn<T> {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn element_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn redirected(self: Rc<Self>, redirection: RowRedirection) -> Rc<dyn AnyColumn> {
        Rc::new(RedirectedColumn::new(
            self as Rc<dyn ColumnSource<T>>,
            redirection,
        ))
    }
}
