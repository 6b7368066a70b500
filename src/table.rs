//! Tables: a row set, named columns, attributes, and listener wiring.
//!
//! A [`Table`] bundles a tracking row set with an ordered list of
//! type-erased columns. Refreshing tables accept listeners and deliver
//! [`TableUpdate`]s to them synchronously, parents before children, inside
//! the update cycle the change belongs to.
//!
//! Attribute tags ([`TableAttribute`]) carry metadata such as flatness
//! and sortedness across derived tables; [`Table::copy_attributes`]
//! transfers the tags appropriate to the deriving operation.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::trace;

use crate::clock::{CycleCommitter, UpdateGraph};
use crate::column::AnyColumn;
use crate::error::RillError;
use crate::rowset::{RowSet, TrackingRowSet};
use crate::update::{ModifiedColumnSet, TableListener, TableUpdate};

/// Metadata tags on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TableAttribute {
    /// The row set is exactly `[0, size)` at all times.
    Flat,
    /// Rows are sorted by some column ordering.
    Sorted,
}

/// Deriving operations that transfer attributes between tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeCopyOp {
    Flatten,
}

/// A table: tracking row set + ordered named columns + listeners.
pub struct Table {
    row_set: Rc<RefCell<TrackingRowSet>>,
    column_names: Rc<[String]>,
    columns: Vec<Rc<dyn AnyColumn>>,
    refreshing: bool,
    attributes: RefCell<BTreeSet<TableAttribute>>,
    listeners: RefCell<Vec<Rc<RefCell<dyn TableListener>>>>,
}

impl Table {
    /// Shared handle to the row set, for redirections and listeners.
    pub fn row_set_handle(&self) -> Rc<RefCell<TrackingRowSet>> {
        Rc::clone(&self.row_set)
    }

    /// Snapshot of the current row set.
    pub fn row_set(&self) -> RowSet {
        self.row_set.borrow().current().clone()
    }

    /// Snapshot of the previous row set.
    pub fn prev_row_set(&self) -> RowSet {
        self.row_set.borrow().prev().clone()
    }

    pub fn size(&self) -> u64 {
        self.row_set.borrow().size()
    }

    pub fn size_prev(&self) -> u64 {
        self.row_set.borrow().size_prev()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    pub fn column_names(&self) -> &Rc<[String]> {
        &self.column_names
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<Rc<dyn AnyColumn>> {
        self.column_names
            .iter()
            .position(|c| c == name)
            .map(|i| Rc::clone(&self.columns[i]))
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Rc<dyn AnyColumn>)> {
        self.column_names
            .iter()
            .map(|n| n.as_str())
            .zip(self.columns.iter())
    }

    /// A clear modified-column set over this table's columns.
    pub fn modified_column_set(&self) -> ModifiedColumnSet {
        ModifiedColumnSet::empty_for(Rc::clone(&self.column_names))
    }

    pub fn has_attribute(&self, attr: TableAttribute) -> bool {
        self.attributes.borrow().contains(&attr)
    }

    pub fn set_attribute(&self, attr: TableAttribute) {
        self.attributes.borrow_mut().insert(attr);
    }

    /// Transfer the attributes appropriate to `op` onto `dest`.
    pub fn copy_attributes(&self, dest: &Table, op: AttributeCopyOp) {
        match op {
            AttributeCopyOp::Flatten => {
                // Flattening re-keys without reordering, so sortedness
                // survives. Flatness is set by the operation itself.
                if self.has_attribute(TableAttribute::Sorted) {
                    dest.set_attribute(TableAttribute::Sorted);
                }
            }
        }
    }

    /// Attach a listener. Updates are delivered synchronously, in
    /// registration order, within the producing cycle.
    pub fn add_listener(&self, listener: Rc<RefCell<dyn TableListener>>) {
        self.listeners.borrow_mut().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Deliver an update to every listener. The first error aborts
    /// delivery and propagates.
    pub fn notify_listeners(&self, update: &TableUpdate) -> Result<(), RillError> {
        let listeners: Vec<_> = self.listeners.borrow().clone();
        for listener in listeners {
            listener.borrow_mut().on_update(update)?;
        }
        Ok(())
    }

    /// Apply an update to this table's row set, then notify listeners.
    ///
    /// The row set transition replays the update contract: starting from
    /// the previous row set, removed keys leave, the shift program
    /// relocates survivors, added keys arrive.
    pub fn process_update(&self, update: TableUpdate) -> Result<(), RillError> {
        {
            let mut rows = self.row_set.borrow_mut();
            rows.snapshot_prev();
            let current = rows.current_mut();
            current.remove_row_set(&update.removed);
            if !update.shifted.is_empty() {
                *current = update.shifted.apply_to(current);
            }
            current.insert_row_set(&update.added);
        }
        trace!(
            added = update.added.size(),
            removed = update.removed.size(),
            modified = update.modified.size(),
            shifts = update.shifted.len(),
            "table update processed"
        );
        self.notify_listeners(&update)
    }
}

/// Builder for [`Table`] values.
#[derive(Default)]
pub struct TableBuilder {
    rows: RowSet,
    names: Vec<String>,
    columns: Vec<Rc<dyn AnyColumn>>,
    refreshing: bool,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_set(mut self, rows: RowSet) -> Self {
        self.rows = rows;
        self
    }

    pub fn column(mut self, name: &str, column: Rc<dyn AnyColumn>) -> Self {
        self.names.push(name.to_string());
        self.columns.push(column);
        self
    }

    pub fn refreshing(mut self, refreshing: bool) -> Self {
        self.refreshing = refreshing;
        self
    }

    /// Finish the table. Refreshing tables register their row set with
    /// the update graph so snapshots are dropped at commit.
    pub fn build(self, graph: &mut UpdateGraph) -> Rc<Table> {
        let row_set = Rc::new(RefCell::new(TrackingRowSet::new(self.rows)));
        if self.refreshing {
            graph.register_committer(
                Rc::downgrade(&row_set) as std::rc::Weak<RefCell<dyn CycleCommitter>>
            );
        }
        Rc::new(Table {
            row_set,
            column_names: self.names.into(),
            columns: self.columns,
            refreshing: self.refreshing,
            attributes: RefCell::new(BTreeSet::new()),
            listeners: RefCell::new(Vec::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnSource;
    use crate::column::WritableColumnSource;
    use crate::column::sparse::SparseColumn;
    use crate::shift::ShiftBuilder;

    fn rs(keys: &[u64]) -> RowSet {
        RowSet::from_keys(keys.iter().copied())
    }

    fn test_table(graph: &mut UpdateGraph, keys: &[u64]) -> Rc<Table> {
        let col: SparseColumn<i64> = SparseColumn::new();
        for k in keys {
            col.set(*k, *k as i64 * 10).unwrap();
        }
        TableBuilder::new()
            .row_set(rs(keys))
            .column("v", Rc::new(col))
            .refreshing(true)
            .build(graph)
    }

    #[test]
    fn test_builder_and_lookup() {
        let mut graph = UpdateGraph::new();
        let table = test_table(&mut graph, &[10, 20]);
        assert_eq!(table.size(), 2);
        assert!(table.is_refreshing());
        assert_eq!(table.column_names().len(), 1);
        assert!(table.column("v").is_some());
        assert!(table.column("missing").is_none());
        let col = table.column("v").unwrap();
        let typed = col.as_any().downcast_ref::<SparseColumn<i64>>().unwrap();
        assert_eq!(typed.get(20), 200);
    }

    #[test]
    fn test_attributes_and_copy() {
        let mut graph = UpdateGraph::new();
        let a = test_table(&mut graph, &[1]);
        let b = test_table(&mut graph, &[1]);
        a.set_attribute(TableAttribute::Sorted);
        a.copy_attributes(&b, AttributeCopyOp::Flatten);
        assert!(b.has_attribute(TableAttribute::Sorted));
        assert!(!b.has_attribute(TableAttribute::Flat));
    }

    #[test]
    fn test_process_update_row_set_transition() {
        let mut graph = UpdateGraph::new();
        let table = test_table(&mut graph, &[10, 20, 30, 40]);
        graph.begin_cycle().unwrap();

        // Remove 20, shift the tail down to close the gap, add 50.
        let mut shift = ShiftBuilder::new();
        shift.append(30, 40, -10).unwrap();
        let update = TableUpdate {
            added: rs(&[50]),
            removed: rs(&[20]),
            modified: RowSet::empty(),
            shifted: shift.build(),
            modified_columns: table.modified_column_set(),
        };
        table.process_update(update).unwrap();

        assert_eq!(table.row_set(), rs(&[10, 20, 30, 50]));
        assert_eq!(table.prev_row_set(), rs(&[10, 20, 30, 40]));

        graph.end_cycle().unwrap();
        assert_eq!(table.prev_row_set(), rs(&[10, 20, 30, 50]));
    }

    #[test]
    fn test_listener_delivery_and_error() {
        struct Counting {
            seen: u32,
        }
        impl TableListener for Counting {
            fn on_update(&mut self, _u: &TableUpdate) -> Result<(), RillError> {
                self.seen += 1;
                Ok(())
            }
        }
        struct Failing;
        impl TableListener for Failing {
            fn on_update(&mut self, _u: &TableUpdate) -> Result<(), RillError> {
                Err(RillError::InternalError("listener".into()))
            }
        }

        let mut graph = UpdateGraph::new();
        let table = test_table(&mut graph, &[1]);
        let counting = Rc::new(RefCell::new(Counting { seen: 0 }));
        table.add_listener(counting.clone());
        assert_eq!(table.listener_count(), 1);

        let update = TableUpdate::empty(table.modified_column_set());
        table.notify_listeners(&update).unwrap();
        assert_eq!(counting.borrow().seen, 1);

        table.add_listener(Rc::new(RefCell::new(Failing)));
        assert!(table.notify_listeners(&update).is_err());
    }
}
