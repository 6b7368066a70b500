//! Column sources: typed cell storage addressed by row key.
//!
//! [`ColumnSource`] is the read capability — current and previous values,
//! point and chunked — and [`WritableColumnSource`] extends it with
//! mutation. [`AnyColumn`] erases the element type so tables can hold a
//! heterogeneous column list and the flatten operation can wrap columns
//! without knowing their types; typed access comes back through
//! `as_any()` downcasting.

pub mod element;
pub mod recycler;
pub mod redirected;
pub mod sparse;

use std::any::Any;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::error::RillError;
use crate::rowset::{RowKey, RowSet};

use element::Element;
use redirected::RowRedirection;

/// Read capability of a typed column.
pub trait ColumnSource<T: Element> {
    /// Current value at `key`, or NULL if no page holds it.
    fn get(&self, key: RowKey) -> T;

    /// Value at `key` as of the last commit point; equals `get` when no
    /// pre-image was captured this cycle.
    fn get_prev(&self, key: RowKey) -> T;

    /// Read current values for an ordered key sequence, in key order.
    fn fill_chunk(&self, rows: &RowSet, dest: &mut Chunk<T>);

    /// Read previous values for an ordered key sequence.
    fn fill_prev_chunk(&self, rows: &RowSet, dest: &mut Chunk<T>);

    /// Allocate a transfer chunk sized for this source.
    fn make_chunk(&self, capacity: usize) -> Chunk<T> {
        Chunk::with_capacity(capacity)
    }
}

/// Write capability of a typed column. Handles use interior mutability,
/// so all operations take `&self`.
pub trait WritableColumnSource<T: Element>: ColumnSource<T> {
    fn set(&self, key: RowKey, value: T) -> Result<(), RillError>;

    fn remove(&self, rows: &RowSet);

    fn shift(&self, rows: &RowSet, delta: i64) -> Result<(), RillError>;

    fn fill_from_chunk(&self, src: &Chunk<T>, rows: &RowSet) -> Result<(), RillError>;

    /// Pre-size for `size` rows. Lazily allocated stores may ignore this.
    fn ensure_capacity(&self, size: u64, null_fill: bool);
}

/// Type-erased column, as held by a table.
pub trait AnyColumn: 'static {
    /// Downcast hook for typed access.
    fn as_any(&self) -> &dyn Any;

    /// Descriptor of the element type.
    fn element_type_name(&self) -> &'static str;

    /// Wrap this column in a redirected read-through view.
    fn redirected(self: Rc<Self>, redirection: RowRedirection) -> Rc<dyn AnyColumn>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::sparse::SparseColumn;

    #[test]
    fn test_any_column_downcast() {
        let col: Rc<dyn AnyColumn> = Rc::new(SparseColumn::<i64>::new());
        assert!(col.element_type_name().contains("i64"));
        let typed = col
            .as_any()
            .downcast_ref::<SparseColumn<i64>>()
            .expect("downcast to the concrete handle");
        typed.set(3, 30).unwrap();
        assert_eq!(typed.get(3), 30);
    }

    #[test]
    fn test_wrong_downcast_is_none() {
        let col: Rc<dyn AnyColumn> = Rc::new(SparseColumn::<i32>::new());
        assert!(col.as_any().downcast_ref::<SparseColumn<i64>>().is_none());
    }
}
