//! The flatten operation: a dense `[0, N)` view of a parent table.
//!
//! Flattening wraps every parent column in a row redirection (dense
//! position → parent row key) and publishes a result table whose row set
//! is always `[0, size)`. No data is copied. When the parent refreshes,
//! a listener translates each upstream [`TableUpdate`] into the dense key
//! space, reconstructing a minimal shift program from the dense added and
//! removed ranges.
//!
//! The translation leans on the parent contract that shifts never
//! reorder rows: modified rows keep their relative dense ranks, so
//! dense-space shifts reduce to accounting for net additions and removals
//! within contiguous spans of the previous dense space.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::clock::UpdateGraph;
use crate::column::redirected::RowRedirection;
use crate::error::RillError;
use crate::rowset::{RowSet, TrackingRowSet};
use crate::shift::{RowSetShiftData, ShiftBuilder};
use crate::table::{AttributeCopyOp, Table, TableAttribute, TableBuilder};
use crate::update::{ModifiedColumnSetTransformer, TableListener, TableUpdate};

/// Flatten `parent` with default options.
pub fn flatten(parent: &Rc<Table>, graph: &mut UpdateGraph) -> Result<Rc<Table>, RillError> {
    flatten_with(parent, graph, &EngineConfig::default(), false)
}

/// Flatten `parent`, choosing the initial snapshot and validation policy.
///
/// With `use_previous` set, initialization captures the parent's previous
/// row set instead of the current one — the right choice when the result
/// is constructed mid-cycle, before the parent's update has been applied
/// to the listener's view.
pub fn flatten_with(
    parent: &Rc<Table>,
    graph: &mut UpdateGraph,
    config: &EngineConfig,
    use_previous: bool,
) -> Result<Rc<Table>, RillError> {
    let parent_rows = parent.row_set_handle();
    let initial_size = if use_previous {
        parent_rows.borrow().size_prev()
    } else {
        parent_rows.borrow().size()
    };

    let redirection = RowRedirection::wrap(Rc::clone(&parent_rows));
    let mut builder = TableBuilder::new()
        .row_set(RowSet::flat(initial_size))
        .refreshing(parent.is_refreshing());
    for (name, column) in parent.columns() {
        builder = builder.column(name, Rc::clone(column).redirected(redirection.clone()));
    }
    let result = builder.build(graph);

    result.set_attribute(TableAttribute::Flat);
    parent.copy_attributes(&result, AttributeCopyOp::Flatten);

    if parent.is_refreshing() {
        let transformer = ModifiedColumnSetTransformer::identity(
            parent.column_names(),
            Rc::clone(result.column_names()),
        );
        let listener = FlattenListener {
            parent_rows,
            result: Rc::clone(&result),
            transformer,
            prev_size: initial_size,
            validate: config.validate_updates,
        };
        parent.add_listener(Rc::new(RefCell::new(listener)));
    }

    Ok(result)
}

/// Translates parent updates into the dense key space.
struct FlattenListener {
    parent_rows: Rc<RefCell<TrackingRowSet>>,
    result: Rc<Table>,
    transformer: ModifiedColumnSetTransformer,
    /// Dense size as of the last translated update.
    prev_size: u64,
    validate: bool,
}

impl TableListener for FlattenListener {
    fn on_update(&mut self, upstream: &TableUpdate) -> Result<(), RillError> {
        let (downstream, new_size) = {
            let parent_rows = self.parent_rows.borrow();
            let current = parent_rows.current();
            let previous = parent_rows.prev();
            if self.validate {
                upstream.validate(previous, current)?;
            }

            let modified_columns = self.transformer.transform(&upstream.modified_columns);
            let modified = current.invert(&upstream.modified)?;

            if upstream.added.is_empty() && upstream.removed.is_empty() {
                // Pure modification: the parent contract forbids shifts
                // from reordering, so dense positions are unchanged.
                let downstream = TableUpdate {
                    added: RowSet::empty(),
                    removed: RowSet::empty(),
                    modified,
                    shifted: RowSetShiftData::empty(),
                    modified_columns,
                };
                (downstream, self.prev_size)
            } else {
                let added = current.invert(&upstream.added)?;
                let removed = previous.invert(&upstream.removed)?;
                let shifted = build_dense_shift(&removed, &added, self.prev_size)?;
                let downstream = TableUpdate {
                    added,
                    removed,
                    modified,
                    shifted,
                    modified_columns,
                };
                (downstream, current.size())
            }
        };

        if new_size != self.prev_size {
            let handle = self.result.row_set_handle();
            let mut rows = handle.borrow_mut();
            rows.snapshot_prev();
            if new_size < self.prev_size {
                rows.current_mut().remove_range(new_size, self.prev_size - 1);
            } else {
                rows.current_mut().insert_range(self.prev_size, new_size - 1);
            }
        }
        debug!(
            prev_size = self.prev_size,
            new_size,
            added = downstream.added.size(),
            removed = downstream.removed.size(),
            modified = downstream.modified.size(),
            shifts = downstream.shifted.len(),
            "flatten update translated"
        );
        self.prev_size = new_size;
        self.result.notify_listeners(&downstream)
    }
}

/// Reconstruct the minimal dense shift program from dense removed ranges
/// (previous dense space) and dense added ranges (current dense space).
///
/// Added starts are pre-shifted into the previous space by subtracting the
/// running delta; the walk then takes whichever of the next remove or the
/// next (pre-shifted) add comes first, emitting a shift for the span
/// since the last marker whenever the running delta changes.
fn build_dense_shift(
    removed: &RowSet,
    added: &RowSet,
    prev_size: u64,
) -> Result<RowSetShiftData, RillError> {
    // Pre-shift an add's current-space start into the previous space.
    fn prev_start(add_first: u64, delta: i64) -> Result<u64, RillError> {
        let start = add_first as i128 - delta as i128;
        if start < 0 {
            return Err(RillError::UpdateContractViolation(
                "dense added positions precede the accumulated shift".into(),
            ));
        }
        Ok(start as u64)
    }

    // Emit the span since the last marker with the delta in force.
    fn emit_gap(
        builder: &mut ShiftBuilder,
        marker: u64,
        until: u64,
        delta: i64,
    ) -> Result<(), RillError> {
        if until > marker {
            builder.append(marker, until - 1, delta)?;
        }
        Ok(())
    }

    let mut builder = ShiftBuilder::new();
    let mut removes = removed.ranges().peekable();
    let mut adds = added.ranges().peekable();
    let mut curr_delta: i64 = 0;
    let mut curr_marker: u64 = 0;

    loop {
        match (removes.peek().copied(), adds.peek().copied()) {
            (None, None) => break,
            (Some(r), None) => {
                emit_gap(&mut builder, curr_marker, r.first, curr_delta)?;
                curr_delta -= r.len() as i64;
                curr_marker = r.last + 1;
                removes.next();
            }
            (None, Some(a)) => {
                let start = prev_start(a.first, curr_delta)?;
                emit_gap(&mut builder, curr_marker, start, curr_delta)?;
                curr_delta += a.len() as i64;
                curr_marker = start;
                adds.next();
            }
            (Some(r), Some(a)) => {
                let start = prev_start(a.first, curr_delta)?;
                if r.first < start {
                    emit_gap(&mut builder, curr_marker, r.first, curr_delta)?;
                    curr_delta -= r.len() as i64;
                    curr_marker = r.last + 1;
                    removes.next();
                } else if r.first > start {
                    emit_gap(&mut builder, curr_marker, start, curr_delta)?;
                    curr_delta += a.len() as i64;
                    curr_marker = start;
                    adds.next();
                } else {
                    // A remove and an add at the same previous location:
                    // equal sizes cancel, unequal sizes net out.
                    let dt_r = r.len() as i64;
                    let dt_a = a.len() as i64;
                    if dt_r != dt_a {
                        emit_gap(&mut builder, curr_marker, r.first, curr_delta)?;
                        curr_delta += dt_a - dt_r;
                        curr_marker = r.last + 1;
                    }
                    removes.next();
                    adds.next();
                }
            }
        }
    }

    if curr_marker < prev_size {
        builder.append(curr_marker, prev_size - 1, curr_delta)?;
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shift::ShiftRange;

    fn rs(keys: &[u64]) -> RowSet {
        RowSet::from_keys(keys.iter().copied())
    }

    fn shifts(data: &RowSetShiftData) -> Vec<(u64, u64, i64)> {
        data.iter().map(|r| (r.begin, r.end, r.delta)).collect()
    }

    #[test]
    fn test_dense_shift_no_changes() {
        let p = build_dense_shift(&RowSet::empty(), &RowSet::empty(), 10).unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn test_dense_shift_mid_remove() {
        // Remove dense position 1 out of 4: tail [2,3] slides down one.
        let p = build_dense_shift(&rs(&[1]), &RowSet::empty(), 4).unwrap();
        assert_eq!(shifts(&p), vec![(2, 3, -1)]);
    }

    #[test]
    fn test_dense_shift_tail_add() {
        let p = build_dense_shift(&RowSet::empty(), &rs(&[2]), 2).unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn test_dense_shift_front_add() {
        let p = build_dense_shift(&RowSet::empty(), &rs(&[0]), 2).unwrap();
        assert_eq!(shifts(&p), vec![(0, 1, 1)]);
    }

    #[test]
    fn test_dense_shift_equal_replace_cancels() {
        let p = build_dense_shift(&rs(&[1]), &rs(&[1]), 3).unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn test_dense_shift_unequal_replace() {
        // One key removed at position 1, two arrive there: the tail
        // gains one position.
        let p = build_dense_shift(&rs(&[1]), &rs(&[1, 2]), 3).unwrap();
        assert_eq!(shifts(&p), vec![(2, 2, 1)]);
    }

    #[test]
    fn test_dense_shift_remove_then_add_later() {
        // prev size 6: remove position 1, add at current position 3.
        // Span [2,3] slides down one; the add at prev position 4 pushes
        // the remainder back up.
        let p = build_dense_shift(&rs(&[1]), &rs(&[3]), 6).unwrap();
        assert_eq!(shifts(&p), vec![(2, 3, -1)]);
        // [4,5] keeps net delta 0, so no range is emitted for it.
    }

    #[test]
    fn test_dense_shift_multiple_removes_accumulate() {
        let p = build_dense_shift(&rs(&[0, 2]), &RowSet::empty(), 5).unwrap();
        assert_eq!(shifts(&p), vec![(1, 1, -1), (3, 4, -2)]);
    }

    #[test]
    fn test_dense_shift_is_minimal() {
        let p = build_dense_shift(&rs(&[0, 2]), &RowSet::empty(), 5).unwrap();
        p.validate().unwrap();
        let ranges: Vec<ShiftRange> = p.iter().collect();
        for pair in ranges.windows(2) {
            assert!(
                pair[0].end + 1 < pair[1].begin || pair[0].delta != pair[1].delta,
                "adjacent ranges share a delta: {:?}",
                pair
            );
        }
    }
}
