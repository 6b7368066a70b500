//! Property-based tests using proptest.
//!
//! Tests the key invariants of the engine:
//! - NULL by default for never-written cells
//! - Previous-value fidelity and at-most-once capture over a cycle
//! - Post-commit equality of current and previous reads
//! - Chunk write/read round-trips
//! - Shift isometry on the column store
//! - Flatten row-set/shift-program invariants under random churn

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::rc::Rc;

use proptest::prelude::*;

use rilltable::Chunk;
use rilltable::clock::{CycleCommitter, UpdateGraph};
use rilltable::column::WritableColumnSource;
use rilltable::column::element::NULL_LONG;
use rilltable::column::sparse::{SparseColumn, SparseColumnStore};
use rilltable::flatten::flatten;
use rilltable::rowset::RowSet;
use rilltable::table::TableBuilder;
use rilltable::update::TableUpdate;

// ── Strategies ─────────────────────────────────────────────────────────────

/// Sparse keys across several pages and directory spans.
fn arb_keys() -> impl Strategy<Value = BTreeSet<u64>> {
    prop::collection::btree_set(0u64..(1 << 22), 0..32)
}

fn arb_writes() -> impl Strategy<Value = Vec<(u64, i64)>> {
    prop::collection::vec((0u64..(1 << 16), -1000i64..1000), 0..64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // ── Null by default ────────────────────────────────────────────

    #[test]
    fn prop_null_by_default(keys in arb_keys()) {
        let store: SparseColumnStore<i64> = SparseColumnStore::new();
        for &k in &keys {
            prop_assert_eq!(store.get(k), NULL_LONG);
            prop_assert_eq!(store.get_prev(k), NULL_LONG);
        }
    }

    // ── Previous-value fidelity ────────────────────────────────────

    #[test]
    fn prop_prev_value_fidelity(
        initial in prop::collection::btree_map(0u64..(1 << 16), -1000i64..1000, 0..32),
        writes in arb_writes(),
    ) {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        for (&k, &v) in &initial {
            store.set(k, v).unwrap();
        }
        store.arm_tracking().unwrap();

        for &(k, v) in &writes {
            store.set(k, v).unwrap();
        }

        // Every key — written this cycle or not — reads its cycle-start
        // value through get_prev, no matter how many times it was
        // rewritten (first capture wins).
        let mut touched: BTreeSet<u64> = initial.keys().copied().collect();
        touched.extend(writes.iter().map(|(k, _)| *k));
        let snapshot = |k: u64| initial.get(&k).copied().unwrap_or(NULL_LONG);
        for &k in &touched {
            prop_assert_eq!(store.get_prev(k), snapshot(k));
        }

        // Post-commit equality: the shadow is gone.
        store.commit_cycle();
        for &k in &touched {
            prop_assert_eq!(store.get_prev(k), store.get(k));
        }
    }

    // ── Chunk round-trip ───────────────────────────────────────────

    #[test]
    fn prop_chunk_round_trip(
        keys in arb_keys(),
        seed in -1000i64..1000,
    ) {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        let rows = RowSet::from_keys(keys.iter().copied());
        let values: Vec<i64> = (0..rows.size()).map(|i| seed + i as i64).collect();
        let src = Chunk::from_slice(&values);
        store.fill_from_chunk(&src, &rows).unwrap();

        let mut dest = Chunk::with_capacity(values.len().max(1));
        store.fill_chunk(&rows, &mut dest);
        prop_assert_eq!(dest.as_slice(), src.as_slice());
    }

    // ── Shift isometry ─────────────────────────────────────────────

    #[test]
    fn prop_shift_isometry(
        keys in prop::collection::btree_set(10_000u64..20_000, 1..24),
        delta in (-500i64..500).prop_filter("nonzero", |d| *d != 0),
    ) {
        let mut store: SparseColumnStore<i64> = SparseColumnStore::new();
        let rows = RowSet::from_keys(keys.iter().copied());
        let mut expected: BTreeMap<u64, i64> = BTreeMap::new();
        for (i, &k) in keys.iter().enumerate() {
            let v = i as i64 + 1;
            store.set(k, v).unwrap();
            expected.insert((k as i128 + delta as i128) as u64, v);
        }

        store.shift(&rows, delta).unwrap();

        // Destinations hold the original values.
        for (&dest, &v) in &expected {
            prop_assert_eq!(store.get(dest), v);
        }
        // Sources that are not themselves destinations are NULL.
        for &k in &keys {
            if !expected.contains_key(&k) {
                prop_assert_eq!(store.get(k), NULL_LONG);
            }
        }
    }

    // ── Flatten under random churn ─────────────────────────────────

    #[test]
    fn prop_flatten_translation_consistent(
        initial in prop::collection::btree_set(0u64..1000, 1..24),
        remove_picks in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        add_candidates in prop::collection::btree_set(0u64..1000, 0..8),
    ) {
        let mut graph = UpdateGraph::new();
        let col: SparseColumn<i64> = SparseColumn::new();
        for &k in &initial {
            col.set(k, k as i64).unwrap();
        }
        let parent = TableBuilder::new()
            .row_set(RowSet::from_keys(initial.iter().copied()))
            .column("v", Rc::new(col.clone()))
            .refreshing(true)
            .build(&mut graph);
        let flat = flatten(&parent, &mut graph).unwrap();
        let prev_size = initial.len() as u64;

        // Random removed subset and added set disjoint from the initial
        // keys, per the update contract.
        let initial_vec: Vec<u64> = initial.iter().copied().collect();
        let removed: BTreeSet<u64> = remove_picks
            .iter()
            .map(|ix| initial_vec[ix.index(initial_vec.len())])
            .collect();
        let added: BTreeSet<u64> = add_candidates
            .difference(&initial)
            .copied()
            .collect();

        use std::cell::RefCell;
        #[derive(Default)]
        struct Capture(Vec<TableUpdate>);
        impl rilltable::update::TableListener for Capture {
            fn on_update(
                &mut self,
                u: &TableUpdate,
            ) -> Result<(), rilltable::error::RillError> {
                self.0.push(u.clone());
                Ok(())
            }
        }
        let capture = Rc::new(RefCell::new(Capture::default()));
        flat.add_listener(capture.clone());

        graph.begin_cycle().unwrap();
        for &k in &added {
            col.set(k, k as i64).unwrap();
        }
        col.remove(&RowSet::from_keys(removed.iter().copied()));
        let mut update = TableUpdate::empty(parent.modified_column_set());
        update.added = RowSet::from_keys(added.iter().copied());
        update.removed = RowSet::from_keys(removed.iter().copied());
        parent.process_update(update).unwrap();
        graph.end_cycle().unwrap();

        let new_size = parent.size();

        // Row set invariant: the flat view is always [0, size).
        prop_assert_eq!(flat.row_set(), RowSet::flat(new_size));

        let captured = capture.borrow();
        prop_assert_eq!(captured.0.len(), 1);
        let down = &captured.0[0];

        // Shift program minimality (ascending, disjoint, merged).
        down.shifted.validate().unwrap();

        // Shift program consistency: replaying the downstream update
        // over the previous dense space lands on the new dense space.
        let mut dense = RowSet::flat(prev_size);
        dense.remove_row_set(&down.removed);
        dense = down.shifted.apply_to(&dense);
        dense.insert_row_set(&down.added);
        prop_assert_eq!(dense, RowSet::flat(new_size));

        // Flatten correctness: every dense position reads the parent
        // cell at the corresponding parent key.
        let parent_rows = parent.row_set();
        for pos in 0..new_size {
            let via_parent = col.get(parent_rows.get(pos));
            let handle = flat.column("v").unwrap();
            let view = handle
                .as_any()
                .downcast_ref::<rilltable::column::redirected::RedirectedColumn<i64>>()
                .unwrap();
            use rilltable::column::ColumnSource;
            prop_assert_eq!(view.get(pos), via_parent);
        }
    }
}
