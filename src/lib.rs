//! rilltable — an incremental columnar table engine core.
//!
//! The engine maintains tables whose contents change in discrete update
//! cycles, and propagates each change downstream as a compact
//! [`TableUpdate`](update::TableUpdate): rows added, removed, modified,
//! and shifted, plus the set of columns whose values may have changed.
//!
//! Three subsystems cooperate:
//!
//! - **Sparse column stores** ([`column::sparse`]): unbounded, sparsely
//!   populated typed columns over a 64-bit row-key space, with
//!   copy-on-write previous-value capture scoped to the active cycle.
//! - **The flatten operation** ([`flatten`]): a dense `[0, N)` view over
//!   an arbitrary row-key space, translating upstream updates into the
//!   dense space with a minimal program of range shifts.
//! - **Update propagation** ([`update`], [`clock`], [`table`]): plain
//!   immutable update records, single-threaded listener delivery in
//!   parent-before-child order, and an update clock whose commit point
//!   recycles all per-cycle shadow state.
//!
//! # Theoretical Basis
//!
//! - **Gupta & Mumick (1995)**: "Maintenance of Materialized Views:
//!   Problems, Techniques, and Applications", IEEE Data Engineering
//!   Bulletin — the incremental-maintenance framing.
//! - **DBSP**: Budiu et al., "DBSP: Automatic Differential View
//!   Maintenance for Rich Query Languages", PVLDB 2023.
//!   <https://arxiv.org/abs/2203.16684>

pub mod chunk;
pub mod clock;
pub mod column;
pub mod config;
pub mod error;
pub mod flatten;
pub mod rowset;
pub mod shift;
pub mod table;
pub mod tuples;
pub mod update;

pub use chunk::Chunk;
pub use clock::{CycleCommitter, CyclePhase, UpdateGraph};
pub use column::element::Element;
pub use column::sparse::{SparseColumn, SparseColumnStore};
pub use column::{AnyColumn, ColumnSource, WritableColumnSource};
pub use config::EngineConfig;
pub use error::{RillError, RillErrorKind};
pub use flatten::{flatten, flatten_with};
pub use rowset::{NULL_ROW_KEY, RowKey, RowSet, TrackingRowSet};
pub use shift::{RowSetShiftData, ShiftBuilder};
pub use table::{AttributeCopyOp, Table, TableAttribute, TableBuilder};
pub use update::{ModifiedColumnSet, TableListener, TableUpdate};
