//! Error types for rilltable.
//!
//! All errors that can occur within the engine are represented by
//! [`RillError`]. Errors are propagated via `Result<T, RillError>`
//! throughout the codebase; nothing is swallowed.
//!
//! # Error Classification
//!
//! Errors are classified into three categories:
//! - **Misuse** — a capability contract was broken (double-arm of
//!   previous-value tracking, an upstream update that violates its own
//!   invariants, a malformed shift program). Fatal for the cycle.
//! - **Argument** — an invalid argument at a single call site (reserved
//!   row key on a write, tuple element index out of range). The cycle may
//!   continue if the caller recovers before mutating anything.
//! - **Internal** — bugs. Fatal.
//!
//! Recovery is the responsibility of the surrounding scheduler: an error
//! raised inside an update cycle aborts the cycle, and previous-value
//! state from the aborted cycle is discarded without commit (see
//! [`crate::clock::UpdateGraph::abort_cycle`]).

use std::fmt;

/// Primary error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum RillError {
    // ── Misuse errors — contract violations, fatal for the cycle ────────
    /// `start_tracking_prev_values` was called twice on the same column.
    #[error("previous-value tracking already started for column source")]
    TrackingAlreadyStarted,

    /// An `Update` broke the invariants of its producing table.
    #[error("update contract violation: {0}")]
    UpdateContractViolation(String),

    /// A shift program was out of order, overlapping, or reordering.
    #[error("invalid shift data: {0}")]
    InvalidShiftData(String),

    /// A cycle operation was issued in the wrong clock phase.
    #[error("update cycle already in progress")]
    CycleInProgress,

    /// A commit or abort was issued with no cycle open.
    #[error("no update cycle in progress")]
    NoCycleInProgress,

    // ── Argument errors — bad input at a single call site ────────────────
    /// A row key outside the valid domain was passed to a write.
    #[error("row key {0} is reserved and cannot be written")]
    ReservedRowKey(u64),

    /// A key was not present in the row set it was inverted against.
    #[error("row key {0} not found in row set")]
    KeyNotFound(u64),

    /// A tuple accessor was given an element index out of range.
    #[error("element index {index} out of bounds for tuple of arity {arity}")]
    ElementIndexOutOfBounds { index: usize, arity: usize },

    /// A scalar value of the wrong kind was supplied to a tuple factory.
    #[error("scalar type mismatch: {0}")]
    ScalarTypeMismatch(String),

    /// An invalid argument was provided to an API function.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Internal errors — should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Classification of error kind for monitoring and cycle handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RillErrorKind {
    Misuse,
    Argument,
    Internal,
}

impl fmt::Display for RillErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RillErrorKind::Misuse => write!(f, "MISUSE"),
            RillErrorKind::Argument => write!(f, "ARGUMENT"),
            RillErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl RillError {
    /// Classify the error.
    pub fn kind(&self) -> RillErrorKind {
        match self {
            RillError::TrackingAlreadyStarted
            | RillError::UpdateContractViolation(_)
            | RillError::InvalidShiftData(_)
            | RillError::CycleInProgress
            | RillError::NoCycleInProgress => RillErrorKind::Misuse,

            RillError::ReservedRowKey(_)
            | RillError::KeyNotFound(_)
            | RillError::ElementIndexOutOfBounds { .. }
            | RillError::ScalarTypeMismatch(_)
            | RillError::InvalidArgument(_) => RillErrorKind::Argument,

            RillError::InternalError(_) => RillErrorKind::Internal,
        }
    }

    /// Whether this error must abort the enclosing update cycle.
    ///
    /// Misuse and internal errors are fatal; the cycle's previous-value
    /// state must be discarded without commit. Argument errors raised
    /// before any mutation leave the cycle intact.
    pub fn is_fatal_for_cycle(&self) -> bool {
        !matches!(self.kind(), RillErrorKind::Argument)
    }
}
