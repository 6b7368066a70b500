//! Column element types and NULL sentinels.
//!
//! Every storable element type designates one in-band NULL sentinel, so a
//! cell read from an unallocated page and a cell explicitly set to NULL
//! are indistinguishable. Reference elements are `Option<T>` with `None`
//! as the null reference.
//!
//! Domain-typed values ride on primitive carriers: instants are stored as
//! `i64` nanoseconds since the epoch, and booleans as `i8` with
//! `false ↔ 0`, `true ↔ 1`, `NULL ↔ -1`. The helpers at the bottom of
//! this module convert in both directions.

use chrono::{DateTime, TimeZone, Utc};

/// A value storable in a column cell.
pub trait Element: Clone + PartialEq + std::fmt::Debug + 'static {
    /// The in-band sentinel meaning "no value".
    const NULL: Self;

    fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

/// NULL sentinel for `i8` columns (and reinterpreted booleans).
pub const NULL_BYTE: i8 = i8::MIN;
/// NULL sentinel for `i16` columns.
pub const NULL_SHORT: i16 = i16::MIN;
/// NULL sentinel for `i32` columns.
pub const NULL_INT: i32 = i32::MIN;
/// NULL sentinel for `i64` columns (and reinterpreted instants).
pub const NULL_LONG: i64 = i64::MIN;
/// NULL sentinel for `f32` columns.
pub const NULL_FLOAT: f32 = -f32::MAX;
/// NULL sentinel for `f64` columns.
pub const NULL_DOUBLE: f64 = -f64::MAX;
/// NULL sentinel for `char` columns.
pub const NULL_CHAR: char = '\u{FFFE}';

impl Element for i8 {
    const NULL: Self = NULL_BYTE;
}

impl Element for i16 {
    const NULL: Self = NULL_SHORT;
}

impl Element for i32 {
    const NULL: Self = NULL_INT;
}

impl Element for i64 {
    const NULL: Self = NULL_LONG;
}

impl Element for f32 {
    const NULL: Self = NULL_FLOAT;
}

impl Element for f64 {
    const NULL: Self = NULL_DOUBLE;
}

impl Element for char {
    const NULL: Self = NULL_CHAR;
}

/// Reference elements: the dedicated null reference is `None`.
impl<T: Clone + PartialEq + std::fmt::Debug + 'static> Element for Option<T> {
    const NULL: Self = None;
}

// ── Boolean reinterpretation ───────────────────────────────────────────────

/// Byte carrier for a nullable boolean.
pub fn bool_to_byte(value: Option<bool>) -> i8 {
    match value {
        Some(false) => 0,
        Some(true) => 1,
        None => -1,
    }
}

/// Inverse of [`bool_to_byte`]. Any negative byte reads as NULL.
pub fn byte_to_bool(value: i8) -> Option<bool> {
    match value {
        0 => Some(false),
        v if v > 0 => Some(true),
        _ => None,
    }
}

// ── Instant reinterpretation ───────────────────────────────────────────────

/// Nanosecond carrier for a nullable instant.
pub fn instant_to_nanos(value: Option<DateTime<Utc>>) -> i64 {
    match value {
        Some(dt) => dt.timestamp_nanos_opt().unwrap_or(NULL_LONG),
        None => NULL_LONG,
    }
}

/// Inverse of [`instant_to_nanos`]. The long NULL sentinel reads as NULL.
pub fn nanos_to_instant(nanos: i64) -> Option<DateTime<Utc>> {
    if nanos == NULL_LONG {
        None
    } else {
        Some(Utc.timestamp_nanos(nanos))
    }
}
