//! Tuple sources: compound values over N column sources.
//!
//! A tuple source combines typed columns into one compound value per row,
//! with current and previous variants, element export, and a deterministic
//! 64-bit external key for use as an opaque row identifier. Element export
//! comes in two forms: the domain view ([`Scalar::Instant`],
//! [`Scalar::Bool`]) and the reinterpreted view, where domain-typed
//! values present their raw primitive carrier — instants as `i64`
//! nanoseconds, booleans as `i8` with `false ↔ 0`, `true ↔ 1`,
//! `NULL ↔ -1`.

use std::rc::Rc;

use chrono::{DateTime, Utc};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::chunk::Chunk;
use crate::column::ColumnSource;
use crate::column::element::{
    Element, bool_to_byte, byte_to_bool, instant_to_nanos, nanos_to_instant,
};
use crate::error::RillError;
use crate::rowset::RowKey;

/// Seed for external-key hashing; fixed so keys are deterministic across
/// processes.
const EXTERNAL_KEY_SEED: u64 = 0x517cc1b727220a95;

/// A boxed column value crossing the typed boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Bool(bool),
    Instant(DateTime<Utc>),
    Text(String),
}

/// Elements that can cross the [`Scalar`] boundary.
pub trait ScalarElement: Element {
    /// Domain-view export. NULL sentinels export as [`Scalar::Null`].
    fn to_scalar(&self) -> Scalar;

    /// Inverse of [`to_scalar`](Self::to_scalar).
    fn from_scalar(value: &Scalar) -> Result<Self, RillError>;

    /// Reinterpreted export: domain types present their raw carrier.
    fn to_scalar_reinterpreted(&self) -> Scalar {
        self.to_scalar()
    }

    /// Inverse of [`to_scalar_reinterpreted`](Self::to_scalar_reinterpreted).
    fn from_scalar_reinterpreted(value: &Scalar) -> Result<Self, RillError> {
        Self::from_scalar(value)
    }

    /// Canonical bytes for external-key hashing.
    fn write_key_bytes(&self, out: &mut Vec<u8>);
}

fn mismatch<T>(expected: &str, got: &Scalar) -> Result<T, RillError> {
    Err(RillError::ScalarTypeMismatch(format!(
        "expected {expected}, got {got:?}"
    )))
}

macro_rules! primitive_scalar_element {
    ($ty:ty, $variant:ident, $tag:literal, $to_bytes:expr) => {
        impl ScalarElement for $ty {
            fn to_scalar(&self) -> Scalar {
                if self.is_null() {
                    Scalar::Null
                } else {
                    Scalar::$variant(self.clone())
                }
            }

            fn from_scalar(value: &Scalar) -> Result<Self, RillError> {
                match value {
                    Scalar::Null => Ok(<$ty as Element>::NULL),
                    Scalar::$variant(v) => Ok(v.clone()),
                    other => mismatch(stringify!($variant), other),
                }
            }

            fn write_key_bytes(&self, out: &mut Vec<u8>) {
                out.push($tag);
                #[allow(clippy::redundant_closure_call)]
                out.extend_from_slice(&($to_bytes)(self));
            }
        }
    };
}

primitive_scalar_element!(i8, Byte, 1u8, |v: &i8| v.to_le_bytes());
primitive_scalar_element!(i16, Short, 2u8, |v: &i16| v.to_le_bytes());
primitive_scalar_element!(i32, Int, 3u8, |v: &i32| v.to_le_bytes());
primitive_scalar_element!(i64, Long, 4u8, |v: &i64| v.to_le_bytes());
primitive_scalar_element!(f32, Float, 5u8, |v: &f32| v.to_bits().to_le_bytes());
primitive_scalar_element!(f64, Double, 6u8, |v: &f64| v.to_bits().to_le_bytes());
primitive_scalar_element!(char, Char, 7u8, |v: &char| (*v as u32).to_le_bytes());

impl ScalarElement for Option<String> {
    fn to_scalar(&self) -> Scalar {
        match self {
            Some(s) => Scalar::Text(s.clone()),
            None => Scalar::Null,
        }
    }

    fn from_scalar(value: &Scalar) -> Result<Self, RillError> {
        match value {
            Scalar::Null => Ok(None),
            Scalar::Text(s) => Ok(Some(s.clone())),
            other => mismatch("Text", other),
        }
    }

    fn write_key_bytes(&self, out: &mut Vec<u8>) {
        out.push(8u8);
        if let Some(s) = self {
            out.extend_from_slice(&(s.len() as u64).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        } else {
            out.extend_from_slice(&u64::MAX.to_le_bytes());
        }
    }
}

impl ScalarElement for Option<bool> {
    fn to_scalar(&self) -> Scalar {
        match self {
            Some(b) => Scalar::Bool(*b),
            None => Scalar::Null,
        }
    }

    fn from_scalar(value: &Scalar) -> Result<Self, RillError> {
        match value {
            Scalar::Null => Ok(None),
            Scalar::Bool(b) => Ok(Some(*b)),
            other => mismatch("Bool", other),
        }
    }

    fn to_scalar_reinterpreted(&self) -> Scalar {
        Scalar::Byte(bool_to_byte(*self))
    }

    fn from_scalar_reinterpreted(value: &Scalar) -> Result<Self, RillError> {
        match value {
            Scalar::Null => Ok(None),
            Scalar::Byte(b) => Ok(byte_to_bool(*b)),
            other => mismatch("Byte", other),
        }
    }

    fn write_key_bytes(&self, out: &mut Vec<u8>) {
        out.push(9u8);
        out.push(bool_to_byte(*self) as u8);
    }
}

impl ScalarElement for Option<DateTime<Utc>> {
    fn to_scalar(&self) -> Scalar {
        match self {
            Some(dt) => Scalar::Instant(*dt),
            None => Scalar::Null,
        }
    }

    fn from_scalar(value: &Scalar) -> Result<Self, RillError> {
        match value {
            Scalar::Null => Ok(None),
            Scalar::Instant(dt) => Ok(Some(*dt)),
            other => mismatch("Instant", other),
        }
    }

    fn to_scalar_reinterpreted(&self) -> Scalar {
        Scalar::Long(instant_to_nanos(*self))
    }

    fn from_scalar_reinterpreted(value: &Scalar) -> Result<Self, RillError> {
        match value {
            Scalar::Null => Ok(None),
            Scalar::Long(nanos) => Ok(nanos_to_instant(*nanos)),
            other => mismatch("Long", other),
        }
    }

    fn write_key_bytes(&self, out: &mut Vec<u8>) {
        out.push(10u8);
        out.extend_from_slice(&instant_to_nanos(*self).to_le_bytes());
    }
}

/// Compound-value capability over N columns.
pub trait TupleSource {
    type Tuple;

    fn arity(&self) -> usize;

    /// Tuple of current values at `key`.
    fn create_tuple(&self, key: RowKey) -> Self::Tuple;

    /// Tuple of previous values at `key`.
    fn create_previous_tuple(&self, key: RowKey) -> Self::Tuple;

    /// Build a tuple from domain-view scalars.
    fn create_tuple_from_values(&self, values: &[Scalar]) -> Result<Self::Tuple, RillError>;

    /// Build a tuple from reinterpreted scalars.
    fn create_tuple_from_reinterpreted_values(
        &self,
        values: &[Scalar],
    ) -> Result<Self::Tuple, RillError>;

    /// Export element `index` in domain view.
    fn export_element(&self, tuple: &Self::Tuple, index: usize) -> Result<Scalar, RillError>;

    /// Export element `index` in reinterpreted view.
    fn export_element_reinterpreted(
        &self,
        tuple: &Self::Tuple,
        index: usize,
    ) -> Result<Scalar, RillError>;

    /// Deterministic opaque 64-bit key for the tuple.
    fn export_to_external_key(&self, tuple: &Self::Tuple) -> u64;
}

macro_rules! tuple_source_impl {
    ($name:ident, $arity:literal, $( $T:ident / $idx:tt ),+ ) => {
        pub struct $name<$($T: ScalarElement),+> {
            columns: ($(Rc<dyn ColumnSource<$T>>,)+),
        }

        impl<$($T: ScalarElement),+> $name<$($T),+> {
            pub fn new(columns: ($(Rc<dyn ColumnSource<$T>>,)+)) -> Self {
                $name { columns }
            }

            fn check_arity(&self, len: usize) -> Result<(), RillError> {
                if len != $arity {
                    return Err(RillError::InvalidArgument(format!(
                        "{} values supplied for a tuple of arity {}",
                        len, $arity
                    )));
                }
                Ok(())
            }

            /// Build tuples from parallel chunks, one per column.
            pub fn convert_chunks(
                &self,
                dest: &mut Vec<($($T,)+)>,
                len: usize,
                chunks: ($(&Chunk<$T>,)+),
            ) -> Result<(), RillError> {
                $(
                    if chunks.$idx.len() < len {
                        return Err(RillError::InvalidArgument(format!(
                            "source chunk {} holds {} of {} values",
                            $idx,
                            chunks.$idx.len(),
                            len
                        )));
                    }
                )+
                dest.clear();
                for i in 0..len {
                    dest.push(($(
                        chunks.$idx.as_slice()[i].clone(),
                    )+));
                }
                Ok(())
            }
        }

        impl<$($T: ScalarElement),+> TupleSource for $name<$($T),+> {
            type Tuple = ($($T,)+);

            fn arity(&self) -> usize {
                $arity
            }

            fn create_tuple(&self, key: RowKey) -> Self::Tuple {
                ($(self.columns.$idx.get(key),)+)
            }

            fn create_previous_tuple(&self, key: RowKey) -> Self::Tuple {
                ($(self.columns.$idx.get_prev(key),)+)
            }

            fn create_tuple_from_values(
                &self,
                values: &[Scalar],
            ) -> Result<Self::Tuple, RillError> {
                self.check_arity(values.len())?;
                Ok(($($T::from_scalar(&values[$idx])?,)+))
            }

            fn create_tuple_from_reinterpreted_values(
                &self,
                values: &[Scalar],
            ) -> Result<Self::Tuple, RillError> {
                self.check_arity(values.len())?;
                Ok(($($T::from_scalar_reinterpreted(&values[$idx])?,)+))
            }

            fn export_element(
                &self,
                tuple: &Self::Tuple,
                index: usize,
            ) -> Result<Scalar, RillError> {
                match index {
                    $($idx => Ok(tuple.$idx.to_scalar()),)+
                    _ => Err(RillError::ElementIndexOutOfBounds {
                        index,
                        arity: $arity,
                    }),
                }
            }

            fn export_element_reinterpreted(
                &self,
                tuple: &Self::Tuple,
                index: usize,
            ) -> Result<Scalar, RillError> {
                match index {
                    $($idx => Ok(tuple.$idx.to_scalar_reinterpreted()),)+
                    _ => Err(RillError::ElementIndexOutOfBounds {
                        index,
                        arity: $arity,
                    }),
                }
            }

            fn export_to_external_key(&self, tuple: &Self::Tuple) -> u64 {
                let mut bytes = Vec::with_capacity(16 * $arity);
                $(tuple.$idx.write_key_bytes(&mut bytes);)+
                xxh3_64_with_seed(&bytes, EXTERNAL_KEY_SEED)
            }
        }
    };
}

tuple_source_impl!(TupleSource2, 2usize, A / 0, B / 1);
tuple_source_impl!(TupleSource3, 3usize, A / 0, B / 1, C / 2);
