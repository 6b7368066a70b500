//! Typed transfer buffers.
//!
//! A [`Chunk`] is a contiguous, bounded buffer used to move column values
//! in and out of the engine in batches. Chunked reads and writes slice
//! ordered key sequences by page boundary, so a chunk never needs to be
//! larger than the configured capacity.

use crate::column::element::Element;
use crate::config::EngineConfig;

/// Default chunk capacity in cells. Embedders can override through
/// [`EngineConfig::chunk_capacity`].
pub const DEFAULT_CHUNK_CAPACITY: usize = 2048;

/// A bounded, contiguous buffer of column values.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    values: Vec<T>,
    capacity: usize,
}

impl<T> Chunk<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Chunk {
            values: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    /// A chunk sized per engine configuration.
    pub fn for_config(config: &EngineConfig) -> Self {
        Self::with_capacity(config.chunk_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Append a value. The chunk's capacity is a hard bound.
    pub fn push(&mut self, value: T) {
        debug_assert!(self.values.len() < self.capacity, "chunk overflow");
        self.values.push(value);
    }

    pub fn get(&self, i: usize) -> Option<&T> {
        self.values.get(i)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// Remaining room before the capacity bound.
    pub fn remaining(&self) -> usize {
        self.capacity - self.values.len()
    }
}

impl<T: Element> Chunk<T> {
    /// Append `n` NULL sentinels.
    pub fn push_nulls(&mut self, n: usize) {
        debug_assert!(self.values.len() + n <= self.capacity, "chunk overflow");
        self.values.extend(std::iter::repeat_n(T::NULL, n));
    }
}

impl<T> Default for Chunk<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Chunk<T> {
    pub fn from_slice(values: &[T]) -> Self {
        Chunk {
            capacity: values.len().max(1),
            values: values.to_vec(),
        }
    }

    /// Append a run of values from a slice.
    pub fn extend_from_slice(&mut self, values: &[T]) {
        debug_assert!(self.values.len() + values.len() <= self.capacity, "chunk overflow");
        self.values.extend_from_slice(values);
    }
}

impl<'a, T> IntoIterator for &'a Chunk<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
