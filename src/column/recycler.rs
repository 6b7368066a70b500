//! Buffer pools for transient shadow structures.
//!
//! Previous-value shadows are torn down wholesale at every commit, so the
//! leaves and directory arrays they are built from churn once per cycle.
//! A [`Recycler`] is a bounded pool: returned buffers are retained up to a
//! capacity and handed back out on the next allocation; overflow is
//! dropped, and a drained pool simply allocates fresh buffers. Pools may
//! be shared across columns, so access is serialized.
//!
//! Shadow **value** leaves are pooled dirty: a borrowed leaf still holds
//! whatever the previous cycle wrote, and reads are legal only where the
//! matching in-use bit is set. Shadow **in-use** leaves are zeroed on
//! return so a borrowed bitset starts empty.

use std::sync::Mutex;

/// A bounded pool of reusable buffers.
#[derive(Debug)]
pub struct Recycler<V> {
    pool: Mutex<Vec<V>>,
    capacity: usize,
}

impl<V> Recycler<V> {
    pub fn new(capacity: usize) -> Self {
        Recycler {
            pool: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Take a pooled buffer, or construct one with `make`.
    pub fn borrow_or(&self, make: impl FnOnce() -> V) -> V {
        let pooled = self.pool.lock().expect("recycler poisoned").pop();
        pooled.unwrap_or_else(make)
    }

    /// Return a buffer to the pool; dropped if the pool is full.
    pub fn give_back(&self, value: V) {
        let mut pool = self.pool.lock().expect("recycler poisoned");
        if pool.len() < self.capacity {
            pool.push(value);
        }
    }

    /// Number of buffers currently pooled (diagnostic).
    pub fn pooled(&self) -> usize {
        self.pool.lock().expect("recycler poisoned").len()
    }
}
