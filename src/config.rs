//! Engine configuration.
//!
//! A single [`EngineConfig`] value carries the tunables that affect memory
//! reuse and contract checking. The defaults are suitable for general use;
//! embedders that run many columns in one process may want to raise the
//! pool capacities, and test harnesses should leave `validate_updates` on.

use serde::{Deserialize, Serialize};

/// Tunables for the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Maximum number of shadow value leaves retained per recycler pool.
    ///
    /// Leaves beyond this count are dropped on commit instead of pooled;
    /// a drained pool simply allocates fresh buffers.
    pub leaf_pool_capacity: usize,

    /// Maximum number of shadow directory arrays retained per level pool.
    pub directory_pool_capacity: usize,

    /// Default capacity (in cells) of transfer chunks created by the
    /// chunked-access helpers.
    pub chunk_capacity: usize,

    /// Whether update translation validates upstream updates against the
    /// producing table's row sets before consuming them.
    ///
    /// Violations surface as fatal contract errors. Disabling this skips
    /// an O(update size) check per cycle; the translation itself is then
    /// undefined for contract-breaking inputs.
    pub validate_updates: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            leaf_pool_capacity: 1024,
            directory_pool_capacity: 64,
            chunk_capacity: 2048,
            validate_updates: true,
        }
    }
}

impl EngineConfig {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
