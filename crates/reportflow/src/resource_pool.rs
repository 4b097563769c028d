//! Per-execution scratch store shared across PTAV iterations.
//!
//! Keeping schema snapshots, time windows and SQL drafts in an order-preserving
//! keyed pool instead of re-embedding them in every prompt is what keeps the
//! prompt small as the loop iterates (§4.3, §4.4). Values are a closed enum
//! rather than `Box<dyn Any>` since the set of shapes placed here is fixed.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::model::Observation;

/// One of the fixed shapes the pool can hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ResourceValue {
    /// Table/column listing returned by `schema.list_tables`/`schema.get_columns`.
    SchemaSnapshot(serde_json::Value),
    /// A resolved `(start, end)` time window.
    TimeWindow { start: String, end: String },
    /// A candidate SQL string produced by the planner or `sql.refine`.
    SqlDraft(String),
    /// A tool call's result, kept for later reference via `$obs.<id>.<path>`.
    Observation(Observation),
    /// Anything else representable as JSON (chart specs, etc).
    Json(serde_json::Value),
}

/// Order-preserving, thread-safe scratch store scoped to one execution.
#[derive(Debug, Default)]
pub struct ResourcePool {
    entries: RwLock<IndexMap<String, ResourceValue>>,
}

impl ResourcePool {
    /// Construct an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Insert or overwrite a value under `key`, preserving insertion order for
    /// first-time keys.
    pub fn put(&self, key: impl Into<String>, value: ResourceValue) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.into(), value);
    }

    /// Fetch a clone of the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ResourceValue> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(key).cloned()
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order, for building a compact prompt summary.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Resolve a `$obs.<id>.<path>` style reference against a stored
    /// `Observation`'s JSON result. Returns `None` if the key is missing, not
    /// an observation, or the path does not resolve.
    #[must_use]
    pub fn resolve_reference(&self, key: &str, path: &str) -> Option<serde_json::Value> {
        let value = self.get(key)?;
        let ResourceValue::Observation(obs) = value else {
            return None;
        };
        let mut cursor = &obs.result;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            cursor = match segment.parse::<usize>() {
                Ok(idx) => cursor.as_array()?.get(idx)?,
                Err(_) => cursor.as_object()?.get(segment)?,
            };
        }
        Some(cursor.clone())
    }
}
