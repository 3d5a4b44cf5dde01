//! Opaque handle registry for pending operations

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Largest integer a JSON client can represent exactly (2^53 - 1)
pub const MAX_OPERATION_ID: u64 = 9_007_199_254_740_991;

/// Opaque handle issued by [`OperationRegistry::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OperationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Issues ids that are unique among the currently held ones.
///
/// Ids grow by one from the last issued id and wrap from `max_id` back to 1;
/// an id is handed out again only after the counter wraps around to it while
/// it is free.
#[derive(Debug)]
pub struct OperationRegistry<T> {
    name: String,
    last_id: u64,
    max_id: u64,
    items: HashMap<OperationId, T>,
}

impl<T> OperationRegistry<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_max_id(name, MAX_OPERATION_ID)
    }

    /// Registry whose ids wrap after `max_id`
    pub fn with_max_id(name: impl Into<String>, max_id: u64) -> Self {
        Self {
            name: name.into(),
            last_id: 0,
            max_id: max_id.max(1),
            items: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `item` under the next free id.
    ///
    /// Fails only when every id in `1..=max_id` is held.
    pub fn add(&mut self, item: T) -> Result<OperationId> {
        if self.items.len() as u64 >= self.max_id {
            return Err(GatewayError::ResourceExhausted {
                resource: format!("{} ids", self.name),
            });
        }

        let mut id = self.last_id;
        loop {
            id = if id < self.max_id { id + 1 } else { 1 };
            if !self.items.contains_key(&OperationId(id)) {
                break;
            }
        }

        self.last_id = id;
        self.items.insert(OperationId(id), item);
        Ok(OperationId(id))
    }

    /// Drop the entry for `id`; unknown ids only produce a warning
    pub fn remove(&mut self, id: OperationId) -> Option<T> {
        let removed = self.items.remove(&id);
        if removed.is_none() {
            warn!(
                registry = %self.name,
                id = id.get(),
                "Failed to remove item: id does not exist"
            );
        }
        removed
    }

    pub fn get(&self, id: OperationId) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: OperationId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> OperationRegistry<T> {
    /// Snapshot of all entries, ordered by id
    pub fn entries(&self) -> Vec<(OperationId, T)> {
        let mut entries: Vec<_> = self
            .items
            .iter()
            .map(|(id, item)| (*id, item.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Snapshot of all items, ordered by id
    pub fn values(&self) -> Vec<T> {
        self.entries().into_iter().map(|(_, item)| item).collect()
    }
}
