//! Message types flowing from the change feed to collections

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of a document change as reported on the feed wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    /// The feed could not tell an insert from an update
    InsertOrUpdate,
    Delete,
    /// Anything the listener does not understand
    Other(String),
}

impl ChangeKind {
    /// Parse the wire name (`insert`, `update`, `insert/update`, `delete`)
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "insert/update" => Self::InsertOrUpdate,
            "delete" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::InsertOrUpdate => "insert/update",
            Self::Delete => "delete",
            Self::Other(kind) => kind,
        }
    }

    /// Kinds routed to `on_document_insert_or_update`
    pub fn is_insert_or_update(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::InsertOrUpdate)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One document change, produced and consumed within a routing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Owning collection name
    pub collection: String,
    /// Raw document payload
    pub document: Value,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(collection: impl Into<String>, document: Value, kind: ChangeKind) -> Self {
        Self {
            collection: collection.into(),
            document,
            kind,
        }
    }

    /// Convenience for insert events
    pub fn insert(collection: impl Into<String>, document: Value) -> Self {
        Self::new(collection, document, ChangeKind::Insert)
    }

    /// Convenience for update events
    pub fn update(collection: impl Into<String>, document: Value) -> Self {
        Self::new(collection, document, ChangeKind::Update)
    }

    /// Document `_key`, if the payload has one
    pub fn key(&self) -> Option<&str> {
        self.document.get("_key").and_then(Value::as_str)
    }
}
