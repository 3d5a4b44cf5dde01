//! Strategy traits for the ArangoDB gateway
//!
//! These are the seams between the gateway and its collaborators:
//!
//! ```text
//! Lifecycle (start/stop)
//!     │
//!     └── ChangeFeedListener ──uses──► ChangeFeed (transport)
//!                 │                       └── ArangoChangeFeed, in-memory feeds in tests
//!                 └──routes to──► DocumentRouter
//!                                     └── collection registry ──► Collection
//! ```

use crate::config::Credentials;
use crate::error::Result;
use crate::message::ChangeEvent;
use crate::registry::OperationId;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::collections::HashSet;
use std::pin::Pin;
use thiserror::Error;

// ============================================================================
// Lifecycle Management
// ============================================================================

/// Lifecycle management for components
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Start the component
    async fn start(&self) -> Result<()>;

    /// Stop the component and release what it holds.
    ///
    /// May be called even if start() failed.
    async fn stop(&self) -> Result<()>;

    /// Check if the component is running
    fn is_running(&self) -> bool;
}

/// Health check capability
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Returns Ok(()) if healthy, Err with details if not.
    async fn health_check(&self) -> Result<()>;

    /// Get component name for health reporting
    fn component_name(&self) -> &'static str;
}

// ============================================================================
// Collections
// ============================================================================

/// A named document collection owned by the gateway.
///
/// Calls arrive on the listener task and on query paths concurrently; they
/// must return quickly and keep any heavy work internal.
pub trait Collection: Send + Sync {
    /// Unique name used for routing
    fn name(&self) -> &str;

    /// Document type tag
    fn doc_type(&self) -> &str;

    /// Update internal state for a changed document
    fn on_document_insert_or_update(&self, doc: &Value);

    /// Invalidate cached schema/collection metadata
    fn drop_cached_db_info(&self) -> Result<()>;

    /// Complete the operations this collection recognizes among `operation_ids`,
    /// returning how many it completed
    fn finish_operations(&self, operation_ids: &HashSet<OperationId>) -> Result<usize>;
}

/// Routes change events to collections by name
pub trait DocumentRouter: Send + Sync {
    /// Names to subscribe to, in registration order
    fn collection_names(&self) -> Vec<String>;

    /// Forward `doc` to the named collection; unknown names are ignored
    fn on_document_insert_or_update(&self, collection: &str, doc: &Value);
}

// ============================================================================
// Change Feed Transport
// ============================================================================

/// Stream of change events from one subscription
pub type FeedStream =
    Pin<Box<dyn Stream<Item = std::result::Result<ChangeEvent, FeedError>> + Send>>;

/// Everything needed to open one subscription
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRequest {
    /// Database URL (`<server>/<database>`)
    pub url: String,
    pub credentials: Option<Credentials>,
    /// Collections to subscribe to
    pub collections: Vec<String>,
}

/// Transport failure reported by the feed: the error, HTTP status, headers
/// and body as delivered on the wire
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FeedError {
    pub message: String,
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl FeedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_response(
        mut self,
        status: u16,
        headers: Vec<(String, String)>,
        body: impl Into<String>,
    ) -> Self {
        self.status = Some(status);
        self.headers = headers;
        self.body = Some(body.into());
        self
    }

    /// The body parsed as JSON when possible, otherwise the raw message
    pub fn details(&self) -> Value {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
            .unwrap_or_else(|| Value::String(self.message.clone()))
    }
}

/// Change feed transport strategy
///
/// Each call opens a fresh streaming connection; dropping the returned
/// stream closes it. The stream ends with at most one error.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, request: &FeedRequest) -> std::result::Result<FeedStream, FeedError>;
}
