//! Collection handles
//!
//! [`BasicCollection`] is the handle the binary registers for every configured
//! collection. It keeps pending operations in an [`OperationRegistry`], fans
//! changed documents out to local subscribers, and caches metadata read from
//! the slow database.

use crate::arango_client::ArangoDatabase;
use crate::query::QueryExecutor;
use arango_gateway_core::prelude::*;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Creates a collection handle for each configured collection
pub trait CollectionFactory: Send + Sync {
    fn create(
        &self,
        config: &CollectionConfig,
        db: Arc<ArangoDatabase>,
        slow_db: Arc<ArangoDatabase>,
    ) -> Result<Arc<dyn Collection>>;
}

/// Factory for [`BasicCollection`]
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicCollectionFactory;

impl CollectionFactory for BasicCollectionFactory {
    fn create(
        &self,
        config: &CollectionConfig,
        db: Arc<ArangoDatabase>,
        slow_db: Arc<ArangoDatabase>,
    ) -> Result<Arc<dyn Collection>> {
        Ok(Arc::new(BasicCollection::new(config, db, slow_db)))
    }
}

/// An operation waiting to be finished
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub label: String,
    pub created_at: Instant,
}

/// Cached collection metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub count: u64,
}

pub struct BasicCollection {
    name: String,
    doc_type: String,
    db: Arc<ArangoDatabase>,
    slow_db: Arc<ArangoDatabase>,
    executor: QueryExecutor,
    operations: Mutex<OperationRegistry<PendingOperation>>,
    changes: broadcast::Sender<Value>,
    info: RwLock<Option<CollectionInfo>>,
}

impl BasicCollection {
    pub fn new(
        config: &CollectionConfig,
        db: Arc<ArangoDatabase>,
        slow_db: Arc<ArangoDatabase>,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            name: config.name.clone(),
            doc_type: config.doc_type.clone(),
            db,
            slow_db,
            executor: QueryExecutor::new(format!("collection_{}", config.name)),
            operations: Mutex::new(OperationRegistry::new(format!("{}_operations", config.name))),
            changes,
            info: RwLock::new(None),
        }
    }

    /// Primary connection
    pub fn database(&self) -> &Arc<ArangoDatabase> {
        &self.db
    }

    /// Track a new pending operation
    pub fn register_operation(&self, label: impl Into<String>) -> Result<OperationId> {
        let id = self.operations.lock().add(PendingOperation {
            label: label.into(),
            created_at: Instant::now(),
        })?;
        trace!(collection = %self.name, id = %id, "Registered operation");
        Ok(id)
    }

    pub fn pending_operations(&self) -> Vec<(OperationId, PendingOperation)> {
        self.operations.lock().entries()
    }

    /// Receive every document reported as inserted or updated from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.changes.subscribe()
    }

    pub fn cached_info(&self) -> Option<CollectionInfo> {
        self.info.read().clone()
    }

    /// Collection metadata, loaded from the slow database on first use
    pub async fn info(&self) -> std::result::Result<CollectionInfo, QueryError> {
        if let Some(info) = self.cached_info() {
            return Ok(info);
        }

        let args = json!({ "collection": self.name });
        let count = self
            .executor
            .wrap("COLLECTION_INFO", &args, || self.slow_db.collection_count(&self.name))
            .await?;

        let info = CollectionInfo { count };
        *self.info.write() = Some(info.clone());
        debug!(collection = %self.name, count, "Loaded collection info");
        Ok(info)
    }
}

impl Collection for BasicCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn doc_type(&self) -> &str {
        &self.doc_type
    }

    fn on_document_insert_or_update(&self, doc: &Value) {
        // no receivers is fine
        let _ = self.changes.send(doc.clone());
        trace!(collection = %self.name, key = ?doc.get("_key"), "Document changed");
    }

    fn drop_cached_db_info(&self) -> Result<()> {
        if self.info.write().take().is_some() {
            debug!(collection = %self.name, "Dropped cached collection info");
        }
        Ok(())
    }

    fn finish_operations(&self, operation_ids: &HashSet<OperationId>) -> Result<usize> {
        let mut operations = self.operations.lock();
        let mut finished = 0;
        for id in operation_ids {
            if operations.contains(*id) && operations.remove(*id).is_some() {
                finished += 1;
            }
        }
        if finished > 0 {
            debug!(collection = %self.name, finished, "Finished operations");
        }
        Ok(finished)
    }
}
