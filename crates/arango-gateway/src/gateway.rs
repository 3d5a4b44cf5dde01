//! Database gateway
//!
//! Owns the two database connections, the collection handles and the change
//! feed listener. Queries go straight to the primary connection through the
//! [`QueryExecutor`]; `finish_operations` and `drop_cached_db_info` fan out to
//! every collection in registration order and stop at the first failure.

use crate::arango_client::ArangoDatabase;
use crate::collection::CollectionFactory;
use crate::feed::{ArangoChangeFeed, ArangoChangeFeedConfig};
use crate::listener::{ChangeFeedListener, FeedTarget, ListenerState};
use crate::query::QueryExecutor;
use arango_gateway_core::prelude::*;
use arango_gateway_core::{ErrorContext, ErrorContextExt};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// Collection registry
// ============================================================================

/// Collections by name, in registration order; read-only after construction
pub struct CollectionRegistry {
    collections: Vec<Arc<dyn Collection>>,
    by_name: HashMap<String, usize>,
}

impl CollectionRegistry {
    /// Fails when two collections share a name
    pub fn new(collections: Vec<Arc<dyn Collection>>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(collections.len());
        for (idx, collection) in collections.iter().enumerate() {
            if by_name.insert(collection.name().to_string(), idx).is_some() {
                return Err(GatewayError::config(format!(
                    "Duplicate collection name: {}",
                    collection.name()
                )));
            }
        }
        Ok(Self {
            collections,
            by_name,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Collection>> {
        self.by_name.get(name).map(|&idx| &self.collections[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Collection>> {
        self.collections.iter()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl DocumentRouter for CollectionRegistry {
    fn collection_names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name().to_string()).collect()
    }

    fn on_document_insert_or_update(&self, collection: &str, doc: &Value) {
        match self.get(collection) {
            Some(c) => c.on_document_insert_or_update(doc),
            None => debug!(collection, "Ignoring change for unknown collection"),
        }
    }
}

// ============================================================================
// Gateway
// ============================================================================

pub struct Gateway {
    config: GatewayConfig,
    db: Arc<ArangoDatabase>,
    slow_db: Arc<ArangoDatabase>,
    collections: Arc<CollectionRegistry>,
    feed: Arc<dyn ChangeFeed>,
    listener: Mutex<Option<Arc<ChangeFeedListener>>>,
    executor: QueryExecutor,
}

impl Gateway {
    /// Open both connections and create one handle per configured collection
    pub fn new(config: GatewayConfig, factory: &dyn CollectionFactory) -> Result<Self> {
        let feed = ArangoChangeFeed::new(ArangoChangeFeedConfig {
            idle_poll_interval: config.listener.idle_poll_interval,
            request_timeout: config.database.request_timeout,
        })?;
        Self::with_change_feed(config, factory, Arc::new(feed))
    }

    /// Like [`Gateway::new`] with a custom change feed transport
    pub fn with_change_feed(
        config: GatewayConfig,
        factory: &dyn CollectionFactory,
        feed: Arc<dyn ChangeFeed>,
    ) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(ArangoDatabase::new(&config.database)?);
        let slow_db = Arc::new(ArangoDatabase::new(&config.slow_database)?);

        let collections = config
            .collections
            .iter()
            .map(|c| factory.create(c, db.clone(), slow_db.clone()))
            .collect::<Result<Vec<_>>>()?;
        let collections = Arc::new(CollectionRegistry::new(collections)?);

        info!(
            database = %db.database_url(),
            slow_database = %slow_db.database_url(),
            collections = collections.len(),
            "Gateway created"
        );

        Ok(Self {
            config,
            db,
            slow_db,
            collections,
            feed,
            listener: Mutex::new(None),
            executor: QueryExecutor::new("gateway"),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Primary connection
    pub fn database(&self) -> &Arc<ArangoDatabase> {
        &self.db
    }

    /// Secondary connection for heavy reads
    pub fn slow_database(&self) -> &Arc<ArangoDatabase> {
        &self.slow_db
    }

    pub fn collection(&self, name: &str) -> Option<&Arc<dyn Collection>> {
        self.collections.get(name)
    }

    pub fn collections(&self) -> &CollectionRegistry {
        &self.collections
    }

    /// Current listener status; `Stopped` before the first start
    pub fn listener_state(&self) -> ListenerState {
        self.listener
            .lock()
            .as_ref()
            .map(|l| l.state())
            .unwrap_or(ListenerState::Stopped)
    }

    /// Run an AQL query against the primary connection and return every row
    pub async fn query(
        &self,
        query: &str,
        bind_vars: Map<String, Value>,
    ) -> std::result::Result<Vec<Value>, QueryError> {
        let args = json!({ "query": query, "bindVars": &bind_vars });
        self.executor
            .wrap("QUERY", &args, || async {
                self.db.query(query, &bind_vars).await?.all().await
            })
            .await
    }

    /// Ask every collection to finish the operations it holds among `ids`
    pub fn finish_operations(&self, ids: &HashSet<OperationId>) -> Result<usize> {
        let mut finished = 0;
        for collection in self.collections.iter() {
            finished += collection.finish_operations(ids).with_context(
                ErrorContext::new("gateway", "finish_operations")
                    .with_collection(collection.name()),
            )?;
        }
        Ok(finished)
    }

    /// Invalidate cached metadata in every collection
    pub fn drop_cached_db_info(&self) -> Result<()> {
        for collection in self.collections.iter() {
            collection.drop_cached_db_info().with_context(
                ErrorContext::new("gateway", "drop_cached_db_info")
                    .with_collection(collection.name()),
            )?;
        }
        Ok(())
    }

    /// Forward a changed document to the named collection
    pub fn on_document_insert_or_update(&self, collection: &str, doc: &Value) {
        self.collections.on_document_insert_or_update(collection, doc);
    }
}

#[async_trait]
impl Lifecycle for Gateway {
    /// Subscribe to the primary database's change feed, replacing any
    /// previous listener
    async fn start(&self) -> Result<()> {
        let previous = self.listener.lock().take();
        if let Some(previous) = previous {
            previous.stop().await?;
        }

        let listener = Arc::new(ChangeFeedListener::new(
            self.feed.clone(),
            self.collections.clone(),
            FeedTarget {
                url: self.db.database_url(),
                credentials: self.db.credentials().cloned(),
            },
            self.config.listener.restart_timeout,
        ));
        listener.start().await?;
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.stop().await?;
        }
        info!("Gateway stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .map(|l| l.is_running())
            .unwrap_or(false)
    }
}

#[async_trait]
impl HealthCheck for Gateway {
    async fn health_check(&self) -> Result<()> {
        self.db.health_check().await?;
        self.slow_db.health_check().await
    }

    fn component_name(&self) -> &'static str {
        "gateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::BasicCollectionFactory;
    use crate::test_support::{free_address, spawn_server};
    use arango_gateway_core::FeedStream;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Collection that holds a fixed set of ids and records calls
    struct FakeCollection {
        name: String,
        held: Mutex<HashSet<OperationId>>,
        fail: bool,
        docs: Mutex<Vec<Value>>,
        calls: Arc<AtomicUsize>,
    }

    impl Collection for FakeCollection {
        fn name(&self) -> &str {
            &self.name
        }

        fn doc_type(&self) -> &str {
            "Fake"
        }

        fn on_document_insert_or_update(&self, doc: &Value) {
            self.docs.lock().push(doc.clone());
        }

        fn drop_cached_db_info(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GatewayError::collection(&self.name, "metadata unavailable"));
            }
            Ok(())
        }

        fn finish_operations(&self, ids: &HashSet<OperationId>) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GatewayError::collection(&self.name, "finish failed"));
            }
            let mut held = self.held.lock();
            let before = held.len();
            held.retain(|id| !ids.contains(id));
            Ok(before - held.len())
        }
    }

    struct FakeFactory {
        held: HashMap<String, Vec<u64>>,
        failing: HashSet<String>,
        calls: Arc<AtomicUsize>,
        created: Mutex<Vec<Arc<FakeCollection>>>,
    }

    impl FakeFactory {
        fn new(failing: &[&str]) -> Self {
            Self {
                held: HashMap::new(),
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Arc::new(AtomicUsize::new(0)),
                created: Mutex::new(Vec::new()),
            }
        }

        fn holding(mut self, name: &str, ids: &[u64]) -> Self {
            self.held.insert(name.to_string(), ids.to_vec());
            self
        }

        fn docs(&self, name: &str) -> Vec<Value> {
            self.created
                .lock()
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.docs.lock().clone())
                .unwrap_or_default()
        }
    }

    impl CollectionFactory for FakeFactory {
        fn create(
            &self,
            config: &CollectionConfig,
            _db: Arc<ArangoDatabase>,
            _slow_db: Arc<ArangoDatabase>,
        ) -> Result<Arc<dyn Collection>> {
            let held = self
                .held
                .get(&config.name)
                .map(|ids| ids.iter().copied().map(OperationId::new).collect())
                .unwrap_or_default();
            let collection = Arc::new(FakeCollection {
                name: config.name.clone(),
                held: Mutex::new(held),
                fail: self.failing.contains(&config.name),
                docs: Mutex::new(Vec::new()),
                calls: self.calls.clone(),
            });
            self.created.lock().push(collection.clone());
            Ok(collection)
        }
    }

    /// Feed that stays silent and counts subscriptions
    #[derive(Default)]
    struct SilentFeed {
        requests: Mutex<Vec<FeedRequest>>,
    }

    #[async_trait]
    impl ChangeFeed for SilentFeed {
        async fn subscribe(
            &self,
            request: &FeedRequest,
        ) -> std::result::Result<FeedStream, FeedError> {
            self.requests.lock().push(request.clone());
            Ok(Box::pin(stream::pending()))
        }
    }

    fn config(server: &str, collections: &[&str]) -> GatewayConfig {
        let db = DatabaseConfig {
            server: server.to_string(),
            name: "blockchain".into(),
            auth: Some("root:secret".into()),
            ..Default::default()
        };
        GatewayConfig {
            database: db.clone(),
            slow_database: db,
            collections: collections
                .iter()
                .map(|name| CollectionConfig::new(*name, "Fake"))
                .collect(),
            ..Default::default()
        }
    }

    fn ids(raw: &[u64]) -> HashSet<OperationId> {
        raw.iter().copied().map(OperationId::new).collect()
    }

    #[test]
    fn test_construct_rejects_bad_config() {
        let factory = BasicCollectionFactory;
        assert!(Gateway::new(config("http://[::1", &["blocks"]), &factory).is_err());
        assert!(Gateway::new(config("arangodb:8529", &["blocks", "blocks"]), &factory).is_err());

        let mut cfg = config("arangodb:8529", &["blocks"]);
        cfg.slow_database.max_sockets = 0;
        assert!(Gateway::new(cfg, &factory).is_err());
    }

    #[test]
    fn test_construct_creates_handle_per_collection() {
        let cfg = config("arangodb:8529", &["blocks", "accounts"]);
        let gateway = Gateway::new(cfg, &BasicCollectionFactory).unwrap();
        assert_eq!(gateway.collections().collection_names(), vec!["blocks", "accounts"]);
        assert_eq!(gateway.collection("blocks").unwrap().doc_type(), "Fake");
        assert!(gateway.collection("messages").is_none());
        assert_eq!(gateway.database().database_url(), "http://arangodb:8529/blockchain");
        assert_eq!(gateway.listener_state(), ListenerState::Stopped);
    }

    #[test]
    fn test_finish_operations_sums_over_collections() {
        let factory = FakeFactory::new(&[]).holding("a", &[1, 2]).holding("b", &[3]);
        let gateway = Gateway::new(config("arangodb:8529", &["a", "b"]), &factory).unwrap();

        assert_eq!(gateway.finish_operations(&ids(&[1, 2, 3])).unwrap(), 3);
        assert_eq!(gateway.finish_operations(&ids(&[1, 2, 3])).unwrap(), 0);
        assert_eq!(gateway.finish_operations(&HashSet::new()).unwrap(), 0);
    }

    #[test]
    fn test_fan_out_stops_at_first_failure() {
        let factory = FakeFactory::new(&["b"]).holding("a", &[1]).holding("c", &[2]);
        let gateway = Gateway::new(config("arangodb:8529", &["a", "b", "c"]), &factory).unwrap();

        let err = gateway.finish_operations(&ids(&[1, 2])).unwrap_err();
        assert!(err.to_string().contains("finish failed"));
        // "a" and "b" were asked, "c" never was
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);

        let err = gateway.drop_cached_db_info().unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Collection { ref collection, .. } if collection == "b"
        ));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_routing_ignores_unknown_collections() {
        let factory = FakeFactory::new(&[]);
        let cfg = config("arangodb:8529", &["blocks", "accounts"]);
        let gateway = Gateway::new(cfg, &factory).unwrap();

        gateway.on_document_insert_or_update("blocks", &json!({ "_key": "b1" }));
        gateway.on_document_insert_or_update("unknown", &json!({ "_key": "x" }));

        assert_eq!(factory.docs("blocks"), vec![json!({ "_key": "b1" })]);
        assert!(factory.docs("accounts").is_empty());
    }

    #[tokio::test]
    async fn test_start_subscribes_every_collection() {
        let feed = Arc::new(SilentFeed::default());
        let gateway = Gateway::with_change_feed(
            config("arangodb:8529", &["blocks", "accounts"]),
            &FakeFactory::new(&[]),
            feed.clone(),
        )
        .unwrap();

        gateway.start().await.unwrap();
        assert!(gateway.is_running());
        let waited = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while gateway.listener_state() != ListenerState::Listening {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok());

        // a second start replaces the listener
        gateway.start().await.unwrap();
        gateway.stop().await.unwrap();
        assert!(!gateway.is_running());

        let requests = feed.requests.lock().clone();
        assert!(!requests.is_empty());
        assert_eq!(requests[0].url, "http://arangodb:8529/blockchain");
        assert_eq!(requests[0].collections, vec!["blocks", "accounts"]);
        assert_eq!(requests[0].credentials.as_ref().unwrap().password, "secret");
    }

    #[tokio::test]
    async fn test_query_returns_rows() {
        let router = Router::new().route(
            "/_db/blockchain/_api/cursor",
            post(|Json(body): Json<Value>| async move {
                let n = body["bindVars"]["n"].as_i64().unwrap_or(0);
                Json(json!({ "result": [n, n + 1], "hasMore": false }))
            }),
        );
        let server = spawn_server(router).await;
        let gateway = Gateway::new(config(&server, &["blocks"]), &BasicCollectionFactory).unwrap();

        let mut bind_vars = Map::new();
        bind_vars.insert("n".into(), json!(7));
        let rows = gateway
            .query("FOR i IN @n..@n+1 RETURN i", bind_vars)
            .await
            .unwrap();
        assert_eq!(rows, vec![json!(7), json!(8)]);
    }

    #[tokio::test]
    async fn test_query_failures_are_classified() {
        let router = Router::new().route(
            "/_db/blockchain/_api/cursor",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": true,
                        "code": 400,
                        "errorNum": 1501,
                        "errorMessage": "syntax error"
                    })),
                )
            }),
        );
        let server = spawn_server(router).await;
        let gateway = Gateway::new(config(&server, &["blocks"]), &BasicCollectionFactory).unwrap();
        let err = gateway.query("FOR", Map::new()).await.unwrap_err();
        assert_eq!(err.code(), Some(1501));

        let down_config = config(&free_address().await, &["blocks"]);
        let down = Gateway::new(down_config, &BasicCollectionFactory).unwrap();
        let err = down.query("RETURN 1", Map::new()).await.unwrap_err();
        assert!(err.as_domain().unwrap().is_service_unavailable());
        assert!(down.health_check().await.is_err());
    }
}
