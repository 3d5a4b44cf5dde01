//! ArangoDB HTTP client
//!
//! One [`ArangoDatabase`] per configured connection. Failures are reported as
//! [`RawError`] so the query executor can clean and classify them.

use arango_gateway_core::prelude::*;
use arango_gateway_core::{DatabaseError, RequestSnapshot, ResponseSnapshot};
use async_trait::async_trait;
use reqwest::{Client, Method, Request, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tracing::{debug, trace};
use url::Url;

/// Connection to one ArangoDB database
pub struct ArangoDatabase {
    client: Client,
    server: Url,
    name: String,
    credentials: Option<Credentials>,
    /// One permit per socket; at most `max_sockets` requests are in flight
    sockets: Semaphore,
}

impl ArangoDatabase {
    /// Create a connection; fails on malformed connection parameters
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let server = config.server_url()?;

        let client = Client::builder()
            .pool_max_idle_per_host(config.max_sockets)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::database_with_source("Failed to create client", e))?;

        debug!(server = %server, database = %config.name, "Created database connection");

        Ok(Self {
            client,
            server,
            name: config.name.clone(),
            credentials: config.credentials(),
            sockets: Semaphore::new(config.max_sockets),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &Url {
        &self.server
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// `<server>/<database>`, the address the change feed subscribes to
    pub fn database_url(&self) -> String {
        format!("{}/{}", self.server.as_str().trim_end_matches('/'), self.name)
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/_db/{}{}",
            self.server.as_str().trim_end_matches('/'),
            self.name,
            path
        )
    }

    /// Build request with authentication
    fn build_request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.client.request(method, self.api_url(path));
        if let Some(ref creds) = self.credentials {
            req = req.basic_auth(&creds.user, Some(&creds.password));
        }
        req
    }

    /// Send a request and decode the JSON body of a successful response
    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
    ) -> std::result::Result<T, RawError> {
        let request = builder.build().map_err(|e| {
            RawError::new(format!("Failed to build request: {}", e.without_url()))
        })?;
        let snapshot = snapshot_request(&request);

        // held until the body has been read
        let _socket = match self.sockets.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(RawError::new("Connection closed").with_request(snapshot)),
        };

        let resp = match self.client.execute(request).await {
            Ok(resp) => resp,
            Err(e) => return Err(transport_error(e, snapshot)),
        };

        let status = resp.status();
        let headers = header_pairs(resp.headers());
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => return Err(transport_error(e, snapshot)),
        };

        if !status.is_success() {
            let mut err = RawError::new(format!("Request failed with {}", status));
            if let Ok(database) = serde_json::from_str::<DatabaseError>(&body) {
                if database.error {
                    err = err.with_database(database);
                }
            }
            return Err(err.with_request(snapshot).with_response(ResponseSnapshot {
                status: status.as_u16(),
                headers,
                body,
            }));
        }

        serde_json::from_str(&body).map_err(|e| {
            RawError::new(format!("Failed to parse response: {}", e))
                .with_request(snapshot)
                .with_response(ResponseSnapshot {
                    status: status.as_u16(),
                    headers,
                    body,
                })
        })
    }

    /// Run an AQL query, returning a cursor over its results
    pub async fn query(
        &self,
        query: &str,
        bind_vars: &Map<String, Value>,
    ) -> std::result::Result<Cursor<'_>, RawError> {
        let body = json!({
            "query": query,
            "bindVars": bind_vars,
        });
        let batch: CursorBatch = self
            .send(self.build_request(Method::POST, "/_api/cursor").json(&body))
            .await?;

        trace!(
            count = batch.result.len(),
            has_more = batch.has_more,
            "Opened cursor"
        );

        Ok(Cursor {
            db: self,
            rows: batch.result,
            id: batch.id,
            has_more: batch.has_more,
        })
    }

    /// Number of documents in a collection
    pub async fn collection_count(&self, collection: &str) -> std::result::Result<u64, RawError> {
        let path = format!("/_api/collection/{}/count", collection);
        let body: Value = self.send(self.build_request(Method::GET, &path)).await?;
        body["count"]
            .as_u64()
            .ok_or_else(|| RawError::new("Malformed collection count response"))
    }

    /// Server version information
    pub async fn version(&self) -> std::result::Result<Value, RawError> {
        self.send(self.build_request(Method::GET, "/_api/version")).await
    }
}

#[async_trait]
impl HealthCheck for ArangoDatabase {
    async fn health_check(&self) -> Result<()> {
        self.version()
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::database_with_source("Health check failed", e.clean()))
    }

    fn component_name(&self) -> &'static str {
        "arango_database"
    }
}

/// Server-side cursor; drain it with [`Cursor::all`]
pub struct Cursor<'a> {
    db: &'a ArangoDatabase,
    rows: Vec<Value>,
    id: Option<String>,
    has_more: bool,
}

impl Cursor<'_> {
    /// Fetch every remaining batch and return all rows in order
    pub async fn all(mut self) -> std::result::Result<Vec<Value>, RawError> {
        while self.has_more {
            let Some(ref id) = self.id else {
                return Err(RawError::new("Cursor has more results but no id"));
            };
            let path = format!("/_api/cursor/{}", id);
            let batch: CursorBatch = self
                .db
                .send(self.db.build_request(Method::PUT, &path))
                .await?;
            self.rows.extend(batch.result);
            self.has_more = batch.has_more;
            if batch.id.is_some() {
                self.id = batch.id;
            }
        }
        Ok(self.rows)
    }
}

#[derive(Debug, Deserialize)]
struct CursorBatch {
    #[serde(default)]
    result: Vec<Value>,
    #[serde(rename = "hasMore", default)]
    has_more: bool,
    #[serde(default)]
    id: Option<String>,
}

fn header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect()
}

fn snapshot_request(request: &Request) -> RequestSnapshot {
    RequestSnapshot {
        method: request.method().to_string(),
        url: request.url().to_string(),
        headers: header_pairs(request.headers()),
    }
}

/// Map a reqwest failure to the driver's shape, marking OS-level faults.
/// The URL is kept in the request snapshot only.
fn transport_error(e: reqwest::Error, request: RequestSnapshot) -> RawError {
    let e = e.without_url();
    let mut raw = RawError::new(e.to_string()).with_request(request);

    if let Some(io) = find_io_error(&e) {
        raw = raw.system().with_code(format!("{:?}", io.kind()));
        if let Some(errno) = io.raw_os_error() {
            let syscall = if e.is_connect() { "connect" } else { "read" };
            raw = raw.with_errno(errno, syscall);
        }
    } else if e.is_connect() || e.is_timeout() {
        raw = raw.system();
    }
    raw
}

fn find_io_error<'a>(e: &'a (dyn std::error::Error + 'static)) -> Option<&'a std::io::Error> {
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return Some(io);
        }
        source = err.source();
    }
    None
}
