//! Change feed over the ArangoDB replication logger
//!
//! A subscription reads the logger state once for the current tick, then
//! long-polls `logger-follow` from that tick. Insert/update markers (2300) and
//! removals (2302) for the subscribed collections become [`ChangeEvent`]s; all
//! other markers are skipped.

use arango_gateway_core::prelude::*;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

/// Replication marker for a document insert or update
const MARKER_DOCUMENT: u64 = 2300;
/// Replication marker for a document removal
const MARKER_REMOVE: u64 = 2302;

const LAST_INCLUDED_HEADER: &str = "x-arango-replication-lastincluded";
/// Set to `true` when the logger holds more entries past this batch
const CHECK_MORE_HEADER: &str = "x-arango-replication-checkmore";

/// Configuration for the replication logger feed
#[derive(Debug, Clone)]
pub struct ArangoChangeFeedConfig {
    /// Wait between polls when the logger has nothing new
    pub idle_poll_interval: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for ArangoChangeFeedConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Change feed backed by the replication logger HTTP API
pub struct ArangoChangeFeed {
    client: Client,
    config: ArangoChangeFeedConfig,
}

impl ArangoChangeFeed {
    pub fn new(config: ArangoChangeFeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::feed_with_source("Failed to create feed client", e))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ChangeFeed for ArangoChangeFeed {
    async fn subscribe(&self, request: &FeedRequest) -> std::result::Result<FeedStream, FeedError> {
        let endpoint = ReplicationEndpoint::parse(&request.url)?;
        let mut cursor = FollowCursor {
            client: self.client.clone(),
            endpoint,
            credentials: request.credentials.clone(),
            collections: request.collections.iter().cloned().collect(),
            tick: String::new(),
        };
        cursor.tick = cursor.logger_tick().await?;

        debug!(
            url = %request.url,
            tick = %cursor.tick,
            collections = ?request.collections,
            "Subscribed to replication logger"
        );

        let idle = self.config.idle_poll_interval;
        // Events with nothing subscribed still re-poll at once; only Idle waits
        let events = stream::unfold(Some(cursor), move |state| async move {
            let mut cursor = state?;
            match cursor.follow().await {
                Poll::Events(events) => Some((
                    stream::iter(events.into_iter().map(Ok)).boxed(),
                    Some(cursor),
                )),
                Poll::Idle => {
                    tokio::time::sleep(idle).await;
                    Some((stream::empty().boxed(), Some(cursor)))
                }
                // Yield the failure, then end the subscription
                Poll::Failed(e) => Some((stream::iter(vec![Err(e)]).boxed(), None)),
            }
        })
        .flatten();

        Ok(Box::pin(events))
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// `<server>/<database>` split into the server origin and database name
#[derive(Debug, Clone, PartialEq)]
struct ReplicationEndpoint {
    origin: String,
    database: String,
}

impl ReplicationEndpoint {
    fn parse(url: &str) -> std::result::Result<Self, FeedError> {
        let parsed = Url::parse(url)
            .map_err(|e| FeedError::new(format!("Invalid feed URL {}: {}", url, e)))?;
        let database = parsed
            .path_segments()
            .and_then(|mut segments| segments.find(|s| !s.is_empty()))
            .unwrap_or("_system")
            .to_string();
        Ok(Self {
            origin: parsed.origin().ascii_serialization(),
            database,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/_db/{}/_api/replication/{}", self.origin, self.database, path)
    }
}

// ============================================================================
// Follow cursor
// ============================================================================

enum Poll {
    /// May be empty when the logger reported more entries to fetch
    Events(Vec<ChangeEvent>),
    Idle,
    Failed(FeedError),
}

#[derive(Debug, Deserialize)]
struct LoggerState {
    state: LoggerTick,
}

#[derive(Debug, Deserialize)]
struct LoggerTick {
    #[serde(rename = "lastLogTick")]
    last_log_tick: String,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    #[serde(default)]
    tick: Option<String>,
    #[serde(rename = "type")]
    marker: u64,
    #[serde(default)]
    cname: Option<String>,
    #[serde(default)]
    data: Value,
}

struct FollowCursor {
    client: Client,
    endpoint: ReplicationEndpoint,
    credentials: Option<Credentials>,
    collections: HashSet<String>,
    tick: String,
}

impl FollowCursor {
    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(ref creds) = self.credentials {
            req = req.basic_auth(&creds.user, Some(&creds.password));
        }
        req
    }

    /// Current tick of the replication logger
    async fn logger_tick(&self) -> std::result::Result<String, FeedError> {
        let resp = self
            .get(self.endpoint.api("logger-state"))
            .send()
            .await
            .map_err(|e| {
                FeedError::new(format!("Failed to read logger state: {}", e.without_url()))
            })?;

        let status = resp.status();
        let headers = header_pairs(resp.headers());
        let body = resp
            .text()
            .await
            .map_err(|e| {
                FeedError::new(format!("Failed to read logger state: {}", e.without_url()))
            })?;

        if !status.is_success() {
            return Err(FeedError::new(format!("Logger state failed with {}", status))
                .with_response(status.as_u16(), headers, body));
        }

        let state: LoggerState = serde_json::from_str(&body).map_err(|e| {
            FeedError::new(format!("Malformed logger state: {}", e)).with_response(
                status.as_u16(),
                headers,
                body.clone(),
            )
        })?;
        Ok(state.state.last_log_tick)
    }

    /// One `logger-follow` round trip
    async fn follow(&mut self) -> Poll {
        let url = format!("{}?from={}", self.endpoint.api("logger-follow"), self.tick);
        let resp = match self.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let message = format!("Feed request failed: {}", e.without_url());
                return Poll::Failed(FeedError::new(message));
            }
        };

        let status = resp.status();
        let headers = header_pairs(resp.headers());
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                let message = format!("Feed read failed: {}", e.without_url());
                return Poll::Failed(FeedError::new(message));
            }
        };

        match status {
            StatusCode::NO_CONTENT => Poll::Idle,
            StatusCode::OK => {
                let events = self.consume(&body);
                if let Some(last) = header_value(&headers, LAST_INCLUDED_HEADER) {
                    if last != "0" {
                        self.tick = last.to_string();
                    }
                }
                let more = header_value(&headers, CHECK_MORE_HEADER) == Some("true");
                trace!(count = events.len(), tick = %self.tick, more, "Followed replication log");
                if events.is_empty() && !more {
                    Poll::Idle
                } else {
                    Poll::Events(events)
                }
            }
            _ => Poll::Failed(
                FeedError::new(format!("Feed responded with {}", status)).with_response(
                    status.as_u16(),
                    headers,
                    body,
                ),
            ),
        }
    }

    /// Parse newline-delimited entries, advancing the tick past each one
    fn consume(&mut self, body: &str) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            let entry: LogEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed replication entry");
                    continue;
                }
            };

            if let Some(ref tick) = entry.tick {
                if tick_value(tick) > tick_value(&self.tick) {
                    self.tick = tick.clone();
                }
            }

            let kind = match entry.marker {
                MARKER_DOCUMENT => ChangeKind::InsertOrUpdate,
                MARKER_REMOVE => ChangeKind::Delete,
                _ => continue,
            };
            let Some(collection) = entry.cname else {
                continue;
            };
            if !self.collections.contains(&collection) {
                continue;
            }
            events.push(ChangeEvent::new(collection, entry.data, kind));
        }
        events
    }
}

fn tick_value(tick: &str) -> u64 {
    tick.parse().unwrap_or(0)
}

fn header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect()
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{free_address, spawn_server};
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    fn entry(tick: u64, marker: u64, cname: &str, data: Value) -> String {
        json!({ "tick": tick.to_string(), "type": marker, "cname": cname, "data": data })
            .to_string()
    }

    fn feed() -> ArangoChangeFeed {
        ArangoChangeFeed::new(ArangoChangeFeedConfig {
            idle_poll_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn request(server: &str, collections: &[&str]) -> FeedRequest {
        FeedRequest {
            url: format!("http://{}/blockchain", server),
            credentials: Credentials::parse("root:secret"),
            collections: collections.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn logger_state() -> Router {
        Router::new().route(
            "/_db/blockchain/_api/replication/logger-state",
            get(|| async { Json(json!({ "state": { "running": true, "lastLogTick": "10" } })) }),
        )
    }

    #[test]
    fn test_endpoint_defaults_to_system_database() {
        let ep = ReplicationEndpoint::parse("http://arangodb:8529").unwrap();
        assert_eq!(ep.database, "_system");
        assert_eq!(
            ep.api("logger-state"),
            "http://arangodb:8529/_db/_system/_api/replication/logger-state"
        );

        let ep = ReplicationEndpoint::parse("https://db.example.com/blockchain").unwrap();
        assert_eq!(ep.database, "blockchain");
        assert_eq!(ep.origin, "https://db.example.com");
    }

    #[tokio::test]
    async fn test_streams_subscribed_collections_and_advances_tick() {
        let router = logger_state().route(
            "/_db/blockchain/_api/replication/logger-follow",
            get(
                |Query(params): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                    assert!(headers.contains_key("authorization"));
                    match params.get("from").map(String::as_str) {
                        Some("10") => {
                            let body = [
                                entry(11, 2300, "blocks", json!({ "_key": "b1" })),
                                entry(12, 2300, "accounts", json!({ "_key": "a1" })),
                                entry(13, 2001, "blocks", json!({})),
                                entry(14, 2302, "blocks", json!({ "_key": "b0" })),
                            ]
                            .join("\n");
                            (HttpStatus::OK, [(LAST_INCLUDED_HEADER, "14")], body).into_response()
                        }
                        Some("14") => {
                            let body = entry(15, 2300, "blocks", json!({ "_key": "b2" }));
                            (HttpStatus::OK, [(LAST_INCLUDED_HEADER, "15")], body).into_response()
                        }
                        _ => HttpStatus::NO_CONTENT.into_response(),
                    }
                },
            ),
        );
        let server = spawn_server(router).await;

        let mut events = feed()
            .subscribe(&request(&server, &["blocks"]))
            .await
            .unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.collection, "blocks");
        assert_eq!(first.kind, ChangeKind::InsertOrUpdate);
        assert_eq!(first.key(), Some("b1"));

        let second = events.next().await.unwrap().unwrap();
        assert_eq!(second.kind, ChangeKind::Delete);
        assert_eq!(second.key(), Some("b0"));

        let third = events.next().await.unwrap().unwrap();
        assert_eq!(third.key(), Some("b2"));
    }

    #[tokio::test]
    async fn test_error_status_ends_stream_with_response_details() {
        let router = logger_state().route(
            "/_db/blockchain/_api/replication/logger-follow",
            get(|| async {
                (
                    HttpStatus::UNAUTHORIZED,
                    Json(json!({
                        "error": true,
                        "code": 401,
                        "errorNum": 11,
                        "errorMessage": "not authorized"
                    })),
                )
            }),
        );
        let server = spawn_server(router).await;

        let mut events = feed()
            .subscribe(&request(&server, &["blocks"]))
            .await
            .unwrap();

        let err = events.next().await.unwrap().unwrap_err();
        assert_eq!(err.status, Some(401));
        assert_eq!(err.details()["errorNum"], json!(11));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_checkmore_repolls_without_idle_wait() {
        let router = logger_state().route(
            "/_db/blockchain/_api/replication/logger-follow",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let from: u64 = params.get("from").and_then(|f| f.parse().ok()).unwrap_or(0);
                let next = (from + 1).to_string();
                if from < 20 {
                    // a batch holding only unsubscribed collections
                    let body = entry(from + 1, 2300, "other", json!({ "_key": "o" }));
                    let headers = [
                        (LAST_INCLUDED_HEADER, next),
                        (CHECK_MORE_HEADER, "true".to_string()),
                    ];
                    (HttpStatus::OK, headers, body).into_response()
                } else if from == 20 {
                    let body = entry(21, 2300, "blocks", json!({ "_key": "b21" }));
                    (HttpStatus::OK, [(LAST_INCLUDED_HEADER, next)], body).into_response()
                } else {
                    HttpStatus::NO_CONTENT.into_response()
                }
            }),
        );
        let server = spawn_server(router).await;
        let feed = ArangoChangeFeed::new(ArangoChangeFeedConfig {
            idle_poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let mut events = feed.subscribe(&request(&server, &["blocks"])).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .expect("ten backlog batches must not wait for the idle interval")
            .unwrap()
            .unwrap();
        assert_eq!(event.key(), Some("b21"));
    }

    #[tokio::test]
    async fn test_subscribe_fails_when_server_unreachable() {
        let server = free_address().await;
        assert!(feed()
            .subscribe(&request(&server, &["blocks"]))
            .await
            .is_err());
    }
}
