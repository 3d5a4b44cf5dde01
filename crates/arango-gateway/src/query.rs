//! Guarded query execution
//!
//! [`QueryExecutor::wrap`] runs a fetch and, on failure, cleans the error,
//! logs it once with redacted arguments, and hides system faults behind the
//! generic "Service temporary unavailable" domain error.

use arango_gateway_core::prelude::*;
use arango_gateway_core::{redact_json, FaultClass, LatencyTimer, QueryMetrics};
use serde_json::Value;
use std::future::Future;
use tracing::error;

/// Uniform failure handling around database calls
#[derive(Clone)]
pub struct QueryExecutor {
    metrics: QueryMetrics,
}

impl QueryExecutor {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            metrics: QueryMetrics::new(component),
        }
    }

    /// Run `fetch`, returning its value unchanged on success.
    ///
    /// `operation` and `args` are used only for logging.
    pub async fn wrap<T, F, Fut>(
        &self,
        operation: &str,
        args: &Value,
        fetch: F,
    ) -> std::result::Result<T, QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, RawError>>,
    {
        self.metrics.record_query(operation);
        let metrics = self.metrics.clone();
        let timer = LatencyTimer::start(move |d| metrics.record_latency(d));

        let result = fetch().await;
        timer.stop();

        result.map_err(|raw| {
            let cleaned = raw.clean();
            let fault = match cleaned.classify() {
                FaultClass::System => "system",
                FaultClass::Unclassified => "unclassified",
            };
            let logged = serde_json::to_value(&cleaned).unwrap_or_default();
            error!(
                operation,
                args = %redact_json(args),
                error = %logged,
                fault,
                "Query failed"
            );
            self.metrics.record_failure(operation, fault);
            cleaned.into_query_error()
        })
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new("query_executor")
    }
}

/// [`QueryExecutor::wrap`] with a default executor
pub async fn wrap<T, F, Fut>(
    operation: &str,
    args: &Value,
    fetch: F,
) -> std::result::Result<T, QueryError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, RawError>>,
{
    QueryExecutor::default().wrap(operation, args, fetch).await
}
