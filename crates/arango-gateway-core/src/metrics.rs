//! Metrics for the ArangoDB gateway
//!
//! Emitted through the `metrics` facade; installing a recorder is up to the host.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency
pub mod names {
    // Listener metrics
    pub const FEED_EVENTS_TOTAL: &str = "arango_feed_events_total";
    pub const FEED_EVENTS_IGNORED: &str = "arango_feed_events_ignored_total";
    pub const FEED_ERRORS_TOTAL: &str = "arango_feed_errors_total";
    pub const LISTENER_RESTARTS_TOTAL: &str = "arango_listener_restarts_total";
    pub const LISTENER_STATE: &str = "arango_listener_state";

    // Query metrics
    pub const QUERY_TOTAL: &str = "arango_query_total";
    pub const QUERY_FAILED_TOTAL: &str = "arango_query_failed_total";
    pub const QUERY_LATENCY: &str = "arango_query_latency_seconds";
}

/// Labels for metrics
pub mod labels {
    pub const COMPONENT: &str = "component";
    pub const COLLECTION: &str = "collection";
    pub const KIND: &str = "kind";
    pub const OPERATION: &str = "operation";
    pub const FAULT: &str = "fault";
}

/// Change feed listener metrics
#[derive(Clone)]
pub struct ListenerMetrics {
    component: String,
}

impl ListenerMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Record an event routed to a collection
    pub fn record_event(&self, collection: &str, kind: &str) {
        counter!(
            names::FEED_EVENTS_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::COLLECTION => collection.to_string(),
            labels::KIND => kind.to_string(),
        )
        .increment(1);
    }

    /// Record an event dropped because of its kind
    pub fn record_ignored(&self, kind: &str) {
        counter!(
            names::FEED_EVENTS_IGNORED,
            labels::COMPONENT => self.component.clone(),
            labels::KIND => kind.to_string(),
        )
        .increment(1);
    }

    pub fn record_error(&self) {
        counter!(
            names::FEED_ERRORS_TOTAL,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    pub fn record_restart(&self) {
        counter!(
            names::LISTENER_RESTARTS_TOTAL,
            labels::COMPONENT => self.component.clone(),
        )
        .increment(1);
    }

    /// Publish the listener state as its numeric code
    pub fn set_state(&self, code: u8) {
        gauge!(
            names::LISTENER_STATE,
            labels::COMPONENT => self.component.clone(),
        )
        .set(code as f64);
    }
}

/// Query executor metrics
#[derive(Clone)]
pub struct QueryMetrics {
    component: String,
}

impl QueryMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn record_query(&self, operation: &str) {
        counter!(
            names::QUERY_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::OPERATION => operation.to_string(),
        )
        .increment(1);
    }

    /// `fault` is "system" or "unclassified"
    pub fn record_failure(&self, operation: &str, fault: &str) {
        counter!(
            names::QUERY_FAILED_TOTAL,
            labels::COMPONENT => self.component.clone(),
            labels::OPERATION => operation.to_string(),
            labels::FAULT => fault.to_string(),
        )
        .increment(1);
    }

    pub fn record_latency(&self, duration: Duration) {
        histogram!(
            names::QUERY_LATENCY,
            labels::COMPONENT => self.component.clone(),
        )
        .record(duration.as_secs_f64());
    }
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    /// Start a new timer
    pub fn start(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Get elapsed time without stopping
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and record
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(f) = self.on_drop.take() {
            f(elapsed);
        }
        elapsed
    }
}

impl<F> Drop for LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer_records_once() {
        let mut recorded = Vec::new();
        {
            let timer = LatencyTimer::start(|d| recorded.push(d));
            std::thread::sleep(Duration::from_millis(10));
            timer.stop();
        }
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0] >= Duration::from_millis(10));
    }

    #[test]
    fn test_latency_timer_records_on_drop() {
        let mut recorded = None;
        {
            let _timer = LatencyTimer::start(|d| recorded = Some(d));
        }
        assert!(recorded.is_some());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = ListenerMetrics::new("test");
        metrics.record_event("blocks", "insert");
        metrics.set_state(2);
        QueryMetrics::new("test").record_failure("QUERY", "system");
    }
}
