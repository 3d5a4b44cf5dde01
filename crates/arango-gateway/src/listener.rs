//! Change feed listener
//!
//! Owns one subscription at a time and keeps it alive:
//!
//! ```text
//! Stopped ──start──► Starting ──subscribed──► Listening
//!                       ▲                         │ feed error / end of stream
//!                       └──── RestartScheduled ◄──┘   (fixed delay, no retry cap)
//! ```
//!
//! A restart drops the previous stream and resubscribes every collection name
//! the router knows. Events published while disconnected are not replayed.

use arango_gateway_core::prelude::*;
use arango_gateway_core::{redact_json, ListenerMetrics};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Listener status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Listening,
    RestartScheduled,
}

impl ListenerState {
    /// Numeric code published as a gauge
    pub fn code(&self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Listening => 2,
            Self::RestartScheduled => 3,
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Listening => "LISTENING",
            Self::RestartScheduled => "RESTART_SCHEDULED",
        };
        f.write_str(name)
    }
}

/// Where to subscribe and how to authenticate
#[derive(Debug, Clone)]
pub struct FeedTarget {
    /// `<server>/<database>`
    pub url: String,
    pub credentials: Option<Credentials>,
}

struct ListenerInner {
    feed: Arc<dyn ChangeFeed>,
    router: Arc<dyn DocumentRouter>,
    target: FeedTarget,
    restart_timeout: Duration,
    state: watch::Sender<ListenerState>,
    metrics: ListenerMetrics,
}

impl ListenerInner {
    fn transition(&self, next: ListenerState) {
        let prev = self.state.send_replace(next);
        self.metrics.set_state(next.code());
        trace!(from = %prev, to = %next, "Listener state changed");
    }

    fn feed_request(&self) -> FeedRequest {
        FeedRequest {
            url: self.target.url.clone(),
            credentials: self.target.credentials.clone(),
            collections: self.router.collection_names(),
        }
    }

    /// Subscribe, consume, and resubscribe after every failure.
    /// Entered in `Starting`.
    async fn run(self: Arc<Self>) {
        loop {
            let request = self.feed_request();

            let failure = match self.feed.subscribe(&request).await {
                Ok(stream) => {
                    self.transition(ListenerState::Listening);
                    debug!(url = %request.url, collections = ?request.collections, "LISTEN");
                    self.consume(stream).await
                }
                Err(e) => e,
            };

            self.metrics.record_error();
            error!(
                error = %failure,
                status = ?failure.status,
                details = %redact_json(&failure.details()),
                restart_in = ?self.restart_timeout,
                "Change feed failed"
            );

            self.transition(ListenerState::RestartScheduled);
            tokio::time::sleep(self.restart_timeout).await;
            self.metrics.record_restart();
            info!(url = %request.url, "Restarting change feed listener");
            self.transition(ListenerState::Starting);
        }
    }

    /// Route events until the stream fails or ends; the stream is dropped on return
    async fn consume(&self, mut stream: FeedStream) -> FeedError {
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => self.route(event),
                Err(e) => return e,
            }
        }
        FeedError::new("Change feed closed")
    }

    fn route(&self, event: ChangeEvent) {
        if event.kind.is_insert_or_update() {
            self.metrics.record_event(&event.collection, event.kind.as_wire());
            self.router
                .on_document_insert_or_update(&event.collection, &event.document);
        } else {
            trace!(collection = %event.collection, kind = %event.kind, "Ignoring change event");
            self.metrics.record_ignored(event.kind.as_wire());
        }
    }
}

/// Keeps one change feed subscription running on a background task
pub struct ChangeFeedListener {
    inner: Arc<ListenerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeFeedListener {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        router: Arc<dyn DocumentRouter>,
        target: FeedTarget,
        restart_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Stopped);
        Self {
            inner: Arc::new(ListenerInner {
                feed,
                router,
                target,
                restart_timeout,
                state,
                metrics: ListenerMetrics::new("change_feed_listener"),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.inner.state.subscribe()
    }

    /// Abort the running task and wait until it is gone
    async fn halt(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

#[async_trait]
impl Lifecycle for ChangeFeedListener {
    async fn start(&self) -> Result<()> {
        self.halt().await;
        info!(url = %self.inner.target.url, "Starting change feed listener");
        self.inner.transition(ListenerState::Starting);
        let handle = tokio::spawn(self.inner.clone().run());
        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.halt().await;
        self.inner.transition(ListenerState::Stopped);
        info!(url = %self.inner.target.url, "Change feed listener stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state() != ListenerState::Stopped
    }
}

impl Drop for ChangeFeedListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
