//! Advisory event stream client.
//!
//! Maintains one reconnecting subscription per workflow id and feeds
//! matching events to a single callback. At-most-once, best-effort: a lost
//! or duplicated message never matters for correctness, and nothing here
//! drives a state transition.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, warn};

use reqflow_core::config::StreamConfig;
use reqflow_core::traits::ActivityStream;
use reqflow_core::types::{ActivityKind, AgentActivityEvent};

/// Which stream messages reach the callback.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Accepted kinds; empty means agent_update and workflow_status.
    pub kinds: Vec<ActivityKind>,
    /// For agent_update events, only this agent (when set).
    pub agent: Option<String>,
}

impl EventFilter {
    pub fn kind(kind: ActivityKind) -> Self {
        Self { kinds: vec![kind], agent: None }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    fn matches(&self, event: &AgentActivityEvent) -> bool {
        // Unknown kinds are dropped, never errors.
        if matches!(event.kind, ActivityKind::Other(_)) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if event.kind == ActivityKind::AgentUpdate {
            if let Some(ref wanted) = self.agent {
                return event.agent.as_deref() == Some(wanted.as_str());
            }
        }
        true
    }
}

pub type ActivityCallback = Arc<dyn Fn(AgentActivityEvent) + Send + Sync>;

/// Handle to one logical subscription. Unsubscribing (or dropping) closes
/// the channel and suppresses further callback delivery immediately.
pub struct Subscription {
    workflow_id: String,
    cancel_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Subscription {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn unsubscribe(&self) {
        let _ = self.cancel_tx.send(true);
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.cancel_tx.send(true);
        self.handle.abort();
    }
}

/// Reconnecting client over an [`ActivityStream`] transport.
pub struct EventStreamClient {
    transport: Arc<dyn ActivityStream>,
    config: StreamConfig,
}

impl EventStreamClient {
    pub fn new(transport: Arc<dyn ActivityStream>, config: StreamConfig) -> Self {
        Self { transport, config }
    }

    /// Open a subscription for `workflow_id` and deliver matching events
    /// to `callback` until unsubscribed. Disconnects retry with capped
    /// exponential backoff, re-subscribing under the same id.
    pub fn subscribe(
        &self,
        workflow_id: impl Into<String>,
        filter: EventFilter,
        callback: ActivityCallback,
    ) -> Subscription {
        let workflow_id = workflow_id.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = SubscriptionTask {
            transport: self.transport.clone(),
            config: self.config.clone(),
            workflow_id: workflow_id.clone(),
            filter,
            callback,
            cancel_rx,
        };
        let handle = tokio::spawn(task.run());
        Subscription { workflow_id, cancel_tx, handle }
    }
}

struct SubscriptionTask {
    transport: Arc<dyn ActivityStream>,
    config: StreamConfig,
    workflow_id: String,
    filter: EventFilter,
    callback: ActivityCallback,
    cancel_rx: watch::Receiver<bool>,
}

impl SubscriptionTask {
    async fn run(mut self) {
        let initial = Duration::from_millis(self.config.reconnect_initial_ms.max(1));
        let max = Duration::from_millis(self.config.reconnect_max_ms.max(1));
        let mut delay = initial;

        loop {
            if *self.cancel_rx.borrow() {
                return;
            }

            match self.transport.connect(&self.workflow_id).await {
                Ok(mut stream) => {
                    debug!(workflow_id = %self.workflow_id, "Stream connected");
                    delay = initial;

                    loop {
                        tokio::select! {
                            _ = self.cancel_rx.changed() => return,
                            item = stream.next() => match item {
                                Some(Ok(event)) => {
                                    if *self.cancel_rx.borrow() {
                                        return;
                                    }
                                    if self.filter.matches(&event) {
                                        (self.callback)(event);
                                    }
                                }
                                Some(Err(e)) => {
                                    warn!(workflow_id = %self.workflow_id, error = %e, "Stream error, reconnecting");
                                    break;
                                }
                                None => {
                                    debug!(workflow_id = %self.workflow_id, "Stream closed, reconnecting");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => {
                    warn!(workflow_id = %self.workflow_id, error = %e, "Stream connect failed");
                }
            }

            // Capped exponential backoff with jitter before re-subscribing
            // under the same workflow id.
            let jitter = rand::thread_rng().gen_range(0..=delay.as_millis().max(4) as u64 / 4);
            let wait = delay + Duration::from_millis(jitter);
            tokio::select! {
                _ = self.cancel_rx.changed() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            delay = (delay * 2).min(max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::future::BoxFuture;
    use futures::stream::BoxStream;
    use reqflow_core::error::{Result, WorkflowError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn event(kind: ActivityKind, agent: Option<&str>) -> AgentActivityEvent {
        AgentActivityEvent {
            workflow_id: "wf-1".into(),
            kind,
            agent: agent.map(String::from),
            action: Some("scored".into()),
            details: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn filter_drops_unknown_kinds() {
        let filter = EventFilter::default();
        assert!(!filter.matches(&event(ActivityKind::Other("heartbeat".into()), None)));
        assert!(filter.matches(&event(ActivityKind::WorkflowStatus, None)));
    }

    #[test]
    fn filter_by_kind_and_agent() {
        let filter = EventFilter::kind(ActivityKind::AgentUpdate).with_agent("budget-checker");
        assert!(filter.matches(&event(ActivityKind::AgentUpdate, Some("budget-checker"))));
        assert!(!filter.matches(&event(ActivityKind::AgentUpdate, Some("tax-review"))));
        assert!(!filter.matches(&event(ActivityKind::AgentUpdate, None)));
        assert!(!filter.matches(&event(ActivityKind::WorkflowStatus, None)));
    }

    /// Transport that serves a fixed batch of events per connect and then
    /// ends the stream, counting connects.
    struct BatchTransport {
        batches: Mutex<Vec<Vec<AgentActivityEvent>>>,
        connects: AtomicUsize,
    }

    impl ActivityStream for BatchTransport {
        fn connect(
            &self,
            _workflow_id: &str,
        ) -> BoxFuture<'_, Result<BoxStream<'static, Result<AgentActivityEvent>>>> {
            Box::pin(async move {
                self.connects.fetch_add(1, Ordering::SeqCst);
                let batch = {
                    let mut batches = self.batches.lock().unwrap();
                    if batches.is_empty() {
                        return Err(WorkflowError::Stream("no more batches".into()));
                    }
                    batches.remove(0)
                };
                let stream = futures::stream::iter(batch.into_iter().map(Ok));
                Ok(Box::pin(stream) as BoxStream<'static, Result<AgentActivityEvent>>)
            })
        }
    }

    fn fast_config() -> StreamConfig {
        StreamConfig { reconnect_initial_ms: 1, reconnect_max_ms: 4 }
    }

    #[tokio::test]
    async fn delivers_matching_events_across_reconnects() {
        let transport = Arc::new(BatchTransport {
            batches: Mutex::new(vec![
                vec![
                    event(ActivityKind::AgentUpdate, Some("budget-checker")),
                    event(ActivityKind::Other("noise".into()), None),
                ],
                vec![event(ActivityKind::WorkflowStatus, None)],
            ]),
            connects: AtomicUsize::new(0),
        });
        let client = EventStreamClient::new(transport.clone(), fast_config());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = client.subscribe(
            "wf-1",
            EventFilter::default(),
            Arc::new(move |ev| sink.lock().unwrap().push(ev.kind)),
        );

        // Two batches, one reconnect between them, plus failed connects after.
        tokio::time::sleep(Duration::from_millis(100)).await;
        sub.unsubscribe();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![ActivityKind::AgentUpdate, ActivityKind::WorkflowStatus]
        );
        assert!(transport.connects.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn unsubscribe_suppresses_delivery() {
        let transport = Arc::new(BatchTransport {
            batches: Mutex::new(vec![vec![
                event(ActivityKind::WorkflowStatus, None);
                3
            ]]),
            connects: AtomicUsize::new(0),
        });
        let client = EventStreamClient::new(transport, fast_config());

        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        let sub = client.subscribe(
            "wf-1",
            EventFilter::default(),
            Arc::new(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            }),
        );
        sub.unsubscribe();
        let after_unsubscribe = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        // Nothing delivered after unsubscribe returned.
        assert_eq!(count.load(Ordering::SeqCst), after_unsubscribe);
    }
}
