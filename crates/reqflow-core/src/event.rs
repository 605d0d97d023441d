use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::types::WorkflowEvent;

/// Broadcast bus for workflow progress events.
///
/// Strictly advisory: slow subscribers miss events once the channel
/// wraps, and the engine never reads its own bus to make a transition.
pub struct EventBus {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Capacity taken from `event_capacity` in the engine config.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.event_capacity)
    }

    /// Fire-and-forget. A send with no live receivers is not an error.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
