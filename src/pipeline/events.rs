//! Progress events published by the pipeline service.
//!
//! Subscribers get a bounded channel; publishing never blocks. A subscriber
//! that stops draining (full channel) or goes away (closed channel) is
//! dropped from the list with a warning.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::warn;

use crate::models::TaskOperation;

/// Events emitted while the pipeline runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    TaskStarted {
        task_id: String,
        operation: TaskOperation,
        page_id: Option<String>,
    },
    TaskProgress {
        task_id: String,
        message: String,
    },
    TaskCompleted {
        task_id: String,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
    BulkProgress {
        bulk_id: String,
        succeeded: u32,
        failed: u32,
        total: u32,
    },
}

/// Fan-out of pipeline events to subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<PipelineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with the given channel capacity.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .push(tx);
        rx
    }

    /// Publish without blocking; drop subscribers that cannot keep up.
    pub fn publish(&self, event: PipelineEvent) {
        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("dropping slow pipeline event subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(8);
        bus.publish(PipelineEvent::TaskCompleted {
            task_id: "t1".to_string(),
        });
        match rx.recv().await.unwrap() {
            PipelineEvent::TaskCompleted { task_id } => assert_eq!(task_id, "t1"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped() {
        let bus = EventBus::new();
        let _rx = bus.subscribe(1);
        assert_eq!(bus.subscriber_count(), 1);
        // second publish overflows the undrained channel of capacity 1
        bus.publish(PipelineEvent::TaskCompleted {
            task_id: "a".to_string(),
        });
        bus.publish(PipelineEvent::TaskCompleted {
            task_id: "b".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_dropped() {
        let bus = EventBus::new();
        let rx = bus.subscribe(8);
        drop(rx);
        bus.publish(PipelineEvent::TaskCompleted {
            task_id: "a".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
