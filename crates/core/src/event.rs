//! Domain event system: decoupled observability for the query workflow.
//!
//! The workflow publishes events as a turn progresses. Subscribers (trace
//! recorders, metrics exporters, log shippers) react without the workflow
//! knowing they exist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A user query entered the workflow
    TurnStarted {
        thread_id: String,
        query_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A workflow step finished (successfully or via its fallback)
    StepCompleted {
        thread_id: String,
        step: String,
        backend: String,
        /// Whether the step had to use its fallback path
        fallback: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A subquery moved between lifecycle states
    SubQueryTransition {
        thread_id: String,
        subquery_id: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred (recovered or not)
    ErrorOccurred {
        thread_id: String,
        context: String,
        kind: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The turn produced its final answer
    TurnCompleted {
        thread_id: String,
        complexity: String,
        subqueries: usize,
        failed: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn thread_id(&self) -> &str {
        match self {
            Self::TurnStarted { thread_id, .. }
            | Self::StepCompleted { thread_id, .. }
            | Self::SubQueryTransition { thread_id, .. }
            | Self::ErrorOccurred { thread_id, .. }
            | Self::TurnCompleted { thread_id, .. } => thread_id,
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Subscribers receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::StepCompleted {
            thread_id: "t1".into(),
            step: "decomposition".into(),
            backend: "anthropic/claude".into(),
            fallback: false,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::StepCompleted { step, duration_ms, .. } => {
                assert_eq!(step, "decomposition");
                assert_eq!(*duration_ms, 42);
            }
            _ => panic!("Expected StepCompleted event"),
        }
        assert_eq!(event.thread_id(), "t1");
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            thread_id: "t1".into(),
            context: "test".into(),
            kind: "backend_call_failed".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = DomainEvent::TurnStarted {
            thread_id: "t".into(),
            query_preview: "What year".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"turn_started\""));
    }
}
