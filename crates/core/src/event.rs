//! Orchestrator events and the per-user event bus.
//!
//! Publishing never blocks and never fails. Subscribers receive events over a
//! `tokio::sync::broadcast` channel scoped to one user; important events
//! published while nobody is listening are buffered until drained.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::daemon::DaemonUpdate;

/// Important events kept per user while no subscriber is attached.
pub const PENDING_EVENT_CAP: usize = 50;

/// Everything the orchestrator reports to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TaskCreated {
        task_id: Uuid,
        prompt: String,
    },
    TaskUpdated {
        task_id: Uuid,
        goal: String,
    },
    TaskStatusChanged {
        task_id: Uuid,
        status: String,
    },
    TaskCompleted {
        task_id: Uuid,
        summary: String,
    },
    TaskFailed {
        task_id: Uuid,
        error: String,
    },
    OrchestratorThinking {
        content: String,
    },
    OrchestratorClassified {
        task_id: Uuid,
        mode: String,
        daemons_planned: usize,
    },
    OrchestratorResponse {
        task_id: Uuid,
        content: String,
    },
    DaemonDeployed {
        daemon_id: Uuid,
        task_id: Uuid,
        role: String,
        role_label: String,
        task_summary: String,
    },
    /// A forwarded runner update.
    DaemonUpdate {
        update: DaemonUpdate,
    },
    /// A plan that never launched because a predecessor failed.
    DaemonFailed {
        daemon_id: Uuid,
        index: usize,
        role: String,
        error: String,
        can_retry: bool,
    },
    Error {
        message: String,
    },
}

impl Event {
    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Event::OrchestratorThinking {
            content: content.into(),
        }
    }

    /// Wire name of the event. Forwarded updates report their own kind.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::TaskCreated { .. } => "task_created",
            Event::TaskUpdated { .. } => "task_updated",
            Event::TaskStatusChanged { .. } => "task_status_changed",
            Event::TaskCompleted { .. } => "task_completed",
            Event::TaskFailed { .. } => "task_failed",
            Event::OrchestratorThinking { .. } => "orchestrator_thinking",
            Event::OrchestratorClassified { .. } => "orchestrator_classified",
            Event::OrchestratorResponse { .. } => "orchestrator_response",
            Event::DaemonDeployed { .. } => "daemon_deployed",
            Event::DaemonUpdate { update } => update.event_type(),
            Event::DaemonFailed { .. } => "daemon_failed",
            Event::Error { .. } => "error",
        }
    }

    /// Events worth buffering for a user who is not currently listening.
    pub fn is_important(&self) -> bool {
        matches!(
            self.event_type(),
            "task_created"
                | "task_completed"
                | "task_failed"
                | "orchestrator_response"
                | "orchestrator_thinking"
                | "daemon_deployed"
                | "daemon_completed"
                | "daemon_failed"
                | "error"
        )
    }
}

struct UserChannel {
    sender: broadcast::Sender<Arc<Event>>,
    pending: VecDeque<Arc<Event>>,
}

/// Per-user broadcast bus.
pub struct EventBus {
    capacity: usize,
    users: Mutex<HashMap<String, UserChannel>>,
}

impl EventBus {
    /// Create a bus whose per-user channels hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            users: Mutex::new(HashMap::new()),
        }
    }

    fn with_user<R>(&self, user_id: &str, f: impl FnOnce(&mut UserChannel) -> R) -> R {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let capacity = self.capacity;
        let channel = users.entry(user_id.to_string()).or_insert_with(|| UserChannel {
            sender: broadcast::channel(capacity).0,
            pending: VecDeque::new(),
        });
        f(channel)
    }

    /// Publish to every subscriber of `user_id`.
    pub fn publish(&self, user_id: &str, event: Event) {
        let event = Arc::new(event);
        self.with_user(user_id, |ch| {
            if ch.sender.receiver_count() > 0 {
                // Receivers can lag or drop between the check and the send.
                let _ = ch.sender.send(event);
            } else if event.is_important() {
                if ch.pending.len() >= PENDING_EVENT_CAP {
                    ch.pending.pop_front();
                }
                ch.pending.push_back(event);
            }
        });
    }

    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Arc<Event>> {
        self.with_user(user_id, |ch| ch.sender.subscribe())
    }

    /// Take the events buffered while `user_id` had no subscriber, oldest first.
    pub fn drain_pending(&self, user_id: &str) -> Vec<Arc<Event>> {
        self.with_user(user_id, |ch| ch.pending.drain(..).collect())
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.with_user(user_id, |ch| ch.sender.receiver_count())
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
    use crate::daemon::UpdateKind;

    #[tokio::test]
    async fn events_reach_only_their_user() {
        let bus = EventBus::new(16);
        let mut alice = bus.subscribe("alice");
        let mut bob = bus.subscribe("bob");

        bus.publish("alice", Event::thinking("on it"));

        let event = alice.recv().await.unwrap();
        assert_eq!(event.event_type(), "orchestrator_thinking");
        assert!(bob.try_recv().is_err());
    }

    #[test]
    fn publishing_without_subscribers_buffers_important_events() {
        let bus = EventBus::new(16);
        bus.publish("u", Event::error("boom"));
        bus.publish(
            "u",
            Event::TaskStatusChanged {
                task_id: Uuid::nil(),
                status: "executing".into(),
            },
        );

        let pending = bus.drain_pending("u");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_type(), "error");
        assert!(bus.drain_pending("u").is_empty());
    }

    #[test]
    fn pending_buffer_evicts_oldest() {
        let bus = EventBus::new(16);
        for i in 0..(PENDING_EVENT_CAP + 5) {
            bus.publish("u", Event::error(format!("e{i}")));
        }
        let pending = bus.drain_pending("u");
        assert_eq!(pending.len(), PENDING_EVENT_CAP);
        assert_eq!(*pending[0], Event::error("e5"));
    }

    #[test]
    fn forwarded_updates_report_their_kind() {
        let event = Event::DaemonUpdate {
            update: DaemonUpdate {
                daemon_id: Uuid::nil(),
                index: 0,
                role: "Coder".into(),
                kind: UpdateKind::Completed {
                    result: Default::default(),
                },
            },
        };
        assert_eq!(event.event_type(), "daemon_completed");
        assert!(event.is_important());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "daemon_update");
        assert_eq!(json["update"]["type"], "completed");
    }
}
