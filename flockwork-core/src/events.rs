//! `EventBus`: single-writer, multi-subscriber event fan-out (§4.H).
//!
//! Built on `tokio::sync::broadcast`, whose per-receiver lag semantics are
//! exactly the bus's drop-oldest policy: a subscriber that falls behind the
//! channel's capacity loses its oldest unread events and is told how many
//! it lost, which this module surfaces as a running `dropped` counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::model::ProjectId;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BatchStart,
    BatchComplete,
    TaskStart,
    TaskProgress,
    TaskComplete,
    WorktreeCreated,
    WorktreeMerged,
    WorktreeConflict,
    CostUpdate,
    BudgetWarning,
    ExpertiseLearned,
    PlanFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub project_id: ProjectId,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType, project_id: ProjectId, payload: Value) -> Self {
        Self {
            event_type,
            project_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes to every current subscriber. No-op (not an error) if there
    /// are none yet.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the bus. Ordering is preserved among events
/// this subscription actually receives; no cross-subscriber order is
/// promised.
pub struct EventSubscription {
    receiver: broadcast::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventSubscription {
    /// Waits for the next event, transparently skipping past any gap
    /// caused by this subscriber falling behind and folding the skipped
    /// count into `dropped()`.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
