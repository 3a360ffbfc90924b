// Event Bus - Pub/Sub for Guardian Domain Events
//
// In-memory event streaming using tokio broadcast channels. Feeds the
// webhook notifier and any status listeners. Events are not persisted; the
// durable audit trail lives in the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::decision::{ActionIntent, TickId};
use crate::domain::entity::{CampaignId, EntityId};

/// Guardian domain events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardianEvent {
    TickCompleted {
        tick_id: TickId,
        at: DateTime<Utc>,
        decisions: u32,
    },
    TickSkipped {
        at: DateTime<Utc>,
        reason: String,
    },
    TickAborted {
        tick_id: TickId,
        at: DateTime<Utc>,
        reason: String,
    },
    CircuitTripped {
        campaign_id: CampaignId,
        cumulative_loss_micros: i64,
        at: DateTime<Utc>,
    },
    CircuitCleared {
        campaign_id: CampaignId,
        at: DateTime<Utc>,
    },
    EntityPaused {
        entity_id: EntityId,
        reason: String,
        at: DateTime<Utc>,
    },
    EntityResumed {
        entity_id: EntityId,
        at: DateTime<Utc>,
    },
    /// Spend is running ahead of the budget curve; advisory only.
    EntityOverPacing {
        entity_id: EntityId,
        pacing_ratio: f64,
        at: DateTime<Utc>,
    },
    ActionFailed {
        entity_id: EntityId,
        intent: ActionIntent,
        at: DateTime<Utc>,
    },
    EntityStale {
        entity_id: EntityId,
        at: DateTime<Utc>,
        error: String,
    },
}

impl GuardianEvent {
    /// Whether the event warrants an operator alert (webhook).
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            GuardianEvent::CircuitTripped { .. }
                | GuardianEvent::ActionFailed { .. }
                | GuardianEvent::TickAborted { .. }
                | GuardianEvent::EntityStale { .. }
        )
    }
}

/// Event bus for publishing and subscribing to guardian events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GuardianEvent>>,
}

impl EventBus {
    /// Create a new event bus. Capacity bounds how many events can buffer
    /// before slow subscribers start lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, event: GuardianEvent) {
        debug!("publishing event: {:?}", event);
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("no subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<GuardianEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until one is available).
    pub async fn recv(&mut self) -> Result<GuardianEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<GuardianEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,

    #[error("no events available")]
    Empty,

    #[error("receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
