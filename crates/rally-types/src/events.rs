use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events pushed to WebSocket clients. Receiving one is only a hint to poll;
/// the poll response stays the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SyncEvent {
    /// Server accepted the connection
    Ready { user_id: Uuid },

    /// A gathering's version counter moved
    GatheringChanged { gathering_id: Uuid, version: i64 },
}

impl SyncEvent {
    /// Returns the gathering this event is scoped to, if any.
    pub fn gathering_id(&self) -> Option<Uuid> {
        match self {
            Self::GatheringChanged { gathering_id, .. } => Some(*gathering_id),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SyncCommand {
    /// Start receiving change notices for these gatherings.
    Subscribe { gathering_ids: Vec<Uuid> },

    /// Stop receiving change notices for these gatherings.
    Unsubscribe { gathering_ids: Vec<Uuid> },
}
