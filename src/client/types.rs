//! Public types returned by the client façade.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::queue::QueueItem;

/// Message shown to users for a write stored locally.
pub const QUEUED_MESSAGE: &str = "Saved offline. Will sync when online.";

/// Synthetic acknowledgment for a write stored locally instead of sent.
///
/// Serializes as
/// `{"queued": true, "offline": true, "queue_id": "..", "message": ".."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAck {
    pub queued: bool,
    pub offline: bool,
    pub queue_id: String,
    pub message: String,
}

impl QueuedAck {
    #[must_use]
    pub fn for_item(item: &QueueItem) -> Self {
        Self {
            queued: true,
            offline: true,
            queue_id: item.id.clone(),
            message: QUEUED_MESSAGE.to_string(),
        }
    }
}

/// Result of a write through the façade.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The server accepted the write; carries its reply (`Null` for deletes)
    Applied(Value),
    /// The write is queued for the next drain
    Queued(QueuedAck),
}

impl WriteOutcome {
    #[must_use]
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    /// Server reply, if the write was applied.
    #[must_use]
    pub fn applied(&self) -> Option<&Value> {
        match self {
            Self::Applied(v) => Some(v),
            Self::Queued(_) => None,
        }
    }

    #[must_use]
    pub fn queued(&self) -> Option<&QueuedAck> {
        match self {
            Self::Queued(ack) => Some(ack),
            Self::Applied(_) => None,
        }
    }
}
