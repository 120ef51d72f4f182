//! Pending mutation records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Kind of mutation a [`QueueItem`] replays against the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A mutation waiting to be sent.
///
/// Items are immutable once enqueued; the queue only ever appends, removes,
/// or replaces whole records.
///
/// # Example
///
/// ```
/// use offline_sync::{QueueItem, Operation};
/// use serde_json::json;
///
/// let item = QueueItem::new("Trip", Some("T1".into()), Operation::Update, json!({"status": "started"}));
/// assert_eq!(item.target(), "Trip:T1");
/// assert!(item.enqueued_at > 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Time-ordered unique id (UUIDv7: millisecond timestamp + random bits)
    pub id: String,
    /// Target collection (e.g. `Trip`, `Vehicle`)
    pub resource_type: String,
    /// Target document; `None` for creates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_key: Option<String>,
    pub payload: Value,
    pub operation: Operation,
    /// Enqueue time (epoch millis)
    pub enqueued_at: i64,
}

impl QueueItem {
    pub fn new(
        resource_type: impl Into<String>,
        resource_key: Option<String>,
        operation: Operation,
        payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            resource_type: resource_type.into(),
            resource_key,
            payload,
            operation,
            enqueued_at: epoch_millis(),
        }
    }

    /// `Type:key` for keyed items, `Type` (new document) for creates.
    #[must_use]
    pub fn target(&self) -> String {
        match &self.resource_key {
            Some(key) => format!("{}:{}", self.resource_type, key),
            None => self.resource_type.clone(),
        }
    }

    /// Whether this item mutates the given document.
    #[must_use]
    pub fn targets(&self, resource_type: &str, resource_key: &str) -> bool {
        self.resource_type == resource_type && self.resource_key.as_deref() == Some(resource_key)
    }
}
