//! Shared types for the Herald appservice event queue.
//!
//! This crate defines the records that cross crate boundaries: the event a
//! producer hands to the queue, the event shape delivered to an appservice,
//! and the batch a delivery worker pushes in one attempt. It carries no
//! storage or runtime dependencies so every other crate can depend on it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event as supplied by the producer side of the queue.
///
/// Only the fields the queue persists are modelled here. `content` is the
/// already-serialised JSON body of the event; `None` means the event carries
/// no content and is delivered as an empty object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    /// Identifier of the source event.
    pub event_id: String,
    /// Wall-clock time the event was created at its origin, in milliseconds.
    pub origin_server_ts: i64,
    /// Room the event was sent in.
    pub room_id: String,
    /// Event type, e.g. `m.room.message`.
    pub event_type: String,
    /// User that sent the event.
    pub sender: String,
    /// Serialised JSON content, if any.
    pub content: Option<String>,
}

/// One stored queue row, exactly as persisted.
///
/// Rows are created by an insert and removed by a range delete; they are
/// never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    /// Store-assigned, strictly increasing sequence id.
    pub sequence_id: i64,
    /// Appservice this row is queued for.
    pub destination_id: String,
    /// Identifier of the source event.
    pub event_id: String,
    /// Origin timestamp in milliseconds.
    pub origin_server_ts: i64,
    /// Room the event was sent in.
    pub room_id: String,
    /// Event type.
    pub event_type: String,
    /// User that sent the event.
    pub sender: String,
    /// Serialised content, `None` when the event had none.
    pub content_json: Option<String>,
    /// Reserved delivery-batch reference; not used to filter reads.
    pub transaction_ref: Option<i64>,
}

impl QueuedEvent {
    /// Milliseconds between the origin timestamp and `now_millis`.
    pub fn age_at(&self, now_millis: i64) -> i64 {
        now_millis - self.origin_server_ts
    }
}

/// An event as delivered to an appservice.
///
/// `age` is derived from `origin_server_ts` at read time and is never
/// persisted, so the same queued row reports a larger age on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppServiceEvent {
    /// Queue sequence id of the row this event was read from.
    #[serde(skip)]
    pub sequence_id: i64,
    /// Identifier of the source event.
    pub event_id: String,
    /// Origin timestamp in milliseconds.
    pub origin_server_ts: i64,
    /// Milliseconds elapsed between the origin timestamp and the read.
    pub age: i64,
    /// Room the event was sent in.
    pub room_id: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// User that sent the event.
    pub sender: String,
    /// Legacy alias of `sender` still read by older appservices.
    pub user_id: String,
    /// Event content; `{}` when the queued row had none.
    pub content: Value,
}

/// A bounded, ordered slice of queued events for one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryBatch {
    /// Appservice the batch is addressed to.
    pub destination_id: String,
    /// Per-destination transaction reference labelling this attempt.
    pub txn_ref: i64,
    /// Events in queue order (oldest first).
    pub events: Vec<AppServiceEvent>,
}

impl DeliveryBatch {
    /// Highest sequence id in the batch, or `None` for an empty batch.
    ///
    /// Events are ordered by sequence id, so this is the id of the last event.
    pub fn max_sequence_id(&self) -> Option<i64> {
        self.events.last().map(|event| event.sequence_id)
    }

    /// Returns the JSON body pushed to the appservice for this batch.
    pub fn push_body(&self) -> Value {
        serde_json::json!({ "events": self.events })
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch carries no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
