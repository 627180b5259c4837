//! Durable per-destination event queue for appservice delivery.
//!
//! Every event bound for an application service is appended to the shared
//! `appservice_events` table, tagged with its destination. Each destination
//! reads its own slice of that table oldest-first and truncates it once a
//! batch has been delivered.
//!
//! # Ordering
//!
//! The table's `AUTOINCREMENT` primary key is the sequence id. It is the only
//! ordering the queue relies on: reads are ordered by it and truncation is a
//! prefix delete bounded by it. Wall-clock timestamps are carried for the
//! appservice's benefit only.
//!
//! # Usage
//!
//! ```rust,ignore
//! use herald_queue::EventQueueStore;
//!
//! let store = EventQueueStore::new(&conn)?;
//! store.enqueue(&mut conn, &["irc-bridge", "slack-bridge"], &event)?;
//!
//! let (event_ids, events) = store.select_events_by_destination(&conn, "irc-bridge", 50)?;
//! // ... deliver ...
//! if let Some(last) = events.last() {
//!     store.delete_up_to_sequence(&conn, "irc-bridge", last.sequence_id)?;
//! }
//! ```

mod clock;
mod error;
mod store;

pub use clock::{Clock, SystemClock};
pub use error::QueueError;
pub use store::EventQueueStore;
