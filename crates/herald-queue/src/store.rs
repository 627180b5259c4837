//! Persistence operations for the appservice event queue.
//!
//! [`EventQueueStore`] owns the SQL for every queue operation. It holds no
//! connection of its own: each method takes the connection to run on, which
//! may be a plain pooled connection or an open transaction. Statements go
//! through the connection's prepared-statement cache, so the same store
//! works inside and outside a transaction scope.

use std::sync::Arc;

use herald_db::with_transaction;
use herald_types::{AppServiceEvent, QueuedEvent, SourceEvent};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::error::QueueError;

const INSERT_EVENT_SQL: &str = "INSERT INTO appservice_events
        (destination_id, event_id, origin_server_ts, room_id, event_type, sender, content_json, transaction_ref)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
     RETURNING sequence_id";

const COUNT_BY_DESTINATION_SQL: &str =
    "SELECT COUNT(*) FROM appservice_events WHERE destination_id = ?1";

const SELECT_BY_DESTINATION_SQL: &str = "SELECT sequence_id, destination_id, event_id, origin_server_ts, room_id,
            event_type, sender, content_json, transaction_ref
     FROM appservice_events
     WHERE destination_id = ?1
     ORDER BY sequence_id ASC
     LIMIT ?2";

const DELETE_UP_TO_SEQUENCE_SQL: &str =
    "DELETE FROM appservice_events WHERE destination_id = ?1 AND sequence_id <= ?2";

// An unknown event id makes the subquery NULL, which matches no rows. A
// repeated event id bounds at its latest copy.
const DELETE_UP_TO_EVENT_SQL: &str = "DELETE FROM appservice_events
     WHERE destination_id = ?1
       AND sequence_id <= (
           SELECT MAX(sequence_id) FROM appservice_events
           WHERE destination_id = ?1 AND event_id = ?2
       )";

const NEXT_TXN_REF_SQL: &str = "INSERT INTO appservice_txn_counters (destination_id, last_txn_ref)
     VALUES (?1, 1)
     ON CONFLICT (destination_id) DO UPDATE SET last_txn_ref = last_txn_ref + 1
     RETURNING last_txn_ref";

const BACKLOG_SQL: &str = "SELECT destination_id, COUNT(*) FROM appservice_events
     GROUP BY destination_id
     ORDER BY destination_id";

const STATEMENTS: &[&str] = &[
    INSERT_EVENT_SQL,
    COUNT_BY_DESTINATION_SQL,
    SELECT_BY_DESTINATION_SQL,
    DELETE_UP_TO_SEQUENCE_SQL,
    DELETE_UP_TO_EVENT_SQL,
    NEXT_TXN_REF_SQL,
    BACKLOG_SQL,
];

/// The appservice event queue.
///
/// Construct once at startup and share by cloning; clones are cheap.
#[derive(Clone)]
pub struct EventQueueStore {
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueueStore").finish_non_exhaustive()
    }
}

impl EventQueueStore {
    /// Builds a store using the system clock.
    ///
    /// Every statement the store owns is prepared against `conn` once, so a
    /// database without the queue schema is rejected here rather than on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::BackendUnavailable` if a statement fails to
    /// prepare.
    pub fn new(conn: &Connection) -> Result<Self, QueueError> {
        Self::with_clock(conn, Arc::new(SystemClock))
    }

    /// Builds a store that derives event age from `clock`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::BackendUnavailable` if a statement fails to
    /// prepare.
    pub fn with_clock(conn: &Connection, clock: Arc<dyn Clock>) -> Result<Self, QueueError> {
        for sql in STATEMENTS {
            conn.prepare_cached(sql)?;
        }
        Ok(Self { clock })
    }

    /// Appends one event to `destination_id`'s queue.
    ///
    /// Returns the sequence id assigned to the new row.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidDestination` for an empty destination,
    /// `QueueError::InvalidEvent` for an empty event id or content that is
    /// not JSON, and a backend error if the insert fails.
    pub fn insert_event(
        &self,
        conn: &Connection,
        destination_id: &str,
        event: &SourceEvent,
    ) -> Result<i64, QueueError> {
        validate_destination(destination_id)?;
        validate_event(event)?;

        let mut stmt = conn.prepare_cached(INSERT_EVENT_SQL)?;
        let sequence_id: i64 = stmt.query_row(
            params![
                destination_id,
                event.event_id,
                event.origin_server_ts,
                event.room_id,
                event.event_type,
                event.sender,
                event.content,
            ],
            |row| row.get(0),
        )?;

        tracing::debug!(
            destination_id,
            event_id = %event.event_id,
            sequence_id,
            "queued event for appservice"
        );

        Ok(sequence_id)
    }

    /// Queues `event` for every destination in `destinations`, atomically.
    ///
    /// Either every row is written or none is. Returns the assigned sequence
    /// ids in the order of `destinations`.
    ///
    /// # Errors
    ///
    /// Returns the first validation or backend error; nothing is written in
    /// that case.
    pub fn enqueue<S: AsRef<str>>(
        &self,
        conn: &mut Connection,
        destinations: &[S],
        event: &SourceEvent,
    ) -> Result<Vec<i64>, QueueError> {
        with_transaction(conn, |tx| {
            destinations
                .iter()
                .map(|destination| self.insert_event(tx, destination.as_ref(), event))
                .collect()
        })
    }

    /// Number of events currently queued for `destination_id`.
    ///
    /// A destination that has never been used has a count of zero.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the count query fails.
    pub fn count_by_destination(
        &self,
        conn: &Connection,
        destination_id: &str,
    ) -> Result<u64, QueueError> {
        let mut stmt = conn.prepare_cached(COUNT_BY_DESTINATION_SQL)?;
        let count: Option<i64> = stmt
            .query_row(params![destination_id], |row| row.get(0))
            .optional()?;
        Ok(count.map_or(0, |c| c.max(0) as u64))
    }

    /// Returns up to `limit` of the oldest events queued for `destination_id`.
    ///
    /// Results are ordered by sequence id, oldest first, as two parallel
    /// vectors: the event ids and the events. Each event's `age` is computed
    /// from the store's clock at the time of this call.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidLimit` when `limit` is zero,
    /// `QueueError::Serialization` if stored content is not JSON, and a
    /// backend error if the query fails.
    pub fn select_events_by_destination(
        &self,
        conn: &Connection,
        destination_id: &str,
        limit: usize,
    ) -> Result<(Vec<String>, Vec<AppServiceEvent>), QueueError> {
        if limit == 0 {
            return Err(QueueError::InvalidLimit);
        }
        let sql_limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare_cached(SELECT_BY_DESTINATION_SQL)?;
        let rows = stmt.query_map(params![destination_id, sql_limit], |row| {
            Ok(QueuedEvent {
                sequence_id: row.get(0)?,
                destination_id: row.get(1)?,
                event_id: row.get(2)?,
                origin_server_ts: row.get(3)?,
                room_id: row.get(4)?,
                event_type: row.get(5)?,
                sender: row.get(6)?,
                content_json: row.get(7)?,
                transaction_ref: row.get(8)?,
            })
        })?;

        let now = self.clock.now_millis();
        let mut event_ids = Vec::new();
        let mut events = Vec::new();
        for row in rows {
            let queued = row?;
            event_ids.push(queued.event_id.clone());
            events.push(to_appservice_event(queued, now)?);
        }

        Ok((event_ids, events))
    }

    /// Deletes `destination_id`'s events up to and including `event_id`.
    ///
    /// The bound is the sequence id of the row holding `event_id`, so events
    /// are removed in queue order regardless of how event ids compare as
    /// strings. An event id that is not queued deletes nothing. If the same
    /// event id is queued more than once for the destination, the bound is
    /// its latest copy, so everything up to that copy is removed. Callers
    /// that need to stop at an earlier copy use
    /// [`delete_up_to_sequence`](Self::delete_up_to_sequence). Returns the
    /// number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the delete fails.
    pub fn delete_up_to_id(
        &self,
        conn: &Connection,
        destination_id: &str,
        event_id: &str,
    ) -> Result<usize, QueueError> {
        let mut stmt = conn.prepare_cached(DELETE_UP_TO_EVENT_SQL)?;
        let deleted = stmt.execute(params![destination_id, event_id])?;

        tracing::debug!(
            destination_id,
            event_id,
            deleted,
            "truncated appservice queue"
        );
        Ok(deleted)
    }

    /// Deletes `destination_id`'s events with sequence id ≤ `sequence_id`.
    ///
    /// Returns the number of rows deleted; repeating the call deletes none.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the delete fails.
    pub fn delete_up_to_sequence(
        &self,
        conn: &Connection,
        destination_id: &str,
        sequence_id: i64,
    ) -> Result<usize, QueueError> {
        let mut stmt = conn.prepare_cached(DELETE_UP_TO_SEQUENCE_SQL)?;
        let deleted = stmt.execute(params![destination_id, sequence_id])?;

        tracing::debug!(
            destination_id,
            sequence_id,
            deleted,
            "truncated appservice queue"
        );
        Ok(deleted)
    }

    /// Hands out the next transaction reference for `destination_id`.
    ///
    /// References start at 1 and increase by one per call, independently for
    /// each destination.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidDestination` for an empty destination and
    /// a backend error if the counter update fails.
    pub fn next_transaction_ref(
        &self,
        conn: &Connection,
        destination_id: &str,
    ) -> Result<i64, QueueError> {
        validate_destination(destination_id)?;
        let mut stmt = conn.prepare_cached(NEXT_TXN_REF_SQL)?;
        Ok(stmt.query_row(params![destination_id], |row| row.get(0))?)
    }

    /// Queued event count for every destination that has any.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the query fails.
    pub fn backlog(&self, conn: &Connection) -> Result<Vec<(String, u64)>, QueueError> {
        let mut stmt = conn.prepare_cached(BACKLOG_SQL)?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut backlog = Vec::new();
        for row in rows {
            let (destination_id, count) = row?;
            backlog.push((destination_id, count.max(0) as u64));
        }
        Ok(backlog)
    }
}

fn validate_destination(destination_id: &str) -> Result<(), QueueError> {
    if destination_id.trim().is_empty() {
        return Err(QueueError::InvalidDestination);
    }
    Ok(())
}

fn validate_event(event: &SourceEvent) -> Result<(), QueueError> {
    if event.event_id.is_empty() {
        return Err(QueueError::InvalidEvent("event id is empty".to_string()));
    }
    if let Some(content) = &event.content {
        serde_json::from_str::<Value>(content).map_err(|e| {
            QueueError::InvalidEvent(format!("content is not valid JSON: {e}"))
        })?;
    }
    Ok(())
}

fn to_appservice_event(
    queued: QueuedEvent,
    now_millis: i64,
) -> Result<AppServiceEvent, QueueError> {
    let age = queued.age_at(now_millis);
    let content = match queued.content_json.as_deref() {
        Some(json) => serde_json::from_str(json)?,
        None => Value::Object(serde_json::Map::new()),
    };

    Ok(AppServiceEvent {
        sequence_id: queued.sequence_id,
        event_id: queued.event_id,
        origin_server_ts: queued.origin_server_ts,
        age,
        room_id: queued.room_id,
        event_type: queued.event_type,
        user_id: queued.sender.clone(),
        sender: queued.sender,
        content,
    })
}
