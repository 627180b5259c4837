//! Per-destination delivery workers.
//!
//! Each configured destination gets exactly one worker, so deletes for a
//! destination are never issued concurrently. A worker repeatedly reads the
//! oldest batch, hands it to the [`Deliverer`], and truncates the queue up to
//! the batch's last sequence id once delivery is confirmed. A failed delivery
//! deletes nothing; the next attempt re-reads the same rows.

use std::sync::Arc;
use std::time::Duration;

use herald_db::{run_blocking, DbPool};
use herald_queue::{EventQueueStore, QueueError};
use herald_types::DeliveryBatch;
use tokio::sync::watch;

use crate::config::DeliveryConfig;
use crate::delivery::Deliverer;

/// Tunables for one delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Maximum number of events per batch. Must be at least 1.
    pub batch_size: usize,
    /// Pause after an idle poll or a failed attempt.
    pub poll_interval: Duration,
    /// Deadline applied to each queue operation.
    pub operation_timeout: Option<Duration>,
}

impl From<&DeliveryConfig> for WorkerSettings {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_interval: config.poll_interval(),
            operation_timeout: config.operation_timeout(),
        }
    }
}

/// What a single delivery attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing was queued.
    Idle,
    /// The batch was delivered and removed from the queue.
    Delivered {
        /// Transaction reference the batch was sent under.
        txn_ref: i64,
        /// Events in the batch.
        events: usize,
        /// Rows removed from the queue.
        deleted: usize,
    },
    /// The deliverer refused or failed the batch; the queue is unchanged.
    Failed {
        /// Transaction reference the batch was sent under.
        txn_ref: i64,
        /// Events in the batch.
        events: usize,
    },
}

/// Runs one read → deliver → truncate cycle for `destination_id`.
///
/// # Errors
///
/// Returns a `QueueError` if reading the batch or truncating the queue fails.
/// Delivery failures are not errors; they are reported as
/// [`DeliveryOutcome::Failed`].
pub async fn deliver_once<D>(
    pool: &DbPool,
    store: &EventQueueStore,
    deliverer: &D,
    destination_id: &str,
    settings: WorkerSettings,
) -> Result<DeliveryOutcome, QueueError>
where
    D: Deliverer + ?Sized,
{
    let batch = {
        let store = store.clone();
        let destination_id = destination_id.to_string();
        run_blocking(pool, settings.operation_timeout, move |conn| {
            let (_, events) =
                store.select_events_by_destination(conn, &destination_id, settings.batch_size)?;
            if events.is_empty() {
                return Ok(None);
            }
            let txn_ref = store.next_transaction_ref(conn, &destination_id)?;
            Ok::<_, QueueError>(Some(DeliveryBatch {
                destination_id,
                txn_ref,
                events,
            }))
        })
        .await?
    };

    let Some(batch) = batch else {
        return Ok(DeliveryOutcome::Idle);
    };
    let Some(last_sequence_id) = batch.max_sequence_id() else {
        return Ok(DeliveryOutcome::Idle);
    };

    if let Err(e) = deliverer.deliver(&batch).await {
        tracing::warn!(
            destination_id,
            txn_ref = batch.txn_ref,
            events = batch.len(),
            error = %e,
            "batch delivery failed, leaving events queued"
        );
        return Ok(DeliveryOutcome::Failed {
            txn_ref: batch.txn_ref,
            events: batch.len(),
        });
    }

    let deleted = {
        let store = store.clone();
        let destination_id = destination_id.to_string();
        run_blocking(pool, settings.operation_timeout, move |conn| {
            store.delete_up_to_sequence(conn, &destination_id, last_sequence_id)
        })
        .await?
    };

    tracing::debug!(
        destination_id,
        txn_ref = batch.txn_ref,
        events = batch.len(),
        deleted,
        "batch delivered"
    );

    Ok(DeliveryOutcome::Delivered {
        txn_ref: batch.txn_ref,
        events: batch.len(),
        deleted,
    })
}

/// Runs the delivery loop for one destination until `shutdown` flips to true.
///
/// Full batches are followed immediately by the next attempt so a backlog
/// drains without waiting; idle polls, failed deliveries and queue errors
/// wait `poll_interval` first.
pub async fn start_delivery_task(
    pool: DbPool,
    store: EventQueueStore,
    deliverer: Arc<dyn Deliverer>,
    destination_id: String,
    settings: WorkerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        destination_id = %destination_id,
        batch_size = settings.batch_size,
        poll_interval_ms = settings.poll_interval.as_millis() as u64,
        "starting delivery worker"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let outcome = deliver_once(
            &pool,
            &store,
            deliverer.as_ref(),
            &destination_id,
            settings,
        )
        .await;

        let wait = match outcome {
            Ok(DeliveryOutcome::Delivered { events, .. }) => events < settings.batch_size,
            Ok(DeliveryOutcome::Idle) | Ok(DeliveryOutcome::Failed { .. }) => true,
            Err(e) => {
                tracing::error!(
                    destination_id = %destination_id,
                    retryable = e.is_retryable(),
                    error = %e,
                    "delivery worker queue operation failed"
                );
                true
            }
        };

        if wait {
            tokio::select! {
                _ = tokio::time::sleep(settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    // A dropped sender also means shut down.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(destination_id = %destination_id, "delivery worker stopped");
}
