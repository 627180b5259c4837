//! The seam between the queue and whatever pushes batches to appservices.
//!
//! Transport is not part of this crate. Workers hand each batch to a
//! [`Deliverer`]; a batch counts as delivered only when the deliverer
//! returns `Ok`, and only then is it removed from the queue.

use futures_util::future::BoxFuture;
use herald_types::DeliveryBatch;
use thiserror::Error;

/// Errors a deliverer reports for a batch it could not hand over.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The appservice could not be reached.
    #[error("appservice unreachable: {0}")]
    Unreachable(String),

    /// The appservice answered but did not accept the batch.
    #[error("appservice rejected batch: {0}")]
    Rejected(String),
}

/// Pushes a batch of events to its destination.
pub trait Deliverer: Send + Sync {
    /// Delivers `batch`. Returning `Ok` confirms every event in it.
    fn deliver<'a>(
        &'a self,
        batch: &'a DeliveryBatch,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Deliverer that writes each batch to the log and acknowledges it.
///
/// Used when the server runs without a transport attached, e.g. to drain a
/// queue while inspecting what would have been sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDeliverer;

impl Deliverer for LogDeliverer {
    fn deliver<'a>(
        &'a self,
        batch: &'a DeliveryBatch,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            let body = batch.push_body();
            tracing::info!(
                destination_id = %batch.destination_id,
                txn_ref = batch.txn_ref,
                events = batch.len(),
                body = %body,
                "delivered batch to log"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_types::AppServiceEvent;

    #[tokio::test]
    async fn log_deliverer_acknowledges_batches() {
        let batch = DeliveryBatch {
            destination_id: "irc-bridge".to_string(),
            txn_ref: 3,
            events: vec![AppServiceEvent {
                sequence_id: 1,
                event_id: "$a".to_string(),
                origin_server_ts: 1_000,
                age: 10,
                room_id: "!ops:example.org".to_string(),
                event_type: "m.room.message".to_string(),
                sender: "@alice:example.org".to_string(),
                user_id: "@alice:example.org".to_string(),
                content: serde_json::json!({}),
            }],
        };

        LogDeliverer
            .deliver(&batch)
            .await
            .expect("log deliverer should acknowledge");
    }
}
