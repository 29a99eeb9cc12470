//! Outbox dispatcher - delivers staged notifications to an external transport.
//!
//! Engine operations only append rows to `outbox_events` inside their own
//! transaction (see [`crate::core::notification::publish`]). Delivery happens here,
//! after commit, and never feeds back into the engine: a failed delivery is logged,
//! counted on the row and retried on the next drain.

use crate::{
    entities::{OutboxEvent, outbox_event},
    errors::Result,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*, sea_query::Expr};
use tracing::{debug, info, warn};

/// Error reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Publish failed: {message}")]
pub struct PublishError {
    pub message: String,
}

impl PublishError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Pub/sub transport seam.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Delivers one payload to a named subscriber group.
    async fn publish(&self, topic: &str, payload: &str) -> std::result::Result<(), PublishError>;
}

/// Publisher that only writes deliveries to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

#[async_trait]
impl Publisher for TracingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> std::result::Result<(), PublishError> {
        info!(topic, payload, "Notification delivered");
        Ok(())
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Undispatched events, oldest first.
pub async fn pending_events(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<outbox_event::Model>> {
    OutboxEvent::find()
        .filter(outbox_event::Column::DispatchedAt.is_null())
        .order_by_asc(outbox_event::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Delivers up to `batch_size` pending events through `publisher`.
///
/// Delivery is at-least-once: an event is marked dispatched only after the
/// publisher accepted it, so a crash in between redelivers it.
///
/// # Errors
/// Only database failures; publisher failures are recorded on the event row.
pub async fn drain_outbox<P>(
    db: &DatabaseConnection,
    publisher: &P,
    batch_size: u64,
) -> Result<DrainReport>
where
    P: Publisher + ?Sized,
{
    let mut report = DrainReport::default();

    for event in pending_events(db, batch_size).await? {
        match publisher.publish(&event.topic, &event.payload).await {
            Ok(()) => {
                let mut active: outbox_event::ActiveModel = event.into();
                active.dispatched_at = Set(Some(Utc::now()));
                active.last_error = Set(None);
                active.update(db).await?;
                report.delivered += 1;
            }
            Err(err) => {
                warn!(
                    event_id = event.id,
                    topic = %event.topic,
                    attempts = event.attempts + 1,
                    error = %err,
                    "Notification delivery failed"
                );
                OutboxEvent::update_many()
                    .col_expr(
                        outbox_event::Column::Attempts,
                        Expr::col(outbox_event::Column::Attempts).add(1),
                    )
                    .col_expr(
                        outbox_event::Column::LastError,
                        Expr::value(Some(err.message)),
                    )
                    .filter(outbox_event::Column::Id.eq(event.id))
                    .exec(db)
                    .await?;
                report.failed += 1;
            }
        }
    }

    debug!(
        delivered = report.delivered,
        failed = report.failed,
        "Outbox drain finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::notification, test_utils::*};
    use sea_orm::TransactionTrait;

    async fn stage(db: &DatabaseConnection, topics: &[&str]) -> Result<()> {
        let txn = db.begin().await?;
        for topic in topics {
            notification::publish(
                &txn,
                topic,
                &notification::Notification::order_placed(1, 1, 12.5),
            )
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_drain_delivers_oldest_first_and_marks_dispatched() -> Result<()> {
        let db = setup_test_db().await?;
        stage(&db, &["restaurant_1_waiters", "restaurant_1_owner"]).await?;

        let publisher = RecordingPublisher::default();
        let report = drain_outbox(&db, &publisher, 100).await?;

        assert_eq!(report, DrainReport { delivered: 2, failed: 0 });
        assert_eq!(
            publisher.topics(),
            vec!["restaurant_1_waiters", "restaurant_1_owner"]
        );
        assert!(pending_events(&db, 100).await?.is_empty());

        // Second drain has nothing left to send
        let report = drain_outbox(&db, &publisher, 100).await?;
        assert_eq!(report, DrainReport::default());
        assert_eq!(publisher.topics().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_delivery_is_kept_for_retry() -> Result<()> {
        let db = setup_test_db().await?;
        stage(&db, &["restaurant_1_owner"]).await?;

        let report = drain_outbox(&db, &FailingPublisher, 100).await?;
        assert_eq!(report, DrainReport { delivered: 0, failed: 1 });
        let report = drain_outbox(&db, &FailingPublisher, 100).await?;
        assert_eq!(report.failed, 1);

        let pending = pending_events(&db, 100).await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 2);
        assert!(
            pending[0]
                .last_error
                .as_deref()
                .is_some_and(|e| e.contains("transport unavailable"))
        );

        let publisher = RecordingPublisher::default();
        let report = drain_outbox(&db, &publisher, 100).await?;
        assert_eq!(report.delivered, 1);
        assert!(pending_events(&db, 100).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_drain_respects_batch_size() -> Result<()> {
        let db = setup_test_db().await?;
        stage(&db, &["a", "b", "c"]).await?;

        let publisher = RecordingPublisher::default();
        assert_eq!(drain_outbox(&db, &publisher, 2).await?.delivered, 2);
        assert_eq!(drain_outbox(&db, &publisher, 2).await?.delivered, 1);
        assert_eq!(publisher.topics(), vec!["a", "b", "c"]);
        Ok(())
    }
}
