//! Notification fan-out - subscriber group naming and outbox staging.
//!
//! Nothing here talks to a transport. [`publish`] appends an event row on the caller's
//! connection, so a notification exists exactly when the change it announces was
//! committed. [`crate::core::outbox::drain_outbox`] delivers it afterwards.

use crate::{
    entities::{Language, OrderStatus, outbox_event, order},
    errors::Result,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Channel every waiter of the restaurant listens on.
pub fn waiters_group(restaurant_id: i64) -> String {
    format!("restaurant_{restaurant_id}_waiters")
}

/// Channel for the restaurant owner's dashboard.
pub fn owner_group(restaurant_id: i64) -> String {
    format!("restaurant_{restaurant_id}_owner")
}

/// Per-order channel the ordering customer (or anonymous diner) listens on.
pub fn order_customer_group(order_id: i64) -> String {
    format!("order_{order_id}_customer")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    OrderPlaced,
    StatusChanged,
    OrderCancelled,
}

impl EventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderPlaced => "order_placed",
            Self::StatusChanged => "status_changed",
            Self::OrderCancelled => "order_cancelled",
        }
    }
}

/// JSON body of an outbox event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: EventType,
    pub order_id: i64,
    pub restaurant_id: i64,
    pub status: OrderStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price: Option<f64>,
    /// Who caused the change, for the owner dashboard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl Notification {
    pub fn order_placed(order_id: i64, restaurant_id: i64, total_price: f64) -> Self {
        Self {
            event: EventType::OrderPlaced,
            order_id,
            restaurant_id,
            status: OrderStatus::Pending,
            message: format!("New order #{order_id}"),
            total_price: Some(total_price),
            actor: None,
        }
    }

    /// Customer-facing status update carrying the localized label.
    pub fn status_for_customer(order: &order::Model, language: Language) -> Self {
        Self {
            event: EventType::StatusChanged,
            order_id: order.id,
            restaurant_id: order.restaurant_id,
            status: order.status,
            message: order.status.label(language).to_string(),
            total_price: None,
            actor: None,
        }
    }

    /// Owner-facing status update naming the actor.
    pub fn status_for_owner(order: &order::Model, actor: &str) -> Self {
        Self {
            event: EventType::StatusChanged,
            order_id: order.id,
            restaurant_id: order.restaurant_id,
            status: order.status,
            message: format!("Order #{} is now {}", order.id, order.status),
            total_price: None,
            actor: Some(actor.to_string()),
        }
    }

    pub fn order_cancelled(order: &order::Model, message: String, actor: &str) -> Self {
        Self {
            event: EventType::OrderCancelled,
            order_id: order.id,
            restaurant_id: order.restaurant_id,
            status: order.status,
            message,
            total_price: Some(order.total_price),
            actor: Some(actor.to_string()),
        }
    }
}

/// Stages a notification for `group` on the caller's connection.
///
/// # Errors
/// Serialization or database failures; the caller's transaction should abort.
pub async fn publish<C>(
    conn: &C,
    group: &str,
    notification: &Notification,
) -> Result<outbox_event::Model>
where
    C: ConnectionTrait,
{
    let payload = serde_json::to_string(notification)?;
    let event = outbox_event::ActiveModel {
        topic: Set(group.to_string()),
        event_type: Set(notification.event.as_str().to_string()),
        payload: Set(payload),
        created_at: Set(Utc::now()),
        dispatched_at: Set(None),
        attempts: Set(0),
        last_error: Set(None),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    debug!(
        event_id = event.id,
        topic = group,
        event_type = notification.event.as_str(),
        order_id = notification.order_id,
        "Staged notification"
    );
    Ok(event)
}

/// New order: waiters and owner of the restaurant.
pub(crate) async fn notify_order_placed<C>(conn: &C, order: &order::Model) -> Result<()>
where
    C: ConnectionTrait,
{
    let notification = Notification::order_placed(order.id, order.restaurant_id, order.total_price);
    publish(conn, &waiters_group(order.restaurant_id), &notification).await?;
    publish(conn, &owner_group(order.restaurant_id), &notification).await?;
    Ok(())
}

/// Status change: the order's customer in their language, and the owner with the actor.
pub(crate) async fn notify_status_changed<C>(
    conn: &C,
    order: &order::Model,
    language: Language,
    actor: &str,
) -> Result<()>
where
    C: ConnectionTrait,
{
    publish(
        conn,
        &order_customer_group(order.id),
        &Notification::status_for_customer(order, language),
    )
    .await?;
    publish(
        conn,
        &owner_group(order.restaurant_id),
        &Notification::status_for_owner(order, actor),
    )
    .await?;
    Ok(())
}

/// Cancellation: waiters, owner and the order's customer.
pub(crate) async fn notify_order_cancelled<C>(
    conn: &C,
    order: &order::Model,
    language: Language,
    actor: &str,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let staff_view = Notification::order_cancelled(
        order,
        format!("Order #{} was cancelled", order.id),
        actor,
    );
    publish(conn, &waiters_group(order.restaurant_id), &staff_view).await?;
    publish(conn, &owner_group(order.restaurant_id), &staff_view).await?;

    let customer_view = Notification::order_cancelled(
        order,
        OrderStatus::Cancelled.label(language).to_string(),
        actor,
    );
    publish(conn, &order_customer_group(order.id), &customer_view).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::outbox::pending_events, test_utils::*};
    use sea_orm::TransactionTrait;

    #[test]
    fn test_group_names() {
        assert_eq!(waiters_group(3), "restaurant_3_waiters");
        assert_eq!(owner_group(3), "restaurant_3_owner");
        assert_eq!(order_customer_group(41), "order_41_customer");
    }

    #[test]
    fn test_payload_shape() -> Result<()> {
        let json = serde_json::to_value(Notification::order_placed(7, 2, 30.5))?;
        assert_eq!(json["event"], "order_placed");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["order_id"], 7);
        assert_eq!(json["total_price"], 30.5);
        assert!(json.get("actor").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_is_rolled_back_with_its_transaction() -> Result<()> {
        let db = setup_test_db().await?;

        let txn = db.begin().await?;
        publish(&txn, "restaurant_1_owner", &Notification::order_placed(1, 1, 5.0)).await?;
        drop(txn);
        assert!(pending_events(&db, 10).await?.is_empty());

        let txn = db.begin().await?;
        let event =
            publish(&txn, "restaurant_1_owner", &Notification::order_placed(1, 1, 5.0)).await?;
        txn.commit().await?;

        let pending = pending_events(&db, 10).await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, event.id);
        assert_eq!(pending[0].event_type, "order_placed");
        assert_eq!(pending[0].attempts, 0);
        let body: Notification = serde_json::from_str(&pending[0].payload)?;
        assert_eq!(body.order_id, 1);
        Ok(())
    }
}
