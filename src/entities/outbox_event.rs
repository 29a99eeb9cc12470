//! Outbox event entity - Notification staged in the same transaction as the change
//! it announces, delivered later by the outbox drain.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "outbox_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Subscriber group, e.g. `restaurant_3_waiters`
    #[sea_orm(indexed)]
    pub topic: String,
    /// Event name, e.g. `order_placed`
    pub event_type: String,
    /// JSON-encoded notification body
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    pub created_at: DateTimeUtc,
    /// Set once the publisher accepted the event
    pub dispatched_at: Option<DateTimeUtc>,
    /// Failed delivery attempts so far
    pub attempts: i32,
    pub last_error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
