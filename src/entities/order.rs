//! Order entity - Immutable, priced snapshot of a checkout plus its lifecycle status.
//!
//! Prices are frozen on the order and its items at placement time; only `status`,
//! `assigned_staff_id` and `updated_at` change afterwards.
//!
//! ```text
//! pending -> accepted -> preparing -> ready -> served
//! pending -> cancelled
//! accepted -> cancelled
//! ```

use super::user_profile::Language;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    /// Unique identifier for the order
    #[sea_orm(primary_key)]
    pub id: i64,
    pub restaurant_id: i64,
    /// Ordering customer, `None` for anonymous table orders
    pub user_profile_id: Option<i64>,
    /// Table the order was placed from, `None` for delivery
    pub table_id: Option<i64>,
    /// Staff member who last moved the order through the kitchen
    pub assigned_staff_id: Option<i64>,
    pub status: OrderStatus,
    /// Amount due, frozen at placement
    pub total_price: f64,
    /// Menu discounts plus redeemed loyalty value, frozen at placement
    pub discount_amount: f64,
    /// Loyalty points redeemed against this order
    pub points_redeemed: i64,
    /// Recorded label only, no payment is processed
    pub payment_method: Option<PaymentMethod>,
    #[sea_orm(column_type = "Text")]
    pub notes: String,
    #[sea_orm(column_type = "Text")]
    pub delivery_address: String,
    pub estimated_delivery_time: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "accepted")]
    Accepted,
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "ready")]
    Ready,
    #[sea_orm(string_value = "served")]
    Served,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Whether `self -> next` is an edge of the lifecycle graph.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Accepted | Self::Cancelled)
                | (Self::Accepted, Self::Preparing | Self::Cancelled)
                | (Self::Preparing, Self::Ready)
                | (Self::Ready, Self::Served)
        )
    }

    /// Cancellation is only possible before the kitchen starts.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        self.can_transition_to(Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Served => "served",
            Self::Cancelled => "cancelled",
        }
    }

    /// Customer-facing label in the given language.
    #[must_use]
    pub const fn label(self, language: Language) -> &'static str {
        match language {
            Language::English => match self {
                Self::Pending => "Pending",
                Self::Accepted => "Accepted",
                Self::Preparing => "Preparing",
                Self::Ready => "Ready",
                Self::Served => "Served",
                Self::Cancelled => "Cancelled",
            },
            Language::Russian => match self {
                Self::Pending => "Ожидает",
                Self::Accepted => "Принят",
                Self::Preparing => "Готовится",
                Self::Ready => "Готов",
                Self::Served => "Подан",
                Self::Cancelled => "Отменён",
            },
            Language::Uzbek => match self {
                Self::Pending => "Kutilmoqda",
                Self::Accepted => "Qabul qilindi",
                Self::Preparing => "Tayyorlanmoqda",
                Self::Ready => "Tayyor",
                Self::Served => "Berildi",
                Self::Cancelled => "Bekor qilindi",
            },
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the customer intends to pay; stored as a label only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cash")]
    Cash,
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "online")]
    Online,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::restaurant::Entity",
        from = "Column::RestaurantId",
        to = "super::restaurant::Column::Id",
        on_delete = "Cascade"
    )]
    Restaurant,
    #[sea_orm(
        belongs_to = "super::user_profile::Entity",
        from = "Column::UserProfileId",
        to = "super::user_profile::Column::Id",
        on_delete = "SetNull"
    )]
    UserProfile,
    #[sea_orm(
        belongs_to = "super::dining_table::Entity",
        from = "Column::TableId",
        to = "super::dining_table::Column::Id",
        on_delete = "SetNull"
    )]
    Table,
    #[sea_orm(
        belongs_to = "super::staff::Entity",
        from = "Column::AssignedStaffId",
        to = "super::staff::Column::Id",
        on_delete = "SetNull"
    )]
    AssignedStaff,
    #[sea_orm(has_many = "super::order_item::Entity")]
    Items,
    #[sea_orm(has_many = "super::review::Entity")]
    Reviews,
}

impl Related<super::restaurant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Restaurant.def()
    }
}

impl Related<super::user_profile::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserProfile.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reviews.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
