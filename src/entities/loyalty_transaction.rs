//! Loyalty transaction entity - Append-only ledger of loyalty point movements.
//!
//! `earned` and `spent` rows store a positive magnitude; `refunded` rows store the signed
//! compensation (negative when reversing an award, positive when returning spent points).
//! Rows are never updated or deleted by the engine.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "loyalty_transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_profile_id: i64,
    /// Order that caused the movement, if any
    pub order_id: Option<i64>,
    pub points: i64,
    pub transaction_type: LoyaltyTransactionType,
    pub description: String,
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Effect of this row on the running balance.
    #[must_use]
    pub const fn signed_delta(&self) -> i64 {
        match self.transaction_type {
            LoyaltyTransactionType::Earned | LoyaltyTransactionType::Refunded => self.points,
            LoyaltyTransactionType::Spent => -self.points,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum LoyaltyTransactionType {
    #[sea_orm(string_value = "earned")]
    Earned,
    #[sea_orm(string_value = "spent")]
    Spent,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl fmt::Display for LoyaltyTransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Earned => "earned",
            Self::Spent => "spent",
            Self::Refunded => "refunded",
        })
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user_profile::Entity",
        from = "Column::UserProfileId",
        to = "super::user_profile::Column::Id",
        on_delete = "Cascade"
    )]
    UserProfile,
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "SetNull"
    )]
    Order,
}

impl Related<super::user_profile::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserProfile.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
