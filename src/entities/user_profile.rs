//! User profile entity - A registered customer (or staff member) identity.
//!
//! `loyalty_points` is a running total denormalized from the loyalty ledger.
//! It is only ever changed together with a ledger insert in the same database
//! transaction (see [`crate::core::loyalty`]).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// User profile database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_profiles")]
pub struct Model {
    /// Unique identifier for the profile
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Messenger account the customer signed up with
    #[sea_orm(unique)]
    pub telegram_id: String,
    pub phone_number: String,
    /// Denormalized loyalty balance
    pub loyalty_points: i64,
    /// Language used for customer-facing labels
    pub preferred_language: Language,
    /// Prefilled address for delivery orders
    pub default_delivery_address: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

/// Supported customer languages
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
pub enum Language {
    #[default]
    #[sea_orm(string_value = "uz")]
    #[serde(rename = "uz")]
    Uzbek,
    #[sea_orm(string_value = "ru")]
    #[serde(rename = "ru")]
    Russian,
    #[sea_orm(string_value = "en")]
    #[serde(rename = "en")]
    English,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uzbek => "uz",
            Self::Russian => "ru",
            Self::English => "en",
        })
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::loyalty_transaction::Entity")]
    LoyaltyTransactions,
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::loyalty_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LoyaltyTransactions.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
