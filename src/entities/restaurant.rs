//! Restaurant entity - Root aggregate of the catalog.
//!
//! A restaurant owns its categories, menu items, tables, staff, carts and orders;
//! deleting it cascades to all of them. The average rating is cached on the row
//! and only written by the explicit rating refresh.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Restaurant database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "restaurants")]
pub struct Model {
    /// Unique identifier for the restaurant
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name
    pub name: String,
    /// URL-safe unique handle derived from the name
    #[sea_orm(unique)]
    pub slug: String,
    /// Street address
    pub address: String,
    /// Contact phone number
    pub phone_number: String,
    /// Free-form opening hours, e.g. "Mon-Fri 9:00-22:00"
    pub opening_hours: String,
    /// Inactive restaurants accept no carts or orders
    pub is_active: bool,
    /// Last computed average review rating
    pub cached_rating: Option<f64>,
    /// When `cached_rating` was computed
    pub rating_cached_at: Option<DateTimeUtc>,
    /// When the restaurant was created
    pub created_at: DateTimeUtc,
    /// When the restaurant was last modified
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::category::Entity")]
    Categories,
    #[sea_orm(has_many = "super::menu_item::Entity")]
    MenuItems,
    #[sea_orm(has_many = "super::dining_table::Entity")]
    Tables,
    #[sea_orm(has_many = "super::staff::Entity")]
    Staff,
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Categories.def()
    }
}

impl Related<super::menu_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MenuItems.def()
    }
}

impl Related<super::dining_table::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tables.def()
    }
}

impl Related<super::staff::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Staff.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
