//! Menu item entity - A priced, stocked dish on a restaurant's menu.
//!
//! `stock_quantity` never goes below zero; `is_available` mirrors `stock_quantity > 0`
//! and is maintained by every operation that moves stock.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Menu item database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "menu_items")]
pub struct Model {
    /// Unique identifier for the menu item
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Restaurant offering this item
    pub restaurant_id: i64,
    /// Optional menu category (nulled if the category is deleted)
    pub category_id: Option<i64>,
    /// Item name (e.g., "Plov", "Lagman")
    pub name: String,
    /// Optional description shown on the menu
    pub description: String,
    /// Standard price per unit
    pub price: f64,
    /// Discounted price per unit; when set it replaces `price`
    pub discount_price: Option<f64>,
    /// Units left to reserve
    pub stock_quantity: i32,
    /// False once stock runs out
    pub is_available: bool,
    /// Preparation time in minutes
    pub preparation_time: i32,
    /// Dietary tags, e.g. "vegetarian, halal"
    pub dietary_info: String,
    /// When the item was created
    pub created_at: DateTimeUtc,
    /// When the item was last modified
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Discount price if set, else the standard price.
    #[must_use]
    pub fn effective_price(&self) -> f64 {
        self.discount_price.unwrap_or(self.price)
    }

    /// Per-unit saving from the discount price, zero when there is none.
    #[must_use]
    pub fn unit_discount(&self) -> f64 {
        self.discount_price
            .map_or(0.0, |discounted| (self.price - discounted).max(0.0))
    }
}

/// Defines relationships between MenuItem and other entities
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
        belongs_to = "super::category::Entity",
        from = "Column::CategoryId",
        to = "super::category::Column::Id",
        on_delete = "SetNull"
    )]
    Category,
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::restaurant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Restaurant.def()
    }
}

impl Related<super::category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
