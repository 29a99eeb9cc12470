//! Order item entity - One frozen line of an order.
//!
//! The menu item link is nullable and is cleared if the menu item is deleted. The line
//! keeps its own name, price and preparation time snapshot so order history renders
//! the same regardless of later catalog changes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Shown for lines whose snapshot name is blank and whose menu item is gone.
pub const DELETED_ITEM_LABEL: &str = "Deleted item";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub order_id: i64,
    /// Source menu item; `None` once it has been deleted
    pub menu_item_id: Option<i64>,
    /// Menu item name at order time
    pub item_name: String,
    pub quantity: i32,
    /// Per-unit effective price at order time
    pub price: f64,
    /// Per-unit saving from the menu discount at order time
    pub unit_discount: f64,
    /// Preparation time in minutes at order time
    pub preparation_time: i32,
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Frozen line total.
    #[must_use]
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }

    /// Name to render in order history.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.item_name.trim().is_empty() {
            DELETED_ITEM_LABEL
        } else {
            &self.item_name
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id",
        on_delete = "Cascade"
    )]
    Order,
    #[sea_orm(
        belongs_to = "super::menu_item::Entity",
        from = "Column::MenuItemId",
        to = "super::menu_item::Column::Id",
        on_delete = "SetNull"
    )]
    MenuItem,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
