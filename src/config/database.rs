//! Database configuration module.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Composite uniqueness rules that the
//! entity derive cannot express are added as explicit unique indexes.

use crate::entities::{
    Cart, CartItem, Category, DiningTable, LoyaltyTransaction, MenuItem, Order, OrderItem,
    OutboxEvent, Restaurant, Review, Staff, UserProfile, cart, cart_item, category, dining_table,
    review, staff,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/tablefare.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Falls back to a local `SQLite` file if no environment variable is set.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to database at {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(builder.build(&index)).await?;
    }
    Ok(())
}

fn unique_indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("idx_unique_category_per_restaurant")
            .table(Category)
            .col(category::Column::RestaurantId)
            .col(category::Column::Name)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_unique_table_number_per_restaurant")
            .table(DiningTable)
            .col(dining_table::Column::RestaurantId)
            .col(dining_table::Column::TableNumber)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_unique_staff_membership")
            .table(Staff)
            .col(staff::Column::RestaurantId)
            .col(staff::Column::UserProfileId)
            .unique()
            .if_not_exists()
            .to_owned(),
        // NULL customer or table compare as distinct here; anonymous scopes are
        // deduplicated by the cart manager's IS NULL lookup.
        Index::create()
            .name("idx_unique_cart_scope")
            .table(Cart)
            .col(cart::Column::UserProfileId)
            .col(cart::Column::RestaurantId)
            .col(cart::Column::TableId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_unique_cart_item")
            .table(CartItem)
            .col(cart_item::Column::CartId)
            .col(cart_item::Column::MenuItemId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_unique_review_per_customer_order")
            .table(Review)
            .col(review::Column::OrderId)
            .col(review::Column::UserProfileId)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}

/// Creates all tables and indexes if they do not exist yet.
///
/// Parents are created before children so foreign keys always point at existing tables.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_table(db, &schema, Restaurant).await?;
    create_table(db, &schema, UserProfile).await?;
    create_table(db, &schema, Category).await?;
    create_table(db, &schema, MenuItem).await?;
    create_table(db, &schema, DiningTable).await?;
    create_table(db, &schema, Staff).await?;
    create_table(db, &schema, Cart).await?;
    create_table(db, &schema, CartItem).await?;
    create_table(db, &schema, Order).await?;
    create_table(db, &schema, OrderItem).await?;
    create_table(db, &schema, LoyaltyTransaction).await?;
    create_table(db, &schema, Review).await?;
    create_table(db, &schema, OutboxEvent).await?;

    for index in unique_indexes() {
        db.execute(builder.build(&index)).await?;
    }

    info!("Database tables ensured");
    Ok(())
}
