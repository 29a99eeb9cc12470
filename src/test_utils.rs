//! Shared test utilities.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    core::{
        catalog::{self, NewMenuItem, NewRestaurant, NewUserProfile},
        outbox::{PublishError, Publisher},
    },
    entities::{self, StaffRole},
    errors::Result,
};
use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::{path::PathBuf, sync::Mutex};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database with all tables initialized.
///
/// Unlike `sqlite::memory:`, the pool can hand out several connections at once, so
/// concurrent writers really race. Returns the connection and the file path; the
/// caller removes the file when done.
pub async fn setup_file_test_db() -> Result<(DatabaseConnection, PathBuf)> {
    let path = std::env::temp_dir().join(format!("tablefare-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let db = sea_orm::Database::connect(url.as_str()).await?;
    crate::config::database::create_tables(&db).await?;
    Ok((db, path))
}

/// Closes the connection and deletes a database made by [`setup_file_test_db`].
pub async fn remove_file_test_db(db: DatabaseConnection, path: PathBuf) -> Result<()> {
    db.close().await?;
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.clone().into_os_string();
        file.push(suffix);
        let _ = std::fs::remove_file(file);
    }
    Ok(())
}

/// Creates an active test restaurant with placeholder contact details.
pub async fn create_test_restaurant(
    db: &DatabaseConnection,
    name: &str,
) -> Result<entities::restaurant::Model> {
    catalog::create_restaurant(
        db,
        NewRestaurant {
            name: name.to_string(),
            address: "1 Test Street".to_string(),
            ..Default::default()
        },
    )
    .await
}

/// Creates a test menu item without discount.
///
/// # Defaults
/// * `preparation_time`: 15 minutes
/// * no category
pub async fn create_test_menu_item(
    db: &DatabaseConnection,
    restaurant_id: i64,
    name: &str,
    price: f64,
    stock_quantity: i32,
) -> Result<entities::menu_item::Model> {
    let mut item = NewMenuItem::new(restaurant_id, name, price);
    item.stock_quantity = stock_quantity;
    catalog::create_menu_item(db, item).await
}

/// Creates a test menu item with a discount price and preparation time.
pub async fn create_custom_menu_item(
    db: &DatabaseConnection,
    restaurant_id: i64,
    name: &str,
    price: f64,
    discount_price: Option<f64>,
    stock_quantity: i32,
    preparation_time: i32,
) -> Result<entities::menu_item::Model> {
    let mut item = NewMenuItem::new(restaurant_id, name, price);
    item.discount_price = discount_price;
    item.stock_quantity = stock_quantity;
    item.preparation_time = preparation_time;
    catalog::create_menu_item(db, item).await
}

/// Creates a customer profile with an empty loyalty balance and English labels.
pub async fn create_test_customer(
    db: &DatabaseConnection,
    telegram_id: &str,
) -> Result<entities::user_profile::Model> {
    catalog::create_user_profile(
        db,
        NewUserProfile {
            telegram_id: telegram_id.to_string(),
            preferred_language: entities::Language::English,
            default_delivery_address: "42 Customer Lane".to_string(),
            ..Default::default()
        },
    )
    .await
}

/// Creates a fresh profile and makes it staff at the restaurant.
pub async fn create_test_staff(
    db: &DatabaseConnection,
    restaurant_id: i64,
    role: StaffRole,
) -> Result<entities::staff::Model> {
    let profile = create_test_customer(db, &format!("staff-{restaurant_id}-{role}")).await?;
    catalog::add_staff(db, restaurant_id, profile.id, role).await
}

/// Sets up a database with one restaurant and one menu item (price 10.0).
/// Returns (db, restaurant, menu item).
pub async fn setup_with_menu_item(
    stock_quantity: i32,
) -> Result<(
    DatabaseConnection,
    entities::restaurant::Model,
    entities::menu_item::Model,
)> {
    let db = setup_test_db().await?;
    let restaurant = create_test_restaurant(&db, "Test Restaurant").await?;
    let item = create_test_menu_item(&db, restaurant.id, "Test Dish", 10.0, stock_quantity).await?;
    Ok((db, restaurant, item))
}

/// Publisher that records every delivery in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    pub delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    /// Topics delivered so far, in order.
    #[allow(clippy::unwrap_used)]
    pub fn topics(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    #[allow(clippy::unwrap_used)]
    async fn publish(&self, topic: &str, payload: &str) -> std::result::Result<(), PublishError> {
        self.delivered
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Publisher whose transport is always down.
#[derive(Debug, Default)]
pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, topic: &str, _payload: &str) -> std::result::Result<(), PublishError> {
        Err(PublishError::new(format!("transport unavailable for {topic}")))
    }
}
