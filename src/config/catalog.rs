//! Seed catalog loading from the `[[restaurants]]` tables of config.toml
//!
//! Seeding is idempotent per restaurant: a restaurant whose slug already exists is
//! skipped as a whole, so re-running the binary never duplicates menus.

use crate::{
    core::catalog::{self, NewMenuItem, NewRestaurant},
    errors::{Error, Result},
};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// One restaurant with its menu and tables.
#[derive(Debug, Clone, Deserialize)]
pub struct RestaurantSeed {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub opening_hours: String,
    #[serde(default)]
    pub categories: Vec<CategorySeed>,
    #[serde(default)]
    pub menu_items: Vec<MenuItemSeed>,
    /// Table numbers, e.g. `["1", "2", "Terrace"]`
    #[serde(default)]
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySeed {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub display_order: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MenuItemSeed {
    pub name: String,
    /// Name of a category declared on the same restaurant
    pub category: Option<String>,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub discount_price: Option<f64>,
    #[serde(default)]
    pub stock_quantity: i32,
    #[serde(default = "default_preparation_time")]
    pub preparation_time: i32,
    #[serde(default)]
    pub dietary_info: String,
}

const fn default_preparation_time() -> i32 {
    catalog::DEFAULT_PREPARATION_MINUTES
}

/// What a seeding run created.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub restaurants_created: usize,
    pub restaurants_skipped: usize,
    pub menu_items_created: usize,
    pub tables_created: usize,
}

/// Creates every seeded restaurant that does not exist yet.
///
/// # Errors
/// - `Config` if a menu item names a category its restaurant does not declare
/// - any validation error from the catalog operations
pub async fn seed_catalog(
    db: &DatabaseConnection,
    seeds: &[RestaurantSeed],
) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for seed in seeds {
        let slug = catalog::slugify(&seed.name);
        if catalog::get_restaurant_by_slug(db, &slug).await?.is_some() {
            info!(%slug, "Restaurant already seeded, skipping");
            report.restaurants_skipped += 1;
            continue;
        }

        let restaurant = catalog::create_restaurant(
            db,
            NewRestaurant {
                name: seed.name.clone(),
                address: seed.address.clone(),
                phone_number: seed.phone_number.clone(),
                opening_hours: seed.opening_hours.clone(),
            },
        )
        .await?;

        let mut category_ids = HashMap::new();
        for category in &seed.categories {
            let created = catalog::create_category(
                db,
                restaurant.id,
                &category.name,
                &category.description,
                category.display_order,
            )
            .await?;
            category_ids.insert(category.name.as_str(), created.id);
        }

        for item in &seed.menu_items {
            let category_id = match item.category.as_deref() {
                Some(name) => Some(*category_ids.get(name).ok_or_else(|| Error::Config {
                    message: format!(
                        "Menu item '{}' of '{}' refers to unknown category '{name}'",
                        item.name, seed.name
                    ),
                })?),
                None => None,
            };
            let mut new_item = NewMenuItem::new(restaurant.id, item.name.clone(), item.price);
            new_item.category_id = category_id;
            new_item.description.clone_from(&item.description);
            new_item.discount_price = item.discount_price;
            new_item.stock_quantity = item.stock_quantity;
            new_item.preparation_time = item.preparation_time;
            new_item.dietary_info.clone_from(&item.dietary_info);
            catalog::create_menu_item(db, new_item).await?;
            report.menu_items_created += 1;
        }

        for table_number in &seed.tables {
            catalog::create_table(db, restaurant.id, table_number).await?;
            report.tables_created += 1;
        }

        if seed.menu_items.is_empty() {
            warn!(slug = %restaurant.slug, "Seeded restaurant has an empty menu");
        }
        info!(
            restaurant_id = restaurant.id,
            slug = %restaurant.slug,
            menu_items = seed.menu_items.len(),
            tables = seed.tables.len(),
            "Seeded restaurant"
        );
        report.restaurants_created += 1;
    }

    Ok(report)
}
