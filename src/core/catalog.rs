//! Catalog business logic - restaurants, categories, menu items, tables, staff and
//! customer profiles.
//!
//! This is the leaf layer read by the cart manager and the order engine. Stock moves
//! go through [`reserve_stock`] and [`release_stock`], which validate and write in a
//! single conditional `UPDATE` so concurrent reservations cannot oversell an item.

use crate::{
    entities::{
        Category, DiningTable, Language, MenuItem, Restaurant, Staff, StaffRole, UserProfile,
        category, dining_table, menu_item, restaurant, staff, user_profile,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument};

/// Preparation time used when a menu item does not specify one.
pub const DEFAULT_PREPARATION_MINUTES: i32 = 15;

/// Turns a display name into a URL-safe slug: lowercase ASCII alphanumerics separated
/// by single dashes.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "restaurant".to_string()
    } else {
        slug
    }
}

/// Input for [`create_restaurant`].
#[derive(Debug, Clone, Default)]
pub struct NewRestaurant {
    pub name: String,
    pub address: String,
    pub phone_number: String,
    pub opening_hours: String,
}

/// Creates an active restaurant with a unique slug derived from its name.
///
/// Colliding slugs get `-1`, `-2`, ... suffixes.
#[instrument(skip(db))]
pub async fn create_restaurant(
    db: &DatabaseConnection,
    new: NewRestaurant,
) -> Result<restaurant::Model> {
    let name = new.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::validation("Restaurant name cannot be empty"));
    }

    let txn = db.begin().await?;

    let base = slugify(&name);
    let mut slug = base.clone();
    let mut counter = 1;
    while Restaurant::find()
        .filter(restaurant::Column::Slug.eq(slug.as_str()))
        .one(&txn)
        .await?
        .is_some()
    {
        slug = format!("{base}-{counter}");
        counter += 1;
    }

    let now = Utc::now();
    let created = restaurant::ActiveModel {
        name: Set(name),
        slug: Set(slug),
        address: Set(new.address),
        phone_number: Set(new.phone_number),
        opening_hours: Set(new.opening_hours),
        is_active: Set(true),
        cached_rating: Set(None),
        rating_cached_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    info!(restaurant_id = created.id, slug = %created.slug, "Created restaurant");
    Ok(created)
}

/// Looks up a restaurant by id, active or not.
pub async fn get_restaurant(
    db: &DatabaseConnection,
    restaurant_id: i64,
) -> Result<Option<restaurant::Model>> {
    Restaurant::find_by_id(restaurant_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Looks up a restaurant by its URL slug.
pub async fn get_restaurant_by_slug(
    db: &DatabaseConnection,
    slug: &str,
) -> Result<Option<restaurant::Model>> {
    Restaurant::find()
        .filter(restaurant::Column::Slug.eq(slug))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Loads a restaurant that is allowed to take orders.
///
/// Missing and inactive restaurants are both reported as not found.
pub(crate) async fn require_active_restaurant<C>(
    conn: &C,
    restaurant_id: i64,
) -> Result<restaurant::Model>
where
    C: ConnectionTrait,
{
    Restaurant::find_by_id(restaurant_id)
        .one(conn)
        .await?
        .filter(|restaurant| restaurant.is_active)
        .ok_or_else(|| Error::not_found("Restaurant", restaurant_id))
}

/// Opens or closes a restaurant for ordering.
pub async fn set_restaurant_active(
    db: &DatabaseConnection,
    restaurant_id: i64,
    is_active: bool,
) -> Result<restaurant::Model> {
    let mut restaurant: restaurant::ActiveModel = Restaurant::find_by_id(restaurant_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Restaurant", restaurant_id))?
        .into();

    restaurant.is_active = Set(is_active);
    restaurant.updated_at = Set(Utc::now());
    restaurant.update(db).await.map_err(Into::into)
}

/// Deletes a restaurant together with its categories, menu, tables, staff, carts and
/// orders.
pub async fn delete_restaurant(db: &DatabaseConnection, restaurant_id: i64) -> Result<()> {
    let result = Restaurant::delete_by_id(restaurant_id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(Error::not_found("Restaurant", restaurant_id));
    }
    info!(restaurant_id, "Deleted restaurant");
    Ok(())
}

/// Creates a menu category; names are unique within a restaurant.
pub async fn create_category(
    db: &DatabaseConnection,
    restaurant_id: i64,
    name: &str,
    description: &str,
    display_order: i32,
) -> Result<category::Model> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("Category name cannot be empty"));
    }

    let txn = db.begin().await?;
    Restaurant::find_by_id(restaurant_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Restaurant", restaurant_id))?;

    let duplicate = Category::find()
        .filter(category::Column::RestaurantId.eq(restaurant_id))
        .filter(category::Column::Name.eq(name))
        .one(&txn)
        .await?;
    if duplicate.is_some() {
        return Err(Error::validation(format!(
            "Category '{name}' already exists in this restaurant"
        )));
    }

    let created = category::ActiveModel {
        restaurant_id: Set(restaurant_id),
        name: Set(name.to_string()),
        description: Set(description.to_string()),
        display_order: Set(display_order),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    Ok(created)
}

/// Categories of a restaurant in display order.
pub async fn list_categories(
    db: &DatabaseConnection,
    restaurant_id: i64,
) -> Result<Vec<category::Model>> {
    Category::find()
        .filter(category::Column::RestaurantId.eq(restaurant_id))
        .order_by_asc(category::Column::DisplayOrder)
        .order_by_asc(category::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Input for [`create_menu_item`].
#[derive(Debug, Clone)]
pub struct NewMenuItem {
    pub restaurant_id: i64,
    pub category_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub discount_price: Option<f64>,
    pub stock_quantity: i32,
    pub preparation_time: i32,
    pub dietary_info: String,
}

impl NewMenuItem {
    /// A menu item with no stock, no discount and the default preparation time.
    #[must_use]
    pub fn new(restaurant_id: i64, name: impl Into<String>, price: f64) -> Self {
        Self {
            restaurant_id,
            category_id: None,
            name: name.into(),
            description: String::new(),
            price,
            discount_price: None,
            stock_quantity: 0,
            preparation_time: DEFAULT_PREPARATION_MINUTES,
            dietary_info: String::new(),
        }
    }
}

fn validate_prices(price: f64, discount_price: Option<f64>) -> Result<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(Error::validation(format!("Invalid price: {price}")));
    }
    if let Some(discounted) = discount_price {
        if !discounted.is_finite() || discounted < 0.0 {
            return Err(Error::validation(format!(
                "Invalid discount price: {discounted}"
            )));
        }
        if discounted > price {
            return Err(Error::validation(format!(
                "Discount price {discounted} exceeds price {price}"
            )));
        }
    }
    Ok(())
}

/// Adds an item to a restaurant's menu.
///
/// # Errors
/// Returns an error if:
/// - The name is empty, a price is negative or not finite, or the discount exceeds the price
/// - Stock is negative or preparation time is below one minute
/// - The restaurant does not exist, or the category belongs to another restaurant
pub async fn create_menu_item(
    db: &DatabaseConnection,
    new: NewMenuItem,
) -> Result<menu_item::Model> {
    let name = new.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::validation("Menu item name cannot be empty"));
    }
    validate_prices(new.price, new.discount_price)?;
    if new.stock_quantity < 0 {
        return Err(Error::validation("Stock quantity cannot be negative"));
    }
    if new.preparation_time < 1 {
        return Err(Error::validation(
            "Preparation time must be at least one minute",
        ));
    }

    let txn = db.begin().await?;
    Restaurant::find_by_id(new.restaurant_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Restaurant", new.restaurant_id))?;

    if let Some(category_id) = new.category_id {
        Category::find_by_id(category_id)
            .one(&txn)
            .await?
            .filter(|category| category.restaurant_id == new.restaurant_id)
            .ok_or_else(|| Error::not_found("Category", category_id))?;
    }

    let now = Utc::now();
    let created = menu_item::ActiveModel {
        restaurant_id: Set(new.restaurant_id),
        category_id: Set(new.category_id),
        name: Set(name),
        description: Set(new.description),
        price: Set(new.price),
        discount_price: Set(new.discount_price),
        stock_quantity: Set(new.stock_quantity),
        is_available: Set(new.stock_quantity > 0),
        preparation_time: Set(new.preparation_time),
        dietary_info: Set(new.dietary_info),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    debug!(menu_item_id = created.id, "Created menu item");
    Ok(created)
}

/// Looks up a menu item by id, including sold-out items.
pub async fn get_menu_item(
    db: &DatabaseConnection,
    menu_item_id: i64,
) -> Result<Option<menu_item::Model>> {
    MenuItem::find_by_id(menu_item_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Menu of a restaurant ordered by name, optionally hiding sold-out items.
pub async fn list_menu(
    db: &DatabaseConnection,
    restaurant_id: i64,
    only_available: bool,
) -> Result<Vec<menu_item::Model>> {
    let mut query = MenuItem::find().filter(menu_item::Column::RestaurantId.eq(restaurant_id));
    if only_available {
        query = query.filter(menu_item::Column::IsAvailable.eq(true));
    }
    query
        .order_by_asc(menu_item::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Changes the live price of a menu item.
///
/// Carts pick up the new price immediately; placed orders keep their frozen prices.
pub async fn update_menu_item_price(
    db: &DatabaseConnection,
    menu_item_id: i64,
    price: f64,
    discount_price: Option<f64>,
) -> Result<menu_item::Model> {
    validate_prices(price, discount_price)?;

    let mut item: menu_item::ActiveModel = MenuItem::find_by_id(menu_item_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Menu item", menu_item_id))?
        .into();

    item.price = Set(price);
    item.discount_price = Set(discount_price);
    item.updated_at = Set(Utc::now());
    item.update(db).await.map_err(Into::into)
}

/// Adds stock to a menu item and makes it available again.
pub async fn restock_menu_item(
    db: &DatabaseConnection,
    menu_item_id: i64,
    quantity: i32,
) -> Result<menu_item::Model> {
    if quantity < 1 {
        return Err(Error::InvalidQuantity { quantity });
    }
    let txn = db.begin().await?;
    let item = release_stock(&txn, menu_item_id, quantity).await?;
    txn.commit().await?;
    info!(menu_item_id, quantity, stock = item.stock_quantity, "Restocked menu item");
    Ok(item)
}

/// Removes a menu item. Cart lines holding it go with it; order history keeps its
/// snapshot with the link cleared.
pub async fn delete_menu_item(db: &DatabaseConnection, menu_item_id: i64) -> Result<()> {
    let result = MenuItem::delete_by_id(menu_item_id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(Error::not_found("Menu item", menu_item_id));
    }
    info!(menu_item_id, "Deleted menu item");
    Ok(())
}

async fn refresh_availability<C>(conn: &C, menu_item_id: i64) -> Result<menu_item::Model>
where
    C: ConnectionTrait,
{
    MenuItem::update_many()
        .col_expr(
            menu_item::Column::IsAvailable,
            Expr::col(menu_item::Column::StockQuantity).gt(0),
        )
        .col_expr(menu_item::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(menu_item::Column::Id.eq(menu_item_id))
        .exec(conn)
        .await?;

    MenuItem::find_by_id(menu_item_id)
        .one(conn)
        .await?
        .ok_or_else(|| Error::not_found("Menu item", menu_item_id))
}

/// Takes `quantity` units out of a menu item's stock.
///
/// The stock check and the decrement are one statement
/// (`stock = stock - q WHERE stock >= q`), so two reservations racing for the last
/// units cannot both succeed. Availability is switched off when stock reaches zero.
///
/// # Errors
/// `InsufficientStock` if fewer than `quantity` units remain; stock is left untouched.
pub(crate) async fn reserve_stock<C>(
    conn: &C,
    menu_item_id: i64,
    quantity: i32,
) -> Result<menu_item::Model>
where
    C: ConnectionTrait,
{
    let result = MenuItem::update_many()
        .col_expr(
            menu_item::Column::StockQuantity,
            Expr::col(menu_item::Column::StockQuantity).sub(quantity),
        )
        .filter(menu_item::Column::Id.eq(menu_item_id))
        .filter(menu_item::Column::StockQuantity.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let item = MenuItem::find_by_id(menu_item_id)
            .one(conn)
            .await?
            .ok_or_else(|| Error::not_found("Menu item", menu_item_id))?;
        return Err(Error::InsufficientStock {
            item: item.name,
            available: item.stock_quantity,
            requested: quantity,
        });
    }

    refresh_availability(conn, menu_item_id).await
}

/// Puts `quantity` units back into a menu item's stock.
pub(crate) async fn release_stock<C>(
    conn: &C,
    menu_item_id: i64,
    quantity: i32,
) -> Result<menu_item::Model>
where
    C: ConnectionTrait,
{
    let result = MenuItem::update_many()
        .col_expr(
            menu_item::Column::StockQuantity,
            Expr::col(menu_item::Column::StockQuantity).add(quantity),
        )
        .filter(menu_item::Column::Id.eq(menu_item_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(Error::not_found("Menu item", menu_item_id));
    }
    refresh_availability(conn, menu_item_id).await
}

/// Registers a table; its QR token is a fresh random UUID.
pub async fn create_table(
    db: &DatabaseConnection,
    restaurant_id: i64,
    table_number: &str,
) -> Result<dining_table::Model> {
    let table_number = table_number.trim();
    if table_number.is_empty() {
        return Err(Error::validation("Table number cannot be empty"));
    }

    let txn = db.begin().await?;
    Restaurant::find_by_id(restaurant_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Restaurant", restaurant_id))?;

    let duplicate = DiningTable::find()
        .filter(dining_table::Column::RestaurantId.eq(restaurant_id))
        .filter(dining_table::Column::TableNumber.eq(table_number))
        .one(&txn)
        .await?;
    if duplicate.is_some() {
        return Err(Error::validation(format!(
            "Table {table_number} already exists in this restaurant"
        )));
    }

    let created = dining_table::ActiveModel {
        restaurant_id: Set(restaurant_id),
        table_number: Set(table_number.to_string()),
        qr_token: Set(uuid::Uuid::new_v4().to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    Ok(created)
}

/// Resolves a scanned QR token to its table and restaurant.
///
/// This is the only entry point for anonymous diners; tokens of inactive restaurants
/// are rejected as not found.
pub async fn find_table_by_qr_token(
    db: &DatabaseConnection,
    qr_token: &str,
) -> Result<(dining_table::Model, restaurant::Model)> {
    let table = DiningTable::find()
        .filter(dining_table::Column::QrToken.eq(qr_token))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Table", qr_token))?;

    let restaurant = require_active_restaurant(db, table.restaurant_id).await?;
    Ok((table, restaurant))
}

/// Checks that a table exists and belongs to the restaurant.
pub(crate) async fn require_table<C>(
    conn: &C,
    restaurant_id: i64,
    table_id: i64,
) -> Result<dining_table::Model>
where
    C: ConnectionTrait,
{
    DiningTable::find_by_id(table_id)
        .one(conn)
        .await?
        .filter(|table| table.restaurant_id == restaurant_id)
        .ok_or_else(|| Error::not_found("Table", table_id))
}

/// Input for [`create_user_profile`].
#[derive(Debug, Clone, Default)]
pub struct NewUserProfile {
    pub telegram_id: String,
    pub phone_number: String,
    pub preferred_language: Language,
    pub default_delivery_address: String,
}

/// Registers a customer with an empty loyalty balance.
pub async fn create_user_profile(
    db: &DatabaseConnection,
    new: NewUserProfile,
) -> Result<user_profile::Model> {
    let telegram_id = new.telegram_id.trim().to_string();
    if telegram_id.is_empty() {
        return Err(Error::validation("Telegram ID cannot be empty"));
    }

    let existing = UserProfile::find()
        .filter(user_profile::Column::TelegramId.eq(telegram_id.as_str()))
        .one(db)
        .await?;
    if existing.is_some() {
        return Err(Error::validation(format!(
            "Profile for {telegram_id} already exists"
        )));
    }

    let now = Utc::now();
    user_profile::ActiveModel {
        telegram_id: Set(telegram_id),
        phone_number: Set(new.phone_number),
        loyalty_points: Set(0),
        preferred_language: Set(new.preferred_language),
        default_delivery_address: Set(new.default_delivery_address),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Looks up a profile by id.
pub async fn get_user_profile(
    db: &DatabaseConnection,
    user_profile_id: i64,
) -> Result<Option<user_profile::Model>> {
    UserProfile::find_by_id(user_profile_id)
        .one(db)
        .await
        .map_err(Into::into)
}

pub(crate) async fn require_user_profile<C>(
    conn: &C,
    user_profile_id: i64,
) -> Result<user_profile::Model>
where
    C: ConnectionTrait,
{
    UserProfile::find_by_id(user_profile_id)
        .one(conn)
        .await?
        .ok_or_else(|| Error::not_found("User profile", user_profile_id))
}

/// Gives a user profile a role at a restaurant.
pub async fn add_staff(
    db: &DatabaseConnection,
    restaurant_id: i64,
    user_profile_id: i64,
    role: StaffRole,
) -> Result<staff::Model> {
    let txn = db.begin().await?;
    Restaurant::find_by_id(restaurant_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Restaurant", restaurant_id))?;
    require_user_profile(&txn, user_profile_id).await?;

    let existing = Staff::find()
        .filter(staff::Column::RestaurantId.eq(restaurant_id))
        .filter(staff::Column::UserProfileId.eq(user_profile_id))
        .one(&txn)
        .await?;
    if existing.is_some() {
        return Err(Error::validation(format!(
            "Profile {user_profile_id} is already staff at restaurant {restaurant_id}"
        )));
    }

    let created = staff::ActiveModel {
        restaurant_id: Set(restaurant_id),
        user_profile_id: Set(user_profile_id),
        role: Set(role),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    info!(staff_id = created.id, restaurant_id, %role, "Added staff member");
    Ok(created)
}

pub(crate) async fn get_staff<C>(conn: &C, staff_id: i64) -> Result<Option<staff::Model>>
where
    C: ConnectionTrait,
{
    Staff::find_by_id(staff_id)
        .one(conn)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Oqtepa Lavash"), "oqtepa-lavash");
        assert_eq!(slugify("  Café  #1 -- Central "), "caf-1-central");
        assert_eq!(slugify("!!!"), "restaurant");
    }

    #[tokio::test]
    async fn test_create_restaurant_unique_slugs() -> Result<()> {
        let db = setup_test_db().await?;
        let first = create_test_restaurant(&db, "Bon Appetit").await?;
        let second = create_test_restaurant(&db, "Bon Appetit").await?;
        let third = create_test_restaurant(&db, "Bon  Appetit!").await?;

        assert_eq!(first.slug, "bon-appetit");
        assert_eq!(second.slug, "bon-appetit-1");
        assert_eq!(third.slug, "bon-appetit-2");
        assert!(first.is_active);

        let found = get_restaurant_by_slug(&db, "bon-appetit-1").await?.unwrap();
        assert_eq!(found.id, second.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_menu_item_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let result = create_menu_item(&db, NewMenuItem::new(1, "  ", 10.0)).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let result = create_menu_item(&db, NewMenuItem::new(1, "Plov", -1.0)).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let result = create_menu_item(&db, NewMenuItem::new(1, "Plov", f64::NAN)).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let mut discounted = NewMenuItem::new(1, "Plov", 20.0);
        discounted.discount_price = Some(25.0);
        let result = create_menu_item(&db, discounted).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let mut no_prep = NewMenuItem::new(1, "Plov", 20.0);
        no_prep.preparation_time = 0;
        let result = create_menu_item(&db, no_prep).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_menu_item_category_must_match_restaurant() -> Result<()> {
        let db = setup_test_db().await?;
        let first = create_test_restaurant(&db, "First").await?;
        let second = create_test_restaurant(&db, "Second").await?;
        let category = create_category(&db, first.id, "Soups", "", 1).await?;

        let mut item = NewMenuItem::new(second.id, "Shurpa", 18.0);
        item.category_id = Some(category.id);
        let result = create_menu_item(&db, item).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_category_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let restaurant = create_test_restaurant(&db, "Cafe").await?;
        create_category(&db, restaurant.id, "Drinks", "", 2).await?;
        let result = create_category(&db, restaurant.id, "Drinks", "", 3).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        create_category(&db, restaurant.id, "Salads", "", 1).await?;
        let names: Vec<String> = list_categories(&db, restaurant.id)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Salads".to_string(), "Drinks".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_availability_follows_stock() -> Result<()> {
        let (db, _restaurant, item) = setup_with_menu_item(2).await?;
        assert!(item.is_available);

        let txn = db.begin().await?;
        let drained = reserve_stock(&txn, item.id, 2).await?;
        txn.commit().await?;
        assert_eq!(drained.stock_quantity, 0);
        assert!(!drained.is_available);

        let restocked = restock_menu_item(&db, item.id, 5).await?;
        assert_eq!(restocked.stock_quantity, 5);
        assert!(restocked.is_available);
        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_stock_never_goes_negative() -> Result<()> {
        let (db, _restaurant, item) = setup_with_menu_item(1).await?;

        let txn = db.begin().await?;
        let result = reserve_stock(&txn, item.id, 2).await;
        txn.commit().await?;
        assert!(matches!(
            result,
            Err(Error::InsufficientStock {
                available: 1,
                requested: 2,
                ..
            })
        ));

        let unchanged = get_menu_item(&db, item.id).await?.unwrap();
        assert_eq!(unchanged.stock_quantity, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_qr_token_lookup() -> Result<()> {
        let db = setup_test_db().await?;
        let restaurant = create_test_restaurant(&db, "Chorsu").await?;
        let table = create_table(&db, restaurant.id, "7").await?;
        assert!(!table.qr_token.is_empty());

        let (found, owner) = find_table_by_qr_token(&db, &table.qr_token).await?;
        assert_eq!(found.id, table.id);
        assert_eq!(owner.id, restaurant.id);

        let duplicate = create_table(&db, restaurant.id, "7").await;
        assert!(matches!(duplicate, Err(Error::Validation { .. })));

        set_restaurant_active(&db, restaurant.id, false).await?;
        let closed = find_table_by_qr_token(&db, &table.qr_token).await;
        assert!(matches!(closed, Err(Error::NotFound { .. })));

        let unknown = find_table_by_qr_token(&db, "not-a-token").await;
        assert!(matches!(unknown, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_staff_membership_unique() -> Result<()> {
        let db = setup_test_db().await?;
        let restaurant = create_test_restaurant(&db, "Cafe").await?;
        let profile = create_test_customer(&db, "waiter-1").await?;

        let staff = add_staff(&db, restaurant.id, profile.id, StaffRole::Waiter).await?;
        assert_eq!(staff.role, StaffRole::Waiter);

        let again = add_staff(&db, restaurant.id, profile.id, StaffRole::Manager).await;
        assert!(matches!(again, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_restaurant_cascades() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(3).await?;
        create_table(&db, restaurant.id, "1").await?;

        delete_restaurant(&db, restaurant.id).await?;

        assert!(get_menu_item(&db, item.id).await?.is_none());
        assert!(DiningTable::find().all(&db).await?.is_empty());
        assert!(matches!(
            delete_restaurant(&db, restaurant.id).await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_profile_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_customer(&db, "tg-1").await?;
        let again = create_test_customer(&db, "tg-1").await;
        assert!(matches!(again, Err(Error::Validation { .. })));
        Ok(())
    }
}
