//! Cart manager - per-scope baskets of menu items with stock reserved on add.
//!
//! A cart is identified by its [`CartScope`]. Adding an item reserves stock right away,
//! so a cart line always corresponds to units already taken out of the menu item.
//! Cart totals are derived from live effective prices on every read and never stored.

use crate::{
    core::{catalog, round_money},
    entities::{Cart, CartItem, MenuItem, cart, cart_item, menu_item},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// The (customer or anonymous, restaurant, table or none) triple that keys a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartScope {
    pub customer_id: Option<i64>,
    pub restaurant_id: i64,
    pub table_id: Option<i64>,
}

impl CartScope {
    /// A registered customer ordering for delivery.
    #[must_use]
    pub const fn delivery(customer_id: i64, restaurant_id: i64) -> Self {
        Self {
            customer_id: Some(customer_id),
            restaurant_id,
            table_id: None,
        }
    }

    /// An anonymous diner who entered through a table QR code.
    #[must_use]
    pub const fn anonymous_table(restaurant_id: i64, table_id: i64) -> Self {
        Self {
            customer_id: None,
            restaurant_id,
            table_id: Some(table_id),
        }
    }

    /// A registered customer seated at a table.
    #[must_use]
    pub const fn customer_table(customer_id: i64, restaurant_id: i64, table_id: i64) -> Self {
        Self {
            customer_id: Some(customer_id),
            restaurant_id,
            table_id: Some(table_id),
        }
    }
}

/// One cart line priced at the current effective price.
#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub cart_item: cart_item::Model,
    pub menu_item: menu_item::Model,
    pub unit_price: f64,
    pub line_total: f64,
}

/// Snapshot of a cart as the customer sees it now.
#[derive(Debug, Clone, PartialEq)]
pub struct CartView {
    pub cart: Option<cart::Model>,
    pub lines: Vec<CartLine>,
    /// Lines whose menu item was deleted; checkout fails until they are cleared
    pub stale_lines: Vec<cart_item::Model>,
    pub total: f64,
}

/// Finds the cart of a scope. Absent customer or table match `IS NULL` explicitly,
/// since the unique index does not deduplicate NULLs.
pub(crate) async fn find_cart<C>(conn: &C, scope: CartScope) -> Result<Option<cart::Model>>
where
    C: ConnectionTrait,
{
    let mut query = Cart::find().filter(cart::Column::RestaurantId.eq(scope.restaurant_id));
    query = match scope.customer_id {
        Some(customer_id) => query.filter(cart::Column::UserProfileId.eq(customer_id)),
        None => query.filter(cart::Column::UserProfileId.is_null()),
    };
    query = match scope.table_id {
        Some(table_id) => query.filter(cart::Column::TableId.eq(table_id)),
        None => query.filter(cart::Column::TableId.is_null()),
    };
    query.one(conn).await.map_err(Into::into)
}

async fn get_or_create_cart<C>(conn: &C, scope: CartScope) -> Result<cart::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = find_cart(conn, scope).await? {
        return Ok(existing);
    }

    let created = cart::ActiveModel {
        user_profile_id: Set(scope.customer_id),
        restaurant_id: Set(scope.restaurant_id),
        table_id: Set(scope.table_id),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    debug!(cart_id = created.id, ?scope, "Opened cart");
    Ok(created)
}

async fn fetch_lines<C>(
    conn: &C,
    cart_id: i64,
) -> Result<Vec<(cart_item::Model, Option<menu_item::Model>)>>
where
    C: ConnectionTrait,
{
    CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::Id)
        .find_also_related(MenuItem)
        .all(conn)
        .await
        .map_err(Into::into)
}

fn priced(cart_item: cart_item::Model, menu_item: menu_item::Model) -> CartLine {
    let unit_price = menu_item.effective_price();
    let line_total = round_money(unit_price * f64::from(cart_item.quantity));
    CartLine {
        cart_item,
        menu_item,
        unit_price,
        line_total,
    }
}

/// Splits a cart into priced lines and lines whose menu item is gone.
async fn split_lines<C>(conn: &C, cart_id: i64) -> Result<(Vec<CartLine>, Vec<cart_item::Model>)>
where
    C: ConnectionTrait,
{
    let mut lines = Vec::new();
    let mut stale = Vec::new();
    for (cart_item, menu_item) in fetch_lines(conn, cart_id).await? {
        match menu_item {
            Some(menu_item) => lines.push(priced(cart_item, menu_item)),
            None => stale.push(cart_item),
        }
    }
    Ok((lines, stale))
}

/// Loads the lines of a cart with their live menu items, oldest line first.
///
/// # Errors
/// `StockConflict` if a line points at a menu item that no longer exists.
pub(crate) async fn load_lines<C>(conn: &C, cart_id: i64) -> Result<Vec<CartLine>>
where
    C: ConnectionTrait,
{
    let (lines, stale) = split_lines(conn, cart_id).await?;
    if let Some(line) = stale.first() {
        return Err(Error::StockConflict {
            cart_item_id: line.id,
            reason: "menu item no longer exists".to_string(),
        });
    }
    Ok(lines)
}

fn total_of(lines: &[CartLine]) -> f64 {
    round_money(lines.iter().map(|line| line.line_total).sum())
}

async fn cart_total_by_id<C>(conn: &C, cart_id: i64) -> Result<f64>
where
    C: ConnectionTrait,
{
    let (lines, _) = split_lines(conn, cart_id).await?;
    Ok(total_of(&lines))
}

/// Adds `quantity` units of a menu item to the scope's cart and reserves the stock.
///
/// Creates the cart and the line on first use; repeated adds of the same item grow the
/// existing line. Returns the new cart total.
///
/// # Errors
/// - `InvalidQuantity` if `quantity < 1` (checked before touching the database)
/// - `NotFound` if the restaurant is missing or inactive, the table or customer does
///   not exist, or the menu item is not on this restaurant's menu
/// - `InsufficientStock` if fewer than `quantity` units remain; cart and stock are unchanged
#[instrument(skip(db))]
pub async fn add_item(
    db: &DatabaseConnection,
    scope: CartScope,
    menu_item_id: i64,
    quantity: i32,
) -> Result<f64> {
    if quantity < 1 {
        return Err(Error::InvalidQuantity { quantity });
    }

    let txn = db.begin().await?;

    catalog::require_active_restaurant(&txn, scope.restaurant_id).await?;
    if let Some(table_id) = scope.table_id {
        catalog::require_table(&txn, scope.restaurant_id, table_id).await?;
    }
    if let Some(customer_id) = scope.customer_id {
        catalog::require_user_profile(&txn, customer_id).await?;
    }

    let item = MenuItem::find_by_id(menu_item_id)
        .one(&txn)
        .await?
        .filter(|item| item.restaurant_id == scope.restaurant_id)
        .ok_or_else(|| Error::not_found("Menu item", menu_item_id))?;
    if !item.is_available {
        return Err(Error::InsufficientStock {
            item: item.name,
            available: item.stock_quantity,
            requested: quantity,
        });
    }

    catalog::reserve_stock(&txn, menu_item_id, quantity).await?;

    let cart = get_or_create_cart(&txn, scope).await?;
    let existing = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .filter(cart_item::Column::MenuItemId.eq(menu_item_id))
        .one(&txn)
        .await?;

    match existing {
        Some(line) => {
            CartItem::update_many()
                .col_expr(
                    cart_item::Column::Quantity,
                    Expr::col(cart_item::Column::Quantity).add(quantity),
                )
                .filter(cart_item::Column::Id.eq(line.id))
                .exec(&txn)
                .await?;
        }
        None => {
            cart_item::ActiveModel {
                cart_id: Set(cart.id),
                menu_item_id: Set(Some(menu_item_id)),
                quantity: Set(quantity),
                created_at: Set(Utc::now()),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }
    }

    let total = cart_total_by_id(&txn, cart.id).await?;
    txn.commit().await?;

    info!(cart_id = cart.id, menu_item_id, quantity, total, "Added item to cart");
    Ok(total)
}

/// Removes a menu item's line from the cart and returns its units to stock.
///
/// Returns the new cart total.
#[instrument(skip(db))]
pub async fn remove_item(
    db: &DatabaseConnection,
    scope: CartScope,
    menu_item_id: i64,
) -> Result<f64> {
    let txn = db.begin().await?;

    let cart = find_cart(&txn, scope)
        .await?
        .ok_or_else(|| Error::not_found("Cart", format!("{scope:?}")))?;
    let line = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .filter(cart_item::Column::MenuItemId.eq(menu_item_id))
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Cart item", menu_item_id))?;

    let quantity = line.quantity;
    line.delete(&txn).await?;
    catalog::release_stock(&txn, menu_item_id, quantity).await?;

    let total = cart_total_by_id(&txn, cart.id).await?;
    txn.commit().await?;

    info!(cart_id = cart.id, menu_item_id, quantity, "Removed item from cart");
    Ok(total)
}

/// Deletes every line of a cart without releasing stock.
pub(crate) async fn clear_items<C>(conn: &C, cart_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = CartItem::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Empties the scope's cart, treating its reserved units as consumed.
///
/// Returns the number of lines deleted; a missing cart counts as already empty.
pub async fn clear(db: &DatabaseConnection, scope: CartScope) -> Result<u64> {
    let txn = db.begin().await?;
    let deleted = match find_cart(&txn, scope).await? {
        Some(cart) => clear_items(&txn, cart.id).await?,
        None => 0,
    };
    txn.commit().await?;
    debug!(?scope, deleted, "Cleared cart");
    Ok(deleted)
}

/// Current contents of the scope's cart with live prices.
pub async fn get_cart(db: &DatabaseConnection, scope: CartScope) -> Result<CartView> {
    let Some(cart) = find_cart(db, scope).await? else {
        return Ok(CartView {
            cart: None,
            lines: Vec::new(),
            stale_lines: Vec::new(),
            total: 0.0,
        });
    };
    let (lines, stale_lines) = split_lines(db, cart.id).await?;
    let total = total_of(&lines);
    Ok(CartView {
        cart: Some(cart),
        lines,
        stale_lines,
        total,
    })
}

/// Derived total of the scope's cart; zero when there is no cart.
pub async fn cart_total(db: &DatabaseConnection, scope: CartScope) -> Result<f64> {
    match find_cart(db, scope).await? {
        Some(cart) => cart_total_by_id(db, cart.id).await,
        None => Ok(0.0),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::catalog::{create_table, get_menu_item, set_restaurant_active, update_menu_item_price};
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_add_item_quantity_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        for quantity in [0, -3] {
            let result = add_item(&db, CartScope::delivery(1, 1), 1, quantity).await;
            assert!(matches!(result, Err(Error::InvalidQuantity { .. })));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_cart_total_uses_discount_price() -> Result<()> {
        let db = setup_test_db().await?;
        let restaurant = create_test_restaurant(&db, "Discount House").await?;
        let customer = create_test_customer(&db, "tg-discount").await?;
        let item =
            create_custom_menu_item(&db, restaurant.id, "Manti", 25.0, Some(20.0), 10, 20).await?;

        let scope = CartScope::delivery(customer.id, restaurant.id);
        let total = add_item(&db, scope, item.id, 3).await?;
        assert_eq!(total, 60.0);
        assert_eq!(cart_total(&db, scope).await?, 60.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_state_unchanged() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(5).await?;
        let customer = create_test_customer(&db, "tg-stock").await?;
        let scope = CartScope::delivery(customer.id, restaurant.id);

        add_item(&db, scope, item.id, 3).await?;
        assert_eq!(get_menu_item(&db, item.id).await?.unwrap().stock_quantity, 2);

        let result = add_item(&db, scope, item.id, 3).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientStock {
                available: 2,
                requested: 3,
                ..
            })
        ));

        let view = get_cart(&db, scope).await?;
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.lines[0].cart_item.quantity, 3);
        assert_eq!(get_menu_item(&db, item.id).await?.unwrap().stock_quantity, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_add_increments_single_line() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(10).await?;
        let customer = create_test_customer(&db, "tg-repeat").await?;
        let scope = CartScope::delivery(customer.id, restaurant.id);

        add_item(&db, scope, item.id, 1).await?;
        add_item(&db, scope, item.id, 2).await?;
        let total = add_item(&db, scope, item.id, 4).await?;

        let view = get_cart(&db, scope).await?;
        assert_eq!(view.lines.len(), 1);
        assert_eq!(view.lines[0].cart_item.quantity, 7);
        assert_eq!(total, 70.0);
        assert_eq!(Cart::find().all(&db).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_last_unit_flips_availability() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(2).await?;
        let first = create_test_customer(&db, "tg-first").await?;
        let second = create_test_customer(&db, "tg-second").await?;

        add_item(&db, CartScope::delivery(first.id, restaurant.id), item.id, 2).await?;
        let drained = get_menu_item(&db, item.id).await?.unwrap();
        assert_eq!(drained.stock_quantity, 0);
        assert!(!drained.is_available);

        let result = add_item(&db, CartScope::delivery(second.id, restaurant.id), item.id, 1).await;
        assert!(matches!(result, Err(Error::InsufficientStock { .. })));
        assert!(get_cart(&db, CartScope::delivery(second.id, restaurant.id))
            .await?
            .lines
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_reservations_never_exceed_initial_stock() -> Result<()> {
        let initial = 17;
        let (db, restaurant, item) = setup_with_menu_item(initial).await?;
        let customer = create_test_customer(&db, "tg-many").await?;
        let scope = CartScope::delivery(customer.id, restaurant.id);

        let mut reserved = 0;
        for quantity in [3, 5, 4, 6, 2, 1, 9, 1, 1] {
            match add_item(&db, scope, item.id, quantity).await {
                Ok(_) => reserved += quantity,
                Err(Error::InsufficientStock { .. }) => {}
                Err(other) => return Err(other),
            }
            let stock = get_menu_item(&db, item.id).await?.unwrap().stock_quantity;
            assert!(stock >= 0);
            assert!(reserved <= initial);
            assert_eq!(stock, initial - reserved);
        }
        assert_eq!(reserved, initial);
        Ok(())
    }

    #[tokio::test]
    async fn test_item_from_other_restaurant_not_found() -> Result<()> {
        let (db, _restaurant, item) = setup_with_menu_item(5).await?;
        let other = create_test_restaurant(&db, "Elsewhere").await?;
        let customer = create_test_customer(&db, "tg-other").await?;

        let result = add_item(&db, CartScope::delivery(customer.id, other.id), item.id, 1).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_inactive_restaurant_rejects_items() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(5).await?;
        let customer = create_test_customer(&db, "tg-closed").await?;
        set_restaurant_active(&db, restaurant.id, false).await?;

        let result =
            add_item(&db, CartScope::delivery(customer.id, restaurant.id), item.id, 1).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert_eq!(get_menu_item(&db, item.id).await?.unwrap().stock_quantity, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_anonymous_table_carts_are_shared_per_table() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(10).await?;
        let table = create_table(&db, restaurant.id, "4").await?;
        let other_table = create_table(&db, restaurant.id, "5").await?;

        let scope = CartScope::anonymous_table(restaurant.id, table.id);
        add_item(&db, scope, item.id, 1).await?;
        add_item(&db, scope, item.id, 1).await?;
        add_item(&db, CartScope::anonymous_table(restaurant.id, other_table.id), item.id, 1)
            .await?;

        assert_eq!(Cart::find().all(&db).await?.len(), 2);
        assert_eq!(get_cart(&db, scope).await?.lines[0].cart_item.quantity, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_table_of_other_restaurant_rejected() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(10).await?;
        let other = create_test_restaurant(&db, "Other").await?;
        let foreign_table = create_table(&db, other.id, "1").await?;

        let result = add_item(
            &db,
            CartScope::anonymous_table(restaurant.id, foreign_table.id),
            item.id,
            1,
        )
        .await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_total_follows_live_price() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(10).await?;
        let customer = create_test_customer(&db, "tg-live").await?;
        let scope = CartScope::delivery(customer.id, restaurant.id);

        assert_eq!(add_item(&db, scope, item.id, 2).await?, 20.0);
        update_menu_item_price(&db, item.id, 12.5, None).await?;
        assert_eq!(cart_total(&db, scope).await?, 25.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_item_releases_stock() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(3).await?;
        let second = create_test_menu_item(&db, restaurant.id, "Tea", 2.5, 10).await?;
        let customer = create_test_customer(&db, "tg-remove").await?;
        let scope = CartScope::delivery(customer.id, restaurant.id);

        add_item(&db, scope, item.id, 3).await?;
        add_item(&db, scope, second.id, 2).await?;
        assert!(!get_menu_item(&db, item.id).await?.unwrap().is_available);

        let total = remove_item(&db, scope, item.id).await?;
        assert_eq!(total, 5.0);

        let restored = get_menu_item(&db, item.id).await?.unwrap();
        assert_eq!(restored.stock_quantity, 3);
        assert!(restored.is_available);

        let missing = remove_item(&db, scope, item.id).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_consumes_reserved_stock() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(4).await?;
        let customer = create_test_customer(&db, "tg-clear").await?;
        let scope = CartScope::delivery(customer.id, restaurant.id);

        add_item(&db, scope, item.id, 3).await?;
        assert_eq!(clear(&db, scope).await?, 1);
        assert_eq!(cart_total(&db, scope).await?, 0.0);
        assert_eq!(get_menu_item(&db, item.id).await?.unwrap().stock_quantity, 1);

        let nobody = CartScope::delivery(customer.id + 100, restaurant.id);
        assert_eq!(clear(&db, nobody).await?, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_never_oversell() -> Result<()> {
        let (db, path) = setup_file_test_db().await?;
        let restaurant = create_test_restaurant(&db, "Rush Hour").await?;
        let item_id = create_test_menu_item(&db, restaurant.id, "Last Samsa", 3.0, 5)
            .await?
            .id;

        let db = std::sync::Arc::new(db);
        let mut racers = tokio::task::JoinSet::new();
        for n in 0..8 {
            let customer = create_test_customer(&db, &format!("tg-race-{n}")).await?;
            let scope = CartScope::delivery(customer.id, restaurant.id);
            let db = std::sync::Arc::clone(&db);
            racers.spawn(async move { add_item(&db, scope, item_id, 2).await });
        }

        let mut reserved = 0;
        while let Some(joined) = racers.join_next().await {
            match joined.unwrap() {
                Ok(_) => reserved += 2,
                // Losers either see the stock gone or lose the write lock
                Err(Error::InsufficientStock { .. } | Error::Database(_)) => {}
                Err(other) => panic!("unexpected add_item failure: {other}"),
            }
        }
        let db = std::sync::Arc::try_unwrap(db).expect("racers still hold the connection");

        let left = get_menu_item(&db, item_id).await?.unwrap();
        let in_carts: i32 = CartItem::find()
            .all(&db)
            .await?
            .iter()
            .map(|line| line.quantity)
            .sum();
        assert!(reserved <= 4);
        assert!(left.stock_quantity >= 0);
        assert_eq!(left.stock_quantity, 5 - reserved);
        assert_eq!(in_carts, reserved);

        remove_file_test_db(db, path).await
    }
}
