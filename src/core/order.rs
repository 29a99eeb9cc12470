//! Order engine - turns a cart into an immutable priced order and drives the order
//! through its status graph.
//!
//! Each public operation is one database transaction. Order rows, frozen lines, stock,
//! loyalty movements and staged notifications commit together or not at all.

use crate::{
    config::EngineSettings,
    core::{
        cart::{self, CartScope},
        catalog, loyalty, notification, round_money,
    },
    entities::{
        Language, MenuItem, Order, OrderItem, OrderStatus, PaymentMethod, UserProfile, menu_item,
        order, order_item, user_profile,
    },
    errors::{Error, Result},
};
use chrono::{TimeDelta, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use std::fmt;
use tracing::{info, instrument, warn};

/// Who is asking for an order change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// A user profile acting as a customer
    Customer(i64),
    /// A staff membership id
    Staff(i64),
    /// Platform administrator
    Admin,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer(id) => write!(f, "customer #{id}"),
            Self::Staff(id) => write!(f, "staff #{id}"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Checkout details supplied by the customer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceOrder {
    pub payment_method: Option<PaymentMethod>,
    pub notes: String,
    /// Falls back to the customer's default address for delivery orders
    pub delivery_address: String,
    /// Loyalty points to redeem, 0 for none
    pub redeem_points: i64,
}

/// A freshly committed order with its frozen lines.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub points_earned: i64,
}

/// Result of a successful status update.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub order: order::Model,
    /// New status in the customer's language
    pub label: String,
}

/// One line about to be frozen into an order.
struct LineDraft {
    menu_item: menu_item::Model,
    quantity: i32,
}

struct OrderDraft<'a> {
    restaurant_id: i64,
    customer: Option<&'a user_profile::Model>,
    table_id: Option<i64>,
    delivery_address: String,
    lines: Vec<LineDraft>,
}

/// Delivery address for the order: explicit, then the customer's default. Table
/// orders may leave it empty.
fn resolve_destination(
    table_id: Option<i64>,
    customer: Option<&user_profile::Model>,
    request: &PlaceOrder,
) -> Result<String> {
    let explicit = request.delivery_address.trim();
    if !explicit.is_empty() {
        return Ok(explicit.to_string());
    }
    if table_id.is_some() {
        return Ok(String::new());
    }
    customer
        .map(|profile| profile.default_delivery_address.trim())
        .filter(|address| !address.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::validation("Delivery orders need a delivery address"))
}

/// Writes the order header, frozen lines, loyalty movements and the "new order"
/// notification. Stock must already be reserved.
async fn create_order<C>(
    conn: &C,
    settings: &EngineSettings,
    draft: OrderDraft<'_>,
    request: &PlaceOrder,
) -> Result<PlacedOrder>
where
    C: ConnectionTrait,
{
    if request.redeem_points < 0 {
        return Err(Error::validation("Redeemed points cannot be negative"));
    }
    if request.redeem_points > 0 && draft.customer.is_none() {
        return Err(Error::validation(
            "Loyalty points can only be redeemed by a signed-in customer",
        ));
    }

    let gross = round_money(
        draft
            .lines
            .iter()
            .map(|line| line.menu_item.effective_price() * f64::from(line.quantity))
            .sum(),
    );
    let menu_discount = round_money(
        draft
            .lines
            .iter()
            .map(|line| line.menu_item.unit_discount() * f64::from(line.quantity))
            .sum(),
    );
    #[allow(clippy::cast_precision_loss)]
    let redeemed_value = round_money(request.redeem_points as f64 * settings.point_value);
    if redeemed_value > gross {
        return Err(Error::validation(format!(
            "Redeeming {} points ({redeemed_value:.2}) exceeds the order total {gross:.2}",
            request.redeem_points
        )));
    }
    let total_price = round_money(gross - redeemed_value);

    let preparation_minutes = draft
        .lines
        .iter()
        .map(|line| line.menu_item.preparation_time)
        .max()
        .unwrap_or(settings.default_preparation_minutes);
    let now = Utc::now();
    let estimated = now
        + TimeDelta::minutes(
            i64::from(preparation_minutes) + settings.preparation_buffer_minutes,
        );

    let order = order::ActiveModel {
        restaurant_id: Set(draft.restaurant_id),
        user_profile_id: Set(draft.customer.map(|profile| profile.id)),
        table_id: Set(draft.table_id),
        assigned_staff_id: Set(None),
        status: Set(OrderStatus::Pending),
        total_price: Set(total_price),
        discount_amount: Set(round_money(menu_discount + redeemed_value)),
        points_redeemed: Set(request.redeem_points),
        payment_method: Set(request.payment_method),
        notes: Set(request.notes.trim().to_string()),
        delivery_address: Set(draft.delivery_address),
        estimated_delivery_time: Set(Some(estimated)),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    let mut items = Vec::with_capacity(draft.lines.len());
    for line in &draft.lines {
        let item = order_item::ActiveModel {
            order_id: Set(order.id),
            menu_item_id: Set(Some(line.menu_item.id)),
            item_name: Set(line.menu_item.name.clone()),
            quantity: Set(line.quantity),
            price: Set(line.menu_item.effective_price()),
            unit_discount: Set(line.menu_item.unit_discount()),
            preparation_time: Set(line.menu_item.preparation_time),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(conn)
        .await?;
        items.push(item);
    }

    let mut points_earned = 0;
    if let Some(customer) = draft.customer {
        if request.redeem_points > 0 {
            loyalty::spend_in(
                conn,
                customer.id,
                request.redeem_points,
                Some(order.id),
                format!("Redeemed on order #{}", order.id),
            )
            .await?;
        }
        if let Some(entry) = loyalty::award_for_order(conn, customer.id, &order, settings).await? {
            points_earned = entry.transaction.points;
        }
    }

    notification::notify_order_placed(conn, &order).await?;

    Ok(PlacedOrder {
        order,
        items,
        points_earned,
    })
}

/// Checks out the scope's cart.
///
/// Prices are read from the menu at this instant, not from when items were added.
/// The cart is emptied; its reserved stock becomes the order's.
///
/// # Errors
/// - `EmptyCart` if the scope has no cart or the cart has no lines
/// - `StockConflict` if a menu item disappeared since it was added
/// - `Validation` for a delivery order without an address, or an invalid redemption
/// - `InsufficientPoints` if the redemption exceeds the balance
/// - `NotFound` if the restaurant is inactive or the table or customer is gone
///
/// Any failure rolls back the whole checkout.
#[instrument(skip(db, settings, request))]
pub async fn place_order(
    db: &DatabaseConnection,
    settings: &EngineSettings,
    scope: CartScope,
    request: PlaceOrder,
) -> Result<PlacedOrder> {
    let txn = db.begin().await?;

    catalog::require_active_restaurant(&txn, scope.restaurant_id).await?;
    if let Some(table_id) = scope.table_id {
        catalog::require_table(&txn, scope.restaurant_id, table_id).await?;
    }
    let customer = match scope.customer_id {
        Some(customer_id) => Some(catalog::require_user_profile(&txn, customer_id).await?),
        None => None,
    };

    let cart = cart::find_cart(&txn, scope).await?.ok_or(Error::EmptyCart)?;
    let lines = cart::load_lines(&txn, cart.id).await?;
    if lines.is_empty() {
        return Err(Error::EmptyCart);
    }

    let delivery_address = resolve_destination(scope.table_id, customer.as_ref(), &request)?;
    let draft = OrderDraft {
        restaurant_id: scope.restaurant_id,
        customer: customer.as_ref(),
        table_id: scope.table_id,
        delivery_address,
        lines: lines
            .into_iter()
            .map(|line| LineDraft {
                quantity: line.cart_item.quantity,
                menu_item: line.menu_item,
            })
            .collect(),
    };
    let placed = create_order(&txn, settings, draft, &request).await?;
    cart::clear_items(&txn, cart.id).await?;

    txn.commit().await?;

    info!(
        order_id = placed.order.id,
        restaurant_id = scope.restaurant_id,
        total_price = placed.order.total_price,
        points_earned = placed.points_earned,
        "Order placed"
    );
    Ok(placed)
}

/// Places a delivery order from an explicit item list, reserving stock as part of
/// the same transaction. Repeated menu items are merged into one line.
///
/// # Errors
/// - `InvalidQuantity` for any quantity below 1 or a merged quantity that overflows,
///   `EmptyCart` for an empty list
/// - `NotFound` if an item is not on this restaurant's menu
/// - `InsufficientStock` if an item cannot cover its quantity; nothing is reserved
/// - everything [`place_order`] can fail with
#[instrument(skip(db, settings, request))]
pub async fn place_delivery_order(
    db: &DatabaseConnection,
    settings: &EngineSettings,
    customer_id: i64,
    restaurant_id: i64,
    items: &[(i64, i32)],
    request: PlaceOrder,
) -> Result<PlacedOrder> {
    if let Some(&(_, quantity)) = items.iter().find(|(_, quantity)| *quantity < 1) {
        return Err(Error::InvalidQuantity { quantity });
    }
    let mut merged: Vec<(i64, i32)> = Vec::with_capacity(items.len());
    for &(menu_item_id, quantity) in items {
        match merged.iter_mut().find(|(id, _)| *id == menu_item_id) {
            Some((_, total)) => {
                *total = total
                    .checked_add(quantity)
                    .ok_or(Error::InvalidQuantity { quantity: i32::MAX })?;
            }
            None => merged.push((menu_item_id, quantity)),
        }
    }
    if merged.is_empty() {
        return Err(Error::EmptyCart);
    }

    let txn = db.begin().await?;

    catalog::require_active_restaurant(&txn, restaurant_id).await?;
    let customer = catalog::require_user_profile(&txn, customer_id).await?;
    let delivery_address = resolve_destination(None, Some(&customer), &request)?;

    let mut lines = Vec::with_capacity(merged.len());
    for (menu_item_id, quantity) in merged {
        MenuItem::find_by_id(menu_item_id)
            .one(&txn)
            .await?
            .filter(|item| item.restaurant_id == restaurant_id)
            .ok_or_else(|| Error::not_found("Menu item", menu_item_id))?;
        let menu_item = catalog::reserve_stock(&txn, menu_item_id, quantity).await?;
        lines.push(LineDraft {
            menu_item,
            quantity,
        });
    }

    let draft = OrderDraft {
        restaurant_id,
        customer: Some(&customer),
        table_id: None,
        delivery_address,
        lines,
    };
    let placed = create_order(&txn, settings, draft, &request).await?;
    txn.commit().await?;

    info!(
        order_id = placed.order.id,
        restaurant_id,
        total_price = placed.order.total_price,
        "Delivery order placed"
    );
    Ok(placed)
}

/// Moves an order from `expected` to `next` only if nobody moved it first.
///
/// # Errors
/// `Conflict` if the stored status is no longer `expected`.
pub(crate) async fn transition<C>(
    conn: &C,
    order_id: i64,
    expected: OrderStatus,
    next: OrderStatus,
    assigned_staff_id: Option<i64>,
) -> Result<order::Model>
where
    C: ConnectionTrait,
{
    let mut update = Order::update_many()
        .col_expr(order::Column::Status, Expr::value(next))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(expected));
    if let Some(staff_id) = assigned_staff_id {
        update = update.col_expr(order::Column::AssignedStaffId, Expr::value(staff_id));
    }

    let result = update.exec(conn).await?;
    if result.rows_affected == 0 {
        return Err(Error::Conflict {
            message: format!("Order {order_id} is no longer {expected}"),
        });
    }

    Order::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))
}

async fn customer_language<C>(conn: &C, order: &order::Model) -> Result<Language>
where
    C: ConnectionTrait,
{
    let Some(profile_id) = order.user_profile_id else {
        return Ok(Language::default());
    };
    Ok(UserProfile::find_by_id(profile_id)
        .one(conn)
        .await?
        .map(|profile| profile.preferred_language)
        .unwrap_or_default())
}

/// Loyalty compensation plus the cancellation notice, for an order already moved to
/// `cancelled` on `conn`.
async fn finish_cancellation<C>(conn: &C, order: &order::Model, actor: Actor) -> Result<Language>
where
    C: ConnectionTrait,
{
    let refunds = loyalty::compensate_order(conn, order).await?;
    let language = customer_language(conn, order).await?;
    notification::notify_order_cancelled(conn, order, language, &actor.to_string()).await?;
    info!(
        order_id = order.id,
        %actor,
        ledger_rows = refunds.len(),
        "Order cancelled"
    );
    Ok(language)
}

/// Moves an order along the status graph on behalf of restaurant staff or an admin.
///
/// Staff actors are recorded as the order's assigned staff member. Moving to
/// `cancelled` needs the same privileges as [`cancel_order`] and compensates loyalty
/// the same way.
///
/// # Errors
/// - `NotFound` if the order does not exist
/// - `Forbidden` for customers and for staff of another restaurant
/// - `CancellationNotAllowed` if a waiter tries to move the order to `cancelled`
/// - `InvalidTransition` if `new_status` is not reachable from the current status
/// - `Conflict` if the status changed concurrently
#[instrument(skip(db))]
pub async fn update_status(
    db: &DatabaseConnection,
    order_id: i64,
    new_status: OrderStatus,
    actor: Actor,
) -> Result<StatusChange> {
    let txn = db.begin().await?;

    let order = Order::find_by_id(order_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))?;

    let assigned_staff_id = match actor {
        Actor::Staff(staff_id) => {
            let member = catalog::get_staff(&txn, staff_id)
                .await?
                .filter(|member| member.restaurant_id == order.restaurant_id)
                .ok_or_else(|| Error::Forbidden {
                    message: format!(
                        "Staff {staff_id} does not work at restaurant {}",
                        order.restaurant_id
                    ),
                })?;
            if new_status == OrderStatus::Cancelled && !member.role.is_privileged() {
                return Err(Error::CancellationNotAllowed {
                    order_id,
                    reason: format!("{} staff may not cancel orders", member.role),
                });
            }
            Some(member.id)
        }
        Actor::Admin => None,
        Actor::Customer(_) => {
            return Err(Error::Forbidden {
                message: "Customers cannot change order status".to_string(),
            });
        }
    };

    if !order.status.can_transition_to(new_status) {
        return Err(Error::InvalidTransition {
            from: order.status,
            to: new_status,
        });
    }

    let updated = transition(&txn, order.id, order.status, new_status, assigned_staff_id).await?;

    let language = if new_status == OrderStatus::Cancelled {
        finish_cancellation(&txn, &updated, actor).await?
    } else {
        let language = customer_language(&txn, &updated).await?;
        notification::notify_status_changed(&txn, &updated, language, &actor.to_string())
            .await?;
        language
    };

    txn.commit().await?;

    info!(
        order_id,
        from = %order.status,
        to = %new_status,
        %actor,
        "Order status updated"
    );
    Ok(StatusChange {
        label: updated.status.label(language).to_string(),
        order: updated,
    })
}

/// Cancels an order before the kitchen starts on it.
///
/// Allowed for the order's own customer, managers and owners of the restaurant, and
/// admins. Loyalty movements of the order are compensated with `refunded` ledger
/// rows; reserved stock is not returned.
///
/// # Errors
/// - `NotFound` if the order does not exist
/// - `CancellationNotAllowed` for any other requester, or once the order is past
///   `accepted`
/// - `Conflict` if the customer already spent the points this order earned, or the
///   status changed concurrently
#[instrument(skip(db))]
pub async fn cancel_order(
    db: &DatabaseConnection,
    order_id: i64,
    requester: Actor,
) -> Result<order::Model> {
    let txn = db.begin().await?;

    let order = Order::find_by_id(order_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))?;

    let permitted = match requester {
        Actor::Customer(profile_id) => order.user_profile_id == Some(profile_id),
        Actor::Staff(staff_id) => catalog::get_staff(&txn, staff_id)
            .await?
            .is_some_and(|member| {
                member.restaurant_id == order.restaurant_id && member.role.is_privileged()
            }),
        Actor::Admin => true,
    };
    if !permitted {
        warn!(order_id, %requester, "Rejected cancellation request");
        return Err(Error::CancellationNotAllowed {
            order_id,
            reason: format!("{requester} may not cancel this order"),
        });
    }
    if !order.status.is_cancellable() {
        return Err(Error::CancellationNotAllowed {
            order_id,
            reason: format!("order is already {}", order.status),
        });
    }

    let cancelled = transition(
        &txn,
        order.id,
        order.status,
        OrderStatus::Cancelled,
        None,
    )
    .await?;
    finish_cancellation(&txn, &cancelled, requester).await?;

    txn.commit().await?;
    Ok(cancelled)
}

/// Loads an order header.
///
/// # Errors
/// `NotFound` if the order does not exist.
pub async fn get_order(db: &DatabaseConnection, order_id: i64) -> Result<order::Model> {
    Order::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))
}

/// Frozen lines of an order in placement order.
pub async fn get_order_items(
    db: &DatabaseConnection,
    order_id: i64,
) -> Result<Vec<order_item::Model>> {
    OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Orders of a restaurant, newest first, optionally limited to one status.
pub async fn list_orders_for_restaurant(
    db: &DatabaseConnection,
    restaurant_id: i64,
    status: Option<OrderStatus>,
) -> Result<Vec<order::Model>> {
    let mut query = Order::find().filter(order::Column::RestaurantId.eq(restaurant_id));
    if let Some(status) = status {
        query = query.filter(order::Column::Status.eq(status));
    }
    query
        .order_by_desc(order::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Orders of a customer across restaurants, newest first.
pub async fn list_orders_for_customer(
    db: &DatabaseConnection,
    user_profile_id: i64,
) -> Result<Vec<order::Model>> {
    Order::find()
        .filter(order::Column::UserProfileId.eq(user_profile_id))
        .order_by_desc(order::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
