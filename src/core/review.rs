//! Reviews and the restaurant rating aggregate.
//!
//! Reading a rating never writes. The cached value on the restaurant row is only
//! updated by [`refresh_rating_cache`].

use crate::{
    core::catalog,
    entities::{Order, OrderStatus, Restaurant, Review, order, restaurant, review},
    errors::{Error, Result},
};
use chrono::{TimeDelta, Utc};
use sea_orm::{JoinType, QuerySelect, RelationTrait, Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument};

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

/// Records a customer's rating for one of their served orders.
///
/// # Errors
/// - `Validation` if `rating` is outside 1..=5 or the order is not served yet
/// - `NotFound` if the order or profile does not exist
/// - `Forbidden` if the order belongs to someone else
/// - `DuplicateReview` if this customer already reviewed the order
#[instrument(skip(db, comment))]
pub async fn submit_review(
    db: &DatabaseConnection,
    order_id: i64,
    user_profile_id: i64,
    rating: i32,
    comment: &str,
) -> Result<review::Model> {
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(Error::validation(format!(
            "Rating must be between {MIN_RATING} and {MAX_RATING}, got {rating}"
        )));
    }

    let txn = db.begin().await?;

    catalog::require_user_profile(&txn, user_profile_id).await?;
    let order = Order::find_by_id(order_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))?;
    if order.user_profile_id != Some(user_profile_id) {
        return Err(Error::Forbidden {
            message: format!("Only the customer who placed order {order_id} can review it"),
        });
    }
    if order.status != OrderStatus::Served {
        return Err(Error::validation(format!(
            "Order {order_id} is {} and cannot be reviewed before it is served",
            order.status
        )));
    }

    let existing = Review::find()
        .filter(review::Column::OrderId.eq(order_id))
        .filter(review::Column::UserProfileId.eq(user_profile_id))
        .one(&txn)
        .await?;
    if existing.is_some() {
        return Err(Error::DuplicateReview { order_id });
    }

    let review = review::ActiveModel {
        order_id: Set(order_id),
        user_profile_id: Set(Some(user_profile_id)),
        rating: Set(rating),
        comment: Set(comment.trim().to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    info!(
        review_id = review.id,
        order_id,
        restaurant_id = order.restaurant_id,
        rating,
        "Review submitted"
    );
    Ok(review)
}

/// Average rating across all reviews of a restaurant's orders, rounded to one
/// decimal; 0 when there are none.
pub(crate) async fn compute_average_rating<C>(conn: &C, restaurant_id: i64) -> Result<f64>
where
    C: ConnectionTrait,
{
    let ratings: Vec<i32> = Review::find()
        .select_only()
        .column(review::Column::Rating)
        .join(JoinType::InnerJoin, review::Relation::Order.def())
        .filter(order::Column::RestaurantId.eq(restaurant_id))
        .into_tuple()
        .all(conn)
        .await?;

    if ratings.is_empty() {
        return Ok(0.0);
    }
    let sum: i64 = ratings.iter().map(|&rating| i64::from(rating)).sum();
    #[allow(clippy::cast_precision_loss)]
    let average = sum as f64 / ratings.len() as f64;
    Ok((average * 10.0).round() / 10.0)
}

fn fresh_cached_rating(restaurant: &restaurant::Model, ttl: TimeDelta) -> Option<f64> {
    let rating = restaurant.cached_rating?;
    let cached_at = restaurant.rating_cached_at?;
    (Utc::now() - cached_at < ttl).then_some(rating)
}

/// Average rating of a restaurant, served from the cache while it is younger than
/// `ttl` and computed live otherwise. Never updates the cache.
pub async fn get_average_rating(
    db: &DatabaseConnection,
    restaurant_id: i64,
    ttl: TimeDelta,
) -> Result<f64> {
    let restaurant = Restaurant::find_by_id(restaurant_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Restaurant", restaurant_id))?;

    if let Some(rating) = fresh_cached_rating(&restaurant, ttl) {
        debug!(restaurant_id, rating, "Serving cached rating");
        return Ok(rating);
    }
    compute_average_rating(db, restaurant_id).await
}

/// Recomputes the average rating and stores it on the restaurant.
pub async fn refresh_rating_cache(db: &DatabaseConnection, restaurant_id: i64) -> Result<f64> {
    let txn = db.begin().await?;

    let restaurant = Restaurant::find_by_id(restaurant_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Restaurant", restaurant_id))?;
    let rating = compute_average_rating(&txn, restaurant_id).await?;

    let mut active: restaurant::ActiveModel = restaurant.into();
    active.cached_rating = Set(Some(rating));
    active.rating_cached_at = Set(Some(Utc::now()));
    active.update(&txn).await?;
    txn.commit().await?;

    info!(restaurant_id, rating, "Refreshed rating cache");
    Ok(rating)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::{
        config::EngineSettings,
        core::{
            cart::{self, CartScope},
            order::{self as order_engine, Actor, PlaceOrder},
        },
        test_utils::*,
    };

    /// Places and serves an order for a new customer; returns (order id, customer id).
    async fn served_order(
        db: &DatabaseConnection,
        restaurant_id: i64,
        menu_item_id: i64,
        telegram_id: &str,
    ) -> Result<(i64, i64)> {
        let customer = create_test_customer(db, telegram_id).await?;
        let scope = CartScope::delivery(customer.id, restaurant_id);
        cart::add_item(db, scope, menu_item_id, 1).await?;
        let placed =
            order_engine::place_order(db, &EngineSettings::default(), scope, PlaceOrder::default())
                .await?;
        for status in [
            OrderStatus::Accepted,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::Served,
        ] {
            order_engine::update_status(db, placed.order.id, status, Actor::Admin).await?;
        }
        Ok((placed.order.id, customer.id))
    }

    #[tokio::test]
    async fn test_submit_review_rules() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(10).await?;
        let (order_id, customer_id) = served_order(&db, restaurant.id, item.id, "tg-a").await?;
        let other = create_test_customer(&db, "tg-other").await?;

        for rating in [0, 6] {
            let result = submit_review(&db, order_id, customer_id, rating, "").await;
            assert!(matches!(result, Err(Error::Validation { .. })));
        }
        let result = submit_review(&db, order_id, other.id, 5, "Not mine").await;
        assert!(matches!(result, Err(Error::Forbidden { .. })));

        let review = submit_review(&db, order_id, customer_id, 4, " Tasty ").await?;
        assert_eq!(review.rating, 4);
        assert_eq!(review.comment, "Tasty");

        let again = submit_review(&db, order_id, customer_id, 5, "Even better").await;
        assert!(matches!(again, Err(Error::DuplicateReview { .. })));
        assert_eq!(again.unwrap_err().kind(), crate::errors::ErrorKind::Conflict);
        Ok(())
    }

    #[tokio::test]
    async fn test_unserved_order_cannot_be_reviewed() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(10).await?;
        let customer = create_test_customer(&db, "tg-early").await?;
        let scope = CartScope::delivery(customer.id, restaurant.id);
        cart::add_item(&db, scope, item.id, 1).await?;
        let placed = order_engine::place_order(
            &db,
            &EngineSettings::default(),
            scope,
            PlaceOrder::default(),
        )
        .await?;

        let result = submit_review(&db, placed.order.id, customer.id, 5, "").await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_average_rating_is_read_only_until_refreshed() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(10).await?;
        let ttl = EngineSettings::default().rating_cache_ttl();
        assert_eq!(get_average_rating(&db, restaurant.id, ttl).await?, 0.0);

        for (telegram_id, rating) in [("tg-1", 5), ("tg-2", 4), ("tg-3", 4)] {
            let (order_id, customer_id) =
                served_order(&db, restaurant.id, item.id, telegram_id).await?;
            submit_review(&db, order_id, customer_id, rating, "").await?;
        }

        // 13 / 3 = 4.33 -> 4.3
        assert_eq!(get_average_rating(&db, restaurant.id, ttl).await?, 4.3);
        let untouched = catalog::get_restaurant(&db, restaurant.id).await?;
        assert_eq!(untouched.and_then(|r| r.cached_rating), None);

        assert_eq!(refresh_rating_cache(&db, restaurant.id).await?, 4.3);

        let (order_id, customer_id) = served_order(&db, restaurant.id, item.id, "tg-4").await?;
        submit_review(&db, order_id, customer_id, 1, "").await?;

        // Fresh cache still answers until it expires
        assert_eq!(get_average_rating(&db, restaurant.id, ttl).await?, 4.3);
        assert_eq!(
            get_average_rating(&db, restaurant.id, TimeDelta::zero()).await?,
            3.5
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_average_rating_is_per_restaurant() -> Result<()> {
        let (db, restaurant, item) = setup_with_menu_item(10).await?;
        let other = create_test_restaurant(&db, "Other").await?;
        let (order_id, customer_id) = served_order(&db, restaurant.id, item.id, "tg-x").await?;
        submit_review(&db, order_id, customer_id, 2, "").await?;

        assert_eq!(compute_average_rating(&db, restaurant.id).await?, 2.0);
        assert_eq!(compute_average_rating(&db, other.id).await?, 0.0);

        let missing = get_average_rating(&db, 999, TimeDelta::zero()).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
        Ok(())
    }
}
