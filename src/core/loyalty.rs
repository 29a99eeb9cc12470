//! Loyalty ledger - append-only point movements paired with a running balance.
//!
//! Every ledger insert goes through [`post`], which moves `user_profiles.loyalty_points`
//! and inserts the ledger row on the same connection, so inside a transaction the two
//! can never diverge. Debits are guarded in the `UPDATE` itself
//! (`points = points - p WHERE points >= p`), so concurrent spends cannot overdraw.

use crate::{
    config::EngineSettings,
    entities::{
        LoyaltyTransaction, LoyaltyTransactionType, Order, UserProfile, loyalty_transaction,
        order, user_profile,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument};

/// A committed ledger row and the balance right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub transaction: loyalty_transaction::Model,
    pub balance: i64,
}

/// Points earned for an order total: one point per full `currency_per_point` units.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn points_for_total(total_price: f64, settings: &EngineSettings) -> i64 {
    if !total_price.is_finite() || total_price <= 0.0 {
        return 0;
    }
    // Nudge before flooring so totals like 99.99999 from float sums still count as 100.
    ((total_price + 1e-9) / settings.currency_per_point).floor() as i64
}

/// Moves the balance by the row's signed delta and appends the row.
///
/// Negative deltas only apply if the balance covers them.
///
/// # Errors
/// - `NotFound` if the profile does not exist
/// - `InsufficientPoints` if a debit exceeds the balance; nothing is written
pub(crate) async fn post<C>(
    conn: &C,
    user_profile_id: i64,
    order_id: Option<i64>,
    points: i64,
    transaction_type: LoyaltyTransactionType,
    description: String,
) -> Result<LedgerEntry>
where
    C: ConnectionTrait,
{
    let row = loyalty_transaction::ActiveModel {
        user_profile_id: Set(user_profile_id),
        order_id: Set(order_id),
        points: Set(points),
        transaction_type: Set(transaction_type),
        description: Set(description),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    let delta = match transaction_type {
        LoyaltyTransactionType::Earned | LoyaltyTransactionType::Refunded => points,
        LoyaltyTransactionType::Spent => -points,
    };

    let mut update = UserProfile::update_many()
        .col_expr(
            user_profile::Column::LoyaltyPoints,
            Expr::col(user_profile::Column::LoyaltyPoints).add(delta),
        )
        .col_expr(user_profile::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(user_profile::Column::Id.eq(user_profile_id));
    if delta < 0 {
        update = update.filter(user_profile::Column::LoyaltyPoints.gte(-delta));
    }
    let result = update.exec(conn).await?;

    if result.rows_affected == 0 {
        let profile = UserProfile::find_by_id(user_profile_id)
            .one(conn)
            .await?
            .ok_or_else(|| Error::not_found("User profile", user_profile_id))?;
        return Err(Error::InsufficientPoints {
            balance: profile.loyalty_points,
            requested: -delta,
        });
    }

    let transaction = row.insert(conn).await?;
    let balance = UserProfile::find_by_id(user_profile_id)
        .one(conn)
        .await?
        .ok_or_else(|| Error::not_found("User profile", user_profile_id))?
        .loyalty_points;

    debug!(
        user_profile_id,
        order_id,
        points,
        %transaction_type,
        balance,
        "Posted loyalty transaction"
    );
    Ok(LedgerEntry {
        transaction,
        balance,
    })
}

/// Awards points for an order inside the caller's transaction.
///
/// Orders worth less than one point produce no ledger row.
pub(crate) async fn award_for_order<C>(
    conn: &C,
    user_profile_id: i64,
    order: &order::Model,
    settings: &EngineSettings,
) -> Result<Option<LedgerEntry>>
where
    C: ConnectionTrait,
{
    let points = points_for_total(order.total_price, settings);
    if points == 0 {
        return Ok(None);
    }
    post(
        conn,
        user_profile_id,
        Some(order.id),
        points,
        LoyaltyTransactionType::Earned,
        format!("Earned for order #{}", order.id),
    )
    .await
    .map(Some)
}

/// Awards loyalty points for an order: `floor(total_price / currency_per_point)`.
///
/// # Errors
/// - `NotFound` if the order or profile does not exist
/// - `Forbidden` if the order belongs to another customer
/// - `Conflict` if points were already awarded for this order
#[instrument(skip(db, settings))]
pub async fn award(
    db: &DatabaseConnection,
    settings: &EngineSettings,
    user_profile_id: i64,
    order_id: i64,
) -> Result<Option<LedgerEntry>> {
    let txn = db.begin().await?;

    let order = Order::find_by_id(order_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("Order", order_id))?;
    if order.user_profile_id != Some(user_profile_id) {
        return Err(Error::Forbidden {
            message: format!("Order {order_id} does not belong to profile {user_profile_id}"),
        });
    }

    let already_awarded = LoyaltyTransaction::find()
        .filter(loyalty_transaction::Column::OrderId.eq(order_id))
        .filter(loyalty_transaction::Column::TransactionType.eq(LoyaltyTransactionType::Earned))
        .one(&txn)
        .await?;
    if already_awarded.is_some() {
        return Err(Error::Conflict {
            message: format!("Points for order {order_id} were already awarded"),
        });
    }

    let entry = award_for_order(&txn, user_profile_id, &order, settings).await?;
    txn.commit().await?;
    Ok(entry)
}

/// Spends points inside the caller's transaction.
pub(crate) async fn spend_in<C>(
    conn: &C,
    user_profile_id: i64,
    points: i64,
    order_id: Option<i64>,
    description: String,
) -> Result<LedgerEntry>
where
    C: ConnectionTrait,
{
    if points <= 0 {
        let balance = UserProfile::find_by_id(user_profile_id)
            .one(conn)
            .await?
            .ok_or_else(|| Error::not_found("User profile", user_profile_id))?
            .loyalty_points;
        return Err(Error::InsufficientPoints {
            balance,
            requested: points,
        });
    }
    post(
        conn,
        user_profile_id,
        order_id,
        points,
        LoyaltyTransactionType::Spent,
        description,
    )
    .await
}

/// Spends points from a customer's balance and returns the new balance.
///
/// # Errors
/// `InsufficientPoints` if `points` is not positive or exceeds the balance; the
/// balance is unchanged.
#[instrument(skip(db))]
pub async fn spend(
    db: &DatabaseConnection,
    user_profile_id: i64,
    points: i64,
    description: &str,
) -> Result<LedgerEntry> {
    let txn = db.begin().await?;
    let entry = spend_in(&txn, user_profile_id, points, None, description.to_string()).await?;
    txn.commit().await?;
    info!(user_profile_id, points, balance = entry.balance, "Spent loyalty points");
    Ok(entry)
}

/// Posts compensating `refunded` rows for everything an order moved on the ledger:
/// spent points come back first, then earned points are taken away. Original rows
/// stay untouched.
///
/// # Errors
/// `Conflict` if the customer has already used the points this order earned.
pub(crate) async fn compensate_order<C>(conn: &C, order: &order::Model) -> Result<Vec<LedgerEntry>>
where
    C: ConnectionTrait,
{
    let Some(user_profile_id) = order.user_profile_id else {
        return Ok(Vec::new());
    };

    let rows = LoyaltyTransaction::find()
        .filter(loyalty_transaction::Column::OrderId.eq(order.id))
        .filter(loyalty_transaction::Column::UserProfileId.eq(user_profile_id))
        .all(conn)
        .await?;

    let sum_of = |kind: LoyaltyTransactionType| -> i64 {
        rows.iter()
            .filter(|row| row.transaction_type == kind)
            .map(|row| row.points)
            .sum()
    };
    let spent = sum_of(LoyaltyTransactionType::Spent);
    let earned = sum_of(LoyaltyTransactionType::Earned);
    let already_refunded = sum_of(LoyaltyTransactionType::Refunded);
    if already_refunded != 0 {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    if spent > 0 {
        entries.push(
            post(
                conn,
                user_profile_id,
                Some(order.id),
                spent,
                LoyaltyTransactionType::Refunded,
                format!("Returned points redeemed on cancelled order #{}", order.id),
            )
            .await?,
        );
    }
    if earned > 0 {
        let entry = post(
            conn,
            user_profile_id,
            Some(order.id),
            -earned,
            LoyaltyTransactionType::Refunded,
            format!("Reversed points earned on cancelled order #{}", order.id),
        )
        .await
        .map_err(|err| match err {
            Error::InsufficientPoints { balance, requested } => Error::Conflict {
                message: format!(
                    "Order #{} earned {requested} points but only {balance} remain",
                    order.id
                ),
            },
            other => other,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Current denormalized balance.
pub async fn balance(db: &DatabaseConnection, user_profile_id: i64) -> Result<i64> {
    UserProfile::find_by_id(user_profile_id)
        .one(db)
        .await?
        .map(|profile| profile.loyalty_points)
        .ok_or_else(|| Error::not_found("User profile", user_profile_id))
}

/// Ledger rows of a customer, newest first.
pub async fn history(
    db: &DatabaseConnection,
    user_profile_id: i64,
) -> Result<Vec<loyalty_transaction::Model>> {
    LoyaltyTransaction::find()
        .filter(loyalty_transaction::Column::UserProfileId.eq(user_profile_id))
        .order_by_desc(loyalty_transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Balance recomputed from the ledger alone.
pub async fn replay_balance(db: &DatabaseConnection, user_profile_id: i64) -> Result<i64> {
    Ok(history(db, user_profile_id)
        .await?
        .iter()
        .map(loyalty_transaction::Model::signed_delta)
        .sum())
}

/// Whether the denormalized balance matches the ledger replay.
pub async fn verify_balance(db: &DatabaseConnection, user_profile_id: i64) -> Result<bool> {
    let stored = balance(db, user_profile_id).await?;
    let replayed = replay_balance(db, user_profile_id).await?;
    if stored != replayed {
        tracing::error!(user_profile_id, stored, replayed, "Loyalty balance drifted from ledger");
    }
    Ok(stored == replayed)
}
