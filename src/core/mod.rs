//! Core business logic - framework-agnostic catalog, cart, order, loyalty,
//! notification and review operations.
//!
//! Every mutating operation runs in one database transaction and either commits all
//! of its effects or none of them.

pub mod cart;
pub mod catalog;
pub mod loyalty;
pub mod notification;
pub mod order;
pub mod outbox;
pub mod review;

/// Rounds a currency amount to cents.
#[must_use]
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
