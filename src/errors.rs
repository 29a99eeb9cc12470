//! Unified error type for the order engine.
//!
//! Every domain failure carries enough context to render a human-readable
//! rejection, and [`Error::kind`] maps it onto the caller-facing taxonomy
//! (validation, conflict, not-found, forbidden, invalid transition).

use crate::entities::order::OrderStatus;
use sea_orm::DbErr;
use thiserror::Error;

/// Caller-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input shape; nothing was written.
    Validation,
    /// Stock, points or state changed underneath; retry with fresh state.
    Conflict,
    /// Referenced entity is missing or inactive.
    NotFound,
    /// Actor lacks permission for the request.
    Forbidden,
    /// Order state machine violation.
    InvalidTransition,
    /// Infrastructure failure (database, configuration, serialization).
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Quantity must be at least 1, got {quantity}")]
    InvalidQuantity { quantity: i32 },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Insufficient stock for '{item}': {available} left, {requested} requested")]
    InsufficientStock {
        item: String,
        available: i32,
        requested: i32,
    },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Cart line {cart_item_id} changed during checkout: {reason}")]
    StockConflict { cart_item_id: i64, reason: String },

    #[error("Insufficient loyalty points: balance {balance}, requested {requested}")]
    InsufficientPoints { balance: i64, requested: i64 },

    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order {order_id} cannot be cancelled: {reason}")]
    CancellationNotAllowed { order_id: i64, reason: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Concurrent update conflict: {message}")]
    Conflict { message: String },

    #[error("Order {order_id} already has a review from this customer")]
    DuplicateReview { order_id: i64 },
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Classifies the error for the view layer.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::InvalidQuantity { .. } => ErrorKind::Validation,
            Self::InsufficientStock { .. }
            | Self::EmptyCart
            | Self::StockConflict { .. }
            | Self::InsufficientPoints { .. }
            | Self::CancellationNotAllowed { .. }
            | Self::Conflict { .. }
            | Self::DuplicateReview { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Database(_) | Self::Config { .. } | Self::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::EmptyCart.kind(), ErrorKind::Conflict);
        assert_eq!(
            Error::InvalidQuantity { quantity: 0 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::not_found("Order", 7).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::InvalidTransition {
                from: OrderStatus::Preparing,
                to: OrderStatus::Cancelled,
            }
            .kind(),
            ErrorKind::InvalidTransition
        );
        assert_eq!(
            Error::Forbidden {
                message: "nope".to_string()
            }
            .kind(),
            ErrorKind::Forbidden
        );
    }

    #[test]
    fn test_messages_are_human_readable() {
        let err = Error::InsufficientStock {
            item: "Plov".to_string(),
            available: 2,
            requested: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for 'Plov': 2 left, 3 requested"
        );
        assert_eq!(
            Error::not_found("Menu item", 42).to_string(),
            "Menu item 42 not found"
        );
    }
}
