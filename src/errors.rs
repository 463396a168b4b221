//! Unified error types for the storefront engine.
//!
//! Every failure path of the checkout pipeline maps onto one variant here so callers can
//! tell a user-recoverable rejection (reduce quantity, drop the coupon) apart from a
//! transient conflict that is safe to retry.

use crate::core::coupon::CouponRejection;
use rust_decimal::Decimal;
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Engine-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable description of the problem
        message: String,
    },

    /// Request input failed shape validation before any side effect.
    #[error("Invalid {field}: {message}")]
    Validation {
        /// Offending field name
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// A monetary amount was negative or otherwise unusable.
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: Decimal,
    },

    /// A line item references a product that does not exist or was deleted.
    #[error("Product {product_id} not found")]
    ProductNotFound {
        /// Requested product id
        product_id: i64,
    },

    /// Not enough sellable stock to satisfy a reservation.
    #[error("Insufficient inventory for product {product_id}: {available} available, {requested} requested")]
    InsufficientInventory {
        /// Product that ran short
        product_id: i64,
        /// Sellable quantity at the time of the attempt
        available: i32,
        /// Quantity the caller asked for
        requested: i32,
    },

    /// An administrative stock change would break the ledger invariants.
    #[error("Invalid inventory adjustment for product {product_id}: {message}")]
    InvalidAdjustment {
        /// Product being adjusted
        product_id: i64,
        /// Why the adjustment was refused
        message: String,
    },

    /// The supplied coupon cannot be redeemed.
    #[error("Coupon '{code}' rejected: {reason}")]
    CouponRejected {
        /// Code as supplied by the customer
        code: String,
        /// First failing rule
        reason: CouponRejection,
    },

    /// No order with this id exists.
    #[error("Order {order_id} not found")]
    OrderNotFound {
        /// Requested order id
        order_id: i64,
    },

    /// The requested status change is not part of the order lifecycle.
    #[error("Order cannot move from {from} to {to}")]
    InvalidStatusTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Optimistic retries were exhausted; the caller may try again.
    #[error("Checkout conflicted with concurrent updates after {attempts} attempts, please try again")]
    Conflict {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// An external collaborator (payment gateway, notifier) failed.
    #[error("Collaborator error: {message}")]
    Collaborator {
        /// Failure description reported by the collaborator
        message: String,
    },

    /// Database error from `SeaORM`.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// Outbox payload (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error.
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// Serenity/Poise framework error.
    #[error("Serenity/Poise framework error: {0}")]
    Framework(Box<poise::serenity_prelude::Error>),
}

impl From<poise::serenity_prelude::Error> for Error {
    fn from(value: poise::serenity_prelude::Error) -> Self {
        Self::Framework(Box::new(value))
    }
}

impl Error {
    /// Whether the database reported lock contention, a serialization failure or a
    /// unique-key race: the classes of failure an optimistic retry can resolve.
    #[must_use]
    pub fn is_transient_db(&self) -> bool {
        let Self::Database(err) = self else {
            return false;
        };
        if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
            return true;
        }
        let message = err.to_string().to_lowercase();
        message.contains("database is locked")
            || message.contains("database table is locked")
            || message.contains("could not serialize")
            || message.contains("deadlock")
    }

    /// Whether the system (not the customer) may retry the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. }) || self.is_transient_db()
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
