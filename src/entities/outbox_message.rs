//! Outbox message entity - Post-commit side effects queued inside the order commit.
//!
//! Rows are written in the same database transaction as the order, then drained by
//! `core::outbox`. A message is done once `processed_at` or `failed_at` is set.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Side effect carried by a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum OutboxKind {
    /// Customer/admin notification for a new order
    #[sea_orm(string_value = "ORDER_PLACED")]
    OrderPlaced,
    /// Hand the order to the payment collaborator
    #[sea_orm(string_value = "PAYMENT_REQUESTED")]
    PaymentRequested,
    /// Recompute inventory alerts for touched products
    #[sea_orm(string_value = "ALERT_RECHECK")]
    AlertRecheck,
}

/// Outbox message database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "outbox_messages")]
pub struct Model {
    /// Unique identifier, also the delivery order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Side effect kind
    pub kind: OutboxKind,
    /// JSON payload
    pub payload: String,
    /// Delivery attempts so far
    pub attempts: i32,
    /// Earliest time of the next attempt
    pub next_attempt_at: DateTimeUtc,
    /// Set when delivered
    pub processed_at: Option<DateTimeUtc>,
    /// Set when attempts are exhausted
    pub failed_at: Option<DateTimeUtc>,
    /// Error from the latest failed attempt
    pub last_error: Option<String>,
    /// When the message was enqueued
    pub created_at: DateTimeUtc,
}

/// Outbox messages have no navigable relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
