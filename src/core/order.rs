//! Order lifecycle - Reading committed orders and moving them through their statuses.
//!
//! Line items are returned exactly as stored; nothing here reprices an order. Shipping
//! an order turns its held stock into a permanent decrement and cancelling it returns
//! the stock, both in the same transaction as the status change.

use crate::{
    core::{
        alerts, ledger,
        retry::{self, RetryPolicy},
    },
    entities::{
        Order, OrderItem,
        order::{self, OrderStatus},
        order_item,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, TransactionTrait, prelude::*, sea_query::Expr};
use serde::Serialize;
use tracing::{info, instrument, warn};

/// An order together with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderWithItems {
    /// The order row
    pub order: order::Model,
    /// Its lines, in insertion order
    pub items: Vec<order_item::Model>,
}

impl OrderWithItems {
    /// Total units across all lines.
    #[must_use]
    pub fn unit_count(&self) -> i32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

/// Loads an order and its items.
///
/// # Errors
/// Returns `Error::OrderNotFound` for an unknown id.
pub async fn get_order(db: &DatabaseConnection, order_id: i64) -> Result<OrderWithItems> {
    let order = Order::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or(Error::OrderNotFound { order_id })?;
    let items = OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Id)
        .all(db)
        .await?;
    Ok(OrderWithItems { order, items })
}

/// Orders placed under a customer key, newest first.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn orders_for_customer(
    db: &DatabaseConnection,
    customer_key: &str,
) -> Result<Vec<order::Model>> {
    Order::find()
        .filter(order::Column::CustomerKey.eq(customer_key))
        .order_by_desc(order::Column::CreatedAt)
        .order_by_desc(order::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Moves an order to `new_status`.
///
/// Allowed moves are CREATED to PROCESSING to SHIPPED to DELIVERED, and CREATED or
/// PROCESSING to CANCELLED. The status update is conditional on the status that was
/// read, so two racing transitions cannot both apply. Shipping commits the order's held
/// stock and cancelling releases it, in the same transaction as the status change.
///
/// # Errors
/// * `Error::OrderNotFound` for an unknown id
/// * `Error::InvalidStatusTransition` for a move outside the lifecycle, or one that lost
///   a race with another transition
/// * `Error::Conflict` if the database stayed locked through every retry
#[instrument(skip(db))]
pub async fn update_order_status(
    db: &DatabaseConnection,
    order_id: i64,
    new_status: OrderStatus,
) -> Result<order::Model> {
    let now = Utc::now();
    let current = Order::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or(Error::OrderNotFound { order_id })?;
    if !current.status.can_transition_to(new_status) {
        return Err(Error::InvalidStatusTransition {
            from: current.status.to_string(),
            to: new_status.to_string(),
        });
    }

    let from = current.status;
    let (updated, touched) = retry::retry_on_conflict(RetryPolicy::default(), || {
        apply_transition(db, order_id, from, new_status, now)
    })
    .await?;

    info!(order_id, %from, to = %new_status, "order status changed");
    if !touched.is_empty() {
        if let Err(e) = alerts::recheck_products(db, &touched, now).await {
            warn!(order_id, "alert recheck after status change failed: {e}");
        }
    }
    Ok(updated)
}

/// Flips the status and applies its stock effect in one transaction. The conditional
/// update is the first statement, so the transaction never upgrades a read lock.
async fn apply_transition(
    db: &DatabaseConnection,
    order_id: i64,
    from: OrderStatus,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<(order::Model, Vec<i64>)> {
    let txn = db.begin().await?;

    let result = Order::update_many()
        .col_expr(order::Column::Status, Expr::value(to))
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(from))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    let touched = match to {
        OrderStatus::Shipped => ledger::commit_order_holds(&txn, order_id, now).await?,
        OrderStatus::Cancelled => ledger::release_order_holds(&txn, order_id, now).await?,
        _ => Vec::new(),
    };

    let updated = Order::find_by_id(order_id)
        .one(&txn)
        .await?
        .ok_or(Error::OrderNotFound { order_id })?;
    txn.commit().await?;
    Ok((updated, touched))
}
