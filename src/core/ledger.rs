//! Stock ledger - The only code allowed to touch a product's stock counters.
//!
//! Every counter change is a single conditional `UPDATE` whose `WHERE` clause carries the
//! invariant it protects (`inventory >= reserved + q` for a reservation), so two racing
//! callers can never both pass the check. Each change also appends an
//! `inventory_movements` row in the same transaction.
//!
//! Reservations are persisted as stock holds. Public entry points taking a
//! `DatabaseConnection` run in their own short transaction; the `*_in` variants take
//! any connection so callers can compose them into a larger transaction.

use crate::{
    entities::{
        Product, StockHold, inventory_movement,
        inventory_movement::MovementKind,
        product,
        stock_hold::{self, HoldStatus},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument, warn};

/// Rejects non-positive quantities before any statement runs.
fn ensure_positive(quantity: i32) -> Result<()> {
    if quantity <= 0 {
        return Err(Error::Validation {
            field: "quantity".to_string(),
            message: format!("must be positive, got {quantity}"),
        });
    }
    Ok(())
}

async fn record_movement<C>(
    db: &C,
    product_id: i64,
    inventory_delta: i32,
    reserved_delta: i32,
    kind: MovementKind,
    reason: String,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    inventory_movement::ActiveModel {
        product_id: Set(product_id),
        inventory_delta: Set(inventory_delta),
        reserved_delta: Set(reserved_delta),
        kind: Set(kind),
        reason: Set(reason),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

async fn find_live_product<C>(db: &C, product_id: i64) -> Result<product::Model>
where
    C: ConnectionTrait,
{
    Product::find_by_id(product_id)
        .one(db)
        .await?
        .filter(|p| !p.is_deleted)
        .ok_or(Error::ProductNotFound { product_id })
}

/// Atomically moves `quantity` units of `product_id` into `reserved_quantity`.
///
/// Runs inside the caller's transaction. Succeeds only if `available >= quantity` at the
/// moment the update executes.
///
/// # Errors
/// * `Error::InsufficientInventory` when not enough stock is available
/// * `Error::ProductNotFound` for unknown or deleted products
pub async fn reserve_in<C>(
    db: &C,
    product_id: i64,
    quantity: i32,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    ensure_positive(quantity)?;

    let result = Product::update_many()
        .col_expr(
            product::Column::ReservedQuantity,
            Expr::col(product::Column::ReservedQuantity).add(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(now))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::IsDeleted.eq(false))
        .filter(
            Expr::col(product::Column::Inventory)
                .gte(Expr::col(product::Column::ReservedQuantity).add(quantity)),
        )
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        let product = find_live_product(db, product_id).await?;
        debug!(
            product_id,
            available = product.available(),
            requested = quantity,
            "reservation refused"
        );
        return Err(Error::InsufficientInventory {
            product_id,
            available: product.available(),
            requested: quantity,
        });
    }

    record_movement(
        db,
        product_id,
        0,
        quantity,
        MovementKind::Reserve,
        reason.to_string(),
        now,
    )
    .await
}

/// Reserves stock for a checkout and records it as a `HELD` stock hold that expires
/// after `ttl`.
///
/// # Errors
/// See [`reserve_in`].
#[instrument(skip(db))]
pub async fn reserve(
    db: &DatabaseConnection,
    checkout_token: &str,
    product_id: i64,
    quantity: i32,
    ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<stock_hold::Model> {
    ensure_positive(quantity)?;
    let txn = db.begin().await?;

    reserve_in(&txn, product_id, quantity, checkout_token, now).await?;

    let hold = stock_hold::ActiveModel {
        checkout_token: Set(checkout_token.to_string()),
        product_id: Set(product_id),
        quantity: Set(quantity),
        order_id: Set(None),
        status: Set(HoldStatus::Held),
        expires_at: Set(now + ttl),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    debug!(hold_id = hold.id, "stock reserved");
    Ok(hold)
}

/// Returns up to `quantity` reserved units to available stock, bounded at zero.
///
/// Returns the number of units actually released.
///
/// # Errors
/// Returns `Error::ProductNotFound` if the product row does not exist.
pub async fn release_in<C>(
    db: &C,
    product_id: i64,
    quantity: i32,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<i32>
where
    C: ConnectionTrait,
{
    ensure_positive(quantity)?;

    let result = Product::update_many()
        .col_expr(
            product::Column::ReservedQuantity,
            Expr::col(product::Column::ReservedQuantity).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(now))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::ReservedQuantity.gte(quantity))
        .exec(db)
        .await?;

    let released = if result.rows_affected == 1 {
        quantity
    } else {
        let product = Product::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or(Error::ProductNotFound { product_id })?;
        warn!(
            product_id,
            reserved = product.reserved_quantity,
            requested = quantity,
            "release exceeds reserved quantity, clamping to zero"
        );
        let cleared = Product::update_many()
            .col_expr(product::Column::ReservedQuantity, Expr::value(0))
            .col_expr(product::Column::UpdatedAt, Expr::value(now))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::ReservedQuantity.eq(product.reserved_quantity))
            .exec(db)
            .await?;
        if cleared.rows_affected == 1 {
            product.reserved_quantity
        } else {
            0
        }
    };

    if released > 0 {
        record_movement(
            db,
            product_id,
            0,
            -released,
            MovementKind::Release,
            reason.to_string(),
            now,
        )
        .await?;
    }
    Ok(released)
}

/// Reverses a reservation in its own transaction.
///
/// # Errors
/// See [`release_in`].
#[instrument(skip(db))]
pub async fn release(
    db: &DatabaseConnection,
    product_id: i64,
    quantity: i32,
    reason: &str,
) -> Result<i32> {
    let txn = db.begin().await?;
    let released = release_in(&txn, product_id, quantity, reason, Utc::now()).await?;
    txn.commit().await?;
    Ok(released)
}

/// Converts `quantity` reserved units into a permanent inventory decrement.
///
/// # Errors
/// Returns `Error::InvalidAdjustment` if fewer than `quantity` units are reserved, or
/// `Error::ProductNotFound` if the product row does not exist.
pub async fn commit_in<C>(
    db: &C,
    product_id: i64,
    quantity: i32,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    ensure_positive(quantity)?;

    let result = Product::update_many()
        .col_expr(
            product::Column::Inventory,
            Expr::col(product::Column::Inventory).sub(quantity),
        )
        .col_expr(
            product::Column::ReservedQuantity,
            Expr::col(product::Column::ReservedQuantity).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(now))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::ReservedQuantity.gte(quantity))
        .filter(product::Column::Inventory.gte(quantity))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        let product = Product::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or(Error::ProductNotFound { product_id })?;
        return Err(Error::InvalidAdjustment {
            product_id,
            message: format!(
                "cannot commit {quantity} units, only {} reserved",
                product.reserved_quantity
            ),
        });
    }

    record_movement(
        db,
        product_id,
        -quantity,
        -quantity,
        MovementKind::Commit,
        reason.to_string(),
        now,
    )
    .await
}

/// Commits a reservation in its own transaction (fulfilment).
///
/// # Errors
/// See [`commit_in`].
#[instrument(skip(db))]
pub async fn commit(
    db: &DatabaseConnection,
    product_id: i64,
    quantity: i32,
    reason: &str,
) -> Result<()> {
    let txn = db.begin().await?;
    commit_in(&txn, product_id, quantity, reason, Utc::now()).await?;
    txn.commit().await?;
    Ok(())
}

/// Applies an administrative change of `delta` units to on-hand inventory.
///
/// No availability check is made, but on-hand stock may never drop below the reserved
/// quantity (which also keeps it non-negative). A reason is mandatory.
///
/// # Errors
/// * `Error::Validation` for a zero delta or blank reason
/// * `Error::InvalidAdjustment` if the result would undercut reserved stock
/// * `Error::ProductNotFound` for unknown or deleted products
pub async fn adjust_in<C>(
    db: &C,
    product_id: i64,
    delta: i32,
    kind: MovementKind,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<product::Model>
where
    C: ConnectionTrait,
{
    if delta == 0 {
        return Err(Error::Validation {
            field: "quantity".to_string(),
            message: "adjustment must change inventory".to_string(),
        });
    }
    if reason.trim().is_empty() {
        return Err(Error::Validation {
            field: "reason".to_string(),
            message: "an adjustment reason is required".to_string(),
        });
    }

    // inventory + delta >= reserved, written without arithmetic on the left side
    let result = Product::update_many()
        .col_expr(
            product::Column::Inventory,
            Expr::col(product::Column::Inventory).add(delta),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(now))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::IsDeleted.eq(false))
        .filter(
            Expr::col(product::Column::Inventory)
                .gte(Expr::col(product::Column::ReservedQuantity).sub(delta)),
        )
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        let product = find_live_product(db, product_id).await?;
        return Err(Error::InvalidAdjustment {
            product_id,
            message: format!(
                "inventory {} {delta:+} would fall below the {} reserved units",
                product.inventory, product.reserved_quantity
            ),
        });
    }

    record_movement(
        db,
        product_id,
        delta,
        0,
        kind,
        reason.trim().to_string(),
        now,
    )
    .await?;

    find_live_product(db, product_id).await
}

/// Applies an administrative adjustment in its own transaction.
///
/// # Errors
/// See [`adjust_in`].
#[instrument(skip(db))]
pub async fn adjust(
    db: &DatabaseConnection,
    product_id: i64,
    delta: i32,
    kind: MovementKind,
    reason: &str,
) -> Result<product::Model> {
    let txn = db.begin().await?;
    let product = adjust_in(&txn, product_id, delta, kind, reason, Utc::now()).await?;
    txn.commit().await?;
    info!(product_id, delta, ?kind, "inventory adjusted");
    Ok(product)
}

/// Flips one hold from `from` to `to`; returns whether this caller won the flip.
async fn transition_hold<C>(
    db: &C,
    hold_id: i64,
    from: HoldStatus,
    to: HoldStatus,
    now: DateTime<Utc>,
) -> Result<bool>
where
    C: ConnectionTrait,
{
    let result = StockHold::update_many()
        .col_expr(stock_hold::Column::Status, Expr::value(to))
        .col_expr(stock_hold::Column::UpdatedAt, Expr::value(now))
        .filter(stock_hold::Column::Id.eq(hold_id))
        .filter(stock_hold::Column::Status.eq(from))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Releases one hold's units if it is still in `from`; returns the product id when it
/// was released by this call.
async fn release_hold_in<C>(
    db: &C,
    hold: &stock_hold::Model,
    from: HoldStatus,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<i64>>
where
    C: ConnectionTrait,
{
    if !transition_hold(db, hold.id, from, HoldStatus::Released, now).await? {
        return Ok(None);
    }
    release_in(db, hold.product_id, hold.quantity, reason, now).await?;
    Ok(Some(hold.product_id))
}

/// Lists every hold taken under a checkout token, oldest first.
pub async fn holds_for_checkout(
    db: &DatabaseConnection,
    checkout_token: &str,
) -> Result<Vec<stock_hold::Model>> {
    StockHold::find()
        .filter(stock_hold::Column::CheckoutToken.eq(checkout_token))
        .order_by_asc(stock_hold::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Releases every still-`HELD` hold of a failed checkout.
///
/// Holds are read outside any transaction and each is released in its own short
/// transaction that starts with the conditional hold update, like
/// [`release_expired_holds`]. A hold released or allocated by someone else in between
/// is skipped, so the call can be repeated safely.
///
/// Returns the ids of products whose stock was returned by this call.
///
/// # Errors
/// Returns a database error if the scan or a release fails.
#[instrument(skip(db))]
pub async fn release_holds(
    db: &DatabaseConnection,
    checkout_token: &str,
    now: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let holds = StockHold::find()
        .filter(stock_hold::Column::CheckoutToken.eq(checkout_token))
        .filter(stock_hold::Column::Status.eq(HoldStatus::Held))
        .order_by_asc(stock_hold::Column::ProductId)
        .all(db)
        .await?;

    let mut released = Vec::with_capacity(holds.len());
    for hold in &holds {
        let txn = db.begin().await?;
        let outcome = release_hold_in(&txn, hold, HoldStatus::Held, checkout_token, now).await?;
        txn.commit().await?;
        if let Some(product_id) = outcome {
            released.push(product_id);
        }
    }
    Ok(released)
}

/// Binds every `HELD` hold of a checkout to a freshly persisted order.
///
/// Must run inside the order-commit transaction. If fewer than `expected` holds are still
/// held (the sweeper released one after its expiry) the whole commit must fail.
///
/// # Errors
/// Returns `Error::Conflict` when a hold has expired and been released.
pub async fn allocate_holds<C>(
    db: &C,
    checkout_token: &str,
    order_id: i64,
    expected: usize,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = StockHold::update_many()
        .col_expr(stock_hold::Column::Status, Expr::value(HoldStatus::Allocated))
        .col_expr(stock_hold::Column::OrderId, Expr::value(order_id))
        .col_expr(stock_hold::Column::UpdatedAt, Expr::value(now))
        .filter(stock_hold::Column::CheckoutToken.eq(checkout_token))
        .filter(stock_hold::Column::Status.eq(HoldStatus::Held))
        .exec(db)
        .await?;

    let allocated = usize::try_from(result.rows_affected).unwrap_or(usize::MAX);
    if allocated != expected {
        warn!(
            checkout_token,
            expected, allocated, "stock holds expired before the order committed"
        );
        return Err(Error::Conflict { attempts: 1 });
    }
    Ok(())
}

/// Converts all allocated holds of an order into permanent decrements (shipment).
///
/// Returns the ids of affected products.
///
/// # Errors
/// Returns an error if a hold's units are no longer reserved.
pub async fn commit_order_holds<C>(db: &C, order_id: i64, now: DateTime<Utc>) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    let holds = StockHold::find()
        .filter(stock_hold::Column::OrderId.eq(order_id))
        .filter(stock_hold::Column::Status.eq(HoldStatus::Allocated))
        .order_by_asc(stock_hold::Column::ProductId)
        .all(db)
        .await?;

    let reason = format!("order {order_id} shipped");
    let mut touched = Vec::with_capacity(holds.len());
    for hold in &holds {
        if transition_hold(db, hold.id, HoldStatus::Allocated, HoldStatus::Committed, now).await? {
            commit_in(db, hold.product_id, hold.quantity, &reason, now).await?;
            touched.push(hold.product_id);
        }
    }
    Ok(touched)
}

/// Releases every held or allocated hold of an order (cancellation).
///
/// Returns the ids of affected products.
///
/// # Errors
/// Returns a database error if a release fails.
pub async fn release_order_holds<C>(db: &C, order_id: i64, now: DateTime<Utc>) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    let holds = StockHold::find()
        .filter(stock_hold::Column::OrderId.eq(order_id))
        .filter(stock_hold::Column::Status.is_in([HoldStatus::Held, HoldStatus::Allocated]))
        .order_by_asc(stock_hold::Column::ProductId)
        .all(db)
        .await?;

    let reason = format!("order {order_id} cancelled");
    let mut touched = Vec::with_capacity(holds.len());
    for hold in &holds {
        if let Some(product_id) = release_hold_in(db, hold, hold.status, &reason, now).await? {
            touched.push(product_id);
        }
    }
    Ok(touched)
}

/// Releases `HELD` holds whose expiry has passed. Each hold is released in its own
/// short transaction; a hold allocated concurrently is skipped.
///
/// Returns the ids of products whose stock was returned.
///
/// # Errors
/// Returns a database error if the scan or a release fails.
#[instrument(skip(db))]
pub async fn release_expired_holds(db: &DatabaseConnection, now: DateTime<Utc>) -> Result<Vec<i64>> {
    let expired = StockHold::find()
        .filter(stock_hold::Column::Status.eq(HoldStatus::Held))
        .filter(stock_hold::Column::ExpiresAt.lte(now))
        .order_by_asc(stock_hold::Column::Id)
        .all(db)
        .await?;

    let mut released = Vec::new();
    for hold in &expired {
        let txn = db.begin().await?;
        let outcome = release_hold_in(&txn, hold, HoldStatus::Held, "hold expired", now).await?;
        txn.commit().await?;
        if let Some(product_id) = outcome {
            info!(hold_id = hold.id, product_id, "expired stock hold released");
            released.push(product_id);
        }
    }
    Ok(released)
}

/// Units of a product currently promised through holds (held or allocated).
///
/// Matches `reserved_quantity` whenever every reservation went through a hold.
pub async fn held_units(db: &DatabaseConnection, product_id: i64) -> Result<i64> {
    let holds = StockHold::find()
        .filter(stock_hold::Column::ProductId.eq(product_id))
        .filter(stock_hold::Column::Status.is_in([HoldStatus::Held, HoldStatus::Allocated]))
        .all(db)
        .await?;
    Ok(holds.iter().map(|h| i64::from(h.quantity)).sum())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::retry::{self, RetryPolicy};
    use crate::test_utils::*;

    const TTL_SECS: i64 = 900;

    fn ttl() -> chrono::Duration {
        chrono::Duration::seconds(TTL_SECS)
    }

    #[tokio::test]
    async fn test_reserve_moves_units_into_reserved() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;

        let hold = reserve(&db, "chk-1", product.id, 3, ttl(), Utc::now()).await?;
        assert_eq!(hold.status, HoldStatus::Held);
        assert_eq!(hold.quantity, 3);

        let product = reload_product(&db, product.id).await?;
        assert_eq!(product.inventory, 5);
        assert_eq!(product.reserved_quantity, 3);
        assert_eq!(product.available(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_refuses_more_than_available() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        reserve(&db, "chk-1", product.id, 3, ttl(), Utc::now()).await?;

        let result = reserve(&db, "chk-2", product.id, 3, ttl(), Utc::now()).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientInventory {
                available: 2,
                requested: 3,
                ..
            })
        ));

        // The refused attempt leaves no hold and no counter change behind
        assert!(holds_for_checkout(&db, "chk-2").await?.is_empty());
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_unknown_product() -> Result<()> {
        let db = setup_test_db().await?;
        let result = reserve(&db, "chk-1", 404, 1, ttl(), Utc::now()).await;
        assert!(matches!(
            result,
            Err(Error::ProductNotFound { product_id: 404 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_rejects_non_positive_quantity() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        let result = reserve(&db, "chk-1", product.id, 0, ttl(), Utc::now()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversell() -> Result<()> {
        let shared = setup_shared_test_db(8).await?;
        let db = shared.db.clone();
        let product = create_test_product(&db, "Test Product", 10).await?;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let db = db.clone();
            let product_id = product.id;
            tasks.push(tokio::spawn(async move {
                let token = format!("chk-{i}");
                retry::retry_on_conflict(RetryPolicy::new(10), || {
                    reserve(&db, &token, product_id, 3, ttl(), Utc::now())
                })
                .await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(Error::InsufficientInventory { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners, 3);
        let product = reload_product(&db, product.id).await?;
        assert_eq!(product.reserved_quantity, 9);
        assert!(product.reserved_quantity <= product.inventory);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_is_bounded_at_zero() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        reserve(&db, "chk-1", product.id, 2, ttl(), Utc::now()).await?;

        let released = release(&db, product.id, 5, "manual").await?;
        assert_eq!(released, 2);
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_decrements_inventory_and_reserved() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        reserve(&db, "chk-1", product.id, 2, ttl(), Utc::now()).await?;

        commit(&db, product.id, 2, "shipped").await?;
        let product = reload_product(&db, product.id).await?;
        assert_eq!(product.inventory, 3);
        assert_eq!(product.reserved_quantity, 0);

        let result = commit(&db, product.id, 1, "shipped").await;
        assert!(matches!(result, Err(Error::InvalidAdjustment { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_adjust_restock_and_correction() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;

        let product = adjust(&db, product.id, 50, MovementKind::Restock, "supplier delivery").await?;
        assert_eq!(product.inventory, 55);

        let product = adjust(&db, product.id, -5, MovementKind::Adjustment, "damaged").await?;
        assert_eq!(product.inventory, 50);
        Ok(())
    }

    #[tokio::test]
    async fn test_adjust_cannot_undercut_reservations() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        reserve(&db, "chk-1", product.id, 4, ttl(), Utc::now()).await?;

        let result = adjust(&db, product.id, -2, MovementKind::Adjustment, "recount").await;
        assert!(matches!(result, Err(Error::InvalidAdjustment { .. })));
        assert_eq!(reload_product(&db, product.id).await?.inventory, 5);

        let result = adjust(&db, product.id, 1, MovementKind::Restock, "   ").await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_release_holds_for_checkout() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_test_product(&db, "A", 5).await?;
        let b = create_test_product(&db, "B", 5).await?;
        reserve(&db, "chk-1", a.id, 2, ttl(), Utc::now()).await?;
        reserve(&db, "chk-1", b.id, 1, ttl(), Utc::now()).await?;

        let released = release_holds(&db, "chk-1", Utc::now()).await?;
        assert_eq!(released, vec![a.id, b.id]);
        assert_eq!(reload_product(&db, a.id).await?.reserved_quantity, 0);
        assert_eq!(reload_product(&db, b.id).await?.reserved_quantity, 0);

        // Second call finds nothing left to release
        assert!(release_holds(&db, "chk-1", Utc::now()).await?.is_empty());
        assert_eq!(held_units(&db, a.id).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_holds_are_released_once() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        let taken_at = Utc::now() - chrono::Duration::seconds(TTL_SECS + 1);
        reserve(&db, "stale", product.id, 2, ttl(), taken_at).await?;
        reserve(&db, "fresh", product.id, 1, ttl(), Utc::now()).await?;

        let released = release_expired_holds(&db, Utc::now()).await?;
        assert_eq!(released, vec![product.id]);
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 1);

        assert!(release_expired_holds(&db, Utc::now()).await?.is_empty());
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 1);
        Ok(())
    }
}
