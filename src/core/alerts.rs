//! Inventory alert generator.
//!
//! Compares a product's available quantity with its low-stock threshold and makes the
//! active alerts match: out of stock beats low stock, and anything above the threshold
//! resolves whatever is active. Re-running against unchanged stock changes nothing.

use crate::{
    entities::{
        InventoryAlert, Product,
        inventory_alert::{self, AlertKind},
        product,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{PaginatorTrait, QueryOrder, Set, SqlErr, prelude::*, sea_query::Expr};
use tracing::{debug, info};

/// What a recheck changed for one product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertChange {
    /// Product that was checked
    pub product_id: i64,
    /// Alert raised by this recheck
    pub raised: Option<AlertKind>,
    /// Alerts resolved by this recheck
    pub resolved: Vec<AlertKind>,
}

impl AlertChange {
    /// Whether the recheck left alerts untouched.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.raised.is_none() && self.resolved.is_empty()
    }
}

/// The alert a product's stock calls for, if any.
#[must_use]
pub fn desired_alert(product: &product::Model) -> Option<AlertKind> {
    if product.is_deleted {
        return None;
    }
    let available = product.available();
    if available == 0 {
        Some(AlertKind::OutOfStock)
    } else if available <= product.low_stock_threshold {
        Some(AlertKind::LowStock)
    } else {
        None
    }
}

/// Brings the active alerts of one product in line with its current stock.
///
/// # Errors
/// Returns `Error::ProductNotFound` for an unknown product, or a database error.
pub async fn recheck_alerts<C>(db: &C, product_id: i64, now: DateTime<Utc>) -> Result<AlertChange>
where
    C: ConnectionTrait,
{
    let product = Product::find_by_id(product_id)
        .one(db)
        .await?
        .ok_or(Error::ProductNotFound { product_id })?;
    let desired = desired_alert(&product);

    let active = InventoryAlert::find()
        .filter(inventory_alert::Column::ProductId.eq(product_id))
        .filter(inventory_alert::Column::ActiveKey.is_not_null())
        .all(db)
        .await?;

    let mut change = AlertChange {
        product_id,
        ..AlertChange::default()
    };

    for alert in active.iter().filter(|a| Some(a.kind) != desired) {
        // Conditional on still being active so a racing recheck resolves it only once.
        let result = InventoryAlert::update_many()
            .col_expr(
                inventory_alert::Column::ActiveKey,
                Expr::value(Option::<String>::None),
            )
            .col_expr(inventory_alert::Column::ResolvedAt, Expr::value(now))
            .filter(inventory_alert::Column::Id.eq(alert.id))
            .filter(inventory_alert::Column::ActiveKey.is_not_null())
            .exec(db)
            .await?;
        if result.rows_affected == 1 {
            change.resolved.push(alert.kind);
        }
    }

    if let Some(kind) = desired {
        if !active.iter().any(|a| a.kind == kind) {
            let inserted = inventory_alert::ActiveModel {
                product_id: Set(product_id),
                kind: Set(kind),
                active_key: Set(Some(kind.active_key(product_id))),
                created_at: Set(now),
                resolved_at: Set(None),
                ..Default::default()
            }
            .insert(db)
            .await;
            match inserted {
                Ok(_) => change.raised = Some(kind),
                Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    debug!(product_id, kind = kind.as_str(), "alert already raised concurrently");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    if !change.is_noop() {
        info!(
            product_id,
            available = product.available(),
            raised = ?change.raised,
            resolved = ?change.resolved,
            "inventory alerts updated"
        );
    }
    Ok(change)
}

/// Rechecks several products, each once, in ascending id order.
///
/// # Errors
/// Stops at the first failing product.
pub async fn recheck_products<C>(
    db: &C,
    product_ids: &[i64],
    now: DateTime<Utc>,
) -> Result<Vec<AlertChange>>
where
    C: ConnectionTrait,
{
    let mut ids = product_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut changes = Vec::with_capacity(ids.len());
    for product_id in ids {
        changes.push(recheck_alerts(db, product_id, now).await?);
    }
    Ok(changes)
}

/// All currently active alerts, newest first.
pub async fn active_alerts(db: &DatabaseConnection) -> Result<Vec<inventory_alert::Model>> {
    InventoryAlert::find()
        .filter(inventory_alert::Column::ActiveKey.is_not_null())
        .order_by_desc(inventory_alert::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Number of currently active alerts.
pub async fn count_active_alerts(db: &DatabaseConnection) -> Result<u64> {
    InventoryAlert::find()
        .filter(inventory_alert::Column::ActiveKey.is_not_null())
        .count(db)
        .await
        .map_err(Into::into)
}

/// Every alert ever raised for a product, oldest first.
pub async fn alert_history(
    db: &DatabaseConnection,
    product_id: i64,
) -> Result<Vec<inventory_alert::Model>> {
    InventoryAlert::find()
        .filter(inventory_alert::Column::ProductId.eq(product_id))
        .order_by_asc(inventory_alert::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger;
    use crate::entities::inventory_movement::MovementKind;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_low_stock_alert_is_raised_once() -> Result<()> {
        // Threshold is 2 in the test fixture
        let (db, product) = setup_with_product(2).await?;

        let change = recheck_alerts(&db, product.id, Utc::now()).await?;
        assert_eq!(change.raised, Some(AlertKind::LowStock));

        let again = recheck_alerts(&db, product.id, Utc::now()).await?;
        assert!(again.is_noop());
        assert_eq!(alert_history(&db, product.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_healthy_stock_raises_nothing() -> Result<()> {
        let (db, product) = setup_with_product(50).await?;
        assert!(recheck_alerts(&db, product.id, Utc::now()).await?.is_noop());
        assert_eq!(count_active_alerts(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_stock_replaces_low_stock() -> Result<()> {
        let (db, product) = setup_with_product(2).await?;
        recheck_alerts(&db, product.id, Utc::now()).await?;

        ledger::adjust(&db, product.id, -2, MovementKind::Adjustment, "shrinkage").await?;
        let change = recheck_alerts(&db, product.id, Utc::now()).await?;
        assert_eq!(change.raised, Some(AlertKind::OutOfStock));
        assert_eq!(change.resolved, vec![AlertKind::LowStock]);

        let active = active_alerts(&db).await?;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, AlertKind::OutOfStock);
        Ok(())
    }

    #[tokio::test]
    async fn test_restock_resolves_out_of_stock_exactly_once() -> Result<()> {
        let (db, product) = setup_with_product(0).await?;
        let change = recheck_alerts(&db, product.id, Utc::now()).await?;
        assert_eq!(change.raised, Some(AlertKind::OutOfStock));

        ledger::adjust(&db, product.id, 50, MovementKind::Restock, "delivery").await?;
        let change = recheck_alerts(&db, product.id, Utc::now()).await?;
        assert_eq!(change.resolved, vec![AlertKind::OutOfStock]);
        assert!(recheck_alerts(&db, product.id, Utc::now()).await?.is_noop());

        let history = alert_history(&db, product.id).await?;
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved_at.is_some());
        assert!(history[0].active_key.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_recheck_unknown_product() -> Result<()> {
        let db = setup_test_db().await?;
        let result = recheck_alerts(&db, 99, Utc::now()).await;
        assert!(matches!(result, Err(Error::ProductNotFound { product_id: 99 })));
        Ok(())
    }

    #[tokio::test]
    async fn test_recheck_products_deduplicates() -> Result<()> {
        let (db, product) = setup_with_product(1).await?;
        let changes = recheck_products(&db, &[product.id, product.id], Utc::now()).await?;
        assert_eq!(changes.len(), 1);
        assert_eq!(alert_history(&db, product.id).await?.len(), 1);
        Ok(())
    }
}
