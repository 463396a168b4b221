//! Inventory administration and the read-only stock snapshot.
//!
//! `adjust_inventory` is the admin entry point for restocks and corrections; it goes
//! through the stock ledger and then rechecks the product's alerts. The snapshot is the
//! read path for dashboards and the bot.

use crate::{
    core::{
        alerts::{self, AlertChange},
        ledger,
        retry::{self, RetryPolicy},
    },
    entities::{Product, inventory_movement::MovementKind, product},
    errors::{Error, Result},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, prelude::*};
use serde::Serialize;
use tracing::{instrument, warn};

/// Kind of administrative stock change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentType {
    /// Goods received; quantity must be positive
    Restock,
    /// Signed correction (damage, recount, shrinkage)
    Adjustment,
}

impl AdjustmentType {
    const fn movement_kind(self) -> MovementKind {
        match self {
            Self::Restock => MovementKind::Restock,
            Self::Adjustment => MovementKind::Adjustment,
        }
    }
}

/// Stock status of one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    /// Above the low-stock threshold
    InStock,
    /// At or below the threshold but not empty
    LowStock,
    /// Nothing available
    OutOfStock,
}

impl StockStatus {
    /// Classifies a product the same way the alert generator does.
    #[must_use]
    pub fn of(product: &product::Model) -> Self {
        let available = product.available();
        if available == 0 {
            Self::OutOfStock
        } else if available <= product.low_stock_threshold {
            Self::LowStock
        } else {
            Self::InStock
        }
    }

    /// Human label used by the bot.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InStock => "In stock",
            Self::LowStock => "Low stock",
            Self::OutOfStock => "Out of stock",
        }
    }
}

/// Result of an administrative adjustment.
#[derive(Debug, Clone)]
pub struct AdjustmentOutcome {
    /// Product after the change
    pub product: product::Model,
    /// Alerts raised or resolved as a consequence; `None` if the recheck failed after
    /// the adjustment was applied
    pub alerts: Option<AlertChange>,
}

/// Applies a restock or correction and re-evaluates the product's alerts.
///
/// `RESTOCK` adds a positive `quantity`; `ADJUSTMENT` applies `quantity` as a signed
/// delta. On-hand stock can never fall below what is already reserved.
///
/// # Errors
/// * `Error::Validation` for a non-positive restock, a zero adjustment or a blank reason
/// * `Error::InvalidAdjustment` if the change would undercut reserved stock
/// * `Error::ProductNotFound` for unknown or deleted products
#[instrument(skip(db))]
pub async fn adjust_inventory(
    db: &DatabaseConnection,
    product_id: i64,
    quantity: i32,
    adjustment: AdjustmentType,
    reason: &str,
) -> Result<AdjustmentOutcome> {
    if adjustment == AdjustmentType::Restock && quantity <= 0 {
        return Err(Error::Validation {
            field: "quantity".to_string(),
            message: format!("a restock must add stock, got {quantity}"),
        });
    }

    let kind = adjustment.movement_kind();
    let product = retry::retry_on_conflict(RetryPolicy::default(), || {
        ledger::adjust(db, product_id, quantity, kind, reason)
    })
    .await?;

    // The adjustment is committed; a failed recheck must not report it as failed
    let alerts = match alerts::recheck_alerts(db, product_id, Utc::now()).await {
        Ok(change) => Some(change),
        Err(e) => {
            warn!(product_id, "alert recheck after adjustment failed: {e}");
            None
        }
    };
    Ok(AdjustmentOutcome { product, alerts })
}

/// Which products a snapshot lists.
#[derive(Debug, Clone, Default)]
pub struct InventoryFilter {
    /// Case-insensitive substring of the product name or SKU
    pub search: Option<String>,
    /// Only products in this status
    pub status: Option<StockStatus>,
    /// Only products at or below their reorder point
    pub needs_reorder: bool,
}

/// One product row of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductStock {
    /// Product id
    pub product_id: i64,
    /// Display name
    pub name: String,
    /// Stock keeping unit
    pub sku: Option<String>,
    /// Current selling price
    pub price: Decimal,
    /// On-hand units
    pub inventory: i32,
    /// Units promised to checkouts and unfulfilled orders
    pub reserved: i32,
    /// `inventory - reserved`
    pub available: i32,
    /// Low-stock threshold
    pub low_stock_threshold: i32,
    /// Derived status
    pub stock_status: StockStatus,
    /// Available at or below the reorder point
    pub needs_reorder: bool,
    /// Units to order, zero when no reorder is needed
    pub suggested_reorder: i32,
}

impl From<&product::Model> for ProductStock {
    fn from(product: &product::Model) -> Self {
        let available = product.available();
        let needs_reorder = available <= product.reorder_point;
        let suggested_reorder = if needs_reorder {
            // Enough to get back above the reorder point, at least one standard batch
            product
                .reorder_quantity
                .max(product.reorder_point - available + 1)
        } else {
            0
        };
        Self {
            product_id: product.id,
            name: product.name.clone(),
            sku: product.sku.clone(),
            price: product.price,
            inventory: product.inventory,
            reserved: product.reserved_quantity,
            available,
            low_stock_threshold: product.low_stock_threshold,
            stock_status: StockStatus::of(product),
            needs_reorder,
            suggested_reorder,
        }
    }
}

/// Catalogue-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InventoryStats {
    /// Active products
    pub total_products: u64,
    /// Products in `LOW_STOCK`
    pub low_stock_products: u64,
    /// Products in `OUT_OF_STOCK`
    pub out_of_stock_products: u64,
    /// Unresolved alerts
    pub active_alerts: u64,
}

/// Filtered product rows plus catalogue-wide stats.
#[derive(Debug, Clone, Serialize)]
pub struct InventorySnapshot {
    /// Rows matching the filter, by name
    pub products: Vec<ProductStock>,
    /// Stats over every active product, regardless of the filter
    pub stats: InventoryStats,
}

impl InventoryFilter {
    fn matches(&self, row: &ProductStock) -> bool {
        if let Some(status) = self.status {
            if row.stock_status != status {
                return false;
            }
        }
        if self.needs_reorder && !row.needs_reorder {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                row.name.to_lowercase().contains(&term)
                    || row
                        .sku
                        .as_deref()
                        .is_some_and(|sku| sku.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}

/// Reads the current stock picture.
///
/// # Errors
/// Returns an error if a database query fails.
pub async fn get_inventory_snapshot(
    db: &DatabaseConnection,
    filter: &InventoryFilter,
) -> Result<InventorySnapshot> {
    let products = Product::find()
        .filter(product::Column::IsDeleted.eq(false))
        .order_by_asc(product::Column::Name)
        .all(db)
        .await?;

    let rows: Vec<ProductStock> = products.iter().map(ProductStock::from).collect();

    let mut stats = InventoryStats {
        total_products: rows.len() as u64,
        active_alerts: alerts::count_active_alerts(db).await?,
        ..InventoryStats::default()
    };
    for row in &rows {
        match row.stock_status {
            StockStatus::LowStock => stats.low_stock_products += 1,
            StockStatus::OutOfStock => stats.out_of_stock_products += 1,
            StockStatus::InStock => {}
        }
    }

    Ok(InventorySnapshot {
        products: rows.into_iter().filter(|row| filter.matches(row)).collect(),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::inventory_alert::AlertKind;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_restock_resolves_alert() -> Result<()> {
        let (db, product) = setup_with_product(0).await?;
        alerts::recheck_alerts(&db, product.id, Utc::now()).await?;

        let outcome =
            adjust_inventory(&db, product.id, 30, AdjustmentType::Restock, "supplier").await?;
        assert_eq!(outcome.product.inventory, 30);
        let change = outcome.alerts.unwrap_or_default();
        assert_eq!(change.resolved, vec![AlertKind::OutOfStock]);
        Ok(())
    }

    #[tokio::test]
    async fn test_applied_restock_survives_failed_alert_recheck() -> Result<()> {
        let (db, product) = setup_with_product(0).await?;
        db.execute_unprepared("DROP TABLE inventory_alerts").await?;

        let outcome =
            adjust_inventory(&db, product.id, 50, AdjustmentType::Restock, "supplier").await?;
        assert!(outcome.alerts.is_none());
        assert_eq!(outcome.product.inventory, 50);
        assert_eq!(reload_product(&db, product.id).await?.inventory, 50);
        Ok(())
    }

    #[tokio::test]
    async fn test_negative_restock_is_rejected() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        let result = adjust_inventory(&db, product.id, -3, AdjustmentType::Restock, "oops").await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_adjustment_raises_low_stock() -> Result<()> {
        let (db, product) = setup_with_product(10).await?;
        let outcome =
            adjust_inventory(&db, product.id, -8, AdjustmentType::Adjustment, "water damage")
                .await?;
        assert_eq!(outcome.product.inventory, 2);
        let change = outcome.alerts.unwrap_or_default();
        assert_eq!(change.raised, Some(AlertKind::LowStock));
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_stats_and_filter() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_product(&db, "Plenty", 50).await?;
        let low = create_test_product(&db, "Nearly Gone", 2).await?;
        let empty = create_test_product(&db, "Sold Out", 0).await?;
        alerts::recheck_products(&db, &[low.id, empty.id], Utc::now()).await?;

        let snapshot = get_inventory_snapshot(&db, &InventoryFilter::default()).await?;
        assert_eq!(
            snapshot.stats,
            InventoryStats {
                total_products: 3,
                low_stock_products: 1,
                out_of_stock_products: 1,
                active_alerts: 2,
            }
        );
        assert_eq!(snapshot.products.len(), 3);

        let filter = InventoryFilter {
            status: Some(StockStatus::OutOfStock),
            ..InventoryFilter::default()
        };
        let snapshot = get_inventory_snapshot(&db, &filter).await?;
        assert_eq!(snapshot.products.len(), 1);
        assert_eq!(snapshot.products[0].product_id, empty.id);
        // Stats ignore the filter
        assert_eq!(snapshot.stats.total_products, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_reorder_suggestion() -> Result<()> {
        let db = setup_test_db().await?;
        // reorder point 5, reorder quantity 20 in the fixture
        create_test_product(&db, "Low", 3).await?;
        create_test_product(&db, "Fine", 40).await?;

        let filter = InventoryFilter {
            needs_reorder: true,
            ..InventoryFilter::default()
        };
        let snapshot = get_inventory_snapshot(&db, &filter).await?;
        assert_eq!(snapshot.products.len(), 1);
        assert_eq!(snapshot.products[0].name, "Low");
        assert_eq!(snapshot.products[0].suggested_reorder, 20);

        let filter = InventoryFilter {
            search: Some("fIN".to_string()),
            ..InventoryFilter::default()
        };
        let snapshot = get_inventory_snapshot(&db, &filter).await?;
        assert_eq!(snapshot.products.len(), 1);
        assert_eq!(snapshot.products[0].suggested_reorder, 0);
        Ok(())
    }
}
