//! Product catalog - Creating, finding, repricing and retiring sellable products.
//!
//! Stock counters are not touched here: a new product starts with its opening inventory
//! and every later change goes through the stock ledger. Repricing only affects future
//! checkouts since order lines carry their own frozen unit price.

use crate::{
    core::alerts,
    entities::{Product, product},
    errors::{Error, Result},
};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*};
use tracing::{info, warn};

/// Input for [`create_product`].
#[derive(Debug, Clone)]
pub struct NewProduct {
    /// Display name
    pub name: String,
    /// Optional stock keeping unit
    pub sku: Option<String>,
    /// Current selling price
    pub price: Decimal,
    /// Optional "was" price, must exceed `price`
    pub compare_price: Option<Decimal>,
    /// Opening on-hand stock
    pub inventory: i32,
    /// Available quantity at or below which a low-stock alert is raised
    pub low_stock_threshold: i32,
    /// Available quantity at or below which a reorder is suggested
    pub reorder_point: i32,
    /// Suggested reorder size
    pub reorder_quantity: i32,
}

fn validate_pricing(price: Decimal, compare_price: Option<Decimal>) -> Result<()> {
    if price.is_sign_negative() {
        return Err(Error::InvalidAmount { amount: price });
    }
    if let Some(compare) = compare_price {
        if compare <= price {
            return Err(Error::Validation {
                field: "compare_price".to_string(),
                message: format!("must be greater than the price {price}"),
            });
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation {
            field: "name".to_string(),
            message: "Product name cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// Retrieves all active (non-deleted) products, ordered alphabetically by name.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn get_all_active_products(db: &DatabaseConnection) -> Result<Vec<product::Model>> {
    Product::find()
        .filter(product::Column::IsDeleted.eq(false))
        .order_by_asc(product::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Finds an active product by exact name.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn get_product_by_name(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Option<product::Model>> {
    Product::find()
        .filter(product::Column::Name.eq(name))
        .filter(product::Column::IsDeleted.eq(false))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Retrieves a product by id, deleted or not.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn get_product_by_id(
    db: &DatabaseConnection,
    product_id: i64,
) -> Result<Option<product::Model>> {
    Product::find_by_id(product_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Active product names containing `partial`, for autocomplete.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn search_product_names(
    db: &DatabaseConnection,
    partial: &str,
    limit: u64,
) -> Result<Vec<String>> {
    let products = Product::find()
        .filter(product::Column::IsDeleted.eq(false))
        .filter(product::Column::Name.contains(partial))
        .order_by_asc(product::Column::Name)
        .limit(limit)
        .all(db)
        .await?;
    Ok(products.into_iter().map(|p| p.name).collect())
}

/// Creates a product with its opening stock.
///
/// # Errors
/// Returns an error if:
/// - The name is empty or whitespace-only
/// - The price is negative, or the compare price is not above it
/// - Opening inventory or a stock threshold is negative
/// - The database insert fails (e.g. duplicate SKU)
pub async fn create_product(db: &DatabaseConnection, new: NewProduct) -> Result<product::Model> {
    validate_name(&new.name)?;
    validate_pricing(new.price, new.compare_price)?;
    if new.inventory < 0
        || new.low_stock_threshold < 0
        || new.reorder_point < 0
        || new.reorder_quantity < 0
    {
        return Err(Error::Validation {
            field: "inventory".to_string(),
            message: "stock levels cannot be negative".to_string(),
        });
    }

    let now = chrono::Utc::now();
    let product = product::ActiveModel {
        name: Set(new.name.trim().to_string()),
        sku: Set(new.sku.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())),
        price: Set(new.price),
        compare_price: Set(new.compare_price),
        inventory: Set(new.inventory),
        reserved_quantity: Set(0),
        low_stock_threshold: Set(new.low_stock_threshold),
        reorder_point: Set(new.reorder_point),
        reorder_quantity: Set(new.reorder_quantity),
        is_deleted: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(product_id = product.id, name = %product.name, "product created");
    Ok(product)
}

async fn find_active(db: &DatabaseConnection, product_id: i64) -> Result<product::Model> {
    Product::find_by_id(product_id)
        .one(db)
        .await?
        .filter(|p| !p.is_deleted)
        .ok_or(Error::ProductNotFound { product_id })
}

/// Renames and reprices a product. Existing orders keep the price they were placed at.
///
/// # Errors
/// Returns an error if:
/// - The name is empty or the pricing is invalid
/// - The product does not exist or is deleted
/// - The database update fails
pub async fn update_product(
    db: &DatabaseConnection,
    product_id: i64,
    new_name: String,
    new_price: Decimal,
    new_compare_price: Option<Decimal>,
) -> Result<product::Model> {
    validate_name(&new_name)?;
    validate_pricing(new_price, new_compare_price)?;

    let mut product: product::ActiveModel = find_active(db, product_id).await?.into();
    product.name = Set(new_name.trim().to_string());
    product.price = Set(new_price);
    product.compare_price = Set(new_compare_price);
    product.updated_at = Set(chrono::Utc::now());

    product.update(db).await.map_err(Into::into)
}

/// Soft deletes a product. Its order history and stock rows are preserved, and new
/// checkouts can no longer reserve it. Its active alerts are resolved.
///
/// # Errors
/// Returns an error if the product does not exist or is already deleted.
pub async fn delete_product(db: &DatabaseConnection, product_id: i64) -> Result<product::Model> {
    let now = chrono::Utc::now();
    let mut product: product::ActiveModel = find_active(db, product_id).await?.into();
    product.is_deleted = Set(true);
    product.updated_at = Set(now);

    let deleted = product.update(db).await?;
    info!(product_id, "product deleted");
    if let Err(e) = alerts::recheck_alerts(db, product_id, now).await {
        warn!(product_id, "alert recheck after delete failed: {e}");
    }
    Ok(deleted)
}
