//! Shared test utilities for the storefront engine.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    config::settings::{CheckoutSettings, PricingSettings, Settings},
    core::{
        coupon::{self, NewCoupon},
        product::{self, NewProduct},
    },
    entities::{self, coupon::DiscountType, order::OrderStatus, stock_hold::HoldStatus},
    errors::Result,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use std::path::PathBuf;
use uuid::Uuid;

/// Creates an in-memory `SQLite` database with all tables initialized.
///
/// The pool is limited to a single connection: every connection to `sqlite::memory:`
/// opens its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = sea_orm::Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// A file-backed `SQLite` database behind a pool of several connections, so spawned
/// tasks really run concurrently. The file is deleted on drop.
pub struct SharedTestDb {
    /// Pooled connection, cheap to clone into tasks
    pub db: DatabaseConnection,
    path: PathBuf,
}

impl Drop for SharedTestDb {
    fn drop(&mut self) {
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

/// Creates a fresh file-backed database in the temp directory with up to
/// `connections` pooled connections and all tables initialized.
pub async fn setup_shared_test_db(connections: u32) -> Result<SharedTestDb> {
    let path = std::env::temp_dir().join(format!("storefront-test-{}.db", Uuid::new_v4()));
    let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
    options
        .max_connections(connections)
        .min_connections(1)
        .sqlx_logging(false);
    let db = sea_orm::Database::connect(options).await?;
    let shared = SharedTestDb { db, path };
    crate::config::database::create_tables(&shared.db).await?;
    Ok(shared)
}

/// Number of stock holds still in `HELD`, across all checkouts.
pub async fn count_held_holds(db: &DatabaseConnection) -> Result<u64> {
    Ok(entities::StockHold::find()
        .filter(entities::StockHoldColumn::Status.eq(HoldStatus::Held))
        .count(db)
        .await?)
}

/// Settings with an 18% tax rate, 20.00 flat shipping and free shipping from 350.00.
#[must_use]
pub fn test_settings() -> Settings {
    Settings {
        pricing: PricingSettings {
            tax_rate_percent: Decimal::from(18),
            flat_shipping_cost: Decimal::from(20),
            free_shipping_threshold: Decimal::from(350),
            currency_symbol: "$".to_string(),
        },
        checkout: CheckoutSettings {
            retry_base_delay_ms: 1,
            ..CheckoutSettings::default()
        },
        ..Settings::default()
    }
}

/// Product input with sensible defaults.
///
/// # Defaults
/// * price: 10.00
/// * `low_stock_threshold`: 2
/// * `reorder_point`: 5
/// * `reorder_quantity`: 20
#[must_use]
pub fn new_test_product(name: &str, inventory: i32) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        sku: None,
        price: Decimal::from(10),
        compare_price: None,
        inventory,
        low_stock_threshold: 2,
        reorder_point: 5,
        reorder_quantity: 20,
    }
}

/// Creates a test product with the defaults of [`new_test_product`].
pub async fn create_test_product(
    db: &DatabaseConnection,
    name: &str,
    inventory: i32,
) -> Result<entities::product::Model> {
    product::create_product(db, new_test_product(name, inventory)).await
}

/// Creates a test product with a custom price.
pub async fn create_priced_product(
    db: &DatabaseConnection,
    name: &str,
    price: Decimal,
    inventory: i32,
) -> Result<entities::product::Model> {
    let mut new = new_test_product(name, inventory);
    new.price = price;
    product::create_product(db, new).await
}

/// Sets up a database with one product.
/// Returns (db, product) for ledger and alert tests.
pub async fn setup_with_product(
    inventory: i32,
) -> Result<(DatabaseConnection, entities::product::Model)> {
    let db = setup_test_db().await?;
    let product = create_test_product(&db, "Test Product", inventory).await?;
    Ok((db, product))
}

/// Re-reads a product row.
///
/// # Panics
/// Panics if the product does not exist.
#[allow(clippy::expect_used)]
pub async fn reload_product(
    db: &DatabaseConnection,
    product_id: i64,
) -> Result<entities::product::Model> {
    Ok(entities::Product::find_by_id(product_id)
        .one(db)
        .await?
        .expect("product should exist"))
}

/// Creates an active coupon valid from yesterday until tomorrow, without limits.
pub async fn create_test_coupon(
    db: &DatabaseConnection,
    code: &str,
    discount_type: DiscountType,
    discount_value: Decimal,
) -> Result<entities::coupon::Model> {
    let now = Utc::now();
    coupon::create_coupon(
        db,
        NewCoupon {
            code: code.to_string(),
            discount_type,
            discount_value,
            min_purchase: None,
            max_discount: None,
            usage_limit: None,
            usage_per_user: None,
            valid_from: now - chrono::Duration::days(1),
            valid_to: now + chrono::Duration::days(1),
        },
    )
    .await
}

/// Inserts a bare one-line order without touching stock, for tests that only need an
/// order row to hang redemptions or outbox messages on.
pub async fn insert_test_order(
    db: &DatabaseConnection,
    product_id: i64,
    customer_key: &str,
) -> Result<entities::order::Model> {
    let now = Utc::now();
    let price = Decimal::from(10);
    let order = entities::order::ActiveModel {
        customer_id: Set(None),
        customer_key: Set(customer_key.to_string()),
        customer_name: Set("Test Customer".to_string()),
        customer_email: Set("test@example.com".to_string()),
        customer_phone: Set("555-0100".to_string()),
        shipping_address: Set("1 Test Street".to_string()),
        subtotal: Set(price),
        discount_amount: Set(Decimal::ZERO),
        shipping_cost: Set(Decimal::ZERO),
        tax_amount: Set(Decimal::ZERO),
        total: Set(price),
        coupon_id: Set(None),
        coupon_code: Set(None),
        status: Set(OrderStatus::Created),
        payment_url: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    entities::order_item::ActiveModel {
        order_id: Set(order.id),
        product_id: Set(product_id),
        variant_id: Set(None),
        product_name: Set("Test Product".to_string()),
        quantity: Set(1),
        unit_price: Set(price),
        line_total: Set(price),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(order)
}
