//! Database configuration module for the storefront engine.
//!
//! This module handles the database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Composite unique indexes that the
//! entity derive cannot express are created here as well.

use crate::entities::{
    Coupon, CouponRedemption, InventoryAlert, InventoryMovement, Order, OrderItem, OutboxMessage,
    Product, StockHold, coupon_redemption, stock_hold,
};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::info;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/storefront.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
///
/// This function looks for `DATABASE_URL` in the environment and falls back to
/// a default local `SQLite` file if not found.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Falls back to a default local `SQLite` file if no environment variable is set.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    if database_url == DEFAULT_DATABASE_URL {
        std::fs::create_dir_all("data")?;
    }
    info!("Connecting to database at {database_url}");
    Database::connect(&database_url).await.map_err(Into::into)
}

/// Creates all tables and indexes if they do not exist yet.
///
/// Tables are created parents first so foreign keys resolve.
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut tables = [
        schema.create_table_from_entity(Product),
        schema.create_table_from_entity(Coupon),
        schema.create_table_from_entity(Order),
        schema.create_table_from_entity(OrderItem),
        schema.create_table_from_entity(CouponRedemption),
        schema.create_table_from_entity(StockHold),
        schema.create_table_from_entity(InventoryMovement),
        schema.create_table_from_entity(InventoryAlert),
        schema.create_table_from_entity(OutboxMessage),
    ];
    for table in &mut tables {
        db.execute(builder.build(table.if_not_exists())).await?;
    }

    // Linearizes per-customer coupon redemptions.
    let redemption_sequence = Index::create()
        .name("idx_coupon_redemption_customer_sequence")
        .table(CouponRedemption)
        .col(coupon_redemption::Column::CouponId)
        .col(coupon_redemption::Column::CustomerKey)
        .col(coupon_redemption::Column::Sequence)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&redemption_sequence)).await?;

    let holds_by_token = Index::create()
        .name("idx_stock_holds_checkout_token")
        .table(StockHold)
        .col(stock_hold::Column::CheckoutToken)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&holds_by_token)).await?;

    Ok(())
}
