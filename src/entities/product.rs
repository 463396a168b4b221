//! Product entity - A sellable catalog item and its stock counters.
//!
//! `inventory` is the on-hand count and `reserved_quantity` the part of it promised to
//! in-flight or unfulfilled orders. Both are only mutated by the stock ledger
//! (`core::ledger`) through conditional updates.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Product database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    /// Unique identifier for the product
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name (e.g., "Linen Shirt")
    pub name: String,
    /// Optional stock keeping unit, unique when present
    #[sea_orm(unique)]
    pub sku: Option<String>,
    /// Current selling price
    pub price: Decimal,
    /// Optional "was" price; always greater than `price` when set
    pub compare_price: Option<Decimal>,
    /// On-hand units
    pub inventory: i32,
    /// Units committed to unfulfilled orders or in-flight checkouts
    pub reserved_quantity: i32,
    /// Available quantity at or below which a `LOW_STOCK` alert is raised
    pub low_stock_threshold: i32,
    /// Available quantity at or below which the product should be reordered
    pub reorder_point: i32,
    /// Suggested quantity for a reorder
    pub reorder_quantity: i32,
    /// Soft delete flag - deleted products cannot be ordered but history is kept
    pub is_deleted: bool,
    /// When the product was created
    pub created_at: DateTimeUtc,
    /// When the product was last modified
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Sellable quantity: on-hand minus reserved, never negative.
    #[must_use]
    pub fn available(&self) -> i32 {
        (self.inventory - self.reserved_quantity).max(0)
    }
}

/// Defines relationships between Product and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One product appears on many order lines
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    /// One product has many stock holds
    #[sea_orm(has_many = "super::stock_hold::Entity")]
    StockHolds,
    /// One product has many inventory alerts over time
    #[sea_orm(has_many = "super::inventory_alert::Entity")]
    InventoryAlerts,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::stock_hold::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockHolds.def()
    }
}

impl Related<super::inventory_alert::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryAlerts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
