//! Inventory movement entity - Append-only audit trail of every ledger mutation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of ledger operation that produced a movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum MovementKind {
    /// Units moved into `reserved_quantity`
    #[sea_orm(string_value = "RESERVE")]
    Reserve,
    /// Units returned from `reserved_quantity`
    #[sea_orm(string_value = "RELEASE")]
    Release,
    /// Reserved units shipped and removed from inventory
    #[sea_orm(string_value = "COMMIT")]
    Commit,
    /// Administrative restock
    #[sea_orm(string_value = "RESTOCK")]
    Restock,
    /// Administrative correction
    #[sea_orm(string_value = "ADJUSTMENT")]
    Adjustment,
}

/// Inventory movement database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_movements")]
pub struct Model {
    /// Unique identifier for the movement
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Affected product
    pub product_id: i64,
    /// Change applied to `inventory`
    pub inventory_delta: i32,
    /// Change applied to `reserved_quantity`
    pub reserved_delta: i32,
    /// Operation kind
    pub kind: MovementKind,
    /// Free-form reason (checkout token, order id, admin note)
    pub reason: String,
    /// When the movement was recorded
    pub created_at: DateTimeUtc,
}

/// Inventory movements have no navigable relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
