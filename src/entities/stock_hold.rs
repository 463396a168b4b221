//! Stock hold entity - The persisted form of one reservation.
//!
//! A hold starts `HELD` under a checkout token with an expiry. The order commit binds
//! it to the order (`ALLOCATED`); shipment turns it `COMMITTED`; cancellation, a failed
//! checkout or the expiry sweeper turn it `RELEASED`. Every status change is paired with
//! the matching counter change on the product row.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Where a hold is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum HoldStatus {
    /// Reserved by an in-flight checkout, expires at `expires_at`
    #[sea_orm(string_value = "HELD")]
    Held,
    /// Bound to a committed order, no longer expires
    #[sea_orm(string_value = "ALLOCATED")]
    Allocated,
    /// Converted into a permanent inventory decrement
    #[sea_orm(string_value = "COMMITTED")]
    Committed,
    /// Returned to available stock
    #[sea_orm(string_value = "RELEASED")]
    Released,
}

/// Stock hold database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_holds")]
pub struct Model {
    /// Unique identifier for the hold
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Checkout attempt that took the hold
    pub checkout_token: String,
    /// Reserved product
    pub product_id: i64,
    /// Reserved units
    pub quantity: i32,
    /// Order the hold was allocated to
    pub order_id: Option<i64>,
    /// Lifecycle status
    pub status: HoldStatus,
    /// Deadline after which a `HELD` hold may be released automatically
    pub expires_at: DateTimeUtc,
    /// When the hold was taken
    pub created_at: DateTimeUtc,
    /// When the hold last changed status
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `StockHold` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each hold belongs to one product
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
