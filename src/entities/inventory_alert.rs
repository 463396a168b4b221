//! Inventory alert entity - Low/out-of-stock alerts raised and resolved by
//! `core::alerts`.
//!
//! `active_key` is `"<product_id>:<KIND>"` while the alert is active and NULL once
//! resolved. Its unique index allows any number of resolved rows but only one active
//! alert of a kind per product.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Alert category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum AlertKind {
    /// Available quantity at or below the product's threshold
    #[sea_orm(string_value = "LOW_STOCK")]
    LowStock,
    /// Nothing left to sell
    #[sea_orm(string_value = "OUT_OF_STOCK")]
    OutOfStock,
}

impl AlertKind {
    /// Stable upper-case name, matching the stored value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LowStock => "LOW_STOCK",
            Self::OutOfStock => "OUT_OF_STOCK",
        }
    }

    /// Value of `active_key` for an active alert of this kind.
    #[must_use]
    pub fn active_key(self, product_id: i64) -> String {
        format!("{product_id}:{}", self.as_str())
    }
}

/// Inventory alert database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_alerts")]
pub struct Model {
    /// Unique identifier for the alert
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Product the alert is about
    pub product_id: i64,
    /// Alert category
    pub kind: AlertKind,
    /// Set while active, NULL once resolved
    #[sea_orm(unique)]
    pub active_key: Option<String>,
    /// When the alert was raised
    pub created_at: DateTimeUtc,
    /// When the alert was resolved
    pub resolved_at: Option<DateTimeUtc>,
}

/// Defines relationships between `InventoryAlert` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each alert belongs to one product
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
