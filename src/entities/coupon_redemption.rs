//! Coupon redemption entity - Append-only ledger of committed coupon uses.
//!
//! Per-customer limits are counted here rather than from order rows, so the count
//! survives order anonymisation. `(coupon_id, customer_key, sequence)` is unique: two
//! concurrent redemptions by the same customer compute the same `sequence` and only
//! one insert can win.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Coupon redemption database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupon_redemptions")]
pub struct Model {
    /// Unique identifier for the redemption
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Redeemed coupon
    pub coupon_id: i64,
    /// Order the coupon was applied to
    #[sea_orm(unique)]
    pub order_id: i64,
    /// `user:<id>` or `guest:<email>`
    pub customer_key: String,
    /// 1-based redemption number for this coupon and customer
    pub sequence: i32,
    /// When the redemption was committed
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `CouponRedemption` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each redemption belongs to one coupon
    #[sea_orm(
        belongs_to = "super::coupon::Entity",
        from = "Column::CouponId",
        to = "super::coupon::Column::Id"
    )]
    Coupon,
    /// Each redemption belongs to one order
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::coupon::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Coupon.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
