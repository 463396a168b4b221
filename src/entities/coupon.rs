//! Coupon entity - Discount codes with validity windows and usage ceilings.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How a coupon's `discount_value` is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum DiscountType {
    /// `discount_value` percent of the subtotal
    #[sea_orm(string_value = "PERCENTAGE")]
    Percentage,
    /// Flat `discount_value` off the subtotal
    #[sea_orm(string_value = "FIXED")]
    Fixed,
}

/// Coupon database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    /// Unique identifier for the coupon
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Redemption code, stored upper-case
    #[sea_orm(unique)]
    pub code: String,
    /// Percentage or fixed amount
    pub discount_type: DiscountType,
    /// Percent (0 < v <= 100) or currency amount, depending on `discount_type`
    pub discount_value: Decimal,
    /// Minimum cart subtotal required to redeem
    pub min_purchase: Option<Decimal>,
    /// Cap on a percentage discount payout
    pub max_discount: Option<Decimal>,
    /// Global redemption ceiling
    pub usage_limit: Option<i32>,
    /// Per-customer redemption ceiling
    pub usage_per_user: Option<i32>,
    /// Start of the validity window
    pub valid_from: DateTimeUtc,
    /// End of the validity window
    pub valid_to: DateTimeUtc,
    /// Admin on/off switch
    pub active: bool,
    /// Committed redemptions; only incremented inside an order commit
    pub usage_count: i32,
    /// When the coupon was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Coupon and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One coupon has many redemptions
    #[sea_orm(has_many = "super::coupon_redemption::Entity")]
    Redemptions,
    /// One coupon is referenced by many orders
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::coupon_redemption::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Redemptions.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
