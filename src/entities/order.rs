//! Order entity - One committed checkout with its frozen price breakdown.
//!
//! Orders are never hard-deleted; cancellation is a status. Totals are stored as
//! computed at checkout so a historical order never needs the pricing pipeline again.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum OrderStatus {
    /// Persisted, awaiting payment/processing
    #[sea_orm(string_value = "CREATED")]
    Created,
    /// Being picked and packed
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    /// Handed to the carrier; reserved stock has been committed
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    /// Received by the customer
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    /// Cancelled before shipment; reserved stock has been released
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl OrderStatus {
    /// Stable upper-case name, matching the stored value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether `next` is a legal successor of this status.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Processing | Self::Cancelled)
                | (Self::Processing, Self::Shipped | Self::Cancelled)
                | (Self::Shipped, Self::Delivered)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    /// Unique identifier for the order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Authenticated customer id, None for guest checkouts
    pub customer_id: Option<String>,
    /// Customer key used for per-user coupon limits
    pub customer_key: String,
    /// Customer name snapshot
    pub customer_name: String,
    /// Customer email snapshot
    pub customer_email: String,
    /// Customer phone snapshot
    pub customer_phone: String,
    /// Shipping address snapshot
    pub shipping_address: String,
    /// Sum of line totals
    pub subtotal: Decimal,
    /// Coupon discount applied to the subtotal
    pub discount_amount: Decimal,
    /// Shipping charge
    pub shipping_cost: Decimal,
    /// Tax on the discounted subtotal
    pub tax_amount: Decimal,
    /// Amount charged
    pub total: Decimal,
    /// Applied coupon, if any
    pub coupon_id: Option<i64>,
    /// Applied coupon code snapshot
    pub coupon_code: Option<String>,
    /// Current lifecycle status
    pub status: OrderStatus,
    /// Redirect URL handed back by the payment collaborator
    pub payment_url: Option<String>,
    /// When the order was committed
    pub created_at: DateTimeUtc,
    /// When the order was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Order and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One order has many line items
    #[sea_orm(has_many = "super::order_item::Entity")]
    Items,
    /// An order may reference one coupon
    #[sea_orm(
        belongs_to = "super::coupon::Entity",
        from = "Column::CouponId",
        to = "super::coupon::Column::Id"
    )]
    Coupon,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::coupon::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Coupon.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
