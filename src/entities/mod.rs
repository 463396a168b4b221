//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod coupon;
pub mod coupon_redemption;
pub mod inventory_alert;
pub mod inventory_movement;
pub mod order;
pub mod order_item;
pub mod outbox_message;
pub mod product;
pub mod stock_hold;

// Re-export specific types to avoid conflicts
pub use coupon::{Column as CouponColumn, Entity as Coupon, Model as CouponModel};
pub use coupon_redemption::{
    Column as CouponRedemptionColumn, Entity as CouponRedemption, Model as CouponRedemptionModel,
};
pub use inventory_alert::{
    Column as InventoryAlertColumn, Entity as InventoryAlert, Model as InventoryAlertModel,
};
pub use inventory_movement::{
    Column as InventoryMovementColumn, Entity as InventoryMovement,
    Model as InventoryMovementModel,
};
pub use order::{Column as OrderColumn, Entity as Order, Model as OrderModel};
pub use order_item::{Column as OrderItemColumn, Entity as OrderItem, Model as OrderItemModel};
pub use outbox_message::{
    Column as OutboxMessageColumn, Entity as OutboxMessage, Model as OutboxMessageModel,
};
pub use product::{Column as ProductColumn, Entity as Product, Model as ProductModel};
pub use stock_hold::{Column as StockHoldColumn, Entity as StockHold, Model as StockHoldModel};
