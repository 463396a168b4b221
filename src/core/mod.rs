//! Core business logic - framework-agnostic stock, coupon, pricing and checkout
//! operations. Nothing in here knows about Discord; the bot layer only calls into it.

/// Low/out-of-stock alerts raised and resolved from available quantity
pub mod alerts;
/// Checkout orchestration from cart to committed order
pub mod checkout;
/// Coupon rules, discount computation and redemption
pub mod coupon;
/// Admin stock adjustments and the inventory snapshot
pub mod inventory;
/// Atomic stock counters and stock holds
pub mod ledger;
/// Committed-order reads and status transitions
pub mod order;
/// Post-commit side effects and the background worker
pub mod outbox;
/// Pure price computation
pub mod pricing;
/// Product catalog management
pub mod product;
/// Bounded retry with backoff
pub mod retry;
