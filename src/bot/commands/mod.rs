//! Discord command implementations organized by category.

#![allow(clippy::too_long_first_doc_paragraph)]

/// Coupon preview command
pub mod coupon;

/// General utility commands
pub mod general;

/// Order status command
pub mod order;

/// Stock and inventory snapshot commands
pub mod product;

// Export commands
pub use coupon::*;
pub use general::*;
pub use order::*;
pub use product::*;
