//! Pricing pipeline - Pure, order-sensitive total computation.
//!
//! The order of operations is fixed: subtotal, discount, shipping, tax. Tax is charged on
//! the discounted subtotal and shipping is never taxed. Changing that order changes
//! customer-visible totals. All arithmetic is `Decimal`; settings are passed in.

use crate::config::settings::PricingSettings;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// One line as seen by the pricing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    /// Unit price frozen for this checkout
    pub unit_price: Decimal,
    /// Units purchased
    pub quantity: i32,
}

impl PricedLine {
    /// `unit_price * quantity`.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Result of the pricing pipeline, in the order it was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceBreakdown {
    /// Sum of line totals
    pub subtotal: Decimal,
    /// Discount actually applied (never above `subtotal`)
    pub discount: Decimal,
    /// `subtotal - discount`
    pub subtotal_after_discount: Decimal,
    /// Flat shipping, or zero at/above the free-shipping threshold
    pub shipping_cost: Decimal,
    /// Tax on `subtotal_after_discount`
    pub tax: Decimal,
    /// `subtotal_after_discount + shipping_cost + tax`
    pub total: Decimal,
}

/// Rounds a monetary amount to cents, half away from zero.
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Sum of line totals.
#[must_use]
pub fn subtotal(lines: &[PricedLine]) -> Decimal {
    lines.iter().map(PricedLine::total).sum()
}

/// Runs the full pipeline.
///
/// `discount` is the coupon validator's result (zero without a coupon); it is clamped
/// to `[0, subtotal]`.
#[must_use]
pub fn price_order(
    lines: &[PricedLine],
    discount: Decimal,
    settings: &PricingSettings,
) -> PriceBreakdown {
    let subtotal = subtotal(lines);
    let discount = discount.max(Decimal::ZERO).min(subtotal);
    let subtotal_after_discount = subtotal - discount;

    let shipping_cost = if subtotal_after_discount >= settings.free_shipping_threshold {
        Decimal::ZERO
    } else {
        settings.flat_shipping_cost
    };

    let tax = round_money(subtotal_after_discount * settings.tax_rate_percent / Decimal::ONE_HUNDRED);
    let total = subtotal_after_discount + shipping_cost + tax;

    PriceBreakdown {
        subtotal,
        discount,
        subtotal_after_discount,
        shipping_cost,
        tax,
        total,
    }
}

/// Renders an amount with the store's currency symbol, e.g. `$1062.00`.
#[must_use]
pub fn format_money(amount: Decimal, settings: &PricingSettings) -> String {
    format!("{}{:.2}", settings.currency_symbol, round_money(amount))
}
