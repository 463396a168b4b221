//! Coupon validator - Ordered redeemability rules and discount computation.
//!
//! Rules are evaluated in a fixed order so the reported reason is deterministic:
//! existence, active flag, validity window, minimum purchase, global cap, per-customer
//! cap. The same evaluator backs the checkout-form preview and the authoritative
//! check; the only thing the authoritative path adds is [`redeem_in`], which re-applies
//! both caps atomically inside the order commit.

use crate::{
    core::pricing::round_money,
    entities::{
        Coupon, CouponRedemption,
        coupon::{self, DiscountType},
        coupon_redemption,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{Condition, PaginatorTrait, Set, prelude::*, sea_query::Expr};
use serde::Serialize;
use tracing::{debug, info, instrument};

/// Why a coupon cannot be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponRejection {
    /// No coupon with this code
    NotFound,
    /// Switched off by an admin
    Inactive,
    /// `valid_from` is in the future
    NotYetValid,
    /// `valid_to` is in the past
    Expired,
    /// Subtotal below `min_purchase`
    BelowMinPurchase,
    /// `usage_count` reached `usage_limit`
    GlobalLimitReached,
    /// The customer already used it `usage_per_user` times
    PerUserLimitReached,
}

impl CouponRejection {
    /// Stable upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Inactive => "INACTIVE",
            Self::NotYetValid => "NOT_YET_VALID",
            Self::Expired => "EXPIRED",
            Self::BelowMinPurchase => "BELOW_MIN_PURCHASE",
            Self::GlobalLimitReached => "GLOBAL_LIMIT_REACHED",
            Self::PerUserLimitReached => "PER_USER_LIMIT_REACHED",
        }
    }
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a coupon validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponDecision {
    /// Redeemable, with the discount it is worth on this subtotal
    Valid {
        /// The matched coupon
        coupon: coupon::Model,
        /// Discount amount
        discount: Decimal,
    },
    /// Not redeemable
    Invalid {
        /// First failing rule
        reason: CouponRejection,
    },
}

/// Canonical form of a customer-entered code.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Discount a coupon is worth on `subtotal`.
///
/// Fixed discounts never exceed the subtotal; percentage discounts are rounded to cents,
/// then clamped to `max_discount` and the subtotal.
#[must_use]
pub fn compute_discount(coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
    let subtotal = subtotal.max(Decimal::ZERO);
    match coupon.discount_type {
        DiscountType::Fixed => coupon.discount_value.min(subtotal),
        DiscountType::Percentage => {
            let raw = round_money(subtotal * coupon.discount_value / Decimal::ONE_HUNDRED);
            let capped = coupon.max_discount.map_or(raw, |cap| raw.min(cap));
            capped.min(subtotal)
        }
    }
}

/// Applies every rule after existence, in order. `prior_uses` is the customer's
/// committed redemption count, or `None` when the customer is unknown.
///
/// # Errors
/// Returns the first failing rule.
pub fn evaluate_rules(
    coupon: &coupon::Model,
    subtotal: Decimal,
    prior_uses: Option<u64>,
    now: DateTime<Utc>,
) -> std::result::Result<Decimal, CouponRejection> {
    if !coupon.active {
        return Err(CouponRejection::Inactive);
    }
    if now < coupon.valid_from {
        return Err(CouponRejection::NotYetValid);
    }
    if now > coupon.valid_to {
        return Err(CouponRejection::Expired);
    }
    if coupon.min_purchase.is_some_and(|min| subtotal < min) {
        return Err(CouponRejection::BelowMinPurchase);
    }
    if coupon
        .usage_limit
        .is_some_and(|limit| coupon.usage_count >= limit)
    {
        return Err(CouponRejection::GlobalLimitReached);
    }
    if let (Some(limit), Some(used)) = (coupon.usage_per_user, prior_uses) {
        if used >= u64::try_from(limit).unwrap_or(0) {
            return Err(CouponRejection::PerUserLimitReached);
        }
    }
    Ok(compute_discount(coupon, subtotal))
}

/// Finds a coupon by code, case-insensitively.
pub async fn get_coupon_by_code<C>(db: &C, code: &str) -> Result<Option<coupon::Model>>
where
    C: ConnectionTrait,
{
    Coupon::find()
        .filter(coupon::Column::Code.eq(normalize_code(code)))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Committed redemptions of a coupon by one customer.
pub async fn customer_redemptions<C>(db: &C, coupon_id: i64, customer_key: &str) -> Result<u64>
where
    C: ConnectionTrait,
{
    CouponRedemption::find()
        .filter(coupon_redemption::Column::CouponId.eq(coupon_id))
        .filter(coupon_redemption::Column::CustomerKey.eq(customer_key))
        .count(db)
        .await
        .map_err(Into::into)
}

/// Decides whether `code` is redeemable for `subtotal` by `customer_key`.
///
/// Reads committed state only. Without a customer key the per-customer cap is skipped.
///
/// # Errors
/// Returns a database error; rule failures are reported as `CouponDecision::Invalid`.
#[instrument(skip(db))]
pub async fn validate_coupon<C>(
    db: &C,
    code: &str,
    subtotal: Decimal,
    customer_key: Option<&str>,
    now: DateTime<Utc>,
) -> Result<CouponDecision>
where
    C: ConnectionTrait,
{
    let Some(coupon) = get_coupon_by_code(db, code).await? else {
        return Ok(CouponDecision::Invalid {
            reason: CouponRejection::NotFound,
        });
    };

    let prior_uses = match (customer_key, coupon.usage_per_user) {
        (Some(key), Some(_)) => Some(customer_redemptions(db, coupon.id, key).await?),
        _ => None,
    };

    let decision = match evaluate_rules(&coupon, subtotal, prior_uses, now) {
        Ok(discount) => CouponDecision::Valid { coupon, discount },
        Err(reason) => CouponDecision::Invalid { reason },
    };
    debug!(?decision, "coupon evaluated");
    Ok(decision)
}

/// Records one redemption of `coupon` for `order_id` inside the order-commit transaction.
///
/// The global counter is bumped with a conditional update, so `usage_count` can never
/// pass `usage_limit`. The per-customer cap is re-checked against the redemption ledger
/// and the unique `(coupon, customer, sequence)` key rejects a concurrent duplicate
/// (surfaced as a transient database error so the commit is retried and re-checked).
///
/// # Errors
/// * `Error::CouponRejected` when either cap is reached
/// * `Error::Database` on a redemption-sequence race
pub async fn redeem_in<C>(
    db: &C,
    coupon: &coupon::Model,
    order_id: i64,
    customer_key: &str,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let bumped = Coupon::update_many()
        .col_expr(
            coupon::Column::UsageCount,
            Expr::col(coupon::Column::UsageCount).add(1),
        )
        .filter(coupon::Column::Id.eq(coupon.id))
        .filter(
            Condition::any()
                .add(coupon::Column::UsageLimit.is_null())
                .add(
                    Expr::col(coupon::Column::UsageLimit)
                        .gte(Expr::col(coupon::Column::UsageCount).add(1)),
                ),
        )
        .exec(db)
        .await?;
    if bumped.rows_affected == 0 {
        return Err(Error::CouponRejected {
            code: coupon.code.clone(),
            reason: CouponRejection::GlobalLimitReached,
        });
    }

    let prior = customer_redemptions(db, coupon.id, customer_key).await?;
    if let Some(limit) = coupon.usage_per_user {
        if prior >= u64::try_from(limit).unwrap_or(0) {
            return Err(Error::CouponRejected {
                code: coupon.code.clone(),
                reason: CouponRejection::PerUserLimitReached,
            });
        }
    }

    coupon_redemption::ActiveModel {
        coupon_id: Set(coupon.id),
        order_id: Set(order_id),
        customer_key: Set(customer_key.to_string()),
        sequence: Set(i32::try_from(prior + 1).unwrap_or(i32::MAX)),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Input for [`create_coupon`].
#[derive(Debug, Clone)]
pub struct NewCoupon {
    /// Redemption code (normalised to upper case)
    pub code: String,
    /// Percentage or fixed
    pub discount_type: DiscountType,
    /// Percent or amount
    pub discount_value: Decimal,
    /// Minimum subtotal
    pub min_purchase: Option<Decimal>,
    /// Percentage payout cap
    pub max_discount: Option<Decimal>,
    /// Global ceiling
    pub usage_limit: Option<i32>,
    /// Per-customer ceiling
    pub usage_per_user: Option<i32>,
    /// Window start
    pub valid_from: DateTime<Utc>,
    /// Window end
    pub valid_to: DateTime<Utc>,
}

fn invalid(field: &str, message: &str) -> Error {
    Error::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Creates an active coupon after validating its shape.
///
/// # Errors
/// Returns `Error::Validation` for an empty code, an out-of-range value, non-positive
/// limits or an empty validity window, and a database error on duplicate codes.
pub async fn create_coupon(db: &DatabaseConnection, new: NewCoupon) -> Result<coupon::Model> {
    let code = normalize_code(&new.code);
    if code.is_empty() {
        return Err(invalid("code", "cannot be empty"));
    }
    if new.discount_value <= Decimal::ZERO {
        return Err(invalid("discount_value", "must be positive"));
    }
    if new.discount_type == DiscountType::Percentage && new.discount_value > Decimal::ONE_HUNDRED
    {
        return Err(invalid("discount_value", "a percentage cannot exceed 100"));
    }
    if new.min_purchase.is_some_and(|v| v < Decimal::ZERO)
        || new.max_discount.is_some_and(|v| v <= Decimal::ZERO)
    {
        return Err(invalid("amount", "limits must be positive"));
    }
    if new.usage_limit.is_some_and(|v| v <= 0) || new.usage_per_user.is_some_and(|v| v <= 0) {
        return Err(invalid("usage", "usage limits must be positive"));
    }
    if new.valid_to <= new.valid_from {
        return Err(invalid("valid_to", "must be after valid_from"));
    }

    let coupon = coupon::ActiveModel {
        code: Set(code),
        discount_type: Set(new.discount_type),
        discount_value: Set(new.discount_value),
        min_purchase: Set(new.min_purchase),
        max_discount: Set(new.max_discount),
        usage_limit: Set(new.usage_limit),
        usage_per_user: Set(new.usage_per_user),
        valid_from: Set(new.valid_from),
        valid_to: Set(new.valid_to),
        active: Set(true),
        usage_count: Set(0),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(code = %coupon.code, "coupon created");
    Ok(coupon)
}

/// Switches a coupon off. Existing redemptions are unaffected.
///
/// # Errors
/// Returns `Error::CouponRejected` with `NOT_FOUND` for an unknown code.
pub async fn deactivate_coupon(db: &DatabaseConnection, code: &str) -> Result<coupon::Model> {
    let coupon = get_coupon_by_code(db, code)
        .await?
        .ok_or_else(|| Error::CouponRejected {
            code: normalize_code(code),
            reason: CouponRejection::NotFound,
        })?;
    let mut active: coupon::ActiveModel = coupon.into();
    active.active = Set(false);
    active.update(db).await.map_err(Into::into)
}
