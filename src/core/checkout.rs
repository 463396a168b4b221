//! Checkout orchestrator - Turns a cart into exactly one committed order, or into
//! nothing at all.
//!
//! A checkout runs through fixed stages: validate the request, load products, reserve
//! stock (ascending product id), validate the coupon, price, then persist the order in
//! one transaction together with its hold allocation, coupon redemption and outbox
//! messages. A failure anywhere before the commit releases every hold the checkout
//! took. Side effects of a committed order (confirmation, payment, alert recheck) are
//! only ever delivered from the outbox.

use crate::{
    config::settings::{CheckoutSettings, Settings},
    core::{
        alerts,
        coupon::{self, CouponDecision},
        ledger, outbox,
        outbox::{OrderPlaced, OutboxEvent, PaymentRequest},
        pricing::{self, PriceBreakdown, PricedLine},
        retry::{self, BackoffStrategy, RetryPolicy},
    },
    entities::{
        Product, coupon as coupon_entity,
        order::{self, OrderStatus},
        order_item, product,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{Set, TransactionTrait, prelude::*};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Who is checking out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerRef {
    /// Signed-in customer
    User {
        /// Account id
        id: String,
    },
    /// Guest checkout, identified by email
    Guest,
}

/// Contact and shipping details snapshotted onto the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerDetails {
    /// Full name
    pub name: String,
    /// Email address
    pub email: String,
    /// Phone number
    pub phone: String,
    /// Shipping address
    pub address: String,
}

/// One cart line as submitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    /// Product to buy
    pub product_id: i64,
    /// Optional variant (size, colour)
    pub variant_id: Option<String>,
    /// Units
    pub quantity: i32,
    /// Price the client displayed; informational only
    pub client_price: Option<Decimal>,
}

/// Input of [`place_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOrderRequest {
    /// Customer identity
    pub customer: CustomerRef,
    /// Contact and shipping details
    pub details: CustomerDetails,
    /// Cart contents
    pub lines: Vec<CartLine>,
    /// Coupon code typed by the customer
    pub coupon_code: Option<String>,
}

impl PlaceOrderRequest {
    /// Key against which per-customer coupon limits are counted:
    /// `user:<id>` or `guest:<lower-cased email>`.
    #[must_use]
    pub fn customer_key(&self) -> String {
        match &self.customer {
            CustomerRef::User { id } => format!("user:{}", id.trim()),
            CustomerRef::Guest => format!("guest:{}", self.details.email.trim().to_lowercase()),
        }
    }

    fn customer_id(&self) -> Option<String> {
        match &self.customer {
            CustomerRef::User { id } => Some(id.trim().to_string()),
            CustomerRef::Guest => None,
        }
    }
}

/// A committed checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    /// New order id
    pub order_id: i64,
    /// Token the checkout's stock holds were taken under
    pub checkout_token: String,
    /// Amount charged
    pub total: Decimal,
    /// Full price breakdown
    pub breakdown: PriceBreakdown,
}

/// Progress markers of a checkout, emitted as tracing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStage {
    /// Request accepted for processing
    Started,
    /// Shape checks passed and every product exists
    ItemsValidated,
    /// Every line has a stock hold
    StockReserved,
    /// Coupon applied and totals computed
    Priced,
    /// Order transaction committed
    OrderPersisted,
    /// Checkout finished
    Success,
    /// Checkout failed and its holds were released
    RolledBack,
}

impl CheckoutStage {
    /// Stable upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::ItemsValidated => "ITEMS_VALIDATED",
            Self::StockReserved => "STOCK_RESERVED",
            Self::Priced => "PRICED",
            Self::OrderPersisted => "ORDER_PERSISTED",
            Self::Success => "SUCCESS",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

fn stage(checkout_token: &str, stage: CheckoutStage) {
    debug!(checkout_token, stage = stage.as_str(), "checkout stage");
}

fn invalid(field: &str, message: impl Into<String>) -> Error {
    Error::Validation {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Checks the request shape and merges lines for the same product and variant.
fn validate_request(
    request: &PlaceOrderRequest,
    settings: &CheckoutSettings,
) -> Result<Vec<CartLine>> {
    let details = &request.details;
    for (field, value) in [
        ("name", &details.name),
        ("email", &details.email),
        ("phone", &details.phone),
        ("address", &details.address),
    ] {
        if value.trim().is_empty() {
            return Err(invalid(field, "is required"));
        }
    }
    if !details.email.contains('@') {
        return Err(invalid("email", format!("'{}' is not an email address", details.email)));
    }
    if let CustomerRef::User { id } = &request.customer {
        if id.trim().is_empty() {
            return Err(invalid("customer", "user id cannot be empty"));
        }
    }
    if request.lines.is_empty() {
        return Err(invalid("lines", "the cart is empty"));
    }

    let mut merged: Vec<CartLine> = Vec::with_capacity(request.lines.len());
    for line in &request.lines {
        if line.quantity <= 0 {
            return Err(invalid(
                "quantity",
                format!("must be positive for product {}", line.product_id),
            ));
        }
        match merged
            .iter_mut()
            .find(|m| m.product_id == line.product_id && m.variant_id == line.variant_id)
        {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(line.clone()),
        }
    }
    // The limit applies to the product total across all of its variants
    if let Some((product_id, quantity)) = reservation_plan(&merged)
        .into_iter()
        .find(|&(_, quantity)| quantity > settings.max_line_quantity)
    {
        return Err(invalid(
            "quantity",
            format!(
                "{quantity} units of product {product_id} exceeds the limit of {}",
                settings.max_line_quantity
            ),
        ));
    }
    Ok(merged)
}

/// Units per product, in ascending product id: the order reservations are taken in.
fn reservation_plan(lines: &[CartLine]) -> BTreeMap<i64, i32> {
    let mut plan: BTreeMap<i64, i32> = BTreeMap::new();
    for line in lines {
        let units = plan.entry(line.product_id).or_insert(0);
        *units = units.saturating_add(line.quantity);
    }
    plan
}

async fn load_products(
    db: &DatabaseConnection,
    plan: &BTreeMap<i64, i32>,
) -> Result<BTreeMap<i64, product::Model>> {
    let ids: Vec<i64> = plan.keys().copied().collect();
    let found: BTreeMap<i64, product::Model> = Product::find()
        .filter(product::Column::Id.is_in(ids))
        .filter(product::Column::IsDeleted.eq(false))
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    if let Some(&product_id) = plan.keys().find(|id| !found.contains_key(id)) {
        return Err(Error::ProductNotFound { product_id });
    }
    Ok(found)
}

/// Everything the order-commit transaction writes.
struct OrderDraft<'a> {
    request: &'a PlaceOrderRequest,
    customer_key: String,
    checkout_token: String,
    lines: Vec<(CartLine, &'a product::Model)>,
    hold_count: usize,
    coupon: Option<coupon_entity::Model>,
    breakdown: PriceBreakdown,
}

/// Persists the order, binds its holds, redeems the coupon and queues side effects,
/// all in one transaction.
async fn persist_order(
    db: &DatabaseConnection,
    draft: &OrderDraft<'_>,
    now: DateTime<Utc>,
) -> Result<order::Model> {
    let txn = db.begin().await?;
    let details = &draft.request.details;
    let breakdown = &draft.breakdown;

    let order = order::ActiveModel {
        customer_id: Set(draft.request.customer_id()),
        customer_key: Set(draft.customer_key.clone()),
        customer_name: Set(details.name.trim().to_string()),
        customer_email: Set(details.email.trim().to_string()),
        customer_phone: Set(details.phone.trim().to_string()),
        shipping_address: Set(details.address.trim().to_string()),
        subtotal: Set(breakdown.subtotal),
        discount_amount: Set(breakdown.discount),
        shipping_cost: Set(breakdown.shipping_cost),
        tax_amount: Set(breakdown.tax),
        total: Set(breakdown.total),
        coupon_id: Set(draft.coupon.as_ref().map(|c| c.id)),
        coupon_code: Set(draft.coupon.as_ref().map(|c| c.code.clone())),
        status: Set(OrderStatus::Created),
        payment_url: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    for (line, product) in &draft.lines {
        order_item::ActiveModel {
            order_id: Set(order.id),
            product_id: Set(product.id),
            variant_id: Set(line.variant_id.clone()),
            product_name: Set(product.name.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(product.price),
            line_total: Set(product.price * Decimal::from(line.quantity)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    ledger::allocate_holds(&txn, &draft.checkout_token, order.id, draft.hold_count, now).await?;

    if let Some(coupon) = &draft.coupon {
        coupon::redeem_in(&txn, coupon, order.id, &draft.customer_key, now).await?;
    }

    let item_count = draft.lines.iter().map(|(line, _)| line.quantity).sum();
    let product_ids = draft.lines.iter().map(|(_, p)| p.id).collect::<Vec<_>>();
    let events = [
        OutboxEvent::OrderPlaced(OrderPlaced {
            order_id: order.id,
            customer_name: order.customer_name.clone(),
            customer_email: order.customer_email.clone(),
            total: order.total,
            item_count,
        }),
        OutboxEvent::PaymentRequested(PaymentRequest {
            order_id: order.id,
            amount: order.total,
            customer_name: order.customer_name.clone(),
            customer_email: order.customer_email.clone(),
            customer_phone: order.customer_phone.clone(),
        }),
        OutboxEvent::AlertRecheck { product_ids },
    ];
    for event in &events {
        outbox::enqueue(&txn, event, now).await?;
    }

    txn.commit().await?;
    Ok(order)
}

fn commit_policy(settings: &CheckoutSettings) -> RetryPolicy {
    let base = Duration::from_millis(settings.retry_base_delay_ms);
    RetryPolicy::new(settings.max_conflict_retries).with_backoff(BackoffStrategy::Exponential {
        base,
        max: base.saturating_mul(16),
    })
}

/// Runs every stage after validation. Holds taken here are released by the caller on
/// failure.
async fn run_checkout(
    db: &DatabaseConnection,
    settings: &Settings,
    request: &PlaceOrderRequest,
    lines: Vec<CartLine>,
    checkout_token: &str,
    now: DateTime<Utc>,
) -> Result<PlacedOrder> {
    let plan = reservation_plan(&lines);
    let products = load_products(db, &plan).await?;
    stage(checkout_token, CheckoutStage::ItemsValidated);

    let ttl = settings.checkout.hold_ttl();
    let policy = commit_policy(&settings.checkout);
    for (&product_id, &quantity) in &plan {
        retry::retry_on_conflict(policy, || {
            ledger::reserve(db, checkout_token, product_id, quantity, ttl, now)
        })
        .await?;
    }
    stage(checkout_token, CheckoutStage::StockReserved);

    let mut draft_lines = Vec::with_capacity(lines.len());
    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        let product = products
            .get(&line.product_id)
            .ok_or(Error::ProductNotFound {
                product_id: line.product_id,
            })?;
        if let Some(client_price) = line.client_price {
            if client_price != product.price {
                warn!(
                    checkout_token,
                    product_id = product.id,
                    %client_price,
                    current_price = %product.price,
                    "client price is stale, charging current price"
                );
            }
        }
        priced.push(PricedLine {
            unit_price: product.price,
            quantity: line.quantity,
        });
        draft_lines.push((line, product));
    }

    let customer_key = request.customer_key();
    let subtotal = pricing::subtotal(&priced);
    let (applied_coupon, discount) = match request.coupon_code.as_deref() {
        Some(code) => {
            match coupon::validate_coupon(db, code, subtotal, Some(&customer_key), now).await? {
                CouponDecision::Valid { coupon, discount } => (Some(coupon), discount),
                CouponDecision::Invalid { reason } => {
                    return Err(Error::CouponRejected {
                        code: code.trim().to_string(),
                        reason,
                    });
                }
            }
        }
        None => (None, Decimal::ZERO),
    };
    let breakdown = pricing::price_order(&priced, discount, &settings.pricing);
    stage(checkout_token, CheckoutStage::Priced);

    let draft = OrderDraft {
        request,
        customer_key,
        checkout_token: checkout_token.to_string(),
        lines: draft_lines,
        hold_count: plan.len(),
        coupon: applied_coupon,
        breakdown,
    };
    let draft = &draft;
    let order = retry::retry_on_conflict(policy, move || {
        persist_order(db, draft, now)
    })
    .await?;
    stage(checkout_token, CheckoutStage::OrderPersisted);

    Ok(PlacedOrder {
        order_id: order.id,
        checkout_token: checkout_token.to_string(),
        total: order.total,
        breakdown,
    })
}

/// Places an order: all lines are reserved and the order committed, or nothing is.
///
/// # Errors
/// * `Error::Validation` for a malformed request, before any side effect
/// * `Error::ProductNotFound` for unknown or deleted products
/// * `Error::InsufficientInventory` naming the first product that ran short
/// * `Error::CouponRejected` when the coupon is not redeemable, including when a usage
///   limit is reached by a concurrent checkout
/// * `Error::Conflict` when the commit kept conflicting or a hold expired; retryable
#[instrument(skip_all, fields(customer = %request.customer_key()))]
pub async fn place_order(
    db: &DatabaseConnection,
    settings: &Settings,
    request: PlaceOrderRequest,
) -> Result<PlacedOrder> {
    let checkout_token = Uuid::new_v4().to_string();
    let now = Utc::now();
    stage(&checkout_token, CheckoutStage::Started);

    let lines = validate_request(&request, &settings.checkout)?;

    match run_checkout(db, settings, &request, lines, &checkout_token, now).await {
        Ok(placed) => {
            stage(&checkout_token, CheckoutStage::Success);
            info!(
                order_id = placed.order_id,
                total = %placed.total,
                "order placed"
            );
            Ok(placed)
        }
        Err(err) => {
            rollback(db, &settings.checkout, &checkout_token).await;
            stage(&checkout_token, CheckoutStage::RolledBack);
            info!(checkout_token, error = %err, "checkout rolled back");
            Err(err)
        }
    }
}

/// Releases the holds of a failed checkout, retrying on lock contention with the same
/// policy as the order commit. If every retry fails the sweeper releases the holds once
/// they expire.
async fn rollback(db: &DatabaseConnection, settings: &CheckoutSettings, checkout_token: &str) {
    let now = Utc::now();
    let released = retry::retry_on_conflict(commit_policy(settings), || {
        ledger::release_holds(db, checkout_token, now)
    })
    .await;
    if let Err(e) = released {
        error!(checkout_token, "failed to release stock holds: {e}");
        return;
    }

    // Every product the checkout held, including holds freed by an earlier attempt
    let touched: Vec<i64> = match ledger::holds_for_checkout(db, checkout_token).await {
        Ok(holds) => holds.iter().map(|hold| hold.product_id).collect(),
        Err(e) => {
            warn!(checkout_token, "could not list released holds: {e}");
            return;
        }
    };
    if !touched.is_empty() {
        if let Err(e) = alerts::recheck_products(db, &touched, now).await {
            warn!(checkout_token, "alert recheck after rollback failed: {e}");
        }
    }
}

/// Read-only coupon check for the checkout form. Shares its rules with the
/// authoritative check in [`place_order`] but takes no lock and records nothing.
///
/// # Errors
/// Returns a database error; rule failures are a `CouponDecision::Invalid`.
pub async fn preview_coupon(
    db: &DatabaseConnection,
    code: &str,
    subtotal: Decimal,
    customer_key: Option<&str>,
) -> Result<CouponDecision> {
    if subtotal.is_sign_negative() {
        return Err(Error::InvalidAmount { amount: subtotal });
    }
    coupon::validate_coupon(db, code, subtotal, customer_key, Utc::now()).await
}

#[cfg(test)]
impl PlaceOrderRequest {
    /// Signed-in `tester` buying `(product_id, quantity)` lines without a coupon.
    pub fn for_test(lines: Vec<(i64, i32)>) -> Self {
        Self {
            customer: CustomerRef::User {
                id: "tester".to_string(),
            },
            details: CustomerDetails {
                name: "Test Customer".to_string(),
                email: "tester@example.com".to_string(),
                phone: "555-0100".to_string(),
                address: "1 Test Street".to_string(),
            },
            lines: lines
                .into_iter()
                .map(|(product_id, quantity)| CartLine {
                    product_id,
                    variant_id: None,
                    quantity,
                    client_price: None,
                })
                .collect(),
            coupon_code: None,
        }
    }

    fn with_coupon(mut self, code: &str) -> Self {
        self.coupon_code = Some(code.to_string());
        self
    }

    fn as_user(mut self, id: &str) -> Self {
        self.customer = CustomerRef::User { id: id.to_string() };
        self
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::coupon::CouponRejection;
    use crate::core::order::get_order;
    use crate::core::product::update_product;
    use crate::entities::{Order, coupon::DiscountType, stock_hold::HoldStatus};
    use crate::test_utils::*;
    use rust_decimal_macros::dec;
    use sea_orm::PaginatorTrait;

    async fn order_count(db: &DatabaseConnection) -> Result<u64> {
        Ok(Order::find().count(db).await?)
    }

    async fn limit_coupon(
        db: &DatabaseConnection,
        code: &str,
        usage_limit: Option<i32>,
        usage_per_user: Option<i32>,
    ) -> Result<coupon_entity::Model> {
        let coupon = create_test_coupon(db, code, DiscountType::Fixed, dec!(5)).await?;
        let mut active: coupon_entity::ActiveModel = coupon.into();
        active.usage_limit = Set(usage_limit);
        active.usage_per_user = Set(usage_per_user);
        Ok(active.update(db).await?)
    }

    #[tokio::test]
    async fn test_percentage_coupon_order_total() -> Result<()> {
        let db = setup_test_db().await?;
        let product = create_priced_product(&db, "Lamp", dec!(250), 10).await?;
        create_test_coupon(&db, "SAVE10", DiscountType::Percentage, dec!(10)).await?;

        let request = PlaceOrderRequest::for_test(vec![(product.id, 4)]).with_coupon("save10");
        let placed = place_order(&db, &test_settings(), request).await?;

        assert_eq!(placed.breakdown.subtotal, dec!(1000));
        assert_eq!(placed.breakdown.discount, dec!(100));
        assert_eq!(placed.breakdown.shipping_cost, dec!(0));
        assert_eq!(placed.breakdown.tax, dec!(162));
        assert_eq!(placed.total, dec!(1062));

        let order = get_order(&db, placed.order_id).await?;
        assert_eq!(order.order.total, dec!(1062));
        assert_eq!(order.order.coupon_code.as_deref(), Some("SAVE10"));
        assert_eq!(order.order.customer_key, "user:tester");

        let coupon = coupon::get_coupon_by_code(&db, "SAVE10").await?.unwrap();
        assert_eq!(coupon.usage_count, 1);
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 4);

        let holds = ledger::holds_for_checkout(&db, &placed.checkout_token).await?;
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].status, HoldStatus::Allocated);
        assert_eq!(holds[0].order_id, Some(placed.order_id));

        // Confirmation, payment and alert recheck wait in the outbox
        assert_eq!(outbox::pending_messages(&db).await?.len(), 3);
        Ok(())
    }

    /// Test settings with enough commit retries to ride out heavy lock contention.
    fn contended_settings() -> Settings {
        let mut settings = test_settings();
        settings.checkout.max_conflict_retries = 20;
        settings
    }

    async fn run_concurrently(
        db: &DatabaseConnection,
        settings: &Settings,
        requests: Vec<PlaceOrderRequest>,
    ) -> Vec<Result<PlacedOrder>> {
        let mut tasks = Vec::new();
        for request in requests {
            let db = db.clone();
            let settings = settings.clone();
            tasks.push(tokio::spawn(async move {
                place_order(&db, &settings, request).await
            }));
        }
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_do_not_oversell() -> Result<()> {
        let shared = setup_shared_test_db(8).await?;
        let db = &shared.db;
        let product = create_test_product(db, "Lamp", 10).await?;

        let requests = (0..8)
            .map(|_| PlaceOrderRequest::for_test(vec![(product.id, 3)]))
            .collect();
        let results = run_concurrently(db, &contended_settings(), requests).await;

        let mut placed = 0;
        for result in results {
            match result {
                Ok(_) => placed += 1,
                Err(Error::InsufficientInventory { requested: 3, .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(placed, 3);
        let product = reload_product(db, product.id).await?;
        assert_eq!(product.reserved_quantity, 9);
        assert!(product.reserved_quantity <= product.inventory);
        assert_eq!(ledger::held_units(db, product.id).await?, 9);
        assert_eq!(count_held_holds(db).await?, 0);
        assert_eq!(order_count(db).await?, 3);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_checkouts_release_holds_under_contention() -> Result<()> {
        let shared = setup_shared_test_db(8).await?;
        let db = &shared.db;
        let plenty = create_test_product(db, "Plenty", 100).await?;
        let scarce = create_test_product(db, "Scarce", 4).await?;

        // Every checkout reserves `plenty` first; the losers must hand it back
        let requests = (0..10)
            .map(|_| PlaceOrderRequest::for_test(vec![(plenty.id, 2), (scarce.id, 1)]))
            .collect();
        let results = run_concurrently(db, &contended_settings(), requests).await;

        let mut placed = 0;
        for result in results {
            match result {
                Ok(_) => placed += 1,
                Err(Error::InsufficientInventory { product_id, .. }) if product_id == scarce.id => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(placed, 4);
        assert_eq!(reload_product(db, plenty.id).await?.reserved_quantity, 8);
        assert_eq!(reload_product(db, scarce.id).await?.reserved_quantity, 4);
        assert_eq!(ledger::held_units(db, plenty.id).await?, 8);
        assert_eq!(count_held_holds(db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_multi_item_checkout_is_all_or_nothing() -> Result<()> {
        let db = setup_test_db().await?;
        let plenty = create_test_product(&db, "Plenty", 5).await?;
        let scarce = create_test_product(&db, "Scarce", 1).await?;

        let request = PlaceOrderRequest::for_test(vec![(plenty.id, 2), (scarce.id, 2)]);
        let result = place_order(&db, &test_settings(), request).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientInventory { product_id, .. }) if product_id == scarce.id
        ));

        assert_eq!(reload_product(&db, plenty.id).await?.reserved_quantity, 0);
        assert_eq!(reload_product(&db, scarce.id).await?.reserved_quantity, 0);
        assert_eq!(order_count(&db).await?, 0);
        assert!(outbox::pending_messages(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_product_rejected_before_reserving() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        let request = PlaceOrderRequest::for_test(vec![(product.id, 1), (404, 1)]);
        let result = place_order(&db, &test_settings(), request).await;

        assert!(matches!(result, Err(Error::ProductNotFound { product_id: 404 })));
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_coupon_releases_stock() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        let now = Utc::now();
        coupon::create_coupon(
            &db,
            coupon::NewCoupon {
                code: "BYGONE".to_string(),
                discount_type: DiscountType::Fixed,
                discount_value: dec!(5),
                min_purchase: None,
                max_discount: None,
                usage_limit: None,
                usage_per_user: None,
                valid_from: now - chrono::Duration::days(10),
                valid_to: now - chrono::Duration::days(1),
            },
        )
        .await?;

        let request = PlaceOrderRequest::for_test(vec![(product.id, 2)]).with_coupon("BYGONE");
        let result = place_order(&db, &test_settings(), request).await;
        assert!(matches!(
            result,
            Err(Error::CouponRejected {
                reason: CouponRejection::Expired,
                ..
            })
        ));
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 0);
        assert_eq!(order_count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_global_coupon_limit_under_concurrency() -> Result<()> {
        let shared = setup_shared_test_db(8).await?;
        let db = &shared.db;
        let product = create_test_product(db, "Lamp", 10).await?;
        limit_coupon(db, "LASTONE", Some(1), None).await?;

        let requests = ["a", "b", "c", "d"]
            .into_iter()
            .map(|user| {
                PlaceOrderRequest::for_test(vec![(product.id, 1)])
                    .as_user(user)
                    .with_coupon("LASTONE")
            })
            .collect();
        let results = run_concurrently(db, &contended_settings(), requests).await;

        let mut placed = 0;
        for result in results {
            match result {
                Ok(_) => placed += 1,
                Err(Error::CouponRejected {
                    reason: CouponRejection::GlobalLimitReached,
                    ..
                }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(placed, 1);
        let coupon = coupon::get_coupon_by_code(db, "LASTONE").await?.unwrap();
        assert_eq!(coupon.usage_count, 1);
        // Only the winner keeps its unit
        assert_eq!(reload_product(db, product.id).await?.reserved_quantity, 1);
        assert_eq!(count_held_holds(db).await?, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_per_user_coupon_limit_under_concurrency() -> Result<()> {
        let shared = setup_shared_test_db(16).await?;
        let db = &shared.db;
        let product = create_test_product(db, "Lamp", 100).await?;
        let coupon = limit_coupon(db, "WELCOME", None, Some(1)).await?;

        let requests = (0..12)
            .map(|_| PlaceOrderRequest::for_test(vec![(product.id, 3)]).with_coupon("WELCOME"))
            .collect();
        let results = run_concurrently(db, &contended_settings(), requests).await;

        let mut placed = 0;
        for result in results {
            match result {
                Ok(_) => placed += 1,
                Err(Error::CouponRejected {
                    reason: CouponRejection::PerUserLimitReached,
                    ..
                }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(placed, 1);
        assert_eq!(coupon::customer_redemptions(db, coupon.id, "user:tester").await?, 1);
        let coupon = coupon::get_coupon_by_code(db, "WELCOME").await?.unwrap();
        assert_eq!(coupon.usage_count, 1);
        // Reserved stock matches the single placed order
        assert_eq!(reload_product(db, product.id).await?.reserved_quantity, 3);
        assert_eq!(count_held_holds(db).await?, 0);
        assert_eq!(order_count(db).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_per_user_coupon_limit() -> Result<()> {
        let (db, product) = setup_with_product(10).await?;
        limit_coupon(&db, "WELCOME", None, Some(1)).await?;
        let settings = test_settings();

        let first = PlaceOrderRequest::for_test(vec![(product.id, 1)]).with_coupon("WELCOME");
        place_order(&db, &settings, first).await?;

        let again = PlaceOrderRequest::for_test(vec![(product.id, 1)]).with_coupon("WELCOME");
        let result = place_order(&db, &settings, again).await;
        assert!(matches!(
            result,
            Err(Error::CouponRejected {
                reason: CouponRejection::PerUserLimitReached,
                ..
            })
        ));

        let other = PlaceOrderRequest::for_test(vec![(product.id, 1)])
            .as_user("someone-else")
            .with_coupon("WELCOME");
        place_order(&db, &settings, other).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_order_prices_are_frozen() -> Result<()> {
        let (db, product) = setup_with_product(10).await?;
        let placed = place_order(
            &db,
            &test_settings(),
            PlaceOrderRequest::for_test(vec![(product.id, 2)]),
        )
        .await?;

        update_product(&db, product.id, product.name.clone(), dec!(99), None).await?;

        let order = get_order(&db, placed.order_id).await?;
        assert_eq!(order.items[0].unit_price, dec!(10));
        assert_eq!(order.items[0].line_total, dec!(20));
        assert_eq!(order.order.total, placed.total);
        Ok(())
    }

    #[tokio::test]
    async fn test_client_price_is_advisory() -> Result<()> {
        let (db, product) = setup_with_product(10).await?;
        let mut request = PlaceOrderRequest::for_test(vec![(product.id, 1)]);
        request.lines[0].client_price = Some(dec!(1));

        let placed = place_order(&db, &test_settings(), request).await?;
        assert_eq!(placed.breakdown.subtotal, dec!(10));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_requests_have_no_side_effects() -> Result<()> {
        let (db, product) = setup_with_product(10).await?;
        let settings = test_settings();

        let empty = PlaceOrderRequest::for_test(vec![]);
        let zero = PlaceOrderRequest::for_test(vec![(product.id, 0)]);
        let huge = PlaceOrderRequest::for_test(vec![(product.id, 600), (product.id, 600)]);
        let mut no_email = PlaceOrderRequest::for_test(vec![(product.id, 1)]);
        no_email.details.email = "not-an-email".to_string();
        let mut no_address = PlaceOrderRequest::for_test(vec![(product.id, 1)]);
        no_address.details.address = "  ".to_string();

        for request in [empty, zero, huge, no_email, no_address] {
            let result = place_order(&db, &settings, request).await;
            assert!(matches!(result, Err(Error::Validation { .. })));
        }
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 0);
        assert_eq!(order_count(&db).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_quantity_limit_spans_variants() -> Result<()> {
        let (db, product) = setup_with_product(5000).await?;
        let mut request = PlaceOrderRequest::for_test(vec![(product.id, 600), (product.id, 600)]);
        request.lines[0].variant_id = Some("red".to_string());
        request.lines[1].variant_id = Some("blue".to_string());

        let result = place_order(&db, &test_settings(), request).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 0);

        let lines = vec![
            CartLine {
                product_id: 1,
                variant_id: Some("a".to_string()),
                quantity: i32::MAX,
                client_price: None,
            },
            CartLine {
                product_id: 1,
                variant_id: Some("b".to_string()),
                quantity: i32::MAX,
                client_price: None,
            },
        ];
        assert_eq!(reservation_plan(&lines).get(&1), Some(&i32::MAX));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_lines_are_merged() -> Result<()> {
        let (db, product) = setup_with_product(10).await?;
        let request = PlaceOrderRequest::for_test(vec![(product.id, 1), (product.id, 2)]);
        let placed = place_order(&db, &test_settings(), request).await?;

        let order = get_order(&db, placed.order_id).await?;
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 3);
        assert_eq!(reload_product(&db, product.id).await?.reserved_quantity, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_guest_customer_key() -> Result<()> {
        let (db, product) = setup_with_product(10).await?;
        let mut request = PlaceOrderRequest::for_test(vec![(product.id, 1)]);
        request.customer = CustomerRef::Guest;
        request.details.email = " Ada@Example.com ".to_string();
        assert_eq!(request.customer_key(), "guest:ada@example.com");

        let placed = place_order(&db, &test_settings(), request).await?;
        let order = get_order(&db, placed.order_id).await?;
        assert_eq!(order.order.customer_id, None);
        assert_eq!(order.order.customer_key, "guest:ada@example.com");
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_hold_cannot_be_allocated() -> Result<()> {
        let (db, product) = setup_with_product(5).await?;
        let taken_at = Utc::now() - chrono::Duration::hours(1);
        ledger::reserve(&db, "slow", product.id, 2, chrono::Duration::minutes(15), taken_at).await?;
        ledger::release_expired_holds(&db, Utc::now()).await?;

        let order = insert_test_order(&db, product.id, "user:slow").await?;
        let txn = db.begin().await?;
        let result = ledger::allocate_holds(&txn, "slow", order.id, 1, Utc::now()).await;
        txn.rollback().await?;
        assert!(matches!(result, Err(Error::Conflict { .. })));
        assert!(result.unwrap_err().is_retryable());
        Ok(())
    }

    #[tokio::test]
    async fn test_preview_coupon() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_coupon(&db, "SAVE10", DiscountType::Percentage, dec!(10)).await?;

        let decision = preview_coupon(&db, "SAVE10", dec!(1000), Some("user:1")).await?;
        assert!(matches!(
            decision,
            CouponDecision::Valid { discount, .. } if discount == dec!(100)
        ));
        assert!(matches!(
            preview_coupon(&db, "SAVE10", dec!(-1), None).await,
            Err(Error::InvalidAmount { .. })
        ));
        // Previewing records nothing
        let coupon = coupon::get_coupon_by_code(&db, "SAVE10").await?.unwrap();
        assert_eq!(coupon.usage_count, 0);
        Ok(())
    }
}
