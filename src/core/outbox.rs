//! Transactional outbox - Side effects that must only happen after an order commits.
//!
//! Messages are inserted by the order-commit transaction and drained afterwards by
//! [`drain_once`]. A failed delivery is retried with exponential backoff and marked
//! failed after `outbox.max_attempts`; the order itself is never rolled back or
//! otherwise changed by a delivery failure, apart from recording the payment URL.

use crate::{
    config::settings::OutboxSettings,
    core::{alerts, ledger, retry::BackoffStrategy},
    entities::{
        Order, OutboxMessage, order,
        outbox_message::{self, OutboxKind},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*, sea_query::Expr};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Customer-facing confirmation of a committed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    /// Committed order
    pub order_id: i64,
    /// Recipient name
    pub customer_name: String,
    /// Recipient address
    pub customer_email: String,
    /// Amount charged
    pub total: Decimal,
    /// Number of units bought
    pub item_count: i32,
}

/// Request handed to the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Order being paid for
    pub order_id: i64,
    /// Amount to charge
    pub amount: Decimal,
    /// Payer name
    pub customer_name: String,
    /// Payer email
    pub customer_email: String,
    /// Payer phone
    pub customer_phone: String,
}

/// A side effect waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEvent {
    /// Send the order confirmation
    OrderPlaced(OrderPlaced),
    /// Ask the payment gateway for a redirect URL
    PaymentRequested(PaymentRequest),
    /// Re-evaluate stock alerts for these products
    AlertRecheck {
        /// Products touched by the order
        product_ids: Vec<i64>,
    },
}

#[derive(Serialize, Deserialize)]
struct AlertRecheckPayload {
    product_ids: Vec<i64>,
}

impl OutboxEvent {
    /// Row kind for this event.
    #[must_use]
    pub const fn kind(&self) -> OutboxKind {
        match self {
            Self::OrderPlaced(_) => OutboxKind::OrderPlaced,
            Self::PaymentRequested(_) => OutboxKind::PaymentRequested,
            Self::AlertRecheck { .. } => OutboxKind::AlertRecheck,
        }
    }

    fn to_payload(&self) -> Result<String> {
        let payload = match self {
            Self::OrderPlaced(event) => serde_json::to_string(event)?,
            Self::PaymentRequested(request) => serde_json::to_string(request)?,
            Self::AlertRecheck { product_ids } => serde_json::to_string(&AlertRecheckPayload {
                product_ids: product_ids.clone(),
            })?,
        };
        Ok(payload)
    }

    fn from_message(message: &outbox_message::Model) -> Result<Self> {
        let event = match message.kind {
            OutboxKind::OrderPlaced => Self::OrderPlaced(serde_json::from_str(&message.payload)?),
            OutboxKind::PaymentRequested => {
                Self::PaymentRequested(serde_json::from_str(&message.payload)?)
            }
            OutboxKind::AlertRecheck => {
                let payload: AlertRecheckPayload = serde_json::from_str(&message.payload)?;
                Self::AlertRecheck {
                    product_ids: payload.product_ids,
                }
            }
        };
        Ok(event)
    }
}

/// Sends customer notifications.
pub trait Notifier: Send + Sync {
    /// Delivers the order confirmation.
    fn order_placed(&self, event: &OrderPlaced) -> impl Future<Output = Result<()>> + Send;
}

/// Creates payments with an external provider.
pub trait PaymentGateway: Send + Sync {
    /// Registers a payment and returns the URL the customer is redirected to.
    fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn order_placed(&self, event: &OrderPlaced) -> Result<()> {
        info!(
            order_id = event.order_id,
            email = %event.customer_email,
            total = %event.total,
            "order confirmation sent"
        );
        Ok(())
    }
}

/// Gateway for stores that collect payment out of band: the redirect points at a
/// store-hosted page for the order.
#[derive(Debug, Clone)]
pub struct ManualPaymentGateway {
    base_url: String,
}

impl ManualPaymentGateway {
    /// Creates a gateway redirecting to `<base_url>/<order_id>`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl PaymentGateway for ManualPaymentGateway {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<String> {
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            request.order_id
        ))
    }
}

/// The collaborators the worker delivers to.
#[derive(Debug, Clone)]
pub struct Collaborators<N, P> {
    /// Customer notifications
    pub notifier: N,
    /// Payment provider
    pub payments: P,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Delivered and marked processed
    pub processed: usize,
    /// Failed and rescheduled
    pub retried: usize,
    /// Failed for the last time
    pub failed: usize,
}

/// Inserts `event` into the outbox, due immediately. Meant to run inside the
/// transaction whose commit makes the event true.
///
/// # Errors
/// Returns a serialization or database error.
pub async fn enqueue<C>(db: &C, event: &OutboxEvent, now: DateTime<Utc>) -> Result<i64>
where
    C: ConnectionTrait,
{
    let message = outbox_message::ActiveModel {
        kind: Set(event.kind()),
        payload: Set(event.to_payload()?),
        attempts: Set(0),
        next_attempt_at: Set(now),
        processed_at: Set(None),
        failed_at: Set(None),
        last_error: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(message.id)
}

/// Messages not yet processed or failed, oldest first.
pub async fn pending_messages(db: &DatabaseConnection) -> Result<Vec<outbox_message::Model>> {
    OutboxMessage::find()
        .filter(outbox_message::Column::ProcessedAt.is_null())
        .filter(outbox_message::Column::FailedAt.is_null())
        .order_by_asc(outbox_message::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn dispatch<N, P>(
    db: &DatabaseConnection,
    collaborators: &Collaborators<N, P>,
    event: &OutboxEvent,
    now: DateTime<Utc>,
) -> Result<()>
where
    N: Notifier,
    P: PaymentGateway,
{
    match event {
        OutboxEvent::OrderPlaced(placed) => collaborators.notifier.order_placed(placed).await,
        OutboxEvent::PaymentRequested(request) => {
            let url = collaborators.payments.create_payment(request).await?;
            // Only the payment URL is written back; status stays with the order lifecycle.
            Order::update_many()
                .col_expr(order::Column::PaymentUrl, Expr::value(Some(url)))
                .col_expr(order::Column::UpdatedAt, Expr::value(now))
                .filter(order::Column::Id.eq(request.order_id))
                .exec(db)
                .await?;
            Ok(())
        }
        OutboxEvent::AlertRecheck { product_ids } => {
            alerts::recheck_products(db, product_ids, now).await?;
            Ok(())
        }
    }
}

async fn mark_processed(db: &DatabaseConnection, id: i64, now: DateTime<Utc>) -> Result<()> {
    OutboxMessage::update_many()
        .col_expr(outbox_message::Column::ProcessedAt, Expr::value(Some(now)))
        .filter(outbox_message::Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

/// Records a failed delivery. Returns true if the message will not be tried again.
async fn record_failure(
    db: &DatabaseConnection,
    message: &outbox_message::Model,
    err: &Error,
    permanent: bool,
    settings: &OutboxSettings,
    now: DateTime<Utc>,
) -> Result<bool> {
    let attempts = message.attempts + 1;
    let exhausted =
        permanent || u32::try_from(attempts).unwrap_or(u32::MAX) >= settings.max_attempts;

    let mut active: outbox_message::ActiveModel = message.clone().into();
    active.attempts = Set(attempts);
    active.last_error = Set(Some(err.to_string()));
    if exhausted {
        active.failed_at = Set(Some(now));
    } else {
        let backoff = BackoffStrategy::Exponential {
            base: Duration::from_millis(settings.backoff_base_ms),
            max: Duration::from_millis(settings.backoff_max_ms),
        };
        let delay = backoff.delay_for_attempt(u32::try_from(message.attempts).unwrap_or(0));
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
        active.next_attempt_at = Set(now + delay);
    }
    active.update(db).await?;
    Ok(exhausted)
}

/// Delivers every due message once.
///
/// # Errors
/// Returns a database error if the outbox itself cannot be read or updated; delivery
/// failures are recorded on the message instead.
#[instrument(skip_all)]
pub async fn drain_once<N, P>(
    db: &DatabaseConnection,
    collaborators: &Collaborators<N, P>,
    settings: &OutboxSettings,
    now: DateTime<Utc>,
) -> Result<DrainReport>
where
    N: Notifier,
    P: PaymentGateway,
{
    let due = OutboxMessage::find()
        .filter(outbox_message::Column::ProcessedAt.is_null())
        .filter(outbox_message::Column::FailedAt.is_null())
        .filter(outbox_message::Column::NextAttemptAt.lte(now))
        .order_by_asc(outbox_message::Column::Id)
        .limit(settings.batch_size)
        .all(db)
        .await?;

    let mut report = DrainReport::default();
    for message in &due {
        let outcome = match OutboxEvent::from_message(message) {
            Ok(event) => dispatch(db, collaborators, &event, now)
                .await
                .map_err(|err| (err, false)),
            // An unreadable payload will not become readable on retry
            Err(err) => Err((err, true)),
        };

        match outcome {
            Ok(()) => {
                mark_processed(db, message.id, now).await?;
                debug!(id = message.id, kind = ?message.kind, "outbox message delivered");
                report.processed += 1;
            }
            Err((err, permanent)) => {
                if record_failure(db, message, &err, permanent, settings, now).await? {
                    error!(id = message.id, kind = ?message.kind, error = %err, "outbox message failed permanently");
                    report.failed += 1;
                } else {
                    warn!(id = message.id, kind = ?message.kind, error = %err, "outbox delivery failed, will retry");
                    report.retried += 1;
                }
            }
        }
    }
    Ok(report)
}

/// Releases expired stock holds and re-evaluates alerts for the affected products.
///
/// # Errors
/// Returns a database error from the sweep or the recheck.
pub async fn sweep_expired_holds(db: &DatabaseConnection, now: DateTime<Utc>) -> Result<usize> {
    let released = ledger::release_expired_holds(db, now).await?;
    if !released.is_empty() {
        alerts::recheck_products(db, &released, now).await?;
    }
    Ok(released.len())
}

/// Runs the outbox drain and the hold sweeper until `shutdown` flips to true.
pub async fn run_worker<N, P>(
    db: DatabaseConnection,
    collaborators: Collaborators<N, P>,
    settings: OutboxSettings,
    mut shutdown: watch::Receiver<bool>,
) where
    N: Notifier,
    P: PaymentGateway,
{
    let mut drain_tick = tokio::time::interval(settings.poll_interval());
    let mut sweep_tick = tokio::time::interval(settings.sweep_interval());
    info!("outbox worker started");

    loop {
        tokio::select! {
            _ = drain_tick.tick() => {
                match drain_once(&db, &collaborators, &settings, Utc::now()).await {
                    Ok(report) if report != DrainReport::default() => info!(?report, "outbox drained"),
                    Ok(_) => {}
                    Err(e) => error!("outbox drain failed: {e}"),
                }
            }
            _ = sweep_tick.tick() => {
                match sweep_expired_holds(&db, Utc::now()).await {
                    Ok(0) => {}
                    Ok(released) => info!(released, "expired stock holds swept"),
                    Err(e) => error!("hold sweep failed: {e}"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("outbox worker stopped");
}
