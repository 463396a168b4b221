//! Engine settings loaded from `config.toml`.
//!
//! Settings are read once at startup and passed explicitly into the operations that
//! need them; nothing in `core` reads ambient configuration. Every section and field
//! has a default so a partial file is valid.

use crate::errors::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Inputs of the pricing pipeline
    pub pricing: PricingSettings,
    /// Checkout orchestration knobs
    pub checkout: CheckoutSettings,
    /// Outbox worker and hold sweeper knobs
    pub outbox: OutboxSettings,
}

/// Store-wide pricing inputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PricingSettings {
    /// Tax rate applied to the discounted subtotal, in percent
    pub tax_rate_percent: Decimal,
    /// Shipping charged below the free-shipping threshold
    pub flat_shipping_cost: Decimal,
    /// Discounted subtotal at or above which shipping is free
    pub free_shipping_threshold: Decimal,
    /// Symbol used when rendering amounts
    pub currency_symbol: String,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            tax_rate_percent: Decimal::ZERO,
            flat_shipping_cost: Decimal::ZERO,
            free_shipping_threshold: Decimal::ZERO,
            currency_symbol: "$".to_string(),
        }
    }
}

/// Longest accepted stock hold lifetime: one day.
pub const MAX_HOLD_TTL_SECS: u64 = 86_400;

/// Checkout orchestration settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CheckoutSettings {
    /// How long an uncommitted stock hold survives before the sweeper releases it
    pub hold_ttl_secs: u64,
    /// Attempts for the order commit when it hits a transient conflict
    pub max_conflict_retries: u32,
    /// Base delay between conflict retries
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single line quantity
    pub max_line_quantity: i32,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            hold_ttl_secs: 900,
            max_conflict_retries: 3,
            retry_base_delay_ms: 25,
            max_line_quantity: 1000,
        }
    }
}

impl CheckoutSettings {
    /// Hold lifetime as a `chrono` duration, capped at [`MAX_HOLD_TTL_SECS`].
    #[must_use]
    pub fn hold_ttl(&self) -> chrono::Duration {
        let secs = self.hold_ttl_secs.clamp(1, MAX_HOLD_TTL_SECS);
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(|| chrono::Duration::days(1))
    }
}

/// Outbox worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    /// Idle wait between drain passes
    pub poll_interval_ms: u64,
    /// Messages handled per drain pass
    pub batch_size: u64,
    /// Attempts before a message is marked failed
    pub max_attempts: u32,
    /// First retry delay
    pub backoff_base_ms: u64,
    /// Retry delay ceiling
    pub backoff_max_ms: u64,
    /// Interval between expired-hold sweeps
    pub sweep_interval_secs: u64,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 50,
            max_attempts: 8,
            backoff_base_ms: 500,
            backoff_max_ms: 60_000,
            sweep_interval_secs: 60,
        }
    }
}

impl OutboxSettings {
    /// Idle wait between drain passes.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Interval between expired-hold sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Settings {
    /// Checks cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns `Error::Config` if a rate or amount is negative, a retry count is zero, or
    /// the hold lifetime is outside `1..=MAX_HOLD_TTL_SECS`.
    pub fn validate(&self) -> Result<()> {
        let pricing = &self.pricing;
        if pricing.tax_rate_percent.is_sign_negative()
            || pricing.flat_shipping_cost.is_sign_negative()
            || pricing.free_shipping_threshold.is_sign_negative()
        {
            return Err(Error::Config {
                message: "pricing amounts must not be negative".to_string(),
            });
        }
        if self.checkout.max_conflict_retries == 0 {
            return Err(Error::Config {
                message: "checkout.max_conflict_retries must be at least 1".to_string(),
            });
        }
        if self.checkout.hold_ttl_secs == 0 || self.checkout.hold_ttl_secs > MAX_HOLD_TTL_SECS {
            return Err(Error::Config {
                message: format!(
                    "checkout.hold_ttl_secs must be between 1 and {MAX_HOLD_TTL_SECS}"
                ),
            });
        }
        if self.checkout.max_line_quantity <= 0 {
            return Err(Error::Config {
                message: "checkout.max_line_quantity must be positive".to_string(),
            });
        }
        if self.outbox.max_attempts == 0 {
            return Err(Error::Config {
                message: "outbox.max_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Parses and validates settings from TOML text.
///
/// # Errors
/// Returns `Error::Config` if the TOML is invalid or fails validation.
pub fn parse_settings(contents: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A value fails validation
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;
    parse_settings(&contents)
}

/// Loads settings from `CONFIG_PATH`, or `./config.toml` when unset. A missing default
/// file yields default settings.
///
/// # Errors
/// Returns an error if an existing file cannot be read or parsed.
pub fn load_default_settings() -> Result<Settings> {
    if let Ok(path) = std::env::var("CONFIG_PATH") {
        return load_settings(path);
    }
    if Path::new("config.toml").exists() {
        load_settings("config.toml")
    } else {
        tracing::warn!("config.toml not found, using default settings");
        Ok(Settings::default())
    }
}
