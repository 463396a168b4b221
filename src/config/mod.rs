/// Database configuration and connection management
pub mod database;

/// Pricing, checkout and outbox settings loaded from config.toml
pub mod settings;
