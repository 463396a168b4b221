use dotenvy::dotenv;
use std::env;
use storefront_engine::{
    bot,
    config::{database, settings},
    core::outbox::{self, Collaborators, LogNotifier, ManualPaymentGateway},
    errors::Result,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PAYMENT_REDIRECT_BASE: &str = "http://localhost:8080/pay";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load engine settings
    let settings = settings::load_default_settings()
        .inspect_err(|e| error!("Critical error loading configuration: {}", e))?;
    info!("Successfully processed application configuration.");

    // 4. Connect and make sure the schema exists
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Outbox worker and hold sweeper
    let payment_base = env::var("PAYMENT_REDIRECT_BASE_URL")
        .unwrap_or_else(|_| DEFAULT_PAYMENT_REDIRECT_BASE.to_string());
    let collaborators = Collaborators {
        notifier: LogNotifier,
        payments: ManualPaymentGateway::new(payment_base),
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(outbox::run_worker(
        db.clone(),
        collaborators,
        settings.outbox.clone(),
        shutdown_rx,
    ));

    // 6. Run the bot if a token is configured, otherwise serve the worker until Ctrl-C
    match env::var("DISCORD_BOT_TOKEN") {
        Ok(token) => {
            if let Err(e) = bot::run_bot(token, db, settings).await {
                error!("Bot stopped with an error: {}", e);
            }
        }
        Err(_) => {
            warn!("DISCORD_BOT_TOKEN not set, running the outbox worker only");
            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        error!("Outbox worker panicked: {}", e);
    }
    Ok(())
}
