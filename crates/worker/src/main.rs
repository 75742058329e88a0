//! Revocation worker: the composition root of the denylist engine.
//!
//! Builds the process-scoped components (pool, signer, bus, dispatcher,
//! listener, prune scheduler), wires them together, and runs until ctrl-c.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyway_core::command::CommandBuilder;
use keyway_core::denylist::AlwaysPush;
use keyway_core::signing::{SigningConfig, SigningService};
use keyway_events::dispatch::{DispatchOutbox, HttpGatewayDispatcher};
use keyway_events::listener::AccessRevocationListener;
use keyway_events::{AssignmentEventBus, PruneScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyway_worker=debug,keyway_events=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = keyway_db::create_pool(&database_url).await?;
    keyway_db::health_check(&pool).await?;
    keyway_db::run_migrations(&pool).await?;
    tracing::info!("Database ready");

    // --- Signing service ---
    let signing_config = SigningConfig::from_env();
    let is_production = std::env::var("APP_ENV").as_deref() == Ok("production");
    let signer = match SigningService::from_config(&signing_config) {
        Ok(service) => Arc::new(service),
        Err(e) if !is_production => {
            tracing::warn!(error = %e, "Falling back to an ephemeral signing keypair");
            Arc::new(SigningService::ephemeral()?)
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(kid = %signer.key_id(), "Operator signing key loaded");

    // --- Dispatch pipeline ---
    let cancel = CancellationToken::new();
    let http_dispatcher = Arc::new(HttpGatewayDispatcher::new(pool.clone()));
    let outbox = DispatchOutbox::start(http_dispatcher, cancel.clone());

    // --- Event bus + revocation listener ---
    let bus = Arc::new(AssignmentEventBus::default());
    let listener = Arc::new(AccessRevocationListener::new(
        pool.clone(),
        CommandBuilder::new(Arc::clone(&signer)),
        Arc::new(outbox),
        Arc::new(AlwaysPush),
        signer.route_pass_ttl_hours(),
    ));

    let listener_handle = {
        let listener = Arc::clone(&listener);
        let cancel = cancel.clone();
        let receiver = bus.subscribe();
        tokio::spawn(async move { listener.run(cancel, receiver).await })
    };
    tracing::info!("Access revocation listener started");

    // --- Prune scheduler ---
    let scheduler = PruneScheduler::new(pool.clone());
    scheduler.start();
    tracing::info!("Denylist prune scheduler started");

    // --- Shutdown ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    scheduler.stop();
    cancel.cancel();
    let _ = listener_handle.await;

    Ok(())
}
