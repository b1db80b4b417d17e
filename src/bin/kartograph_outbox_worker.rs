//! Outbox worker binary (Core A): drains the IAM domain-event outbox and
//! applies the translated relationship operations to the policy engine.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kartograph::config::Config;
use kartograph::iam::{CompositeTranslator, GrpcPolicyEngineClient, IamEventTranslator, OutboxWorker};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("KARTOGRAPH_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let mut translator = CompositeTranslator::new();
    translator.register(IamEventTranslator);

    let policy_engine = Arc::new(GrpcPolicyEngineClient::connect(config.policy_engine.endpoint).await?);

    let worker = Arc::new(OutboxWorker::new(
        pool,
        config.database.url,
        translator,
        policy_engine,
        config.outbox.batch_size as i64,
        Duration::from_secs(config.outbox.poll_interval_secs),
        config.outbox.notify_channel,
    ));

    let handle = worker.start();
    tracing::info!("outbox worker started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping outbox worker");
    handle.stop();

    Ok(())
}
