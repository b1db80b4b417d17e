//! Bulk-load binary (Core B): reads a JSONL mutation batch from stdin or a
//! file and applies it to an Apache AGE graph.

use std::fs::File;
use std::io::{self, BufReader};

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kartograph::config::Config;
use kartograph::graph::{parse_jsonl, BulkLoadingStrategy};

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

    let operations = match std::env::args().nth(1) {
        Some(path) => parse_jsonl(BufReader::new(File::open(path)?))?,
        None => parse_jsonl(BufReader::new(io::stdin().lock()))?,
    };

    tracing::info!(count = operations.len(), "parsed mutation batch");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let strategy = BulkLoadingStrategy::new(pool, config.graph.graph_name)
        .with_batch_size(config.graph.default_batch_size);

    let result = strategy.apply_batch(operations).await;

    if result.success {
        tracing::info!(operations_applied = result.operations_applied, "batch applied");
        Ok(())
    } else {
        for error in &result.errors {
            tracing::error!(%error, "batch failed");
        }
        Err(format!("bulk load failed: {}", result.errors.join("; ")).into())
    }
}
