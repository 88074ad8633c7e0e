//! db-resilience - Main entry point.
//!
//! Loads ini-style config files, prints the normalized database options and,
//! with `--check`, connects the primary and replica engines once.

use clap::Parser;
use db_resilience::config::Cli;
use db_resilience::db::{EngineCache, EngineRole};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn check_engines(cache: &EngineCache) -> Result<(), Box<dyn std::error::Error>> {
    for role in [EngineRole::Primary, EngineRole::Replica] {
        let engine = cache.get_engine(role).await?;
        engine.ping().await?;
        info!(
            role = %role,
            backend = %engine.backend(),
            url = %engine.masked_url(),
            "Engine is reachable"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!(
        files = cli.config_files.len(),
        "Starting db-resilience v{}",
        env!("CARGO_PKG_VERSION")
    );

    let options = cli.load_options()?;
    println!("{}", serde_json::to_string_pretty(&options.masked())?);

    if !cli.check {
        return Ok(());
    }

    let cache = EngineCache::new(options)?;
    let result = check_engines(&cache).await;
    cache.cleanup().await;

    if let Err(e) = result {
        error!(error = %e, "Engine check failed");
        return Err(e);
    }

    info!("Engine check complete");
    Ok(())
}
