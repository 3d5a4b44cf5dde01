//! ArangoDB Gateway CLI
//!
//! Connects to ArangoDB, registers the configured collections and follows the
//! change feed until interrupted. With `--query` it runs one AQL query instead
//! and prints the rows.

use arango_gateway::{BasicCollectionFactory, Gateway};
use arango_gateway_core::prelude::*;
use clap::Parser;
use serde_json::{Map, Value};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "arango-gateway")]
#[command(about = "ArangoDB gateway with change-feed listener")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "ARANGO_GATEWAY_CONFIG")]
    config: Option<String>,

    /// Log level (overrides observability.log_level)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Run one AQL query, print the rows and exit
    #[arg(long)]
    query: Option<String>,

    /// Bind variables for --query as a JSON object
    #[arg(long, default_value = "{}", requires = "query")]
    bind_vars: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = GatewayConfig::load(args.config.as_deref())?;

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting arango-gateway");

    let gateway = Gateway::new(config, &BasicCollectionFactory)?;

    if let Some(query) = args.query {
        let bind_vars: Map<String, Value> = serde_json::from_str(&args.bind_vars)?;
        let rows = gateway.query(&query, bind_vars).await?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    gateway.start().await?;
    info!(
        collections = ?gateway.collections().collection_names(),
        "Gateway listening for changes"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to wait for shutdown signal");
    }
    info!("Shutdown signal received");

    gateway.stop().await?;
    info!("Gateway stopped gracefully");
    Ok(())
}
