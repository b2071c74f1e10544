//! # Steward - connection controller
//!
//! ## Initialization Sequence
//!
//! 1. **Tracing** - `RUST_LOG`-driven subscriber
//! 2. **Configuration** - TOML file, or defaults with the connection finalizer
//! 3. **Controller** - scheme, store, table, reconciler and work loop
//! 4. **Workers** - run until Ctrl+C (`run`) or until the walkthrough ends (`demo`)
//!
//! ## Shutdown
//!
//! Stopping the loop cancels in-flight passes, drains the queue and joins
//! every worker before the process exits.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use steward::cli::{Cli, Commands};
use steward::{
    CONNECTION_FINALIZER, Connection, ConnectionController, ConnectionRow, ConnectionSpec,
};
use steward_core::Uid;
use steward_reconciler::{LoopConfig, ReconcilerConfig, StewardConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { declarations } => run(&config, declarations.as_deref()).await,
        Commands::Demo { timeout_secs } => demo(&config, Duration::from_secs(timeout_secs)).await,
        Commands::CheckConfig => {
            let rendered =
                serde_json::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>) -> Result<StewardConfig> {
    match path {
        Some(path) => StewardConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(StewardConfig {
            reconciler: ReconcilerConfig::new(CONNECTION_FINALIZER)?,
            work_loop: LoopConfig::default(),
        }),
    }
}

fn read_declarations(path: &Path) -> Result<Vec<ConnectionSpec>> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read declarations from {}", path.display()))?;
    serde_json::from_str(&input)
        .with_context(|| format!("Invalid declarations in {}", path.display()))
}

async fn run(config: &StewardConfig, declarations: Option<&Path>) -> Result<()> {
    let controller = ConnectionController::new(config).context("Controller setup failed")?;

    let specs = declarations.map(read_declarations).transpose()?.unwrap_or_default();
    for spec in specs {
        let mut connection = Connection::new(spec.name.clone(), spec.url.clone());
        connection.spec = spec;
        controller.apply(connection).await;
    }

    let handle = controller.start().await;
    info!("Steward is running. Press Ctrl+C to stop.");
    wait_for_shutdown().await;

    controller.stop();
    handle.await.context("Reconciliation loop panicked")?;
    log_rows(&controller.table().rows().await);
    info!("Steward stopped gracefully");
    Ok(())
}

async fn demo(config: &StewardConfig, timeout: Duration) -> Result<()> {
    let controller = ConnectionController::new(config).context("Controller setup failed")?;
    let handle = controller.start().await;

    // A row left behind by an earlier "analytics" declaration.
    controller
        .table()
        .seed(ConnectionRow {
            id: Uid::generate(),
            name: "analytics".to_owned(),
            url: "postgres://old-analytics.internal".to_owned(),
            username: None,
        })
        .await;

    info!("step 1: declare connections");
    let warehouse = controller
        .apply(Connection::new("warehouse", "postgres://warehouse.internal").with_username("etl"))
        .await;
    let analytics = controller
        .apply(Connection::new("analytics", "postgres://analytics.internal"))
        .await;
    settle(&controller, timeout).await?;
    log_rows(&controller.table().rows().await);

    info!("step 2: update a connection");
    let mut updated = controller
        .store()
        .get(&warehouse)
        .await
        .context("warehouse declaration disappeared")?;
    updated.spec.url = "postgres://warehouse-replica.internal".to_owned();
    controller.apply(updated).await;
    settle(&controller, timeout).await?;

    info!("step 3: delete a connection");
    controller.delete(&analytics).await;
    settle(&controller, timeout).await?;
    if controller.store().contains(&analytics).await {
        bail!("analytics declaration was not released");
    }
    log_rows(&controller.table().rows().await);

    controller.stop();
    handle.await.context("Reconciliation loop panicked")?;
    info!("demo finished");
    Ok(())
}

async fn settle(controller: &ConnectionController, timeout: Duration) -> Result<()> {
    if controller.wait_until_settled(timeout).await {
        return Ok(());
    }
    controller.stop();
    bail!("controller did not settle within {timeout:?}")
}

fn log_rows(rows: &[ConnectionRow]) {
    info!(count = rows.len(), "connection table");
    for row in rows {
        info!(id = %row.id, name = %row.name, url = %row.url, "row");
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
