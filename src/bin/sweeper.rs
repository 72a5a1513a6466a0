//! Out-of-band maintenance runner.
//!
//! Meant for cron or a Kubernetes CronJob: each invocation runs one pass and
//! exits, printing the summary as JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use checkout_payments::{
    config::{self, AppConfig},
    db,
    gateways::GatewayRegistry,
    repositories, AppState,
};

#[derive(Parser, Debug)]
#[command(name = "checkout-sweeper", about = "Reconciliation and webhook retry passes")]
struct Cli {
    /// Pretty-print the JSON summary
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask gateways for the status of stale PENDING orders
    Reconcile {
        /// Override the configured batch size (capped by max_batch_size)
        #[arg(long)]
        batch_size: Option<u64>,
    },
    /// Redeliver failed merchant webhooks
    RetryWebhooks,
    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    match cli.command {
        Command::Migrate => {
            let pool = db::establish_connection_from_app_config(&cfg)
                .await
                .context("failed to connect to database")?;
            db::run_migrations(&pool).await?;
            info!("Migrations applied");
        }
        Command::Reconcile { batch_size } => {
            let state = build_state(cfg).await?;
            let summary = state.reconciliation.run(batch_size).await?;
            print_summary(&summary, cli.pretty)?;
        }
        Command::RetryWebhooks => {
            let state = build_state(cfg).await?;
            let summary = state.dispatcher.retry_failed().await?;
            print_summary(&summary, cli.pretty)?;
        }
    }

    Ok(())
}

async fn build_state(cfg: AppConfig) -> Result<AppState> {
    let store = repositories::connect_store(&cfg)
        .await
        .context("failed to open storage")?;
    let gateways = Arc::new(GatewayRegistry::from_config(&cfg)?);
    Ok(AppState::new(Arc::new(cfg), store, gateways)?)
}

fn print_summary<T: Serialize>(summary: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(summary)?
    } else {
        serde_json::to_string(summary)?
    };
    println!("{rendered}");
    Ok(())
}
