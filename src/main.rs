use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde::Serialize;
use std::path::PathBuf;
use vms_core::{config, metrics, App};

#[derive(Parser)]
#[command(version, about = "Recording lifecycle and retention workers")]
struct Args {
    /// Config file (.toml or .json); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the capture and clip workers and the periodic jobs (default)
    Serve,
    /// Run one retention pass and exit
    EnforceRetention,
    /// Compare buckets with the database, all tenants unless one is given
    Reconcile {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Remove objects no recording references. Only reports unless --execute is given.
    CleanupOrphans {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        execute: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = config::load_config(args.config.as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();
    info!("Starting vms-core {}", env!("CARGO_PKG_VERSION"));
    debug!("Configuration: {:?}", config);

    let app = App::build(config).await?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&app).await?,
        Command::EnforceRetention => {
            let summary = app
                .retention
                .enforce()
                .await
                .context("Retention enforcement failed")?;
            print_json(&summary)?;
        }
        Command::Reconcile { tenant: Some(tenant) } => {
            let report = app
                .reconciler
                .reconcile_tenant(&tenant)
                .await
                .with_context(|| format!("Reconciliation failed for tenant {}", tenant))?;
            print_json(&report)?;
        }
        Command::Reconcile { tenant: None } => {
            let run = app
                .reconciler
                .reconcile_all()
                .await
                .context("Reconciliation failed")?;
            print_json(&run)?;
        }
        Command::CleanupOrphans { tenant, execute } => {
            if !execute {
                info!("Dry run, pass --execute to delete");
            }
            let summary = app
                .reconciler
                .cleanup_orphans(&tenant, !execute)
                .await
                .with_context(|| format!("Orphan cleanup failed for tenant {}", tenant))?;
            print_json(&summary)?;
        }
    }

    Ok(())
}

async fn serve(app: &App) -> Result<()> {
    let scheduler = app.start().await?;
    info!("Workers and schedulers running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    app.shutdown(scheduler).await;
    debug!("Final metrics:\n{}", metrics::render());
    info!("Shutdown complete");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
