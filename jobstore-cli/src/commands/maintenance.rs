//! Maintenance command handlers
//!
//! Runs the reaper sweeps once or on the configured cadences. Sweeps are leased, so this
//! can run next to service instances doing the same.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use jobstore_service::{JobScheduler, Reaper};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

/// Maintenance subcommands
#[derive(Subcommand)]
pub enum MaintenanceCommands {
    /// Run the timeout sweep and both cleanup sweeps once
    Sweep,
    /// Run the sweeps on their configured cadences until interrupted
    Run,
}

/// Handle maintenance commands
pub async fn handle_maintenance_command(
    command: MaintenanceCommands,
    config: &Config,
) -> Result<()> {
    let store = config.store().await?;
    let engine = jobstore_service::Config::from_env()?;
    let reaper = Reaper::new(&store, &engine);

    match command {
        MaintenanceCommands::Sweep => sweep_once(&reaper).await,
        MaintenanceCommands::Run => {
            let handle = JobScheduler::new(Arc::new(reaper), engine).start();
            info!("Running maintenance sweeps, press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;

            handle.shutdown();
            Ok(())
        }
    }
}

async fn sweep_once(reaper: &Reaper) -> Result<()> {
    report("Timed out", reaper.cleanup_timed_out_jobs().await?);
    report("Deleted old", reaper.cleanup_old_jobs().await?);
    report("Deleted not executed", reaper.cleanup_not_executed_jobs().await?);
    Ok(())
}

fn report(action: &str, count: Option<u64>) {
    match count {
        Some(count) => println!("{} {} job(s): {}", "✓".green(), action, count),
        None => println!(
            "{}",
            format!("⚠ {}: sweep is running on another instance", action).yellow()
        ),
    }
}
