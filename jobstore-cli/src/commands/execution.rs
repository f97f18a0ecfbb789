//! Execution switch command handlers

use anyhow::{Result, bail};
use clap::Subcommand;
use colored::*;
use jobstore_core::domain::definition::EXECUTION_SEMAPHORE;
use jobstore_service::Store;

use crate::config::Config;

/// Execution subcommands
#[derive(Subcommand)]
pub enum ExecutionCommands {
    /// Show whether execution is enabled
    Status {
        /// Only this job
        #[arg(long)]
        job: Option<String>,
    },
    /// Enable execution for the whole fleet or one job
    Enable {
        #[arg(long)]
        job: Option<String>,
    },
    /// Disable execution for the whole fleet or one job
    Disable {
        #[arg(long)]
        job: Option<String>,
    },
}

/// Handle execution commands
pub async fn handle_execution_command(command: ExecutionCommands, config: &Config) -> Result<()> {
    let store = config.store().await?;

    match command {
        ExecutionCommands::Status { job } => show_status(&store, job.as_deref()).await,
        ExecutionCommands::Enable { job } => set_enabled(&store, job.as_deref(), true).await,
        ExecutionCommands::Disable { job } => set_enabled(&store, job.as_deref(), false).await,
    }
}

async fn show_status(store: &Store, job: Option<&str>) -> Result<()> {
    let fleet_disabled = store.definitions.is_disabled(EXECUTION_SEMAPHORE).await?;
    println!("  All jobs: {}", colorize(!fleet_disabled));

    match job {
        Some(name) => {
            require_known(store, name).await?;
            let disabled = store.definitions.is_disabled(name).await?;
            println!("  {}: {}", name, colorize(!disabled));
        }
        None => {
            for definition in store.definitions.find_all().await? {
                if definition.name == EXECUTION_SEMAPHORE {
                    continue;
                }
                println!("  {}: {}", definition.name, colorize(!definition.disabled));
            }
        }
    }

    Ok(())
}

async fn set_enabled(store: &Store, job: Option<&str>, enabled: bool) -> Result<()> {
    let name = match job {
        Some(name) => {
            require_known(store, name).await?;
            name
        }
        None => EXECUTION_SEMAPHORE,
    };

    store.definitions.set_disabled(name, !enabled).await?;

    let target = job.unwrap_or("all jobs");
    println!(
        "{} Execution of {} {}",
        "✓".green(),
        target.cyan(),
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Rejects names no service instance ever registered
async fn require_known(store: &Store, name: &str) -> Result<()> {
    if store.definitions.find(name).await?.is_none() {
        bail!("Job '{}' has no stored definition", name);
    }
    Ok(())
}

fn colorize(enabled: bool) -> ColoredString {
    if enabled {
        "enabled".green()
    } else {
        "disabled".red()
    }
}
