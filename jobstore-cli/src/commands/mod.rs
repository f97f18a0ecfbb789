//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod execution;
mod job;
mod maintenance;

pub use execution::ExecutionCommands;
pub use job::JobCommands;
pub use maintenance::MaintenanceCommands;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use jobstore_service::db;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create or update the job store schema
    Migrate,
    /// Job record inspection
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Fleet-wide and per-job execution switches
    Execution {
        #[command(subcommand)]
        command: ExecutionCommands,
    },
    /// Timeout reaping and record cleanup
    Maintenance {
        #[command(subcommand)]
        command: MaintenanceCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Migrate => migrate(config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Execution { command } => {
            execution::handle_execution_command(command, config).await
        }
        Commands::Maintenance { command } => {
            maintenance::handle_maintenance_command(command, config).await
        }
    }
}

async fn migrate(config: &Config) -> Result<()> {
    let pool = config.pool().await?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    println!("{}", "✓ Job store schema is up to date".green());
    Ok(())
}
