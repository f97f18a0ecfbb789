//! Job command handlers
//!
//! Listing, inspecting, aborting and deleting job records.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use jobstore_core::domain::job::{JobInfo, ResultCode, RunningState};
use jobstore_service::Store;

use crate::config::Config;
use crate::id_resolver::resolve_job_id;
use crate::types::IdOrPrefix;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List the most recent job records
    List {
        /// Only records of this job
        #[arg(long)]
        name: Option<String>,

        /// Maximum number of records
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Get job record details
    Get {
        /// Job record ID or unambiguous prefix
        id: String,
    },
    /// Get the log lines of a job record
    Logs {
        /// Job record ID or unambiguous prefix
        id: String,
    },
    /// Request abort of a running job
    Abort {
        /// Job record ID or unambiguous prefix
        id: String,
    },
    /// Delete a finished job record
    Delete {
        /// Job record ID or unambiguous prefix
        id: String,
    },
    /// List the names of all jobs with records or definitions
    Names,
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let store = config.store().await?;

    match command {
        JobCommands::List { name, limit } => list_jobs(&store, name.as_deref(), limit).await,
        JobCommands::Get { id } => get_job(&store, &id).await,
        JobCommands::Logs { id } => get_job_logs(&store, &id).await,
        JobCommands::Abort { id } => abort_job(&store, &id).await,
        JobCommands::Delete { id } => delete_job(&store, &id).await,
        JobCommands::Names => list_names(&store).await,
    }
}

async fn list_jobs(store: &Store, name: Option<&str>, limit: i64) -> Result<()> {
    let jobs = match name {
        Some(name) => store.jobs.find_by_name(name, limit).await?,
        None => store.jobs.list_recent(limit).await?,
    };

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

async fn get_job(store: &Store, id: &str) -> Result<()> {
    let job = find_job(store, id).await?;
    print_job_details(&job);
    Ok(())
}

async fn get_job_logs(store: &Store, id: &str) -> Result<()> {
    let job = find_job(store, id).await?;

    if job.log_lines.is_empty() {
        println!("{}", "No logs found for this job.".yellow());
    } else {
        println!("{}", format!("Logs for job {} ({}):", job.name, job.id).bold());
        println!("{}", "─".repeat(80).dimmed());
        for line in &job.log_lines {
            println!(
                "{} {}",
                line.timestamp.format("%H:%M:%S").to_string().dimmed(),
                line.line
            );
        }
        println!("{}", "─".repeat(80).dimmed());
    }

    Ok(())
}

async fn abort_job(store: &Store, id: &str) -> Result<()> {
    let job = find_job(store, id).await?;

    if store.jobs.abort_job(job.id).await? {
        println!(
            "{} Abort requested for job {} ({})",
            "✓".green(),
            job.name.cyan(),
            job.id
        );
        println!(
            "{}",
            "  The executing host stops the job at its next abort check.".dimmed()
        );
    } else {
        println!(
            "{}",
            format!("Job {} ({}) is not running.", job.name, job.id).yellow()
        );
    }

    Ok(())
}

async fn delete_job(store: &Store, id: &str) -> Result<()> {
    let job = find_job(store, id).await?;

    if job.running_state != RunningState::Finished {
        anyhow::bail!(
            "Job {} ({}) is {:?}; only finished records can be deleted",
            job.name,
            job.id,
            job.running_state
        );
    }

    if store.jobs.remove(job.id).await? {
        println!("{} Deleted job {} ({})", "✓".green(), job.name.cyan(), job.id);
    } else {
        println!("{}", format!("Job {} was already deleted.", job.id).yellow());
    }

    Ok(())
}

async fn list_names(store: &Store) -> Result<()> {
    let mut names = store.jobs.distinct_job_names().await?;
    let definitions = store.definitions.find_all().await?;
    for definition in &definitions {
        if !names.contains(&definition.name) {
            names.push(definition.name.clone());
        }
    }
    names.sort();

    if names.is_empty() {
        println!("{}", "No jobs known.".yellow());
        return Ok(());
    }

    for name in names {
        let disabled = definitions
            .iter()
            .any(|definition| definition.name == name && definition.disabled);
        if disabled {
            println!("  {} {} {}", "▸".cyan(), name, "(disabled)".red());
        } else {
            println!("  {} {}", "▸".cyan(), name);
        }
    }

    Ok(())
}

async fn find_job(store: &Store, id: &str) -> Result<JobInfo> {
    let id_or_prefix = IdOrPrefix::parse(id);
    let uuid = resolve_job_id(store, &id_or_prefix).await?;

    store
        .jobs
        .find_by_id(uuid)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Job {} not found", uuid))
}

fn print_job_summary(job: &JobInfo) {
    println!("  {} {} {}", "▸".cyan(), job.name.bold(), job.id.to_string().dimmed());
    println!("    State:    {}", colorize_state(job));
    println!(
        "    Created:  {}",
        job.creation_time
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!("    Host:     {}", job.host.dimmed());
    println!();
}

fn print_job_details(job: &JobInfo) {
    println!("{}", "Job Details:".bold());
    println!("  ID:            {}", job.id.to_string().cyan());
    println!("  Name:          {}", job.name);
    println!("  State:         {}", colorize_state(job));
    println!("  Priority:      {:?}", job.execution_priority);
    println!("  Host:          {} ({})", job.host, job.thread);
    println!(
        "  Created:       {}",
        job.creation_time.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = job.start_time {
        println!("  Started:       {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(finished) = job.finish_time {
        println!("  Finished:      {}", finished.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.start_time {
            let duration = finished.signed_duration_since(started);
            println!("  Duration:      {}s", duration.num_seconds());
        }
    } else if job.running_state == RunningState::Running {
        match job.expires_at() {
            Some(expires_at) => {
                println!("  Expires:       {}", expires_at.format("%Y-%m-%d %H:%M:%S"))
            }
            None => println!("  Expires:       never"),
        }
    }

    if job.aborted {
        println!("  Aborted:       {}", "yes".red());
    }

    if let Some(status) = &job.status_message {
        println!("  Status:        {}", status);
    }

    if !job.parameters.is_empty() {
        println!("\n{}", "Parameters:".bold());
        for (key, value) in &job.parameters {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if !job.additional_data.is_empty() {
        println!("\n{}", "Additional Data:".bold());
        for (key, value) in &job.additional_data {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if let Some(message) = &job.result_message {
        println!("\n{}", "Result:".bold());
        println!("{}", message);
    }

    if let Some(error) = &job.error_message {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

fn colorize_state(job: &JobInfo) -> ColoredString {
    match (job.running_state, job.result_code) {
        (RunningState::Queued, _) => "QUEUED".yellow(),
        (RunningState::Running, _) => "RUNNING".cyan(),
        (RunningState::Finished, Some(ResultCode::Successful)) => "SUCCESSFUL".green(),
        (RunningState::Finished, Some(ResultCode::Failed)) => "FAILED".red(),
        (RunningState::Finished, Some(ResultCode::TimedOut)) => "TIMED_OUT".red(),
        (RunningState::Finished, Some(ResultCode::Aborted)) => "ABORTED".magenta(),
        (RunningState::Finished, Some(ResultCode::NotExecuted)) => "NOT_EXECUTED".dimmed(),
        (RunningState::Finished, None) => "FINISHED".dimmed(),
    }
}
