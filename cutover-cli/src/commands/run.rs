//! Run command handlers
//!
//! Handles triggering, listing and inspecting pipeline runs.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use cutover_client::OrchestratorClient;
use cutover_core::domain::run::{PipelineRun, RunStatus, StageStatus};
use std::time::Duration;

use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;

/// Interval between status polls while waiting on a run
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Start a run of a source revision
    Trigger {
        /// Environment stage name
        stage: String,

        /// Source revision to deliver
        revision: String,

        /// Wait until the run finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// List runs of an environment
    List {
        /// Environment stage name
        stage: String,
    },
    /// Get run details
    Get {
        /// Environment stage name
        stage: String,

        /// Run ID or unambiguous prefix
        id: String,
    },
}

/// Handle run commands
pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunCommands::Trigger {
            stage,
            revision,
            wait,
        } => trigger_run(&client, &stage, &revision, wait).await,
        RunCommands::List { stage } => list_runs(&client, &stage).await,
        RunCommands::Get { stage, id } => get_run(&client, &stage, &id).await,
    }
}

/// Start a run and optionally follow it to completion
async fn trigger_run(
    client: &OrchestratorClient,
    stage: &str,
    revision: &str,
    wait: bool,
) -> Result<()> {
    let mut run = client.trigger_run(stage, revision).await?;

    println!(
        "{} Run {} started for {} in {}",
        "✓".green(),
        run.id.to_string().cyan(),
        revision.bold(),
        stage
    );

    if !wait {
        return Ok(());
    }

    let mut last = run.status;
    println!("  Status: {}", colorize_status(last));
    while !run.status.is_terminal() {
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        run = client.get_run(stage, run.id).await?;
        if run.status != last {
            last = run.status;
            println!("  Status: {}", colorize_status(last));
        }
    }

    println!();
    print_run_details(&run);

    if run.status == RunStatus::Failed {
        anyhow::bail!("run {} failed", run.id);
    }
    Ok(())
}

/// List runs of an environment
async fn list_runs(client: &OrchestratorClient, stage: &str) -> Result<()> {
    let runs = client.list_runs(stage).await?;

    if runs.is_empty() {
        println!("{}", format!("No runs found for {}.", stage).yellow());
    } else {
        println!(
            "{}",
            format!("Found {} run(s) for {}:", runs.len(), stage).bold()
        );
        println!();
        for run in runs {
            println!("  {} Run {}", "▸".cyan(), run.id.to_string().dimmed());
            println!("    Revision: {}", run.revision);
            println!("    Status:   {}", colorize_status(run.status));
            if !run.deploy_enabled {
                println!("    Deploy:   {}", "disabled".yellow());
            }
            if let Some(stage) = run.failed_stage {
                println!("    Failed:   {}", stage.to_string().red());
            }
            println!(
                "    Created:  {}",
                run.requested_at
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
                    .dimmed()
            );
            println!();
        }
    }

    Ok(())
}

/// Get and display a single run
async fn get_run(client: &OrchestratorClient, stage: &str, id: &str) -> Result<()> {
    let id_or_prefix = IdOrPrefix::parse(id);
    let uuid = resolve_run_id(client, stage, &id_or_prefix).await?;

    let run = client.get_run(stage, uuid).await?;

    print_run_details(&run);

    Ok(())
}

/// Print detailed run information
pub(crate) fn print_run_details(run: &PipelineRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:          {}", run.id.to_string().cyan());
    println!("  Environment: {}", run.environment);
    println!("  Revision:    {}", run.revision);
    println!("  Status:      {}", colorize_status(run.status));
    println!(
        "  Deploy:      {}",
        if run.deploy_enabled {
            "enabled".green()
        } else {
            "disabled".yellow()
        }
    );
    println!(
        "  Requested:   {}",
        run.requested_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(completed) = run.completed_at {
        println!("  Completed:   {}", completed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = run.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    if !run.stages.is_empty() {
        println!("\n{}", "Stages:".bold());
        for record in &run.stages {
            let status = match record.status {
                StageStatus::Running => "running".cyan(),
                StageStatus::Succeeded => "succeeded".green(),
                StageStatus::Failed => "failed".red(),
                StageStatus::Skipped => "skipped".dimmed(),
            };
            let name = record.stage.to_string();
            match &record.message {
                Some(message) => println!("  {:<7} {} {}", name, status, message.dimmed()),
                None => println!("  {:<7} {}", name, status),
            }
        }
    }

    if !run.artifacts.is_empty() {
        println!("\n{}", "Artifacts:".bold());
        for artifact in &run.artifacts {
            println!("  {} {}", artifact.name.cyan(), artifact.description);
        }
    }

    if let Some(failure) = &run.failure {
        println!("\n{}", "Failure:".bold());
        println!("  Stage:   {}", failure.stage);
        println!("  Message: {}", failure.message.red());
        if failure.fatal {
            println!(
                "  {}",
                "Operator action required: the deployment controller is faulted".red()
            );
        }
    }
}

/// Colorize run status for display
fn colorize_status(status: RunStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Pending => status_str.yellow(),
        RunStatus::Building | RunStatus::Deploying => status_str.cyan(),
        RunStatus::Succeeded => status_str.green(),
        RunStatus::Failed => status_str.red(),
    }
}
