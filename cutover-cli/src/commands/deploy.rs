//! Deployment command handlers
//!
//! Rollout status and operator actions on an environment's controller.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use cutover_core::domain::deployment::{RolloutState, RolloutStatus};
use cutover_core::dto::deployment::{DeploymentAction, ServiceCapacity};

use crate::config::Config;

/// Deploy subcommands
#[derive(Subcommand)]
pub enum DeployCommands {
    /// Show the current rollout
    Status {
        /// Environment stage name
        stage: String,
    },
    /// Cancel the in-flight rollout and restore production traffic
    Cancel {
        /// Environment stage name
        stage: String,
    },
    /// Acknowledge a failed rollback
    ClearFault {
        /// Environment stage name
        stage: String,
    },
    /// Show or change the task count of both pools
    Scale {
        /// Environment stage name
        stage: String,
        /// New task count per pool; omit to show the current counts
        count: Option<usize>,
    },
}

/// Handle deploy commands
pub async fn handle_deploy_command(command: DeployCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        DeployCommands::Status { stage } => {
            let status = client.get_deployment(&stage).await?;
            print_rollout(&status);
            Ok(())
        }
        DeployCommands::Cancel { stage } => {
            let action = client.cancel_deployment(&stage).await?;
            report(&action, "Rollout cancelled", "No rollout in flight");
            Ok(())
        }
        DeployCommands::ClearFault { stage } => {
            let action = client.clear_fault(&stage).await?;
            report(&action, "Fault cleared", "Controller was not faulted");
            Ok(())
        }
        DeployCommands::Scale { stage, count } => {
            let capacity = match count {
                Some(count) => {
                    let capacity = client.scale_service(&stage, count).await?;
                    println!("{} Scaled to {} task(s) per pool", "✓".green(), count);
                    println!();
                    capacity
                }
                None => client.get_capacity(&stage).await?,
            };
            print_capacity(&capacity);
            Ok(())
        }
    }
}

/// Print task counts of both pools
fn print_capacity(capacity: &ServiceCapacity) {
    println!("  Service:  {}", capacity.service.dimmed());
    println!("  Desired:  {}", capacity.desired_count);
    println!("  Blue:     {} running", capacity.blue_running);
    println!("  Green:    {} running", capacity.green_running);
}

/// Print the outcome of an operator action
fn report(action: &DeploymentAction, accepted: &str, ignored: &str) {
    if action.accepted {
        println!("{} {}", "✓".green(), accepted);
    } else {
        println!("{}", ignored.yellow());
    }
    println!();
    print_rollout(&action.deployment);
}

/// Print a rollout status
pub(crate) fn print_rollout(status: &RolloutStatus) {
    println!("  Group:    {}", status.group.dimmed());
    println!("  State:    {}", colorize_state(status.state));
    println!("  Active:   {}", status.active.to_string().bold());
    if status.state.is_in_flight() {
        println!("  Shifted:  {}%", status.standby_weight);
    }

    if let Some(image) = &status.active_image {
        println!("  Serving:  {}", image);
    }
    if let Some(image) = &status.in_flight_image {
        println!("  Rolling:  {}", image.to_string().cyan());
    }
    if status.queued > 0 {
        println!("  Queued:   {}", status.queued);
    }
    if let Some(reason) = &status.last_failure {
        println!("  Last failure: {}", reason.to_string().red());
    }
    if let Some(fault) = &status.fault {
        println!("  {} {}", "FAULTED:".red().bold(), fault.red());
    }
}

/// Colorize rollout state for display
fn colorize_state(state: RolloutState) -> ColoredString {
    let state_str = state.to_string();
    match state {
        RolloutState::Idle => state_str.dimmed(),
        RolloutState::ShiftingTraffic | RolloutState::Verifying => state_str.cyan(),
        RolloutState::Completed => state_str.green(),
        RolloutState::RollingBack => state_str.yellow(),
        RolloutState::RolledBack => state_str.red(),
    }
}
