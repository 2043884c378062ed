//! Environment command handlers
//!
//! Lists environments and shows their pipeline and rollout state.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use cutover_client::OrchestratorClient;
use cutover_core::domain::environment::BootstrapPhase;
use cutover_core::dto::environment::EnvironmentSummary;

use crate::commands::deploy::print_rollout;
use crate::config::Config;

/// Environment subcommands
#[derive(Subcommand)]
pub enum EnvCommands {
    /// List all environments
    List,
    /// Get environment details
    Get {
        /// Environment stage name
        stage: String,
    },
}

/// Handle environment commands
pub async fn handle_env_command(command: EnvCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        EnvCommands::List => list_environments(&client).await,
        EnvCommands::Get { stage } => get_environment(&client, &stage).await,
    }
}

/// List all environments
async fn list_environments(client: &OrchestratorClient) -> Result<()> {
    let environments = client.list_environments().await?;

    if environments.is_empty() {
        println!("{}", "No environments configured.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} environment(s):", environments.len()).bold()
        );
        println!();
        for env in environments {
            println!("  {} {}", "▸".cyan(), env.stage.bold());
            println!("    Pipeline:  {}", env.pipeline_name.dimmed());
            println!("    Bootstrap: {}", colorize_phase(env.bootstrap));
            println!(
                "    Rollout:   {} ({} active)",
                env.deployment.state, env.deployment.active
            );
            println!();
        }
    }

    Ok(())
}

/// Get and display a single environment
async fn get_environment(client: &OrchestratorClient, stage: &str) -> Result<()> {
    let env = client.get_environment(stage).await?;
    print_environment_details(&env);
    Ok(())
}

/// Print detailed environment information
fn print_environment_details(env: &EnvironmentSummary) {
    println!("{}", "Environment Details:".bold());
    println!("  Stage:     {}", env.stage.cyan());
    println!("  Account:   {}", env.account);
    println!("  Region:    {}", env.region);
    println!("  Prefix:    {}", env.resource_prefix.dimmed());
    println!("  Pipeline:  {}", env.pipeline_name);
    println!("  Bootstrap: {}", colorize_phase(env.bootstrap));

    println!("\n{}", "Deployment:".bold());
    print_rollout(&env.deployment);
}

/// Colorize bootstrap phase for display
pub(crate) fn colorize_phase(phase: BootstrapPhase) -> ColoredString {
    match phase {
        BootstrapPhase::Initial => "initial (deploy disabled)".yellow(),
        BootstrapPhase::Complete => "complete".green(),
    }
}
