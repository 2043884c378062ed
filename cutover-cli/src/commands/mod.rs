//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod bootstrap;
mod deploy;
mod env;
mod run;

pub use bootstrap::BootstrapCommands;
pub use deploy::DeployCommands;
pub use env::EnvCommands;
pub use run::RunCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Environments
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },
    /// Pipeline runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Blue/green rollouts
    Deploy {
        #[command(subcommand)]
        command: DeployCommands,
    },
    /// Two-phase environment bootstrap
    Bootstrap {
        #[command(subcommand)]
        command: BootstrapCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Env { command } => env::handle_env_command(command, config).await,
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Deploy { command } => deploy::handle_deploy_command(command, config).await,
        Commands::Bootstrap { command } => {
            bootstrap::handle_bootstrap_command(command, config).await
        }
    }
}
