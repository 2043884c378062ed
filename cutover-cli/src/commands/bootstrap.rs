//! Bootstrap command handlers
//!
//! A new environment first runs with the Deploy stage disabled, because the
//! service cannot start before an image exists. Once such a run succeeded,
//! `bootstrap complete` arms the Deploy stage and delivers the image.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use cutover_client::OrchestratorClient;

use crate::commands::env::colorize_phase;
use crate::commands::run::print_run_details;
use crate::config::Config;

/// Bootstrap subcommands
#[derive(Subcommand)]
pub enum BootstrapCommands {
    /// Show the bootstrap phase of an environment
    Status {
        /// Environment stage name
        stage: String,
    },
    /// Arm the Deploy stage and deliver the first image
    Complete {
        /// Environment stage name
        stage: String,

        /// Revision to deliver (defaults to the last succeeded run)
        #[arg(short, long)]
        revision: Option<String>,
    },
}

/// Handle bootstrap commands
pub async fn handle_bootstrap_command(command: BootstrapCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        BootstrapCommands::Status { stage } => {
            let env = client.get_environment(&stage).await?;
            println!("{}: {}", env.stage.bold(), colorize_phase(env.bootstrap));
            Ok(())
        }
        BootstrapCommands::Complete { stage, revision } => {
            complete_bootstrap(&client, &stage, revision).await
        }
    }
}

/// Complete the bootstrap cycle of an environment
async fn complete_bootstrap(
    client: &OrchestratorClient,
    stage: &str,
    revision: Option<String>,
) -> Result<()> {
    let run = client.complete_bootstrap(stage, revision).await?;

    println!("{} Deploy stage armed for {}", "✓".green(), stage.bold());
    println!();
    print_run_details(&run);

    Ok(())
}
