//! Conductor CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Conductor CI configuration CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a build configuration and list the targets a branch runs
    Validate {
        /// Path to the configuration file
        #[arg(default_value = conductor_config::DEFAULT_CONFIG_PATH)]
        path: PathBuf,
        /// Branch to select targets for
        #[arg(long, default_value = "main")]
        branch: String,
        /// System configuration supplying legacy builders
        #[arg(long, requires = "repo")]
        system: Option<PathBuf>,
        /// Repository whose legacy builders are included (owner/name)
        #[arg(long, requires = "system")]
        repo: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            path,
            branch,
            system,
            repo,
        } => {
            let legacy = match (system, repo) {
                (Some(system), Some(repo)) => commands::legacy_builders(&system, &repo)?,
                _ => commands::LegacyBuilders::default(),
            };
            commands::validate(&path, &branch, &legacy)?;
        }
    }

    Ok(())
}
