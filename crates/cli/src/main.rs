//! capstan: a Kubernetes release manager.

mod cmd;
mod output;
mod state;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// capstan - deploy, roll back and uninstall chart releases
#[derive(Parser)]
#[command(name = "capstan")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Directory holding release records and simulated cluster state
  #[arg(long, global = true, default_value = ".capstan")]
  state_dir: PathBuf,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Deploy a chart as a release
  Deploy(cmd::DeployArgs),

  /// Show the deploy plan without changing anything
  Plan(cmd::PlanArgs),

  /// Roll a release back to a previous revision
  Rollback(cmd::RollbackArgs),

  /// Delete a release's resources and retire it
  Uninstall(cmd::UninstallArgs),

  /// Show the current status of a release
  Status(cmd::StatusArgs),

  /// List all revisions of a release
  History(cmd::HistoryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_filter = if cli.verbose { "info" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
    .without_time()
    .init();

  match cli.command {
    Commands::Deploy(args) => cmd::cmd_deploy(&cli.state_dir, args).await,
    Commands::Plan(args) => cmd::cmd_plan(&cli.state_dir, args).await,
    Commands::Rollback(args) => cmd::cmd_rollback(&cli.state_dir, args).await,
    Commands::Uninstall(args) => cmd::cmd_uninstall(&cli.state_dir, args).await,
    Commands::Status(args) => cmd::cmd_status(&cli.state_dir, args),
    Commands::History(args) => cmd::cmd_history(&cli.state_dir, args),
  }
}
