//! Implementation of the `capstan rollback` command.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use capstan_lib::action::{self, RollbackRequest};
use capstan_lib::depend::StaticTypeMapper;
use capstan_lib::exec::ExecuteConfig;

use crate::output::{print_error, print_stat, print_success};
use crate::state;

#[derive(Args)]
pub struct RollbackArgs {
  /// Release name
  pub release: String,

  /// Revision to roll back to
  pub revision: u32,

  /// Target namespace
  #[arg(short, long, default_value = "default")]
  pub namespace: String,

  /// Per-stage readiness timeout
  #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
  pub timeout: Duration,

  /// Do not wait for readiness or external dependencies
  #[arg(long)]
  pub no_wait: bool,

  /// Delete resources created by a failing stage
  #[arg(long)]
  pub cleanup_on_fail: bool,

  /// Write a JSON deploy report to this path
  #[arg(long)]
  pub report_path: Option<PathBuf>,
}

pub async fn cmd_rollback(state_dir: &Path, args: RollbackArgs) -> Result<()> {
  let storage = state::open_storage(state_dir)?;
  let cluster = state::load_cluster(state_dir)?;
  let mapper = StaticTypeMapper::with_builtins();

  let config = ExecuteConfig {
    wait_timeout: args.timeout,
    wait_ready: !args.no_wait,
    wait_external: !args.no_wait,
    cleanup_on_fail: args.cleanup_on_fail,
    force: false,
  };

  let request = RollbackRequest {
    release_name: args.release,
    namespace: args.namespace,
    revision: args.revision,
    config,
    report_path: args.report_path,
  };

  let outcome = action::rollback(&cluster, &storage, &mapper, super::shutdown_signal(), request).await?;
  state::save_cluster(state_dir, &cluster)?;

  if let Some(failure) = &outcome.failure {
    print_error(&format!("Rollback failed: {failure}"));
    print_stat("Status", outcome.release.info.status.as_str());
    std::process::exit(1);
  }

  print_success(&format!(
    "Release {} rolled back to revision {} as revision {}",
    outcome.release.name, args.revision, outcome.release.revision
  ));
  Ok(())
}
