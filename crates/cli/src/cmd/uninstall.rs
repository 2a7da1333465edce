//! Implementation of the `capstan uninstall` command.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use capstan_lib::action::{self, UninstallRequest};
use capstan_lib::exec::ExecuteConfig;
use capstan_lib::release::ReleaseStatus;

use crate::output::{print_error, print_stat, print_success};
use crate::state;

#[derive(Args)]
pub struct UninstallArgs {
  /// Release name
  pub release: String,

  /// Target namespace
  #[arg(short, long, default_value = "default")]
  pub namespace: String,

  /// Hook readiness timeout
  #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
  pub timeout: Duration,

  /// Do not wait for delete hooks to become ready
  #[arg(long)]
  pub no_wait: bool,
}

pub async fn cmd_uninstall(state_dir: &Path, args: UninstallArgs) -> Result<()> {
  let storage = state::open_storage(state_dir)?;
  let cluster = state::load_cluster(state_dir)?;

  let request = UninstallRequest {
    release_name: args.release.clone(),
    namespace: args.namespace,
    config: ExecuteConfig {
      wait_timeout: args.timeout,
      wait_ready: !args.no_wait,
      ..ExecuteConfig::default()
    },
  };

  let summary = action::uninstall(&cluster, &storage, request).await?;
  state::save_cluster(state_dir, &cluster)?;

  if summary.status != ReleaseStatus::Uninstalled {
    print_error(&format!("Uninstall of {} finished with failures", args.release));
    for failure in &summary.failures {
      print_stat("Failure", failure);
    }
    std::process::exit(1);
  }

  print_success(&format!(
    "Release {} uninstalled ({} deleted, {} kept)",
    args.release,
    summary.deleted.len(),
    summary.kept.len()
  ));
  for id in &summary.kept {
    print_stat("Kept", &id.to_string());
  }
  Ok(())
}
