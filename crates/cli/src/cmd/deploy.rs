//! Implementation of the `capstan deploy` command.
//!
//! Renders the chart, plans against release history and live cluster
//! state, then executes the plan stage by stage. A failed deploy leaves a
//! failed release record behind and exits nonzero.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Args;

use capstan_lib::action::{self, DeployRequest};
use capstan_lib::depend::StaticTypeMapper;
use capstan_lib::exec::ExecuteConfig;

use crate::output::{format_duration, print_error, print_stat, print_success};
use crate::state;

#[derive(Args)]
pub struct DeployArgs {
  /// Release name
  pub release: String,

  /// Chart directory
  pub chart: PathBuf,

  /// Target namespace
  #[arg(short, long, default_value = "default")]
  pub namespace: String,

  /// Values files, merged in order on top of the chart defaults
  #[arg(short = 'f', long = "values")]
  pub values: Vec<PathBuf>,

  /// Set individual values (key.path=value)
  #[arg(long = "set")]
  pub set: Vec<String>,

  /// Per-stage readiness timeout
  #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
  pub timeout: Duration,

  /// Do not wait for readiness or external dependencies
  #[arg(long)]
  pub no_wait: bool,

  /// Delete resources created by a failing stage
  #[arg(long)]
  pub cleanup_on_fail: bool,

  /// Delete and recreate resources on immutable-field conflicts
  #[arg(long)]
  pub force: bool,

  /// Write a JSON deploy report to this path
  #[arg(long)]
  pub report_path: Option<PathBuf>,
}

pub async fn cmd_deploy(state_dir: &Path, args: DeployArgs) -> Result<()> {
  let renderer = super::load_chart(&args.chart)?;
  let values = super::resolve_values(&args.chart, &args.values, &args.set)?;

  let storage = state::open_storage(state_dir)?;
  let cluster = state::load_cluster(state_dir)?;
  let mapper = StaticTypeMapper::with_builtins();

  let config = ExecuteConfig {
    wait_timeout: args.timeout,
    wait_ready: !args.no_wait,
    wait_external: !args.no_wait,
    cleanup_on_fail: args.cleanup_on_fail,
    force: args.force,
  };

  let request = DeployRequest {
    release_name: args.release,
    namespace: args.namespace,
    renderer: &renderer,
    values,
    config,
    report_path: args.report_path,
  };

  let started = Instant::now();
  let outcome = action::deploy(&cluster, &storage, &mapper, super::shutdown_signal(), request).await?;
  state::save_cluster(state_dir, &cluster)?;

  if let Some(failure) = &outcome.failure {
    print_error(&format!("Deploy failed: {failure}"));
    print_stat("Release", &outcome.release.name);
    print_stat("Revision", &outcome.release.revision.to_string());
    print_stat("Status", outcome.release.info.status.as_str());
    std::process::exit(1);
  }

  print_success(&format!(
    "Release {} revision {} deployed in {}",
    outcome.release.name,
    outcome.release.revision,
    format_duration(started.elapsed())
  ));
  print_stat(
    "Chart",
    &format!("{} {}", outcome.release.chart_name, outcome.release.chart_version),
  );
  if !outcome.report.unsupported.is_empty() {
    print_stat("Unsupported", &outcome.report.unsupported.len().to_string());
  }
  Ok(())
}
