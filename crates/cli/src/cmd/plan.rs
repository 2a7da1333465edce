//! Implementation of the `capstan plan` command.
//!
//! Builds the same deploy plan `capstan deploy` would run and prints it
//! without touching the cluster or release history.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;

use capstan_lib::action::{self, DeployRequest};
use capstan_lib::depend::StaticTypeMapper;
use capstan_lib::exec::ExecuteConfig;
use capstan_lib::release::history::DeployKind;

use crate::output::{print_info, print_stat};
use crate::state;

#[derive(Args)]
pub struct PlanArgs {
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
}

fn kind_label(kind: DeployKind) -> &'static str {
  match kind {
    DeployKind::Initial => "initial install",
    DeployKind::Install => "install retry",
    DeployKind::Upgrade => "upgrade",
    DeployKind::Rollback => "rollback",
  }
}

pub async fn cmd_plan(state_dir: &Path, args: PlanArgs) -> Result<()> {
  let renderer = super::load_chart(&args.chart)?;
  let values = super::resolve_values(&args.chart, &args.values, &args.set)?;

  let storage = state::open_storage(state_dir)?;
  let cluster = state::load_cluster(state_dir)?;
  let mapper = StaticTypeMapper::with_builtins();

  let request = DeployRequest {
    release_name: args.release,
    namespace: args.namespace,
    renderer: &renderer,
    values,
    config: ExecuteConfig::default(),
    report_path: None,
  };

  let preview = action::preview(&cluster, &storage, &mapper, &request).await?;

  print_info(&format!(
    "Plan for {} revision {} ({})",
    request.release_name,
    preview.revision,
    kind_label(preview.deploy_kind)
  ));
  print_stat("Operations", &preview.plan.operation_count().to_string());
  if preview.plan.is_cluster_noop() {
    print_info("Cluster already up to date; only the release record would change");
  }
  for id in &preview.unsupported {
    print_stat("Unsupported", &id.to_string());
  }
  println!();
  print!("{}", preview.plan.render_text());
  Ok(())
}
