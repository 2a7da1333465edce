//! Implementation of the `capstan history` command.

use std::path::Path;

use anyhow::Result;
use clap::Args;

use capstan_lib::storage::{ReleaseStorage, history_or_empty};

use crate::output::{OutputFormat, print_info, print_json};
use crate::state;

#[derive(Args)]
pub struct HistoryArgs {
  /// Release name
  pub release: String,

  /// Output format
  #[arg(long, value_enum, default_value = "text")]
  pub format: OutputFormat,
}

pub fn cmd_history(state_dir: &Path, args: HistoryArgs) -> Result<()> {
  let storage = state::open_storage(state_dir)?;
  let history = history_or_empty(&storage, &args.release)?;

  if history.is_empty() {
    print_info(&format!("No revisions recorded for {}", args.release));
    return Ok(());
  }

  if args.format.is_json() {
    let entries: Vec<_> = history
      .iter()
      .map(|r| {
        serde_json::json!({
          "revision": r.revision,
          "status": r.info.status.as_str(),
          "chart": r.chart_name,
          "chart_version": r.chart_version,
          "deployed_at": r.info.last_deployed,
          "description": r.info.description,
        })
      })
      .collect();
    print_json(&entries)?;
    return Ok(());
  }

  println!("{:<10} {:<18} {:<24} {}", "REVISION", "STATUS", "CHART", "DESCRIPTION");
  for release in &history {
    println!(
      "{:<10} {:<18} {:<24} {}",
      release.revision,
      release.info.status.as_str(),
      format!("{} {}", release.chart_name, release.chart_version),
      release.info.description
    );
  }
  Ok(())
}
