//! Implementation of the `capstan status` command.
//!
//! Shows the latest revision of a release and its deployment state.

use std::path::Path;

use anyhow::Result;
use clap::Args;

use capstan_lib::storage::{ReleaseStorage, StorageError};

use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};
use crate::state;

#[derive(Args)]
pub struct StatusArgs {
  /// Release name
  pub release: String,

  /// Output format
  #[arg(long, value_enum, default_value = "text")]
  pub format: OutputFormat,
}

pub fn cmd_status(state_dir: &Path, args: StatusArgs) -> Result<()> {
  let storage = state::open_storage(state_dir)?;

  let release = match storage.last(&args.release) {
    Ok(release) => release,
    Err(StorageError::ReleaseNotFound { .. }) => {
      print_info(&format!("Release {} not found. Run 'capstan deploy' to create it.", args.release));
      std::process::exit(1);
    }
    Err(e) => return Err(e.into()),
  };

  if args.format.is_json() {
    let json = serde_json::json!({
      "name": release.name,
      "namespace": release.namespace,
      "revision": release.revision,
      "status": release.info.status.as_str(),
      "chart": release.chart_name,
      "chart_version": release.chart_version,
      "first_deployed": release.info.first_deployed,
      "last_deployed": release.info.last_deployed,
      "description": release.info.description,
    });
    print_json(&json)?;
    return Ok(());
  }

  print_success(&format!("Release: {}", release.name));
  print_stat("Namespace", &release.namespace);
  print_stat("Revision", &release.revision.to_string());
  print_stat("Status", release.info.status.as_str());
  print_stat("Chart", &format!("{} {}", release.chart_name, release.chart_version));
  if let Some(last) = release.info.last_deployed {
    print_stat("Last deployed", &last.to_rfc3339());
  }
  if !release.info.description.is_empty() {
    print_stat("Description", &release.info.description);
  }
  Ok(())
}
