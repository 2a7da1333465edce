//! Subcommand implementations for the capstan binary.

mod deploy;
mod history;
mod plan;
mod rollback;
mod status;
mod uninstall;

pub use deploy::{DeployArgs, cmd_deploy};
pub use history::{HistoryArgs, cmd_history};
pub use plan::{PlanArgs, cmd_plan};
pub use rollback::{RollbackArgs, cmd_rollback};
pub use status::{StatusArgs, cmd_status};
pub use uninstall::{UninstallArgs, cmd_uninstall};

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use capstan_lib::render::{StaticRenderer, merge_values, parse_set_expression};
use serde::Deserialize;
use serde_yaml::Value;
use tokio::sync::watch;

/// Chart metadata, read from `chart.yaml` at the chart root when present.
#[derive(Debug, Deserialize)]
struct ChartMeta {
  name: String,
  #[serde(default = "default_chart_version")]
  version: String,
}

fn default_chart_version() -> String {
  "0.0.0".to_string()
}

/// Load a chart directory. Metadata comes from `chart.yaml` (falling back
/// to the directory name); manifests come from `templates/` when that
/// subdirectory exists, otherwise from the chart root.
pub(crate) fn load_chart(chart: &Path) -> Result<StaticRenderer> {
  if !chart.is_dir() {
    bail!("Chart directory not found: {}", chart.display());
  }

  let meta_path = chart.join("chart.yaml");
  let (name, version) = if meta_path.exists() {
    let text = fs::read_to_string(&meta_path)
      .with_context(|| format!("Failed to read {}", meta_path.display()))?;
    let meta: ChartMeta =
      serde_yaml::from_str(&text).with_context(|| format!("Invalid chart metadata {}", meta_path.display()))?;
    (meta.name, meta.version)
  } else {
    let name = chart
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or("chart")
      .to_string();
    (name, default_chart_version())
  };

  let templates = chart.join("templates");
  let manifest_dir = if templates.is_dir() { templates } else { chart.to_path_buf() };
  StaticRenderer::from_dir(name, version, &manifest_dir)
    .with_context(|| format!("Failed to load chart {}", chart.display()))
}

/// Merge chart defaults (`values.yaml`), `-f` files in order, then `--set`
/// expressions, later sources winning.
pub(crate) fn resolve_values(chart: &Path, files: &[PathBuf], sets: &[String]) -> Result<Value> {
  let defaults_path = chart.join("values.yaml");
  let defaults = if defaults_path.exists() {
    read_yaml(&defaults_path)?
  } else {
    Value::Null
  };

  let mut overlays = Vec::with_capacity(files.len() + sets.len());
  for path in files {
    overlays.push(read_yaml(path)?);
  }
  for expr in sets {
    overlays.push(parse_set_expression(expr).with_context(|| format!("Invalid --set expression {expr:?}"))?);
  }
  Ok(merge_values(defaults, &overlays))
}

fn read_yaml(path: &Path) -> Result<Value> {
  let text = fs::read_to_string(path).with_context(|| format!("Failed to read values file {}", path.display()))?;
  serde_yaml::from_str(&text).with_context(|| format!("Invalid YAML in {}", path.display()))
}

/// A shutdown receiver that flips to true on Ctrl-C.
pub(crate) fn shutdown_signal() -> watch::Receiver<bool> {
  let (tx, rx) = watch::channel(false);
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      let _ = tx.send(true);
    }
  });
  rx
}

#[cfg(test)]
mod tests {
  use capstan_lib::render::ChartRenderer;

  use super::*;

  #[test]
  fn chart_metadata_falls_back_to_directory_name() {
    let dir = tempfile::tempdir().unwrap();
    let chart = dir.path().join("web");
    fs::create_dir(&chart).unwrap();
    fs::write(chart.join("app.yaml"), "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n").unwrap();

    let renderer = load_chart(&chart).unwrap();
    assert_eq!(renderer.chart_name(), "web");
    assert_eq!(renderer.chart_version(), "0.0.0");
  }

  #[test]
  fn chart_metadata_read_from_chart_yaml() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("chart.yaml"), "name: shop\nversion: 2.1.0\n").unwrap();
    fs::create_dir(dir.path().join("templates")).unwrap();
    fs::write(
      dir.path().join("templates/app.yaml"),
      "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n",
    )
    .unwrap();

    let renderer = load_chart(dir.path()).unwrap();
    assert_eq!(renderer.chart_name(), "shop");
    assert_eq!(renderer.chart_version(), "2.1.0");
  }

  #[test]
  fn values_merge_defaults_files_then_sets() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("values.yaml"), "replicas: 1\ntag: stable\n").unwrap();
    let overlay = dir.path().join("prod.yaml");
    fs::write(&overlay, "replicas: 3\n").unwrap();

    let values = resolve_values(dir.path(), &[overlay], &["tag=canary".to_string()]).unwrap();
    assert_eq!(values.get("replicas").and_then(Value::as_i64), Some(3));
    assert_eq!(values.get("tag").and_then(Value::as_str), Some("canary"));
  }
}
