//! On-disk state for the CLI.
//!
//! The state directory holds two things: release records under `releases/`,
//! and the simulated cluster contents in `cluster.yaml`. Deploys run against
//! the simulated cluster, which is loaded before a command and written back
//! after it finishes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use capstan_lib::kube::FakeCluster;
use capstan_lib::render::split_documents;
use capstan_lib::storage::FileStorage;
use serde_yaml::Value;

const CLUSTER_FILE: &str = "cluster.yaml";
const RELEASES_DIR: &str = "releases";

pub fn open_storage(state_dir: &Path) -> Result<FileStorage> {
  let releases = state_dir.join(RELEASES_DIR);
  fs::create_dir_all(&releases)
    .with_context(|| format!("Failed to create state directory {}", releases.display()))?;
  Ok(FileStorage::new(releases))
}

pub fn cluster_path(state_dir: &Path) -> PathBuf {
  state_dir.join(CLUSTER_FILE)
}

/// Loads the simulated cluster, starting empty when no state file exists.
pub fn load_cluster(state_dir: &Path) -> Result<FakeCluster> {
  let cluster = FakeCluster::new();
  let path = cluster_path(state_dir);
  if !path.exists() {
    return Ok(cluster);
  }

  let text = fs::read_to_string(&path)
    .with_context(|| format!("Failed to read cluster state {}", path.display()))?;
  for doc in split_documents(&text) {
    let value: Value = serde_yaml::from_str(&doc)
      .with_context(|| format!("Invalid document in cluster state {}", path.display()))?;
    cluster.seed(value);
  }
  Ok(cluster)
}

/// Writes the simulated cluster back to the state file.
pub fn save_cluster(state_dir: &Path, cluster: &FakeCluster) -> Result<()> {
  fs::create_dir_all(state_dir)
    .with_context(|| format!("Failed to create state directory {}", state_dir.display()))?;

  let mut out = String::new();
  for doc in cluster.objects() {
    let text = serde_yaml::to_string(&doc).context("Failed to serialize cluster object")?;
    out.push_str("---\n");
    out.push_str(&text);
  }

  let path = cluster_path(state_dir);
  fs::write(&path, out).with_context(|| format!("Failed to write cluster state {}", path.display()))
}
