//! Release records: the versioned history of a deployed chart.

pub mod history;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::ResourceError;

/// Errors interpreting release records.
#[derive(Debug, Error)]
pub enum ReleaseError {
  /// The stored manifest no longer parses into resource documents.
  #[error("stored manifest of {name} revision {revision} is invalid: {source}")]
  InvalidManifest {
    name: String,
    revision: u32,
    source: ResourceError,
  },
}

/// Externally visible release status vocabulary; other tooling reads these
/// strings from stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
  Unknown,
  PendingInstall,
  PendingUpgrade,
  PendingRollback,
  Deployed,
  Failed,
  Superseded,
  Uninstalling,
  Uninstalled,
}

impl ReleaseStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ReleaseStatus::Unknown => "unknown",
      ReleaseStatus::PendingInstall => "pending-install",
      ReleaseStatus::PendingUpgrade => "pending-upgrade",
      ReleaseStatus::PendingRollback => "pending-rollback",
      ReleaseStatus::Deployed => "deployed",
      ReleaseStatus::Failed => "failed",
      ReleaseStatus::Superseded => "superseded",
      ReleaseStatus::Uninstalling => "uninstalling",
      ReleaseStatus::Uninstalled => "uninstalled",
    }
  }

  /// True for the statuses a deploy starts in.
  pub fn is_pending(&self) -> bool {
    matches!(
      self,
      ReleaseStatus::PendingInstall | ReleaseStatus::PendingUpgrade | ReleaseStatus::PendingRollback
    )
  }
}

impl std::fmt::Display for ReleaseStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Status block of a release record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
  pub status: ReleaseStatus,
  pub first_deployed: Option<DateTime<Utc>>,
  pub last_deployed: Option<DateTime<Utc>>,
  pub description: String,
  #[serde(default)]
  pub notes: String,
}

/// Resumption checkpoint persisted after every completed stage: a crashed
/// deploy resumes from here instead of re-running blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
  pub phase: usize,
  pub stage: usize,
}

/// One revision of a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
  pub name: String,
  pub namespace: String,
  /// Monotonic, current+1 on every deploy.
  pub revision: u32,
  pub chart_name: String,
  pub chart_version: String,
  /// Merged values the manifest was rendered from.
  pub values: serde_yaml::Value,
  /// Concatenated rendered YAML of all non-hook resources.
  pub manifest: String,
  /// Rendered hook documents.
  pub hooks: Vec<String>,
  pub info: ReleaseInfo,
  #[serde(default)]
  pub checkpoint: Option<Checkpoint>,
}

impl Release {
  /// A fresh record in pending status; written to storage before any
  /// cluster mutation begins.
  #[allow(clippy::too_many_arguments)]
  pub fn new_pending(
    name: &str,
    namespace: &str,
    revision: u32,
    chart_name: &str,
    chart_version: &str,
    values: serde_yaml::Value,
    manifest: String,
    hooks: Vec<String>,
    status: ReleaseStatus,
  ) -> Self {
    debug_assert!(status.is_pending());
    Self {
      name: name.to_string(),
      namespace: namespace.to_string(),
      revision,
      chart_name: chart_name.to_string(),
      chart_version: chart_version.to_string(),
      values,
      manifest,
      hooks,
      info: ReleaseInfo {
        status,
        first_deployed: None,
        last_deployed: None,
        description: String::new(),
        notes: String::new(),
      },
      checkpoint: None,
    }
  }

  /// Promote to deployed after all stages succeed and post hooks ran.
  pub fn promote(&mut self, now: DateTime<Utc>, first_deployed: Option<DateTime<Utc>>) {
    self.info.status = ReleaseStatus::Deployed;
    self.info.first_deployed = first_deployed.or(Some(now));
    self.info.last_deployed = Some(now);
    self.info.description = "deploy succeeded".to_string();
    self.checkpoint = None;
  }

  /// Demote to failed; always leaves a terminal status behind.
  pub fn fail(&mut self, description: &str) {
    self.info.status = ReleaseStatus::Failed;
    self.info.description = description.to_string();
  }

  pub fn supersede(&mut self) {
    self.info.status = ReleaseStatus::Superseded;
  }
}
