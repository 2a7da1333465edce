//! Machine-readable deploy reports.
//!
//! A report records what was actually done: one entry per resource action,
//! with phase/stage structure and timings. It is written even when the
//! deploy fails, containing whatever state was reached.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::ResourceId;

/// Outcome of one resource-level action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
  pub resource: String,
  pub verb: String,
  pub ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl ActionReport {
  pub fn ok(id: &ResourceId, verb: &str) -> Self {
    Self {
      resource: id.to_string(),
      verb: verb.to_string(),
      ok: true,
      error: None,
    }
  }

  pub fn failed(id: &ResourceId, verb: &str, error: impl ToString) -> Self {
    Self {
      resource: id.to_string(),
      verb: verb.to_string(),
      ok: false,
      error: Some(error.to_string()),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
  pub name: String,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  pub actions: Vec<ActionReport>,
  /// Stage was skipped because a resume checkpoint already covered it.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub resumed_past: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
  pub phase: String,
  pub stages: Vec<StageReport>,
}

/// Overall report status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportStatus {
  Succeeded,
  Failed,
  Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployReport {
  pub release: String,
  pub namespace: String,
  pub revision: u32,
  pub status: ReportStatus,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  pub phases: Vec<PhaseReport>,
  /// Kinds the cluster does not serve; reported, never applied.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub unsupported: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl DeployReport {
  pub fn started(release: &str, namespace: &str, revision: u32) -> Self {
    let now = Utc::now();
    Self {
      release: release.to_string(),
      namespace: namespace.to_string(),
      revision,
      status: ReportStatus::Failed,
      started_at: now,
      finished_at: now,
      phases: Vec::new(),
      unsupported: Vec::new(),
      error: None,
    }
  }

  pub fn finish(&mut self, status: ReportStatus, error: Option<String>) {
    self.status = status;
    self.error = error;
    self.finished_at = Utc::now();
  }

  /// Total mutating actions that succeeded.
  pub fn succeeded_actions(&self) -> usize {
    self
      .phases
      .iter()
      .flat_map(|p| &p.stages)
      .flat_map(|s| &s.actions)
      .filter(|a| a.ok)
      .count()
  }

  /// Serialize to pretty JSON at `path`.
  pub fn write_json(&self, path: &Path) -> Result<(), std::io::Error> {
    let json = serde_json::to_vec_pretty(self)?;
    std::fs::write(path, json)
  }
}
