//! Release history interpretation: deploy kind detection and the
//! deployed-resources calculator.

use tracing::debug;

use crate::render::split_documents;
use crate::resource::{ResourceId, extract_id};

use super::{Release, ReleaseError, ReleaseStatus};

/// Which kind of deploy the release history calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployKind {
  /// No prior release exists.
  Initial,
  /// Prior releases exist but none ever reached deployed: retry install.
  Install,
  /// Normal path with a previously deployed release.
  Upgrade,
  /// Explicit rollback request.
  Rollback,
}

/// Detect the deploy kind from history, ordered by ascending revision.
pub fn detect_deploy_kind(history: &[Release]) -> DeployKind {
  if history.is_empty() {
    return DeployKind::Initial;
  }
  let ever_deployed = history.iter().any(|r| {
    matches!(
      r.info.status,
      ReleaseStatus::Deployed | ReleaseStatus::Superseded | ReleaseStatus::Uninstalling | ReleaseStatus::Uninstalled
    )
  });
  if ever_deployed {
    DeployKind::Upgrade
  } else {
    DeployKind::Install
  }
}

/// The most recent release currently in deployed status.
pub fn last_deployed(history: &[Release]) -> Option<&Release> {
  history
    .iter()
    .rev()
    .find(|r| r.info.status == ReleaseStatus::Deployed)
}

/// Pending statuses for each deploy kind.
pub fn pending_status(kind: DeployKind) -> ReleaseStatus {
  match kind {
    DeployKind::Initial | DeployKind::Install => ReleaseStatus::PendingInstall,
    DeployKind::Upgrade => ReleaseStatus::PendingUpgrade,
    DeployKind::Rollback => ReleaseStatus::PendingRollback,
  }
}

/// Reconstruct which resources were live after the last successful
/// deployment, by parsing that release's stored manifest. Used to compute
/// orphans safely: a failed newer revision never widens or narrows the set.
pub fn deployed_resource_ids(history: &[Release]) -> Result<Vec<ResourceId>, ReleaseError> {
  let Some(release) = last_deployed(history) else {
    return Ok(Vec::new());
  };
  debug!(
    release = %release.name,
    revision = release.revision,
    "reconstructing tracked resources from last deployed revision"
  );
  tracked_resource_ids(release)
}

/// Parse all resource ids out of a release's stored manifest.
pub fn tracked_resource_ids(release: &Release) -> Result<Vec<ResourceId>, ReleaseError> {
  let mut ids = Vec::new();
  for doc in split_documents(&release.manifest) {
    let value: serde_yaml::Value = serde_yaml::from_str(&doc).map_err(|e| ReleaseError::InvalidManifest {
      name: release.name.clone(),
      revision: release.revision,
      source: e.into(),
    })?;
    let id = extract_id(&value).map_err(|e| ReleaseError::InvalidManifest {
      name: release.name.clone(),
      revision: release.revision,
      source: e,
    })?;
    if !ids.contains(&id) {
      ids.push(id);
    }
  }
  ids.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then_with(|| a.cmp(b)));
  Ok(ids)
}
