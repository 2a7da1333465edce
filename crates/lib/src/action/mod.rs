//! High-level operations: deploy, rollback, uninstall.
//!
//! Each action wires the pure layers together in the documented flow and
//! owns the storage/cluster collaborators for its duration. Callers are
//! expected to serialize operations per release name.

pub mod deploy;
pub mod rollback;
pub mod uninstall;

use thiserror::Error;

use crate::classify::ClassifyError;
use crate::exec::ExecuteError;
use crate::kube::ClusterError;
use crate::plan::PlanError;
use crate::release::{Release, ReleaseError};
use crate::render::{RenderError, split_documents};
use crate::resource::{Resource, ResourceError};
use crate::storage::StorageError;

pub use deploy::{DeployRequest, PlanPreview, deploy, preview};
pub use rollback::{RollbackRequest, rollback};
pub use uninstall::{UninstallRequest, UninstallSummary, uninstall};

/// Errors surfaced before or outside plan execution.
#[derive(Debug, Error)]
pub enum ActionError {
  #[error(transparent)]
  Render(#[from] RenderError),

  #[error(transparent)]
  Resource(#[from] ResourceError),

  #[error(transparent)]
  Release(#[from] ReleaseError),

  #[error(transparent)]
  Classify(#[from] ClassifyError),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Cluster(#[from] ClusterError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),

  #[error("revision {revision} of release {name} has no manifest to roll back to")]
  EmptyRollbackTarget { name: String, revision: u32 },
}

/// Parse a stored multi-document manifest back into owned resources.
pub(crate) fn manifest_resources(
  manifest: &str,
  release_name: &str,
  release_namespace: &str,
) -> Result<Vec<Resource>, ActionError> {
  let mut resources = Vec::new();
  for doc in split_documents(manifest) {
    let value: serde_yaml::Value = serde_yaml::from_str(&doc).map_err(ResourceError::from)?;
    let resource = Resource::from_rendered_doc(value)?.into_owned(release_name, release_namespace)?;
    resources.push(resource);
  }
  Ok(resources)
}

/// Resources of the last deployed revision, empty when none was deployed.
pub(crate) fn previous_resources(history: &[Release]) -> Result<Vec<Resource>, ActionError> {
  match crate::release::history::last_deployed(history) {
    Some(release) => manifest_resources(&release.manifest, &release.name, &release.namespace),
    None => Ok(Vec::new()),
  }
}
