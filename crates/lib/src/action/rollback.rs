//! The rollback action: re-apply a previous revision's manifest verbatim.

use std::path::PathBuf;

use tokio::sync::watch;
use tracing::info;

use crate::classify::classify;
use crate::depend::TypeMapper;
use crate::exec::{ExecuteConfig, ExecutionOutcome, Executor};
use crate::kube::ClusterClient;
use crate::plan::{self, PlanInput};
use crate::release::{Release, ReleaseStatus};
use crate::release::history::DeployKind;
use crate::resource::{Resource, ResourceId};
use crate::stage::WeightedSplitter;
use crate::storage::{ReleaseStorage, history_or_empty};

use super::{ActionError, deploy::write_report, previous_resources};

pub struct RollbackRequest {
  pub release_name: String,
  pub namespace: String,
  /// The revision whose manifest is restored.
  pub revision: u32,
  pub config: ExecuteConfig,
  pub report_path: Option<PathBuf>,
}

/// Roll back to `revision`. The stored manifest is re-applied without
/// re-rendering; a new release record is created at the next revision.
pub async fn rollback(
  client: &dyn ClusterClient,
  storage: &dyn ReleaseStorage,
  mapper: &dyn TypeMapper,
  shutdown: watch::Receiver<bool>,
  request: RollbackRequest,
) -> Result<ExecutionOutcome, ActionError> {
  client.is_reachable().await?;

  let target = storage.get(&request.release_name, request.revision)?;
  if target.manifest.trim().is_empty() {
    return Err(ActionError::EmptyRollbackTarget {
      name: request.release_name.clone(),
      revision: request.revision,
    });
  }

  let history = history_or_empty(storage, &request.release_name)?;
  let revision = history.last().map(|r| r.revision + 1).unwrap_or(1);

  let mut resources: Vec<Resource> =
    super::manifest_resources(&target.manifest, &request.release_name, &request.namespace)?;
  for hook_doc in &target.hooks {
    let value: serde_yaml::Value = serde_yaml::from_str(hook_doc).map_err(crate::resource::ResourceError::from)?;
    resources.push(Resource::from_rendered_doc(value)?.into_owned(&request.release_name, &request.namespace)?);
  }

  let release = Release::new_pending(
    &request.release_name,
    &request.namespace,
    revision,
    &target.chart_name,
    &target.chart_version,
    target.values.clone(),
    target.manifest.clone(),
    target.hooks.clone(),
    ReleaseStatus::PendingRollback,
  );

  let previous = previous_resources(&history)?;
  let classification = classify(client, resources, &request.release_name, &request.namespace).await?;
  let unsupported: Vec<ResourceId> = classification.unsupported_ids().into_iter().cloned().collect();

  let (deploy_plan, cleanup) = plan::build(PlanInput {
    deploy_kind: DeployKind::Rollback,
    classification,
    previous,
    namespace: request.namespace.clone(),
    splitter: &WeightedSplitter,
    mapper,
  })?;

  info!(
    release = %request.release_name,
    target = request.revision,
    revision,
    "rolling back"
  );

  let mut executor = Executor::new(client, storage, request.config.clone(), shutdown);
  let outcome = executor.execute(&deploy_plan, &cleanup, release, unsupported).await;
  write_report(&outcome, request.report_path.as_deref());
  Ok(outcome)
}
