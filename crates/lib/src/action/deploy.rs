//! The deploy action: render, classify, plan, execute.

use std::path::PathBuf;

use serde_yaml::Value;
use tokio::sync::watch;
use tracing::{error, info};

use crate::classify::classify;
use crate::depend::TypeMapper;
use crate::exec::{ExecuteConfig, ExecutionOutcome, Executor};
use crate::kube::ClusterClient;
use crate::plan::{self, CleanupRefs, DeployPlan, PlanInput};
use crate::release::Release;
use crate::release::history::{DeployKind, detect_deploy_kind, pending_status};
use crate::render::ChartRenderer;
use crate::resource::{Resource, ResourceId};
use crate::stage::WeightedSplitter;
use crate::storage::{ReleaseStorage, history_or_empty};

use super::{ActionError, previous_resources};

/// Everything a deploy needs from the caller.
pub struct DeployRequest<'a> {
  pub release_name: String,
  pub namespace: String,
  pub renderer: &'a dyn ChartRenderer,
  /// Merged values the chart is rendered with, recorded on the release.
  pub values: Value,
  pub config: ExecuteConfig,
  /// When set, the deploy report is written here, success or failure.
  pub report_path: Option<PathBuf>,
}

/// A built plan with its inputs, for dry-run display.
pub struct PlanPreview {
  pub deploy_kind: DeployKind,
  pub revision: u32,
  pub plan: DeployPlan,
  pub unsupported: Vec<ResourceId>,
}

struct Prepared {
  deploy_kind: DeployKind,
  release: Release,
  plan: DeployPlan,
  cleanup: CleanupRefs,
  unsupported: Vec<ResourceId>,
}

/// Render the chart and build the plan without touching anything; shared by
/// `deploy` and the dry-run preview.
async fn prepare(
  client: &dyn ClusterClient,
  storage: &dyn ReleaseStorage,
  mapper: &dyn TypeMapper,
  request: &DeployRequest<'_>,
) -> Result<Prepared, ActionError> {
  client.is_reachable().await?;

  let history = history_or_empty(storage, &request.release_name)?;
  let deploy_kind = detect_deploy_kind(&history);
  let revision = history.last().map(|r| r.revision + 1).unwrap_or(1);

  let documents = request.renderer.render(&request.values)?;
  let mut resources = Vec::with_capacity(documents.len());
  for document in &documents {
    let value: Value = serde_yaml::from_str(&document.yaml).map_err(crate::resource::ResourceError::from)?;
    let resource = Resource::from_rendered_doc(value)?.into_owned(&request.release_name, &request.namespace)?;
    resources.push(resource);
  }

  let manifest = join_documents(resources.iter().filter(|r| !r.is_hook()));
  let hooks: Vec<String> = resources
    .iter()
    .filter(|r| r.is_hook())
    .map(|r| serde_yaml::to_string(r.doc()).unwrap_or_default())
    .collect();

  let release = Release::new_pending(
    &request.release_name,
    &request.namespace,
    revision,
    request.renderer.chart_name(),
    request.renderer.chart_version(),
    request.values.clone(),
    manifest,
    hooks,
    pending_status(deploy_kind),
  );

  let previous = previous_resources(&history)?;

  // Live state is read here, immediately before planning.
  let classification = classify(client, resources, &request.release_name, &request.namespace).await?;
  let unsupported: Vec<ResourceId> = classification.unsupported_ids().into_iter().cloned().collect();

  let (plan, cleanup) = plan::build(PlanInput {
    deploy_kind,
    classification,
    previous,
    namespace: request.namespace.clone(),
    splitter: &WeightedSplitter,
    mapper,
  })?;

  info!(
    release = %request.release_name,
    namespace = %request.namespace,
    revision,
    kind = ?deploy_kind,
    operations = plan.operation_count(),
    "deploy prepared"
  );

  Ok(Prepared {
    deploy_kind,
    release,
    plan,
    cleanup,
    unsupported,
  })
}

/// Build the plan and return it without executing anything.
pub async fn preview(
  client: &dyn ClusterClient,
  storage: &dyn ReleaseStorage,
  mapper: &dyn TypeMapper,
  request: &DeployRequest<'_>,
) -> Result<PlanPreview, ActionError> {
  let prepared = prepare(client, storage, mapper, request).await?;
  Ok(PlanPreview {
    deploy_kind: prepared.deploy_kind,
    revision: prepared.release.revision,
    plan: prepared.plan,
    unsupported: prepared.unsupported,
  })
}

/// Run a full deploy. Execution-time failure is returned inside the
/// outcome so the report always reaches the caller; errors before
/// execution are returned directly.
pub async fn deploy(
  client: &dyn ClusterClient,
  storage: &dyn ReleaseStorage,
  mapper: &dyn TypeMapper,
  shutdown: watch::Receiver<bool>,
  request: DeployRequest<'_>,
) -> Result<ExecutionOutcome, ActionError> {
  let prepared = prepare(client, storage, mapper, &request).await?;

  let mut executor = Executor::new(client, storage, request.config.clone(), shutdown);
  let outcome = executor
    .execute(&prepared.plan, &prepared.cleanup, prepared.release, prepared.unsupported)
    .await;

  write_report(&outcome, request.report_path.as_deref());
  Ok(outcome)
}

pub(crate) fn write_report(outcome: &ExecutionOutcome, path: Option<&std::path::Path>) {
  if let Some(path) = path {
    if let Err(e) = outcome.report.write_json(path) {
      error!(path = %path.display(), error = %e, "failed to write deploy report");
    }
  }
}

pub(crate) fn join_documents<'a>(resources: impl Iterator<Item = &'a Resource>) -> String {
  let mut out = String::new();
  for resource in resources {
    if !out.is_empty() {
      out.push_str("---\n");
    }
    out.push_str(&serde_yaml::to_string(resource.doc()).unwrap_or_default());
  }
  out
}
