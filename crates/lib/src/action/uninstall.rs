//! The uninstall action: delete tracked resources and retire the release.

use tracing::{info, warn};

use crate::exec::ExecuteConfig;
use crate::kube::{ClusterClient, batch_failures};
use crate::release::{Release, ReleaseStatus};
use crate::release::history::last_deployed;
use crate::resource::{DeletePolicy, HookEvent, Resource, ResourceId};
use crate::storage::{ReleaseStorage, StorageError, history_or_empty};

use super::ActionError;

pub struct UninstallRequest {
  pub release_name: String,
  pub namespace: String,
  pub config: ExecuteConfig,
}

/// What uninstall did; `failures` is non-empty when some deletions were
/// rejected, in which case the release record is marked failed instead of
/// uninstalled.
#[derive(Debug)]
pub struct UninstallSummary {
  pub deleted: Vec<ResourceId>,
  /// Resources kept in the cluster (`capstan.io/resource-policy: keep`).
  pub kept: Vec<ResourceId>,
  pub failures: Vec<String>,
  pub status: ReleaseStatus,
}

pub async fn uninstall(
  client: &dyn ClusterClient,
  storage: &dyn ReleaseStorage,
  request: UninstallRequest,
) -> Result<UninstallSummary, ActionError> {
  client.is_reachable().await?;

  let history = history_or_empty(storage, &request.release_name)?;
  let Some(deployed) = last_deployed(&history) else {
    return Err(ActionError::Storage(StorageError::ReleaseNotFound {
      name: request.release_name.clone(),
      revision: None,
    }));
  };

  let mut record = deployed.clone();
  let resources = super::manifest_resources(&record.manifest, &request.release_name, &request.namespace)?;
  let hooks = hook_resources(&record.hooks, &request.release_name, &request.namespace)?;

  record.info.status = ReleaseStatus::Uninstalling;
  record.info.description = "uninstall in progress".to_string();
  storage.update(&record)?;

  if let Err(e) = run_hooks(client, &hooks, HookEvent::PreDelete, &request.config).await {
    mark_failed(storage, &mut record, &e);
    return Err(e);
  }

  let (kept, doomed): (Vec<&Resource>, Vec<&Resource>) =
    resources.iter().partition(|r| r.meta().keep_on_delete);
  let mut ids: Vec<ResourceId> = doomed.iter().map(|r| r.id().clone()).collect();
  // Delete in reverse creation order.
  ids.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

  let results = client.delete(&ids).await;
  let failures: Vec<String> = batch_failures(&results).iter().map(ToString::to_string).collect();
  let deleted: Vec<ResourceId> = results
    .iter()
    .filter(|(_, r)| r.is_ok())
    .map(|(id, _)| id.clone())
    .collect();

  if let Err(e) = run_hooks(client, &hooks, HookEvent::PostDelete, &request.config).await {
    mark_failed(storage, &mut record, &e);
    return Err(e);
  }

  let status = if failures.is_empty() {
    record.info.status = ReleaseStatus::Uninstalled;
    record.info.description = "uninstall succeeded".to_string();
    ReleaseStatus::Uninstalled
  } else {
    warn!(count = failures.len(), "some resources could not be deleted");
    record.info.status = ReleaseStatus::Failed;
    record.info.description = format!("uninstall failed: {}", failures.join("; "));
    ReleaseStatus::Failed
  };
  storage.update(&record)?;

  info!(
    release = %request.release_name,
    deleted = deleted.len(),
    kept = kept.len(),
    %status,
    "uninstall finished"
  );

  Ok(UninstallSummary {
    deleted,
    kept: kept.iter().map(|r| r.id().clone()).collect(),
    failures,
    status,
  })
}

/// Land the record in a terminal failed status; the original error is
/// what the caller sees, so a storage failure here is only logged.
fn mark_failed(storage: &dyn ReleaseStorage, record: &mut Release, cause: &ActionError) {
  record.info.status = ReleaseStatus::Failed;
  record.info.description = format!("uninstall failed: {cause}");
  if let Err(e) = storage.update(record) {
    warn!(error = %e, "failed to persist failed release status");
  }
}

fn hook_resources(docs: &[String], release_name: &str, namespace: &str) -> Result<Vec<Resource>, ActionError> {
  let mut hooks = Vec::new();
  for doc in docs {
    let value: serde_yaml::Value = serde_yaml::from_str(doc).map_err(crate::resource::ResourceError::from)?;
    hooks.push(Resource::from_rendered_doc(value)?.into_owned(release_name, namespace)?);
  }
  Ok(hooks)
}

/// Create and await the hooks of one delete-lifecycle event, then remove
/// the ones whose delete policy says so.
async fn run_hooks(
  client: &dyn ClusterClient,
  hooks: &[Resource],
  event: HookEvent,
  config: &ExecuteConfig,
) -> Result<(), ActionError> {
  let selected: Vec<&Resource> = hooks.iter().filter(|h| h.meta().has_hook_event(event)).collect();
  if selected.is_empty() {
    return Ok(());
  }

  let resources: Vec<Resource> = selected.iter().map(|&r| r.clone()).collect();
  let results = client.create(&resources).await;
  if let Some(e) = batch_failures(&results).first() {
    return Err(ActionError::Cluster(crate::kube::ClusterError::Apply {
      id: results
        .iter()
        .find(|(_, r)| r.is_err())
        .map(|(id, _)| id.clone())
        .unwrap_or_else(|| resources[0].id().clone()),
      message: e.to_string(),
    }));
  }

  let ids: Vec<ResourceId> = resources.iter().map(|r| r.id().clone()).collect();
  if config.wait_ready {
    client.wait_ready(&ids, config.wait_timeout).await?;
  }

  let cleanup: Vec<ResourceId> = selected
    .iter()
    .filter(|h| h.meta().has_delete_policy(DeletePolicy::HookSucceeded))
    .map(|h| h.id().clone())
    .collect();
  if !cleanup.is_empty() {
    for (id, result) in client.delete(&cleanup).await {
      if let Err(e) = result {
        warn!(resource = %id, error = %e, "hook deletion failed; continuing");
      }
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use serde_yaml::Value;

  use crate::depend::StaticTypeMapper;
  use crate::exec::Executor;
  use crate::kube::FakeCluster;
  use crate::render::{RenderedDocument, StaticRenderer};
  use crate::storage::MemoryStorage;

  use super::super::deploy::{DeployRequest, deploy};
  use super::*;

  const CM: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app\n  namespace: default\n";
  const KEPT: &str = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: pinned\n  namespace: default\n  annotations:\n    capstan.io/resource-policy: keep\n";

  async fn deploy_chart(cluster: &FakeCluster, storage: &MemoryStorage, docs: &[&str]) {
    let r = StaticRenderer::new(
      "webchart",
      "1.0.0",
      docs
        .iter()
        .enumerate()
        .map(|(i, yaml)| RenderedDocument {
          path: format!("templates/{i}.yaml"),
          yaml: yaml.to_string(),
        })
        .collect(),
    );
    deploy(
      cluster,
      storage,
      &StaticTypeMapper::with_builtins(),
      Executor::never_shutdown(),
      DeployRequest {
        release_name: "web".to_string(),
        namespace: "default".to_string(),
        renderer: &r,
        values: Value::Null,
        config: ExecuteConfig::default(),
        report_path: None,
      },
    )
    .await
    .unwrap();
  }

  fn request() -> UninstallRequest {
    UninstallRequest {
      release_name: "web".to_string(),
      namespace: "default".to_string(),
      config: ExecuteConfig::default(),
    }
  }

  #[tokio::test]
  async fn uninstall_deletes_tracked_resources_and_marks_record() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    deploy_chart(&cluster, &storage, &[CM]).await;
    assert_eq!(cluster.object_count(), 1);

    let summary = uninstall(&cluster, &storage, request()).await.unwrap();
    assert_eq!(summary.status, ReleaseStatus::Uninstalled);
    assert_eq!(summary.deleted.len(), 1);
    assert_eq!(cluster.object_count(), 0);
    assert_eq!(storage.get("web", 1).unwrap().info.status, ReleaseStatus::Uninstalled);
  }

  #[tokio::test]
  async fn keep_policy_survives_uninstall() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    deploy_chart(&cluster, &storage, &[CM, KEPT]).await;

    let summary = uninstall(&cluster, &storage, request()).await.unwrap();
    assert_eq!(summary.kept.len(), 1);
    assert_eq!(summary.kept[0].name, "pinned");
    assert_eq!(cluster.object_count(), 1);
  }

  #[tokio::test]
  async fn failed_deletion_marks_release_failed() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    deploy_chart(&cluster, &storage, &[CM]).await;
    cluster.fail_delete_of("app");

    let summary = uninstall(&cluster, &storage, request()).await.unwrap();
    assert_eq!(summary.status, ReleaseStatus::Failed);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(storage.get("web", 1).unwrap().info.status, ReleaseStatus::Failed);
  }

  #[tokio::test]
  async fn failed_delete_hook_lands_record_in_failed_status() {
    const HOOK: &str = "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: teardown\n  namespace: default\n  annotations:\n    capstan.io/hook: pre-delete\n";
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    deploy_chart(&cluster, &storage, &[CM, HOOK]).await;
    cluster.fail_create_of("teardown");

    let err = uninstall(&cluster, &storage, request()).await.unwrap_err();
    assert!(matches!(err, ActionError::Cluster(_)));

    let record = storage.get("web", 1).unwrap();
    assert_eq!(record.info.status, ReleaseStatus::Failed);
    assert!(record.info.description.contains("uninstall failed"));
    // The tracked resource was never deleted.
    let tracked = crate::resource::ResourceId::from_api_version("v1", "ConfigMap", Some("default"), "app");
    assert!(cluster.get_doc(&tracked).is_some());
  }

  #[tokio::test]
  async fn uninstall_without_deployed_release_is_not_found() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    let err = uninstall(&cluster, &storage, request()).await.unwrap_err();
    assert!(matches!(
      err,
      ActionError::Storage(StorageError::ReleaseNotFound { .. })
    ));
  }
}
