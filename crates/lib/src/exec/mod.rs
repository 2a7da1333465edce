//! Plan execution: the only layer that mutates cluster and storage.
//!
//! Phases run strictly in order, stages strictly in order within a phase.
//! After every completed stage the release checkpoint is persisted before
//! advancing; a crashed deploy resumes past checkpointed stages instead of
//! re-running them. The release record always ends in a terminal status.

pub mod report;

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::kube::{BatchResult, ClusterClient, ClusterError, UpdateOptions};
use crate::plan::{CleanupRefs, DeployPlan, Operation, PhaseKind, PlannedStage};
use crate::release::{Checkpoint, Release};
use crate::resource::{Resource, ResourceId};
use crate::storage::{ReleaseStorage, StorageError};

pub use report::{ActionReport, DeployReport, PhaseReport, ReportStatus, StageReport};

/// Errors that terminate execution.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// A stage's apply or wait failed; cleanup errors ride along with the
  /// root cause instead of replacing it.
  #[error("stage {stage} failed: {source}{}", render_cleanup(.cleanup_errors))]
  StageFailed {
    stage: String,
    source: ClusterError,
    cleanup_errors: Vec<String>,
  },

  #[error("deploy cancelled before stage {stage}")]
  Cancelled { stage: String },

  #[error(transparent)]
  Storage(#[from] StorageError),
}

fn render_cleanup(errors: &[String]) -> String {
  if errors.is_empty() {
    String::new()
  } else {
    format!("; cleanup errors: {}", errors.join("; "))
  }
}

/// Execution tuning, threaded in from the caller.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Readiness timeout per stage.
  pub wait_timeout: Duration,
  /// Block on readiness of applied resources at stage boundaries.
  pub wait_ready: bool,
  /// Block on external dependencies before applying a stage.
  pub wait_external: bool,
  /// Delete resources created in a failing stage.
  pub cleanup_on_fail: bool,
  /// Allow delete+recreate on immutable-field changes.
  pub force: bool,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      wait_timeout: Duration::from_secs(300),
      wait_ready: true,
      wait_external: true,
      cleanup_on_fail: false,
      force: false,
    }
  }
}

/// Report plus the failure that stopped execution, if any. The report is
/// always present so the caller can persist it regardless of outcome.
#[derive(Debug)]
pub struct ExecutionOutcome {
  pub report: DeployReport,
  pub release: Release,
  pub failure: Option<ExecuteError>,
}

impl ExecutionOutcome {
  pub fn is_success(&self) -> bool {
    self.failure.is_none()
  }
}

/// Drives one plan to completion against cluster and storage.
pub struct Executor<'a> {
  client: &'a dyn ClusterClient,
  storage: &'a dyn ReleaseStorage,
  config: ExecuteConfig,
  shutdown: watch::Receiver<bool>,
  /// Ids created by the stage currently running, for cleanup-on-fail.
  last_created: Vec<ResourceId>,
}

impl<'a> Executor<'a> {
  pub fn new(
    client: &'a dyn ClusterClient,
    storage: &'a dyn ReleaseStorage,
    config: ExecuteConfig,
    shutdown: watch::Receiver<bool>,
  ) -> Self {
    Self {
      client,
      storage,
      config,
      shutdown,
      last_created: Vec::new(),
    }
  }

  /// A shutdown receiver that never fires; the closed channel is treated
  /// as "no cancellation requested".
  pub fn never_shutdown() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
  }

  /// Execute the plan. Consumes the pending release record and returns it
  /// in its terminal status alongside the report.
  pub async fn execute(
    &mut self,
    plan: &DeployPlan,
    cleanup: &CleanupRefs,
    mut release: Release,
    unsupported: Vec<ResourceId>,
  ) -> ExecutionOutcome {
    let mut report = DeployReport::started(&release.name, &release.namespace, release.revision);
    report.unsupported = unsupported.iter().map(ToString::to_string).collect();

    let resume_from = release.checkpoint;
    if let Some(cp) = resume_from {
      info!(phase = cp.phase, stage = cp.stage, "resuming from checkpoint");
    }

    for (phase_index, phase) in plan.phases.iter().enumerate() {
      let mut phase_report = PhaseReport {
        phase: phase.kind.to_string(),
        stages: Vec::new(),
      };

      for (stage_index, stage) in phase.stages.iter().enumerate() {
        if resumed_past(resume_from, phase_index, stage_index) {
          phase_report.stages.push(StageReport {
            name: stage.name.clone(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            actions: Vec::new(),
            resumed_past: true,
          });
          continue;
        }

        if *self.shutdown.borrow() {
          let failure = ExecuteError::Cancelled {
            stage: stage.name.clone(),
          };
          release.fail(&failure.to_string());
          if let Err(e) = self.storage.update(&release) {
            warn!(error = %e, "failed to persist cancelled release status");
          }
          report.phases.push(phase_report);
          report.finish(ReportStatus::Cancelled, Some(failure.to_string()));
          return ExecutionOutcome {
            report,
            release,
            failure: Some(failure),
          };
        }

        let started_at = Utc::now();
        let mut actions = Vec::new();
        let best_effort = phase.kind == PhaseKind::OrphanCleanup;
        let result = self.run_stage(stage, &mut release, &mut actions, best_effort).await;

        phase_report.stages.push(StageReport {
          name: stage.name.clone(),
          started_at,
          finished_at: Utc::now(),
          actions,
          resumed_past: false,
        });

        if let Err(failure) = result {
          let failure = self.finalize_failure(failure, stage, cleanup, &mut phase_report).await;
          release.fail(&failure.to_string());
          if let Err(e) = self.storage.update(&release) {
            error!(error = %e, "failed to persist failed release status");
          }
          report.phases.push(phase_report);
          report.finish(ReportStatus::Failed, Some(failure.to_string()));
          return ExecutionOutcome {
            report,
            release,
            failure: Some(failure),
          };
        }

        // Durable progress marker; a restart resumes after this stage.
        // From Promote on, the record is in its terminal deployed state
        // and the checkpoint stays cleared.
        if !matches!(phase.kind, PhaseKind::Promote | PhaseKind::OrphanCleanup) {
          release.checkpoint = Some(Checkpoint {
            phase: phase_index,
            stage: stage_index,
          });
          if phase.kind != PhaseKind::Registration {
            if let Err(e) = self.storage.update(&release) {
              let failure = ExecuteError::Storage(e);
              report.phases.push(phase_report);
              report.finish(ReportStatus::Failed, Some(failure.to_string()));
              return ExecutionOutcome {
                report,
                release,
                failure: Some(failure),
              };
            }
          }
        }
      }

      report.phases.push(phase_report);
    }

    self.delete_best_effort(&cleanup.succeeded_hooks, &mut report).await;

    report.finish(ReportStatus::Succeeded, None);
    info!(
      release = %release.name,
      namespace = %release.namespace,
      revision = release.revision,
      "deploy succeeded"
    );
    ExecutionOutcome {
      report,
      release,
      failure: None,
    }
  }

  async fn run_stage(
    &mut self,
    stage: &PlannedStage,
    release: &mut Release,
    actions: &mut Vec<ActionReport>,
    best_effort: bool,
  ) -> Result<(), ExecuteError> {
    self.last_created.clear();

    if self.config.wait_external && !stage.external_deps.is_empty() {
      let ids: Vec<ResourceId> = stage.external_deps.iter().map(|d| d.target.clone()).collect();
      info!(stage = %stage.name, count = ids.len(), "waiting for external dependencies");
      self.wait_cancellable(&ids, stage).await?;
    }

    for op in &stage.operations {
      match op {
        Operation::CreateReleaseRecord => {
          match self.storage.create(release) {
            Ok(()) => {
              info!(release = %release.name, revision = release.revision, "release record created");
            }
            // A crash before the first checkpoint leaves the record behind;
            // re-registering is an update, not a duplicate.
            Err(StorageError::AlreadyExists { .. }) => self.storage.update(release)?,
            Err(e) => return Err(e.into()),
          }
        }
        Operation::UpdateReleaseRecord => {
          self.promote(release).await?;
        }
        Operation::Create(resource) => {
          let results = self.client.create(std::slice::from_ref(resource)).await;
          record_batch(&results, "create", actions);
          take_applied(&results, &mut self.last_created);
          fail_on_batch_error(results, stage, best_effort)?;
        }
        Operation::Update(resource) => {
          let options = UpdateOptions {
            force: self.config.force,
            ..UpdateOptions::default()
          };
          let results = self.client.update(std::slice::from_ref(resource), options).await;
          record_batch(&results, "update", actions);
          fail_on_batch_error(results, stage, best_effort)?;
        }
        Operation::Recreate(resource) => {
          let results = self.recreate(resource).await;
          record_batch(&results, "recreate", actions);
          take_applied(&results, &mut self.last_created);
          fail_on_batch_error(results, stage, best_effort)?;
        }
        Operation::Delete(id) => {
          let results = self.client.delete(std::slice::from_ref(id)).await;
          record_batch(&results, "delete", actions);
          if best_effort {
            for (id, result) in &results {
              if let Err(e) = result {
                warn!(resource = %id, error = %e, "orphan deletion failed; continuing");
              }
            }
          } else {
            fail_on_batch_error(results, stage, best_effort)?;
          }
        }
      }
    }

    if self.config.wait_ready && stage.wait_ready {
      let ids = applied_or_updated(stage);
      if !ids.is_empty() {
        self.wait_cancellable(&ids, stage).await?;
      }
    }
    Ok(())
  }

  async fn recreate(&self, resource: &Resource) -> BatchResult {
    let id = resource.id().clone();
    let deleted = self.client.delete(std::slice::from_ref(&id)).await;
    if let Some((_, Err(e))) = deleted.into_iter().next() {
      return vec![(id, Err(e))];
    }
    self.client.create(std::slice::from_ref(resource)).await
  }

  /// Promote this release and supersede whatever was deployed before it.
  async fn promote(&self, release: &mut Release) -> Result<(), ExecuteError> {
    let mut first_deployed = None;
    for mut previous in self.storage.deployed_all(&release.name)? {
      if previous.revision == release.revision {
        continue;
      }
      first_deployed = first_deployed.or(previous.info.first_deployed);
      previous.supersede();
      self.storage.update(&previous)?;
      info!(revision = previous.revision, "previous release superseded");
    }
    release.promote(Utc::now(), first_deployed);
    self.storage.update(release)?;
    Ok(())
  }

  async fn wait_cancellable(&mut self, ids: &[ResourceId], stage: &PlannedStage) -> Result<(), ExecuteError> {
    let mut shutdown = self.shutdown.clone();
    tokio::select! {
      result = self.client.wait_ready(ids, self.config.wait_timeout) => {
        result.map_err(|source| ExecuteError::StageFailed {
          stage: stage.name.clone(),
          source,
          cleanup_errors: Vec::new(),
        })
      }
      // A dropped sender disables the branch rather than cancelling.
      Ok(_) = shutdown.wait_for(|stop| *stop) => Err(ExecuteError::Cancelled {
        stage: stage.name.clone(),
      }),
    }
  }

  /// Compose the stage failure with best-effort cleanup, never losing the
  /// root cause.
  async fn finalize_failure(
    &mut self,
    failure: ExecuteError,
    stage: &PlannedStage,
    cleanup: &CleanupRefs,
    phase_report: &mut PhaseReport,
  ) -> ExecuteError {
    let mut cleanup_errors = Vec::new();

    if self.config.cleanup_on_fail && !self.last_created.is_empty() {
      let created = std::mem::take(&mut self.last_created);
      warn!(stage = %stage.name, count = created.len(), "cleaning up resources created in failed stage");
      let results = self.client.delete(&created).await;
      if let Some(stage_report) = phase_report.stages.last_mut() {
        record_batch(&results, "cleanup-delete", &mut stage_report.actions);
      }
      cleanup_errors.extend(results.iter().filter_map(|(_, r)| r.as_ref().err().map(ToString::to_string)));
    }

    if !cleanup.failed_hooks.is_empty() {
      let results = self.client.delete(&cleanup.failed_hooks).await;
      cleanup_errors.extend(results.iter().filter_map(|(_, r)| r.as_ref().err().map(ToString::to_string)));
    }

    match failure {
      ExecuteError::StageFailed {
        stage,
        source,
        cleanup_errors: mut existing,
      } => {
        existing.extend(cleanup_errors);
        ExecuteError::StageFailed {
          stage,
          source,
          cleanup_errors: existing,
        }
      }
      other => other,
    }
  }

  async fn delete_best_effort(&self, ids: &[ResourceId], report: &mut DeployReport) {
    if ids.is_empty() {
      return;
    }
    let results = self.client.delete(ids).await;
    for (id, result) in &results {
      if let Err(e) = result {
        warn!(resource = %id, error = %e, "hook deletion failed; continuing");
      }
    }
    if let Some(phase) = report.phases.last_mut() {
      if let Some(stage) = phase.stages.last_mut() {
        record_batch(&results, "delete", &mut stage.actions);
      }
    }
  }
}

fn resumed_past(checkpoint: Option<Checkpoint>, phase: usize, stage: usize) -> bool {
  match checkpoint {
    Some(cp) => (phase, stage) <= (cp.phase, cp.stage),
    None => false,
  }
}

fn record_batch(results: &BatchResult, verb: &str, actions: &mut Vec<ActionReport>) {
  for (id, result) in results {
    match result {
      Ok(()) => actions.push(ActionReport::ok(id, verb)),
      Err(e) => actions.push(ActionReport::failed(id, verb, e)),
    }
  }
}

fn take_applied(results: &BatchResult, applied: &mut Vec<ResourceId>) {
  applied.extend(results.iter().filter(|(_, r)| r.is_ok()).map(|(id, _)| id.clone()));
}

fn fail_on_batch_error(results: BatchResult, stage: &PlannedStage, best_effort: bool) -> Result<(), ExecuteError> {
  if best_effort {
    return Ok(());
  }
  for (_, result) in results {
    if let Err(source) = result {
      return Err(ExecuteError::StageFailed {
        stage: stage.name.clone(),
        source,
        cleanup_errors: Vec::new(),
      });
    }
  }
  Ok(())
}

fn applied_or_updated(stage: &PlannedStage) -> Vec<ResourceId> {
  stage
    .operations
    .iter()
    .filter_map(|op| match op {
      Operation::Create(r) | Operation::Update(r) | Operation::Recreate(r) => Some(r.id().clone()),
      _ => None,
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use crate::classify::Classification;
  use crate::depend::StaticTypeMapper;
  use crate::kube::FakeCluster;
  use crate::plan::{PlanInput, build};
  use crate::release::ReleaseStatus;
  use crate::release::history::DeployKind;
  use crate::stage::WeightedSplitter;
  use crate::storage::{MemoryStorage, ReleaseStorage};

  use super::*;

  fn configmap(name: &str) -> Resource {
    Resource::from_rendered_doc(
      serde_yaml::from_str(&format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  namespace: default\n"
      ))
      .unwrap(),
    )
    .unwrap()
    .into_owned("web", "default")
    .unwrap()
  }

  fn pending_release(revision: u32, kind: DeployKind) -> Release {
    Release::new_pending(
      "web",
      "default",
      revision,
      "webchart",
      "1.0.0",
      serde_yaml::Value::Null,
      String::new(),
      Vec::new(),
      crate::release::history::pending_status(kind),
    )
  }

  fn plan_for(classification: Classification, previous: Vec<Resource>) -> (DeployPlan, CleanupRefs) {
    build(PlanInput {
      deploy_kind: DeployKind::Upgrade,
      classification,
      previous,
      namespace: "default".to_string(),
      splitter: &WeightedSplitter,
      mapper: &StaticTypeMapper::with_builtins(),
    })
    .unwrap()
  }

  async fn run(
    cluster: &FakeCluster,
    storage: &MemoryStorage,
    config: ExecuteConfig,
    plan: &DeployPlan,
    cleanup: &CleanupRefs,
    release: Release,
  ) -> ExecutionOutcome {
    let mut executor = Executor::new(cluster, storage, config, Executor::never_shutdown());
    executor.execute(plan, cleanup, release, Vec::new()).await
  }

  #[tokio::test]
  async fn successful_install_creates_and_promotes() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    classification.general.non_existing.push(configmap("a"));
    classification.general.non_existing.push(configmap("b"));
    let (plan, cleanup) = plan_for(classification, Vec::new());

    let outcome = run(&cluster, &storage, ExecuteConfig::default(), &plan, &cleanup, pending_release(1, DeployKind::Initial)).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report.status, ReportStatus::Succeeded);
    assert_eq!(cluster.object_count(), 2);
    assert_eq!(storage.get("web", 1).unwrap().info.status, ReleaseStatus::Deployed);
    assert!(outcome.release.checkpoint.is_none());
  }

  #[tokio::test]
  async fn stored_deployed_record_carries_no_checkpoint() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    classification.general.non_existing.push(configmap("a"));
    // Previous resources force an orphan-cleanup phase after Promote.
    cluster.seed(configmap("old").doc().clone());
    let (plan, cleanup) = plan_for(classification, vec![configmap("old")]);

    let outcome = run(&cluster, &storage, ExecuteConfig::default(), &plan, &cleanup, pending_release(1, DeployKind::Initial)).await;
    assert!(outcome.is_success());

    let stored = storage.get("web", 1).unwrap();
    assert_eq!(stored.info.status, ReleaseStatus::Deployed);
    assert!(stored.checkpoint.is_none());
  }

  #[tokio::test]
  async fn up_to_date_plan_performs_zero_mutations() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    classification.general.up_to_date.push(configmap("a"));
    let (plan, cleanup) = plan_for(classification, Vec::new());
    assert!(plan.is_cluster_noop());

    let outcome = run(&cluster, &storage, ExecuteConfig::default(), &plan, &cleanup, pending_release(1, DeployKind::Initial)).await;
    assert!(outcome.is_success());
    assert_eq!(cluster.mutation_count(), 0);
  }

  #[tokio::test]
  async fn mid_stage_failure_keeps_committed_resources() {
    let cluster = FakeCluster::new();
    cluster.fail_create_of("b");
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    for name in ["a", "b", "c"] {
      classification.general.non_existing.push(configmap(name));
    }
    let (plan, cleanup) = plan_for(classification, Vec::new());

    let outcome = run(&cluster, &storage, ExecuteConfig::default(), &plan, &cleanup, pending_release(1, DeployKind::Initial)).await;
    let failure = outcome.failure.expect("deploy must fail");
    assert!(failure.to_string().contains("apply failed"));
    // "a" was applied before "b" failed and stays without cleanup-on-fail.
    assert!(cluster.contains(configmap("a").id()));
    assert!(!cluster.contains(configmap("b").id()));
    assert_eq!(storage.get("web", 1).unwrap().info.status, ReleaseStatus::Failed);
  }

  #[tokio::test]
  async fn cleanup_on_fail_deletes_created_resources() {
    let cluster = FakeCluster::new();
    cluster.fail_create_of("b");
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    for name in ["a", "b"] {
      classification.general.non_existing.push(configmap(name));
    }
    let (plan, cleanup) = plan_for(classification, Vec::new());

    let config = ExecuteConfig {
      cleanup_on_fail: true,
      ..ExecuteConfig::default()
    };
    let outcome = run(&cluster, &storage, config, &plan, &cleanup, pending_release(1, DeployKind::Initial)).await;
    assert!(!outcome.is_success());
    assert!(!cluster.contains(configmap("a").id()));
  }

  #[tokio::test]
  async fn cleanup_errors_never_replace_the_root_cause() {
    let cluster = FakeCluster::new();
    cluster.fail_create_of("b");
    cluster.fail_delete_of("a");
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    for name in ["a", "b"] {
      classification.general.non_existing.push(configmap(name));
    }
    let (plan, cleanup) = plan_for(classification, Vec::new());

    let config = ExecuteConfig {
      cleanup_on_fail: true,
      ..ExecuteConfig::default()
    };
    let outcome = run(&cluster, &storage, config, &plan, &cleanup, pending_release(1, DeployKind::Initial)).await;
    let message = outcome.failure.unwrap().to_string();
    assert!(message.contains("apply failed"));
    assert!(message.contains("cleanup errors"));
  }

  #[tokio::test]
  async fn orphan_deletion_failure_does_not_fail_the_deploy() {
    let cluster = FakeCluster::new();
    cluster.seed(configmap("y").doc().clone());
    cluster.fail_delete_of("y");
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    classification.general.up_to_date.push(configmap("x"));
    let (plan, cleanup) = plan_for(classification, vec![configmap("x"), configmap("y")]);

    let outcome = run(&cluster, &storage, ExecuteConfig::default(), &plan, &cleanup, pending_release(2, DeployKind::Upgrade)).await;
    assert!(outcome.is_success());
    assert!(cluster.contains(configmap("y").id()));
  }

  #[tokio::test]
  async fn orphans_deleted_after_success() {
    let cluster = FakeCluster::new();
    cluster.seed(configmap("x").doc().clone());
    cluster.seed(configmap("y").doc().clone());
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    classification.general.up_to_date.push(configmap("x"));
    let (plan, cleanup) = plan_for(classification, vec![configmap("x"), configmap("y")]);

    let outcome = run(&cluster, &storage, ExecuteConfig::default(), &plan, &cleanup, pending_release(2, DeployKind::Upgrade)).await;
    assert!(outcome.is_success());
    assert!(cluster.contains(configmap("x").id()));
    assert!(!cluster.contains(configmap("y").id()));
  }

  #[tokio::test]
  async fn promote_supersedes_previous_deployed_release() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    let mut previous = pending_release(1, DeployKind::Initial);
    previous.promote(chrono::Utc::now(), None);
    let first_deployed = previous.info.first_deployed;
    storage.create(&previous).unwrap();

    let mut classification = Classification::default();
    classification.general.non_existing.push(configmap("a"));
    let (plan, cleanup) = plan_for(classification, Vec::new());

    let outcome = run(&cluster, &storage, ExecuteConfig::default(), &plan, &cleanup, pending_release(2, DeployKind::Upgrade)).await;
    assert!(outcome.is_success());
    assert_eq!(storage.get("web", 1).unwrap().info.status, ReleaseStatus::Superseded);
    let current = storage.get("web", 2).unwrap();
    assert_eq!(current.info.status, ReleaseStatus::Deployed);
    assert_eq!(current.info.first_deployed, first_deployed);
  }

  #[tokio::test]
  async fn pre_set_shutdown_cancels_before_mutating() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    classification.general.non_existing.push(configmap("a"));
    let (plan, cleanup) = plan_for(classification, Vec::new());

    let (tx, rx) = watch::channel(true);
    let mut executor = Executor::new(&cluster, &storage, ExecuteConfig::default(), rx);
    let outcome = executor
      .execute(&plan, &cleanup, pending_release(1, DeployKind::Initial), Vec::new())
      .await;
    drop(tx);

    assert!(matches!(outcome.failure, Some(ExecuteError::Cancelled { .. })));
    assert_eq!(outcome.report.status, ReportStatus::Cancelled);
    assert_eq!(cluster.mutation_count(), 0);
  }

  #[tokio::test]
  async fn checkpoint_resume_skips_completed_stages() {
    let cluster = FakeCluster::new();
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    classification.general.non_existing.push(configmap("a"));
    classification.general.non_existing.push(configmap("b"));
    let (plan, cleanup) = plan_for(classification, Vec::new());

    // Pretend registration and the deploy stage already completed.
    let mut release = pending_release(1, DeployKind::Initial);
    storage.create(&release).unwrap();
    release.checkpoint = Some(Checkpoint { phase: 1, stage: 0 });
    storage.update(&release).unwrap();

    let outcome = run(&cluster, &storage, ExecuteConfig::default(), &plan, &cleanup, release).await;
    assert!(outcome.is_success());
    // The deploy stage was skipped: nothing was created, only promotion ran.
    assert_eq!(cluster.object_count(), 0);
    assert_eq!(storage.get("web", 1).unwrap().info.status, ReleaseStatus::Deployed);
    let skipped: Vec<&StageReport> = outcome
      .report
      .phases
      .iter()
      .flat_map(|p| &p.stages)
      .filter(|s| s.resumed_past)
      .collect();
    assert_eq!(skipped.len(), 2);
  }

  #[tokio::test]
  async fn wait_timeout_fails_the_stage() {
    let cluster = FakeCluster::new();
    cluster.mark_never_ready("a");
    let storage = MemoryStorage::new();
    let mut classification = Classification::default();
    classification.general.non_existing.push(configmap("a"));
    let (plan, cleanup) = plan_for(classification, Vec::new());

    let config = ExecuteConfig {
      wait_timeout: Duration::from_millis(50),
      ..ExecuteConfig::default()
    };
    let outcome = run(&cluster, &storage, config, &plan, &cleanup, pending_release(1, DeployKind::Initial)).await;
    let failure = outcome.failure.unwrap();
    assert!(matches!(
      failure,
      ExecuteError::StageFailed {
        source: ClusterError::Timeout { .. },
        ..
      }
    ));
    assert_eq!(storage.get("web", 1).unwrap().info.status, ReleaseStatus::Failed);
  }
}
