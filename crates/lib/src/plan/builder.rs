//! Plan construction from classified resources, release history and the
//! splitting policy.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::classify::{Buckets, Classification};
use crate::depend::{DependError, TypeMapper, resolve_refs};
use crate::release::history::DeployKind;
use crate::resource::{DeletePolicy, HookEvent, Resource, ResourceId};
use crate::stage::{StageError, StageSplitter};

use super::{DeployPlan, Operation, Phase, PhaseKind, PlannedStage};

/// Errors building a plan.
#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Stage(#[from] StageError),

  #[error(transparent)]
  Depend(#[from] DependError),
}

/// Everything the builder reads; it never performs I/O itself.
pub struct PlanInput<'a> {
  pub deploy_kind: DeployKind,
  pub classification: Classification,
  /// Resources of the last deployed revision, for orphan computation.
  pub previous: Vec<Resource>,
  pub namespace: String,
  pub splitter: &'a dyn StageSplitter,
  pub mapper: &'a dyn TypeMapper,
}

/// References the executor needs to finalize a failed deploy symmetrically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupRefs {
  /// Hooks deleted when the deploy fails (delete policy `hook-failed`).
  pub failed_hooks: Vec<ResourceId>,
  /// Hooks deleted after the deploy succeeds (delete policy
  /// `hook-succeeded`).
  pub succeeded_hooks: Vec<ResourceId>,
}

/// What a classified resource needs done to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
  Create,
  Update,
  Recreate,
}

impl OpKind {
  fn into_operation(self, resource: Resource) -> Operation {
    match self {
      OpKind::Create => Operation::Create(resource),
      OpKind::Update => Operation::Update(resource),
      OpKind::Recreate => Operation::Recreate(resource),
    }
  }
}

/// Build the deploy plan. Phase order is fixed: registration, preloaded
/// CRDs, pre hooks, main stages, post hooks, promotion, orphan cleanup.
pub fn build(input: PlanInput<'_>) -> Result<(DeployPlan, CleanupRefs), PlanError> {
  let PlanInput {
    deploy_kind,
    classification,
    previous,
    namespace,
    splitter,
    mapper,
  } = input;

  let (pre_event, post_event) = hook_events_for(deploy_kind);
  let desired_ids = all_desired_ids(&classification);

  let mut phases = Vec::new();

  phases.push(Phase {
    kind: PhaseKind::Registration,
    stages: vec![PlannedStage {
      name: "registration-0".to_string(),
      operations: vec![Operation::CreateReleaseRecord],
      external_deps: Vec::new(),
      wait_ready: false,
    }],
  });

  let crd_ops = bucket_ops(&classification.crds, false);
  let crd_stages = planned_stages(
    PhaseKind::Crds,
    pool_resources(&classification.crds),
    &crd_ops,
    splitter,
    mapper,
    &namespace,
  )?;
  if !crd_stages.is_empty() {
    phases.push(Phase {
      kind: PhaseKind::Crds,
      stages: crd_stages,
    });
  }

  let hook_ops = bucket_ops(&classification.hooks, true);
  let pre_hooks = hooks_for_event(&classification.hooks, pre_event);
  let pre_stages = planned_stages(PhaseKind::PreHooks, pre_hooks, &hook_ops, splitter, mapper, &namespace)?;
  if !pre_stages.is_empty() {
    phases.push(Phase {
      kind: PhaseKind::PreHooks,
      stages: pre_stages,
    });
  }

  let general_ops = bucket_ops(&classification.general, false);
  let deploy_stages = planned_stages(
    PhaseKind::Deploy,
    pool_resources(&classification.general),
    &general_ops,
    splitter,
    mapper,
    &namespace,
  )?;
  if !deploy_stages.is_empty() {
    phases.push(Phase {
      kind: PhaseKind::Deploy,
      stages: deploy_stages,
    });
  }

  let post_hooks = hooks_for_event(&classification.hooks, post_event);
  let post_stages = planned_stages(PhaseKind::PostHooks, post_hooks, &hook_ops, splitter, mapper, &namespace)?;
  if !post_stages.is_empty() {
    phases.push(Phase {
      kind: PhaseKind::PostHooks,
      stages: post_stages,
    });
  }

  phases.push(Phase {
    kind: PhaseKind::Promote,
    stages: vec![PlannedStage {
      name: "promote-0".to_string(),
      operations: vec![Operation::UpdateReleaseRecord],
      external_deps: Vec::new(),
      wait_ready: false,
    }],
  });

  let orphans = orphan_deletes(&previous, &desired_ids);
  if !orphans.is_empty() {
    phases.push(Phase {
      kind: PhaseKind::OrphanCleanup,
      stages: vec![PlannedStage {
        name: "orphan-cleanup-0".to_string(),
        operations: orphans,
        external_deps: Vec::new(),
        wait_ready: false,
      }],
    });
  }

  let cleanup = cleanup_refs(&classification.hooks, pre_event, post_event);
  let plan = DeployPlan { phases };
  debug!(
    phases = plan.phases.len(),
    operations = plan.operation_count(),
    kind = ?deploy_kind,
    "deploy plan built"
  );
  Ok((plan, cleanup))
}

fn hook_events_for(kind: DeployKind) -> (HookEvent, HookEvent) {
  match kind {
    DeployKind::Initial | DeployKind::Install => (HookEvent::PreInstall, HookEvent::PostInstall),
    DeployKind::Upgrade => (HookEvent::PreUpgrade, HookEvent::PostUpgrade),
    DeployKind::Rollback => (HookEvent::PreRollback, HookEvent::PostRollback),
  }
}

/// All resources of a pool that participate in stage ordering. Unsupported
/// resources are excluded: they are reported, never applied.
fn pool_resources(buckets: &Buckets) -> Vec<Resource> {
  buckets
    .up_to_date
    .iter()
    .chain(&buckets.outdated)
    .chain(&buckets.outdated_immutable)
    .chain(&buckets.non_existing)
    .cloned()
    .collect()
}

/// Map each resource id of a pool to the operation its bucket calls for.
/// Up-to-date resources get none, except hooks whose `before-hook-creation`
/// delete policy forces a recreate on every run.
fn bucket_ops(buckets: &Buckets, hooks: bool) -> BTreeMap<ResourceId, OpKind> {
  let mut ops = BTreeMap::new();
  for r in &buckets.non_existing {
    ops.insert(r.id().clone(), OpKind::Create);
  }
  for r in &buckets.outdated {
    let kind = if r.meta().recreate || (hooks && r.meta().has_delete_policy(DeletePolicy::BeforeHookCreation)) {
      OpKind::Recreate
    } else {
      OpKind::Update
    };
    ops.insert(r.id().clone(), kind);
  }
  for r in &buckets.outdated_immutable {
    ops.insert(r.id().clone(), OpKind::Recreate);
  }
  if hooks {
    for r in &buckets.up_to_date {
      if r.meta().has_delete_policy(DeletePolicy::BeforeHookCreation) {
        ops.insert(r.id().clone(), OpKind::Recreate);
      }
    }
  }
  ops
}

fn hooks_for_event(buckets: &Buckets, event: HookEvent) -> Vec<Resource> {
  pool_resources(buckets)
    .into_iter()
    .filter(|r| r.meta().has_hook_event(event))
    .collect()
}

fn planned_stages(
  kind: PhaseKind,
  resources: Vec<Resource>,
  ops: &BTreeMap<ResourceId, OpKind>,
  splitter: &dyn StageSplitter,
  mapper: &dyn TypeMapper,
  namespace: &str,
) -> Result<Vec<PlannedStage>, PlanError> {
  let mut out = Vec::new();
  for stage in splitter.split(resources, namespace)?.into_vec() {
    let external_deps = resolve_refs(&stage.external_deps, mapper, namespace)?;
    let operations: Vec<Operation> = stage
      .resources
      .into_iter()
      .filter_map(|r| ops.get(r.id()).copied().map(|k| k.into_operation(r)))
      .collect();
    if operations.is_empty() && external_deps.is_empty() {
      continue;
    }
    out.push(PlannedStage {
      name: format!("{kind}-{}", out.len()),
      operations,
      external_deps,
      wait_ready: true,
    });
  }
  Ok(out)
}

/// Resources of the previous deployed revision that the new desired set no
/// longer contains, minus those marked keep-on-delete. Deleted after a
/// successful rollout, in name order.
fn orphan_deletes(previous: &[Resource], desired_ids: &[ResourceId]) -> Vec<Operation> {
  let mut ids: Vec<ResourceId> = previous
    .iter()
    .filter(|r| !r.meta().keep_on_delete)
    .map(|r| r.id().clone())
    .filter(|id| !desired_ids.contains(id))
    .collect();
  ids.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
  ids.dedup();
  ids.into_iter().map(Operation::Delete).collect()
}

fn all_desired_ids(classification: &Classification) -> Vec<ResourceId> {
  let mut ids = Vec::new();
  for buckets in [&classification.crds, &classification.hooks, &classification.general] {
    for pool in [
      &buckets.up_to_date,
      &buckets.outdated,
      &buckets.outdated_immutable,
      &buckets.non_existing,
      &buckets.unsupported,
    ] {
      ids.extend(pool.iter().map(|r| r.id().clone()));
    }
  }
  ids
}

fn cleanup_refs(hooks: &Buckets, pre: HookEvent, post: HookEvent) -> CleanupRefs {
  let mut refs = CleanupRefs::default();
  for r in pool_resources(hooks) {
    if !r.meta().has_hook_event(pre) && !r.meta().has_hook_event(post) {
      continue;
    }
    if r.meta().has_delete_policy(DeletePolicy::HookFailed) {
      refs.failed_hooks.push(r.id().clone());
    }
    if r.meta().has_delete_policy(DeletePolicy::HookSucceeded) {
      refs.succeeded_hooks.push(r.id().clone());
    }
  }
  refs.failed_hooks.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
  refs.succeeded_hooks.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
  refs
}

#[cfg(test)]
mod tests {
  use crate::depend::StaticTypeMapper;
  use crate::stage::WeightedSplitter;

  use super::*;

  fn resource(yaml: &str) -> Resource {
    Resource::from_rendered_doc(serde_yaml::from_str(yaml).unwrap()).unwrap()
  }

  fn configmap(name: &str, weight: i32) -> Resource {
    resource(&format!(
      "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  namespace: default\n  annotations:\n    capstan.io/weight: \"{weight}\"\n"
    ))
  }

  fn build_with(classification: Classification, previous: Vec<Resource>) -> (DeployPlan, CleanupRefs) {
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

  #[test]
  fn phase_order_is_fixed() {
    let mut classification = Classification::default();
    classification.crds.non_existing.push(resource(
      "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: widgets.example.com\n",
    ));
    classification.hooks.non_existing.push(resource(
      "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: pre\n  namespace: default\n  annotations:\n    capstan.io/hook: pre-upgrade\n",
    ));
    classification.hooks.non_existing.push(resource(
      "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: post\n  namespace: default\n  annotations:\n    capstan.io/hook: post-upgrade\n",
    ));
    classification.general.non_existing.push(configmap("app", 0));

    let (plan, _) = build_with(classification, vec![configmap("gone", 0)]);
    let kinds: Vec<PhaseKind> = plan.phases.iter().map(|p| p.kind).collect();
    assert_eq!(
      kinds,
      vec![
        PhaseKind::Registration,
        PhaseKind::Crds,
        PhaseKind::PreHooks,
        PhaseKind::Deploy,
        PhaseKind::PostHooks,
        PhaseKind::Promote,
        PhaseKind::OrphanCleanup,
      ]
    );
  }

  #[test]
  fn weight_groups_and_name_tiebreak() {
    let mut classification = Classification::default();
    for (name, weight) in [("b", -5), ("a", 0), ("c", 0), ("z", 10)] {
      classification.general.non_existing.push(configmap(name, weight));
    }
    let (plan, _) = build_with(classification, Vec::new());

    let deploy = plan.phases.iter().find(|p| p.kind == PhaseKind::Deploy).unwrap();
    let names: Vec<Vec<&str>> = deploy
      .stages
      .iter()
      .map(|s| {
        s.operations
          .iter()
          .map(|op| op.resource_id().unwrap().name.as_str())
          .collect()
      })
      .collect();
    assert_eq!(names, vec![vec!["b"], vec!["a", "c"], vec!["z"]]);
  }

  #[test]
  fn repeated_builds_are_byte_identical() {
    let make = || {
      let mut classification = Classification::default();
      for (name, weight) in [("b", -5), ("a", 0), ("c", 0), ("z", 10)] {
        classification.general.non_existing.push(configmap(name, weight));
      }
      let (plan, _) = build_with(classification, vec![configmap("orphan", 0)]);
      plan.render_text()
    };
    let first = make();
    for _ in 0..9 {
      assert_eq!(make(), first);
    }
  }

  #[test]
  fn dependent_never_precedes_dependency() {
    let dependent = resource(
      "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app\n  namespace: default\n  annotations:\n    cfg.dependency.capstan.io: v1:ConfigMap:base\n",
    );
    let mut classification = Classification::default();
    classification.general.non_existing.push(dependent);
    classification.general.non_existing.push(configmap("base", 0));

    let (plan, _) = build_with(classification, Vec::new());
    let deploy = plan.phases.iter().find(|p| p.kind == PhaseKind::Deploy).unwrap();
    assert_eq!(deploy.stages.len(), 2);
    assert_eq!(deploy.stages[0].operations[0].resource_id().unwrap().name, "base");
    assert_eq!(deploy.stages[1].operations[0].resource_id().unwrap().name, "app");
  }

  #[test]
  fn orphans_deleted_unless_kept() {
    let mut classification = Classification::default();
    classification.general.up_to_date.push(configmap("x", 0));

    let kept = resource(
      "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: pinned\n  namespace: default\n  annotations:\n    capstan.io/resource-policy: keep\n",
    );
    let (plan, _) = build_with(classification, vec![configmap("x", 0), configmap("y", 0), kept]);

    let cleanup = plan.phases.iter().find(|p| p.kind == PhaseKind::OrphanCleanup).unwrap();
    let deleted: Vec<&str> = cleanup.stages[0]
      .operations
      .iter()
      .map(|op| op.resource_id().unwrap().name.as_str())
      .collect();
    assert_eq!(deleted, vec!["y"]);
  }

  #[test]
  fn up_to_date_only_plan_is_cluster_noop() {
    let mut classification = Classification::default();
    classification.general.up_to_date.push(configmap("x", 0));
    let (plan, _) = build_with(classification, Vec::new());
    assert!(plan.is_cluster_noop());
  }

  #[test]
  fn before_hook_creation_recreates_live_hook() {
    let hook = resource(
      "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: migrate\n  namespace: default\n  annotations:\n    capstan.io/hook: pre-upgrade\n    capstan.io/hook-delete-policy: before-hook-creation\n",
    );
    let mut classification = Classification::default();
    classification.hooks.up_to_date.push(hook);

    let (plan, _) = build_with(classification, Vec::new());
    let pre = plan.phases.iter().find(|p| p.kind == PhaseKind::PreHooks).unwrap();
    assert!(matches!(pre.stages[0].operations[0], Operation::Recreate(_)));
  }

  #[test]
  fn cleanup_refs_partition_hooks_by_delete_policy() {
    let hook = |name: &str, policy: &str| {
      resource(&format!(
        "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: {name}\n  namespace: default\n  annotations:\n    capstan.io/hook: pre-upgrade\n    capstan.io/hook-delete-policy: {policy}\n"
      ))
    };
    let mut classification = Classification::default();
    classification.hooks.non_existing.push(hook("fail-away", "hook-failed"));
    classification.hooks.non_existing.push(hook("done-away", "hook-succeeded"));

    let (_, cleanup) = build_with(classification, Vec::new());
    assert_eq!(cleanup.failed_hooks.len(), 1);
    assert_eq!(cleanup.failed_hooks[0].name, "fail-away");
    assert_eq!(cleanup.succeeded_hooks.len(), 1);
    assert_eq!(cleanup.succeeded_hooks[0].name, "done-away");
  }

  #[test]
  fn unknown_external_dependency_type_fails_the_build() {
    let dependent = resource(
      "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: app\n  namespace: default\n  annotations:\n    gw.external-dependency.capstan.io: example.com/v1:Gateway:gw\n",
    );
    let mut classification = Classification::default();
    classification.general.non_existing.push(dependent);

    let err = build(PlanInput {
      deploy_kind: DeployKind::Upgrade,
      classification,
      previous: Vec::new(),
      namespace: "default".to_string(),
      splitter: &WeightedSplitter,
      mapper: &StaticTypeMapper::with_builtins(),
    })
    .unwrap_err();
    assert!(matches!(err, PlanError::Depend(DependError::UnknownType { .. })));
  }
}
