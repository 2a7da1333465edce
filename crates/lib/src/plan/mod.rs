//! Deploy plans: the ordered, inspectable program a deploy executes.
//!
//! A plan is phases in a fixed order, each phase holding ordered stages of
//! operations. Building a plan performs no I/O; repeated builds over
//! identical inputs produce identical plans.

pub mod builder;

use std::fmt::Write as _;

use crate::depend::ExternalDependency;
use crate::resource::{Resource, ResourceId};

pub use builder::{CleanupRefs, PlanError, PlanInput, build};

/// One unit of work inside a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
  Create(Resource),
  Update(Resource),
  /// Delete then create; immutable field changed or recreate requested.
  Recreate(Resource),
  Delete(ResourceId),
  /// Persist the pending release record before anything touches the cluster.
  CreateReleaseRecord,
  /// Promote the release record to deployed and supersede the previous one.
  UpdateReleaseRecord,
}

impl Operation {
  pub fn resource_id(&self) -> Option<&ResourceId> {
    match self {
      Operation::Create(r) | Operation::Update(r) | Operation::Recreate(r) => Some(r.id()),
      Operation::Delete(id) => Some(id),
      Operation::CreateReleaseRecord | Operation::UpdateReleaseRecord => None,
    }
  }

  /// Whether executing this operation mutates the cluster.
  pub fn mutates_cluster(&self) -> bool {
    !matches!(self, Operation::CreateReleaseRecord | Operation::UpdateReleaseRecord)
  }

  pub fn verb(&self) -> &'static str {
    match self {
      Operation::Create(_) => "create",
      Operation::Update(_) => "update",
      Operation::Recreate(_) => "recreate",
      Operation::Delete(_) => "delete",
      Operation::CreateReleaseRecord => "create-release-record",
      Operation::UpdateReleaseRecord => "update-release-record",
    }
  }
}

/// An ordered group of operations with a shared wait boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStage {
  pub name: String,
  pub operations: Vec<Operation>,
  /// Cluster resources outside the release that must exist before this
  /// stage applies.
  pub external_deps: Vec<ExternalDependency>,
  /// Whether to block on readiness of applied resources before advancing.
  pub wait_ready: bool,
}

impl PlannedStage {
  pub fn is_empty(&self) -> bool {
    self.operations.is_empty()
  }
}

/// The fixed vocabulary of phases, in rollout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
  Registration,
  Crds,
  PreHooks,
  Deploy,
  PostHooks,
  Promote,
  OrphanCleanup,
}

impl PhaseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      PhaseKind::Registration => "registration",
      PhaseKind::Crds => "crds",
      PhaseKind::PreHooks => "pre-hooks",
      PhaseKind::Deploy => "deploy",
      PhaseKind::PostHooks => "post-hooks",
      PhaseKind::Promote => "promote",
      PhaseKind::OrphanCleanup => "orphan-cleanup",
    }
  }
}

impl std::fmt::Display for PhaseKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
  pub kind: PhaseKind,
  pub stages: Vec<PlannedStage>,
}

/// The complete deploy program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployPlan {
  pub phases: Vec<Phase>,
}

impl DeployPlan {
  pub fn operation_count(&self) -> usize {
    self.phases.iter().flat_map(|p| &p.stages).map(|s| s.operations.len()).sum()
  }

  /// True when no operation would touch the cluster.
  pub fn is_cluster_noop(&self) -> bool {
    self
      .phases
      .iter()
      .flat_map(|p| &p.stages)
      .flat_map(|s| &s.operations)
      .all(|op| !op.mutates_cluster())
  }

  /// Stable text rendering, one line per operation; used for plan display
  /// and for byte-identity comparison across repeated builds.
  pub fn render_text(&self) -> String {
    let mut out = String::new();
    for phase in &self.phases {
      let _ = writeln!(out, "phase {}", phase.kind);
      for stage in &phase.stages {
        let _ = writeln!(out, "  stage {}", stage.name);
        for dep in &stage.external_deps {
          let _ = writeln!(out, "    wait-external {}", dep.target);
        }
        for op in &stage.operations {
          match op.resource_id() {
            Some(id) => {
              let _ = writeln!(out, "    {} {}", op.verb(), id);
            }
            None => {
              let _ = writeln!(out, "    {}", op.verb());
            }
          }
        }
      }
    }
    out
  }
}
