//! Stage splitting: partitioning resources into an ordered rollout.
//!
//! A stage is a group of resources that can be applied together. Stages are
//! ordered by weight, and a resource with an internal dependency on another
//! in-release resource is pushed to a later stage than its dependency.
//! Splitting is a pure function of its inputs and must be reproducible:
//! equal weights are tie-broken by resource name.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::depend::detect_internal;
use crate::resource::{AnnotatedDependency, Resource, ResourceId};

/// Errors from stage splitting.
#[derive(Debug, Error)]
pub enum StageError {
  /// The internal dependency graph has a cycle; this is a configuration
  /// error and never silently dropped.
  #[error("dependency cycle detected involving {0}")]
  DependencyCycle(ResourceId),
}

/// One ordered unit of rollout.
#[derive(Debug, Clone)]
pub struct Stage {
  /// Smallest annotated weight among the stage's resources (informational;
  /// stage order is positional).
  pub weight: i32,
  /// Desired resources, ordered by name.
  pub resources: Vec<Resource>,
  /// External dependencies collected from member annotations; resolution
  /// happens at plan build time.
  pub external_deps: Vec<AnnotatedDependency>,
}

/// Stages in rollout order.
#[derive(Debug, Clone, Default)]
pub struct SortedStageList {
  stages: Vec<Stage>,
}

impl SortedStageList {
  pub fn iter(&self) -> impl Iterator<Item = &Stage> {
    self.stages.iter()
  }

  pub fn len(&self) -> usize {
    self.stages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }

  pub fn into_vec(self) -> Vec<Stage> {
    self.stages
  }
}

/// Partitioning policy.
pub trait StageSplitter {
  fn split(&self, resources: Vec<Resource>, namespace: &str) -> Result<SortedStageList, StageError>;
}

/// Legacy policy: everything in one stage, no dependency-aware ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleStageSplitter;

impl StageSplitter for SingleStageSplitter {
  fn split(&self, mut resources: Vec<Resource>, _namespace: &str) -> Result<SortedStageList, StageError> {
    if resources.is_empty() {
      return Ok(SortedStageList::default());
    }
    resources.sort_by(|a, b| a.id().sort_key().cmp(&b.id().sort_key()));
    let stage = make_stage(resources);
    Ok(SortedStageList { stages: vec![stage] })
  }
}

/// Weight- and dependency-aware policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedSplitter;

impl StageSplitter for WeightedSplitter {
  fn split(&self, mut resources: Vec<Resource>, namespace: &str) -> Result<SortedStageList, StageError> {
    if resources.is_empty() {
      return Ok(SortedStageList::default());
    }

    resources.sort_by(|a, b| {
      (a.effective_weight(), a.id().sort_key()).cmp(&(b.effective_weight(), b.id().sort_key()))
    });

    // Rank of each distinct weight, ascending.
    let mut weights: Vec<i32> = resources.iter().map(Resource::effective_weight).collect();
    weights.dedup();
    let rank_of = |w: i32| weights.iter().position(|&x| x == w).unwrap_or(0);

    // Dependency graph: edge from dependency to dependent. References that
    // do not name an in-release resource are not internal edges.
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..resources.len()).map(|i| graph.add_node(i)).collect();

    for (idx, resource) in resources.iter().enumerate() {
      for dep in detect_internal(resource) {
        let target = resources
          .iter()
          .position(|candidate| dep.target.matches(candidate.id(), namespace));
        if let Some(target_idx) = target {
          if target_idx != idx {
            graph.add_edge(nodes[target_idx], nodes[idx], ());
          }
        }
      }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
      let idx = graph[cycle.node_id()];
      StageError::DependencyCycle(resources[idx].id().clone())
    })?;

    // Stage index per resource: its weight rank, pushed past every
    // dependency. Processing in topological order makes one pass enough.
    let mut level = vec![0usize; resources.len()];
    for node in order {
      let idx = graph[node];
      level[idx] = rank_of(resources[idx].effective_weight());
      for dep in graph.neighbors_directed(node, petgraph::Direction::Incoming) {
        level[idx] = level[idx].max(level[graph[dep]] + 1);
      }
    }

    let max_level = level.iter().copied().max().unwrap_or(0);
    let mut groups: Vec<Vec<Resource>> = vec![Vec::new(); max_level + 1];
    for (idx, resource) in resources.into_iter().enumerate() {
      groups[level[idx]].push(resource);
    }

    let stages = groups
      .into_iter()
      .filter(|g| !g.is_empty())
      .map(|mut group| {
        group.sort_by(|a, b| a.id().sort_key().cmp(&b.id().sort_key()));
        make_stage(group)
      })
      .collect();

    Ok(SortedStageList { stages })
  }
}

fn make_stage(resources: Vec<Resource>) -> Stage {
  let weight = resources.iter().map(Resource::effective_weight).min().unwrap_or(0);
  let mut external_deps: Vec<AnnotatedDependency> = Vec::new();
  for resource in &resources {
    for dep in &resource.meta().external_dependencies {
      if !external_deps.contains(dep) {
        external_deps.push(dep.clone());
      }
    }
  }
  external_deps.sort_by(|a, b| a.id.cmp(&b.id));
  Stage {
    weight,
    resources,
    external_deps,
  }
}
