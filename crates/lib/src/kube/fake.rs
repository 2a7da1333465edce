//! In-memory cluster used by tests and the CLI's simulated cluster state.
//!
//! Failures and readiness are scriptable per resource name so executor
//! tests can force apply errors mid-stage or resources that never become
//! ready.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_yaml::Value;
use tracing::debug;

use crate::depend::{StaticTypeMapper, TypeMapper};
use crate::resource::{Resource, ResourceId, extract_id};

use super::{BatchResult, ClusterClient, ClusterError, LiveState, UpdateOptions};

#[derive(Debug, Default)]
struct FakeState {
  objects: BTreeMap<ResourceId, Value>,
  fail_create: BTreeSet<String>,
  fail_update: BTreeSet<String>,
  fail_delete: BTreeSet<String>,
  never_ready: BTreeSet<String>,
  /// One entry per mutating API call actually attempted.
  mutations: Vec<String>,
  reachable: bool,
  /// Make waits block for their full timeout instead of failing fast;
  /// used to exercise cancellation.
  slow_waits: bool,
}

#[derive(Debug)]
pub struct FakeCluster {
  state: Mutex<FakeState>,
  mapper: StaticTypeMapper,
}

impl Default for FakeCluster {
  fn default() -> Self {
    Self::new()
  }
}

impl FakeCluster {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(FakeState {
        reachable: true,
        ..FakeState::default()
      }),
      mapper: StaticTypeMapper::with_builtins(),
    }
  }

  /// Insert an object directly, bypassing the mutation log; for arranging
  /// pre-existing cluster state in tests.
  pub fn seed(&self, doc: Value) {
    let id = extract_id(&doc).expect("seed document must be a valid resource");
    self.state.lock().unwrap().objects.insert(id, doc);
  }

  pub fn register_kind(&mut self, api_version: &str, kind: &str) {
    self.mapper.register(api_version, kind);
  }

  pub fn set_reachable(&self, reachable: bool) {
    self.state.lock().unwrap().reachable = reachable;
  }

  pub fn fail_create_of(&self, name: &str) {
    self.state.lock().unwrap().fail_create.insert(name.to_string());
  }

  pub fn fail_update_of(&self, name: &str) {
    self.state.lock().unwrap().fail_update.insert(name.to_string());
  }

  pub fn fail_delete_of(&self, name: &str) {
    self.state.lock().unwrap().fail_delete.insert(name.to_string());
  }

  pub fn mark_never_ready(&self, name: &str) {
    self.state.lock().unwrap().never_ready.insert(name.to_string());
  }

  pub fn set_slow_waits(&self, slow: bool) {
    self.state.lock().unwrap().slow_waits = slow;
  }

  pub fn contains(&self, id: &ResourceId) -> bool {
    self.state.lock().unwrap().objects.contains_key(id)
  }

  pub fn get_doc(&self, id: &ResourceId) -> Option<Value> {
    self.state.lock().unwrap().objects.get(id).cloned()
  }

  /// All live documents, in id order; lets callers persist and reload the
  /// simulated cluster between runs.
  pub fn objects(&self) -> Vec<Value> {
    self.state.lock().unwrap().objects.values().cloned().collect()
  }

  pub fn object_count(&self) -> usize {
    self.state.lock().unwrap().objects.len()
  }

  /// Every mutating API call attempted so far, in order.
  pub fn mutation_log(&self) -> Vec<String> {
    self.state.lock().unwrap().mutations.clone()
  }

  pub fn mutation_count(&self) -> usize {
    self.state.lock().unwrap().mutations.len()
  }

  fn known(&self, id: &ResourceId) -> bool {
    self.mapper.resolve(&id.api_version(), &id.kind).is_some()
  }
}

impl TypeMapper for FakeCluster {
  fn resolve(&self, api_version: &str, kind: &str) -> Option<()> {
    self.mapper.resolve(api_version, kind)
  }
}

#[async_trait]
impl ClusterClient for FakeCluster {
  async fn is_reachable(&self) -> Result<(), ClusterError> {
    if self.state.lock().unwrap().reachable {
      Ok(())
    } else {
      Err(ClusterError::Unreachable("simulated outage".to_string()))
    }
  }

  async fn get(&self, ids: &[ResourceId]) -> Result<Vec<LiveState>, ClusterError> {
    let state = self.state.lock().unwrap();
    Ok(
      ids
        .iter()
        .map(|id| {
          if !self.known(id) {
            LiveState::UnknownKind
          } else {
            match state.objects.get(id) {
              Some(doc) => LiveState::Found(doc.clone()),
              None => LiveState::Absent,
            }
          }
        })
        .collect(),
    )
  }

  async fn create(&self, resources: &[Resource]) -> BatchResult {
    let mut state = self.state.lock().unwrap();
    resources
      .iter()
      .map(|resource| {
        let id = resource.id().clone();
        state.mutations.push(format!("create {id}"));
        if state.fail_create.contains(&id.name) {
          return (
            id.clone(),
            Err(ClusterError::Apply {
              id,
              message: "admission webhook denied create".to_string(),
            }),
          );
        }
        if state.objects.contains_key(&id) {
          return (
            id.clone(),
            Err(ClusterError::Apply {
              id,
              message: "already exists".to_string(),
            }),
          );
        }
        debug!(resource = %id, "fake cluster create");
        state.objects.insert(id.clone(), resource.doc().clone());
        (id, Ok(()))
      })
      .collect()
  }

  async fn update(&self, resources: &[Resource], _options: UpdateOptions) -> BatchResult {
    let mut state = self.state.lock().unwrap();
    resources
      .iter()
      .map(|resource| {
        let id = resource.id().clone();
        state.mutations.push(format!("update {id}"));
        if state.fail_update.contains(&id.name) {
          return (
            id.clone(),
            Err(ClusterError::Apply {
              id,
              message: "admission webhook denied update".to_string(),
            }),
          );
        }
        if !state.objects.contains_key(&id) {
          return (
            id.clone(),
            Err(ClusterError::Apply {
              id,
              message: "not found".to_string(),
            }),
          );
        }
        debug!(resource = %id, "fake cluster update");
        state.objects.insert(id.clone(), resource.doc().clone());
        (id, Ok(()))
      })
      .collect()
  }

  async fn delete(&self, ids: &[ResourceId]) -> BatchResult {
    let mut state = self.state.lock().unwrap();
    ids
      .iter()
      .map(|id| {
        state.mutations.push(format!("delete {id}"));
        if state.fail_delete.contains(&id.name) {
          return (
            id.clone(),
            Err(ClusterError::Delete {
              id: id.clone(),
              message: "finalizer blocked delete".to_string(),
            }),
          );
        }
        // Deleting an absent object is a no-op, matching server semantics
        // closely enough for plan execution.
        state.objects.remove(id);
        (id.clone(), Ok(()))
      })
      .collect()
  }

  async fn wait_ready(&self, ids: &[ResourceId], timeout: Duration) -> Result<(), ClusterError> {
    let (pending, slow): (Vec<ResourceId>, bool) = {
      let state = self.state.lock().unwrap();
      (
        ids
          .iter()
          .filter(|id| state.never_ready.contains(&id.name) || !state.objects.contains_key(id))
          .cloned()
          .collect(),
        state.slow_waits,
      )
    };

    if pending.is_empty() {
      return Ok(());
    }
    if slow {
      tokio::time::sleep(timeout).await;
    }
    Err(ClusterError::Timeout { timeout, pending })
  }
}
