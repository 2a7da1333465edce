//! Capability interface to the cluster.
//!
//! All network calls funnel through `ClusterClient`; the client owns its
//! own pooling and backoff. Mutating calls report success or failure per
//! resource so a partially failed batch can be cleaned up precisely.

pub mod fake;

use std::time::Duration;

use async_trait::async_trait;
use serde_yaml::Value;
use thiserror::Error;

use crate::resource::{Resource, ResourceId};

pub use fake::FakeCluster;

/// Errors from cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
  #[error("cluster unreachable: {0}")]
  Unreachable(String),

  /// The cluster rejected a create/update (e.g. admission webhook).
  #[error("apply failed for {id}: {message}")]
  Apply { id: ResourceId, message: String },

  #[error("delete failed for {id}: {message}")]
  Delete { id: ResourceId, message: String },

  /// Resources never became ready within the wait timeout.
  #[error("timed out after {timeout:?} waiting for {pending:?}")]
  Timeout {
    timeout: Duration,
    pending: Vec<ResourceId>,
  },

  /// The kind is not served by this cluster.
  #[error("unknown kind {api_version}/{kind}")]
  UnknownKind { api_version: String, kind: String },
}

/// Live state of one queried resource.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveState {
  Found(Value),
  Absent,
  /// The cluster does not serve this resource's kind.
  UnknownKind,
}

/// Options for update calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
  /// Allow delete+recreate when an immutable field changed.
  pub force: bool,
  /// Bypass the release-ownership check (adoption of foreign resources).
  pub skip_ownership_check: bool,
}

/// Per-resource outcome of a batched mutating call.
pub type BatchResult = Vec<(ResourceId, Result<(), ClusterError>)>;

#[async_trait]
pub trait ClusterClient: Send + Sync {
  async fn is_reachable(&self) -> Result<(), ClusterError>;

  /// Live snapshot aligned with `ids`.
  async fn get(&self, ids: &[ResourceId]) -> Result<Vec<LiveState>, ClusterError>;

  async fn create(&self, resources: &[Resource]) -> BatchResult;

  async fn update(&self, resources: &[Resource], options: UpdateOptions) -> BatchResult;

  async fn delete(&self, ids: &[ResourceId]) -> BatchResult;

  /// Block until every id reports ready, or time out.
  async fn wait_ready(&self, ids: &[ResourceId], timeout: Duration) -> Result<(), ClusterError>;
}

/// Collect the failures out of a batch result, in input order.
pub fn batch_failures(results: &BatchResult) -> Vec<&ClusterError> {
  results.iter().filter_map(|(_, r)| r.as_ref().err()).collect()
}
