//! Resource classification: desired state against the live cluster.
//!
//! Classification is a pure function of the desired documents, the live
//! documents and the per-kind mutability rules; the only I/O is the live
//! GET performed up front. It is computed independently for three pools:
//! plain release resources, hooks, and preloaded CRDs.

pub mod fields;

use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::kube::{ClusterClient, ClusterError, LiveState};
use crate::resource::annotations::{RELEASE_NAME, RELEASE_NAMESPACE};
use crate::resource::{ManageableBy, Resource, ResourceId, extract_annotations};

/// Errors from classification.
#[derive(Debug, Error)]
pub enum ClassifyError {
  /// A live resource is owned by a different release (or nobody) and must
  /// not be silently overwritten.
  #[error("resource {id} is not adoptable by release {release}: owned by {owner:?}")]
  NotAdoptable {
    id: ResourceId,
    release: String,
    owner: Option<(String, String)>,
  },

  #[error(transparent)]
  Cluster(#[from] ClusterError),
}

/// Disjoint classification buckets for one resource pool.
#[derive(Debug, Default)]
pub struct Buckets {
  /// Live matches desired; no action.
  pub up_to_date: Vec<Resource>,
  /// Live differs; safe to update in place.
  pub outdated: Vec<Resource>,
  /// A field the type forbids patching changed; delete+recreate required.
  pub outdated_immutable: Vec<Resource>,
  /// Absent from the cluster; must be created.
  pub non_existing: Vec<Resource>,
  /// Kind not served by the cluster; reported, never applied.
  pub unsupported: Vec<Resource>,
}

impl Buckets {
  pub fn is_empty(&self) -> bool {
    self.up_to_date.is_empty()
      && self.outdated.is_empty()
      && self.outdated_immutable.is_empty()
      && self.non_existing.is_empty()
      && self.unsupported.is_empty()
  }
}

/// Classification of all three pools.
#[derive(Debug, Default)]
pub struct Classification {
  pub crds: Buckets,
  pub hooks: Buckets,
  pub general: Buckets,
}

impl Classification {
  pub fn unsupported_ids(&self) -> Vec<&ResourceId> {
    self
      .crds
      .unsupported
      .iter()
      .chain(&self.hooks.unsupported)
      .chain(&self.general.unsupported)
      .map(Resource::id)
      .collect()
  }
}

/// Classify desired resources against the live cluster, re-reading live
/// state at call time so planning never acts on a stale snapshot.
pub async fn classify(
  client: &dyn ClusterClient,
  desired: Vec<Resource>,
  release_name: &str,
  release_namespace: &str,
) -> Result<Classification, ClassifyError> {
  let mut crds = Vec::new();
  let mut hooks = Vec::new();
  let mut general = Vec::new();
  for resource in desired {
    if resource.is_crd() {
      crds.push(resource);
    } else if resource.is_hook() {
      hooks.push(resource);
    } else {
      general.push(resource);
    }
  }

  Ok(Classification {
    crds: classify_pool(client, crds, release_name, release_namespace).await?,
    hooks: classify_pool(client, hooks, release_name, release_namespace).await?,
    general: classify_pool(client, general, release_name, release_namespace).await?,
  })
}

async fn classify_pool(
  client: &dyn ClusterClient,
  desired: Vec<Resource>,
  release_name: &str,
  release_namespace: &str,
) -> Result<Buckets, ClassifyError> {
  if desired.is_empty() {
    return Ok(Buckets::default());
  }

  let ids: Vec<ResourceId> = desired.iter().map(|r| r.id().clone()).collect();
  let live = client.get(&ids).await?;

  let mut buckets = Buckets::default();
  for (mut resource, state) in desired.into_iter().zip(live) {
    match state {
      LiveState::UnknownKind => {
        warn!(resource = %resource.id(), "kind not served by cluster; marked unsupported");
        buckets.unsupported.push(resource);
      }
      LiveState::Absent => buckets.non_existing.push(resource),
      LiveState::Found(live_doc) => {
        check_adoptable(&resource, &live_doc, release_name, release_namespace)?;

        if doc_subset(resource.doc(), &live_doc) {
          buckets.up_to_date.push(resource);
        } else if immutable_field_changed(resource.doc(), &live_doc, &resource.id().kind) {
          debug!(resource = %resource.id(), "immutable field changed; recreate required");
          buckets.outdated_immutable.push(resource);
        } else {
          absorb_field_ownership(&mut resource, &live_doc);
          buckets.outdated.push(resource);
        }
      }
    }
  }

  sort_bucket(&mut buckets.up_to_date);
  sort_bucket(&mut buckets.outdated);
  sort_bucket(&mut buckets.outdated_immutable);
  sort_bucket(&mut buckets.non_existing);
  sort_bucket(&mut buckets.unsupported);
  Ok(buckets)
}

fn sort_bucket(bucket: &mut [Resource]) {
  bucket.sort_by(|a, b| a.id().sort_key().cmp(&b.id().sort_key()));
}

/// Verify a live resource is ours to mutate before classifying it as
/// updatable. Mismatched ownership fails loudly; it is never an implicit
/// overwrite of another release's resource.
fn check_adoptable(
  resource: &Resource,
  live_doc: &Value,
  release_name: &str,
  release_namespace: &str,
) -> Result<(), ClassifyError> {
  let annotations = extract_annotations(live_doc);
  let owner = match (annotations.get(RELEASE_NAME), annotations.get(RELEASE_NAMESPACE)) {
    (Some(name), Some(namespace)) => Some((name.clone(), namespace.clone())),
    _ => None,
  };

  match &owner {
    Some((name, namespace)) if name == release_name && namespace == release_namespace => Ok(()),
    Some(_) => Err(ClassifyError::NotAdoptable {
      id: resource.id().clone(),
      release: release_name.to_string(),
      owner,
    }),
    // An unannotated live object is only adoptable when the chart does not
    // demand exclusive ownership.
    None if resource.meta().manageable_by == ManageableBy::Anyone => Ok(()),
    None => Err(ClassifyError::NotAdoptable {
      id: resource.id().clone(),
      release: release_name.to_string(),
      owner: None,
    }),
  }
}

/// Merge the live object's field-manager entries into ours and carry the
/// reconciled metadata on the desired document, so the subsequent update
/// does not orphan or steal field ownership.
fn absorb_field_ownership(resource: &mut Resource, live_doc: &Value) {
  let mut live = live_doc.clone();
  let merged = fields::take_field_ownership(&mut live);
  if merged.is_empty() {
    return;
  }
  let mut doc = resource.doc().clone();
  fields::write_managed_fields(&mut doc, &merged);
  // Identity is untouched, so the replacement cannot fail.
  let _ = resource.base_mut().replace_doc(doc);
}

/// Paths a resource type forbids patching, per kind.
fn immutable_paths(kind: &str) -> &'static [&'static [&'static str]] {
  match kind {
    "Job" => &[&["spec", "template"], &["spec", "selector"], &["spec", "completions"]],
    "Service" => &[&["spec", "clusterIP"]],
    "PersistentVolumeClaim" => &[&["spec", "storageClassName"], &["spec", "accessModes"]],
    "StatefulSet" => &[
      &["spec", "serviceName"],
      &["spec", "selector"],
      &["spec", "volumeClaimTemplates"],
    ],
    _ => &[],
  }
}

fn immutable_field_changed(desired: &Value, live: &Value, kind: &str) -> bool {
  immutable_paths(kind).iter().any(|path| {
    let desired_value = lookup(desired, path);
    let live_value = lookup(live, path);
    matches!((desired_value, live_value), (Some(d), Some(l)) if d != l)
  })
}

fn lookup<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a Value> {
  let mut cursor = doc;
  for part in path {
    cursor = cursor.get(part)?;
  }
  Some(cursor)
}

/// Structural subset: every field the desired document specifies is present
/// and equal in the live document. Server-populated fields (status,
/// defaulted metadata) therefore never make a resource look outdated.
pub fn doc_subset(desired: &Value, live: &Value) -> bool {
  match (desired, live) {
    (Value::Mapping(d), Value::Mapping(l)) => d.iter().all(|(key, value)| {
      if key.as_str() == Some("managedFields") {
        return true;
      }
      match l.get(key) {
        Some(live_value) => doc_subset(value, live_value),
        None => false,
      }
    }),
    (Value::Sequence(d), Value::Sequence(l)) => {
      d.len() == l.len() && d.iter().zip(l).all(|(dv, lv)| doc_subset(dv, lv))
    }
    (d, l) => d == l,
  }
}
