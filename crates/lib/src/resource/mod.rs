//! Resource model: identity plus a wrapped unstructured document.
//!
//! A resource is one rendered (or live) Kubernetes manifest document with
//! typed classification metadata parsed from its annotations. Variants share
//! one `BaseResource` by composition; classification logic lives in free
//! functions elsewhere rather than behind virtual dispatch.

pub mod annotations;
pub mod id;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;

pub use annotations::{
  AnnotatedDependency, DeletePolicy, DependencyRef, HookEvent, ManageableBy, ResourceMeta,
};
pub use id::ResourceId;

/// Errors constructing or mutating a resource.
#[derive(Debug, Error)]
pub enum ResourceError {
  /// The document is not a mapping with apiVersion/kind/metadata.name.
  #[error("not a resource document: {0}")]
  MalformedDocument(String),

  /// A recognized annotation carried an unparseable value.
  #[error("invalid annotation {key}={value:?}: {reason}")]
  InvalidAnnotation {
    key: String,
    value: String,
    reason: String,
  },

  /// A document replacement tried to change the resource identity.
  #[error("document replacement changes identity from {old} to {new}")]
  IdentityChanged { old: ResourceId, new: ResourceId },

  /// The document failed to parse as YAML.
  #[error("yaml: {0}")]
  Yaml(#[from] serde_yaml::Error),
}

/// Identity, document and typed metadata shared by all resource variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseResource {
  id: ResourceId,
  doc: Value,
  meta: ResourceMeta,
}

impl BaseResource {
  /// Construct from an unstructured document, extracting identity and
  /// parsing the annotation table once.
  pub fn from_doc(doc: Value) -> Result<Self, ResourceError> {
    let id = extract_id(&doc)?;
    let meta = annotations::parse_meta(&extract_annotations(&doc))?;
    Ok(Self { id, doc, meta })
  }

  pub fn id(&self) -> &ResourceId {
    &self.id
  }

  pub fn doc(&self) -> &Value {
    &self.doc
  }

  pub fn meta(&self) -> &ResourceMeta {
    &self.meta
  }

  pub fn annotations(&self) -> BTreeMap<String, String> {
    extract_annotations(&self.doc)
  }

  /// Replace the wrapped document. Identity must be unchanged; this is the
  /// only permitted mutation (e.g. after a dry-run merge-patch rewrote
  /// managed-fields metadata).
  pub fn replace_doc(&mut self, doc: Value) -> Result<(), ResourceError> {
    let new_id = extract_id(&doc)?;
    if new_id != self.id {
      return Err(ResourceError::IdentityChanged {
        old: self.id.clone(),
        new: new_id,
      });
    }
    self.meta = annotations::parse_meta(&extract_annotations(&doc))?;
    self.doc = doc;
    Ok(())
  }
}

/// A resource in one of its roles within a deploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resource {
  /// Rendered from the chart, not yet owned by any release.
  Local(BaseResource),
  /// Read back from the cluster.
  Remote(BaseResource),
  /// Tracked and owned by a release.
  Helm(BaseResource),
  /// Lifecycle hook.
  Hook(BaseResource),
  /// Present in the cluster but not owned by any release (e.g. the
  /// release namespace itself).
  Unmanaged(BaseResource),
}

impl Resource {
  /// Build a resource from a rendered chart document: hook-annotated
  /// documents become `Hook`, everything else `Local`.
  pub fn from_rendered_doc(doc: Value) -> Result<Self, ResourceError> {
    let base = BaseResource::from_doc(doc)?;
    if base.meta().is_hook() {
      Ok(Resource::Hook(base))
    } else {
      Ok(Resource::Local(base))
    }
  }

  /// Wrap a live cluster document.
  pub fn from_remote_doc(doc: Value) -> Result<Self, ResourceError> {
    Ok(Resource::Remote(BaseResource::from_doc(doc)?))
  }

  pub fn base(&self) -> &BaseResource {
    match self {
      Resource::Local(b)
      | Resource::Remote(b)
      | Resource::Helm(b)
      | Resource::Hook(b)
      | Resource::Unmanaged(b) => b,
    }
  }

  pub fn base_mut(&mut self) -> &mut BaseResource {
    match self {
      Resource::Local(b)
      | Resource::Remote(b)
      | Resource::Helm(b)
      | Resource::Hook(b)
      | Resource::Unmanaged(b) => b,
    }
  }

  pub fn id(&self) -> &ResourceId {
    self.base().id()
  }

  pub fn doc(&self) -> &Value {
    self.base().doc()
  }

  pub fn meta(&self) -> &ResourceMeta {
    self.base().meta()
  }

  pub fn is_hook(&self) -> bool {
    matches!(self, Resource::Hook(_))
  }

  pub fn is_crd(&self) -> bool {
    self.id().is_crd()
  }

  /// The effective ordering weight: hooks order by hook weight, plain
  /// resources by weight.
  pub fn effective_weight(&self) -> i32 {
    if self.is_hook() {
      self.meta().hook_weight
    } else {
      self.meta().weight
    }
  }

  /// Promote a rendered resource into a release-owned one, stamping the
  /// Helm-compatible ownership annotations into the document.
  pub fn into_owned(self, release_name: &str, release_namespace: &str) -> Result<Resource, ResourceError> {
    let hook = self.is_hook();
    let mut base = match self {
      Resource::Local(b) | Resource::Hook(b) | Resource::Helm(b) => b,
      other => return Ok(other),
    };
    let mut doc = base.doc().clone();
    set_annotation(&mut doc, annotations::RELEASE_NAME, release_name);
    set_annotation(&mut doc, annotations::RELEASE_NAMESPACE, release_namespace);
    base.replace_doc(doc)?;
    if hook {
      Ok(Resource::Hook(base))
    } else {
      Ok(Resource::Helm(base))
    }
  }
}

/// Extract the canonical id from an unstructured document.
pub fn extract_id(doc: &Value) -> Result<ResourceId, ResourceError> {
  let api_version = doc
    .get("apiVersion")
    .and_then(Value::as_str)
    .ok_or_else(|| ResourceError::MalformedDocument("missing apiVersion".into()))?;
  let kind = doc
    .get("kind")
    .and_then(Value::as_str)
    .ok_or_else(|| ResourceError::MalformedDocument("missing kind".into()))?;
  let metadata = doc
    .get("metadata")
    .ok_or_else(|| ResourceError::MalformedDocument("missing metadata".into()))?;
  let name = metadata
    .get("name")
    .and_then(Value::as_str)
    .ok_or_else(|| ResourceError::MalformedDocument("missing metadata.name".into()))?;
  let namespace = metadata.get("namespace").and_then(Value::as_str);

  Ok(ResourceId::from_api_version(api_version, kind, namespace, name))
}

/// Read `metadata.annotations` as a string map; non-string values are
/// ignored.
pub fn extract_annotations(doc: &Value) -> BTreeMap<String, String> {
  let mut out = BTreeMap::new();
  if let Some(annotations) = doc
    .get("metadata")
    .and_then(|m| m.get("annotations"))
    .and_then(Value::as_mapping)
  {
    for (key, value) in annotations {
      if let (Some(k), Some(v)) = (key.as_str(), value.as_str()) {
        out.insert(k.to_string(), v.to_string());
      }
    }
  }
  out
}

/// Set one annotation in `metadata.annotations`, creating intermediate maps
/// as needed.
pub fn set_annotation(doc: &mut Value, key: &str, value: &str) {
  use serde_yaml::Mapping;

  let Some(root) = doc.as_mapping_mut() else {
    return;
  };
  let metadata = root
    .entry(Value::String("metadata".into()))
    .or_insert_with(|| Value::Mapping(Mapping::new()));
  let Some(metadata) = metadata.as_mapping_mut() else {
    return;
  };
  let annotations = metadata
    .entry(Value::String("annotations".into()))
    .or_insert_with(|| Value::Mapping(Mapping::new()));
  if let Some(annotations) = annotations.as_mapping_mut() {
    annotations.insert(Value::String(key.into()), Value::String(value.into()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn doc(yaml: &str) -> Value {
    serde_yaml::from_str(yaml).unwrap()
  }

  const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: app
  namespace: default
  annotations:
    capstan.io/weight: "10"
spec:
  replicas: 2
"#;

  #[test]
  fn construct_from_rendered_doc() {
    let resource = Resource::from_rendered_doc(doc(DEPLOYMENT)).unwrap();
    assert!(matches!(resource, Resource::Local(_)));
    assert_eq!(resource.id().kind, "Deployment");
    assert_eq!(resource.id().namespace.as_deref(), Some("default"));
    assert_eq!(resource.meta().weight, 10);
    assert_eq!(resource.effective_weight(), 10);
  }

  #[test]
  fn hook_annotation_selects_hook_variant() {
    let resource = Resource::from_rendered_doc(doc(
      r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
  namespace: default
  annotations:
    capstan.io/hook: pre-upgrade
    capstan.io/hook-weight: "-1"
"#,
    ))
    .unwrap();
    assert!(resource.is_hook());
    assert!(resource.meta().has_hook_event(HookEvent::PreUpgrade));
    assert_eq!(resource.effective_weight(), -1);
  }

  #[test]
  fn missing_name_is_malformed() {
    let err = Resource::from_rendered_doc(doc("apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n")).unwrap_err();
    assert!(matches!(err, ResourceError::MalformedDocument(_)));
  }

  #[test]
  fn replace_doc_keeps_identity() {
    let mut resource = Resource::from_rendered_doc(doc(DEPLOYMENT)).unwrap();
    let mut updated = doc(DEPLOYMENT);
    set_annotation(&mut updated, "capstan.io/weight", "20");
    resource.base_mut().replace_doc(updated).unwrap();
    assert_eq!(resource.meta().weight, 20);
  }

  #[test]
  fn replace_doc_rejects_identity_change() {
    let mut resource = Resource::from_rendered_doc(doc(DEPLOYMENT)).unwrap();
    let renamed = doc(&DEPLOYMENT.replace("name: app", "name: other"));
    let err = resource.base_mut().replace_doc(renamed).unwrap_err();
    assert!(matches!(err, ResourceError::IdentityChanged { .. }));
  }

  #[test]
  fn into_owned_stamps_ownership() {
    let resource = Resource::from_rendered_doc(doc(DEPLOYMENT)).unwrap();
    let owned = resource.into_owned("web", "default").unwrap();
    assert!(matches!(owned, Resource::Helm(_)));
    let annotations = owned.base().annotations();
    assert_eq!(annotations.get(annotations::RELEASE_NAME).map(String::as_str), Some("web"));
    assert_eq!(
      annotations.get(annotations::RELEASE_NAMESPACE).map(String::as_str),
      Some("default")
    );
  }

  #[test]
  fn owned_hook_stays_hook() {
    let resource = Resource::from_rendered_doc(doc(
      "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: j\n  annotations:\n    capstan.io/hook: test\n",
    ))
    .unwrap();
    let owned = resource.into_owned("web", "default").unwrap();
    assert!(owned.is_hook());
  }
}
