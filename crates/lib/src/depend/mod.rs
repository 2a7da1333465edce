//! Dependency detection: ordering edges between resources.
//!
//! Internal dependencies point at resources inside the same release and
//! decide stage ordering. External dependencies name arbitrary cluster
//! resources that must exist/be ready before a stage applies, but are never
//! applied themselves. Manual annotations and automatic structural
//! heuristics are unioned, not merged by overwrite.

use serde_yaml::Value;
use thiserror::Error;

use crate::resource::{AnnotatedDependency, DependencyRef, Resource, ResourceId, id::split_api_version};

/// Errors from dependency detection and resolution.
#[derive(Debug, Error)]
pub enum DependError {
  /// An external dependency names a type the cluster does not serve.
  #[error("unknown resource type {api_version}:{kind} referenced by {annotation}")]
  UnknownType {
    api_version: String,
    kind: String,
    annotation: String,
  },
}

/// An ordering edge to another resource within the same release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalDependency {
  /// The annotation id, or a synthetic id for auto-detected edges.
  pub id: String,
  pub target: DependencyRef,
}

/// A wait-for edge to a cluster resource outside the release.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExternalDependency {
  pub id: String,
  pub target: ResourceId,
}

/// Type resolution through discovery, the seam a REST mapper sits behind.
pub trait TypeMapper {
  /// Resolve `(apiVersion, kind)` to a served type, `None` if unknown.
  fn resolve(&self, api_version: &str, kind: &str) -> Option<()>;
}

/// A mapper backed by a static set of known types; used by tests and the
/// simulated cluster.
#[derive(Debug, Clone, Default)]
pub struct StaticTypeMapper {
  known: std::collections::BTreeSet<(String, String)>,
}

impl StaticTypeMapper {
  /// Mapper preloaded with the built-in kinds every cluster serves.
  pub fn with_builtins() -> Self {
    let mut mapper = Self::default();
    for (api_version, kind) in [
      ("v1", "ConfigMap"),
      ("v1", "Secret"),
      ("v1", "Service"),
      ("v1", "ServiceAccount"),
      ("v1", "Pod"),
      ("v1", "Namespace"),
      ("v1", "PersistentVolumeClaim"),
      ("apps/v1", "Deployment"),
      ("apps/v1", "StatefulSet"),
      ("apps/v1", "DaemonSet"),
      ("batch/v1", "Job"),
      ("batch/v1", "CronJob"),
      ("networking.k8s.io/v1", "Ingress"),
      ("networking.k8s.io/v1", "IngressClass"),
      ("rbac.authorization.k8s.io/v1", "Role"),
      ("rbac.authorization.k8s.io/v1", "RoleBinding"),
      ("rbac.authorization.k8s.io/v1", "ClusterRole"),
      ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding"),
      ("apiextensions.k8s.io/v1", "CustomResourceDefinition"),
    ] {
      mapper.register(api_version, kind);
    }
    mapper
  }

  pub fn register(&mut self, api_version: &str, kind: &str) {
    self.known.insert((api_version.to_string(), kind.to_string()));
  }
}

impl TypeMapper for StaticTypeMapper {
  fn resolve(&self, api_version: &str, kind: &str) -> Option<()> {
    self
      .known
      .contains(&(api_version.to_string(), kind.to_string()))
      .then_some(())
  }
}

impl DependencyRef {
  /// Whether this reference names the given resource. A reference without a
  /// namespace matches within `default_namespace`.
  pub fn matches(&self, id: &ResourceId, default_namespace: &str) -> bool {
    if self.kind != id.kind || self.name != id.name {
      return false;
    }
    if self.api_version != id.api_version() {
      return false;
    }
    let want_ns = self.namespace.as_deref().unwrap_or(default_namespace);
    match &id.namespace {
      Some(ns) => ns == want_ns,
      // Cluster-scoped targets ignore the namespace component.
      None => true,
    }
  }

  fn to_resource_id(&self, default_namespace: &str) -> ResourceId {
    let (group, version) = split_api_version(&self.api_version);
    ResourceId {
      group,
      version,
      kind: self.kind.clone(),
      namespace: Some(self.namespace.clone().unwrap_or_else(|| default_namespace.to_string())),
      name: self.name.clone(),
    }
  }
}

/// Detect internal dependencies: manual annotations unioned with
/// auto-detected structural references.
pub fn detect_internal(resource: &Resource) -> Vec<InternalDependency> {
  let mut deps: Vec<InternalDependency> = resource
    .meta()
    .dependencies
    .iter()
    .map(|AnnotatedDependency { id, target }| InternalDependency {
      id: id.clone(),
      target: target.clone(),
    })
    .collect();

  for target in auto_detect(resource.doc()) {
    if deps.iter().any(|d| d.target == target) {
      continue;
    }
    deps.push(InternalDependency {
      id: format!("auto/{}", target),
      target,
    });
  }

  deps
}

/// Resolve external dependency annotations through the type mapper.
/// An unknown type is a configuration error, not a runtime skip.
pub fn detect_external(
  resource: &Resource,
  mapper: &dyn TypeMapper,
  default_namespace: &str,
) -> Result<Vec<ExternalDependency>, DependError> {
  resolve_refs(&resource.meta().external_dependencies, mapper, default_namespace)
}

/// Resolve annotated references that were already lifted off their
/// resources (e.g. aggregated per stage) through the type mapper.
pub fn resolve_refs(
  refs: &[AnnotatedDependency],
  mapper: &dyn TypeMapper,
  default_namespace: &str,
) -> Result<Vec<ExternalDependency>, DependError> {
  let mut deps = Vec::new();
  for AnnotatedDependency { id, target } in refs {
    if mapper.resolve(&target.api_version, &target.kind).is_none() {
      return Err(DependError::UnknownType {
        api_version: target.api_version.clone(),
        kind: target.kind.clone(),
        annotation: id.clone(),
      });
    }
    deps.push(ExternalDependency {
      id: id.clone(),
      target: target.to_resource_id(default_namespace),
    });
  }
  deps.sort();
  deps.dedup();
  Ok(deps)
}

/// Structural heuristics: references a document makes to sibling resources.
fn auto_detect(doc: &Value) -> Vec<DependencyRef> {
  let mut out = Vec::new();

  // Pod spec lives either at .spec (Pod) or .spec.template.spec (workloads).
  let pod_specs = [
    doc.get("spec"),
    doc.get("spec").and_then(|s| s.get("template")).and_then(|t| t.get("spec")),
  ];

  for spec in pod_specs.into_iter().flatten() {
    if let Some(sa) = spec.get("serviceAccountName").and_then(Value::as_str) {
      push_unique(&mut out, simple_ref("v1", "ServiceAccount", sa));
    }

    for containers_key in ["containers", "initContainers"] {
      let Some(containers) = spec.get(containers_key).and_then(Value::as_sequence) else {
        continue;
      };
      for container in containers {
        let Some(env_from) = container.get("envFrom").and_then(Value::as_sequence) else {
          continue;
        };
        for source in env_from {
          if let Some(name) = source
            .get("configMapRef")
            .and_then(|r| r.get("name"))
            .and_then(Value::as_str)
          {
            push_unique(&mut out, simple_ref("v1", "ConfigMap", name));
          }
          if let Some(name) = source
            .get("secretRef")
            .and_then(|r| r.get("name"))
            .and_then(Value::as_str)
          {
            push_unique(&mut out, simple_ref("v1", "Secret", name));
          }
        }
      }
    }
  }

  out
}

fn simple_ref(api_version: &str, kind: &str, name: &str) -> DependencyRef {
  DependencyRef {
    api_version: api_version.to_string(),
    kind: kind.to_string(),
    namespace: None,
    name: name.to_string(),
  }
}

fn push_unique(deps: &mut Vec<DependencyRef>, target: DependencyRef) {
  if !deps.contains(&target) {
    deps.push(target);
  }
}
