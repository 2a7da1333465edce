//! Canonical resource identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical identity of a cluster resource: group, version, kind,
/// optional namespace and name.
///
/// Identity is structural and immutable; `Ord` is derived so ids can be
/// used as map/set keys and as the deterministic tie-break wherever an
/// ordering between resources is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
  pub group: String,
  pub version: String,
  pub kind: String,
  pub namespace: Option<String>,
  pub name: String,
}

impl ResourceId {
  /// Build an id from an `apiVersion` string (`group/version` or bare
  /// `version` for the core group).
  pub fn from_api_version(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
    let (group, version) = split_api_version(api_version);
    Self {
      group,
      version,
      kind: kind.to_string(),
      namespace: namespace.map(str::to_string),
      name: name.to_string(),
    }
  }

  /// The `apiVersion` form of the group/version pair.
  pub fn api_version(&self) -> String {
    if self.group.is_empty() {
      self.version.clone()
    } else {
      format!("{}/{}", self.group, self.version)
    }
  }

  /// True if this id names a CustomResourceDefinition.
  pub fn is_crd(&self) -> bool {
    self.kind == "CustomResourceDefinition" && self.group == "apiextensions.k8s.io"
  }

  /// Key used when ordering resources that share a weight: name first,
  /// then the full structural identity.
  pub fn sort_key(&self) -> (&str, &str, &str, Option<&str>) {
    (
      &self.name,
      &self.kind,
      &self.group,
      self.namespace.as_deref(),
    )
  }
}

impl fmt::Display for ResourceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.namespace {
      Some(ns) => write!(f, "{}/{} {}/{}", self.api_version(), self.kind, ns, self.name),
      None => write!(f, "{}/{} {}", self.api_version(), self.kind, self.name),
    }
  }
}

/// Split `apiVersion` into `(group, version)`.
pub fn split_api_version(api_version: &str) -> (String, String) {
  match api_version.split_once('/') {
    Some((group, version)) => (group.to_string(), version.to_string()),
    None => (String::new(), api_version.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn deployment(name: &str) -> ResourceId {
    ResourceId::from_api_version("apps/v1", "Deployment", Some("default"), name)
  }

  #[test]
  fn core_group_api_version() {
    let id = ResourceId::from_api_version("v1", "ConfigMap", Some("default"), "cm");
    assert_eq!(id.group, "");
    assert_eq!(id.version, "v1");
    assert_eq!(id.api_version(), "v1");
  }

  #[test]
  fn grouped_api_version_round_trip() {
    let id = deployment("app");
    assert_eq!(id.group, "apps");
    assert_eq!(id.version, "v1");
    assert_eq!(id.api_version(), "apps/v1");
  }

  #[test]
  fn display_with_and_without_namespace() {
    let id = deployment("app");
    assert_eq!(id.to_string(), "apps/v1/Deployment default/app");

    let cluster_scoped = ResourceId::from_api_version("rbac.authorization.k8s.io/v1", "ClusterRole", None, "admin");
    assert_eq!(
      cluster_scoped.to_string(),
      "rbac.authorization.k8s.io/v1/ClusterRole admin"
    );
  }

  #[test]
  fn crd_detection() {
    let crd = ResourceId::from_api_version("apiextensions.k8s.io/v1", "CustomResourceDefinition", None, "widgets.example.com");
    assert!(crd.is_crd());
    assert!(!deployment("app").is_crd());
  }

  #[test]
  fn sort_key_orders_by_name_first() {
    let a = deployment("a");
    let z = ResourceId::from_api_version("v1", "ConfigMap", Some("default"), "z");
    let mut ids = vec![z.clone(), a.clone()];
    ids.sort_by(|x, y| x.sort_key().cmp(&y.sort_key()));
    assert_eq!(ids, vec![a, z]);
  }
}
