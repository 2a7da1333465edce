//! Annotation vocabulary and the typed metadata parsed from it.
//!
//! Every capstan-recognized annotation is declared once in a canonical
//! table mapping key (or key suffix) to its parser. The table is walked a
//! single time while a resource is constructed; nothing re-inspects raw
//! annotations afterwards.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ResourceError;

/// Ordering weight annotation for plain resources.
pub const WEIGHT: &str = "capstan.io/weight";
/// Lifecycle hook event list.
pub const HOOK: &str = "capstan.io/hook";
/// Ordering weight annotation for hooks.
pub const HOOK_WEIGHT: &str = "capstan.io/hook-weight";
/// When to delete a hook relative to its lifecycle.
pub const HOOK_DELETE_POLICY: &str = "capstan.io/hook-delete-policy";
/// `keep` marks a resource that survives release uninstall.
pub const RESOURCE_POLICY: &str = "capstan.io/resource-policy";
/// Forces delete+recreate instead of patch on update.
pub const RECREATE: &str = "capstan.io/recreate";
/// Ownership exclusivity: `anyone` or `release`.
pub const OWNABLE_BY: &str = "capstan.io/ownable-by";
/// Suffix for internal dependency annotations, keyed by a caller-chosen id:
/// `<id>.dependency.capstan.io = apiVersion:kind[:namespace]:name`.
pub const DEPENDENCY_SUFFIX: &str = ".dependency.capstan.io";
/// Suffix for external dependency annotations (waited on, never applied).
pub const EXTERNAL_DEPENDENCY_SUFFIX: &str = ".external-dependency.capstan.io";

/// Helm-compatible ownership vocabulary stamped on managed objects.
pub const RELEASE_NAME: &str = "meta.helm.sh/release-name";
pub const RELEASE_NAMESPACE: &str = "meta.helm.sh/release-namespace";

/// Lifecycle transition that triggers a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
  PreInstall,
  PostInstall,
  PreUpgrade,
  PostUpgrade,
  PreRollback,
  PostRollback,
  PreDelete,
  PostDelete,
  Test,
}

impl HookEvent {
  pub fn as_str(&self) -> &'static str {
    match self {
      HookEvent::PreInstall => "pre-install",
      HookEvent::PostInstall => "post-install",
      HookEvent::PreUpgrade => "pre-upgrade",
      HookEvent::PostUpgrade => "post-upgrade",
      HookEvent::PreRollback => "pre-rollback",
      HookEvent::PostRollback => "post-rollback",
      HookEvent::PreDelete => "pre-delete",
      HookEvent::PostDelete => "post-delete",
      HookEvent::Test => "test",
    }
  }
}

impl FromStr for HookEvent {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pre-install" => Ok(HookEvent::PreInstall),
      "post-install" => Ok(HookEvent::PostInstall),
      "pre-upgrade" => Ok(HookEvent::PreUpgrade),
      "post-upgrade" => Ok(HookEvent::PostUpgrade),
      "pre-rollback" => Ok(HookEvent::PreRollback),
      "post-rollback" => Ok(HookEvent::PostRollback),
      "pre-delete" => Ok(HookEvent::PreDelete),
      "post-delete" => Ok(HookEvent::PostDelete),
      "test" => Ok(HookEvent::Test),
      other => Err(format!("unknown hook event {other:?}")),
    }
  }
}

/// When a hook is deleted relative to its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletePolicy {
  BeforeHookCreation,
  HookSucceeded,
  HookFailed,
}

impl FromStr for DeletePolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "before-hook-creation" => Ok(DeletePolicy::BeforeHookCreation),
      "hook-succeeded" => Ok(DeletePolicy::HookSucceeded),
      "hook-failed" => Ok(DeletePolicy::HookFailed),
      other => Err(format!("unknown delete policy {other:?}")),
    }
  }
}

/// Ownership exclusivity required before mutating a live resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManageableBy {
  #[default]
  Anyone,
  SingleRelease,
}

/// A reference parsed from a dependency annotation value:
/// `apiVersion:kind[:namespace]:name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyRef {
  pub api_version: String,
  pub kind: String,
  pub namespace: Option<String>,
  pub name: String,
}

impl FromStr for DependencyRef {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parts: Vec<&str> = s.split(':').collect();
    let (api_version, kind, namespace, name) = match parts.as_slice() {
      [api_version, kind, name] => (*api_version, *kind, None, *name),
      [api_version, kind, namespace, name] => (*api_version, *kind, Some(*namespace), *name),
      _ => {
        return Err(format!(
          "expected apiVersion:kind[:namespace]:name, got {} parts",
          parts.len()
        ));
      }
    };
    if api_version.is_empty() || kind.is_empty() {
      return Err("empty resource type".to_string());
    }
    if name.is_empty() {
      return Err("empty resource name".to_string());
    }
    Ok(DependencyRef {
      api_version: api_version.to_string(),
      kind: kind.to_string(),
      namespace: namespace.filter(|s| !s.is_empty()).map(str::to_string),
      name: name.to_string(),
    })
  }
}

impl std::fmt::Display for DependencyRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self.namespace {
      Some(ns) => write!(f, "{}:{}:{}:{}", self.api_version, self.kind, ns, self.name),
      None => write!(f, "{}:{}:{}", self.api_version, self.kind, self.name),
    }
  }
}

/// A dependency annotation together with the `<id>` that keyed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedDependency {
  pub id: String,
  pub target: DependencyRef,
}

/// Typed classification metadata extracted from a resource's annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
  pub weight: i32,
  pub hook_weight: i32,
  pub hook_events: Vec<HookEvent>,
  pub delete_policies: Vec<DeletePolicy>,
  pub keep_on_delete: bool,
  pub recreate: bool,
  pub manageable_by: ManageableBy,
  pub dependencies: Vec<AnnotatedDependency>,
  pub external_dependencies: Vec<AnnotatedDependency>,
}

impl ResourceMeta {
  pub fn is_hook(&self) -> bool {
    !self.hook_events.is_empty()
  }

  pub fn has_hook_event(&self, event: HookEvent) -> bool {
    self.hook_events.contains(&event)
  }

  pub fn has_delete_policy(&self, policy: DeletePolicy) -> bool {
    self.delete_policies.contains(&policy)
  }
}

type Setter = fn(&mut ResourceMeta, &str, &str) -> Result<(), String>;

/// Canonical annotation table: exact key to parser.
const HANDLERS: &[(&str, Setter)] = &[
  (WEIGHT, set_weight),
  (HOOK, set_hook_events),
  (HOOK_WEIGHT, set_hook_weight),
  (HOOK_DELETE_POLICY, set_delete_policies),
  (RESOURCE_POLICY, set_resource_policy),
  (RECREATE, set_recreate),
  (OWNABLE_BY, set_ownable_by),
];

fn set_weight(meta: &mut ResourceMeta, _key: &str, value: &str) -> Result<(), String> {
  meta.weight = value.trim().parse::<i32>().map_err(|e| e.to_string())?;
  Ok(())
}

fn set_hook_weight(meta: &mut ResourceMeta, _key: &str, value: &str) -> Result<(), String> {
  meta.hook_weight = value.trim().parse::<i32>().map_err(|e| e.to_string())?;
  Ok(())
}

fn set_hook_events(meta: &mut ResourceMeta, _key: &str, value: &str) -> Result<(), String> {
  for part in value.split(',') {
    let event = part.trim().parse::<HookEvent>()?;
    if !meta.hook_events.contains(&event) {
      meta.hook_events.push(event);
    }
  }
  meta.hook_events.sort();
  Ok(())
}

fn set_delete_policies(meta: &mut ResourceMeta, _key: &str, value: &str) -> Result<(), String> {
  for part in value.split(',') {
    let policy = part.trim().parse::<DeletePolicy>()?;
    if !meta.delete_policies.contains(&policy) {
      meta.delete_policies.push(policy);
    }
  }
  meta.delete_policies.sort();
  Ok(())
}

fn set_resource_policy(meta: &mut ResourceMeta, _key: &str, value: &str) -> Result<(), String> {
  match value.trim() {
    "keep" => {
      meta.keep_on_delete = true;
      Ok(())
    }
    other => Err(format!("unknown resource policy {other:?}")),
  }
}

fn set_recreate(meta: &mut ResourceMeta, _key: &str, value: &str) -> Result<(), String> {
  meta.recreate = value.trim().parse::<bool>().map_err(|e| e.to_string())?;
  Ok(())
}

fn set_ownable_by(meta: &mut ResourceMeta, _key: &str, value: &str) -> Result<(), String> {
  meta.manageable_by = match value.trim() {
    "anyone" => ManageableBy::Anyone,
    "release" => ManageableBy::SingleRelease,
    other => return Err(format!("unknown ownership mode {other:?}")),
  };
  Ok(())
}

/// Parse a full annotation map into typed metadata.
///
/// Unrecognized keys are ignored (they belong to other tooling); recognized
/// keys with malformed values are configuration errors carrying the
/// offending key and value.
pub fn parse_meta(annotations: &BTreeMap<String, String>) -> Result<ResourceMeta, ResourceError> {
  let mut meta = ResourceMeta::default();

  for (key, value) in annotations {
    if let Some((_, setter)) = HANDLERS.iter().find(|(name, _)| name == key) {
      setter(&mut meta, key, value).map_err(|reason| ResourceError::InvalidAnnotation {
        key: key.clone(),
        value: value.clone(),
        reason,
      })?;
      continue;
    }

    if let Some(id) = key.strip_suffix(DEPENDENCY_SUFFIX) {
      let target = parse_dependency(key, value)?;
      meta.dependencies.push(AnnotatedDependency {
        id: id.to_string(),
        target,
      });
    } else if let Some(id) = key.strip_suffix(EXTERNAL_DEPENDENCY_SUFFIX) {
      let target = parse_dependency(key, value)?;
      meta.external_dependencies.push(AnnotatedDependency {
        id: id.to_string(),
        target,
      });
    }
  }

  // BTreeMap iteration already orders dependencies by annotation id, which
  // keeps detection output stable across runs.
  Ok(meta)
}

fn parse_dependency(key: &str, value: &str) -> Result<DependencyRef, ResourceError> {
  value.parse::<DependencyRef>().map_err(|reason| ResourceError::InvalidAnnotation {
    key: key.to_string(),
    value: value.to_string(),
    reason,
  })
}
