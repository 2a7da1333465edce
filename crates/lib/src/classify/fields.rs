//! Field-manager ownership reconciliation.
//!
//! When capstan takes over server-side-apply ownership of an object it must
//! absorb field sets recorded by legacy managers (kubectl, helm) without
//! stealing fields still owned by other active controllers. The merge is a
//! pure function over immutable snapshots so it can be tested on its own.

use std::collections::BTreeSet;

use serde_yaml::{Mapping, Value};

/// The field manager name capstan registers with the API server.
pub const OUR_MANAGER: &str = "capstan";

/// Managers whose field ownership we absorb wholesale.
pub const LEGACY_MANAGERS: &[&str] = &["kubectl", "kubectl-client-side-apply", "kubectl-edit", "helm"];

/// One entry of `metadata.managedFields`, with its field set flattened to
/// dotted paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldManagerEntry {
  pub manager: String,
  pub operation: String,
  pub fields: BTreeSet<String>,
}

/// Merge legacy managers' fields into ours and subtract overlap from
/// unrelated managers. Field ownership recorded by other active
/// controllers survives except where it collides with ours.
pub fn merge_field_ownership(existing: &[FieldManagerEntry], ours: &FieldManagerEntry) -> Vec<FieldManagerEntry> {
  let mut merged_fields = ours.fields.clone();
  for entry in existing {
    if entry.manager == ours.manager || LEGACY_MANAGERS.contains(&entry.manager.as_str()) {
      merged_fields.extend(entry.fields.iter().cloned());
    }
  }

  let mut result = vec![FieldManagerEntry {
    manager: ours.manager.clone(),
    operation: ours.operation.clone(),
    fields: merged_fields.clone(),
  }];

  for entry in existing {
    if entry.manager == ours.manager || LEGACY_MANAGERS.contains(&entry.manager.as_str()) {
      continue;
    }
    let remaining: BTreeSet<String> = entry.fields.difference(&merged_fields).cloned().collect();
    if !remaining.is_empty() {
      result.push(FieldManagerEntry {
        manager: entry.manager.clone(),
        operation: entry.operation.clone(),
        fields: remaining,
      });
    }
  }

  result
}

/// Parse `metadata.managedFields` out of a live document.
pub fn parse_managed_fields(doc: &Value) -> Vec<FieldManagerEntry> {
  let Some(entries) = doc
    .get("metadata")
    .and_then(|m| m.get("managedFields"))
    .and_then(Value::as_sequence)
  else {
    return Vec::new();
  };

  entries
    .iter()
    .filter_map(|entry| {
      let manager = entry.get("manager").and_then(Value::as_str)?.to_string();
      let operation = entry
        .get("operation")
        .and_then(Value::as_str)
        .unwrap_or("Update")
        .to_string();
      let mut fields = BTreeSet::new();
      if let Some(v1) = entry.get("fieldsV1") {
        flatten_fields(v1, String::new(), &mut fields);
      }
      Some(FieldManagerEntry {
        manager,
        operation,
        fields,
      })
    })
    .collect()
}

/// Write reconciled entries back as `metadata.managedFields`.
pub fn write_managed_fields(doc: &mut Value, entries: &[FieldManagerEntry]) {
  let sequence: Vec<Value> = entries
    .iter()
    .map(|entry| {
      let mut m = Mapping::new();
      m.insert(Value::String("manager".into()), Value::String(entry.manager.clone()));
      m.insert(Value::String("operation".into()), Value::String(entry.operation.clone()));
      m.insert(Value::String("fieldsV1".into()), unflatten_fields(&entry.fields));
      Value::Mapping(m)
    })
    .collect();

  if let Some(metadata) = doc.get_mut("metadata").and_then(Value::as_mapping_mut) {
    metadata.insert(Value::String("managedFields".into()), Value::Sequence(sequence));
  }
}

/// Take ownership of a live document's field managers under `OUR_MANAGER`,
/// returning the reconciled entries applied to the document.
pub fn take_field_ownership(doc: &mut Value) -> Vec<FieldManagerEntry> {
  let existing = parse_managed_fields(doc);
  if existing.is_empty() {
    return Vec::new();
  }
  let ours = FieldManagerEntry {
    manager: OUR_MANAGER.to_string(),
    operation: "Apply".to_string(),
    fields: BTreeSet::new(),
  };
  let merged = merge_field_ownership(&existing, &ours);
  write_managed_fields(doc, &merged);
  merged
}

/// Flatten `fieldsV1` maps (`f:spec: {f:replicas: {}}`) into dotted paths
/// (`f:spec.f:replicas`).
fn flatten_fields(value: &Value, prefix: String, out: &mut BTreeSet<String>) {
  let Some(mapping) = value.as_mapping() else {
    if !prefix.is_empty() {
      out.insert(prefix);
    }
    return;
  };
  if mapping.is_empty() {
    if !prefix.is_empty() {
      out.insert(prefix);
    }
    return;
  }
  for (key, child) in mapping {
    let Some(key) = key.as_str() else { continue };
    let path = if prefix.is_empty() {
      key.to_string()
    } else {
      format!("{prefix}.{key}")
    };
    flatten_fields(child, path, out);
  }
}

fn unflatten_fields(fields: &BTreeSet<String>) -> Value {
  let mut root = Mapping::new();
  for path in fields {
    let mut cursor = &mut root;
    let parts: Vec<&str> = path.split('.').collect();
    for part in parts {
      let entry = cursor
        .entry(Value::String(part.to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
      cursor = match entry {
        Value::Mapping(m) => m,
        _ => break,
      };
    }
  }
  Value::Mapping(root)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(manager: &str, fields: &[&str]) -> FieldManagerEntry {
    FieldManagerEntry {
      manager: manager.to_string(),
      operation: "Update".to_string(),
      fields: fields.iter().map(|f| f.to_string()).collect(),
    }
  }

  fn ours(fields: &[&str]) -> FieldManagerEntry {
    FieldManagerEntry {
      manager: OUR_MANAGER.to_string(),
      operation: "Apply".to_string(),
      fields: fields.iter().map(|f| f.to_string()).collect(),
    }
  }

  #[test]
  fn legacy_manager_fields_absorbed() {
    let existing = vec![entry("kubectl", &["f:spec.f:replicas", "f:spec.f:paused"])];
    let merged = merge_field_ownership(&existing, &ours(&["f:spec.f:template"]));

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].manager, OUR_MANAGER);
    assert!(merged[0].fields.contains("f:spec.f:replicas"));
    assert!(merged[0].fields.contains("f:spec.f:template"));
  }

  #[test]
  fn unrelated_manager_keeps_non_overlapping_fields() {
    let existing = vec![entry("hpa-controller", &["f:spec.f:replicas", "f:status.f:conditions"])];
    let merged = merge_field_ownership(&existing, &ours(&["f:spec.f:replicas"]));

    assert_eq!(merged.len(), 2);
    let hpa = merged.iter().find(|e| e.manager == "hpa-controller").unwrap();
    assert!(!hpa.fields.contains("f:spec.f:replicas"));
    assert!(hpa.fields.contains("f:status.f:conditions"));
  }

  #[test]
  fn unrelated_manager_fully_overlapped_is_dropped() {
    let existing = vec![entry("old-operator", &["f:spec.f:replicas"])];
    let merged = merge_field_ownership(&existing, &ours(&["f:spec.f:replicas"]));
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].manager, OUR_MANAGER);
  }

  #[test]
  fn merge_is_pure_over_inputs() {
    let existing = vec![entry("kubectl", &["f:spec.f:replicas"]), entry("hpa", &["f:spec.f:replicas"])];
    let o = ours(&[]);
    let first = merge_field_ownership(&existing, &o);
    let second = merge_field_ownership(&existing, &o);
    assert_eq!(first, second);
    // Inputs untouched.
    assert_eq!(existing[0].fields.len(), 1);
  }

  #[test]
  fn parse_and_write_round_trip() {
    let mut doc: Value = serde_yaml::from_str(
      r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: app
  managedFields:
    - manager: kubectl
      operation: Update
      fieldsV1:
        f:spec:
          f:replicas: {}
    - manager: hpa-controller
      operation: Update
      fieldsV1:
        f:spec:
          f:minReplicas: {}
"#,
    )
    .unwrap();

    let parsed = parse_managed_fields(&doc);
    assert_eq!(parsed.len(), 2);
    assert!(parsed[0].fields.contains("f:spec.f:replicas"));

    let merged = take_field_ownership(&mut doc);
    assert_eq!(merged[0].manager, OUR_MANAGER);
    assert!(merged[0].fields.contains("f:spec.f:replicas"));

    let reparsed = parse_managed_fields(&doc);
    assert_eq!(reparsed, merged);
  }

  #[test]
  fn no_managed_fields_is_a_no_op() {
    let mut doc: Value =
      serde_yaml::from_str("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n").unwrap();
    assert!(take_field_ownership(&mut doc).is_empty());
  }
}
