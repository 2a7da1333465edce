//! Chart surface: document rendering, multi-document splitting and values
//! merging.
//!
//! Templating itself lives behind the `ChartRenderer` trait; the built-in
//! `StaticRenderer` serves charts that are plain YAML manifests on disk,
//! which is also what every test fixture uses.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

/// Errors loading or rendering a chart.
#[derive(Debug, Error)]
pub enum RenderError {
  #[error("chart path {0}: {1}")]
  Io(PathBuf, #[source] std::io::Error),

  #[error("chart contains no documents")]
  EmptyChart,

  #[error("invalid --set expression {0:?}: expected key.path=value")]
  InvalidSetExpression(String),

  #[error("document {path}: {source}")]
  Yaml {
    path: String,
    #[source]
    source: serde_yaml::Error,
  },
}

/// One rendered manifest document, keyed by its path within the chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
  pub path: String,
  pub yaml: String,
}

/// Renders a chart against merged values into an ordered document list.
/// Order is part of the contract: repeated renders of the same chart and
/// values produce the same sequence.
pub trait ChartRenderer {
  fn chart_name(&self) -> &str;
  fn chart_version(&self) -> &str;
  fn render(&self, values: &Value) -> Result<Vec<RenderedDocument>, RenderError>;
}

/// A chart of literal YAML manifests: no template evaluation, documents
/// returned in sorted path order.
#[derive(Debug, Clone)]
pub struct StaticRenderer {
  name: String,
  version: String,
  documents: Vec<RenderedDocument>,
}

impl StaticRenderer {
  pub fn new(name: impl Into<String>, version: impl Into<String>, documents: Vec<RenderedDocument>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
      documents,
    }
  }

  /// Load every `.yaml`/`.yml` file under `dir` (recursively), splitting
  /// multi-document files, in sorted path order.
  pub fn from_dir(name: impl Into<String>, version: impl Into<String>, dir: &Path) -> Result<Self, RenderError> {
    let mut paths = Vec::new();
    collect_manifest_paths(dir, &mut paths)?;
    paths.sort();

    let mut documents = Vec::new();
    for path in paths {
      let text = fs::read_to_string(&path).map_err(|e| RenderError::Io(path.clone(), e))?;
      let rel = path.strip_prefix(dir).unwrap_or(&path).display().to_string();
      for (index, doc) in split_documents(&text).into_iter().enumerate() {
        documents.push(RenderedDocument {
          path: if index == 0 { rel.clone() } else { format!("{rel}#{index}") },
          yaml: doc,
        });
      }
    }
    if documents.is_empty() {
      return Err(RenderError::EmptyChart);
    }
    debug!(count = documents.len(), chart = %dir.display(), "loaded chart documents");
    Ok(Self::new(name, version, documents))
  }
}

impl ChartRenderer for StaticRenderer {
  fn chart_name(&self) -> &str {
    &self.name
  }

  fn chart_version(&self) -> &str {
    &self.version
  }

  fn render(&self, _values: &Value) -> Result<Vec<RenderedDocument>, RenderError> {
    if self.documents.is_empty() {
      return Err(RenderError::EmptyChart);
    }
    Ok(self.documents.clone())
  }
}

fn collect_manifest_paths(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
  let entries = fs::read_dir(dir).map_err(|e| RenderError::Io(dir.to_path_buf(), e))?;
  for entry in entries {
    let entry = entry.map_err(|e| RenderError::Io(dir.to_path_buf(), e))?;
    let path = entry.path();
    if path.is_dir() {
      collect_manifest_paths(&path, out)?;
    } else if matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")) {
      out.push(path);
    }
  }
  Ok(())
}

/// Split a multi-document YAML string on `---` separators, dropping
/// documents that contain nothing but whitespace or comments.
pub fn split_documents(text: &str) -> Vec<String> {
  let mut docs = Vec::new();
  let mut current = String::new();
  for line in text.lines() {
    if line.trim_end() == "---" {
      push_document(&mut docs, &mut current);
    } else {
      current.push_str(line);
      current.push('\n');
    }
  }
  push_document(&mut docs, &mut current);
  docs
}

fn push_document(docs: &mut Vec<String>, current: &mut String) {
  let non_empty = current
    .lines()
    .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));
  if non_empty {
    docs.push(std::mem::take(current));
  } else {
    current.clear();
  }
}

/// Merge value overlays onto defaults, later overlays winning per key path.
/// Mappings merge recursively; any other type replaces wholesale.
pub fn merge_values(defaults: Value, overlays: &[Value]) -> Value {
  let mut merged = defaults;
  for overlay in overlays {
    merged = deep_merge(merged, overlay.clone());
  }
  merged
}

fn deep_merge(base: Value, overlay: Value) -> Value {
  match (base, overlay) {
    (Value::Mapping(mut base), Value::Mapping(overlay)) => {
      for (key, value) in overlay {
        let merged = match base.remove(&key) {
          Some(existing) => deep_merge(existing, value),
          None => value,
        };
        base.insert(key, merged);
      }
      Value::Mapping(base)
    }
    (_, overlay) => overlay,
  }
}

/// Parse one `--set key.path=value` expression into a single-path overlay
/// tree. The value is parsed as YAML, so numbers and booleans keep their
/// types; everything else stays a string.
pub fn parse_set_expression(expr: &str) -> Result<Value, RenderError> {
  let (path, raw) = expr
    .split_once('=')
    .ok_or_else(|| RenderError::InvalidSetExpression(expr.to_string()))?;
  if path.is_empty() || path.split('.').any(str::is_empty) {
    return Err(RenderError::InvalidSetExpression(expr.to_string()));
  }
  let leaf: Value = serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

  let mut value = leaf;
  for part in path.split('.').rev() {
    let mut map = serde_yaml::Mapping::new();
    map.insert(Value::String(part.to_string()), value);
    value = Value::Mapping(map);
  }
  Ok(value)
}
