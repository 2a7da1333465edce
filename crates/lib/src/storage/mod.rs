//! Release storage: a key-value store of release records with history.
//!
//! Callers must distinguish "no such release" from real I/O failure, so
//! `StorageError::ReleaseNotFound` is its own variant. Exactly one deploy,
//! rollback or uninstall mutates a given release name at a time; that
//! serialization is the caller's responsibility, not implemented here.

pub mod file;

use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::release::{Release, ReleaseStatus};

pub use file::FileStorage;

/// Errors from release storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
  /// No such release or revision. Callers use this to decide
  /// install-instead-of-upgrade and similar.
  #[error("release not found: {name} revision {revision:?}")]
  ReleaseNotFound { name: String, revision: Option<u32> },

  /// A record with this revision already exists.
  #[error("release already exists: {name} revision {revision}")]
  AlreadyExists { name: String, revision: u32 },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("corrupt release record: {0}")]
  Corrupt(#[from] serde_json::Error),
}

/// CRUD plus history over persisted release records.
pub trait ReleaseStorage: Send + Sync {
  fn create(&self, release: &Release) -> Result<(), StorageError>;

  /// Update an existing record; the record must already exist.
  fn update(&self, release: &Release) -> Result<(), StorageError>;

  fn get(&self, name: &str, revision: u32) -> Result<Release, StorageError>;

  /// All revisions of a release, ascending.
  fn history(&self, name: &str) -> Result<Vec<Release>, StorageError>;

  /// The latest revision.
  fn last(&self, name: &str) -> Result<Release, StorageError> {
    self
      .history(name)?
      .pop()
      .ok_or_else(|| StorageError::ReleaseNotFound {
        name: name.to_string(),
        revision: None,
      })
  }

  /// Every revision currently in deployed status (expected at most one).
  fn deployed_all(&self, name: &str) -> Result<Vec<Release>, StorageError> {
    Ok(
      self
        .history(name)?
        .into_iter()
        .filter(|r| r.info.status == ReleaseStatus::Deployed)
        .collect(),
    )
  }
}

/// In-memory storage for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  records: Mutex<BTreeMap<(String, u32), Release>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ReleaseStorage for MemoryStorage {
  fn create(&self, release: &Release) -> Result<(), StorageError> {
    let mut records = self.records.lock().expect("storage lock poisoned");
    let key = (release.name.clone(), release.revision);
    if records.contains_key(&key) {
      return Err(StorageError::AlreadyExists {
        name: release.name.clone(),
        revision: release.revision,
      });
    }
    records.insert(key, release.clone());
    Ok(())
  }

  fn update(&self, release: &Release) -> Result<(), StorageError> {
    let mut records = self.records.lock().expect("storage lock poisoned");
    let key = (release.name.clone(), release.revision);
    if !records.contains_key(&key) {
      return Err(StorageError::ReleaseNotFound {
        name: release.name.clone(),
        revision: Some(release.revision),
      });
    }
    records.insert(key, release.clone());
    Ok(())
  }

  fn get(&self, name: &str, revision: u32) -> Result<Release, StorageError> {
    let records = self.records.lock().expect("storage lock poisoned");
    records
      .get(&(name.to_string(), revision))
      .cloned()
      .ok_or_else(|| StorageError::ReleaseNotFound {
        name: name.to_string(),
        revision: Some(revision),
      })
  }

  fn history(&self, name: &str) -> Result<Vec<Release>, StorageError> {
    let records = self.records.lock().expect("storage lock poisoned");
    Ok(
      records
        .range((name.to_string(), 0)..=(name.to_string(), u32::MAX))
        .map(|(_, r)| r.clone())
        .collect(),
    )
  }
}

/// History for a release, tolerating a missing release as empty history.
pub fn history_or_empty(storage: &dyn ReleaseStorage, name: &str) -> Result<Vec<Release>, StorageError> {
  match storage.history(name) {
    Ok(history) => Ok(history),
    Err(StorageError::ReleaseNotFound { .. }) => Ok(Vec::new()),
    Err(e) => Err(e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn release(name: &str, revision: u32, status: ReleaseStatus) -> Release {
    let mut r = Release::new_pending(
      name,
      "default",
      revision,
      "chart",
      "1.0.0",
      serde_yaml::Value::Null,
      String::new(),
      Vec::new(),
      ReleaseStatus::PendingInstall,
    );
    r.info.status = status;
    r
  }

  #[test]
  fn create_then_get() {
    let storage = MemoryStorage::new();
    storage.create(&release("web", 1, ReleaseStatus::Deployed)).unwrap();
    let got = storage.get("web", 1).unwrap();
    assert_eq!(got.revision, 1);
  }

  #[test]
  fn create_duplicate_fails() {
    let storage = MemoryStorage::new();
    storage.create(&release("web", 1, ReleaseStatus::Deployed)).unwrap();
    let err = storage.create(&release("web", 1, ReleaseStatus::Failed)).unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }));
  }

  #[test]
  fn update_missing_is_not_found() {
    let storage = MemoryStorage::new();
    let err = storage.update(&release("web", 1, ReleaseStatus::Deployed)).unwrap_err();
    assert!(matches!(err, StorageError::ReleaseNotFound { .. }));
  }

  #[test]
  fn history_is_ascending_and_scoped_by_name() {
    let storage = MemoryStorage::new();
    storage.create(&release("web", 2, ReleaseStatus::Deployed)).unwrap();
    storage.create(&release("web", 1, ReleaseStatus::Superseded)).unwrap();
    storage.create(&release("other", 1, ReleaseStatus::Deployed)).unwrap();

    let history = storage.history("web").unwrap();
    let revisions: Vec<u32> = history.iter().map(|r| r.revision).collect();
    assert_eq!(revisions, vec![1, 2]);
  }

  #[test]
  fn last_and_deployed_all() {
    let storage = MemoryStorage::new();
    storage.create(&release("web", 1, ReleaseStatus::Superseded)).unwrap();
    storage.create(&release("web", 2, ReleaseStatus::Deployed)).unwrap();
    storage.create(&release("web", 3, ReleaseStatus::Failed)).unwrap();

    assert_eq!(storage.last("web").unwrap().revision, 3);
    let deployed = storage.deployed_all("web").unwrap();
    assert_eq!(deployed.len(), 1);
    assert_eq!(deployed[0].revision, 2);
  }

  #[test]
  fn missing_release_distinct_from_other_errors() {
    let storage = MemoryStorage::new();
    assert!(matches!(
      storage.last("ghost").unwrap_err(),
      StorageError::ReleaseNotFound { .. }
    ));
    assert!(history_or_empty(&storage, "ghost").unwrap().is_empty());
  }
}
