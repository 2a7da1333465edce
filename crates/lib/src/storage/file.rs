//! File-backed release storage.
//!
//! # Storage layout
//!
//! ```text
//! {base}/
//! └── <release-name>/
//!     ├── 00001.json
//!     ├── 00002.json
//!     └── ...
//! ```
//!
//! Every write goes to a temp file first and is renamed into place, so a
//! crashed process never leaves a half-written record behind.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::release::Release;

use super::{ReleaseStorage, StorageError};

#[derive(Debug, Clone)]
pub struct FileStorage {
  base: PathBuf,
}

impl FileStorage {
  pub fn new(base: PathBuf) -> Self {
    Self { base }
  }

  pub fn base_path(&self) -> &PathBuf {
    &self.base
  }

  fn release_dir(&self, name: &str) -> PathBuf {
    self.base.join(name)
  }

  fn record_path(&self, name: &str, revision: u32) -> PathBuf {
    self.release_dir(name).join(format!("{revision:05}.json"))
  }

  fn write_record(&self, release: &Release) -> Result<(), StorageError> {
    let dir = self.release_dir(&release.name);
    fs::create_dir_all(&dir)?;

    let path = self.record_path(&release.name, release.revision);
    let temp_path = dir.join(format!("{:05}.json.tmp", release.revision));

    let content = serde_json::to_string_pretty(release)?;
    fs::write(&temp_path, &content)?;
    fs::rename(&temp_path, &path)?;
    Ok(())
  }
}

impl ReleaseStorage for FileStorage {
  fn create(&self, release: &Release) -> Result<(), StorageError> {
    if self.record_path(&release.name, release.revision).exists() {
      return Err(StorageError::AlreadyExists {
        name: release.name.clone(),
        revision: release.revision,
      });
    }
    self.write_record(release)
  }

  fn update(&self, release: &Release) -> Result<(), StorageError> {
    if !self.record_path(&release.name, release.revision).exists() {
      return Err(StorageError::ReleaseNotFound {
        name: release.name.clone(),
        revision: Some(release.revision),
      });
    }
    self.write_record(release)
  }

  fn get(&self, name: &str, revision: u32) -> Result<Release, StorageError> {
    let path = self.record_path(name, revision);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(StorageError::ReleaseNotFound {
          name: name.to_string(),
          revision: Some(revision),
        });
      }
      Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content)?)
  }

  fn history(&self, name: &str) -> Result<Vec<Release>, StorageError> {
    let dir = self.release_dir(name);
    let entries = match fs::read_dir(&dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(StorageError::ReleaseNotFound {
          name: name.to_string(),
          revision: None,
        });
      }
      Err(e) => return Err(e.into()),
    };

    let mut revisions: Vec<u32> = Vec::new();
    for entry in entries {
      let entry = entry?;
      let file_name = entry.file_name();
      let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
        continue;
      };
      if let Ok(revision) = stem.parse::<u32>() {
        revisions.push(revision);
      }
    }
    revisions.sort_unstable();

    revisions
      .into_iter()
      .map(|revision| self.get(name, revision))
      .collect()
  }
}
