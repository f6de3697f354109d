//! Object storage backends: a local directory tree and an in-memory map.

use std::{
  collections::BTreeMap,
  io,
  path::{Path, PathBuf},
};

use bytes::Bytes;
use strata_core::storage::ObjectStorage;

// ─── Local directory ─────────────────────────────────────────────────────────

/// Datafiles under a root directory; keys are `/`-separated paths relative
/// to the root.
#[derive(Debug, Clone)]
pub struct LocalStorage {
  root: PathBuf,
}

impl LocalStorage {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  pub fn root(&self) -> &Path { &self.root }

  fn key_of(&self, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(&self.root).ok()?;
    let parts: Vec<&str> = rel
      .components()
      .map(|c| c.as_os_str().to_str())
      .collect::<Option<_>>()?;
    Some(parts.join("/"))
  }
}

impl ObjectStorage for LocalStorage {
  type Error = io::Error;

  async fn list_files<'a>(&'a self, prefix: &'a str) -> io::Result<Vec<String>> {
    let start = self.root.join(prefix.trim_matches('/'));
    let mut keys = Vec::new();
    let mut pending = vec![start];
    while let Some(dir) = pending.pop() {
      let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
        Err(e) => return Err(e),
      };
      while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
          pending.push(path);
        } else if let Some(key) = self.key_of(&path) {
          keys.push(key);
        }
      }
    }
    keys.sort();
    Ok(keys)
  }

  async fn read_file<'a>(&'a self, key: &'a str) -> io::Result<Bytes> {
    let data = tokio::fs::read(self.root.join(key)).await?;
    Ok(Bytes::from(data))
  }
}

// ─── In memory ───────────────────────────────────────────────────────────────

/// Datafiles held in memory; for tests and one-off loads.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
  files: BTreeMap<String, Bytes>,
}

impl MemoryStorage {
  pub fn new() -> Self { Self::default() }

  pub fn insert(&mut self, key: impl Into<String>, data: impl Into<Bytes>) {
    self.files.insert(key.into(), data.into());
  }

  pub fn with_file(mut self, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
    self.insert(key, data);
    self
  }
}

impl ObjectStorage for MemoryStorage {
  type Error = io::Error;

  async fn list_files<'a>(&'a self, prefix: &'a str) -> io::Result<Vec<String>> {
    let prefix = format!("{}/", prefix.trim_matches('/'));
    Ok(
      self
        .files
        .keys()
        .filter(|k| k.starts_with(&prefix))
        .cloned()
        .collect(),
    )
  }

  async fn read_file<'a>(&'a self, key: &'a str) -> io::Result<Bytes> {
    self
      .files
      .get(key)
      .cloned()
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, key.to_owned()))
  }
}
