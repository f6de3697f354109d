//! The `ObjectStorage` trait: where datafiles come from.

use std::future::Future;

use bytes::Bytes;

/// A datafile read from object storage.
#[derive(Debug, Clone)]
pub struct DataFile {
  /// Full storage key, e.g. `world_bank/tariff/2021.csv`.
  pub key:  String,
  name:     String,
  pub data: Bytes,
}

impl DataFile {
  /// A file named after the last segment of `key`.
  pub fn new(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
    let key = key.into();
    let name = base_name(&key).to_owned();
    Self { key, name, data: data.into() }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// The name recorded in the registry and in `created_by`/`updated_by`.
  pub fn name(&self) -> &str { &self.name }
}

/// Last path segment of a storage key.
pub fn base_name(key: &str) -> &str {
  key.rsplit('/').next().unwrap_or(key)
}

/// `key` relative to the directory `prefix`, e.g. `2020/a.csv` for
/// `dit/baci/2020/a.csv` under `dit/baci`. Keys outside `prefix` fall back
/// to their base name.
pub fn relative_name<'a>(prefix: &str, key: &'a str) -> &'a str {
  let prefix = prefix.trim_matches('/');
  if prefix.is_empty() {
    return key.trim_start_matches('/');
  }
  key
    .strip_prefix(prefix)
    .and_then(|rest| rest.strip_prefix('/'))
    .filter(|rest| !rest.is_empty())
    .unwrap_or_else(|| base_name(key))
}

/// Listing artefacts that are never datafiles: hidden files and the
/// `[Content_Types].xml` left behind by zip-style uploads.
pub fn is_ignored(key: &str) -> bool {
  let name = base_name(key);
  name.is_empty() || name.starts_with('.') || name == "[Content_Types].xml"
}

/// A read-only view over a bucket or directory tree of datafiles.
pub trait ObjectStorage: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Keys of all files under `prefix`.
  fn list_files<'a>(
    &'a self,
    prefix: &'a str,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;

  fn read_file<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Bytes, Self::Error>> + Send + 'a;
}
