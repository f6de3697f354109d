//! Runtime settings: `strata.toml` layered under `STRATA_*` variables.
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `STRATA_TARIFF__WORKERS=4`.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::Deserialize;
use strata_etl::tariff::{DEFAULT_CUTOFF_YEAR, DEFAULT_WORKERS};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub database_path:          PathBuf,
  /// Root directory holding one sub-directory per dataset.
  pub storage_root:           PathBuf,
  pub statement_timeout_secs: u64,
  pub tariff:                 TariffSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TariffSettings {
  pub workers:     usize,
  pub cutoff_year: i64,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      database_path:          PathBuf::from("strata.db"),
      storage_root:           PathBuf::from("datafiles"),
      statement_timeout_secs: 20 * 60 * 60,
      tariff:                 TariffSettings::default(),
    }
  }
}

impl Default for TariffSettings {
  fn default() -> Self {
    Self { workers: DEFAULT_WORKERS, cutoff_year: DEFAULT_CUTOFF_YEAR }
  }
}

impl Settings {
  /// Read `path` if it exists, then apply the environment on top.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("STRATA").separator("__"))
      .build()?
      .try_deserialize()
  }

  pub fn statement_timeout(&self) -> Duration { Duration::from_secs(self.statement_timeout_secs) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_sources_give_defaults() {
    let settings: Settings = config::Config::builder()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(settings.tariff.workers, 10);
    assert_eq!(settings.tariff.cutoff_year, 2000);
    assert_eq!(settings.statement_timeout(), Duration::from_secs(72_000));
  }

  #[test]
  fn nested_keys_override_defaults() {
    let settings: Settings = config::Config::builder()
      .set_override("tariff.workers", 3)
      .unwrap()
      .set_override("database_path", "/tmp/x.db")
      .unwrap()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(settings.tariff.workers, 3);
    assert_eq!(settings.tariff.cutoff_year, 2000);
    assert_eq!(settings.database_path, PathBuf::from("/tmp/x.db"));
  }

  #[test]
  fn missing_file_is_not_an_error() {
    let dir = std::env::temp_dir().join("strata-settings-missing.toml");
    let settings = Settings::load(&dir).unwrap();
    assert_eq!(settings.storage_root, PathBuf::from("datafiles"));
  }
}
