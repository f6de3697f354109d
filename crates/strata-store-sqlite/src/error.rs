//! Error type for `strata-store-sqlite`.

use std::time::Duration;

use strata_core::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),

  /// A delimited record does not match the target column list.
  #[error("record {record}: expected {expected} fields, found {found}")]
  FieldCount {
    record:   u64,
    expected: usize,
    found:    usize,
  },

  #[error("statement exceeded the {0:?} timeout and was interrupted")]
  StatementTimeout(Duration),

  #[error("unknown sequence: {0}")]
  UnknownSequence(String),

  #[error("unknown materialized view: {0}")]
  UnknownView(String),
}

impl StoreError for Error {
  fn is_validation(&self) -> bool {
    matches!(self, Error::Csv(_) | Error::FieldCount { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
