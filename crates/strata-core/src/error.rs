//! Error types for `strata-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid identity component {0:?}: expected [A-Za-z0-9_-]+")]
  InvalidIdentity(String),

  #[error("malformed pipeline identity {0:?}")]
  MalformedIdentity(String),

  #[error("dataset {dataset} declares no {tier} columns")]
  MissingColumns { dataset: String, tier: &'static str },

  #[error("dataset {dataset}: transform targets unknown curated column {column:?}")]
  UnknownTransformColumn { dataset: String, column: String },

  #[error("dataset {dataset}: identity column {column:?} is not a raw column")]
  UnknownIdentityColumn { dataset: String, column: String },

  #[error("dataset {dataset}: unpivot column {column:?} is not declared")]
  UnknownUnpivotColumn { dataset: String, column: String },

  #[error("dataset {dataset}: duplicate column {column:?}")]
  DuplicateColumn { dataset: String, column: String },

  #[error("unknown datafile state: {0:?}")]
  UnknownState(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
