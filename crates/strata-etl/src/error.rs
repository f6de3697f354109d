//! Error type for `strata-etl`.

use strata_core::{identity::PipelineId, registry::DatafileState, store::StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] strata_core::Error),

  /// Any failure reported by the relational store backend.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// Any failure reported by object storage.
  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("invalid datafile: {0}")]
  Validation(String),

  /// The pipeline cannot run at all; never swallowed by the manager.
  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("pipeline already registered: {0}")]
  AlreadyRegistered(PipelineId),

  #[error("unknown pipeline: {0}")]
  UnknownPipeline(PipelineId),

  #[error("registry entry {data_source}/{file_name:?} cannot move to {to}")]
  InvalidTransition {
    data_source: String,
    file_name:   String,
    to:          DatafileState,
  },

  #[error("malformed registry row: {0}")]
  Decode(String),

  #[error("worker task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Error::Store(Box::new(e))
  }

  /// A store error raised while loading a datafile: bad content becomes
  /// [`Error::Validation`], anything else stays a store error.
  pub fn load(e: impl StoreError) -> Self {
    if e.is_validation() { Error::Validation(e.to_string()) } else { Error::store(e) }
  }

  pub fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Error::Storage(Box::new(e))
  }

  /// Errors that mean the pipeline is unusable rather than that one file
  /// was bad.
  pub fn is_fatal(&self) -> bool {
    matches!(self, Error::Core(_) | Error::Configuration(_))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
