//! Datafile registry types.
//!
//! The registry records, per `(source, file_name)`, whether a file has been
//! processed, is in flight, failed or was deliberately ignored.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatafileState {
  Processing,
  Processed,
  Failed,
  Ignored,
}

impl DatafileState {
  pub fn as_str(self) -> &'static str {
    match self {
      DatafileState::Processing => "processing",
      DatafileState::Processed => "processed",
      DatafileState::Failed => "failed",
      DatafileState::Ignored => "ignored",
    }
  }

  /// Files in a done state are skipped by subsequent runs.
  pub fn is_done(self) -> bool {
    matches!(self, DatafileState::Processed | DatafileState::Ignored)
  }

  /// States a `processing` entry may move to.
  pub fn is_outcome(self) -> bool {
    matches!(self, DatafileState::Processed | DatafileState::Failed)
  }
}

impl fmt::Display for DatafileState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DatafileState {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "processing" => Ok(DatafileState::Processing),
      "processed" => Ok(DatafileState::Processed),
      "failed" => Ok(DatafileState::Failed),
      "ignored" => Ok(DatafileState::Ignored),
      other => Err(Error::UnknownState(other.to_owned())),
    }
  }
}

/// One row of the registry.
///
/// File-less pipeline runs are recorded with an empty `file_name`; those
/// entries are never deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
  pub id:            i64,
  pub source:        String,
  pub file_name:     String,
  pub state:         DatafileState,
  pub error_message: Option<String>,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn states_parse_from_their_names() {
    for state in [
      DatafileState::Processing,
      DatafileState::Processed,
      DatafileState::Failed,
      DatafileState::Ignored,
    ] {
      assert_eq!(state.as_str().parse::<DatafileState>().unwrap(), state);
    }
    assert!("PROCESSED".parse::<DatafileState>().is_err());
  }

  #[test]
  fn done_states() {
    assert!(DatafileState::Processed.is_done());
    assert!(DatafileState::Ignored.is_done());
    assert!(!DatafileState::Failed.is_done());
    assert!(!DatafileState::Processing.is_done());
  }
}
