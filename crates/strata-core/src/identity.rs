//! Pipeline identity: `organisation.dataset[.subdataset][.format_version]`.
//!
//! The dotted form doubles as the pipeline's schema name in the relational
//! store and as the `source` key in the datafile registry.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identity of a pipeline (and of the dataset it maintains).
///
/// Every component is restricted to `[A-Za-z0-9_-]+`, so the dotted
/// rendering always parses back into the same components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PipelineId {
  organisation:   String,
  dataset:        String,
  subdataset:     Option<String>,
  format_version: Option<String>,
}

fn component(raw: &str) -> Result<String> {
  let valid = !raw.is_empty()
    && raw
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
  if valid {
    Ok(raw.to_owned())
  } else {
    Err(Error::InvalidIdentity(raw.to_owned()))
  }
}

impl PipelineId {
  pub fn new(organisation: &str, dataset: &str) -> Result<Self> {
    Ok(Self {
      organisation:   component(organisation)?,
      dataset:        component(dataset)?,
      subdataset:     None,
      format_version: None,
    })
  }

  pub fn with_subdataset(mut self, subdataset: &str) -> Result<Self> {
    self.subdataset = Some(component(subdataset)?);
    Ok(self)
  }

  pub fn with_format_version(mut self, version: &str) -> Result<Self> {
    self.format_version = Some(component(version)?);
    Ok(self)
  }

  /// Parse the dotted form. A third component is the sub-dataset, a fourth
  /// the format version.
  pub fn parse(dotted: &str) -> Result<Self> {
    let parts: Vec<&str> = dotted.split('.').collect();
    let id = match parts.as_slice() {
      [org, ds] => Self::new(org, ds)?,
      [org, ds, sub] => Self::new(org, ds)?.with_subdataset(sub)?,
      [org, ds, sub, ver] => Self::new(org, ds)?
        .with_subdataset(sub)?
        .with_format_version(ver)?,
      _ => return Err(Error::MalformedIdentity(dotted.to_owned())),
    };
    Ok(id)
  }

  pub fn organisation(&self) -> &str { &self.organisation }

  pub fn dataset(&self) -> &str { &self.dataset }

  pub fn subdataset(&self) -> Option<&str> { self.subdataset.as_deref() }

  pub fn format_version(&self) -> Option<&str> { self.format_version.as_deref() }

  /// `organisation.dataset`: the grouping key shared by sibling pipelines.
  pub fn data_source(&self) -> String {
    format!("{}.{}", self.organisation, self.dataset)
  }

  /// Name of the store schema holding this pipeline's tables.
  pub fn schema(&self) -> String { self.to_string() }
}

impl fmt::Display for PipelineId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.organisation, self.dataset)?;
    if let Some(sub) = &self.subdataset {
      write!(f, ".{sub}")?;
    }
    if let Some(ver) = &self.format_version {
      write!(f, ".{ver}")?;
    }
    Ok(())
  }
}

impl FromStr for PipelineId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl TryFrom<String> for PipelineId {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { Self::parse(&s) }
}

impl From<PipelineId> for String {
  fn from(id: PipelineId) -> Self { id.to_string() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dotted_form_includes_optional_components() {
    let id = PipelineId::new("world_bank", "tariff").unwrap();
    assert_eq!(id.to_string(), "world_bank.tariff");

    let id = id.with_subdataset("transformed").unwrap();
    assert_eq!(id.to_string(), "world_bank.tariff.transformed");
    assert_eq!(id.data_source(), "world_bank.tariff");
    assert_eq!(id.schema(), "world_bank.tariff.transformed");
  }

  #[test]
  fn parse_round_trips_display() {
    for s in ["ons.postcode_directory", "dit.baci.hs6", "a.b.c.v2-1"] {
      assert_eq!(PipelineId::parse(s).unwrap().to_string(), s);
    }
  }

  #[test]
  fn rejects_dots_and_spaces_in_components() {
    assert!(PipelineId::new("world.bank", "tariff").is_err());
    assert!(PipelineId::new("world bank", "tariff").is_err());
    assert!(PipelineId::new("", "tariff").is_err());
    assert!(PipelineId::parse("onlyone").is_err());
    assert!(PipelineId::parse("a.b.c.d.e").is_err());
  }

  #[test]
  fn serialises_as_dotted_string() {
    let id = PipelineId::parse("dit.eu_country_membership").unwrap();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"dit.eu_country_membership\"");
    let back: PipelineId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
  }
}
