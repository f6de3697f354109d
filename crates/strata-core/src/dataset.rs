//! Dataset declarations: the columns of each tier, the L0 → L1 transform
//! map and the delimited format of the source files.

use std::collections::{BTreeMap, HashSet};

use crate::{
  Error, Result,
  identity::PipelineId,
  table::{ColumnDef, quote_ident},
};

// ─── Transform map ───────────────────────────────────────────────────────────

/// Curated column name → SQL expression over raw columns.
///
/// Curated columns without an entry are copied from the raw column of the
/// same name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformMap(BTreeMap<String, String>);

impl TransformMap {
  pub fn new() -> Self { Self::default() }

  pub fn with(mut self, column: impl Into<String>, expr: impl Into<String>) -> Self {
    self.0.insert(column.into(), expr.into());
    self
  }

  pub fn get(&self, column: &str) -> Option<&str> {
    self.0.get(column).map(String::as_str)
  }

  /// The SQL producing `column`, falling back to the identity mapping.
  pub fn expression(&self, column: &str) -> String {
    self
      .get(column)
      .map(str::to_owned)
      .unwrap_or_else(|| quote_ident(column))
  }

  pub fn columns(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(String::as_str)
  }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

// ─── Derivation ──────────────────────────────────────────────────────────────

/// How curated rows are produced from raw rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Derivation {
  /// One curated row per raw row, built from the transform map.
  #[default]
  PerRow,
  /// One curated row per non-null cell of the raw `columns`, turning a wide
  /// delivery into long form. The curated `key` column receives the raw
  /// column's name and `value` receives the cell; other curated columns
  /// come from the transform map.
  Unpivot {
    columns: Vec<String>,
    key:     String,
    value:   String,
  },
}

// ─── Delimited format ────────────────────────────────────────────────────────

/// How a datafile is split into fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedFormat {
  pub delimiter:          u8,
  pub quote:              u8,
  /// Skip the first record.
  pub has_header:         bool,
  /// Treat a field written as `""` as SQL NULL rather than empty text.
  pub strip_empty_quotes: bool,
}

impl Default for DelimitedFormat {
  fn default() -> Self {
    Self {
      delimiter:          b',',
      quote:              b'"',
      has_header:         true,
      strip_empty_quotes: false,
    }
  }
}

// ─── Dataset ─────────────────────────────────────────────────────────────────

/// Everything a file-based pipeline needs to know about its dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
  pub id:               PipelineId,
  /// Columns of the source file, in file order.
  pub raw_columns:      Vec<ColumnDef>,
  pub curated_columns:  Vec<ColumnDef>,
  pub transforms:       TransformMap,
  /// Raw columns whose values define row identity. `None` means all of them.
  pub identity_columns: Option<Vec<String>>,
  pub derivation:       Derivation,
  pub format:           DelimitedFormat,
}

impl Dataset {
  pub fn new(
    id: PipelineId,
    raw_columns: Vec<ColumnDef>,
    curated_columns: Vec<ColumnDef>,
  ) -> Self {
    Self {
      id,
      raw_columns,
      curated_columns,
      transforms: TransformMap::new(),
      identity_columns: None,
      derivation: Derivation::PerRow,
      format: DelimitedFormat::default(),
    }
  }

  pub fn with_transforms(mut self, transforms: TransformMap) -> Self {
    self.transforms = transforms;
    self
  }

  pub fn with_identity(mut self, columns: &[&str]) -> Self {
    self.identity_columns = Some(columns.iter().map(|c| (*c).to_owned()).collect());
    self
  }

  /// Spread each raw row over one curated row per non-null cell of
  /// `columns`.
  pub fn with_unpivot(mut self, columns: &[String], key: &str, value: &str) -> Self {
    self.derivation = Derivation::Unpivot {
      columns: columns.to_vec(),
      key:     key.to_owned(),
      value:   value.to_owned(),
    };
    self
  }

  pub fn with_format(mut self, format: DelimitedFormat) -> Self {
    self.format = format;
    self
  }

  /// Raw column names used to compute the row content hash.
  pub fn identity(&self) -> Vec<&str> {
    match &self.identity_columns {
      Some(cols) => cols.iter().map(String::as_str).collect(),
      None => self.raw_columns.iter().map(|c| c.name.as_str()).collect(),
    }
  }

  /// Curated columns that identify a curated row together with
  /// `source_row_id`.
  pub fn curated_key(&self) -> Vec<&str> {
    match &self.derivation {
      Derivation::PerRow => Vec::new(),
      Derivation::Unpivot { key, .. } => vec![key.as_str()],
    }
  }

  /// Reject declarations that could never produce a valid pair of tiers.
  pub fn validate(&self) -> Result<()> {
    let dataset = self.id.to_string();
    if self.raw_columns.is_empty() {
      return Err(Error::MissingColumns { dataset, tier: "raw" });
    }
    if self.curated_columns.is_empty() {
      return Err(Error::MissingColumns { dataset, tier: "curated" });
    }

    for cols in [&self.raw_columns, &self.curated_columns] {
      let mut seen = HashSet::new();
      for c in cols {
        if !seen.insert(c.name.as_str()) {
          return Err(Error::DuplicateColumn { dataset, column: c.name.clone() });
        }
      }
    }

    for column in self.transforms.columns() {
      if !self.curated_columns.iter().any(|c| c.name == column) {
        return Err(Error::UnknownTransformColumn {
          dataset,
          column: column.to_owned(),
        });
      }
    }

    if let Derivation::Unpivot { columns, key, value } = &self.derivation {
      if columns.is_empty() {
        return Err(Error::MissingColumns { dataset, tier: "unpivot" });
      }
      let raw = columns.iter().find(|col| !self.raw_columns.iter().any(|c| &c.name == *col));
      let curated = [key, value]
        .into_iter()
        .find(|col| !self.curated_columns.iter().any(|c| &c.name == *col));
      if let Some(column) = raw.or(curated) {
        return Err(Error::UnknownUnpivotColumn { dataset, column: column.clone() });
      }
    }

    if let Some(identity) = &self.identity_columns {
      if identity.is_empty() {
        return Err(Error::MissingColumns { dataset, tier: "identity" });
      }
      for column in identity {
        if !self.raw_columns.iter().any(|c| &c.name == column) {
          return Err(Error::UnknownIdentityColumn {
            dataset,
            column: column.clone(),
          });
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::table::{ColumnType, columns};

  fn dataset() -> Dataset {
    Dataset::new(
      PipelineId::parse("org.ds").unwrap(),
      columns(&[("a", ColumnType::Text), ("b", ColumnType::Text)]),
      columns(&[("a", ColumnType::Integer)]),
    )
  }

  #[test]
  fn transform_map_defaults_to_identity() {
    let map = TransformMap::new().with("when", "date(raw_when)");
    assert_eq!(map.expression("when"), "date(raw_when)");
    assert_eq!(map.expression("iso3"), "\"iso3\"");
  }

  #[test]
  fn valid_dataset_passes() {
    dataset().validate().unwrap();
    assert_eq!(dataset().identity(), vec!["a", "b"]);
    assert_eq!(dataset().with_identity(&["b"]).identity(), vec!["b"]);
  }

  #[test]
  fn empty_columns_are_rejected() {
    let mut ds = dataset();
    ds.curated_columns.clear();
    assert!(matches!(
      ds.validate(),
      Err(Error::MissingColumns { tier: "curated", .. })
    ));
  }

  #[test]
  fn unknown_transform_target_is_rejected() {
    let ds = dataset().with_transforms(TransformMap::new().with("zzz", "1"));
    assert!(matches!(
      ds.validate(),
      Err(Error::UnknownTransformColumn { .. })
    ));
  }

  #[test]
  fn unpivot_columns_must_be_declared() {
    let wide = Dataset::new(
      PipelineId::parse("org.wide").unwrap(),
      columns(&[("iso3", ColumnType::Text), ("2001", ColumnType::Text)]),
      columns(&[
        ("iso3", ColumnType::Text),
        ("year", ColumnType::Integer),
        ("code", ColumnType::Text),
      ]),
    );
    let years = vec!["2001".to_owned()];
    let ok = wide.clone().with_unpivot(&years, "year", "code");
    ok.validate().unwrap();
    assert_eq!(ok.curated_key(), vec!["year"]);
    assert!(dataset().curated_key().is_empty());

    let bad_raw = wide.clone().with_unpivot(&["1999".to_owned()], "year", "code");
    assert!(matches!(
      bad_raw.validate(),
      Err(Error::UnknownUnpivotColumn { column, .. }) if column == "1999"
    ));
    let bad_key = wide.clone().with_unpivot(&years, "when", "code");
    assert!(matches!(bad_key.validate(), Err(Error::UnknownUnpivotColumn { .. })));
    let empty = wide.with_unpivot(&[], "year", "code");
    assert!(matches!(
      empty.validate(),
      Err(Error::MissingColumns { tier: "unpivot", .. })
    ));
  }

  #[test]
  fn unknown_identity_column_is_rejected() {
    let ds = dataset().with_identity(&["nope"]);
    assert!(matches!(ds.validate(), Err(Error::UnknownIdentityColumn { .. })));
  }
}
