//! Table references and column declarations.
//!
//! Each pipeline owns a schema named after its [`PipelineId`] holding two
//! tiers: `L0` (raw, source-faithful rows) and `L1` (curated, derived from
//! L0). Scratch tables use the `.temp` suffix and sequences the
//! `_SEQUENCE` suffix.

use std::fmt;

use crate::identity::PipelineId;

// ─── Tiers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
  /// `L0`: rows as they appeared in the source file.
  Raw,
  /// `L1`: typed, transformed rows linked back to L0 via `source_row_id`.
  Curated,
}

impl Tier {
  pub fn symbol(self) -> &'static str {
    match self {
      Tier::Raw => "L0",
      Tier::Curated => "L1",
    }
  }
}

// ─── Table references ────────────────────────────────────────────────────────

/// A `(schema, name)` pair.
///
/// Renders (via `Display`) as a single quoted identifier `"schema.name"`,
/// ready for interpolation into SQL. Backends without native schemas keep
/// the namespace as a name prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
  schema: String,
  name:   String,
}

impl TableRef {
  pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
    Self { schema: schema.into(), name: name.into() }
  }

  /// The tier table of a pipeline, e.g. `"dit.baci.L1"`.
  pub fn tier(id: &PipelineId, tier: Tier) -> Self {
    Self::new(id.schema(), tier.symbol())
  }

  /// The sequence backing id assignment for a tier, e.g. `L0_SEQUENCE`.
  pub fn sequence(id: &PipelineId, tier: Tier) -> Self {
    Self::new(id.schema(), format!("{}_SEQUENCE", tier.symbol()))
  }

  /// Scratch sibling of this table (`<name>.temp`).
  pub fn scratch(&self) -> Self {
    Self::new(self.schema.clone(), format!("{}.temp", self.name))
  }

  /// Sibling object in the same schema.
  pub fn sibling(&self, name: impl Into<String>) -> Self {
    Self::new(self.schema.clone(), name)
  }

  pub fn schema(&self) -> &str { &self.schema }

  pub fn name(&self) -> &str { &self.name }

  /// Unquoted `schema.name`.
  pub fn qualified(&self) -> String { format!("{}.{}", self.schema, self.name) }
}

impl fmt::Display for TableRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&quote_ident(&self.qualified()))
  }
}

/// Quote an SQL identifier, doubling any embedded quotes.
pub fn quote_ident(ident: &str) -> String {
  format!("\"{}\"", ident.replace('"', "\"\""))
}

// ─── Columns ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
  Integer,
  Decimal,
  Text,
  /// ISO-8601 `YYYY-MM-DD`.
  Date,
}

impl ColumnType {
  pub fn sql(self) -> &'static str {
    match self {
      ColumnType::Integer => "INTEGER",
      ColumnType::Decimal => "DECIMAL",
      ColumnType::Text => "TEXT",
      ColumnType::Date => "DATE",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
  pub name: String,
  pub ty:   ColumnType,
}

impl ColumnDef {
  pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
    Self { name: name.into(), ty }
  }

  /// `"name" TYPE`, for use in `CREATE TABLE`.
  pub fn ddl(&self) -> String {
    format!("{} {}", quote_ident(&self.name), self.ty.sql())
  }
}

/// Shorthand for declaring a column list.
pub fn columns(defs: &[(&str, ColumnType)]) -> Vec<ColumnDef> {
  defs.iter().map(|(n, t)| ColumnDef::new(*n, *t)).collect()
}

/// Comma-joined quoted column names, optionally prefixed with a table alias.
pub fn column_list(columns: &[ColumnDef], alias: Option<&str>) -> String {
  columns
    .iter()
    .map(|c| match alias {
      Some(a) => format!("{a}.{}", quote_ident(&c.name)),
      None => quote_ident(&c.name),
    })
    .collect::<Vec<_>>()
    .join(", ")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_refs_render_as_single_identifier() {
    let id = PipelineId::parse("dit.baci").unwrap();
    let l1 = TableRef::tier(&id, Tier::Curated);
    assert_eq!(l1.to_string(), "\"dit.baci.L1\"");
    assert_eq!(l1.scratch().to_string(), "\"dit.baci.L1.temp\"");
    assert_eq!(
      TableRef::sequence(&id, Tier::Raw).qualified(),
      "dit.baci.L0_SEQUENCE"
    );
  }

  #[test]
  fn quote_ident_escapes_quotes() {
    assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
  }

  #[test]
  fn column_list_with_alias() {
    let cols = columns(&[("year", ColumnType::Integer), ("iso3", ColumnType::Text)]);
    assert_eq!(column_list(&cols, None), "\"year\", \"iso3\"");
    assert_eq!(column_list(&cols, Some("s")), "s.\"year\", s.\"iso3\"");
  }
}
