//! The `Pipeline` trait and the layered table model shared by every
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use strata_core::{
  dataset::{Dataset, Derivation, TransformMap},
  identity::PipelineId,
  storage::DataFile,
  store::Store,
  table::{ColumnDef, TableRef, Tier, quote_ident},
};
use tracing::info;

use crate::{Error, Result};

/// Long enough for full-history rebuilds; only stops runaway statements.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(20 * 60 * 60);

// ─── Trait ───────────────────────────────────────────────────────────────────

/// A unit that turns datafiles (or, for derived datasets, existing tables)
/// into rows in its own schema.
///
/// Object-safe so the manager can hold heterogeneous pipelines.
#[async_trait]
pub trait Pipeline: Send + Sync {
  fn id(&self) -> &PipelineId;

  fn raw_columns(&self) -> &[ColumnDef];

  fn curated_columns(&self) -> &[ColumnDef];

  fn transform_map(&self) -> &TransformMap;

  /// Ingest one datafile. File-less pipelines receive `None`.
  async fn process(&self, file: Option<&DataFile>) -> Result<()>;
}

// ─── Layers ──────────────────────────────────────────────────────────────────

/// A pipeline's handle on its schema: resolves tier names to tables and
/// carries the store session.
#[derive(Clone)]
pub struct Layers<S> {
  store: S,
  id:    PipelineId,
}

impl<S: Store> Layers<S> {
  /// Bound the session's statement time and make sure the schema exists.
  pub async fn open(store: S, id: PipelineId, statement_timeout: Duration) -> Result<Self> {
    store.set_statement_timeout(statement_timeout);
    let schema = id.schema();
    if !store.schema_exists(&schema).await.map_err(Error::store)? {
      store.create_schema(&schema).await.map_err(Error::store)?;
      info!(pipeline = %id, "created schema");
    }
    Ok(Self { store, id })
  }

  pub fn id(&self) -> &PipelineId { &self.id }

  pub fn store(&self) -> &S { &self.store }

  pub fn table(&self, tier: Tier) -> TableRef { TableRef::tier(&self.id, tier) }

  pub fn sequence(&self, tier: Tier) -> TableRef { TableRef::sequence(&self.id, tier) }

  /// Any other table in the pipeline's schema.
  pub fn named(&self, name: &str) -> TableRef { TableRef::new(self.id.schema(), name) }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// The datafile, or a validation error for pipelines that need one.
pub(crate) fn require_file<'a>(id: &PipelineId, file: Option<&'a DataFile>) -> Result<&'a DataFile> {
  file.ok_or_else(|| Error::Validation(format!("pipeline {id} requires a datafile")))
}

/// Column definitions joined for a `CREATE TABLE` body.
pub(crate) fn columns_ddl(columns: &[ColumnDef]) -> String {
  columns
    .iter()
    .map(ColumnDef::ddl)
    .collect::<Vec<_>>()
    .join(", ")
}

pub(crate) fn column_names(columns: &[ColumnDef]) -> Vec<String> {
  columns.iter().map(|c| c.name.clone()).collect()
}

/// The `SELECT` list producing curated columns from raw ones.
fn transform_select(curated: &[ColumnDef], transforms: &TransformMap) -> String {
  curated
    .iter()
    .map(|c| transforms.expression(&c.name))
    .collect::<Vec<_>>()
    .join(", ")
}

/// A query yielding `source_row_id` followed by every curated column, for
/// the rows of `raw` matching `filter`.
pub(crate) fn derive_select(dataset: &Dataset, raw: &TableRef, filter: &str) -> String {
  let curated = &dataset.curated_columns;
  match &dataset.derivation {
    Derivation::PerRow => format!(
      "SELECT id AS source_row_id, {} FROM {raw} WHERE {filter}",
      transform_select(curated, &dataset.transforms)
    ),
    Derivation::Unpivot { columns, key, value } => columns
      .iter()
      .map(|column| {
        let cell = quote_ident(column);
        let select = curated
          .iter()
          .map(|c| {
            if &c.name == key {
              format!("'{}'", column.replace('\'', "''"))
            } else if &c.name == value {
              cell.clone()
            } else {
              dataset.transforms.expression(&c.name)
            }
          })
          .collect::<Vec<_>>()
          .join(", ");
        format!(
          "SELECT id AS source_row_id, {select} FROM {raw}
           WHERE ({filter}) AND {cell} IS NOT NULL"
        )
      })
      .collect::<Vec<_>>()
      .join(" UNION ALL "),
  }
}

/// Columns of the curated tier's uniqueness constraint.
pub(crate) fn curated_unique(dataset: &Dataset) -> String {
  std::iter::once("source_row_id".to_owned())
    .chain(dataset.curated_key().into_iter().map(quote_ident))
    .collect::<Vec<_>>()
    .join(", ")
}

#[cfg(test)]
mod tests {
  use strata_core::table::{ColumnType, columns};

  use super::*;

  fn wide() -> Dataset {
    Dataset::new(
      PipelineId::parse("test.wide").unwrap(),
      columns(&[
        ("name", ColumnType::Text),
        ("1999", ColumnType::Text),
        ("2000", ColumnType::Text),
      ]),
      columns(&[
        ("name", ColumnType::Text),
        ("year", ColumnType::Integer),
        ("code", ColumnType::Text),
      ]),
    )
    .with_transforms(TransformMap::new().with("name", "upper(\"name\")"))
    .with_unpivot(&["1999".to_owned(), "2000".to_owned()], "year", "code")
  }

  #[test]
  fn per_row_select_applies_transforms() {
    let ds = Dataset::new(
      PipelineId::parse("test.kv").unwrap(),
      columns(&[("k", ColumnType::Text)]),
      columns(&[("k", ColumnType::Text)]),
    );
    let raw = TableRef::new("test.kv", "L0");
    assert_eq!(
      derive_select(&ds, &raw, "true"),
      "SELECT id AS source_row_id, \"k\" FROM \"test.kv.L0\" WHERE true"
    );
    assert_eq!(curated_unique(&ds), "source_row_id");
  }

  #[test]
  fn unpivot_select_has_one_branch_per_column() {
    let raw = TableRef::new("test.wide", "L0");
    let sql = derive_select(&wide(), &raw, "created_by = ?1");
    let branches: Vec<&str> = sql.split(" UNION ALL ").collect();
    assert_eq!(branches.len(), 2);
    assert!(branches[0].contains("upper(\"name\"), '1999', \"1999\""));
    assert!(branches[1].ends_with("WHERE (created_by = ?1) AND \"2000\" IS NOT NULL"));
    assert_eq!(curated_unique(&wide()), "source_row_id, \"year\"");
  }
}
