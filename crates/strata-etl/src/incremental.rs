//! Incremental pipelines: each datafile carries only new events and is
//! always appended.
//!
//! Surrogate ids come from per-tier sequences so that raw and curated rows
//! can be built in scratch tables and then appended in one transaction.

use std::time::Duration;

use async_trait::async_trait;
use strata_core::{
  dataset::{Dataset, TransformMap},
  identity::PipelineId,
  storage::DataFile,
  store::{Statement, Store, Value},
  table::{ColumnDef, TableRef, Tier, column_list},
};
use tracing::{debug, info};

use crate::{
  Error, Result,
  pipeline::{
    Layers, Pipeline, column_names, columns_ddl, curated_unique, derive_select, require_file,
  },
};

pub struct IncrementalPipeline<S> {
  layers:  Layers<S>,
  dataset: Dataset,
}

impl<S: Store> IncrementalPipeline<S> {
  pub async fn new(store: S, dataset: Dataset, statement_timeout: Duration) -> Result<Self> {
    dataset.validate()?;
    let layers = Layers::open(store, dataset.id.clone(), statement_timeout).await?;
    Ok(Self { layers, dataset })
  }

  pub fn dataset(&self) -> &Dataset { &self.dataset }

  async fn ensure_tables(&self) -> Result<()> {
    let store = self.layers.store();
    let raw = self.layers.table(Tier::Raw);
    let curated = self.layers.table(Tier::Curated);
    let unique = curated_unique(&self.dataset);
    store
      .execute_atomic(vec![
        Statement::new(format!(
          "CREATE TABLE IF NOT EXISTS {raw} (
             id INTEGER PRIMARY KEY,
             created_by TEXT NOT NULL,
             {}
           )",
          columns_ddl(&self.dataset.raw_columns)
        )),
        Statement::new(format!(
          "CREATE TABLE IF NOT EXISTS {curated} (
             id INTEGER PRIMARY KEY,
             source_row_id INTEGER NOT NULL,
             {},
             UNIQUE ({unique})
           )",
          columns_ddl(&self.dataset.curated_columns)
        )),
      ])
      .await
      .map_err(Error::store)?;
    for tier in [Tier::Raw, Tier::Curated] {
      store
        .create_sequence(&self.layers.sequence(tier))
        .await
        .map_err(Error::store)?;
    }
    Ok(())
  }

  /// Number a freshly filled scratch table from the tier's sequence, in
  /// insertion order.
  async fn assign_ids(&self, scratch: &TableRef, tier: Tier, rows: u64) -> Result<()> {
    if rows == 0 {
      return Ok(());
    }
    let store = self.layers.store();
    let first = store
      .next_values(&self.layers.sequence(tier), rows)
      .await
      .map_err(Error::store)?;
    store
      .execute(
        &format!(
          "UPDATE {scratch} SET id = rowid - (SELECT min(rowid) FROM {scratch}) + ?1"
        ),
        &[Value::Integer(first)],
      )
      .await
      .map_err(Error::store)?;
    debug!(table = %scratch, first, rows, "assigned surrogate ids");
    Ok(())
  }

  pub async fn append(&self, file: &DataFile) -> Result<u64> {
    let store = self.layers.store();
    let name = file.name();
    let raw = self.layers.table(Tier::Raw);
    let curated = self.layers.table(Tier::Curated);
    let raw_scratch = raw.scratch();
    let curated_scratch = curated.scratch();
    let raw_cols = column_list(&self.dataset.raw_columns, None);
    let curated_cols = column_list(&self.dataset.curated_columns, None);

    self.ensure_tables().await?;

    for (table, helpers, data) in [
      (&raw_scratch, "id INTEGER, created_by TEXT", &self.dataset.raw_columns),
      (&curated_scratch, "id INTEGER, source_row_id INTEGER", &self.dataset.curated_columns),
    ] {
      store.drop_table(table).await.map_err(Error::store)?;
      store
        .execute(&format!("CREATE TABLE {table} ({helpers}, {})", columns_ddl(data)), &[])
        .await
        .map_err(Error::store)?;
    }

    // 1. parse into scratch L0 and number the rows
    let loaded = store
      .bulk_load(
        &raw_scratch,
        &column_names(&self.dataset.raw_columns),
        file.data.clone(),
        &self.dataset.format,
      )
      .await
      .map_err(Error::load)?;
    self.assign_ids(&raw_scratch, Tier::Raw, loaded).await?;
    store
      .execute(&format!("UPDATE {raw_scratch} SET created_by = ?1"), &[Value::from(name)])
      .await
      .map_err(Error::store)?;

    // 2. scratch L0 -> scratch L1
    let select = derive_select(&self.dataset, &raw_scratch, "true");
    let derived = store
      .execute(
        &format!(
          "INSERT INTO {curated_scratch} (source_row_id, {curated_cols})
           SELECT * FROM ({select}) ORDER BY source_row_id"
        ),
        &[],
      )
      .await
      .map_err(Error::store)?;
    self.assign_ids(&curated_scratch, Tier::Curated, derived).await?;

    // 3 + 4. append both tiers together
    store
      .execute_atomic(vec![
        Statement::new(format!(
          "INSERT INTO {raw} (id, created_by, {raw_cols})
           SELECT id, created_by, {raw_cols} FROM {raw_scratch}"
        )),
        Statement::new(format!(
          "INSERT INTO {curated} (id, source_row_id, {curated_cols})
           SELECT id, source_row_id, {curated_cols} FROM {curated_scratch}"
        )),
        Statement::new(format!("DROP TABLE {raw_scratch}")),
        Statement::new(format!("DROP TABLE {curated_scratch}")),
      ])
      .await
      .map_err(Error::store)?;

    info!(pipeline = %self.layers.id(), file = name, loaded, derived, "increment appended");
    Ok(derived)
  }
}

#[async_trait]
impl<S: Store> Pipeline for IncrementalPipeline<S> {
  fn id(&self) -> &PipelineId { self.layers.id() }

  fn raw_columns(&self) -> &[ColumnDef] { &self.dataset.raw_columns }

  fn curated_columns(&self) -> &[ColumnDef] { &self.dataset.curated_columns }

  fn transform_map(&self) -> &TransformMap { &self.dataset.transforms }

  async fn process(&self, file: Option<&DataFile>) -> Result<()> {
    let file = require_file(self.layers.id(), file)?;
    self.append(file).await.map(|_| ())
  }
}
