//! Snapshot pipelines: each datafile is the full current state of a
//! reference set.
//!
//! Raw rows are keyed by a content hash over the dataset's identity
//! columns, so re-delivered rows only refresh their `updated_by` marker.
//! Curated rows are derived from the raw rows a file created and are keyed
//! by `source_row_id` (plus the unpivot key for wide datasets), which makes
//! replays harmless.

use std::time::Duration;

use async_trait::async_trait;
use strata_core::{
  dataset::{Dataset, TransformMap},
  identity::PipelineId,
  storage::DataFile,
  store::{Statement, Store, Value},
  table::{ColumnDef, Tier, column_list, quote_ident},
};
use tracing::info;

use crate::{
  Error, Result,
  pipeline::{
    Layers, Pipeline, column_names, columns_ddl, curated_unique, derive_select, require_file,
  },
};

pub struct SnapshotPipeline<S> {
  layers:          Layers<S>,
  dataset:         Dataset,
  delete_previous: bool,
}

impl<S: Store> SnapshotPipeline<S> {
  pub async fn new(store: S, dataset: Dataset, statement_timeout: Duration) -> Result<Self> {
    dataset.validate()?;
    let layers = Layers::open(store, dataset.id.clone(), statement_timeout).await?;
    Ok(Self { layers, dataset, delete_previous: false })
  }

  /// Keep only the rows of the most recently processed file when driven
  /// through [`Pipeline::process`].
  pub fn with_delete_previous(mut self, delete_previous: bool) -> Self {
    self.delete_previous = delete_previous;
    self
  }

  pub fn dataset(&self) -> &Dataset { &self.dataset }

  async fn ensure_tables(&self) -> Result<()> {
    let raw = self.layers.table(Tier::Raw);
    let curated = self.layers.table(Tier::Curated);
    let unique = curated_unique(&self.dataset);
    self
      .layers
      .store()
      .execute_atomic(vec![
        Statement::new(format!(
          "CREATE TABLE IF NOT EXISTS {raw} (
             id INTEGER PRIMARY KEY,
             created_by TEXT NOT NULL,
             updated_by TEXT NOT NULL,
             content_hash TEXT NOT NULL UNIQUE,
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
    Ok(())
  }

  /// Load `file` into the raw tier and derive its curated rows. With
  /// `delete_previous`, rows not seen in this file are removed afterwards.
  pub async fn process_with(&self, file: &DataFile, delete_previous: bool) -> Result<()> {
    let store = self.layers.store();
    let id = self.layers.id();
    let name = file.name();
    let raw = self.layers.table(Tier::Raw);
    let curated = self.layers.table(Tier::Curated);
    let scratch = raw.scratch();

    self.ensure_tables().await?;

    // 1. scratch load
    store.drop_table(&scratch).await.map_err(Error::store)?;
    store
      .execute(
        &format!("CREATE TABLE {scratch} ({})", columns_ddl(&self.dataset.raw_columns)),
        &[],
      )
      .await
      .map_err(Error::store)?;
    let loaded = store
      .bulk_load(
        &scratch,
        &column_names(&self.dataset.raw_columns),
        file.data.clone(),
        &self.dataset.format,
      )
      .await
      .map_err(Error::load)?;

    // 2. content-hash upsert into L0
    let raw_cols = column_list(&self.dataset.raw_columns, None);
    let hashed = self
      .dataset
      .identity()
      .into_iter()
      .map(quote_ident)
      .collect::<Vec<_>>()
      .join(", ");
    let by_file = [Value::from(name)];
    store
      .execute(
        &format!(
          "INSERT INTO {raw} (created_by, updated_by, content_hash, {raw_cols})
           SELECT ?1, ?1, content_hash({hashed}), {raw_cols} FROM {scratch} WHERE true
           ON CONFLICT (content_hash) DO UPDATE SET updated_by = excluded.updated_by"
        ),
        &by_file,
      )
      .await
      .map_err(Error::store)?;

    // 3. L0 -> L1 for rows this file introduced
    let curated_cols = column_list(&self.dataset.curated_columns, None);
    let select = derive_select(&self.dataset, &raw, "created_by = ?1");
    let unique = curated_unique(&self.dataset);
    let derived = store
      .execute(
        &format!(
          "INSERT INTO {curated} (source_row_id, {curated_cols})
           SELECT * FROM ({select}) WHERE true
           ON CONFLICT ({unique}) DO NOTHING"
        ),
        &by_file,
      )
      .await
      .map_err(Error::store)?;

    // 4.
    store.drop_table(&scratch).await.map_err(Error::store)?;

    // 5. current snapshot only
    if delete_previous {
      let removed = store
        .execute_atomic(vec![
          Statement::new(format!(
            "DELETE FROM {curated} WHERE source_row_id IN
               (SELECT id FROM {raw} WHERE updated_by <> ?1)"
          ))
          .bind(name),
          Statement::new(format!("DELETE FROM {raw} WHERE updated_by <> ?1")).bind(name),
        ])
        .await
        .map_err(Error::store)?;
      info!(pipeline = %id, file = name, removed, "deleted rows from previous snapshots");
    }

    info!(pipeline = %id, file = name, loaded, derived, "snapshot processed");
    Ok(())
  }
}

#[async_trait]
impl<S: Store> Pipeline for SnapshotPipeline<S> {
  fn id(&self) -> &PipelineId { self.layers.id() }

  fn raw_columns(&self) -> &[ColumnDef] { &self.dataset.raw_columns }

  fn curated_columns(&self) -> &[ColumnDef] { &self.dataset.curated_columns }

  fn transform_map(&self) -> &TransformMap { &self.dataset.transforms }

  async fn process(&self, file: Option<&DataFile>) -> Result<()> {
    let file = require_file(self.layers.id(), file)?;
    self.process_with(file, self.delete_previous).await
  }
}
