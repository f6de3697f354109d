//! The tariff imputation engine: `world_bank.tariff.transformed`.
//!
//! Produces one assumed tariff per `(product, reporter, partner, year)`
//! over every pair of required countries observed trading since the cutoff
//! year. Intermediate joins are materialised as views; products are then
//! imputed concurrently, each worker on its own store session, into a
//! scratch table that atomically replaces the curated table at the end.

pub mod countries;
pub mod impute;
mod views;

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use strata_core::{
  dataset::TransformMap,
  identity::PipelineId,
  storage::DataFile,
  store::{Row, Store, Value},
  table::{ColumnDef, ColumnType, TableRef, Tier, columns, quote_ident},
};
use tokio::{
  sync::Semaphore,
  task::{self, JoinSet},
  time::Instant,
};
use tracing::{debug, error, info, warn};

use self::{
  impute::{ImputedTariff, RateObservation, Rates, impute},
  views::TariffViews,
};
use crate::{
  Error, Result,
  pipeline::{Layers, Pipeline, column_names, columns_ddl},
};

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_CUTOFF_YEAR: i64 = 2000;

const INDEXED_COLUMNS: [&str; 4] = ["product", "reporter", "partner", "year"];

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TariffOptions {
  /// Drop and rebuild every intermediate view.
  pub force:       bool,
  /// Keep a partially filled scratch table and skip its products.
  pub resume:      bool,
  /// Restrict the run to these product codes.
  pub products:    Option<Vec<i64>>,
  pub workers:     usize,
  pub cutoff_year: i64,
}

impl Default for TariffOptions {
  fn default() -> Self {
    Self {
      force:       false,
      resume:      false,
      products:    None,
      workers:     DEFAULT_WORKERS,
      cutoff_year: DEFAULT_CUTOFF_YEAR,
    }
  }
}

/// Tables the engine reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TariffSources {
  /// `world_bank.tariff` L0: one row per reported duty.
  pub tariffs:       TableRef,
  /// `world_bank.bound_rates` L1.
  pub bound_rates:   TableRef,
  /// `dit.baci` L1: bilateral trade flows.
  pub baci:          TableRef,
  /// `dit.eu_country_membership` L1.
  pub eu_membership: TableRef,
}

impl TariffSources {
  pub fn standard() -> Self {
    Self {
      tariffs:       TableRef::new("world_bank.tariff", Tier::Raw.symbol()),
      bound_rates:   TableRef::new("world_bank.bound_rates", Tier::Curated.symbol()),
      baci:          TableRef::new("dit.baci", Tier::Curated.symbol()),
      eu_membership: TableRef::new("dit.eu_country_membership", Tier::Curated.symbol()),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
  /// Products attempted in this run.
  pub products:  usize,
  pub succeeded: usize,
  /// Product codes whose imputation failed; absent from the output.
  pub failed:    Vec<i64>,
  pub rows:      u64,
}

// ─── Output ──────────────────────────────────────────────────────────────────

pub fn output_columns() -> Vec<ColumnDef> {
  columns(&[
    ("product", ColumnType::Integer),
    ("reporter", ColumnType::Text),
    ("partner", ColumnType::Text),
    ("year", ColumnType::Integer),
    ("assumed_tariff", ColumnType::Decimal),
    ("app_rate", ColumnType::Decimal),
    ("prf_rate", ColumnType::Decimal),
    ("mfn_rate", ColumnType::Decimal),
    ("bnd_rate", ColumnType::Decimal),
    ("eu_rep_rate", ColumnType::Decimal),
    ("eu_part_rate", ColumnType::Decimal),
    ("country_average", ColumnType::Decimal),
    ("world_average", ColumnType::Decimal),
  ])
}

fn decode_observation(row: Row) -> Result<RateObservation> {
  let [reporter, partner, year, app, prf, eu_rep, eu_part, mfn, bnd, reporter_eu, partner_eu] =
    <[Value; 11]>::try_from(row).map_err(|row| Error::Decode(format!("rate row {row:?}")))?;
  let text = |v: Value| match v {
    Value::Text(s) => Ok(s),
    other => Err(Error::Decode(format!("country code {other:?}"))),
  };
  Ok(RateObservation {
    reporter:    text(reporter)?,
    partner:     text(partner)?,
    year:        year
      .as_i64()
      .ok_or_else(|| Error::Decode(format!("year {year:?}")))?,
    rates:       Rates {
      app_rate:     app.as_f64(),
      prf_rate:     prf.as_f64(),
      eu_rep_rate:  eu_rep.as_f64(),
      eu_part_rate: eu_part.as_f64(),
      mfn_rate:     mfn.as_f64(),
      bnd_rate:     bnd.as_f64(),
    },
    reporter_eu: reporter_eu.as_i64() == Some(1),
    partner_eu:  partner_eu.as_i64() == Some(1),
  })
}

/// Impute one product on a fresh session and append it to `scratch`.
async fn impute_product<S: Store>(
  store: &S,
  sql: &str,
  scratch: &TableRef,
  product: i64,
  statement_timeout: Duration,
) -> Result<u64> {
  let session = store.connect().await.map_err(Error::store)?;
  session.set_statement_timeout(statement_timeout);
  let rows = session
    .query(sql, &[Value::Integer(product)])
    .await
    .map_err(Error::store)?;
  let observations = rows
    .into_iter()
    .map(decode_observation)
    .collect::<Result<Vec<_>>>()?;
  let out: Vec<Row> = impute(product, observations)
    .into_iter()
    .map(ImputedTariff::into_row)
    .collect();
  session
    .insert_rows(scratch, &column_names(&output_columns()), out)
    .await
    .map_err(Error::store)
}

// ─── Workers ─────────────────────────────────────────────────────────────────

/// Per-product imputation tasks, tracked so that every outcome, a panic
/// included, is attributed to its product.
#[derive(Default)]
struct Workers {
  tasks:    JoinSet<Result<u64>>,
  products: HashMap<task::Id, i64>,
}

impl Workers {
  fn spawn<F>(&mut self, product: i64, work: F)
  where
    F: Future<Output = Result<u64>> + Send + 'static,
  {
    let handle = self.tasks.spawn(work);
    self.products.insert(handle.id(), product);
  }

  /// Wait for every task and fold its outcome into `report`.
  async fn finish(mut self, report: &mut TransformReport) {
    let total = self.products.len();
    while let Some(joined) = self.tasks.join_next_with_id().await {
      match joined {
        Ok((id, Ok(rows))) => {
          let product = self.products.remove(&id);
          report.succeeded += 1;
          report.rows += rows;
          debug!(?product, rows, "[{}/{}] product imputed", report.succeeded, total);
        }
        Ok((id, Err(e))) => {
          let product = self.products.remove(&id);
          error!(?product, error = %e, "product failed");
          report.failed.extend(product);
        }
        Err(e) => {
          let product = self.products.remove(&e.id());
          error!(?product, error = %e, "imputation worker panicked");
          report.failed.extend(product);
        }
      }
    }
    report.failed.sort_unstable();
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct TariffTransformPipeline<S> {
  layers:            Layers<S>,
  views:             TariffViews,
  options:           TariffOptions,
  curated:           Vec<ColumnDef>,
  transforms:        TransformMap,
  statement_timeout: Duration,
}

impl<S: Store> TariffTransformPipeline<S> {
  pub fn pipeline_id() -> Result<PipelineId> {
    Ok(PipelineId::new("world_bank", "tariff")?.with_subdataset("transformed")?)
  }

  pub async fn new(store: S, options: TariffOptions, statement_timeout: Duration) -> Result<Self> {
    Self::with_sources(store, TariffSources::standard(), options, statement_timeout).await
  }

  pub async fn with_sources(
    store: S,
    sources: TariffSources,
    options: TariffOptions,
    statement_timeout: Duration,
  ) -> Result<Self> {
    if options.workers == 0 {
      return Err(Error::Configuration("tariff transform needs at least one worker".into()));
    }
    let layers = Layers::open(store, Self::pipeline_id()?, statement_timeout).await?;
    let views = TariffViews::new(&layers.table(Tier::Curated), sources, options.cutoff_year);
    Ok(Self {
      layers,
      views,
      options,
      curated: output_columns(),
      transforms: TransformMap::new(),
      statement_timeout,
    })
  }

  pub fn options(&self) -> &TariffOptions { &self.options }

  async fn build_views(&self) -> Result<()> {
    let store = self.layers.store();
    for view in self.views.dag() {
      let started = Instant::now();
      if self.options.force {
        store
          .drop_materialized_view(&view.table)
          .await
          .map_err(Error::store)?;
      }
      let action = if store
        .materialized_view_exists(&view.table)
        .await
        .map_err(Error::store)?
      {
        store
          .refresh_materialized_view(&view.table)
          .await
          .map_err(Error::store)?;
        "refreshed"
      } else {
        store
          .create_materialized_view(&view.table, &view.select)
          .await
          .map_err(Error::store)?;
        "built"
      };
      if let Some(column) = view.index {
        let index = quote_ident(&format!("{}_{column}_idx", view.table.qualified()));
        store
          .execute(
            &format!("CREATE INDEX IF NOT EXISTS {index} ON {} ({column})", view.table),
            &[],
          )
          .await
          .map_err(Error::store)?;
      }
      info!(view = %view.table, action, elapsed = ?started.elapsed(), "view ready");
    }
    Ok(())
  }

  /// Products to impute, ascending.
  async fn products(&self, scratch: &TableRef) -> Result<Vec<i64>> {
    let spine = &self.views.spine;
    let mut sql = format!("SELECT DISTINCT product FROM {spine} WHERE product IS NOT NULL");
    let mut params = Vec::new();
    if let Some(products) = self.options.products.as_ref().filter(|p| !p.is_empty()) {
      let marks = (1..=products.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
      sql.push_str(&format!(" AND product IN ({marks})"));
      params.extend(products.iter().copied().map(Value::Integer));
    }
    if self.options.resume {
      sql.push_str(&format!(" AND product NOT IN (SELECT DISTINCT product FROM {scratch})"));
    }
    sql.push_str(" ORDER BY product");

    let rows = self
      .layers
      .store()
      .query(&sql, &params)
      .await
      .map_err(Error::store)?;
    rows
      .iter()
      .map(|r| {
        r.first()
          .and_then(Value::as_i64)
          .ok_or_else(|| Error::Decode(format!("product {r:?}")))
      })
      .collect()
  }

  async fn impute_all(&self, scratch: &TableRef, products: Vec<i64>) -> TransformReport {
    let mut report = TransformReport { products: products.len(), ..Default::default() };
    let semaphore = Arc::new(Semaphore::new(self.options.workers));
    let sql: Arc<str> = self.views.product_rates_sql().into();

    let mut workers = Workers::default();
    for product in products {
      let semaphore = semaphore.clone();
      let store = self.layers.store().clone();
      let sql = sql.clone();
      let scratch = scratch.clone();
      let timeout = self.statement_timeout;
      workers.spawn(product, async move {
        let _permit = semaphore.acquire_owned().await;
        impute_product(&store, &sql, &scratch, product, timeout).await
      });
    }
    workers.finish(&mut report).await;
    report
  }

  /// Rebuild the views, impute every selected product and publish the
  /// result as the curated table.
  pub async fn run(&self) -> Result<TransformReport> {
    let store = self.layers.store();
    let started = Instant::now();
    self.build_views().await?;

    let curated = self.layers.table(Tier::Curated);
    let scratch = curated.scratch();
    if !self.options.resume {
      store.drop_table(&scratch).await.map_err(Error::store)?;
    }
    store
      .execute(
        &format!(
          "CREATE TABLE IF NOT EXISTS {scratch} (id INTEGER PRIMARY KEY, {})",
          columns_ddl(&self.curated)
        ),
        &[],
      )
      .await
      .map_err(Error::store)?;

    let products = self.products(&scratch).await?;
    info!(products = products.len(), workers = self.options.workers, "imputing tariffs");
    let report = self.impute_all(&scratch, products).await;
    if !report.failed.is_empty() {
      warn!(failed = ?report.failed, "some products were not imputed");
    }

    for column in INDEXED_COLUMNS {
      let index = quote_ident(&format!("{}_{column}_idx", scratch.qualified()));
      store
        .execute(&format!("CREATE INDEX IF NOT EXISTS {index} ON {scratch} ({column})"), &[])
        .await
        .map_err(Error::store)?;
    }
    store
      .replace_table(&scratch, &curated)
      .await
      .map_err(Error::store)?;

    info!(
      succeeded = report.succeeded,
      failed = report.failed.len(),
      rows = report.rows,
      elapsed = ?started.elapsed(),
      "tariff transform published"
    );
    Ok(report)
  }
}

#[async_trait]
impl<S: Store> Pipeline for TariffTransformPipeline<S> {
  fn id(&self) -> &PipelineId { self.layers.id() }

  fn raw_columns(&self) -> &[ColumnDef] { &[] }

  fn curated_columns(&self) -> &[ColumnDef] { &self.curated }

  fn transform_map(&self) -> &TransformMap { &self.transforms }

  async fn process(&self, file: Option<&DataFile>) -> Result<()> {
    if let Some(file) = file {
      debug!(file = file.name(), "tariff transform ignores datafiles");
    }
    self.run().await.map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_joined_rate_rows() {
    let row = vec![
      Value::from("GBR"),
      Value::from("FRA"),
      Value::Integer(2004),
      Value::Real(1.5),
      Value::Null,
      Value::Null,
      Value::Null,
      Value::Integer(3),
      Value::Null,
      Value::Integer(0),
      Value::Integer(1),
    ];
    let o = decode_observation(row).unwrap();
    assert_eq!(o.year, 2004);
    assert_eq!(o.rates.app_rate, Some(1.5));
    assert_eq!(o.rates.mfn_rate, Some(3.0));
    assert!(!o.reporter_eu && o.partner_eu);
  }

  #[test]
  fn short_rows_are_rejected() {
    assert!(matches!(decode_observation(vec![Value::Null]), Err(Error::Decode(_))));
  }

  #[tokio::test]
  async fn every_worker_outcome_is_attributed() {
    fn dies() -> Result<u64> { panic!("worker died") }

    let mut workers = Workers::default();
    workers.spawn(10, async { Ok::<_, Error>(4) });
    workers.spawn(20, async { dies() });
    workers.spawn(30, async { Err::<u64, _>(Error::Decode("bad row".into())) });
    workers.spawn(40, async { Ok::<_, Error>(2) });

    let mut report = TransformReport { products: 4, ..Default::default() };
    workers.finish(&mut report).await;
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.rows, 6);
    assert_eq!(report.failed, vec![20, 30]);
    assert_eq!(report.succeeded + report.failed.len(), report.products);
  }

  #[test]
  fn output_columns_match_row_layout() {
    assert_eq!(output_columns().len(), 13);
    assert_eq!(output_columns()[4].name, "assumed_tariff");
  }
}
