//! [`SqliteStore`]: the SQLite implementation of [`Store`].

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use bytes::Bytes;
use chrono::Utc;
use rusqlite::{OptionalExtension as _, params, params_from_iter, types::Value as SqlValue};
use strata_core::{
  dataset::DelimitedFormat,
  store::{Row, Statement, Store, Value},
  table::{TableRef, quote_ident},
};

use crate::{
  Error, Result,
  encode::{decode_value, encode_dt, encode_params, register_functions},
  load::parse_delimited,
  schema::SCHEMA,
};

/// How long a connection without a statement timeout waits on another
/// connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// SQLite takes the busy timeout as an `int` of milliseconds.
const MAX_BUSY_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A strata store backed by a single SQLite database.
///
/// Cloning is cheap and shares the session (connection, statement timeout).
/// [`Store::connect`] opens a fresh connection to the same file; for an
/// in-memory database it returns a clone, since a second connection would
/// see an empty database.
#[derive(Clone)]
pub struct SqliteStore {
  conn:      tokio_rusqlite::Connection,
  path:      Option<Arc<PathBuf>>,
  interrupt: Arc<rusqlite::InterruptHandle>,
  /// Statement timeout in milliseconds; zero disables it.
  timeout:   Arc<AtomicU64>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let conn = tokio_rusqlite::Connection::open(&path).await?;
    Self::init(conn, Some(Arc::new(path)), 0).await
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, None, 0).await
  }

  async fn init(
    conn: tokio_rusqlite::Connection,
    path: Option<Arc<PathBuf>>,
    timeout_ms: u64,
  ) -> Result<Self> {
    let interrupt = conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        register_functions(conn)?;
        Ok(conn.get_interrupt_handle())
      })
      .await?;
    Ok(Self {
      conn,
      path,
      interrupt: Arc::new(interrupt),
      timeout: Arc::new(AtomicU64::new(timeout_ms)),
    })
  }

  pub fn statement_timeout(&self) -> Option<Duration> {
    match self.timeout.load(Ordering::Relaxed) {
      0 => None,
      ms => Some(Duration::from_millis(ms)),
    }
  }

  /// Run `f` on the connection thread, interrupting it if it outlives the
  /// statement timeout. Waiting for another writer's lock counts against
  /// the same limit.
  async fn call<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let Some(limit) = self.statement_timeout() else {
      return Ok(
        self
          .conn
          .call(move |conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            f(conn)
          })
          .await?,
      );
    };
    let busy = limit.min(MAX_BUSY_TIMEOUT);
    let work = self.conn.call(move |conn| {
      conn.busy_timeout(busy)?;
      f(conn)
    });
    match tokio::time::timeout(limit, work).await {
      Ok(result) => Ok(result?),
      Err(_) => {
        self.interrupt.interrupt();
        tracing::warn!(?limit, "statement timeout elapsed; interrupting");
        Err(Error::StatementTimeout(limit))
      }
    }
  }

  async fn insert_encoded(
    &self,
    table: &TableRef,
    columns: &[String],
    rows: Vec<Vec<SqlValue>>,
  ) -> Result<u64> {
    if rows.is_empty() {
      return Ok(0);
    }
    let cols = columns
      .iter()
      .map(|c| quote_ident(c))
      .collect::<Vec<_>>()
      .join(", ");
    let marks = (1..=columns.len())
      .map(|i| format!("?{i}"))
      .collect::<Vec<_>>()
      .join(", ");
    let sql = format!("INSERT INTO {table} ({cols}) VALUES ({marks})");

    self
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(&sql)?;
          for row in &rows {
            stmt.execute(params_from_iter(row.iter()))?;
          }
        }
        tx.commit()?;
        Ok(rows.len() as u64)
      })
      .await
  }

  async fn catalog_has(&self, sql: &'static str, name: String) -> Result<bool> {
    self
      .call(move |conn| {
        let found = conn
          .query_row(sql, params![name], |_| Ok(true))
          .optional()?
          .unwrap_or(false);
        Ok(found)
      })
      .await
  }
}

// ─── Store impl ──────────────────────────────────────────────────────────────

impl Store for SqliteStore {
  type Error = Error;

  async fn connect(&self) -> Result<Self> {
    let Some(path) = &self.path else {
      return Ok(self.clone());
    };
    let conn = tokio_rusqlite::Connection::open(path.as_ref()).await?;
    let timeout_ms = self.timeout.load(Ordering::Relaxed);
    Self::init(conn, Some(path.clone()), timeout_ms).await
  }

  fn set_statement_timeout(&self, timeout: Duration) {
    let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    self.timeout.store(ms, Ordering::Relaxed);
  }

  // ── Plain SQL ─────────────────────────────────────────────────────────

  async fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> Result<u64> {
    let sql = sql.to_owned();
    let params = encode_params(params);
    self
      .call(move |conn| Ok(conn.execute(&sql, params_from_iter(params))? as u64))
      .await
  }

  async fn execute_atomic(&self, statements: Vec<Statement>) -> Result<u64> {
    let statements: Vec<(String, Vec<SqlValue>)> = statements
      .into_iter()
      .map(|s| {
        let params = encode_params(&s.params);
        (s.sql, params)
      })
      .collect();

    self
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut total = 0u64;
        for (sql, params) in &statements {
          total += tx.execute(sql, params_from_iter(params.iter()))? as u64;
        }
        tx.commit()?;
        Ok(total)
      })
      .await
  }

  async fn query<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> Result<Vec<Row>> {
    let sql = sql.to_owned();
    let params = encode_params(params);
    self
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let width = stmt.column_count();
        let rows = stmt
          .query_map(params_from_iter(params), |row| {
            (0..width)
              .map(|i| row.get_ref(i).map(decode_value))
              .collect::<rusqlite::Result<Row>>()
          })?
          .collect::<rusqlite::Result<Vec<Row>>>()?;
        Ok(rows)
      })
      .await
  }

  // ── Loading ───────────────────────────────────────────────────────────

  async fn bulk_load<'a>(
    &'a self,
    table: &'a TableRef,
    columns: &'a [String],
    data: Bytes,
    format: &'a DelimitedFormat,
  ) -> Result<u64> {
    let rows = parse_delimited(&data, columns.len(), format)?;
    let n = self.insert_encoded(table, columns, rows).await?;
    tracing::debug!(table = %table, rows = n, "bulk load complete");
    Ok(n)
  }

  async fn insert_rows<'a>(
    &'a self,
    table: &'a TableRef,
    columns: &'a [String],
    rows: Vec<Row>,
  ) -> Result<u64> {
    let mut encoded = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
      if row.len() != columns.len() {
        return Err(Error::FieldCount {
          record:   i as u64 + 1,
          expected: columns.len(),
          found:    row.len(),
        });
      }
      encoded.push(encode_params(row));
    }
    self.insert_encoded(table, columns, encoded).await
  }

  // ── Catalog ───────────────────────────────────────────────────────────

  async fn schema_exists<'a>(&'a self, schema: &'a str) -> Result<bool> {
    self
      .catalog_has("SELECT 1 FROM strata_schemas WHERE name = ?1", schema.to_owned())
      .await
  }

  async fn create_schema<'a>(&'a self, schema: &'a str) -> Result<()> {
    let name = schema.to_owned();
    let now = encode_dt(Utc::now());
    self
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO strata_schemas (name, created_at) VALUES (?1, ?2)",
          params![name, now],
        )?;
        Ok(())
      })
      .await
  }

  async fn table_exists<'a>(&'a self, table: &'a TableRef) -> Result<bool> {
    self
      .catalog_has(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        table.qualified(),
      )
      .await
  }

  async fn drop_table<'a>(&'a self, table: &'a TableRef) -> Result<()> {
    let sql = format!("DROP TABLE IF EXISTS {table}");
    self
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await
  }

  async fn replace_table<'a>(&'a self, source: &'a TableRef, target: &'a TableRef) -> Result<()> {
    let (src, dst) = (source.qualified(), target.qualified());
    let swap = format!("DROP TABLE IF EXISTS {target}; ALTER TABLE {source} RENAME TO {target};");

    self
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute_batch(&swap)?;

        // Indexes follow the table but keep their names; rename the ones
        // derived from the source name so the next scratch table can reuse
        // them.
        let indexes: Vec<(String, String)> = {
          let mut stmt = tx.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
          )?;
          let rows = stmt
            .query_map(params![dst], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          rows
        };
        for (name, sql) in indexes {
          let Some(suffix) = name.strip_prefix(src.as_str()) else {
            continue;
          };
          let renamed = format!("{dst}{suffix}");
          let sql = sql.replacen(&quote_ident(&name), &quote_ident(&renamed), 1);
          tx.execute_batch(&format!("DROP INDEX {};", quote_ident(&name)))?;
          tx.execute_batch(&sql)?;
        }

        tx.commit()?;
        Ok(())
      })
      .await
  }

  // ── Sequences ─────────────────────────────────────────────────────────

  async fn create_sequence<'a>(&'a self, sequence: &'a TableRef) -> Result<()> {
    let name = sequence.qualified();
    self
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO strata_sequences (name) VALUES (?1)",
          params![name],
        )?;
        Ok(())
      })
      .await
  }

  async fn next_values<'a>(&'a self, sequence: &'a TableRef, count: u64) -> Result<i64> {
    let name = sequence.qualified();
    let count = i64::try_from(count).unwrap_or(i64::MAX);
    let key = name.clone();
    let last: Option<i64> = self
      .call(move |conn| {
        let last = conn
          .query_row(
            "UPDATE strata_sequences SET last_value = last_value + ?2
             WHERE name = ?1 RETURNING last_value",
            params![key, count],
            |r| r.get(0),
          )
          .optional()?;
        Ok(last)
      })
      .await?;
    last
      .map(|last| last - count + 1)
      .ok_or(Error::UnknownSequence(name))
  }

  // ── Materialised views ────────────────────────────────────────────────

  async fn materialized_view_exists<'a>(&'a self, view: &'a TableRef) -> Result<bool> {
    self
      .catalog_has(
        "SELECT 1 FROM strata_materialized_views WHERE name = ?1",
        view.qualified(),
      )
      .await
  }

  async fn create_materialized_view<'a>(&'a self, view: &'a TableRef, select: &'a str) -> Result<()> {
    let name = view.qualified();
    let definition = select.to_owned();
    let build = format!("DROP TABLE IF EXISTS {view}; CREATE TABLE {view} AS {select};");
    let now = encode_dt(Utc::now());

    self
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute_batch(&build)?;
        tx.execute(
          "INSERT OR REPLACE INTO strata_materialized_views (name, definition, refreshed_at)
           VALUES (?1, ?2, ?3)",
          params![name, definition, now],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn refresh_materialized_view<'a>(&'a self, view: &'a TableRef) -> Result<()> {
    let name = view.qualified();
    let key = name.clone();
    let target = view.to_string();
    let now = encode_dt(Utc::now());

    let refreshed = self
      .call(move |conn| {
        let tx = conn.transaction()?;
        let definition: Option<String> = tx
          .query_row(
            "SELECT definition FROM strata_materialized_views WHERE name = ?1",
            params![key],
            |r| r.get(0),
          )
          .optional()?;
        let Some(definition) = definition else {
          return Ok(false);
        };
        tx.execute_batch(&format!(
          "DELETE FROM {target}; INSERT INTO {target} {definition};"
        ))?;
        tx.execute(
          "UPDATE strata_materialized_views SET refreshed_at = ?2 WHERE name = ?1",
          params![key, now],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if refreshed { Ok(()) } else { Err(Error::UnknownView(name)) }
  }

  async fn drop_materialized_view<'a>(&'a self, view: &'a TableRef) -> Result<()> {
    let name = view.qualified();
    let drop = format!("DROP TABLE IF EXISTS {view};");
    self
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute_batch(&drop)?;
        tx.execute(
          "DELETE FROM strata_materialized_views WHERE name = ?1",
          params![name],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await
  }
}
