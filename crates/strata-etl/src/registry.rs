//! [`DatafileRegistry`]: per-file processing state, stored in the
//! `operations` schema of the same database the pipelines write to.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use strata_core::{
  registry::{DatafileState, RegistryEntry},
  store::{Row, Statement, Store, Value},
  table::TableRef,
};
use tracing::debug;

use crate::{Error, Result};

const SCHEMA: &str = "operations";
const TABLE: &str = "datafile_registry";

/// Map from source to the file names already processed or ignored.
pub type DoneFiles = BTreeMap<String, BTreeSet<String>>;

#[derive(Clone)]
pub struct DatafileRegistry<S> {
  store: S,
  table: TableRef,
}

impl<S: Store> DatafileRegistry<S> {
  /// Create the registry table on first use.
  pub async fn open(store: S) -> Result<Self> {
    let table = TableRef::new(SCHEMA, TABLE);
    store.create_schema(SCHEMA).await.map_err(Error::store)?;
    let index = table.sibling(format!("{TABLE}_source_file_idx"));
    store
      .execute_atomic(vec![
        Statement::new(format!(
          "CREATE TABLE IF NOT EXISTS {table} (
             id            INTEGER PRIMARY KEY AUTOINCREMENT,
             source        TEXT NOT NULL,
             file_name     TEXT NOT NULL DEFAULT '',
             state         TEXT NOT NULL,
             error_message TEXT,
             created_at    TEXT NOT NULL,
             updated_at    TEXT
           )"
        )),
        // File-less runs (empty file_name) are exempt from uniqueness.
        Statement::new(format!(
          "CREATE UNIQUE INDEX IF NOT EXISTS {index}
           ON {table} (source, file_name) WHERE file_name <> ''"
        )),
      ])
      .await
      .map_err(Error::store)?;
    Ok(Self { store, table })
  }

  fn now() -> String { Utc::now().to_rfc3339() }

  /// Mark `file_name` as `processing`, creating the entry if needed.
  ///
  /// An empty `file_name` always inserts a new entry. A file already
  /// processed or ignored is refused.
  pub async fn record_start(&self, source: &str, file_name: &str) -> Result<i64> {
    let table = &self.table;
    let sql = if file_name.is_empty() {
      format!(
        "INSERT INTO {table} (source, file_name, state, created_at)
         VALUES (?1, ?2, 'processing', ?3) RETURNING id"
      )
    } else {
      format!(
        "INSERT INTO {table} AS r (source, file_name, state, created_at)
         VALUES (?1, ?2, 'processing', ?3)
         ON CONFLICT (source, file_name) WHERE file_name <> ''
         DO UPDATE SET state = 'processing', error_message = NULL, updated_at = ?3
           WHERE r.state IN ('processing', 'failed')
         RETURNING id"
      )
    };
    let rows = self
      .store
      .query(&sql, &[source.into(), file_name.into(), Self::now().into()])
      .await
      .map_err(Error::store)?;
    let id = rows
      .first()
      .and_then(|r| r.first())
      .and_then(Value::as_i64)
      .ok_or_else(|| Error::InvalidTransition {
        data_source: source.to_owned(),
        file_name:   file_name.to_owned(),
        to:          DatafileState::Processing,
      })?;
    debug!(source, file = file_name, id, "registry: processing");
    Ok(id)
  }

  /// Move the latest `processing` entry for `(source, file_name)` to
  /// `processed` or `failed`.
  pub async fn record_result(
    &self,
    source: &str,
    file_name: &str,
    state: DatafileState,
    error_message: Option<&str>,
  ) -> Result<()> {
    let invalid = || Error::InvalidTransition {
      data_source: source.to_owned(),
      file_name:   file_name.to_owned(),
      to:          state,
    };
    if !state.is_outcome() {
      return Err(invalid());
    }
    let table = &self.table;
    let changed = self
      .store
      .execute(
        &format!(
          "UPDATE {table} SET state = ?1, error_message = ?2, updated_at = ?3
           WHERE id = (SELECT max(id) FROM {table} WHERE source = ?4 AND file_name = ?5)
             AND state = 'processing'"
        ),
        &[
          state.as_str().into(),
          error_message.into(),
          Self::now().into(),
          source.into(),
          file_name.into(),
        ],
      )
      .await
      .map_err(Error::store)?;
    if changed == 0 {
      return Err(invalid());
    }
    debug!(source, file = file_name, %state, "registry: result recorded");
    Ok(())
  }

  /// Operator action: never process `file_name` for `source`. Allowed only
  /// for files that are unknown or failed.
  pub async fn ignore(&self, source: &str, file_name: &str) -> Result<()> {
    let invalid = || Error::InvalidTransition {
      data_source: source.to_owned(),
      file_name:   file_name.to_owned(),
      to:          DatafileState::Ignored,
    };
    if file_name.is_empty() {
      return Err(invalid());
    }
    let table = &self.table;
    let rows = self
      .store
      .query(
        &format!(
          "INSERT INTO {table} AS r (source, file_name, state, created_at)
           VALUES (?1, ?2, 'ignored', ?3)
           ON CONFLICT (source, file_name) WHERE file_name <> ''
           DO UPDATE SET state = 'ignored', updated_at = ?3 WHERE r.state = 'failed'
           RETURNING id"
        ),
        &[source.into(), file_name.into(), Self::now().into()],
      )
      .await
      .map_err(Error::store)?;
    if rows.is_empty() {
      return Err(invalid());
    }
    Ok(())
  }

  /// File names in a done state, grouped by source, optionally for one
  /// source only.
  pub async fn processed_or_ignored_files(&self, source: Option<&str>) -> Result<DoneFiles> {
    let table = &self.table;
    let mut sql = format!(
      "SELECT source, file_name FROM {table}
       WHERE state IN ('processed', 'ignored') AND file_name <> ''"
    );
    let mut params = Vec::new();
    if let Some(source) = source {
      sql.push_str(" AND source = ?1");
      params.push(Value::from(source));
    }
    let rows = self.store.query(&sql, &params).await.map_err(Error::store)?;

    let mut done = DoneFiles::new();
    for row in rows {
      let (Some(source), Some(file)) = (row[0].as_str(), row[1].as_str()) else {
        return Err(Error::Decode(format!("{row:?}")));
      };
      done
        .entry(source.to_owned())
        .or_default()
        .insert(file.to_owned());
    }
    Ok(done)
  }

  /// All entries in insertion order, optionally for one source only.
  pub async fn entries(&self, source: Option<&str>) -> Result<Vec<RegistryEntry>> {
    let table = &self.table;
    let mut sql = format!(
      "SELECT id, source, file_name, state, error_message, created_at, updated_at
       FROM {table}"
    );
    let mut params = Vec::new();
    if let Some(source) = source {
      sql.push_str(" WHERE source = ?1");
      params.push(Value::from(source));
    }
    sql.push_str(" ORDER BY id");
    let rows = self.store.query(&sql, &params).await.map_err(Error::store)?;
    rows.into_iter().map(decode_entry).collect()
  }
}

// ─── Decoding ────────────────────────────────────────────────────────────────

fn decode_dt(v: &Value) -> Result<Option<DateTime<Utc>>> {
  match v {
    Value::Null => Ok(None),
    Value::Text(s) => DateTime::parse_from_rfc3339(s)
      .map(|dt| Some(dt.with_timezone(&Utc)))
      .map_err(|e| Error::Decode(e.to_string())),
    other => Err(Error::Decode(format!("timestamp {other:?}"))),
  }
}

fn decode_entry(row: Row) -> Result<RegistryEntry> {
  let text = |i: usize| {
    row[i]
      .as_str()
      .map(str::to_owned)
      .ok_or_else(|| Error::Decode(format!("column {i} of {row:?}")))
  };
  Ok(RegistryEntry {
    id:            row[0]
      .as_i64()
      .ok_or_else(|| Error::Decode(format!("id of {row:?}")))?,
    source:        text(1)?,
    file_name:     text(2)?,
    state:         text(3)?.parse()?,
    error_message: row[4].as_str().map(str::to_owned),
    created_at:    decode_dt(&row[5])?
      .ok_or_else(|| Error::Decode(format!("created_at of {row:?}")))?,
    updated_at:    decode_dt(&row[6])?,
  })
}
