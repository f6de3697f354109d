//! Integration tests for `SqliteStore` against in-memory and temp-file
//! databases.

use std::time::Duration;

use bytes::Bytes;
use strata_core::{
  dataset::DelimitedFormat,
  store::{Statement, Store, StoreError, Value},
  table::TableRef,
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn cols(names: &[&str]) -> Vec<String> {
  names.iter().map(|n| (*n).to_owned()).collect()
}

async fn count(s: &SqliteStore, table: &TableRef) -> i64 {
  let rows = s
    .query(&format!("SELECT count(*) FROM {table}"), &[])
    .await
    .unwrap();
  rows[0][0].as_i64().unwrap()
}

// ─── Schemas and tables ──────────────────────────────────────────────────────

#[tokio::test]
async fn create_schema_is_idempotent() {
  let s = store().await;
  assert!(!s.schema_exists("dit.baci").await.unwrap());
  s.create_schema("dit.baci").await.unwrap();
  s.create_schema("dit.baci").await.unwrap();
  assert!(s.schema_exists("dit.baci").await.unwrap());
}

#[tokio::test]
async fn table_exists_and_drop() {
  let s = store().await;
  let t = TableRef::new("dit.baci", "L0");
  assert!(!s.table_exists(&t).await.unwrap());

  s.execute(&format!("CREATE TABLE {t} (a TEXT)"), &[]).await.unwrap();
  assert!(s.table_exists(&t).await.unwrap());

  s.drop_table(&t).await.unwrap();
  s.drop_table(&t).await.unwrap();
  assert!(!s.table_exists(&t).await.unwrap());
}

#[tokio::test]
async fn execute_atomic_rolls_back_on_error() {
  let s = store().await;
  let t = TableRef::new("x", "t");
  s.execute(&format!("CREATE TABLE {t} (a INTEGER)"), &[]).await.unwrap();

  let result = s
    .execute_atomic(vec![
      Statement::new(format!("INSERT INTO {t} (a) VALUES (?1)")).bind(1),
      Statement::new("INSERT INTO no_such_table VALUES (1)"),
    ])
    .await;
  assert!(result.is_err());
  assert_eq!(count(&s, &t).await, 0);
}

// ─── Loading ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn bulk_load_appends_records() {
  let s = store().await;
  let t = TableRef::new("x", "t");
  s.execute(&format!("CREATE TABLE {t} (key TEXT, value TEXT)"), &[])
    .await
    .unwrap();

  let data = Bytes::from_static(b"key,value\nX,1\nY,\n");
  let n = s
    .bulk_load(&t, &cols(&["key", "value"]), data, &DelimitedFormat::default())
    .await
    .unwrap();
  assert_eq!(n, 2);

  let rows = s
    .query(&format!("SELECT key, value FROM {t} ORDER BY key"), &[])
    .await
    .unwrap();
  assert_eq!(rows[0], vec![Value::from("X"), Value::from("1")]);
  assert_eq!(rows[1], vec![Value::from("Y"), Value::Null]);
}

#[tokio::test]
async fn bulk_load_rejects_wrong_field_count_without_partial_rows() {
  let s = store().await;
  let t = TableRef::new("x", "t");
  s.execute(&format!("CREATE TABLE {t} (key TEXT, value TEXT)"), &[])
    .await
    .unwrap();

  let data = Bytes::from_static(b"key,value\nX,1\nY\n");
  let err = s
    .bulk_load(&t, &cols(&["key", "value"]), data, &DelimitedFormat::default())
    .await
    .unwrap_err();
  assert!(err.is_validation());
  assert_eq!(count(&s, &t).await, 0);
}

#[tokio::test]
async fn insert_rows_checks_width() {
  let s = store().await;
  let t = TableRef::new("x", "t");
  s.execute(&format!("CREATE TABLE {t} (a INTEGER, b TEXT)"), &[])
    .await
    .unwrap();

  let n = s
    .insert_rows(&t, &cols(&["a", "b"]), vec![vec![1.into(), "one".into()]])
    .await
    .unwrap();
  assert_eq!(n, 1);

  let err = s
    .insert_rows(&t, &cols(&["a", "b"]), vec![vec![Value::Integer(2)]])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::FieldCount { expected: 2, found: 1, .. }));
}

// ─── content_hash ────────────────────────────────────────────────────────────

#[tokio::test]
async fn content_hash_function_is_registered() {
  let s = store().await;
  let rows = s
    .query(
      "SELECT content_hash('X', 1), content_hash('X', 1), content_hash('X', 2)",
      &[],
    )
    .await
    .unwrap();
  let row = &rows[0];
  assert_eq!(row[0], row[1]);
  assert_ne!(row[0], row[2]);
}

// ─── Sequences ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn sequences_reserve_consecutive_blocks() {
  let s = store().await;
  let seq = TableRef::new("dit.baci", "L0_SEQUENCE");
  s.create_sequence(&seq).await.unwrap();
  s.create_sequence(&seq).await.unwrap();

  assert_eq!(s.next_values(&seq, 3).await.unwrap(), 1);
  assert_eq!(s.next_values(&seq, 2).await.unwrap(), 4);
  assert_eq!(s.next_values(&seq, 1).await.unwrap(), 6);
}

#[tokio::test]
async fn unknown_sequence_is_an_error() {
  let s = store().await;
  let err = s
    .next_values(&TableRef::new("a", "nope"), 1)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownSequence(_)));
}

// ─── Materialised views ──────────────────────────────────────────────────────

#[tokio::test]
async fn materialized_view_lifecycle() {
  let s = store().await;
  let base = TableRef::new("x", "base");
  let view = TableRef::new("x", "view");
  s.execute(&format!("CREATE TABLE {base} (n INTEGER)"), &[])
    .await
    .unwrap();
  s.execute(&format!("INSERT INTO {base} VALUES (1), (2)"), &[])
    .await
    .unwrap();

  assert!(!s.materialized_view_exists(&view).await.unwrap());
  s.create_materialized_view(&view, &format!("SELECT n * 10 AS n FROM {base}"))
    .await
    .unwrap();
  assert!(s.materialized_view_exists(&view).await.unwrap());
  assert_eq!(count(&s, &view).await, 2);

  s.execute(&format!("INSERT INTO {base} VALUES (3)"), &[])
    .await
    .unwrap();
  s.refresh_materialized_view(&view).await.unwrap();
  assert_eq!(count(&s, &view).await, 3);

  s.drop_materialized_view(&view).await.unwrap();
  assert!(!s.materialized_view_exists(&view).await.unwrap());
  assert!(!s.table_exists(&view).await.unwrap());
}

#[tokio::test]
async fn failed_view_build_leaves_no_readiness_marker() {
  let s = store().await;
  let view = TableRef::new("x", "broken");
  let result = s
    .create_materialized_view(&view, "SELECT * FROM missing_table")
    .await;
  assert!(result.is_err());
  assert!(!s.materialized_view_exists(&view).await.unwrap());
  assert!(!s.table_exists(&view).await.unwrap());
}

#[tokio::test]
async fn refresh_of_unknown_view_is_an_error() {
  let s = store().await;
  let err = s
    .refresh_materialized_view(&TableRef::new("x", "nope"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::UnknownView(_)));
}

// ─── Atomic swap ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn replace_table_swaps_and_carries_indexes() {
  let s = store().await;
  let target = TableRef::new("t.x", "L1");
  let scratch = target.scratch();

  s.execute(&format!("CREATE TABLE {target} (v INTEGER)"), &[])
    .await
    .unwrap();
  s.execute(&format!("INSERT INTO {target} VALUES (1)"), &[])
    .await
    .unwrap();

  for round in 0..2 {
    s.execute(&format!("CREATE TABLE {scratch} (v INTEGER)"), &[])
      .await
      .unwrap();
    s.execute(&format!("INSERT INTO {scratch} VALUES (7), (8)"), &[])
      .await
      .unwrap();
    let index = format!("{}_v_idx", scratch.qualified());
    s.execute(
      &format!("CREATE INDEX \"{index}\" ON {scratch} (v)"),
      &[],
    )
    .await
    .unwrap_or_else(|e| panic!("round {round}: {e}"));

    s.replace_table(&scratch, &target).await.unwrap();

    assert!(!s.table_exists(&scratch).await.unwrap());
    assert_eq!(count(&s, &target).await, 2);
    let idx = s
      .query(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1",
        &[target.qualified().into()],
      )
      .await
      .unwrap();
    assert_eq!(idx, vec![vec![Value::from("t.x.L1_v_idx")]]);
  }
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn connect_opens_independent_session_on_same_file() {
  let dir = tempfile::tempdir().unwrap();
  let s = SqliteStore::open(dir.path().join("strata.db")).await.unwrap();
  s.create_schema("a.b").await.unwrap();
  s.set_statement_timeout(Duration::from_secs(30));

  let other = s.connect().await.unwrap();
  assert!(other.schema_exists("a.b").await.unwrap());
  assert_eq!(other.statement_timeout(), Some(Duration::from_secs(30)));

  other.set_statement_timeout(Duration::from_secs(5));
  assert_eq!(s.statement_timeout(), Some(Duration::from_secs(30)));
}

#[tokio::test]
async fn runaway_statement_is_interrupted() {
  let s = store().await;
  s.set_statement_timeout(Duration::from_millis(100));
  let err = s
    .query(
      "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
       SELECT count(*) FROM c",
      &[],
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::StatementTimeout(_)));

  s.set_statement_timeout(Duration::ZERO);
  let rows = s.query("SELECT 1", &[]).await.unwrap();
  assert_eq!(rows, vec![vec![Value::Integer(1)]]);
}

#[tokio::test]
async fn lock_waits_follow_the_statement_timeout() {
  let s = store().await;
  let busy = |rows: Vec<Vec<Value>>| rows[0][0].as_i64().unwrap();

  let rows = s.query("PRAGMA busy_timeout", &[]).await.unwrap();
  assert_eq!(busy(rows), 60_000);

  s.set_statement_timeout(Duration::from_secs(90 * 60));
  let rows = s.query("PRAGMA busy_timeout", &[]).await.unwrap();
  assert_eq!(busy(rows), 5_400_000);

  s.set_statement_timeout(Duration::ZERO);
  let rows = s.query("PRAGMA busy_timeout", &[]).await.unwrap();
  assert_eq!(busy(rows), 60_000);
}
