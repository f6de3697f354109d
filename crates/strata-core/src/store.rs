//! The `Store` trait and the plain value types that cross it.
//!
//! The trait is implemented by relational backends (e.g.
//! `strata-store-sqlite`). Pipelines, the registry and the tariff engine
//! depend on this abstraction, not on any concrete backend.

use std::{future::Future, time::Duration};

use bytes::Bytes;

use crate::{dataset::DelimitedFormat, table::TableRef};

// ─── Values ──────────────────────────────────────────────────────────────────

/// A single SQL value, used both for bound parameters and result cells.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
}

pub type Row = Vec<Value>;

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Integer(n) => Some(*n),
      Value::Real(f) if f.fract() == 0.0 => Some(*f as i64),
      Value::Text(s) => s.trim().parse().ok(),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Value::Integer(n) => Some(*n as f64),
      Value::Real(f) => Some(*f),
      Value::Text(s) => s.trim().parse().ok(),
      Value::Null => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Text(s) => Some(s),
      _ => None,
    }
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self { Value::Integer(n) }
}

impl From<f64> for Value {
  fn from(f: f64) -> Self { Value::Real(f) }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Value::Text(s.to_owned()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Value::Text(s) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map_or(Value::Null, Into::into) }
}

/// An SQL statement with its bound parameters.
#[derive(Debug, Clone)]
pub struct Statement {
  pub sql:    String,
  pub params: Vec<Value>,
}

impl Statement {
  pub fn new(sql: impl Into<String>) -> Self {
    Self { sql: sql.into(), params: Vec::new() }
  }

  pub fn bind(mut self, value: impl Into<Value>) -> Self {
    self.params.push(value.into());
    self
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Errors raised by a [`Store`] backend.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// The failure was caused by the content of the data being loaded (a
  /// malformed record, a wrong field count) rather than by the store.
  fn is_validation(&self) -> bool { false }
}

/// Abstraction over a relational backend with schemas, sequences,
/// materialised views, bulk delimited loading and atomic table swaps.
///
/// Every connection exposes a deterministic SQL scalar function
/// `content_hash(v1, v2, ...)` returning a hex digest of its arguments; the
/// snapshot pipeline keys raw rows on it.
///
/// Cloning a store yields a handle on the same session. Use
/// [`Store::connect`] for an independent session.
pub trait Store: Clone + Send + Sync + 'static {
  type Error: StoreError;

  // ── Sessions ──────────────────────────────────────────────────────────

  /// Open a new independent session against the same database.
  fn connect(&self) -> impl Future<Output = Result<Self, Self::Error>> + Send + '_;

  /// Bound the wall-clock time of every subsequent statement on this
  /// session. A statement exceeding it is aborted and returns an error.
  fn set_statement_timeout(&self, timeout: Duration);

  // ── Plain SQL ─────────────────────────────────────────────────────────

  /// Execute one statement, returning the number of affected rows.
  fn execute<'a>(
    &'a self,
    sql: &'a str,
    params: &'a [Value],
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Execute `statements` in order inside a single transaction.
  fn execute_atomic(
    &self,
    statements: Vec<Statement>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn query<'a>(
    &'a self,
    sql: &'a str,
    params: &'a [Value],
  ) -> impl Future<Output = Result<Vec<Row>, Self::Error>> + Send + 'a;

  // ── Loading ───────────────────────────────────────────────────────────

  /// Parse `data` as delimited text and append every record to `table`.
  /// Empty fields load as NULL. A record whose field count differs from
  /// `columns` fails the whole load.
  fn bulk_load<'a>(
    &'a self,
    table: &'a TableRef,
    columns: &'a [String],
    data: Bytes,
    format: &'a DelimitedFormat,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Append `rows` to `table` in a single transaction.
  fn insert_rows<'a>(
    &'a self,
    table: &'a TableRef,
    columns: &'a [String],
    rows: Vec<Row>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  // ── Catalog ───────────────────────────────────────────────────────────

  fn schema_exists<'a>(
    &'a self,
    schema: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn create_schema<'a>(
    &'a self,
    schema: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn table_exists<'a>(
    &'a self,
    table: &'a TableRef,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Drop `table` if it exists.
  fn drop_table<'a>(
    &'a self,
    table: &'a TableRef,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Atomically drop `target` (if present) and rename `source` to it.
  /// Readers observe either the old `target` or the complete new one.
  fn replace_table<'a>(
    &'a self,
    source: &'a TableRef,
    target: &'a TableRef,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Sequences ─────────────────────────────────────────────────────────

  /// Create the sequence if it does not exist.
  fn create_sequence<'a>(
    &'a self,
    sequence: &'a TableRef,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Reserve `count` consecutive values and return the first one.
  fn next_values<'a>(
    &'a self,
    sequence: &'a TableRef,
    count: u64,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + 'a;

  // ── Materialised views ────────────────────────────────────────────────

  /// True once the view has been fully materialised.
  fn materialized_view_exists<'a>(
    &'a self,
    view: &'a TableRef,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn create_materialized_view<'a>(
    &'a self,
    view: &'a TableRef,
    select: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Recompute the view contents from its stored definition.
  fn refresh_materialized_view<'a>(
    &'a self,
    view: &'a TableRef,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn drop_materialized_view<'a>(
    &'a self,
    view: &'a TableRef,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
