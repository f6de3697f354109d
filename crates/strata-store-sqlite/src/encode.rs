//! Conversions between [`strata_core::store::Value`] and SQLite values, and
//! the `content_hash` SQL function.

use chrono::{DateTime, Utc};
use rusqlite::{
  functions::FunctionFlags,
  types::{Value as SqlValue, ValueRef},
};
use sha2::{Digest, Sha256};
use strata_core::store::Value;

// ─── Values ──────────────────────────────────────────────────────────────────

pub fn encode_value(v: &Value) -> SqlValue {
  match v {
    Value::Null => SqlValue::Null,
    Value::Integer(n) => SqlValue::Integer(*n),
    Value::Real(f) => SqlValue::Real(*f),
    Value::Text(s) => SqlValue::Text(s.clone()),
  }
}

pub fn encode_params(params: &[Value]) -> Vec<SqlValue> {
  params.iter().map(encode_value).collect()
}

pub fn decode_value(v: ValueRef<'_>) -> Value {
  match v {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(n) => Value::Integer(n),
    ValueRef::Real(f) => Value::Real(f),
    ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    ValueRef::Blob(b) => Value::Text(hex::encode(b)),
  }
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

// ─── content_hash ────────────────────────────────────────────────────────────

/// Feed one value into the hasher. Each value is tagged with its storage
/// class and text/blob values are length-prefixed, so `('ab', 'c')` and
/// `('a', 'bc')` hash differently.
fn hash_value(hasher: &mut Sha256, v: ValueRef<'_>) {
  match v {
    ValueRef::Null => hasher.update(b"n"),
    ValueRef::Integer(n) => {
      hasher.update(b"i");
      hasher.update(n.to_be_bytes());
    }
    ValueRef::Real(f) => {
      hasher.update(b"r");
      hasher.update(f.to_bits().to_be_bytes());
    }
    ValueRef::Text(t) => {
      hasher.update(b"t");
      hasher.update((t.len() as u64).to_be_bytes());
      hasher.update(t);
    }
    ValueRef::Blob(b) => {
      hasher.update(b"b");
      hasher.update((b.len() as u64).to_be_bytes());
      hasher.update(b);
    }
  }
}

pub fn content_hash<'a>(values: impl IntoIterator<Item = ValueRef<'a>>) -> String {
  let mut hasher = Sha256::new();
  for v in values {
    hash_value(&mut hasher, v);
  }
  hex::encode(hasher.finalize())
}

/// Register strata's scalar functions on a fresh connection.
pub fn register_functions(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
  conn.create_scalar_function(
    "content_hash",
    -1,
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
    |ctx| Ok(content_hash((0..ctx.len()).map(|i| ctx.get_raw(i)))),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_is_stable_and_order_sensitive() {
    let a = content_hash([ValueRef::Text(b"X"), ValueRef::Integer(1)]);
    let b = content_hash([ValueRef::Text(b"X"), ValueRef::Integer(1)]);
    let c = content_hash([ValueRef::Integer(1), ValueRef::Text(b"X")]);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 64);
  }

  #[test]
  fn hash_separates_adjacent_text() {
    let ab_c = content_hash([ValueRef::Text(b"ab"), ValueRef::Text(b"c")]);
    let a_bc = content_hash([ValueRef::Text(b"a"), ValueRef::Text(b"bc")]);
    assert_ne!(ab_c, a_bc);
  }

  #[test]
  fn null_differs_from_empty_text() {
    assert_ne!(
      content_hash([ValueRef::Null]),
      content_hash([ValueRef::Text(b"")])
    );
  }
}
