//! Delimited-text parsing for bulk loads.

use std::borrow::Cow;

use rusqlite::types::Value as SqlValue;
use strata_core::dataset::DelimitedFormat;

use crate::{Error, Result};

/// Drop every doubled quote so that `""` fields read as empty.
fn strip_empty_quotes(data: &[u8], quote: u8) -> Vec<u8> {
  let mut out = Vec::with_capacity(data.len());
  let mut i = 0;
  while i < data.len() {
    if data[i] == quote && data.get(i + 1) == Some(&quote) {
      i += 2;
      continue;
    }
    out.push(data[i]);
    i += 1;
  }
  out
}

/// Split `data` into records of exactly `width` fields. Empty fields become
/// NULL.
pub fn parse_delimited(
  data: &[u8],
  width: usize,
  format: &DelimitedFormat,
) -> Result<Vec<Vec<SqlValue>>> {
  let data: Cow<'_, [u8]> = if format.strip_empty_quotes {
    Cow::Owned(strip_empty_quotes(data, format.quote))
  } else {
    Cow::Borrowed(data)
  };

  let mut reader = csv::ReaderBuilder::new()
    .delimiter(format.delimiter)
    .quote(format.quote)
    .has_headers(format.has_header)
    .flexible(true)
    .from_reader(data.as_ref());

  let mut rows = Vec::new();
  let mut record = csv::ByteRecord::new();
  let mut n: u64 = 0;
  while reader.read_byte_record(&mut record)? {
    n += 1;
    if record.len() != width {
      return Err(Error::FieldCount {
        record:   n,
        expected: width,
        found:    record.len(),
      });
    }
    let row = record
      .iter()
      .map(|field| {
        if field.is_empty() {
          SqlValue::Null
        } else {
          SqlValue::Text(String::from_utf8_lossy(field).into_owned())
        }
      })
      .collect();
    rows.push(row);
  }
  Ok(rows)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn text(s: &str) -> SqlValue { SqlValue::Text(s.to_owned()) }

  #[test]
  fn skips_header_and_nulls_empty_fields() {
    let rows =
      parse_delimited(b"key,value\nX,1\nY,\n", 2, &DelimitedFormat::default())
        .unwrap();
    assert_eq!(rows, vec![vec![text("X"), text("1")], vec![text("Y"), SqlValue::Null]]);
  }

  #[test]
  fn wrong_field_count_names_the_record() {
    let err = parse_delimited(b"a,b\n1,2\n3\n", 2, &DelimitedFormat::default())
      .unwrap_err();
    assert!(matches!(
      err,
      Error::FieldCount { record: 2, expected: 2, found: 1 }
    ));
  }

  #[test]
  fn custom_delimiter_without_header() {
    let format = DelimitedFormat {
      delimiter: b'|',
      has_header: false,
      ..DelimitedFormat::default()
    };
    let rows = parse_delimited(b"a|b\n", 2, &format).unwrap();
    assert_eq!(rows, vec![vec![text("a"), text("b")]]);
  }

  #[test]
  fn empty_quotes_are_stripped() {
    let format = DelimitedFormat {
      strip_empty_quotes: true,
      ..DelimitedFormat::default()
    };
    let rows = parse_delimited(b"a,b\n\"\",\"x\"\n", 2, &format).unwrap();
    assert_eq!(rows, vec![vec![SqlValue::Null, text("x")]]);
  }
}
