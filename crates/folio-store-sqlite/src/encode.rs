//! Conversions between JSON values and SQLite column values.
//!
//! Timestamps are stored as RFC 3339 strings with microsecond precision so
//! that lexical and chronological order agree. Document attributes live in a
//! single JSON `data` column; booleans become integers and nested values are
//! stored as JSON text.

use chrono::{DateTime, SecondsFormat, Utc};
use folio_core::document::Document;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};

use crate::{Error, Result, query::Row};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

/// A `publishedAt`-style JSON value: a timestamp string or null.
pub fn decode_dt_value(value: &Value) -> Result<Option<DateTime<Utc>>> {
  match value {
    Value::Null => Ok(None),
    Value::String(s) => decode_dt(s).map(Some),
    other => Err(Error::DateParse(format!("expected a timestamp, got {other}"))),
  }
}

// ─── Values ──────────────────────────────────────────────────────────────────

pub fn to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => SqlValue::Real(n.as_f64().unwrap_or_default()),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    nested @ (Value::Array(_) | Value::Object(_)) => SqlValue::Text(nested.to_string()),
  }
}

pub fn from_sql(value: ValueRef<'_>) -> Value {
  match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::from(i),
    ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
    ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    ValueRef::Blob(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
  }
}

/// Integer column value, tolerating integers stored as text.
pub fn as_i64(value: Option<&Value>) -> Option<i64> {
  match value? {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

pub fn as_str(value: Option<&Value>) -> Option<&str> { value?.as_str() }

// ─── Document rows ───────────────────────────────────────────────────────────

/// Columns every entity table carries, in select order.
pub const DOCUMENT_COLUMNS: [&str; 7] = [
  "id",
  "document_id",
  "locale",
  "published_at",
  "created_at",
  "updated_at",
  "data",
];

/// An entity-table row as read from SQLite, before parsing.
#[derive(Debug)]
pub struct RawDocument {
  pub id:           i64,
  pub document_id:  String,
  pub locale:       Option<String>,
  pub published_at: Option<String>,
  pub created_at:   String,
  pub updated_at:   String,
  pub data:         String,
}

impl RawDocument {
  pub fn from_row(row: &Row) -> Result<Self> {
    let missing = |column: &str| Error::Unsupported(format!("entity row without {column}"));
    Ok(Self {
      id:           as_i64(row.get("id")).ok_or_else(|| missing("id"))?,
      document_id:  as_str(row.get("document_id"))
        .ok_or_else(|| missing("document_id"))?
        .to_owned(),
      locale:       as_str(row.get("locale")).map(str::to_owned),
      published_at: as_str(row.get("published_at")).map(str::to_owned),
      created_at:   as_str(row.get("created_at"))
        .ok_or_else(|| missing("created_at"))?
        .to_owned(),
      updated_at:   as_str(row.get("updated_at"))
        .ok_or_else(|| missing("updated_at"))?
        .to_owned(),
      data:         as_str(row.get("data")).unwrap_or("{}").to_owned(),
    })
  }

  pub fn into_document(self) -> Result<Document> {
    let data: Map<String, Value> = serde_json::from_str(&self.data)?;
    Ok(Document {
      id: self.id,
      document_id: self.document_id,
      locale: self.locale,
      published_at: self.published_at.as_deref().map(decode_dt).transpose()?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
      data,
    })
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let early = decode_dt("2024-01-01T00:00:00Z").unwrap();
    let late = decode_dt("2024-01-01T00:00:00.5Z").unwrap();
    assert!(encode_dt(early) < encode_dt(late));
    assert_eq!(decode_dt(&encode_dt(late)).unwrap(), late);
  }

  #[test]
  fn json_values_map_to_sqlite_types() {
    assert_eq!(to_sql(&json!(true)), SqlValue::Integer(1));
    assert_eq!(to_sql(&json!(2.5)), SqlValue::Real(2.5));
    assert_eq!(to_sql(&json!({ "a": 1 })), SqlValue::Text(r#"{"a":1}"#.into()));
    assert_eq!(from_sql(ValueRef::Integer(4)), json!(4));
    assert_eq!(from_sql(ValueRef::Null), Value::Null);
  }

  #[test]
  fn publish_timestamps_accept_null() {
    assert_eq!(decode_dt_value(&Value::Null).unwrap(), None);
    assert!(decode_dt_value(&json!("2024-05-01T10:00:00.000Z")).unwrap().is_some());
    assert!(decode_dt_value(&json!(3)).is_err());
  }
}
