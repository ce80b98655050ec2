//! Documents, action parameters and action results.
//!
//! A document is a logical entry identified by a stable `document_id`. It
//! owns one physical row per (locale, status) combination it was saved in.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use crate::filter::{Condition, Filter};

/// Locale value selecting every locale variant of a document.
pub const ALL_LOCALES: &str = "*";

/// Attribute names with a fixed meaning on every document.
pub mod fields {
  pub const ID: &str = "id";
  pub const DOCUMENT_ID: &str = "documentId";
  pub const LOCALE: &str = "locale";
  pub const PUBLISHED_AT: &str = "publishedAt";
  pub const CREATED_AT: &str = "createdAt";
  pub const UPDATED_AT: &str = "updatedAt";
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// Publication status requested by a caller or derived from a row.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Status {
  Draft,
  Published,
}

impl Status {
  /// Parse a caller-supplied status string.
  pub fn parse(s: &str) -> crate::Result<Self> {
    s.parse().map_err(|_| crate::Error::InvalidStatus(s.to_owned()))
  }
}

// ─── Document ────────────────────────────────────────────────────────────────

/// One physical row of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
  pub id:           i64,
  pub document_id:  String,
  pub locale:       Option<String>,
  /// `None` for draft rows.
  pub published_at: Option<DateTime<Utc>>,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
  /// Schema-defined fields, plus populated relations.
  #[serde(flatten)]
  pub data:         Map<String, Value>,
}

impl Document {
  pub fn status(&self) -> Status {
    if self.published_at.is_some() {
      Status::Published
    } else {
      Status::Draft
    }
  }

  pub fn get(&self, field: &str) -> Option<&Value> { self.data.get(field) }
}

/// The rows touched by an action addressing a whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEntries {
  pub document_id: Option<String>,
  pub entries:     Vec<Document>,
}

// ─── Params ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  #[default]
  Asc,
  Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
  pub field: String,
  #[serde(default)]
  pub order: SortOrder,
}

impl Sort {
  pub fn asc(field: impl Into<String>) -> Self {
    Self { field: field.into(), order: SortOrder::Asc }
  }

  pub fn desc(field: impl Into<String>) -> Self {
    Self { field: field.into(), order: SortOrder::Desc }
  }
}

/// Parameters of a document action.
///
/// Callers fill `data`, `filters`, `status` and `locale`; the middleware
/// chain turns `status` and `locale` into `lookup` conditions and `data`
/// columns before the storage call sees them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
  /// Target of single-document actions.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub document_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data:     Option<Map<String, Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub filters:  Option<Filter>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status:   Option<Status>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub locale:   Option<String>,
  /// Conditions ANDed with `filters`, keyed by attribute name.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub lookup:   BTreeMap<String, Condition>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub sort:     Vec<Sort>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start:    Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub limit:    Option<usize>,
  /// Relation attributes whose targets are attached to returned documents.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub populate: Vec<String>,
}

impl Params {
  pub fn new() -> Self { Self::default() }

  pub fn document_id(mut self, document_id: impl Into<String>) -> Self {
    self.document_id = Some(document_id.into());
    self
  }

  pub fn data(mut self, data: Map<String, Value>) -> Self {
    self.data = Some(data);
    self
  }

  pub fn filters(mut self, filters: Filter) -> Self {
    self.filters = Some(filters);
    self
  }

  pub fn status(mut self, status: Status) -> Self {
    self.status = Some(status);
    self
  }

  pub fn locale(mut self, locale: impl Into<String>) -> Self {
    self.locale = Some(locale.into());
    self
  }

  pub fn sort(mut self, sort: Sort) -> Self {
    self.sort.push(sort);
    self
  }

  pub fn paginate(mut self, start: usize, limit: usize) -> Self {
    self.start = Some(start);
    self.limit = Some(limit);
    self
  }

  pub fn populate(mut self, attribute: impl Into<String>) -> Self {
    self.populate.push(attribute.into());
    self
  }

  /// Shallow merge: every field set on `self` wins over `defaults`.
  /// `lookup` entries are merged key by key.
  pub fn merged_over(self, defaults: &Params) -> Params {
    let mut lookup = defaults.lookup.clone();
    lookup.extend(self.lookup);

    Params {
      document_id: self.document_id.or_else(|| defaults.document_id.clone()),
      data:     self.data.or_else(|| defaults.data.clone()),
      filters:  self.filters.or_else(|| defaults.filters.clone()),
      status:   self.status.or(defaults.status),
      locale:   self.locale.or_else(|| defaults.locale.clone()),
      lookup,
      sort:     if self.sort.is_empty() { defaults.sort.clone() } else { self.sort },
      start:    self.start.or(defaults.start),
      limit:    self.limit.or(defaults.limit),
      populate: if self.populate.is_empty() {
        defaults.populate.clone()
      } else {
        self.populate
      },
    }
  }

  /// `data`, created on first access.
  pub fn data_mut(&mut self) -> &mut Map<String, Value> {
    self.data.get_or_insert_with(Map::new)
  }

  /// `lookup` and `filters` combined into one filter.
  pub fn where_filter(&self) -> Option<Filter> {
    let lookup = self
      .lookup
      .iter()
      .map(|(field, cond)| Filter::field(field.clone(), cond.clone()));
    Filter::all(lookup.chain(self.filters.clone()))
  }
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// The result of any document action as it travels through the middleware
/// chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Outcome {
  One(Option<Document>),
  Many(Vec<Document>),
  Count(u64),
  Entries(DocumentEntries),
}

impl Outcome {
  pub fn into_one(self) -> Option<Option<Document>> {
    match self {
      Self::One(doc) => Some(doc),
      _ => None,
    }
  }

  pub fn into_many(self) -> Option<Vec<Document>> {
    match self {
      Self::Many(docs) => Some(docs),
      _ => None,
    }
  }

  pub fn into_count(self) -> Option<u64> {
    match self {
      Self::Count(n) => Some(n),
      _ => None,
    }
  }

  pub fn into_entries(self) -> Option<DocumentEntries> {
    match self {
      Self::Entries(entries) => Some(entries),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn status_parses_lowercase() {
    assert_eq!(Status::parse("draft").unwrap(), Status::Draft);
    assert_eq!(Status::parse("published").unwrap(), Status::Published);
    assert!(matches!(
      Status::parse("archived"),
      Err(crate::Error::InvalidStatus(s)) if s == "archived"
    ));
    assert_eq!(Status::Published.to_string(), "published");
  }

  #[test]
  fn merged_over_prefers_call_values() {
    let defaults = Params::new().status(Status::Published).locale("en").paginate(0, 10);
    let call = Params::new().locale("fr");

    let merged = call.merged_over(&defaults);
    assert_eq!(merged.status, Some(Status::Published));
    assert_eq!(merged.locale.as_deref(), Some("fr"));
    assert_eq!(merged.limit, Some(10));
  }

  #[test]
  fn merged_over_combines_lookup_keys() {
    let mut defaults = Params::new();
    defaults.lookup.insert("a".into(), Condition::Null);
    defaults.lookup.insert("b".into(), Condition::Null);
    let mut call = Params::new();
    call.lookup.insert("b".into(), Condition::NotNull);

    let merged = call.merged_over(&defaults);
    assert_eq!(merged.lookup.get("a"), Some(&Condition::Null));
    assert_eq!(merged.lookup.get("b"), Some(&Condition::NotNull));
  }

  #[test]
  fn where_filter_joins_lookup_and_filters() {
    let mut params = Params::new().filters(Filter::eq("title", json!("x")));
    assert_eq!(params.where_filter(), Some(Filter::eq("title", json!("x"))));

    params.lookup.insert(fields::PUBLISHED_AT.into(), Condition::Null);
    let Some(Filter::And(parts)) = params.where_filter() else {
      panic!("expected conjunction");
    };
    assert_eq!(parts.len(), 2);
  }
}
