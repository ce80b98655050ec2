//! The storage filter language.
//!
//! Filters are backend-neutral trees of per-field [`Condition`]s. Document
//! lookups name attributes (`publishedAt`, `locale`, `title`); join-table
//! queries name raw columns. The backend decides how a name maps to SQL.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A predicate over a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
  Eq(Value),
  Ne(Value),
  In(Vec<Value>),
  NotIn(Vec<Value>),
  Null,
  NotNull,
  Lt(Value),
  Gt(Value),
  /// Substring match.
  Contains(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
  Field(String, Condition),
  And(Vec<Filter>),
  Or(Vec<Filter>),
  Not(Box<Filter>),
}

impl Filter {
  pub fn field(name: impl Into<String>, condition: Condition) -> Self {
    Self::Field(name.into(), condition)
  }

  pub fn eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
    Self::Field(name.into(), Condition::Eq(value.into()))
  }

  pub fn is_in<V: Into<Value>>(
    name: impl Into<String>,
    values: impl IntoIterator<Item = V>,
  ) -> Self {
    Self::Field(
      name.into(),
      Condition::In(values.into_iter().map(Into::into).collect()),
    )
  }

  pub fn null(name: impl Into<String>) -> Self {
    Self::Field(name.into(), Condition::Null)
  }

  pub fn not_null(name: impl Into<String>) -> Self {
    Self::Field(name.into(), Condition::NotNull)
  }

  /// Conjunction that flattens trivial cases.
  pub fn all(filters: impl IntoIterator<Item = Filter>) -> Option<Self> {
    let mut filters: Vec<Filter> = filters.into_iter().collect();
    match filters.len() {
      0 => None,
      1 => filters.pop(),
      _ => Some(Self::And(filters)),
    }
  }

  /// `self AND other`.
  pub fn and(self, other: Filter) -> Self {
    match self {
      Self::And(mut filters) => {
        filters.push(other);
        Self::And(filters)
      }
      first => Self::And(vec![first, other]),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn all_flattens() {
    assert_eq!(Filter::all(Vec::new()), None);
    assert_eq!(Filter::all([Filter::null("a")]), Some(Filter::null("a")));
    assert!(matches!(
      Filter::all([Filter::null("a"), Filter::eq("b", 1)]),
      Some(Filter::And(ref v)) if v.len() == 2
    ));
  }

  #[test]
  fn and_appends_to_existing_conjunction() {
    let f = Filter::null("a").and(Filter::eq("b", 1)).and(Filter::not_null("c"));
    assert!(matches!(f, Filter::And(ref v) if v.len() == 3));
  }
}
