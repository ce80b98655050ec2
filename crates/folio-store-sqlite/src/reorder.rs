//! Windowed order repair.
//!
//! After rows leave an ordered partition the survivors are renumbered with
//! `row_number() over (partition by .. order by order, id)`. Two statement
//! shapes are available; both have the same effect.

use folio_core::filter::Filter;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  Result,
  query::{Columns, compile_filter, quote},
  transaction::Transaction,
};

/// The rows to renumber.
#[derive(Debug, Clone, PartialEq)]
pub struct ReorderScope {
  pub table:        String,
  /// Column identifying one ordered partition.
  pub partition_by: String,
  pub order_column: String,
  /// Restricts both the rows renumbered and the rows counted.
  pub filter:       Option<Filter>,
}

impl ReorderScope {
  fn ranked(&self, params: &mut Vec<SqlValue>) -> String {
    let table = quote(&self.table);
    let order = quote(&self.order_column);
    let where_ = self
      .filter
      .as_ref()
      .map(|f| format!(" WHERE {}", compile_filter(f, Columns::Raw, params)))
      .unwrap_or_default();
    format!(
      "SELECT \"id\", ROW_NUMBER() OVER (PARTITION BY {} ORDER BY {order}, \"id\") AS rn \
       FROM {table}{where_}",
      quote(&self.partition_by),
    )
  }
}

/// Builds the statement that re-densifies an ordered partition.
pub trait WindowedReorder: Send + Sync {
  fn name(&self) -> &'static str;

  fn statement(&self, scope: &ReorderScope) -> (String, Vec<SqlValue>);
}

/// `UPDATE .. FROM (ranked)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateFrom;

impl WindowedReorder for UpdateFrom {
  fn name(&self) -> &'static str { "update_from" }

  fn statement(&self, scope: &ReorderScope) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let table = quote(&scope.table);
    let ranked = scope.ranked(&mut params);
    let sql = format!(
      "UPDATE {table} SET {order} = ranked.rn FROM ({ranked}) AS ranked \
       WHERE {table}.\"id\" = ranked.\"id\"",
      order = quote(&scope.order_column),
    );
    (sql, params)
  }
}

/// `UPDATE .. SET order = (correlated subquery)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Correlated;

impl WindowedReorder for Correlated {
  fn name(&self) -> &'static str { "correlated" }

  fn statement(&self, scope: &ReorderScope) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let table = quote(&scope.table);
    let ranked = scope.ranked(&mut params);
    let outer = scope
      .filter
      .as_ref()
      .map(|f| format!(" WHERE {}", compile_filter(f, Columns::Raw, &mut params)))
      .unwrap_or_default();
    let sql = format!(
      "UPDATE {table} SET {order} = (SELECT ranked.rn FROM ({ranked}) AS ranked \
       WHERE ranked.\"id\" = {table}.\"id\"){outer}",
      order = quote(&scope.order_column),
    );
    (sql, params)
  }
}

/// Configured choice of [`WindowedReorder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderStrategy {
  #[default]
  UpdateFrom,
  Correlated,
}

impl ReorderStrategy {
  pub fn reorder(self) -> &'static dyn WindowedReorder {
    match self {
      Self::UpdateFrom => &UpdateFrom,
      Self::Correlated => &Correlated,
    }
  }
}

/// Renumber `scope` through the raw connection.
pub async fn reorder(
  trx: &Transaction,
  strategy: &dyn WindowedReorder,
  scope: &ReorderScope,
) -> Result<usize> {
  let (sql, params) = strategy.statement(scope);
  debug!(table = %scope.table, strategy = strategy.name(), "repairing order");
  trx.raw(sql, params).await
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scope() -> ReorderScope {
    ReorderScope {
      table:        "m".into(),
      partition_by: "file_id".into(),
      order_column: "order".into(),
      filter:       Some(Filter::is_in("file_id", [1, 2])),
    }
  }

  #[test]
  fn update_from_binds_the_filter_once() {
    let (sql, params) = UpdateFrom.statement(&scope());
    assert!(sql.starts_with(r#"UPDATE "m" SET "order" = ranked.rn FROM"#));
    assert!(sql.contains(r#"PARTITION BY "file_id" ORDER BY "order", "id""#));
    assert_eq!(params.len(), 2);
  }

  #[test]
  fn correlated_binds_the_filter_twice() {
    let (sql, params) = Correlated.statement(&scope());
    assert!(sql.ends_with(r#"WHERE "file_id" IN (?, ?)"#));
    assert_eq!(params.len(), 4);
  }

  #[test]
  fn strategies_deserialize_from_snake_case() {
    let strategy: ReorderStrategy = serde_json::from_str("\"correlated\"").unwrap();
    assert_eq!(strategy.reorder().name(), "correlated");
    assert_eq!(ReorderStrategy::default().reorder().name(), "update_from");
  }
}
