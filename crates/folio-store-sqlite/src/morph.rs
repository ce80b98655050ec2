//! Morph relation manager: deletes polymorphic join rows and keeps their
//! order columns dense.
//!
//! Every morph join table row is `(join_column, id_column, type_column,
//! field, order)`. `order` is the row's position within its `join_column`
//! partition, so a repair renumbers whole partitions.

use std::collections::{BTreeMap, BTreeSet};

use folio_core::{
  filter::Filter,
  schema::{FIELD_COLUMN, MorphJoinTable, Relation, SchemaRegistry},
};
use tracing::debug;

use crate::{
  Result,
  encode::{as_i64, as_str},
  query::{QueryBuilder, Row},
  reorder::{ReorderScope, WindowedReorder, reorder},
  transaction::Transaction,
};

/// Which edges of an owner to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelIds {
  /// Every edge, whatever its target.
  All,
  /// Edges whose `join_column` is one of these ids.
  Ids(Vec<i64>),
}

/// Owner selector for [`delete_morph_relations`]. `uid` and `attribute`
/// narrow the match when given.
#[derive(Debug, Clone)]
pub struct MorphDelete<'a> {
  pub id:        i64,
  pub uid:       Option<&'a str>,
  pub attribute: Option<&'a str>,
  pub rel_ids:   RelIds,
}

/// The table's static `on` columns as equality filters.
pub(crate) fn on_filters(jt: &MorphJoinTable) -> Vec<Filter> {
  jt.on.iter().map(|(column, value)| Filter::eq(column.clone(), value.clone())).collect()
}

pub(crate) fn join_ids(rows: &[Row], column: &str) -> Vec<i64> {
  let ids: BTreeSet<i64> = rows.iter().filter_map(|r| as_i64(r.get(column))).collect();
  ids.into_iter().collect()
}

/// Delete the join rows of one owner.
///
/// With [`RelIds::Ids`] the touched partitions are renumbered afterwards.
/// With [`RelIds::All`] no repair runs; the partitions the deleted rows
/// belonged to are returned so callers that need density can repair them.
pub async fn delete_morph_relations(
  trx: &Transaction,
  strategy: &dyn WindowedReorder,
  jt: &MorphJoinTable,
  target: MorphDelete<'_>,
) -> Result<Vec<i64>> {
  let mut filters = vec![Filter::eq(jt.morph_column.id_column.clone(), target.id)];
  if let Some(uid) = target.uid {
    filters.push(Filter::eq(jt.morph_column.type_column.clone(), uid));
  }
  if let Some(attribute) = target.attribute {
    filters.push(Filter::eq(FIELD_COLUMN, attribute));
  }
  filters.extend(on_filters(jt));

  match target.rel_ids {
    RelIds::All => {
      let Some(filter) = Filter::all(filters) else {
        return Ok(Vec::new());
      };
      let rows = QueryBuilder::new(&jt.name)
        .select([jt.join_column.as_str()])
        .where_(filter.clone())
        .transacting(trx)
        .execute()
        .await?
        .rows;
      let deleted = QueryBuilder::new(&jt.name)
        .delete()
        .where_(filter)
        .transacting(trx)
        .execute()
        .await?
        .affected;
      debug!(table = %jt.name, owner = target.id, deleted, "deleted every morph edge");
      Ok(join_ids(&rows, &jt.join_column))
    }
    RelIds::Ids(ids) => {
      if ids.is_empty() {
        return Ok(Vec::new());
      }
      filters.push(Filter::is_in(jt.join_column.clone(), ids.iter().copied()));
      let Some(filter) = Filter::all(filters) else {
        return Ok(Vec::new());
      };
      let deleted = QueryBuilder::new(&jt.name)
        .delete()
        .where_(filter)
        .transacting(trx)
        .execute()
        .await?
        .affected;
      debug!(table = %jt.name, owner = target.id, deleted, "deleted morph edges");
      clean_morph_order_columns(trx, strategy, jt, &ids).await?;
      Ok(ids)
    }
  }
}

/// Renumber the order column of the given `join_column` partitions so each
/// runs 1..N, keeping the existing relative order.
pub async fn clean_morph_order_columns(
  trx: &Transaction,
  strategy: &dyn WindowedReorder,
  jt: &MorphJoinTable,
  partitions: &[i64],
) -> Result<()> {
  if partitions.is_empty() {
    return Ok(());
  }
  let mut filters = vec![Filter::is_in(jt.join_column.clone(), partitions.iter().copied())];
  filters.extend(on_filters(jt));

  let scope = ReorderScope {
    table:        jt.name.clone(),
    partition_by: jt.join_column.clone(),
    order_column: jt.order_column.clone(),
    filter:       Filter::all(filters),
  };
  reorder(trx, strategy, &scope).await?;
  Ok(())
}

/// The rows, about to be written to the morph-to table owned by
/// `uid.attribute`, whose target attribute is a `morphOne` pointing back at
/// that owner attribute.
pub fn get_morph_to_many_rows_linked_to_morph_one<'r>(
  registry: &SchemaRegistry,
  rows: &'r [Row],
  uid: &str,
  attribute: &str,
  jt: &MorphJoinTable,
) -> Vec<&'r Row> {
  rows
    .iter()
    .filter(|row| {
      let (Some(target_type), Some(field)) = (
        as_str(row.get(&jt.morph_column.type_column)),
        as_str(row.get(FIELD_COLUMN)),
      ) else {
        return false;
      };
      matches!(
        registry.find_relation(target_type, field),
        Some(Relation::MorphOne { target, morph_by }) if target == uid && morph_by == attribute
      )
    })
    .collect()
}

/// A `morphOne` holds one value. Before `rows` are inserted, drop every
/// existing row that gives one of their `morphOne` targets another value.
///
/// Matching rows are grouped by `(type, field)` and removed with a single
/// delete over an `OR` of per-group `IN` filters. Returns the number of rows
/// removed.
pub async fn delete_related_morph_one_relations_after_morph_to_many_update(
  trx: &Transaction,
  strategy: &dyn WindowedReorder,
  registry: &SchemaRegistry,
  rows: &[Row],
  uid: &str,
  attribute: &str,
  jt: &MorphJoinTable,
) -> Result<usize> {
  let linked = get_morph_to_many_rows_linked_to_morph_one(registry, rows, uid, attribute, jt);
  if linked.is_empty() {
    return Ok(0);
  }

  let mut groups: BTreeMap<(String, String), Vec<i64>> = BTreeMap::new();
  for row in linked {
    let type_ = as_str(row.get(&jt.morph_column.type_column)).unwrap_or_default();
    let field = as_str(row.get(FIELD_COLUMN)).unwrap_or_default();
    if let Some(id) = as_i64(row.get(&jt.morph_column.id_column)) {
      groups.entry((type_.to_owned(), field.to_owned())).or_default().push(id);
    }
  }

  let any_group = Filter::Or(
    groups
      .into_iter()
      .map(|((type_, field), ids)| {
        Filter::And(vec![
          Filter::eq(jt.morph_column.type_column.clone(), type_),
          Filter::eq(FIELD_COLUMN, field),
          Filter::is_in(jt.morph_column.id_column.clone(), ids),
        ])
      })
      .collect(),
  );
  let mut filters = vec![any_group];
  filters.extend(on_filters(jt));
  let Some(filter) = Filter::all(filters) else {
    return Ok(0);
  };

  let evicted = QueryBuilder::new(&jt.name)
    .select([jt.join_column.as_str()])
    .where_(filter.clone())
    .transacting(trx)
    .execute()
    .await?
    .rows;
  if evicted.is_empty() {
    return Ok(0);
  }
  let deleted = QueryBuilder::new(&jt.name)
    .delete()
    .where_(filter)
    .transacting(trx)
    .execute()
    .await?
    .affected;
  debug!(table = %jt.name, deleted, "evicted morphOne edges");

  clean_morph_order_columns(trx, strategy, jt, &join_ids(&evicted, &jt.join_column)).await?;
  Ok(deleted)
}
