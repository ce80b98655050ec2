//! Morph-any-to-many engine: writes target-side polymorphic edges
//! (`morphOne` / `morphMany` attributes) into the target's morph join table.
//!
//! A row `(join_column = target, id_column = owner, type_column = owner uid,
//! field = attribute)` is ordered within its target's partition: a new row
//! goes after every row already referencing the same target.

use std::collections::{BTreeSet, HashMap};

use folio_core::{
  filter::Filter,
  relation::{RelationEntry, RelationPayload},
  schema::{FIELD_COLUMN, MorphJoinTable},
};
use serde_json::Value;
use tracing::debug;

use crate::{
  Result,
  encode::as_i64,
  morph::{MorphDelete, RelIds, clean_morph_order_columns, delete_morph_relations, on_filters},
  query::{QueryBuilder, Row},
  reorder::WindowedReorder,
  transaction::Transaction,
};

/// The entry and attribute whose edges are being written.
#[derive(Debug, Clone, Copy)]
pub struct MorphOwner<'a> {
  pub id:        i64,
  pub uid:       &'a str,
  pub attribute: &'a str,
}

impl MorphOwner<'_> {
  fn delete(&self, rel_ids: RelIds) -> MorphDelete<'_> {
    MorphDelete {
      id: self.id,
      uid: Some(self.uid),
      attribute: Some(self.attribute),
      rel_ids,
    }
  }

  fn filter(&self, jt: &MorphJoinTable) -> Option<Filter> {
    let mut filters = vec![
      Filter::eq(jt.morph_column.id_column.clone(), self.id),
      Filter::eq(jt.morph_column.type_column.clone(), self.uid),
      Filter::eq(FIELD_COLUMN, self.attribute),
    ];
    filters.extend(on_filters(jt));
    Filter::all(filters)
  }
}

/// Current max order per target id, from one grouped aggregate query.
async fn max_orders(
  trx: &Transaction,
  jt: &MorphJoinTable,
  target_ids: &[i64],
) -> Result<HashMap<i64, i64>> {
  let mut filters = vec![Filter::is_in(jt.join_column.clone(), target_ids.iter().copied())];
  filters.extend(on_filters(jt));

  let mut query = QueryBuilder::new(&jt.name)
    .select([jt.join_column.as_str()])
    .max(jt.order_column.as_str(), "max")
    .group_by(jt.join_column.as_str());
  if let Some(filter) = Filter::all(filters) {
    query = query.where_(filter);
  }
  let rows = query.transacting(trx).execute().await?.rows;

  Ok(
    rows
      .iter()
      .filter_map(|row| {
        let id = as_i64(row.get(&jt.join_column))?;
        Some((id, as_i64(row.get("max")).unwrap_or(0)))
      })
      .collect(),
  )
}

/// Insert one row per entry, in input order, each placed after the current
/// last row of its target.
async fn insert_morph_rows(
  trx: &Transaction,
  jt: &MorphJoinTable,
  owner: MorphOwner<'_>,
  entries: &[RelationEntry],
) -> Result<usize> {
  if entries.is_empty() {
    return Ok(0);
  }
  let target_ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
  let mut next_order = max_orders(trx, jt, &target_ids).await?;

  let rows: Vec<Row> = entries
    .iter()
    .map(|entry| {
      let slot = next_order.entry(entry.id).or_insert(0);
      *slot += 1;

      let mut row = entry.pivot.clone();
      row.extend(jt.on.clone());
      row.insert(jt.join_column.clone(), Value::from(entry.id));
      row.insert(jt.morph_column.id_column.clone(), Value::from(owner.id));
      row.insert(jt.morph_column.type_column.clone(), Value::from(owner.uid));
      row.insert(FIELD_COLUMN.to_owned(), Value::from(owner.attribute));
      row.insert(jt.order_column.clone(), Value::from(*slot));
      row
    })
    .collect();

  let inserted = QueryBuilder::new(&jt.name)
    .insert(rows)
    .transacting(trx)
    .execute()
    .await?
    .affected;
  debug!(
    table = %jt.name,
    owner = owner.id,
    attribute = owner.attribute,
    inserted,
    "attached morph edges"
  );
  Ok(inserted)
}

/// Entries with a repeated id dropped, first occurrence kept.
fn distinct(entries: &[RelationEntry]) -> Vec<RelationEntry> {
  let mut seen = BTreeSet::new();
  entries.iter().filter(|e| seen.insert(e.id)).cloned().collect()
}

/// Attach the edges of a payload to a freshly created owner. Nothing is
/// deleted first. Returns the number of rows inserted.
pub async fn attach_morph_any_to_one_relation(
  trx: &Transaction,
  jt: &MorphJoinTable,
  owner: MorphOwner<'_>,
  payload: &RelationPayload,
) -> Result<usize> {
  let entries = distinct(payload.to_add());
  insert_morph_rows(trx, jt, owner, &entries).await
}

/// Apply a payload to an existing owner.
///
/// With `set`, every edge of the owner is deleted and the partitions it left
/// are renumbered before the new edges are inserted. Otherwise `disconnect`
/// (minus anything also being connected) is deleted and `connect` edges the
/// owner does not already have are appended. Returns the number of rows
/// inserted.
pub async fn update_morph_any_to_many_relation(
  trx: &Transaction,
  strategy: &dyn WindowedReorder,
  jt: &MorphJoinTable,
  owner: MorphOwner<'_>,
  payload: &RelationPayload,
) -> Result<usize> {
  let to_add = if payload.is_full_replace() {
    let left = delete_morph_relations(trx, strategy, jt, owner.delete(RelIds::All)).await?;
    clean_morph_order_columns(trx, strategy, jt, &left).await?;
    distinct(payload.to_add())
  } else {
    let to_remove: Vec<i64> = payload.to_remove().iter().map(|e| e.id).collect();
    if !to_remove.is_empty() {
      delete_morph_relations(trx, strategy, jt, owner.delete(RelIds::Ids(to_remove))).await?;
    }

    let mut existing = QueryBuilder::new(&jt.name).select([jt.join_column.as_str()]);
    if let Some(filter) = owner.filter(jt) {
      existing = existing.where_(filter);
    }
    let existing: BTreeSet<i64> = existing
      .transacting(trx)
      .execute()
      .await?
      .rows
      .iter()
      .filter_map(|row| as_i64(row.get(&jt.join_column)))
      .collect();

    distinct(payload.to_add())
      .into_iter()
      .filter(|entry| !existing.contains(&entry.id))
      .collect()
  };

  if to_add.is_empty() {
    return Ok(0);
  }
  insert_morph_rows(trx, jt, owner, &to_add).await
}
