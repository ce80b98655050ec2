//! Relation writes and reads for one entity row.
//!
//! Dispatches on the relation kind: simple relations live in their own join
//! table, owner-side morph relations (`morphToOne` / `morphToMany`) in theirs,
//! and target-side morph relations (`morphOne` / `morphMany`) go through the
//! morph-any-to-many engine.

use std::collections::BTreeSet;

use folio_core::{
  document::SortOrder,
  filter::{Condition, Filter},
  relation::{RelationEntry, RelationPayload, TYPE_KEY},
  schema::{FIELD_COLUMN, JoinTable, MorphJoinTable, Relation, RelationKind, SchemaRegistry},
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
  Error, Result,
  components::{references_target, replace_component_references},
  encode::{as_i64, as_str},
  morph::{
    MorphDelete, RelIds, clean_morph_order_columns, delete_morph_relations,
    delete_related_morph_one_relations_after_morph_to_many_update, join_ids, on_filters,
  },
  morph_many::{MorphOwner, attach_morph_any_to_one_relation, update_morph_any_to_many_relation},
  query::{QueryBuilder, QueryOutput, Row},
  reorder::{ReorderScope, WindowedReorder, reorder},
  transaction::Transaction,
};

fn distinct_ids(entries: &[RelationEntry]) -> Vec<i64> {
  let mut seen = BTreeSet::new();
  entries.iter().map(|e| e.id).filter(|id| seen.insert(*id)).collect()
}

fn distinct_edges(entries: &[RelationEntry]) -> Vec<RelationEntry> {
  let mut out: Vec<RelationEntry> = Vec::new();
  for entry in entries {
    if !out.iter().any(|e| e.same_edge(entry)) {
      out.push(entry.clone());
    }
  }
  out
}

fn keep_last<T>(mut items: Vec<T>) -> Vec<T> {
  let last = items.pop();
  last.into_iter().collect()
}

/// Relation operations inside one transaction.
#[derive(Clone, Copy)]
pub struct Relations<'a> {
  trx:      &'a Transaction,
  registry: &'a SchemaRegistry,
  strategy: &'a dyn WindowedReorder,
}

impl<'a> Relations<'a> {
  pub fn new(
    trx: &'a Transaction,
    registry: &'a SchemaRegistry,
    strategy: &'a dyn WindowedReorder,
  ) -> Self {
    Self { trx, registry, strategy }
  }

  async fn run(&self, query: QueryBuilder) -> Result<QueryOutput> {
    query.transacting(self.trx).execute().await
  }

  async fn rows(&self, query: QueryBuilder) -> Result<Vec<Row>> {
    Ok(self.run(query).await?.rows)
  }

  async fn max_order(&self, table: &str, column: &str, owner: Filter) -> Result<i64> {
    let rows = self.rows(QueryBuilder::new(table).max(column, "max").where_(owner)).await?;
    Ok(rows.first().and_then(|r| as_i64(r.get("max"))).unwrap_or(0))
  }

  // ─── Writes ───────────────────────────────────────────────────────────────

  /// Apply `payload` to `uid.attribute` of row `id`. `creating` selects the
  /// attach path for target-side morph relations.
  pub async fn apply(
    &self,
    uid: &str,
    id: i64,
    attribute: &str,
    payload: &RelationPayload,
    creating: bool,
  ) -> Result<()> {
    let relation = self.registry.relation(uid, attribute)?;
    debug!(uid, id, attribute, kind = ?relation.kind(), "applying relation payload");

    match relation {
      Relation::OneToOne { .. }
      | Relation::OneToMany { .. }
      | Relation::ManyToOne { .. }
      | Relation::ManyToMany { .. } => {
        let jt = self.registry.join_table(uid, attribute)?;
        self.apply_simple(id, relation.kind(), jt, payload).await
      }
      Relation::MorphOne { .. } | Relation::MorphMany { .. } => {
        let jt = self.registry.morph_join_table(uid, attribute)?;
        let owner = MorphOwner { id, uid, attribute };
        let single;
        let payload = if relation.kind().is_single() && !payload.to_add().is_empty() {
          single = RelationPayload::set(keep_last(payload.to_add().to_vec()));
          &single
        } else {
          payload
        };
        if creating {
          attach_morph_any_to_one_relation(self.trx, jt, owner, payload).await?;
        } else {
          update_morph_any_to_many_relation(self.trx, self.strategy, jt, owner, payload).await?;
        }
        Ok(())
      }
      Relation::MorphToOne { join_table } | Relation::MorphToMany { join_table } => {
        self.apply_morph_to(uid, id, attribute, relation.kind(), join_table, payload).await
      }
    }
  }

  async fn apply_simple(
    &self,
    id: i64,
    kind: RelationKind,
    jt: &JoinTable,
    payload: &RelationPayload,
  ) -> Result<()> {
    let owner = Filter::eq(jt.join_column.clone(), id);
    let replace = payload.is_full_replace() || (kind.is_single() && !payload.to_add().is_empty());
    let mut start = 0;

    let mut add = if replace {
      self.run(QueryBuilder::new(&jt.name).delete().where_(owner.clone())).await?;
      distinct_ids(payload.to_add())
    } else {
      let remove: Vec<i64> = payload.to_remove().iter().map(|e| e.id).collect();
      if !remove.is_empty() {
        let filter = owner.clone().and(Filter::is_in(jt.inverse_join_column.clone(), remove));
        self.run(QueryBuilder::new(&jt.name).delete().where_(filter)).await?;
        self.repair_simple(jt, &[id]).await?;
      }

      let existing: BTreeSet<i64> = self
        .rows(
          QueryBuilder::new(&jt.name)
            .select([jt.inverse_join_column.as_str()])
            .where_(owner.clone()),
        )
        .await?
        .iter()
        .filter_map(|row| as_i64(row.get(&jt.inverse_join_column)))
        .collect();
      if let Some(order) = &jt.order_column {
        start = self.max_order(&jt.name, order, owner.clone()).await?;
      }
      distinct_ids(payload.to_add())
        .into_iter()
        .filter(|target| !existing.contains(target))
        .collect()
    };

    if kind.is_single() {
      add = keep_last(add);
    }
    if add.is_empty() {
      return Ok(());
    }
    if matches!(kind, RelationKind::OneToOne | RelationKind::OneToMany) {
      self.detach_from_other_owners(jt, id, &add).await?;
    }

    let rows: Vec<Row> = add
      .iter()
      .zip(1..)
      .map(|(target, position)| {
        let mut row = Row::new();
        row.insert(jt.join_column.clone(), Value::from(id));
        row.insert(jt.inverse_join_column.clone(), Value::from(*target));
        if let Some(order) = &jt.order_column {
          row.insert(order.clone(), Value::from(start + position));
        }
        row
      })
      .collect();
    self.run(QueryBuilder::new(&jt.name).insert(rows)).await?;
    Ok(())
  }

  /// A target of a one-sided relation belongs to a single owner; take it
  /// away from any other owner first.
  async fn detach_from_other_owners(&self, jt: &JoinTable, id: i64, targets: &[i64]) -> Result<()> {
    let filter = Filter::is_in(jt.inverse_join_column.clone(), targets.iter().copied())
      .and(Filter::field(jt.join_column.clone(), Condition::Ne(Value::from(id))));
    let owners = join_ids(
      &self
        .rows(QueryBuilder::new(&jt.name).select([jt.join_column.as_str()]).where_(filter.clone()))
        .await?,
      &jt.join_column,
    );
    if owners.is_empty() {
      return Ok(());
    }
    self.run(QueryBuilder::new(&jt.name).delete().where_(filter)).await?;
    self.repair_simple(jt, &owners).await
  }

  /// Renumber the order column of the given owners' partitions.
  async fn repair_simple(&self, jt: &JoinTable, owners: &[i64]) -> Result<()> {
    let Some(order) = &jt.order_column else {
      return Ok(());
    };
    if owners.is_empty() {
      return Ok(());
    }
    let scope = ReorderScope {
      table:        jt.name.clone(),
      partition_by: jt.join_column.clone(),
      order_column: order.clone(),
      filter:       Some(Filter::is_in(jt.join_column.clone(), owners.iter().copied())),
    };
    reorder(self.trx, self.strategy, &scope).await?;
    Ok(())
  }

  async fn apply_morph_to(
    &self,
    uid: &str,
    id: i64,
    attribute: &str,
    kind: RelationKind,
    jt: &MorphJoinTable,
    payload: &RelationPayload,
  ) -> Result<()> {
    if let Some(untyped) = payload
      .to_add()
      .iter()
      .chain(&payload.disconnect)
      .find(|e| e.target_type.is_none())
    {
      return Err(
        folio_core::Error::InvalidRelation {
          attribute: attribute.to_owned(),
          reason:    format!("morph target {} has no {TYPE_KEY}", untyped.id),
        }
        .into(),
      );
    }

    let mut owner_filters = vec![Filter::eq(jt.join_column.clone(), id)];
    owner_filters.extend(on_filters(jt));
    let owner = Filter::And(owner_filters);
    let replace = payload.is_full_replace() || (kind.is_single() && !payload.to_add().is_empty());
    let mut start = 0;

    let mut add = if replace {
      self.run(QueryBuilder::new(&jt.name).delete().where_(owner.clone())).await?;
      distinct_edges(payload.to_add())
    } else {
      let remove = payload.to_remove();
      if !remove.is_empty() {
        let any = Filter::Or(
          remove
            .iter()
            .map(|e| {
              Filter::And(vec![
                Filter::eq(jt.morph_column.id_column.clone(), e.id),
                Filter::eq(
                  jt.morph_column.type_column.clone(),
                  e.target_type.clone().unwrap_or_default(),
                ),
              ])
            })
            .collect(),
        );
        self.run(QueryBuilder::new(&jt.name).delete().where_(owner.clone().and(any))).await?;
        clean_morph_order_columns(self.trx, self.strategy, jt, &[id]).await?;
      }

      let existing: Vec<RelationEntry> = self
        .rows(
          QueryBuilder::new(&jt.name)
            .select([
              jt.morph_column.id_column.as_str(),
              jt.morph_column.type_column.as_str(),
            ])
            .where_(owner.clone()),
        )
        .await?
        .iter()
        .filter_map(|row| {
          Some(RelationEntry::morph(
            as_i64(row.get(&jt.morph_column.id_column))?,
            as_str(row.get(&jt.morph_column.type_column))?,
          ))
        })
        .collect();
      start = self.max_order(&jt.name, &jt.order_column, owner.clone()).await?;
      distinct_edges(payload.to_add())
        .into_iter()
        .filter(|entry| !existing.iter().any(|e| e.same_edge(entry)))
        .collect()
    };

    if kind.is_single() {
      add = keep_last(add);
    }
    if add.is_empty() {
      return Ok(());
    }

    let rows: Vec<Row> = add
      .iter()
      .zip(1..)
      .map(|(entry, position)| {
        let mut row = entry.pivot.clone();
        row.extend(jt.on.clone());
        row.entry(FIELD_COLUMN).or_insert(Value::Null);
        row.insert(jt.join_column.clone(), Value::from(id));
        row.insert(jt.morph_column.id_column.clone(), Value::from(entry.id));
        row.insert(
          jt.morph_column.type_column.clone(),
          Value::from(entry.target_type.clone().unwrap_or_default()),
        );
        row.insert(jt.order_column.clone(), Value::from(start + position));
        row
      })
      .collect();

    delete_related_morph_one_relations_after_morph_to_many_update(
      self.trx,
      self.strategy,
      self.registry,
      &rows,
      uid,
      attribute,
      jt,
    )
    .await?;
    self.run(QueryBuilder::new(&jt.name).insert(rows)).await?;
    Ok(())
  }

  /// Remove every edge of row `id`: its own relations and every edge that
  /// names it as a target. Partitions left behind are renumbered.
  pub async fn delete_all(&self, uid: &str, id: i64) -> Result<()> {
    let ct = self.registry.get(uid)?;

    for (name, relation) in ct.relations() {
      match relation {
        Relation::OneToOne { join_table: jt, .. }
        | Relation::OneToMany { join_table: jt, .. }
        | Relation::ManyToOne { join_table: jt, .. }
        | Relation::ManyToMany { join_table: jt, .. } => {
          let Some(jt) = jt else { continue };
          let owner = Filter::eq(jt.join_column.clone(), id);
          self.run(QueryBuilder::new(&jt.name).delete().where_(owner)).await?;
        }
        Relation::MorphToOne { join_table: jt } | Relation::MorphToMany { join_table: jt } => {
          let mut filters = vec![Filter::eq(jt.join_column.clone(), id)];
          filters.extend(on_filters(jt));
          self.run(QueryBuilder::new(&jt.name).delete().where_(Filter::And(filters))).await?;
        }
        Relation::MorphOne { .. } | Relation::MorphMany { .. } => {
          let jt = self.registry.morph_join_table(uid, name)?;
          let target = MorphDelete {
            id,
            uid: Some(uid),
            attribute: Some(name),
            rel_ids: RelIds::All,
          };
          let left = delete_morph_relations(self.trx, self.strategy, jt, target).await?;
          clean_morph_order_columns(self.trx, self.strategy, jt, &left).await?;
        }
      }
    }

    let inbound: Vec<&JoinTable> =
      self.registry.inbound_join_tables(uid).map(|(_, jt)| jt).collect();
    for jt in inbound {
      let filter = Filter::eq(jt.inverse_join_column.clone(), id);
      let owners = join_ids(
        &self
          .rows(QueryBuilder::new(&jt.name).select([jt.join_column.as_str()]).where_(filter.clone()))
          .await?,
        &jt.join_column,
      );
      if owners.is_empty() {
        continue;
      }
      self.run(QueryBuilder::new(&jt.name).delete().where_(filter)).await?;
      self.repair_simple(jt, &owners).await?;
    }

    for jt in self.registry.morph_to_join_tables() {
      let mut filters = vec![
        Filter::eq(jt.morph_column.id_column.clone(), id),
        Filter::eq(jt.morph_column.type_column.clone(), uid),
      ];
      filters.extend(on_filters(jt));
      let filter = Filter::And(filters);
      let owners = join_ids(
        &self
          .rows(QueryBuilder::new(&jt.name).select([jt.join_column.as_str()]).where_(filter.clone()))
          .await?,
        &jt.join_column,
      );
      if owners.is_empty() {
        continue;
      }
      self.run(QueryBuilder::new(&jt.name).delete().where_(filter)).await?;
      clean_morph_order_columns(self.trx, self.strategy, jt, &owners).await?;
    }

    self.rewrite_component_references(uid, id, None).await?;
    debug!(uid, id, "deleted every edge of row");
    Ok(())
  }

  /// Move every edge other rows hold to row `from` onto row `to`, keeping
  /// positions. Edges that `from`'s own target-side morph attributes store
  /// in a shared morph table are left for [`Self::delete_all`].
  pub async fn relink_inbound(&self, uid: &str, from: i64, to: i64) -> Result<()> {
    let inbound: Vec<&JoinTable> =
      self.registry.inbound_join_tables(uid).map(|(_, jt)| jt).collect();
    for jt in inbound {
      let mut row = Row::new();
      row.insert(jt.inverse_join_column.clone(), Value::from(to));
      let filter = Filter::eq(jt.inverse_join_column.clone(), from);
      self.run(QueryBuilder::new(&jt.name).update(row).where_(filter)).await?;
    }

    let ct = self.registry.get(uid)?;
    for jt in self.registry.morph_to_join_tables() {
      let own_fields: Vec<&str> = ct
        .relations()
        .filter(|(name, relation)| {
          matches!(relation, Relation::MorphOne { .. } | Relation::MorphMany { .. })
            && self.registry.morph_join_table(uid, name).is_ok_and(|own| own.name == jt.name)
        })
        .map(|(name, _)| name)
        .collect();

      let mut filters = vec![
        Filter::eq(jt.morph_column.id_column.clone(), from),
        Filter::eq(jt.morph_column.type_column.clone(), uid),
      ];
      filters.extend(on_filters(jt));
      if !own_fields.is_empty() {
        filters.push(Filter::Or(vec![
          Filter::null(FIELD_COLUMN),
          Filter::Not(Box::new(Filter::is_in(FIELD_COLUMN, own_fields))),
        ]));
      }
      let mut row = Row::new();
      row.insert(jt.morph_column.id_column.clone(), Value::from(to));
      self.run(QueryBuilder::new(&jt.name).update(row).where_(Filter::And(filters))).await?;
    }

    self.rewrite_component_references(uid, from, Some(to)).await?;
    debug!(uid, from, to, "relinked inbound edges");
    Ok(())
  }

  /// Point references to row `from` of `uid` stored inside components and
  /// dynamic zones at `to`, or drop them when `to` is `None`.
  async fn rewrite_component_references(&self, uid: &str, from: i64, to: Option<i64>) -> Result<()> {
    for ct in self.registry.content_types() {
      if !references_target(self.registry, &ct.attributes, uid) {
        continue;
      }
      // Text match narrows the scan; the JSON walk decides.
      let candidates = self
        .rows(
          QueryBuilder::new(&ct.table_name)
            .select(["id", "data"])
            .where_(Filter::field("data", Condition::Contains(Value::from(from).to_string()))),
        )
        .await?;
      for candidate in candidates {
        let Some(id) = as_i64(candidate.get("id")) else { continue };
        let mut data: Map<String, Value> =
          serde_json::from_str(as_str(candidate.get("data")).unwrap_or("{}"))?;
        if !replace_component_references(self.registry, &ct.attributes, &mut data, uid, from, to)? {
          continue;
        }
        let mut row = Row::new();
        row.insert("data".into(), Value::Object(data));
        self.run(QueryBuilder::new(&ct.table_name).update(row).where_(Filter::eq("id", id))).await?;
      }
    }
    Ok(())
  }

  /// Give row `to` the same outgoing edges row `from` has.
  pub async fn copy_all(&self, uid: &str, from: i64, to: i64) -> Result<()> {
    let ct = self.registry.get(uid)?;

    for (name, relation) in ct.relations() {
      match relation {
        Relation::OneToOne { join_table: jt, .. }
        | Relation::OneToMany { join_table: jt, .. }
        | Relation::ManyToOne { join_table: jt, .. }
        | Relation::ManyToMany { join_table: jt, .. } => {
          let Some(jt) = jt else { continue };
          let mut query =
            QueryBuilder::new(&jt.name).where_(Filter::eq(jt.join_column.clone(), from));
          if let Some(order) = &jt.order_column {
            query = query.order_by(order.as_str(), SortOrder::Asc);
          }
          let rows = self.rows(query.order_by("id", SortOrder::Asc)).await?;
          self.reinsert(&jt.name, rows, &jt.join_column, to).await?;
        }
        Relation::MorphToOne { join_table: jt } | Relation::MorphToMany { join_table: jt } => {
          let mut filters = vec![Filter::eq(jt.join_column.clone(), from)];
          filters.extend(on_filters(jt));
          let rows = self
            .rows(
              QueryBuilder::new(&jt.name)
                .where_(Filter::And(filters))
                .order_by(jt.order_column.as_str(), SortOrder::Asc)
                .order_by("id", SortOrder::Asc),
            )
            .await?;
          self.reinsert(&jt.name, rows, &jt.join_column, to).await?;
        }
        Relation::MorphOne { .. } | Relation::MorphMany { .. } => {
          let jt = self.registry.morph_join_table(uid, name)?;
          let rows = self.rows(self.target_side_query(jt, uid, from, name)).await?;
          let skip = [
            "id",
            jt.join_column.as_str(),
            jt.morph_column.id_column.as_str(),
            jt.morph_column.type_column.as_str(),
            FIELD_COLUMN,
            jt.order_column.as_str(),
          ];
          let entries: Vec<RelationEntry> = rows
            .into_iter()
            .filter_map(|row| {
              let target = as_i64(row.get(&jt.join_column))?;
              let pivot: Map<String, Value> = row
                .into_iter()
                .filter(|(k, _)| !skip.contains(&k.as_str()) && !jt.on.contains_key(k))
                .collect();
              Some(RelationEntry { id: target, target_type: None, pivot })
            })
            .collect();
          let owner = MorphOwner { id: to, uid, attribute: name };
          attach_morph_any_to_one_relation(
            self.trx,
            jt,
            owner,
            &RelationPayload::connect(entries),
          )
          .await?;
        }
      }
    }
    Ok(())
  }

  async fn reinsert(&self, table: &str, rows: Vec<Row>, join_column: &str, to: i64) -> Result<()> {
    if rows.is_empty() {
      return Ok(());
    }
    let rows: Vec<Row> = rows
      .into_iter()
      .map(|mut row| {
        row.remove("id");
        row.insert(join_column.to_owned(), Value::from(to));
        row
      })
      .collect();
    self.run(QueryBuilder::new(table).insert(rows)).await?;
    Ok(())
  }

  fn target_side_query(&self, jt: &MorphJoinTable, uid: &str, id: i64, attribute: &str) -> QueryBuilder {
    let mut filters = vec![
      Filter::eq(jt.morph_column.id_column.clone(), id),
      Filter::eq(jt.morph_column.type_column.clone(), uid),
      Filter::eq(FIELD_COLUMN, attribute),
    ];
    filters.extend(on_filters(jt));
    QueryBuilder::new(&jt.name).where_(Filter::And(filters)).order_by("id", SortOrder::Asc)
  }

  // ─── Reads ────────────────────────────────────────────────────────────────

  /// The related references of `uid.attribute` on row `id`, in order: an id
  /// array, `{id, __type}` objects for owner-side morph relations, and a
  /// single value (or null) for single-valued kinds.
  pub async fn load(&self, uid: &str, id: i64, attribute: &str) -> Result<Value> {
    let relation = self.registry.relation(uid, attribute)?;
    let refs: Vec<Value> = match relation {
      Relation::OneToOne { .. }
      | Relation::OneToMany { .. }
      | Relation::ManyToOne { .. }
      | Relation::ManyToMany { .. } => {
        let jt = self.registry.join_table(uid, attribute)?;
        let mut query = QueryBuilder::new(&jt.name)
          .select([jt.inverse_join_column.as_str()])
          .where_(Filter::eq(jt.join_column.clone(), id));
        if let Some(order) = &jt.order_column {
          query = query.order_by(order.as_str(), SortOrder::Asc);
        }
        self
          .rows(query.order_by("id", SortOrder::Asc))
          .await?
          .iter()
          .filter_map(|row| as_i64(row.get(&jt.inverse_join_column)).map(Value::from))
          .collect()
      }
      Relation::MorphToOne { join_table: jt } | Relation::MorphToMany { join_table: jt } => {
        let mut filters = vec![Filter::eq(jt.join_column.clone(), id)];
        filters.extend(on_filters(jt));
        self
          .rows(
            QueryBuilder::new(&jt.name)
              .where_(Filter::And(filters))
              .order_by(jt.order_column.as_str(), SortOrder::Asc)
              .order_by("id", SortOrder::Asc),
          )
          .await?
          .iter()
          .filter_map(|row| {
            let mut reference = Map::new();
            reference.insert("id".into(), Value::from(as_i64(row.get(&jt.morph_column.id_column))?));
            reference.insert(
              TYPE_KEY.into(),
              Value::from(as_str(row.get(&jt.morph_column.type_column))?),
            );
            Some(Value::Object(reference))
          })
          .collect()
      }
      Relation::MorphOne { .. } | Relation::MorphMany { .. } => {
        let jt = self.registry.morph_join_table(uid, attribute)?;
        self
          .rows(self.target_side_query(jt, uid, id, attribute))
          .await?
          .iter()
          .filter_map(|row| as_i64(row.get(&jt.join_column)).map(Value::from))
          .collect()
      }
    };

    if relation.kind().is_single() {
      Ok(refs.into_iter().next().unwrap_or(Value::Null))
    } else {
      Ok(Value::Array(refs))
    }
  }

  /// Every `(target uid, target id)` edge leaving row `id`, one per edge.
  pub async fn targets(&self, uid: &str, id: i64) -> Result<Vec<(String, i64)>> {
    let ct = self.registry.get(uid)?;
    let mut out = Vec::new();
    for (name, relation) in ct.relations() {
      let value = self.load(uid, id, name).await?;
      let refs = match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
      };
      for reference in refs {
        let target = match (&reference, relation.target()) {
          (Value::Object(obj), _) => as_str(obj.get(TYPE_KEY)).map(str::to_owned),
          (_, Some(target)) => Some(target.to_owned()),
          _ => None,
        };
        let id = match &reference {
          Value::Object(obj) => as_i64(obj.get("id")),
          other => as_i64(Some(other)),
        };
        match (target, id) {
          (Some(target), Some(id)) => out.push((target, id)),
          _ => {
            return Err(Error::Unsupported(format!(
              "unreadable reference {reference} on {uid}.{name}"
            )));
          }
        }
      }
    }
    Ok(out)
  }
}
