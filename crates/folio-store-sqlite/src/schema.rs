//! SQL schema generated from the schema registry.
//!
//! Every content type gets one entity table; every simple relation and every
//! owner-side morph relation gets a join table. Executed once at connection
//! startup; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.

use std::collections::BTreeSet;

use folio_core::schema::{
  ContentType, FIELD_COLUMN, JoinTable, MorphJoinTable, Relation, SchemaRegistry,
};

use crate::query::quote;

/// Connection-level settings, run outside any transaction.
pub const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
";

fn entity_table(ct: &ContentType) -> String {
  let table = quote(&ct.table_name);
  format!(
    "CREATE TABLE IF NOT EXISTS {table} (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id  TEXT NOT NULL,
    locale       TEXT,
    published_at TEXT,            -- NULL for draft rows
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    data         TEXT NOT NULL DEFAULT '{{}}'
);
CREATE INDEX IF NOT EXISTS {index} ON {table} (document_id, locale, published_at);
",
    index = quote(&format!("{}_document_idx", ct.table_name)),
  )
}

fn join_table(jt: &JoinTable, owner_table: &str, target_table: &str) -> String {
  let order = jt
    .order_column
    .as_deref()
    .map(|column| format!(",\n    {} INTEGER", quote(column)))
    .unwrap_or_default();
  format!(
    "CREATE TABLE IF NOT EXISTS {table} (
    id  INTEGER PRIMARY KEY AUTOINCREMENT,
    {join} INTEGER NOT NULL REFERENCES {owner}(id),
    {inverse} INTEGER NOT NULL REFERENCES {target}(id){order}
);
CREATE INDEX IF NOT EXISTS {index} ON {table} ({join});
",
    table = quote(&jt.name),
    join = quote(&jt.join_column),
    inverse = quote(&jt.inverse_join_column),
    owner = quote(owner_table),
    target = quote(target_table),
    index = quote(&format!("{}_join_idx", jt.name)),
  )
}

fn morph_join_table(jt: &MorphJoinTable, owner_table: &str) -> String {
  // Static `on` columns and pivots are untyped; SQLite keeps whatever is bound.
  let extra: String = jt
    .on
    .keys()
    .chain(jt.pivot_columns.iter())
    .filter(|column| column.as_str() != FIELD_COLUMN)
    .map(|column| format!(",\n    {}", quote(column)))
    .collect();
  format!(
    "CREATE TABLE IF NOT EXISTS {table} (
    id  INTEGER PRIMARY KEY AUTOINCREMENT,
    {join} INTEGER NOT NULL REFERENCES {owner}(id),
    {id_column} INTEGER NOT NULL,
    {type_column} TEXT NOT NULL,
    {field} TEXT,
    {order} INTEGER{extra}
);
CREATE INDEX IF NOT EXISTS {join_index} ON {table} ({join});
CREATE INDEX IF NOT EXISTS {target_index} ON {table} ({type_column}, {id_column});
",
    table = quote(&jt.name),
    join = quote(&jt.join_column),
    owner = quote(owner_table),
    id_column = quote(&jt.morph_column.id_column),
    type_column = quote(&jt.morph_column.type_column),
    field = quote(FIELD_COLUMN),
    order = quote(&jt.order_column),
    join_index = quote(&format!("{}_join_idx", jt.name)),
    target_index = quote(&format!("{}_target_idx", jt.name)),
  )
}

/// Full DDL for `registry`. Entity tables come first so join tables can
/// reference them.
pub fn ddl(registry: &SchemaRegistry) -> String {
  let mut sql = String::new();
  let mut seen = BTreeSet::new();

  for ct in registry.content_types() {
    sql.push_str(&entity_table(ct));
  }

  for ct in registry.content_types() {
    for (_, relation) in ct.relations() {
      match relation {
        Relation::OneToOne { target, join_table: Some(jt) }
        | Relation::OneToMany { target, join_table: Some(jt) }
        | Relation::ManyToOne { target, join_table: Some(jt) }
        | Relation::ManyToMany { target, join_table: Some(jt) } => {
          if !seen.insert(jt.name.clone()) {
            continue;
          }
          let target_table = registry
            .get(target)
            .map(|t| t.table_name.as_str())
            .unwrap_or(target.as_str());
          sql.push_str(&join_table(jt, &ct.table_name, target_table));
        }
        Relation::MorphToOne { join_table: jt } | Relation::MorphToMany { join_table: jt } => {
          if seen.insert(jt.name.clone()) {
            sql.push_str(&morph_join_table(jt, &ct.table_name));
          }
        }
        // Target-side morph relations share the owner's table.
        Relation::MorphOne { .. } | Relation::MorphMany { .. } => {}
        Relation::OneToOne { join_table: None, .. }
        | Relation::OneToMany { join_table: None, .. }
        | Relation::ManyToOne { join_table: None, .. }
        | Relation::ManyToMany { join_table: None, .. } => {}
      }
    }
  }

  sql
}
