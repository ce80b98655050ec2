//! Integration tests against an in-memory database.

mod config;
mod morph;

use std::collections::BTreeMap;

use folio_core::{
  document::{Document, Params, SortOrder},
  filter::Filter,
  schema::SchemaRegistry,
};
use serde_json::{Map, Value};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{Database, Documents, QueryBuilder, ReorderStrategy, Row, StoreConfig, encode::as_i64};

pub const PRODUCT: &str = "api::product.product";
pub const CATEGORY: &str = "api::category.category";
pub const TAG: &str = "api::tag.tag";
pub const FILE: &str = "plugin::upload.file";

pub const SCHEMA: &str = r#"{
  "contentTypes": [
    {
      "uid": "api::category.category",
      "tableName": "categories",
      "options": { "draftAndPublish": true },
      "attributes": {
        "name": { "type": "string" },
        "icon": {
          "type": "relation",
          "relation": "morphOne",
          "target": "plugin::upload.file",
          "morphBy": "related"
        }
      }
    },
    {
      "uid": "api::tag.tag",
      "tableName": "tags",
      "attributes": { "label": { "type": "string" } }
    },
    {
      "uid": "plugin::upload.file",
      "tableName": "files",
      "attributes": {
        "name": { "type": "string" },
        "related": {
          "type": "relation",
          "relation": "morphToMany",
          "joinTable": {
            "name": "files_related_mph",
            "joinColumn": "file_id",
            "morphColumn": { "idColumn": "related_id", "typeColumn": "related_type" },
            "pivotColumns": ["caption"]
          }
        }
      }
    },
    {
      "uid": "api::product.product",
      "tableName": "products",
      "options": { "draftAndPublish": true, "localized": true },
      "attributes": {
        "name": { "type": "string" },
        "price": { "type": "integer" },
        "category": {
          "type": "relation",
          "relation": "oneToOne",
          "target": "api::category.category",
          "joinTable": {
            "name": "products_category_lnk",
            "joinColumn": "product_id",
            "inverseJoinColumn": "category_id"
          }
        },
        "categories": {
          "type": "relation",
          "relation": "oneToMany",
          "target": "api::category.category",
          "joinTable": {
            "name": "products_categories_lnk",
            "joinColumn": "product_id",
            "inverseJoinColumn": "category_id",
            "orderColumn": "category_ord"
          }
        },
        "tags": {
          "type": "relation",
          "relation": "manyToMany",
          "target": "api::tag.tag",
          "joinTable": {
            "name": "products_tags_lnk",
            "joinColumn": "product_id",
            "inverseJoinColumn": "tag_id",
            "orderColumn": "tag_ord"
          }
        },
        "cover": {
          "type": "relation",
          "relation": "morphOne",
          "target": "plugin::upload.file",
          "morphBy": "related"
        },
        "gallery": {
          "type": "relation",
          "relation": "morphMany",
          "target": "plugin::upload.file",
          "morphBy": "related"
        },
        "compo": { "type": "component", "component": "default.compo" },
        "compos": { "type": "component", "component": "default.compo", "repeatable": true },
        "dz": { "type": "dynamiczone", "components": ["default.compo"] }
      }
    }
  ],
  "components": [
    {
      "uid": "default.compo",
      "attributes": {
        "title": { "type": "string" },
        "category": { "type": "relation", "relation": "oneToOne", "target": "api::category.category" },
        "categories": { "type": "relation", "relation": "oneToMany", "target": "api::category.category" }
      }
    }
  ]
}"#;

pub fn registry() -> SchemaRegistry { SchemaRegistry::from_json(SCHEMA).expect("fixture schema") }

/// Install a test subscriber once per binary; `RUST_LOG` overrides the
/// default level.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_test_writer()
    .try_init();
}

pub async fn database_with(reorder: ReorderStrategy) -> Database {
  init_tracing();
  let config = StoreConfig { reorder, ..StoreConfig::default() };
  Database::connect(&config, registry()).await.expect("in-memory database")
}

pub async fn database() -> Database { database_with(ReorderStrategy::default()).await }

pub async fn documents() -> Documents { Documents::new(database().await) }

pub fn data(value: Value) -> Map<String, Value> {
  value.as_object().cloned().expect("object literal")
}

/// Create an entry of `uid` and return it.
pub async fn create(docs: &Documents, uid: &str, value: Value) -> Document {
  docs
    .get(uid)
    .unwrap()
    .create(Params::new().data(data(value)))
    .await
    .unwrap()
}

/// Every row of `table` matching `filter`, in id order.
pub async fn rows(db: &Database, table: &str, filter: Option<Filter>) -> Vec<Row> {
  db.transaction(|trx| async move {
    let mut query = QueryBuilder::new(table).order_by("id", SortOrder::Asc);
    if let Some(filter) = filter {
      query = query.where_(filter);
    }
    Ok(query.transacting(&trx).execute().await?.rows)
  })
  .await
  .unwrap()
}

pub fn int(row: &Row, column: &str) -> i64 {
  as_i64(row.get(column)).unwrap_or_else(|| panic!("{column} missing from {row:?}"))
}

/// Order values of each partition, in order.
pub fn partitions(rows: &[Row], partition: &str, order: &str) -> BTreeMap<i64, Vec<i64>> {
  let mut out: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
  for row in rows {
    out.entry(int(row, partition)).or_default().push(int(row, order));
  }
  for orders in out.values_mut() {
    orders.sort_unstable();
  }
  out
}

/// Every partition numbered 1..N.
pub fn assert_dense(rows: &[Row], partition: &str, order: &str) {
  for (key, orders) in partitions(rows, partition, order) {
    let expected: Vec<i64> = (1..=orders.len() as i64).collect();
    assert_eq!(orders, expected, "partition {key} is not dense");
  }
}

#[test]
fn fixture_schema_parses() {
  let registry = registry();
  assert_eq!(registry.content_types().count(), 4);
  assert_eq!(registry.morph_join_table(PRODUCT, "gallery").unwrap().name, "files_related_mph");
}
