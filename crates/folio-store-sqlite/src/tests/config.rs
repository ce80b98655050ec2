use std::path::PathBuf;

use folio_core::document::Params;
use serde_json::json;
use uuid::Uuid;

use super::{PRODUCT, SCHEMA, data};
use crate::{Database, Documents, ReorderStrategy, StoreConfig};

/// A scratch file in the temp directory, removed on drop.
struct Scratch(PathBuf);

impl Scratch {
  fn new(extension: &str, contents: &str) -> Self {
    let path = std::env::temp_dir().join(format!("folio-{}.{extension}", Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    Self(path)
  }
}

impl Drop for Scratch {
  fn drop(&mut self) { let _ = std::fs::remove_file(&self.0); }
}

#[test]
fn missing_file_yields_defaults() {
  let config = StoreConfig::load(std::env::temp_dir().join("folio-does-not-exist.toml")).unwrap();
  assert!(config.is_in_memory());
  assert_eq!(config.default_locale, "en");
  assert_eq!(config.reorder, ReorderStrategy::UpdateFrom);
  assert!(config.schema.is_none());
  assert!(config.load_registry().unwrap().is_none());
}

#[test]
fn toml_file_overrides_defaults() {
  let schema = Scratch::new("json", SCHEMA);
  let file = Scratch::new(
    "toml",
    &format!(
      "default_locale = \"fr\"\nreorder = \"correlated\"\nschema = {:?}\n",
      schema.0.display().to_string()
    ),
  );

  let config = StoreConfig::load(&file.0).unwrap();
  assert_eq!(config.default_locale, "fr");
  assert_eq!(config.reorder, ReorderStrategy::Correlated);
  assert!(config.is_in_memory());

  let registry = config.load_registry().unwrap().unwrap();
  assert_eq!(registry.default_locale(), "fr");
  assert!(registry.get(PRODUCT).is_ok());
}

#[tokio::test]
async fn connect_applies_the_configured_locale() {
  let config = StoreConfig { default_locale: "fr".into(), ..StoreConfig::default() };
  let db = Database::connect(&config, super::registry()).await.unwrap();
  assert_eq!(db.registry().default_locale(), "fr");
  assert_eq!(db.reorder().name(), "update_from");

  let docs = Documents::new(db);
  let doc = docs
    .get(PRODUCT)
    .unwrap()
    .create(Params::new().data(data(json!({ "name": "lampe" }))))
    .await
    .unwrap();
  assert_eq!(doc.locale.as_deref(), Some("fr"));
}

#[tokio::test]
async fn file_databases_persist_across_connections() {
  let path = std::env::temp_dir().join(format!("folio-{}.db", Uuid::new_v4()));
  let config = StoreConfig { database: path.clone(), ..StoreConfig::default() };

  let docs = Documents::new(Database::connect(&config, super::registry()).await.unwrap());
  let doc = docs
    .get(PRODUCT)
    .unwrap()
    .create(Params::new().data(data(json!({ "name": "kept" }))))
    .await
    .unwrap();
  drop(docs);

  let db = Database::open(&path, super::registry()).await.unwrap();
  let found = Documents::new(db)
    .get(PRODUCT)
    .unwrap()
    .find_one(&doc.document_id, Params::new())
    .await
    .unwrap();
  assert_eq!(found.map(|d| d.id), Some(doc.id));

  for suffix in ["", "-wal", "-shm"] {
    let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
  }
}
