//! Store configuration, read from an optional TOML file and `FOLIO_*`
//! environment variables.

use std::path::{Path, PathBuf};

use folio_core::schema::SchemaRegistry;
use serde::Deserialize;

use crate::{Result, reorder::ReorderStrategy};

/// Path value selecting a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

fn default_database() -> PathBuf { PathBuf::from(IN_MEMORY) }

fn default_locale() -> String { "en".to_owned() }

/// Runtime store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// SQLite file path, or `:memory:`.
  #[serde(default = "default_database")]
  pub database:       PathBuf,
  #[serde(default = "default_locale")]
  pub default_locale: String,
  /// Statement shape used for order repair.
  #[serde(default)]
  pub reorder:        ReorderStrategy,
  /// JSON schema definition to load the registry from.
  #[serde(default)]
  pub schema:         Option<PathBuf>,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      database:       default_database(),
      default_locale: default_locale(),
      reorder:        ReorderStrategy::default(),
      schema:         None,
    }
  }
}

impl StoreConfig {
  /// Read `path` (if it exists), then overlay `FOLIO_*` variables.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path.as_ref()).required(false))
      .add_source(config::Environment::with_prefix("FOLIO"))
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  pub fn is_in_memory(&self) -> bool { self.database.as_os_str() == IN_MEMORY }

  /// Load the schema registry named by `schema`, with `default_locale`
  /// applied. `None` when no schema path is configured.
  pub fn load_registry(&self) -> Result<Option<SchemaRegistry>> {
    let Some(path) = &self.schema else {
      return Ok(None);
    };
    let json = std::fs::read_to_string(path)?;
    let mut registry = SchemaRegistry::from_json(&json)?;
    registry.set_default_locale(self.default_locale.clone());
    Ok(Some(registry))
  }
}
