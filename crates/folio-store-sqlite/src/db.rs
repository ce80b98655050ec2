//! [`Database`]: the connection, the schema registry and transactions.

use std::{future::Future, path::Path, sync::Arc};

use folio_core::schema::SchemaRegistry;
use tracing::info;

use crate::{
  Result,
  config::StoreConfig,
  reorder::{ReorderStrategy, WindowedReorder},
  schema::{PRAGMAS, ddl},
  transaction::Transaction,
};

struct Inner {
  conn:     tokio_rusqlite::Connection,
  /// Held by the active root transaction.
  root:     Arc<tokio::sync::Mutex<()>>,
  registry: SchemaRegistry,
  reorder:  ReorderStrategy,
}

/// A folio database backed by a single SQLite connection.
///
/// Cloning is cheap; every clone shares the connection.
#[derive(Clone)]
pub struct Database {
  inner: Arc<Inner>,
}

impl Database {
  /// Open (or create) a database at `path` and create missing tables.
  pub async fn open(path: impl AsRef<Path>, registry: SchemaRegistry) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, registry, ReorderStrategy::default()).await
  }

  /// Open an in-memory database; useful for testing.
  pub async fn open_in_memory(registry: SchemaRegistry) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, registry, ReorderStrategy::default()).await
  }

  /// Open the database `config` names. `config.default_locale` replaces the
  /// registry's default locale.
  pub async fn connect(config: &StoreConfig, mut registry: SchemaRegistry) -> Result<Self> {
    registry.set_default_locale(config.default_locale.clone());
    let conn = if config.is_in_memory() {
      tokio_rusqlite::Connection::open_in_memory().await?
    } else {
      tokio_rusqlite::Connection::open(&config.database).await?
    };
    Self::init(conn, registry, config.reorder).await
  }

  async fn init(
    conn: tokio_rusqlite::Connection,
    registry: SchemaRegistry,
    reorder: ReorderStrategy,
  ) -> Result<Self> {
    let schema = ddl(&registry);
    conn
      .call(move |conn| {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(&schema)?;
        Ok(())
      })
      .await?;
    info!(
      content_types = registry.content_types().count(),
      reorder = reorder.reorder().name(),
      "database ready"
    );

    Ok(Self {
      inner: Arc::new(Inner {
        conn,
        root: Arc::new(tokio::sync::Mutex::new(())),
        registry,
        reorder,
      }),
    })
  }

  pub fn registry(&self) -> &SchemaRegistry { &self.inner.registry }

  pub fn reorder(&self) -> &'static dyn WindowedReorder { self.inner.reorder.reorder() }

  /// Start a transaction with an explicit handle. Inside a running
  /// transaction this opens a savepoint of it; otherwise it waits for the
  /// root lock.
  pub async fn begin(&self) -> Result<Transaction> {
    if let Some(current) = Transaction::current() {
      return current.begin().await;
    }
    let guard = self.inner.root.clone().lock_owned().await;
    Transaction::begin_root(self.inner.conn.clone(), guard).await
  }

  /// Run `f` in a transaction: committed when `f` returns `Ok`, rolled back
  /// when it returns `Err`. Nests as a savepoint when called inside another
  /// transaction on the same task.
  pub async fn transaction<T, F, Fut>(&self, f: F) -> Result<T>
  where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let trx = self.begin().await?;
    trx.run(f).await
  }
}
