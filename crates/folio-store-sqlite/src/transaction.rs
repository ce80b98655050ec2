//! Transactions and savepoint nesting.
//!
//! A root [`Transaction`] is a `BEGIN IMMEDIATE` on the shared connection and
//! holds the database's root lock until it resolves, so root transactions are
//! serialised. Nested scopes are savepoints on the same connection. Each scope
//! fires its own commit/rollback hooks when it resolves, which makes hooks run
//! innermost first.
//!
//! The transaction currently running on a task is tracked in a task-local, so
//! [`crate::Database::transaction`] called from inside another transaction
//! (a middleware calling a repository, say) nests instead of deadlocking.
//! Spawned tasks do not inherit it.

use std::{
  future::Future,
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
  },
};

use rusqlite::types::Value as SqlValue;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::{Error, Result};

tokio::task_local! {
  static CURRENT: Transaction;
}

/// A callback run once when a scope resolves.
pub type Hook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
  Active,
  Committed,
  RolledBack,
}

struct ScopeState {
  state:       TransactionState,
  on_commit:   Vec<Hook>,
  on_rollback: Vec<Hook>,
  /// Root lock; only held by depth-0 scopes.
  guard:       Option<OwnedMutexGuard<()>>,
}

struct Scope {
  conn:       tokio_rusqlite::Connection,
  depth:      usize,
  savepoint:  Option<String>,
  savepoints: Arc<AtomicUsize>,
  inner:      Mutex<ScopeState>,
}

/// Handle on one transaction scope. Clones share the scope.
#[derive(Clone)]
pub struct Transaction {
  scope: Arc<Scope>,
}

impl std::fmt::Debug for Transaction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Transaction")
      .field("depth", &self.scope.depth)
      .field("savepoint", &self.scope.savepoint)
      .field("state", &self.state())
      .finish()
  }
}

impl Transaction {
  /// Open a root transaction. `guard` is the database's root lock.
  pub(crate) async fn begin_root(
    conn: tokio_rusqlite::Connection,
    guard: OwnedMutexGuard<()>,
  ) -> Result<Self> {
    let recovered = conn
      .call(|conn| {
        // A root handle dropped without commit or rollback leaves its
        // transaction open on the shared connection.
        let abandoned = !conn.is_autocommit();
        if abandoned {
          conn.execute_batch("ROLLBACK")?;
        }
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(abandoned)
      })
      .await?;
    if recovered {
      warn!("rolled back an abandoned transaction");
    }
    debug!(depth = 0, "transaction started");

    Ok(Self {
      scope: Arc::new(Scope {
        conn,
        depth: 0,
        savepoint: None,
        savepoints: Arc::new(AtomicUsize::new(0)),
        inner: Mutex::new(ScopeState {
          state:       TransactionState::Active,
          on_commit:   Vec::new(),
          on_rollback: Vec::new(),
          guard:       Some(guard),
        }),
      }),
    })
  }

  /// Open a nested scope (a savepoint) inside this one.
  pub async fn begin(&self) -> Result<Transaction> {
    self.ensure_active()?;
    let n = self.scope.savepoints.fetch_add(1, Ordering::Relaxed);
    let name = format!("folio_sp_{n}");
    let statement = format!("SAVEPOINT {name}");
    self
      .scope
      .conn
      .call(move |conn| {
        conn.execute_batch(&statement)?;
        Ok(())
      })
      .await?;
    let depth = self.scope.depth + 1;
    debug!(depth, savepoint = %name, "transaction started");

    Ok(Self {
      scope: Arc::new(Scope {
        conn: self.scope.conn.clone(),
        depth,
        savepoint: Some(name),
        savepoints: self.scope.savepoints.clone(),
        inner: Mutex::new(ScopeState {
          state:       TransactionState::Active,
          on_commit:   Vec::new(),
          on_rollback: Vec::new(),
          guard:       None,
        }),
      }),
    })
  }

  /// Run `f` in a nested scope: released when `f` returns `Ok`, rolled back
  /// when it returns `Err`. The error is returned unchanged.
  pub async fn transaction<T, F, Fut>(&self, f: F) -> Result<T>
  where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let trx = self.begin().await?;
    trx.run(f).await
  }

  /// Drive `f` with this scope as the task's current transaction, then
  /// resolve the scope according to its result.
  pub(crate) async fn run<T, F, Fut>(self, f: F) -> Result<T>
  where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let result = CURRENT.scope(self.clone(), f(self.clone())).await;
    if !self.is_active() {
      // The closure resolved the scope itself.
      return result;
    }
    match result {
      Ok(value) => {
        self.commit().await?;
        Ok(value)
      }
      Err(e) => {
        if let Err(rollback_err) = self.rollback().await {
          warn!(error = %rollback_err, "rollback after failure did not complete");
        }
        Err(e)
      }
    }
  }

  /// The transaction the calling task is running inside, if any.
  pub fn current() -> Option<Transaction> {
    CURRENT.try_with(Transaction::clone).ok().filter(Transaction::is_active)
  }

  pub async fn commit(&self) -> Result<()> {
    self.ensure_active()?;
    let statement = match &self.scope.savepoint {
      Some(name) => format!("RELEASE SAVEPOINT {name}"),
      None => "COMMIT".to_owned(),
    };
    let outcome = self
      .scope
      .conn
      .call(move |conn| {
        conn.execute_batch(&statement)?;
        Ok(())
      })
      .await;

    match outcome {
      Ok(()) => {
        self.resolve(TransactionState::Committed);
        Ok(())
      }
      Err(e) => {
        // A failed COMMIT leaves nothing worth keeping.
        if let Err(rollback_err) = self.undo().await {
          warn!(error = %rollback_err, "rollback after failed commit did not complete");
        }
        self.resolve(TransactionState::RolledBack);
        Err(e.into())
      }
    }
  }

  pub async fn rollback(&self) -> Result<()> {
    self.ensure_active()?;
    let outcome = self.undo().await;
    self.resolve(TransactionState::RolledBack);
    outcome
  }

  /// The scope handle to pass to queries.
  pub fn get(&self) -> Transaction { self.clone() }

  /// Run `hook` after this scope commits.
  pub fn on_commit(&self, hook: impl FnOnce() + Send + 'static) {
    self.lock().on_commit.push(Box::new(hook));
  }

  /// Run `hook` after this scope rolls back.
  pub fn on_rollback(&self, hook: impl FnOnce() + Send + 'static) {
    self.lock().on_rollback.push(Box::new(hook));
  }

  pub fn state(&self) -> TransactionState { self.lock().state }

  pub fn is_active(&self) -> bool { self.state() == TransactionState::Active }

  /// 0 for a root transaction.
  pub fn depth(&self) -> usize { self.scope.depth }

  /// Run a closure against the connection inside this scope.
  pub async fn call<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
    R: Send + 'static,
  {
    self.ensure_active()?;
    Ok(
      self
        .scope
        .conn
        .call(move |conn| f(conn).map_err(tokio_rusqlite::Error::from))
        .await?,
    )
  }

  /// Execute one raw statement with positional bindings; returns the number
  /// of rows changed.
  pub async fn raw(&self, sql: impl Into<String>, bindings: Vec<SqlValue>) -> Result<usize> {
    let sql = sql.into();
    debug!(sql = %sql, bindings = bindings.len(), "raw statement");
    self
      .call(move |conn| conn.execute(&sql, rusqlite::params_from_iter(bindings)))
      .await
  }

  // ── internals ─────────────────────────────────────────────────────────────

  fn lock(&self) -> std::sync::MutexGuard<'_, ScopeState> {
    self.scope.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn ensure_active(&self) -> Result<()> {
    if self.is_active() { Ok(()) } else { Err(Error::TransactionClosed) }
  }

  async fn undo(&self) -> Result<()> {
    let statement = match &self.scope.savepoint {
      Some(name) => format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"),
      None => "ROLLBACK".to_owned(),
    };
    self
      .scope
      .conn
      .call(move |conn| {
        // SQLite may already have rolled back on its own after some errors.
        if !conn.is_autocommit() {
          conn.execute_batch(&statement)?;
        }
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Mark the scope closed, release the root lock and fire the hooks that
  /// match `state`.
  fn resolve(&self, state: TransactionState) {
    let (hooks, guard) = {
      let mut inner = self.lock();
      inner.state = state;
      let hooks = match state {
        TransactionState::Committed => std::mem::take(&mut inner.on_commit),
        _ => std::mem::take(&mut inner.on_rollback),
      };
      inner.on_commit.clear();
      inner.on_rollback.clear();
      (hooks, inner.guard.take())
    };
    drop(guard);

    if self.scope.depth == 0 {
      info!(?state, "transaction resolved");
    } else {
      debug!(depth = self.scope.depth, ?state, "savepoint resolved");
    }
    for hook in hooks {
      hook();
    }
  }
}
