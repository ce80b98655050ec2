//! Error type for `folio-store-sqlite`.

use folio_core::middleware::Action;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] folio_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("config error: {0}")]
  Config(#[from] config::ConfigError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// The transaction scope was already committed or rolled back.
  #[error("transaction is already closed")]
  TransactionClosed,

  /// A query was executed without `.transacting(..)`.
  #[error("query on {0:?} has no transaction")]
  MissingTransaction(String),

  /// The middleware chain returned a result of the wrong shape.
  #[error("unexpected outcome for {0}")]
  UnexpectedOutcome(Action),

  #[error("document not found: {0}")]
  DocumentNotFound(String),

  #[error("unsupported: {0}")]
  Unsupported(String),

  /// Raised by callers to abort the enclosing transaction.
  #[error("aborted: {0}")]
  Aborted(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
