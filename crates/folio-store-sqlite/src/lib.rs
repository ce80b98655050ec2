//! SQLite backend for the folio document store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every query runs inside a
//! [`Transaction`]; document repositories open one per action.

mod components;
mod draft_relations;
mod encode;
mod relations;
mod schema;
mod service;

pub mod config;
pub mod db;
pub mod error;
pub mod morph;
pub mod morph_many;
pub mod query;
pub mod reorder;
pub mod repository;
pub mod transaction;

pub use config::StoreConfig;
pub use db::Database;
pub use error::{Error, Result};
pub use query::{QueryBuilder, QueryOutput, Row};
pub use reorder::{ReorderStrategy, WindowedReorder};
pub use repository::{DocumentRepository, Documents};
pub use service::SqliteDocumentService;
pub use transaction::{Transaction, TransactionState};

#[cfg(test)]
mod tests;
