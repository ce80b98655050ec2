//! Core types for the folio document store.
//!
//! This crate is deliberately free of database dependencies. It defines the
//! schema registry, the storage filter language, relation payload handling,
//! and the middleware pipeline that every document action runs through.
//! Storage backends (e.g. `folio-store-sqlite`) depend on it.

// Native `async fn` in traits.
#![allow(async_fn_in_trait)]

pub mod document;
pub mod error;
pub mod filter;
pub mod middleware;
pub mod middlewares;
pub mod relation;
pub mod schema;
pub mod store;

pub use error::{Error, Result};
