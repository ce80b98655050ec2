//! Error types for `folio-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown content type: {0}")]
  UnknownContentType(String),

  #[error("unknown component: {0}")]
  UnknownComponent(String),

  #[error("unknown attribute {attribute:?} on {uid}")]
  UnknownAttribute { uid: String, attribute: String },

  #[error("attribute {attribute:?} on {uid} is not a relation")]
  NotARelation { uid: String, attribute: String },

  #[error("relation {attribute:?} on {uid} has no join table")]
  MissingJoinTable { uid: String, attribute: String },

  #[error("invalid relation payload for {attribute:?}: {reason}")]
  InvalidRelation { attribute: String, reason: String },

  #[error("invalid status: {0:?}")]
  InvalidStatus(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
