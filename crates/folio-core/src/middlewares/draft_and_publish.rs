//! Draft-and-publish status handling.
//!
//! The requested `status` is turned into either a lookup condition on
//! `publishedAt` or a `publishedAt` value to persist. Storage never sees the
//! status itself.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::{
  document::{Params, Status, fields},
  filter::Condition,
};

/// Force `status = draft`.
pub fn set_status_to_draft(params: &mut Params) { params.status = Some(Status::Draft); }

/// `status = draft` unless `published` was requested.
pub fn default_to_draft(params: &mut Params) {
  if params.status != Some(Status::Published) {
    params.status = Some(Status::Draft);
  }
}

/// Translate `status` into a `publishedAt` lookup condition.
pub fn status_to_lookup(params: &mut Params) {
  let condition = match params.status {
    Some(Status::Published) => Condition::NotNull,
    Some(Status::Draft) => Condition::Null,
    None => return,
  };
  params.lookup.insert(fields::PUBLISHED_AT.to_owned(), condition);
}

/// Translate `status` into the `publishedAt` value to persist.
///
/// Any `publishedAt` supplied in `data` is discarded first.
pub fn status_to_data(params: &mut Params, now: DateTime<Utc>) {
  if let Some(data) = params.data.as_mut() {
    data.remove(fields::PUBLISHED_AT);
  }

  let published_at = match params.status {
    Some(Status::Published) => Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    Some(Status::Draft) => Value::Null,
    None => return,
  };
  params.data_mut().insert(fields::PUBLISHED_AT.to_owned(), published_at);
}
