//! Relation references and mutation payloads.
//!
//! Callers may reference related entries as bare ids, as objects carrying an
//! `id`, or through a `{ set, connect, disconnect }` payload. Everything is
//! normalised here before storage code sees it.

use serde_json::{Map, Value};

use crate::{Error, Result};

/// Key carrying the target uid of a polymorphic reference.
pub const TYPE_KEY: &str = "__type";
/// Key carrying extra join-table columns for one edge.
pub const PIVOT_KEY: &str = "__pivot";

// ─── Id normalisation ────────────────────────────────────────────────────────

/// `value.id` when `value` is an object with an `id`, otherwise `value`.
pub fn to_id(value: &Value) -> Value {
  match value {
    Value::Object(obj) => obj.get("id").cloned().unwrap_or_else(|| value.clone()),
    other => other.clone(),
  }
}

/// Normalise nothing, a single reference or an array of references into an
/// array of ids.
pub fn to_ids(value: Option<&Value>) -> Vec<Value> {
  match value {
    None | Some(Value::Null) => Vec::new(),
    Some(Value::Array(items)) => items.iter().map(to_id).collect(),
    Some(single) => vec![to_id(single)],
  }
}

fn id_from_value(attribute: &str, value: &Value) -> Result<i64> {
  let invalid = || Error::InvalidRelation {
    attribute: attribute.to_owned(),
    reason:    format!("{value} is not a valid id"),
  };
  match to_id(value) {
    Value::Number(n) => n.as_i64().ok_or_else(invalid),
    Value::String(s) => s.parse().map_err(|_| invalid()),
    _ => Err(invalid()),
  }
}

// ─── Entries ─────────────────────────────────────────────────────────────────

/// One edge to add or remove.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationEntry {
  pub id:          i64,
  /// Target uid; only meaningful for owner-side morph relations.
  pub target_type: Option<String>,
  /// Extra join-table columns.
  pub pivot:       Map<String, Value>,
}

impl RelationEntry {
  pub fn new(id: i64) -> Self {
    Self { id, target_type: None, pivot: Map::new() }
  }

  pub fn morph(id: i64, target_type: impl Into<String>) -> Self {
    Self { id, target_type: Some(target_type.into()), pivot: Map::new() }
  }

  pub fn with_pivot(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.pivot.insert(key.into(), value.into());
    self
  }

  /// Two entries address the same edge when id and target type agree.
  /// Pivot data is not part of an edge's identity.
  pub fn same_edge(&self, other: &RelationEntry) -> bool {
    self.id == other.id && self.target_type == other.target_type
  }

  fn parse(attribute: &str, value: &Value) -> Result<Self> {
    let id = id_from_value(attribute, value)?;
    let Value::Object(obj) = value else {
      return Ok(Self::new(id));
    };

    let target_type = match obj.get(TYPE_KEY) {
      None | Some(Value::Null) => None,
      Some(Value::String(s)) => Some(s.clone()),
      Some(other) => {
        return Err(Error::InvalidRelation {
          attribute: attribute.to_owned(),
          reason:    format!("{TYPE_KEY} must be a string, got {other}"),
        });
      }
    };

    let pivot = match obj.get(PIVOT_KEY) {
      None | Some(Value::Null) => Map::new(),
      Some(Value::Object(pivot)) => pivot.clone(),
      Some(other) => {
        return Err(Error::InvalidRelation {
          attribute: attribute.to_owned(),
          reason:    format!("{PIVOT_KEY} must be an object, got {other}"),
        });
      }
    };

    Ok(Self { id, target_type, pivot })
  }

  fn parse_many(attribute: &str, value: Option<&Value>) -> Result<Vec<Self>> {
    match value {
      None | Some(Value::Null) => Ok(Vec::new()),
      Some(Value::Array(items)) => {
        items.iter().map(|item| Self::parse(attribute, item)).collect()
      }
      Some(single) => Ok(vec![Self::parse(attribute, single)?]),
    }
  }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// A relation mutation. `set` replaces every edge; `connect` and
/// `disconnect` are deltas. When `set` is present `connect` is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationPayload {
  pub set:        Option<Vec<RelationEntry>>,
  pub connect:    Vec<RelationEntry>,
  pub disconnect: Vec<RelationEntry>,
}

impl RelationPayload {
  pub fn set(entries: Vec<RelationEntry>) -> Self {
    Self { set: Some(entries), ..Self::default() }
  }

  pub fn connect(entries: Vec<RelationEntry>) -> Self {
    Self { connect: entries, ..Self::default() }
  }

  pub fn with_disconnect(mut self, entries: Vec<RelationEntry>) -> Self {
    self.disconnect = entries;
    self
  }

  /// Parse the value a caller supplied for a relation attribute.
  ///
  /// `null`, bare ids, `{id}` objects and arrays of them are shorthand for
  /// `set`. Objects with any of `set`/`connect`/`disconnect` are deltas.
  pub fn parse(attribute: &str, value: &Value) -> Result<Self> {
    match value {
      Value::Object(obj)
        if ["set", "connect", "disconnect"].iter().any(|k| obj.contains_key(*k)) =>
      {
        let set = match obj.get("set") {
          None => None,
          Some(v) => Some(RelationEntry::parse_many(attribute, Some(v))?),
        };
        Ok(Self {
          set,
          connect: RelationEntry::parse_many(attribute, obj.get("connect"))?,
          disconnect: RelationEntry::parse_many(attribute, obj.get("disconnect"))?,
        })
      }
      other => Ok(Self::set(RelationEntry::parse_many(attribute, Some(other))?)),
    }
  }

  /// Whether this payload replaces every existing edge.
  pub fn is_full_replace(&self) -> bool { self.set.is_some() }

  /// Edges to add: `set` when present, otherwise `connect`.
  pub fn to_add(&self) -> &[RelationEntry] {
    self.set.as_deref().unwrap_or(&self.connect)
  }

  /// `disconnect` minus every edge that is also being added, so an edge that
  /// is both disconnected and connected in one call survives untouched.
  pub fn to_remove(&self) -> Vec<RelationEntry> {
    let adding = self.to_add();
    self
      .disconnect
      .iter()
      .filter(|entry| !adding.iter().any(|a| a.same_edge(entry)))
      .cloned()
      .collect()
  }

  pub fn is_empty(&self) -> bool {
    self.set.is_none() && self.connect.is_empty() && self.disconnect.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn to_id_unwraps_objects() {
    assert_eq!(to_id(&json!({ "id": 4, "name": "x" })), json!(4));
    assert_eq!(to_id(&json!(7)), json!(7));
    assert_eq!(to_id(&json!({ "name": "x" })), json!({ "name": "x" }));
  }

  #[test]
  fn to_ids_normalises_shapes() {
    assert!(to_ids(None).is_empty());
    assert!(to_ids(Some(&Value::Null)).is_empty());
    assert_eq!(to_ids(Some(&json!(3))), vec![json!(3)]);
    assert_eq!(
      to_ids(Some(&json!([1, { "id": 2 }, "3"]))),
      vec![json!(1), json!(2), json!("3")]
    );
  }

  #[test]
  fn shorthand_values_parse_as_set() {
    let payload = RelationPayload::parse("tags", &json!([1, { "id": 2 }])).unwrap();
    assert!(payload.is_full_replace());
    assert_eq!(payload.to_add().len(), 2);

    let cleared = RelationPayload::parse("tags", &Value::Null).unwrap();
    assert_eq!(cleared.set, Some(Vec::new()));
  }

  #[test]
  fn delta_payload_parses_pivot_and_type() {
    let payload = RelationPayload::parse(
      "related",
      &json!({
        "connect": [{ "id": 5, "__type": "api::page.page", "__pivot": { "field": "cover" } }],
        "disconnect": ["9"]
      }),
    )
    .unwrap();

    assert!(!payload.is_full_replace());
    let entry = &payload.connect[0];
    assert_eq!(entry.id, 5);
    assert_eq!(entry.target_type.as_deref(), Some("api::page.page"));
    assert_eq!(entry.pivot.get("field"), Some(&json!("cover")));
    assert_eq!(payload.disconnect, vec![RelationEntry::new(9)]);
  }

  #[test]
  fn to_remove_skips_reconnected_edges() {
    let payload = RelationPayload::connect(vec![
      RelationEntry::new(1),
      RelationEntry::new(2).with_pivot("field", "x"),
    ])
    .with_disconnect(vec![RelationEntry::new(2), RelationEntry::new(3)]);

    assert_eq!(payload.to_remove(), vec![RelationEntry::new(3)]);
  }

  #[test]
  fn invalid_ids_are_rejected() {
    let err = RelationPayload::parse("tags", &json!(["abc"])).unwrap_err();
    assert!(matches!(err, Error::InvalidRelation { attribute, .. } if attribute == "tags"));
  }
}
