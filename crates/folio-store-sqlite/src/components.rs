//! Components and dynamic zones.
//!
//! Component values are stored inline in the owning row's `data`: a single
//! component is an object, a repeatable component an array of objects, and a
//! dynamic zone an array of objects tagged with `__component`. Relations
//! inside components are stored as ordered id arrays.

use std::collections::BTreeMap;

use folio_core::{
  relation::{RelationPayload, to_ids},
  schema::{Attribute, SchemaRegistry},
};
use serde_json::{Map, Value};

use crate::{Error, Result, encode::as_i64};

/// Key naming the component of a dynamic zone entry.
pub const COMPONENT_KEY: &str = "__component";

type Attributes = BTreeMap<String, Attribute>;

// ─── Normalisation ───────────────────────────────────────────────────────────

/// Rewrite every component and dynamic-zone value in `data` into its stored
/// form.
pub fn normalize_components(
  registry: &SchemaRegistry,
  attributes: &Attributes,
  data: &mut Map<String, Value>,
) -> Result<()> {
  for (name, value) in data.iter_mut() {
    match attributes.get(name) {
      Some(Attribute::Component { component, repeatable }) => {
        normalize_component(registry, component, *repeatable, value)?;
      }
      Some(Attribute::DynamicZone { components }) => {
        normalize_dynamic_zone(registry, components, value)?;
      }
      _ => {}
    }
  }
  Ok(())
}

fn normalize_component(
  registry: &SchemaRegistry,
  uid: &str,
  repeatable: bool,
  value: &mut Value,
) -> Result<()> {
  let attributes = &registry.component(uid)?.attributes;
  match value {
    Value::Null => Ok(()),
    Value::Array(items) if repeatable => items
      .iter_mut()
      .try_for_each(|item| normalize_fields(registry, attributes, item)),
    single if !repeatable => normalize_fields(registry, attributes, single),
    other => Err(Error::Unsupported(format!(
      "component {uid} expects {}, got {other}",
      if repeatable { "an array" } else { "an object" }
    ))),
  }
}

fn normalize_dynamic_zone(
  registry: &SchemaRegistry,
  allowed: &[String],
  value: &mut Value,
) -> Result<()> {
  let Value::Array(items) = value else {
    return match value {
      Value::Null => Ok(()),
      other => Err(Error::Unsupported(format!("dynamic zone expects an array, got {other}"))),
    };
  };
  for item in items {
    let uid = dynamic_zone_component(item)?;
    if !allowed.iter().any(|a| a == uid) {
      return Err(folio_core::Error::UnknownComponent(uid.to_owned()).into());
    }
    let attributes = &registry.component(uid)?.attributes;
    normalize_fields(registry, attributes, item)?;
  }
  Ok(())
}

fn dynamic_zone_component(item: &Value) -> Result<&str> {
  item
    .get(COMPONENT_KEY)
    .and_then(Value::as_str)
    .ok_or_else(|| Error::Unsupported(format!("dynamic zone entry without {COMPONENT_KEY}")))
}

fn normalize_fields(
  registry: &SchemaRegistry,
  attributes: &Attributes,
  value: &mut Value,
) -> Result<()> {
  let Value::Object(fields) = value else {
    return Err(Error::Unsupported(format!("component value must be an object, got {value}")));
  };
  for (name, field) in fields.iter_mut() {
    match attributes.get(name) {
      Some(Attribute::Relation(relation)) => {
        let kind = relation.kind();
        if kind.is_morph() {
          return Err(Error::Unsupported(format!(
            "polymorphic relation {name:?} inside a component"
          )));
        }
        let payload = RelationPayload::parse(name, field)?;
        let ids: Vec<Value> = payload.to_add().iter().map(|e| Value::from(e.id)).collect();
        *field = if kind.is_single() {
          ids.last().cloned().unwrap_or(Value::Null)
        } else {
          Value::Array(ids)
        };
      }
      Some(Attribute::Component { component, repeatable }) => {
        normalize_component(registry, component, *repeatable, field)?;
      }
      Some(Attribute::DynamicZone { components }) => {
        normalize_dynamic_zone(registry, components, field)?;
      }
      _ => {}
    }
  }
  Ok(())
}

// ─── Traversal ───────────────────────────────────────────────────────────────

/// Every `(target uid, target id)` relation edge stored inside the
/// components and dynamic zones of `data`, one per edge.
pub fn component_relation_targets(
  registry: &SchemaRegistry,
  attributes: &Attributes,
  data: &Map<String, Value>,
) -> Result<Vec<(String, i64)>> {
  let mut out = Vec::new();
  for (name, value) in data {
    collect_attribute(registry, attributes.get(name), value, false, &mut out)?;
  }
  Ok(out)
}

fn collect_attribute(
  registry: &SchemaRegistry,
  attribute: Option<&Attribute>,
  value: &Value,
  inside_component: bool,
  out: &mut Vec<(String, i64)>,
) -> Result<()> {
  match attribute {
    Some(Attribute::Relation(relation)) if inside_component => {
      if let Some(target) = relation.target() {
        out.extend(
          to_ids(Some(value))
            .iter()
            .filter_map(|id| as_i64(Some(id)))
            .map(|id| (target.to_owned(), id)),
        );
      }
    }
    Some(Attribute::Component { component, .. }) => {
      let attributes = &registry.component(component)?.attributes;
      for item in component_items(value) {
        collect_fields(registry, attributes, item, out)?;
      }
    }
    Some(Attribute::DynamicZone { .. }) => {
      for item in component_items(value) {
        let attributes = &registry.component(dynamic_zone_component(item)?)?.attributes;
        collect_fields(registry, attributes, item, out)?;
      }
    }
    _ => {}
  }
  Ok(())
}

fn collect_fields(
  registry: &SchemaRegistry,
  attributes: &Attributes,
  item: &Value,
  out: &mut Vec<(String, i64)>,
) -> Result<()> {
  if let Value::Object(fields) = item {
    for (name, value) in fields {
      collect_attribute(registry, attributes.get(name), value, true, out)?;
    }
  }
  Ok(())
}

fn component_items(value: &Value) -> Vec<&Value> {
  match value {
    Value::Null => Vec::new(),
    Value::Array(items) => items.iter().collect(),
    single => vec![single],
  }
}

fn component_items_mut(value: &mut Value) -> Vec<&mut Value> {
  match value {
    Value::Null => Vec::new(),
    Value::Array(items) => items.iter_mut().collect(),
    single => vec![single],
  }
}

// ─── Rewriting ───────────────────────────────────────────────────────────────

/// Whether any component reachable from `attributes` holds a relation to
/// `target`.
pub fn references_target(registry: &SchemaRegistry, attributes: &Attributes, target: &str) -> bool {
  attributes.values().any(|attribute| match attribute {
    Attribute::Component { component, .. } => component_references(registry, component, target),
    Attribute::DynamicZone { components } => {
      components.iter().any(|c| component_references(registry, c, target))
    }
    _ => false,
  })
}

fn component_references(registry: &SchemaRegistry, uid: &str, target: &str) -> bool {
  let Ok(component) = registry.component(uid) else {
    return false;
  };
  component.attributes.values().any(|attribute| match attribute {
    Attribute::Relation(relation) => relation.target() == Some(target),
    _ => false,
  }) || references_target(registry, &component.attributes, target)
}

/// Rewrite references to row `from` of `target` inside the components and
/// dynamic zones of `data`. With `to` they point at the new row; without it
/// they are dropped, and single-valued relations become null. Returns whether
/// anything changed.
pub fn replace_component_references(
  registry: &SchemaRegistry,
  attributes: &Attributes,
  data: &mut Map<String, Value>,
  target: &str,
  from: i64,
  to: Option<i64>,
) -> Result<bool> {
  let repoint = Repoint { target, from, to };
  let mut changed = false;
  for (name, value) in data.iter_mut() {
    changed |= repoint.attribute(registry, attributes.get(name), value, false)?;
  }
  Ok(changed)
}

/// One reference rewrite: row `from` of `target` becomes `to`.
struct Repoint<'a> {
  target: &'a str,
  from:   i64,
  to:     Option<i64>,
}

impl Repoint<'_> {
  fn attribute(
    &self,
    registry: &SchemaRegistry,
    attribute: Option<&Attribute>,
    value: &mut Value,
    inside_component: bool,
  ) -> Result<bool> {
    let mut changed = false;
    match attribute {
      Some(Attribute::Relation(relation)) if inside_component => {
        if relation.target() == Some(self.target) {
          changed = self.ids(value);
        }
      }
      Some(Attribute::Component { component, .. }) => {
        let attributes = &registry.component(component)?.attributes;
        for item in component_items_mut(value) {
          changed |= self.fields(registry, attributes, item)?;
        }
      }
      Some(Attribute::DynamicZone { .. }) => {
        for item in component_items_mut(value) {
          let attributes = &registry.component(dynamic_zone_component(item)?)?.attributes;
          changed |= self.fields(registry, attributes, item)?;
        }
      }
      _ => {}
    }
    Ok(changed)
  }

  fn fields(&self, registry: &SchemaRegistry, attributes: &Attributes, item: &mut Value) -> Result<bool> {
    let mut changed = false;
    if let Value::Object(fields) = item {
      for (name, value) in fields.iter_mut() {
        changed |= self.attribute(registry, attributes.get(name), value, true)?;
      }
    }
    Ok(changed)
  }

  fn ids(&self, value: &mut Value) -> bool {
    let from = Some(self.from);
    match value {
      Value::Array(ids) => match self.to {
        Some(to) => {
          let mut changed = false;
          for id in ids.iter_mut().filter(|id| as_i64(Some(&**id)) == from) {
            *id = Value::from(to);
            changed = true;
          }
          changed
        }
        None => {
          let before = ids.len();
          ids.retain(|id| as_i64(Some(id)) != from);
          ids.len() != before
        }
      },
      single if as_i64(Some(&*single)) == from => {
        *single = self.to.map_or(Value::Null, Value::from);
        true
      }
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn registry() -> SchemaRegistry {
    SchemaRegistry::from_json(
      r#"{
        "contentTypes": [
          { "uid": "api::tag.tag", "tableName": "tags" },
          {
            "uid": "api::post.post",
            "tableName": "posts",
            "attributes": {
              "block": { "type": "component", "component": "blocks.links" },
              "zone": { "type": "dynamiczone", "components": ["blocks.links"] }
            }
          }
        ],
        "components": [
          {
            "uid": "blocks.links",
            "attributes": {
              "main": { "type": "relation", "relation": "oneToOne", "target": "api::tag.tag" },
              "rest": { "type": "relation", "relation": "oneToMany", "target": "api::tag.tag" }
            }
          }
        ]
      }"#,
    )
    .unwrap()
  }

  #[test]
  fn relations_inside_components_become_id_lists() {
    let registry = registry();
    let attributes = registry.get("api::post.post").unwrap().attributes.clone();
    let mut data = json!({
      "block": { "main": { "id": 3 }, "rest": { "connect": [1, { "id": 2 }] } },
      "zone": [{ "__component": "blocks.links", "main": [4, 5], "rest": 6 }]
    })
    .as_object()
    .cloned()
    .unwrap();

    normalize_components(&registry, &attributes, &mut data).unwrap();
    assert_eq!(data["block"], json!({ "main": 3, "rest": [1, 2] }));
    assert_eq!(data["zone"][0]["main"], json!(5));
    assert_eq!(data["zone"][0]["rest"], json!([6]));

    let targets = component_relation_targets(&registry, &attributes, &data).unwrap();
    assert_eq!(targets.len(), 5);
    assert!(targets.iter().all(|(uid, _)| uid == "api::tag.tag"));
  }

  #[test]
  fn references_are_repointed_or_dropped() {
    let registry = registry();
    let attributes = registry.get("api::post.post").unwrap().attributes.clone();
    assert!(references_target(&registry, &attributes, "api::tag.tag"));
    assert!(!references_target(&registry, &attributes, "api::post.post"));

    let mut data = json!({
      "block": { "main": 3, "rest": [3, 4] },
      "zone": [{ "__component": "blocks.links", "main": 4, "rest": [4, 3, 4] }]
    })
    .as_object()
    .cloned()
    .unwrap();

    let mut moved = data.clone();
    let tag = "api::tag.tag";
    assert!(replace_component_references(&registry, &attributes, &mut moved, tag, 4, Some(9)).unwrap());
    assert_eq!(moved["block"], json!({ "main": 3, "rest": [3, 9] }));
    assert_eq!(moved["zone"][0]["rest"], json!([9, 3, 9]));
    assert_eq!(moved["zone"][0]["main"], json!(9));

    assert!(replace_component_references(&registry, &attributes, &mut data, tag, 3, None).unwrap());
    assert_eq!(data["block"], json!({ "main": null, "rest": [4] }));
    assert_eq!(data["zone"][0]["rest"], json!([4, 4]));

    assert!(!replace_component_references(&registry, &attributes, &mut data, tag, 3, None).unwrap());
    let post = "api::post.post";
    assert!(!replace_component_references(&registry, &attributes, &mut data, post, 4, None).unwrap());
  }

  #[test]
  fn dynamic_zone_rejects_unlisted_components() {
    let registry = registry();
    let attributes = registry.get("api::post.post").unwrap().attributes.clone();
    let mut data = json!({ "zone": [{ "__component": "blocks.other" }] })
      .as_object()
      .cloned()
      .unwrap();
    assert!(matches!(
      normalize_components(&registry, &attributes, &mut data),
      Err(Error::Core(folio_core::Error::UnknownComponent(_)))
    ));
  }
}
