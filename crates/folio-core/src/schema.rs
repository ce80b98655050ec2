//! Schema metadata: content types, components and their attributes.
//!
//! The registry is the single source of truth for table names, relation
//! kinds and join-table layouts. Storage code never inspects raw JSON schema
//! definitions; it matches on [`Attribute`] and [`Relation`] instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Column holding the attribute name on every morph join table.
pub const FIELD_COLUMN: &str = "field";

// ─── Join tables ─────────────────────────────────────────────────────────────

/// Join table of a non-polymorphic relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinTable {
  pub name:                String,
  /// References the owning entry.
  pub join_column:         String,
  /// References the related entry.
  pub inverse_join_column: String,
  #[serde(default)]
  pub order_column:        Option<String>,
}

/// The pair of columns identifying a polymorphic target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MorphColumn {
  pub id_column:   String,
  pub type_column: String,
}

fn default_order_column() -> String { "order".to_owned() }

/// Join table of a polymorphic relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MorphJoinTable {
  pub name:          String,
  pub join_column:   String,
  pub morph_column:  MorphColumn,
  #[serde(default = "default_order_column")]
  pub order_column:  String,
  /// Static column values every row of this table carries.
  #[serde(default)]
  pub on:            Map<String, Value>,
  /// Extra pivot columns beyond `field`.
  #[serde(default)]
  pub pivot_columns: Vec<String>,
}

// ─── Relations ───────────────────────────────────────────────────────────────

/// Relation kind without its payload; handy for comparisons and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
  OneToOne,
  OneToMany,
  ManyToOne,
  ManyToMany,
  MorphOne,
  MorphMany,
  MorphToOne,
  MorphToMany,
}

impl RelationKind {
  /// Whether the owning side holds at most one related entry.
  pub fn is_single(self) -> bool {
    matches!(
      self,
      Self::OneToOne | Self::ManyToOne | Self::MorphOne | Self::MorphToOne
    )
  }

  pub fn is_morph(self) -> bool {
    matches!(
      self,
      Self::MorphOne | Self::MorphMany | Self::MorphToOne | Self::MorphToMany
    )
  }
}

/// A relation attribute. The variant is the relation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
  tag = "relation",
  rename_all = "camelCase",
  rename_all_fields = "camelCase"
)]
pub enum Relation {
  // Relations inside components are stored inline and carry no join table.
  OneToOne {
    target:     String,
    #[serde(default)]
    join_table: Option<JoinTable>,
  },
  OneToMany {
    target:     String,
    #[serde(default)]
    join_table: Option<JoinTable>,
  },
  ManyToOne {
    target:     String,
    #[serde(default)]
    join_table: Option<JoinTable>,
  },
  ManyToMany {
    target:     String,
    #[serde(default)]
    join_table: Option<JoinTable>,
  },
  /// Single-valued side of a morph relation; rows live in the join table
  /// of `target`'s `morph_by` attribute.
  MorphOne { target: String, morph_by: String },
  /// Many-valued side of a morph relation; rows live in the join table of
  /// `target`'s `morph_by` attribute.
  MorphMany { target: String, morph_by: String },
  MorphToOne { join_table: MorphJoinTable },
  MorphToMany { join_table: MorphJoinTable },
}

impl Relation {
  pub fn kind(&self) -> RelationKind {
    match self {
      Self::OneToOne { .. } => RelationKind::OneToOne,
      Self::OneToMany { .. } => RelationKind::OneToMany,
      Self::ManyToOne { .. } => RelationKind::ManyToOne,
      Self::ManyToMany { .. } => RelationKind::ManyToMany,
      Self::MorphOne { .. } => RelationKind::MorphOne,
      Self::MorphMany { .. } => RelationKind::MorphMany,
      Self::MorphToOne { .. } => RelationKind::MorphToOne,
      Self::MorphToMany { .. } => RelationKind::MorphToMany,
    }
  }

  /// The fixed target uid; `None` for owner-side morph relations whose
  /// targets are heterogeneous.
  pub fn target(&self) -> Option<&str> {
    match self {
      Self::OneToOne { target, .. }
      | Self::OneToMany { target, .. }
      | Self::ManyToOne { target, .. }
      | Self::ManyToMany { target, .. }
      | Self::MorphOne { target, .. }
      | Self::MorphMany { target, .. } => Some(target),
      Self::MorphToOne { .. } | Self::MorphToMany { .. } => None,
    }
  }

  /// The join table of a non-polymorphic relation.
  pub fn join_table(&self) -> Option<&JoinTable> {
    match self {
      Self::OneToOne { join_table, .. }
      | Self::OneToMany { join_table, .. }
      | Self::ManyToOne { join_table, .. }
      | Self::ManyToMany { join_table, .. } => join_table.as_ref(),
      _ => None,
    }
  }
}

// ─── Attributes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Attribute {
  String,
  Text,
  Integer,
  BigInteger,
  Float,
  Decimal,
  Boolean,
  Date,
  DateTime,
  Json,
  Uid,
  Enumeration {
    #[serde(rename = "enum")]
    values: Vec<String>,
  },
  Relation(Relation),
  Component {
    component:  String,
    #[serde(default)]
    repeatable: bool,
  },
  DynamicZone {
    components: Vec<String>,
  },
}

impl Attribute {
  pub fn as_relation(&self) -> Option<&Relation> {
    match self {
      Self::Relation(r) => Some(r),
      _ => None,
    }
  }
}

// ─── Content types & components ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTypeOptions {
  #[serde(default)]
  pub draft_and_publish: bool,
  #[serde(default)]
  pub localized:         bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentType {
  pub uid:        String,
  pub table_name: String,
  #[serde(default)]
  pub options:    ContentTypeOptions,
  #[serde(default)]
  pub attributes: BTreeMap<String, Attribute>,
}

impl ContentType {
  /// Relation attributes in name order.
  pub fn relations(&self) -> impl Iterator<Item = (&str, &Relation)> {
    self
      .attributes
      .iter()
      .filter_map(|(name, attr)| attr.as_relation().map(|r| (name.as_str(), r)))
  }
}

/// A reusable group of attributes embedded in content types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
  pub uid:        String,
  #[serde(default)]
  pub attributes: BTreeMap<String, Attribute>,
}

/// Serialised form of a [`SchemaRegistry`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
  #[serde(default)]
  pub default_locale: Option<String>,
  #[serde(default)]
  pub content_types:  Vec<ContentType>,
  #[serde(default)]
  pub components:     Vec<Component>,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Typed lookup service over every content type and component.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
  content_types:  BTreeMap<String, ContentType>,
  components:     BTreeMap<String, Component>,
  default_locale: String,
}

impl Default for SchemaRegistry {
  fn default() -> Self { Self::new("en") }
}

impl SchemaRegistry {
  pub fn new(default_locale: impl Into<String>) -> Self {
    Self {
      content_types:  BTreeMap::new(),
      components:     BTreeMap::new(),
      default_locale: default_locale.into(),
    }
  }

  pub fn from_definition(def: SchemaDefinition) -> Self {
    let mut registry = Self::new(def.default_locale.unwrap_or_else(|| "en".into()));
    for ct in def.content_types {
      registry = registry.with_content_type(ct);
    }
    for component in def.components {
      registry = registry.with_component(component);
    }
    registry
  }

  /// Parse a JSON [`SchemaDefinition`].
  pub fn from_json(json: &str) -> Result<Self> {
    Ok(Self::from_definition(serde_json::from_str(json)?))
  }

  pub fn with_content_type(mut self, ct: ContentType) -> Self {
    self.content_types.insert(ct.uid.clone(), ct);
    self
  }

  pub fn with_component(mut self, component: Component) -> Self {
    self.components.insert(component.uid.clone(), component);
    self
  }

  pub fn default_locale(&self) -> &str { &self.default_locale }

  pub fn set_default_locale(&mut self, locale: impl Into<String>) {
    self.default_locale = locale.into();
  }

  pub fn content_types(&self) -> impl Iterator<Item = &ContentType> {
    self.content_types.values()
  }

  pub fn get(&self, uid: &str) -> Result<&ContentType> {
    self
      .content_types
      .get(uid)
      .ok_or_else(|| Error::UnknownContentType(uid.to_owned()))
  }

  pub fn component(&self, uid: &str) -> Result<&Component> {
    self
      .components
      .get(uid)
      .ok_or_else(|| Error::UnknownComponent(uid.to_owned()))
  }

  /// Attributes of a content type or component.
  fn attributes_of(&self, uid: &str) -> Result<&BTreeMap<String, Attribute>> {
    if let Some(ct) = self.content_types.get(uid) {
      return Ok(&ct.attributes);
    }
    if let Some(component) = self.components.get(uid) {
      return Ok(&component.attributes);
    }
    Err(Error::UnknownContentType(uid.to_owned()))
  }

  pub fn attribute(&self, uid: &str, name: &str) -> Result<&Attribute> {
    self
      .attributes_of(uid)?
      .get(name)
      .ok_or_else(|| Error::UnknownAttribute {
        uid:       uid.to_owned(),
        attribute: name.to_owned(),
      })
  }

  pub fn relation(&self, uid: &str, name: &str) -> Result<&Relation> {
    self
      .attribute(uid, name)?
      .as_relation()
      .ok_or_else(|| Error::NotARelation {
        uid:       uid.to_owned(),
        attribute: name.to_owned(),
      })
  }

  /// The join table of a non-polymorphic relation.
  pub fn join_table(&self, uid: &str, name: &str) -> Result<&JoinTable> {
    self.relation(uid, name)?.join_table().ok_or_else(|| Error::MissingJoinTable {
      uid:       uid.to_owned(),
      attribute: name.to_owned(),
    })
  }

  /// Like [`Self::relation`] but tolerant of unknown uids and attributes.
  pub fn find_relation(&self, uid: &str, name: &str) -> Option<&Relation> {
    self.relation(uid, name).ok()
  }

  /// The join table holding the rows of a morph attribute.
  ///
  /// Owner-side attributes (`morphToOne`, `morphToMany`) carry their own
  /// table. Target-side attributes (`morphOne`, `morphMany`) borrow the table
  /// of the target's `morph_by` attribute.
  pub fn morph_join_table(&self, uid: &str, name: &str) -> Result<&MorphJoinTable> {
    match self.relation(uid, name)? {
      Relation::MorphToOne { join_table } | Relation::MorphToMany { join_table } => {
        Ok(join_table)
      }
      Relation::MorphOne { target, morph_by } | Relation::MorphMany { target, morph_by } => {
        match self.relation(target, morph_by)? {
          Relation::MorphToOne { join_table } | Relation::MorphToMany { join_table } => {
            Ok(join_table)
          }
          _ => Err(Error::InvalidRelation {
            attribute: name.to_owned(),
            reason:    format!("{target}.{morph_by} is not a morphTo relation"),
          }),
        }
      }
      _ => Err(Error::InvalidRelation {
        attribute: name.to_owned(),
        reason:    "not a morph relation".into(),
      }),
    }
  }

  /// Every simple join table whose relation targets `uid`, paired with the
  /// owning content type.
  pub fn inbound_join_tables<'a>(
    &'a self,
    uid: &'a str,
  ) -> impl Iterator<Item = (&'a str, &'a JoinTable)> + 'a {
    self.content_types.values().flat_map(move |ct| {
      ct.relations().filter_map(move |(_, relation)| {
        match (relation.target(), relation.join_table()) {
          (Some(target), Some(jt)) if target == uid => Some((ct.uid.as_str(), jt)),
          _ => None,
        }
      })
    })
  }

  /// Every owner-side morph join table in the registry, deduplicated by name.
  pub fn morph_to_join_tables(&self) -> Vec<&MorphJoinTable> {
    let mut tables: Vec<&MorphJoinTable> = Vec::new();
    for ct in self.content_types.values() {
      for (_, relation) in ct.relations() {
        if let Relation::MorphToOne { join_table } | Relation::MorphToMany { join_table } =
          relation
          && !tables.iter().any(|t| t.name == join_table.name)
        {
          tables.push(join_table);
        }
      }
    }
    tables
  }
}
