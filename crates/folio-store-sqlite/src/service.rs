//! [`SqliteDocumentService`]: the SQLite implementation of [`DocumentService`].
//!
//! Every call runs in a transaction scope of its own. Called from inside a
//! repository action that scope is a savepoint of the action's transaction.

use chrono::{DateTime, Utc};
use folio_core::{
  document::{ALL_LOCALES, Document, DocumentEntries, Outcome, Params, SortOrder, Status, fields},
  filter::Filter,
  middleware::{Action, Context},
  relation::RelationPayload,
  schema::{Attribute, ContentType, SchemaRegistry},
  store::DocumentService,
};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  components::normalize_components,
  db::Database,
  draft_relations,
  encode::{DOCUMENT_COLUMNS, RawDocument, as_i64, decode_dt_value, encode_dt},
  query::{QueryBuilder, Row},
  relations::Relations,
  reorder::WindowedReorder,
  transaction::Transaction,
};

// ─── Service ─────────────────────────────────────────────────────────────────

/// Terminal handler for document actions, backed by a [`Database`].
///
/// Cloning is cheap; clones share the database.
#[derive(Clone)]
pub struct SqliteDocumentService {
  db: Database,
}

impl SqliteDocumentService {
  pub fn new(db: Database) -> Self { Self { db } }

  pub fn database(&self) -> &Database { &self.db }
}

impl DocumentService for SqliteDocumentService {
  type Error = Error;

  async fn dispatch(&self, ctx: Context) -> Result<Outcome> {
    let registry = self.db.registry();
    let strategy = self.db.reorder();
    self
      .db
      .transaction(|trx| async move {
        let session = Session::new(&trx, registry, strategy, &ctx.uid)?;
        session.dispatch(ctx.action, ctx.params).await
      })
      .await
  }

  async fn count_draft_relations<'a>(
    &'a self,
    uid: &'a str,
    document_id: &'a str,
    locale: Option<&'a str>,
  ) -> Result<u64> {
    let registry = self.db.registry();
    let strategy = self.db.reorder();
    self
      .db
      .transaction(|trx| async move {
        let relations = Relations::new(&trx, registry, strategy);
        draft_relations::count_draft_relations(&trx, registry, relations, uid, document_id, locale)
          .await
      })
      .await
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn and_all(filters: impl IntoIterator<Item = Option<Filter>>) -> Option<Filter> {
  Filter::all(filters.into_iter().flatten())
}

fn document_filter(document_id: &str) -> Filter { Filter::eq(fields::DOCUMENT_ID, document_id) }

fn status_filter(status: Status) -> Filter {
  match status {
    Status::Published => Filter::not_null(fields::PUBLISHED_AT),
    Status::Draft => Filter::null(fields::PUBLISHED_AT),
  }
}

/// Rows of exactly this locale, a missing locale included.
fn same_locale(locale: Option<&str>) -> Filter {
  match locale {
    Some(locale) => Filter::eq(fields::LOCALE, locale),
    None => Filter::null(fields::LOCALE),
  }
}

fn require_document_id(action: Action, params: &Params) -> Result<String> {
  params
    .document_id
    .clone()
    .ok_or_else(|| Error::Unsupported(format!("{action} needs a documentId")))
}

/// A write payload split by destination.
#[derive(Debug, Default)]
struct Write {
  /// Present when the payload names `publishedAt`, possibly as null.
  published_at: Option<Value>,
  locale:       Option<String>,
  relations:    Vec<(String, RelationPayload)>,
  /// Stored in the `data` column.
  fields:       Map<String, Value>,
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// One action on one content type inside one transaction scope.
struct Session<'a> {
  trx:       &'a Transaction,
  registry:  &'a SchemaRegistry,
  ct:        &'a ContentType,
  relations: Relations<'a>,
}

impl<'a> Session<'a> {
  fn new(
    trx: &'a Transaction,
    registry: &'a SchemaRegistry,
    strategy: &'a dyn WindowedReorder,
    uid: &str,
  ) -> Result<Self> {
    Ok(Self {
      trx,
      registry,
      ct: registry.get(uid)?,
      relations: Relations::new(trx, registry, strategy),
    })
  }

  fn uid(&self) -> &str { &self.ct.uid }

  fn draft_and_publish(&self) -> bool { self.ct.options.draft_and_publish }

  fn query(&self) -> QueryBuilder {
    QueryBuilder::documents(&self.ct.table_name).transacting(self.trx)
  }

  /// The locale condition of publish-style actions: the requested locale,
  /// the default one when none was requested, nothing for `*`.
  fn locale_filter(&self, locale: Option<&str>) -> Option<Filter> {
    if !self.ct.options.localized {
      return None;
    }
    match locale {
      Some(ALL_LOCALES) => None,
      Some(locale) => Some(Filter::eq(fields::LOCALE, locale)),
      None => Some(Filter::eq(fields::LOCALE, self.registry.default_locale())),
    }
  }

  fn require_draft_and_publish(&self, action: Action) -> Result<()> {
    if self.draft_and_publish() {
      Ok(())
    } else {
      Err(Error::Unsupported(format!(
        "{action} on {}: draft and publish is disabled",
        self.uid()
      )))
    }
  }

  async fn dispatch(&self, action: Action, params: Params) -> Result<Outcome> {
    debug!(uid = self.uid(), %action, "dispatching document action");
    match action {
      Action::FindMany => {
        let mut docs = self.select(params.where_filter(), Some(&params)).await?;
        self.populate(&mut docs, &params.populate).await?;
        Ok(Outcome::Many(docs))
      }
      Action::FindFirst => {
        let filter = params.where_filter();
        Ok(Outcome::One(self.find_first(filter, params).await?))
      }
      Action::FindOne => {
        let document_id = require_document_id(action, &params)?;
        let filter = and_all([params.where_filter(), Some(document_filter(&document_id))]);
        Ok(Outcome::One(self.find_first(filter, params).await?))
      }
      Action::Delete => {
        let document_id = require_document_id(action, &params)?;
        let filter = and_all([params.where_filter(), Some(document_filter(&document_id))]);
        let entries = self.delete_rows(filter).await?;
        Ok(Outcome::Entries(DocumentEntries { document_id: Some(document_id), entries }))
      }
      Action::DeleteMany => {
        let entries = self.delete_rows(params.where_filter()).await?;
        Ok(Outcome::Entries(DocumentEntries { document_id: None, entries }))
      }
      Action::Create => self.create(params).await.map(|doc| Outcome::One(Some(doc))),
      Action::Clone => self.clone_document(params).await.map(Outcome::Entries),
      Action::Update => self.update(params).await.map(Outcome::One),
      Action::Count => self.count(&params).await.map(Outcome::Count),
      Action::Publish => self.publish(params).await.map(Outcome::Entries),
      Action::Unpublish => self.unpublish(params).await.map(Outcome::Entries),
      Action::DiscardDraft => self.discard_draft(params).await.map(Outcome::Entries),
    }
  }

  // ── reads ─────────────────────────────────────────────────────────────────

  async fn select(&self, filter: Option<Filter>, params: Option<&Params>) -> Result<Vec<Document>> {
    let mut query = self.query().select(DOCUMENT_COLUMNS);
    if let Some(filter) = filter {
      query = query.where_(filter);
    }
    if let Some(params) = params {
      for sort in &params.sort {
        query = query.order_by(sort.field.as_str(), sort.order);
      }
      if let Some(limit) = params.limit {
        query = query.limit(limit);
      }
      if let Some(start) = params.start {
        query = query.offset(start);
      }
    }
    query = query.order_by(fields::ID, SortOrder::Asc);

    query
      .execute()
      .await?
      .rows
      .iter()
      .map(|row| RawDocument::from_row(row)?.into_document())
      .collect()
  }

  async fn find_first(&self, filter: Option<Filter>, mut params: Params) -> Result<Option<Document>> {
    params.limit = Some(1);
    let mut docs = self.select(filter, Some(&params)).await?;
    self.populate(&mut docs, &params.populate).await?;
    Ok(docs.into_iter().next())
  }

  async fn by_id(&self, id: i64) -> Result<Document> {
    self
      .select(Some(Filter::eq(fields::ID, id)), None)
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| Error::DocumentNotFound(format!("{}#{id}", self.ct.table_name)))
  }

  async fn document_exists(&self, document_id: &str) -> Result<bool> {
    let rows = self
      .query()
      .count("count")
      .where_(document_filter(document_id))
      .execute()
      .await?
      .rows;
    Ok(rows.first().and_then(|r| as_i64(r.get("count"))).unwrap_or(0) > 0)
  }

  async fn populate(&self, docs: &mut [Document], attributes: &[String]) -> Result<()> {
    for doc in docs.iter_mut() {
      for attribute in attributes {
        let value = self.relations.load(self.uid(), doc.id, attribute).await?;
        doc.data.insert(attribute.clone(), value);
      }
    }
    Ok(())
  }

  // ── writes ────────────────────────────────────────────────────────────────

  fn split(&self, data: Map<String, Value>) -> Result<Write> {
    let mut write = Write::default();
    for (name, value) in data {
      match name.as_str() {
        fields::ID | fields::DOCUMENT_ID | fields::CREATED_AT | fields::UPDATED_AT => {}
        fields::PUBLISHED_AT => write.published_at = Some(value),
        fields::LOCALE => write.locale = value.as_str().map(str::to_owned),
        _ => match self.ct.attributes.get(&name) {
          Some(Attribute::Relation(_)) => {
            let payload = RelationPayload::parse(&name, &value)?;
            write.relations.push((name, payload));
          }
          Some(_) => {
            write.fields.insert(name, value);
          }
          None => {
            return Err(
              folio_core::Error::UnknownAttribute { uid: self.ct.uid.clone(), attribute: name }
                .into(),
            );
          }
        },
      }
    }
    normalize_components(self.registry, &self.ct.attributes, &mut write.fields)?;
    Ok(write)
  }

  /// `publishedAt` of a new row. Content types without draft and publish
  /// only have published rows.
  fn new_published_at(&self, write: &Write) -> Result<Option<DateTime<Utc>>> {
    if !self.draft_and_publish() {
      return Ok(Some(Utc::now()));
    }
    match &write.published_at {
      Some(value) => decode_dt_value(value),
      None => Ok(None),
    }
  }

  fn new_locale(&self, write: &Write) -> Option<String> {
    self.ct.options.localized.then(|| {
      write.locale.clone().unwrap_or_else(|| self.registry.default_locale().to_owned())
    })
  }

  async fn insert_row(
    &self,
    document_id: &str,
    locale: Option<String>,
    published_at: Option<DateTime<Utc>>,
    data: &Map<String, Value>,
  ) -> Result<i64> {
    let now = Value::from(encode_dt(Utc::now()));
    let mut row = Row::new();
    row.insert("document_id".into(), Value::from(document_id));
    row.insert("locale".into(), locale.map_or(Value::Null, Value::from));
    row.insert(
      "published_at".into(),
      published_at.map_or(Value::Null, |dt| Value::from(encode_dt(dt))),
    );
    row.insert("created_at".into(), now.clone());
    row.insert("updated_at".into(), now);
    row.insert("data".into(), Value::Object(data.clone()));

    let output = QueryBuilder::new(&self.ct.table_name)
      .insert(vec![row])
      .transacting(self.trx)
      .execute()
      .await?;
    output
      .inserted
      .first()
      .copied()
      .ok_or_else(|| Error::Unsupported(format!("insert into {} returned no id", self.ct.table_name)))
  }

  /// Insert a row for `document_id` from `write`, relations included.
  async fn insert_write(&self, document_id: &str, write: &Write) -> Result<i64> {
    let id = self
      .insert_row(document_id, self.new_locale(write), self.new_published_at(write)?, &write.fields)
      .await?;
    for (attribute, payload) in &write.relations {
      self.relations.apply(self.uid(), id, attribute, payload, true).await?;
    }
    Ok(id)
  }

  async fn delete_row(&self, id: i64) -> Result<()> {
    self.relations.delete_all(self.uid(), id).await?;
    QueryBuilder::new(&self.ct.table_name)
      .delete()
      .where_(Filter::eq("id", id))
      .transacting(self.trx)
      .execute()
      .await?;
    Ok(())
  }

  async fn delete_rows(&self, filter: Option<Filter>) -> Result<Vec<Document>> {
    let docs = self.select(filter, None).await?;
    for doc in &docs {
      self.delete_row(doc.id).await?;
    }
    debug!(uid = self.uid(), deleted = docs.len(), "deleted entries");
    Ok(docs)
  }

  async fn set_published_at(&self, id: i64, published_at: Option<DateTime<Utc>>) -> Result<()> {
    let mut row = Row::new();
    row.insert(
      "published_at".into(),
      published_at.map_or(Value::Null, |dt| Value::from(encode_dt(dt))),
    );
    row.insert("updated_at".into(), Value::from(encode_dt(Utc::now())));
    QueryBuilder::new(&self.ct.table_name)
      .update(row)
      .where_(Filter::eq("id", id))
      .transacting(self.trx)
      .execute()
      .await?;
    Ok(())
  }

  async fn create(&self, params: Params) -> Result<Document> {
    let write = self.split(params.data.unwrap_or_default())?;
    let document_id = Uuid::new_v4().to_string();
    let id = self.insert_write(&document_id, &write).await?;

    let mut docs = vec![self.by_id(id).await?];
    self.populate(&mut docs, &params.populate).await?;
    debug!(uid = self.uid(), %document_id, id, "created entry");
    Ok(docs.remove(0))
  }

  /// Update the rows the lookup matches. A document with no row for the
  /// requested locale and status gets a new one.
  async fn update(&self, params: Params) -> Result<Option<Document>> {
    let document_id = require_document_id(Action::Update, &params)?;
    let write = self.split(params.data.clone().unwrap_or_default())?;
    let locale = self
      .ct
      .options
      .localized
      .then(|| write.locale.as_deref().map(|l| Filter::eq(fields::LOCALE, l)))
      .flatten();
    let filter = and_all([params.where_filter(), Some(document_filter(&document_id)), locale]);
    let rows = self.select(filter, None).await?;

    let id = if rows.is_empty() {
      if !self.document_exists(&document_id).await? {
        return Ok(None);
      }
      self.insert_write(&document_id, &write).await?
    } else {
      let published_at = match (&write.published_at, self.draft_and_publish()) {
        (Some(value), true) => Some(decode_dt_value(value)?),
        _ => None,
      };
      for row in &rows {
        let mut data = row.data.clone();
        data.extend(write.fields.clone());
        let mut update = Row::new();
        update.insert("data".into(), Value::Object(data));
        update.insert("updated_at".into(), Value::from(encode_dt(Utc::now())));
        if let Some(published_at) = published_at {
          update.insert(
            "published_at".into(),
            published_at.map_or(Value::Null, |dt| Value::from(encode_dt(dt))),
          );
        }
        QueryBuilder::new(&self.ct.table_name)
          .update(update)
          .where_(Filter::eq("id", row.id))
          .transacting(self.trx)
          .execute()
          .await?;
        for (attribute, payload) in &write.relations {
          self.relations.apply(self.uid(), row.id, attribute, payload, false).await?;
        }
      }
      rows[0].id
    };

    let mut docs = vec![self.by_id(id).await?];
    self.populate(&mut docs, &params.populate).await?;
    Ok(docs.pop())
  }

  /// `count` runs no status or locale lookup step, so both are applied here.
  async fn count(&self, params: &Params) -> Result<u64> {
    let mut filters = vec![params.where_filter()];
    if self.draft_and_publish() && !params.lookup.contains_key(fields::PUBLISHED_AT) {
      filters.push(params.status.map(status_filter));
    }
    if !params.lookup.contains_key(fields::LOCALE) {
      filters.push(self.locale_filter(params.locale.as_deref()));
    }

    let mut query = self.query().count("count");
    if let Some(filter) = and_all(filters) {
      query = query.where_(filter);
    }
    let rows = query.execute().await?.rows;
    let count = rows.first().and_then(|r| as_i64(r.get("count"))).unwrap_or(0);
    Ok(u64::try_from(count).unwrap_or(0))
  }

  /// Copy a document's draft rows (or its only rows) into a new draft
  /// document, overriding fields and relations with `data`.
  async fn clone_document(&self, params: Params) -> Result<DocumentEntries> {
    let source = require_document_id(Action::Clone, &params)?;
    let write = self.split(params.data.clone().unwrap_or_default())?;
    let mut rows = self
      .select(and_all([params.where_filter(), Some(document_filter(&source))]), None)
      .await?;
    if self.draft_and_publish() && rows.iter().any(|r| r.published_at.is_none()) {
      rows.retain(|r| r.published_at.is_none());
    }
    if rows.is_empty() {
      return Err(Error::DocumentNotFound(source));
    }

    let document_id = Uuid::new_v4().to_string();
    let published_at = (!self.draft_and_publish()).then(Utc::now);
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
      let mut data = row.data.clone();
      data.extend(write.fields.clone());
      let id = self.insert_row(&document_id, row.locale.clone(), published_at, &data).await?;
      self.relations.copy_all(self.uid(), row.id, id).await?;
      for (attribute, payload) in &write.relations {
        self.relations.apply(self.uid(), id, attribute, payload, false).await?;
      }
      entries.push(self.by_id(id).await?);
    }
    debug!(uid = self.uid(), %source, %document_id, "cloned document");
    Ok(DocumentEntries { document_id: Some(document_id), entries })
  }

  async fn rows_of(
    &self,
    document_id: &str,
    status: Status,
    locale: Option<Filter>,
    extra: Option<Filter>,
  ) -> Result<Vec<Document>> {
    let filter = and_all([
      extra,
      Some(document_filter(document_id)),
      Some(status_filter(status)),
      locale,
    ]);
    self.select(filter, None).await
  }

  /// Replace each draft's published counterpart with a fresh copy of the
  /// draft. Edges other entries held to the old published row move to the
  /// new one.
  async fn publish(&self, params: Params) -> Result<DocumentEntries> {
    self.require_draft_and_publish(Action::Publish)?;
    let document_id = require_document_id(Action::Publish, &params)?;
    let drafts = self
      .rows_of(
        &document_id,
        Status::Draft,
        self.locale_filter(params.locale.as_deref()),
        params.where_filter(),
      )
      .await?;

    let mut entries = Vec::with_capacity(drafts.len());
    for draft in drafts {
      let locale = Some(same_locale(draft.locale.as_deref()));
      let previous = self.rows_of(&document_id, Status::Published, locale, None).await?;
      let id = self
        .insert_row(&document_id, draft.locale.clone(), Some(Utc::now()), &draft.data)
        .await?;
      for old in previous {
        self.relations.relink_inbound(self.uid(), old.id, id).await?;
        self.delete_row(old.id).await?;
      }
      self.relations.copy_all(self.uid(), draft.id, id).await?;
      entries.push(self.by_id(id).await?);
    }
    info!(uid = self.uid(), %document_id, published = entries.len(), "published document");
    Ok(DocumentEntries { document_id: Some(document_id), entries })
  }

  /// Drop published rows that have a draft; turn the others into drafts.
  async fn unpublish(&self, params: Params) -> Result<DocumentEntries> {
    self.require_draft_and_publish(Action::Unpublish)?;
    let document_id = require_document_id(Action::Unpublish, &params)?;
    let published = self
      .rows_of(
        &document_id,
        Status::Published,
        self.locale_filter(params.locale.as_deref()),
        params.where_filter(),
      )
      .await?;

    for row in &published {
      let locale = Some(same_locale(row.locale.as_deref()));
      if self.rows_of(&document_id, Status::Draft, locale, None).await?.is_empty() {
        self.set_published_at(row.id, None).await?;
      } else {
        self.delete_row(row.id).await?;
      }
    }
    info!(uid = self.uid(), %document_id, unpublished = published.len(), "unpublished document");
    Ok(DocumentEntries { document_id: Some(document_id), entries: published })
  }

  /// Delete drafts whose locale has a published row.
  async fn discard_draft(&self, params: Params) -> Result<DocumentEntries> {
    self.require_draft_and_publish(Action::DiscardDraft)?;
    let document_id = require_document_id(Action::DiscardDraft, &params)?;
    let drafts = self
      .rows_of(
        &document_id,
        Status::Draft,
        self.locale_filter(params.locale.as_deref()),
        params.where_filter(),
      )
      .await?;

    let mut entries = Vec::new();
    for draft in drafts {
      let locale = Some(same_locale(draft.locale.as_deref()));
      if self.rows_of(&document_id, Status::Published, locale, None).await?.is_empty() {
        continue;
      }
      self.delete_row(draft.id).await?;
      entries.push(draft);
    }
    info!(uid = self.uid(), %document_id, discarded = entries.len(), "discarded drafts");
    Ok(DocumentEntries { document_id: Some(document_id), entries })
  }
}
