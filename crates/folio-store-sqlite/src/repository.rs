//! Document repositories: one per content type, every action wrapped in a
//! transaction and routed through the middleware chain.

use std::sync::Arc;

use folio_core::{
  document::{Document, DocumentEntries, Outcome, Params},
  middleware::{
    Action, ActionScope, Context, Middleware, MiddlewareManager, MiddlewareOptions, UidScope,
    handler,
  },
  middlewares::register_defaults,
  store::DocumentService as _,
};
use tracing::debug;

use crate::{Error, Result, db::Database, service::SqliteDocumentService};

/// The middleware manager shared by a factory and its repositories.
pub type Middlewares = MiddlewareManager<Outcome, Error>;

fn shape<T>(action: Action, value: Option<T>) -> Result<T> {
  value.ok_or(Error::UnexpectedOutcome(action))
}

// ─── Factory ─────────────────────────────────────────────────────────────────

/// Builds [`DocumentRepository`] handles that share one database and one
/// middleware manager.
#[derive(Clone)]
pub struct Documents {
  service:     SqliteDocumentService,
  middlewares: Arc<Middlewares>,
}

impl Documents {
  /// Wrap `db`, installing the default draft-and-publish and locale
  /// middleware for every content type of its registry.
  pub fn new(db: Database) -> Self {
    let middlewares = Middlewares::new();
    register_defaults(&middlewares, db.registry());
    Self { service: SqliteDocumentService::new(db), middlewares: Arc::new(middlewares) }
  }

  pub fn database(&self) -> &Database { self.service.database() }

  /// The repository of content type `uid`.
  pub fn get(&self, uid: &str) -> Result<DocumentRepository> {
    let ct = self.database().registry().get(uid)?;
    Ok(DocumentRepository {
      uid:         ct.uid.clone(),
      service:     self.service.clone(),
      middlewares: self.middlewares.clone(),
      defaults:    Params::default(),
    })
  }

  /// Register middleware for every content type.
  pub fn use_middleware(
    &self,
    action: impl Into<ActionScope>,
    middleware: Middleware<Outcome, Error>,
    opts: MiddlewareOptions,
  ) -> &Self {
    self.middlewares.add(UidScope::All, action, middleware, opts);
    self
  }

  /// Register several middleware for every content type; they run in the
  /// given order.
  pub fn use_middlewares(
    &self,
    action: impl Into<ActionScope>,
    middlewares: Vec<Middleware<Outcome, Error>>,
    opts: MiddlewareOptions,
  ) -> &Self {
    self.middlewares.add_many(UidScope::All, action, middlewares, opts);
    self
  }
}

// ─── Repository ──────────────────────────────────────────────────────────────

/// Document actions for one content type.
#[derive(Clone)]
pub struct DocumentRepository {
  uid:         String,
  service:     SqliteDocumentService,
  middlewares: Arc<Middlewares>,
  /// Merged under the params of every call.
  defaults:    Params,
}

impl DocumentRepository {
  pub fn uid(&self) -> &str { &self.uid }

  /// A repository whose defaults are `params` merged over this one's. This
  /// repository is unchanged.
  pub fn with(&self, params: Params) -> Self {
    Self { defaults: params.merged_over(&self.defaults), ..self.clone() }
  }

  /// Register middleware for this repository's content type. Every
  /// repository of the same content type sees it.
  pub fn use_middleware(
    &self,
    action: impl Into<ActionScope>,
    middleware: Middleware<Outcome, Error>,
    opts: MiddlewareOptions,
  ) -> &Self {
    self.middlewares.add(UidScope::Uid(self.uid.clone()), action, middleware, opts);
    self
  }

  /// Register several middleware for this repository's content type, in
  /// order.
  pub fn use_middlewares(
    &self,
    action: impl Into<ActionScope>,
    middlewares: Vec<Middleware<Outcome, Error>>,
    opts: MiddlewareOptions,
  ) -> &Self {
    self.middlewares.add_many(UidScope::Uid(self.uid.clone()), action, middlewares, opts);
    self
  }

  /// Run `action` in a transaction: defaults merged in, middleware chain,
  /// then the document service.
  async fn run(&self, action: Action, params: Params) -> Result<Outcome> {
    let ctx = Context::new(action, self.uid.clone(), params.merged_over(&self.defaults));
    let service = self.service.clone();
    let terminal = handler(move |ctx: Context| {
      let service = service.clone();
      async move { service.dispatch(ctx).await }
    });
    let middlewares = self.middlewares.clone();
    debug!(uid = %self.uid, %action, "document action");

    self
      .service
      .database()
      .transaction(|_trx| async move { middlewares.run(ctx, terminal).await })
      .await
  }

  pub async fn find_many(&self, params: Params) -> Result<Vec<Document>> {
    shape(Action::FindMany, self.run(Action::FindMany, params).await?.into_many())
  }

  pub async fn find_first(&self, params: Params) -> Result<Option<Document>> {
    shape(Action::FindFirst, self.run(Action::FindFirst, params).await?.into_one())
  }

  pub async fn find_one(&self, document_id: &str, params: Params) -> Result<Option<Document>> {
    let params = params.document_id(document_id);
    shape(Action::FindOne, self.run(Action::FindOne, params).await?.into_one())
  }

  /// Delete the rows of a document the lookup matches (every locale and
  /// status unless narrowed).
  pub async fn delete(&self, document_id: &str, params: Params) -> Result<DocumentEntries> {
    let params = params.document_id(document_id);
    shape(Action::Delete, self.run(Action::Delete, params).await?.into_entries())
  }

  pub async fn delete_many(&self, params: Params) -> Result<DocumentEntries> {
    shape(Action::DeleteMany, self.run(Action::DeleteMany, params).await?.into_entries())
  }

  pub async fn create(&self, params: Params) -> Result<Document> {
    shape(Action::Create, self.run(Action::Create, params).await?.into_one().flatten())
  }

  /// Copy a document into a new one; `params.data` overrides copied fields.
  pub async fn clone_document(&self, document_id: &str, params: Params) -> Result<DocumentEntries> {
    let params = params.document_id(document_id);
    shape(Action::Clone, self.run(Action::Clone, params).await?.into_entries())
  }

  /// `None` when the document does not exist.
  pub async fn update(&self, document_id: &str, params: Params) -> Result<Option<Document>> {
    let params = params.document_id(document_id);
    shape(Action::Update, self.run(Action::Update, params).await?.into_one())
  }

  pub async fn count(&self, params: Params) -> Result<u64> {
    shape(Action::Count, self.run(Action::Count, params).await?.into_count())
  }

  pub async fn publish(&self, document_id: &str, params: Params) -> Result<DocumentEntries> {
    let params = params.document_id(document_id);
    shape(Action::Publish, self.run(Action::Publish, params).await?.into_entries())
  }

  pub async fn unpublish(&self, document_id: &str, params: Params) -> Result<DocumentEntries> {
    let params = params.document_id(document_id);
    shape(Action::Unpublish, self.run(Action::Unpublish, params).await?.into_entries())
  }

  pub async fn discard_draft(&self, document_id: &str, params: Params) -> Result<DocumentEntries> {
    let params = params.document_id(document_id);
    shape(Action::DiscardDraft, self.run(Action::DiscardDraft, params).await?.into_entries())
  }

  /// See [`folio_core::store::DocumentService::count_draft_relations`].
  pub async fn count_draft_relations(&self, document_id: &str, locale: Option<&str>) -> Result<u64> {
    self.service.count_draft_relations(&self.uid, document_id, locale).await
  }
}
