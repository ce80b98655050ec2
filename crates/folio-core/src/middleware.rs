//! The onion middleware pipeline around document actions.
//!
//! Middleware are registered per (content type, action) pair, either of
//! which may be the wildcard. For one call the applicable middleware are
//! folded right-to-left around a terminal handler, so the first one resolved
//! is the outermost layer.

use std::{
  collections::HashMap,
  future::Future,
  sync::{Arc, PoisonError, RwLock},
};

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::document::Params;

// ─── Action ──────────────────────────────────────────────────────────────────

/// Every action a document repository exposes.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "camelCase")]
pub enum Action {
  FindMany,
  FindFirst,
  FindOne,
  Delete,
  DeleteMany,
  Create,
  Clone,
  Update,
  Count,
  Publish,
  Unpublish,
  DiscardDraft,
}

// ─── Scopes ──────────────────────────────────────────────────────────────────

/// Which content types a middleware applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UidScope {
  /// Every content type.
  All,
  Uid(String),
}

/// Which actions a middleware applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionScope {
  All,
  Action(Action),
}

impl From<Action> for ActionScope {
  fn from(action: Action) -> Self { Self::Action(action) }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// State of one action call, owned by the pipeline while it runs.
#[derive(Debug, Clone)]
pub struct Context {
  pub action:  Action,
  pub uid:     String,
  pub params:  Params,
  /// Free-form values middleware can pass to each other.
  pub options: Map<String, Value>,
}

impl Context {
  pub fn new(action: Action, uid: impl Into<String>, params: Params) -> Self {
    Self { action, uid: uid.into(), params, options: Map::new() }
  }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

/// The innermost callable of a chain, and the shape of every composed layer.
pub type Handler<R, E> =
  Arc<dyn Fn(Context) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;

/// An interceptor. It receives the context and the rest of the chain; not
/// calling `next` short-circuits the action.
pub type Middleware<R, E> =
  Arc<dyn Fn(Context, Next<R, E>) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;

/// The remainder of a chain, terminal handler included.
pub struct Next<R, E>(Handler<R, E>);

impl<R, E> Next<R, E> {
  pub fn run(&self, ctx: Context) -> BoxFuture<'static, Result<R, E>> { (self.0)(ctx) }
}

/// Build a [`Middleware`] from an async closure.
pub fn middleware<R, E, F, Fut>(f: F) -> Middleware<R, E>
where
  F: Fn(Context, Next<R, E>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<R, E>> + Send + 'static,
  R: 'static,
  E: 'static,
{
  Arc::new(
    move |ctx: Context, next: Next<R, E>| -> BoxFuture<'static, Result<R, E>> {
      Box::pin(f(ctx, next))
    },
  )
}

/// A middleware that only rewrites the context before continuing.
pub fn map_context<R, E, F>(f: F) -> Middleware<R, E>
where
  F: Fn(&mut Context) + Send + Sync + 'static,
  R: 'static,
  E: 'static,
{
  Arc::new(
    move |mut ctx: Context, next: Next<R, E>| -> BoxFuture<'static, Result<R, E>> {
      f(&mut ctx);
      next.run(ctx)
    },
  )
}

/// Build a terminal [`Handler`] from an async closure.
pub fn handler<R, E, F, Fut>(f: F) -> Handler<R, E>
where
  F: Fn(Context) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<R, E>> + Send + 'static,
  R: 'static,
  E: 'static,
{
  Arc::new(move |ctx: Context| -> BoxFuture<'static, Result<R, E>> { Box::pin(f(ctx)) })
}

/// Fold `middlewares` right-to-left around `terminal`.
pub fn compose<R, E>(middlewares: Vec<Middleware<R, E>>, terminal: Handler<R, E>) -> Handler<R, E>
where
  R: 'static,
  E: 'static,
{
  middlewares.into_iter().rev().fold(terminal, |next, mw| {
    let layer: Handler<R, E> = Arc::new(move |ctx: Context| mw(ctx, Next(next.clone())));
    layer
  })
}

// ─── Manager ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiddlewareOptions {
  /// Lower runs first within one scope bucket; ties keep registration order.
  pub priority: i32,
}

impl Default for MiddlewareOptions {
  fn default() -> Self { Self { priority: 100 } }
}

struct Registered<R, E> {
  priority:   i32,
  middleware: Middleware<R, E>,
}

type Buckets<R, E> = HashMap<(UidScope, ActionScope), Vec<Registered<R, E>>>;

/// Registry of middleware keyed by (content type, action) scope.
pub struct MiddlewareManager<R, E> {
  buckets: RwLock<Buckets<R, E>>,
}

impl<R, E> Default for MiddlewareManager<R, E> {
  fn default() -> Self { Self { buckets: RwLock::new(HashMap::new()) } }
}

impl<R, E> MiddlewareManager<R, E>
where
  R: Send + 'static,
  E: Send + 'static,
{
  pub fn new() -> Self { Self::default() }

  pub fn add(
    &self,
    uid: UidScope,
    action: impl Into<ActionScope>,
    middleware: Middleware<R, E>,
    opts: MiddlewareOptions,
  ) {
    self.add_many(uid, action, vec![middleware], opts);
  }

  /// Register several middleware at once; they run in the given order.
  pub fn add_many(
    &self,
    uid: UidScope,
    action: impl Into<ActionScope>,
    middlewares: Vec<Middleware<R, E>>,
    opts: MiddlewareOptions,
  ) {
    let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
    let bucket = buckets.entry((uid, action.into())).or_default();
    bucket.extend(
      middlewares
        .into_iter()
        .map(|middleware| Registered { priority: opts.priority, middleware }),
    );
    bucket.sort_by_key(|r| r.priority);
  }

  /// The chain for one call, outermost first: every-uid/every-action,
  /// uid/every-action, every-uid/action, uid/action.
  pub fn get(&self, uid: &str, action: Action) -> Vec<Middleware<R, E>> {
    let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
    let uid = UidScope::Uid(uid.to_owned());
    let keys = [
      (UidScope::All, ActionScope::All),
      (uid.clone(), ActionScope::All),
      (UidScope::All, ActionScope::Action(action)),
      (uid, ActionScope::Action(action)),
    ];

    keys
      .iter()
      .filter_map(|key| buckets.get(key))
      .flatten()
      .map(|r| r.middleware.clone())
      .collect()
  }

  /// Run `ctx` through its chain, ending in `terminal`.
  pub async fn run(&self, ctx: Context, terminal: Handler<R, E>) -> Result<R, E> {
    let chain = self.get(&ctx.uid, ctx.action);
    tracing::debug!(
      uid = %ctx.uid,
      action = %ctx.action,
      middlewares = chain.len(),
      "running document action"
    );
    compose(chain, terminal)(ctx).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::document::Status;

  type Log = Arc<Mutex<Vec<String>>>;

  fn tracing_mw(log: &Log, name: &'static str) -> Middleware<String, String> {
    let log = log.clone();
    middleware(move |ctx, next| {
      let log = log.clone();
      async move {
        log.lock().unwrap().push(format!("{name}:before"));
        let result = next.run(ctx).await;
        log.lock().unwrap().push(format!("{name}:after"));
        result
      }
    })
  }

  fn terminal(log: &Log) -> Handler<String, String> {
    let log = log.clone();
    handler(move |ctx: Context| {
      let log = log.clone();
      async move {
        log.lock().unwrap().push("terminal".into());
        Ok(format!("{:?}", ctx.params.status))
      }
    })
  }

  #[tokio::test]
  async fn resolution_order_is_wildcards_first() {
    let log: Log = Arc::default();
    let manager: MiddlewareManager<String, String> = MiddlewareManager::new();
    let uid = UidScope::Uid("api::a.a".into());
    let opts = MiddlewareOptions::default();

    // Registered in reverse of the expected order.
    manager.add(uid.clone(), Action::Create, tracing_mw(&log, "uid-action"), opts);
    manager.add(UidScope::All, Action::Create, tracing_mw(&log, "all-action"), opts);
    manager.add(uid.clone(), ActionScope::All, tracing_mw(&log, "uid-all"), opts);
    manager.add(UidScope::All, ActionScope::All, tracing_mw(&log, "all-all"), opts);
    manager.add(uid, Action::Update, tracing_mw(&log, "other-action"), opts);

    manager
      .run(Context::new(Action::Create, "api::a.a", Params::new()), terminal(&log))
      .await
      .unwrap();

    assert_eq!(*log.lock().unwrap(), vec![
      "all-all:before",
      "uid-all:before",
      "all-action:before",
      "uid-action:before",
      "terminal",
      "uid-action:after",
      "all-action:after",
      "uid-all:after",
      "all-all:after",
    ]);
  }

  #[tokio::test]
  async fn context_mutations_reach_the_terminal() {
    let log: Log = Arc::default();
    let manager: MiddlewareManager<String, String> = MiddlewareManager::new();
    manager.add(
      UidScope::All,
      ActionScope::All,
      map_context(|ctx| ctx.params.status = Some(Status::Draft)),
      MiddlewareOptions::default(),
    );

    let out = manager
      .run(Context::new(Action::FindMany, "x", Params::new()), terminal(&log))
      .await
      .unwrap();
    assert_eq!(out, "Some(Draft)");
  }

  #[tokio::test]
  async fn skipping_next_short_circuits() {
    let log: Log = Arc::default();
    let manager: MiddlewareManager<String, String> = MiddlewareManager::new();
    manager.add(
      UidScope::All,
      Action::Delete,
      middleware(|_ctx, _next| async { Err::<String, _>("forbidden".to_owned()) }),
      MiddlewareOptions::default(),
    );

    let err = manager
      .run(Context::new(Action::Delete, "x", Params::new()), terminal(&log))
      .await
      .unwrap_err();
    assert_eq!(err, "forbidden");
    assert!(log.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn priority_orders_within_a_bucket() {
    let log: Log = Arc::default();
    let manager: MiddlewareManager<String, String> = MiddlewareManager::new();
    manager.add(
      UidScope::All,
      ActionScope::All,
      tracing_mw(&log, "late"),
      MiddlewareOptions { priority: 200 },
    );
    manager.add_many(
      UidScope::All,
      ActionScope::All,
      vec![tracing_mw(&log, "first"), tracing_mw(&log, "second")],
      MiddlewareOptions { priority: 10 },
    );

    manager
      .run(Context::new(Action::Count, "x", Params::new()), terminal(&log))
      .await
      .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(&log[..4], ["first:before", "second:before", "late:before", "terminal"]);
  }

  #[test]
  fn actions_use_camel_case_names() {
    assert_eq!(Action::DiscardDraft.to_string(), "discardDraft");
    assert_eq!("findMany".parse::<Action>().unwrap(), Action::FindMany);
  }
}
