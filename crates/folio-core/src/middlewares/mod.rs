//! The default middleware set: draft-and-publish and locale resolution.
//!
//! Which steps run for which action is fixed by [`steps_for`]. Steps whose
//! feature is disabled on a content type are skipped when the set is
//! installed. [`step_middleware`] turns any step, including ones no default
//! chain uses, into middleware for custom registration.

pub mod draft_and_publish;
pub mod locale;

use chrono::Utc;
use strum::IntoEnumIterator as _;

use crate::{
  document::Params,
  middleware::{Action, Middleware, MiddlewareManager, MiddlewareOptions, UidScope, map_context},
  schema::{ContentTypeOptions, SchemaRegistry},
};

/// One parameter transformation of the default set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  SetStatusToDraft,
  DefaultToDraft,
  StatusToLookup,
  StatusToData,
  LocaleDefault,
  LocaleToLookup,
  LocaleToData,
}

impl Step {
  pub fn is_draft_and_publish(self) -> bool {
    matches!(
      self,
      Self::SetStatusToDraft | Self::DefaultToDraft | Self::StatusToLookup | Self::StatusToData
    )
  }

  pub fn applies_to(self, options: ContentTypeOptions) -> bool {
    if self.is_draft_and_publish() {
      options.draft_and_publish
    } else {
      options.localized
    }
  }

  pub fn apply(self, params: &mut Params, default_locale: &str) {
    match self {
      Self::SetStatusToDraft => draft_and_publish::set_status_to_draft(params),
      Self::DefaultToDraft => draft_and_publish::default_to_draft(params),
      Self::StatusToLookup => draft_and_publish::status_to_lookup(params),
      Self::StatusToData => draft_and_publish::status_to_data(params, Utc::now()),
      Self::LocaleDefault => locale::default_locale(params, default_locale),
      Self::LocaleToLookup => locale::locale_to_lookup(params),
      Self::LocaleToData => locale::locale_to_data(params),
    }
  }
}

/// The default chain of each action, outermost first.
pub fn steps_for(action: Action) -> &'static [Step] {
  use Step::*;
  match action {
    Action::FindMany | Action::FindOne | Action::FindFirst => {
      &[DefaultToDraft, StatusToLookup, LocaleDefault, LocaleToLookup]
    }
    Action::Delete => &[StatusToLookup, LocaleToLookup],
    Action::Create => &[DefaultToDraft, StatusToData, LocaleDefault, LocaleToData],
    Action::Update => &[
      DefaultToDraft,
      StatusToLookup,
      StatusToData,
      LocaleDefault,
      LocaleToData,
    ],
    Action::Count => &[DefaultToDraft, LocaleDefault],
    Action::Clone => &[LocaleToLookup],
    Action::Publish | Action::Unpublish => &[DefaultToDraft],
    Action::DeleteMany | Action::DiscardDraft => &[],
  }
}

/// Middleware applying one step to the call's params.
pub fn step_middleware<R, E>(step: Step, default_locale: &str) -> Middleware<R, E>
where
  R: 'static,
  E: 'static,
{
  let default_locale = default_locale.to_owned();
  map_context(move |ctx| step.apply(&mut ctx.params, &default_locale))
}

/// The middleware a content type with `options` gets for `action`.
pub fn default_middlewares<R, E>(
  options: ContentTypeOptions,
  default_locale: &str,
  action: Action,
) -> Vec<Middleware<R, E>>
where
  R: 'static,
  E: 'static,
{
  steps_for(action)
    .iter()
    .copied()
    .filter(|step| step.applies_to(options))
    .map(|step| step_middleware(step, default_locale))
    .collect()
}

/// Install the default set for every content type of `registry`.
pub fn register_defaults<R, E>(manager: &MiddlewareManager<R, E>, registry: &SchemaRegistry)
where
  R: Send + 'static,
  E: Send + 'static,
{
  for ct in registry.content_types() {
    for action in Action::iter() {
      let middlewares = default_middlewares(ct.options, registry.default_locale(), action);
      if middlewares.is_empty() {
        continue;
      }
      tracing::debug!(uid = %ct.uid, %action, count = middlewares.len(), "installing default middleware");
      manager.add_many(
        UidScope::Uid(ct.uid.clone()),
        action,
        middlewares,
        MiddlewareOptions::default(),
      );
    }
  }
}
