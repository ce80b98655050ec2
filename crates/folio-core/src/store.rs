//! The `DocumentService` trait: the terminal handler of every document action.
//!
//! The repository layer runs an action's middleware chain and hands the final
//! [`Context`] to a backend implementing this trait.

use std::future::Future;

use crate::{document::Outcome, middleware::Context};

/// Abstraction over a document storage backend.
///
/// Implementations read the middleware-produced `params.lookup`,
/// `params.filters` and `params.data`; they never interpret `params.status`
/// for actions whose chain already turned it into a lookup.
pub trait DocumentService: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Execute `ctx.action` for `ctx.uid`. The result shape follows the action:
  /// `One` for findOne/findFirst/create/update, `Many` for findMany, `Count`
  /// for count and `Entries` for everything addressing a whole document.
  fn dispatch(&self, ctx: Context) -> impl Future<Output = Result<Outcome, Self::Error>> + Send + '_;

  /// Count the edges of a document's draft row that point at entries whose
  /// document was never published, including relations nested in components
  /// and dynamic zones.
  fn count_draft_relations<'a>(
    &'a self,
    uid: &'a str,
    document_id: &'a str,
    locale: Option<&'a str>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}
