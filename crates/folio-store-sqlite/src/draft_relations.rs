//! Counting the edges of a draft that point at never-published entries.

use std::collections::HashMap;

use folio_core::{
  document::{ALL_LOCALES, SortOrder, fields},
  filter::Filter,
  schema::SchemaRegistry,
};
use tracing::debug;

use crate::{
  Result,
  components::component_relation_targets,
  encode::{DOCUMENT_COLUMNS, RawDocument, as_i64, as_str},
  query::QueryBuilder,
  relations::Relations,
  transaction::Transaction,
};

/// Whether the entry `uid#id` belongs to a draft-and-publish document that
/// has no published row. Missing entries and content types without draft and
/// publish count as published.
async fn never_published(
  trx: &Transaction,
  registry: &SchemaRegistry,
  uid: &str,
  id: i64,
) -> Result<bool> {
  let ct = registry.get(uid)?;
  if !ct.options.draft_and_publish {
    return Ok(false);
  }

  let rows = QueryBuilder::new(&ct.table_name)
    .select(["document_id"])
    .where_(Filter::eq("id", id))
    .transacting(trx)
    .execute()
    .await?
    .rows;
  let Some(document_id) = rows.first().and_then(|r| as_str(r.get("document_id"))) else {
    return Ok(false);
  };

  let published = QueryBuilder::documents(&ct.table_name)
    .count("count")
    .where_(Filter::eq(fields::DOCUMENT_ID, document_id))
    .where_(Filter::not_null(fields::PUBLISHED_AT))
    .transacting(trx)
    .execute()
    .await?
    .rows;
  Ok(published.first().and_then(|r| as_i64(r.get("count"))).unwrap_or(0) == 0)
}

/// Count, per edge, the relations of the document's draft row (top-level and
/// inside components and dynamic zones) whose target was never published.
///
/// `locale` defaults to the registry's default locale for localized content
/// types. Returns 0 when the document has no such row.
pub async fn count_draft_relations(
  trx: &Transaction,
  registry: &SchemaRegistry,
  relations: Relations<'_>,
  uid: &str,
  document_id: &str,
  locale: Option<&str>,
) -> Result<u64> {
  let ct = registry.get(uid)?;

  let mut query = QueryBuilder::documents(&ct.table_name)
    .select(DOCUMENT_COLUMNS)
    .where_(Filter::eq(fields::DOCUMENT_ID, document_id))
    .order_by(fields::ID, SortOrder::Asc)
    .limit(1);
  if ct.options.draft_and_publish {
    query = query.where_(Filter::null(fields::PUBLISHED_AT));
  }
  if ct.options.localized {
    match locale.unwrap_or(registry.default_locale()) {
      ALL_LOCALES => {}
      locale => query = query.where_(Filter::eq(fields::LOCALE, locale)),
    }
  }
  let rows = query.transacting(trx).execute().await?.rows;
  let Some(row) = rows.first() else {
    return Ok(0);
  };
  let draft = RawDocument::from_row(row)?.into_document()?;

  let mut edges = relations.targets(uid, draft.id).await?;
  edges.extend(component_relation_targets(registry, &ct.attributes, &draft.data)?);

  let mut seen: HashMap<(String, i64), bool> = HashMap::new();
  let mut count = 0;
  for edge in edges {
    let unpublished = match seen.get(&edge) {
      Some(unpublished) => *unpublished,
      None => {
        let unpublished = never_published(trx, registry, &edge.0, edge.1).await?;
        seen.insert(edge, unpublished);
        unpublished
      }
    };
    if unpublished {
      count += 1;
    }
  }
  debug!(uid, document_id, count, "counted draft relations");
  Ok(count)
}
