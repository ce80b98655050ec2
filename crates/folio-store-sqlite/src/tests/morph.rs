use folio_core::{
  document::{Document, Params},
  filter::Filter,
};
use serde_json::{Value, json};

use super::{CATEGORY, FILE, PRODUCT, assert_dense, create, data, database_with, int, partitions, rows};
use crate::{
  Database, Documents, ReorderStrategy, Row,
  morph::{MorphDelete, RelIds, clean_morph_order_columns, delete_morph_relations},
};

const STRATEGIES: [ReorderStrategy; 2] = [ReorderStrategy::UpdateFrom, ReorderStrategy::Correlated];

const MORPH_TABLE: &str = "files_related_mph";

async fn documents_with(strategy: ReorderStrategy) -> Documents {
  Documents::new(database_with(strategy).await)
}

async fn files(docs: &Documents, n: usize) -> Vec<i64> {
  let mut ids = Vec::with_capacity(n);
  for i in 0..n {
    ids.push(create(docs, FILE, json!({ "name": format!("file-{i}.png") })).await.id);
  }
  ids
}

async fn product(docs: &Documents, gallery: Value) -> Document {
  create(docs, PRODUCT, json!({ "name": "p", "gallery": gallery })).await
}

async fn update_product(docs: &Documents, product: &Document, value: Value) -> Document {
  docs
    .get(PRODUCT)
    .unwrap()
    .update(&product.document_id, Params::new().data(data(value)))
    .await
    .unwrap()
    .expect("product exists")
}

async fn morph_rows(db: &Database, field: &str) -> Vec<Row> {
  rows(db, MORPH_TABLE, Some(Filter::eq("field", field))).await
}

/// Owners of `file`'s partition, by position.
fn lineup(rows: &[Row], file: i64) -> Vec<i64> {
  let mut members: Vec<(i64, i64)> = rows
    .iter()
    .filter(|row| int(row, "file_id") == file)
    .map(|row| (int(row, "order"), int(row, "related_id")))
    .collect();
  members.sort_unstable();
  members.into_iter().map(|(_, owner)| owner).collect()
}

/// Like [`lineup`], with each owner's type.
fn typed_lineup(rows: &[Row], file: i64) -> Vec<(String, i64)> {
  let mut members: Vec<(i64, String, i64)> = rows
    .iter()
    .filter(|row| int(row, "file_id") == file)
    .map(|row| {
      let type_ = row["related_type"].as_str().unwrap_or_default().to_owned();
      (int(row, "order"), type_, int(row, "related_id"))
    })
    .collect();
  members.sort_unstable();
  members.into_iter().map(|(_, type_, owner)| (type_, owner)).collect()
}

/// Rows without their ids, for comparing table contents across rewrites.
fn without_ids(rows: &[Row]) -> Vec<Row> {
  rows
    .iter()
    .map(|row| {
      let mut row = row.clone();
      row.remove("id");
      row
    })
    .collect()
}

#[tokio::test]
async fn partitions_stay_dense_through_every_edit() {
  for strategy in STRATEGIES {
    let docs = documents_with(strategy).await;
    let db = docs.database().clone();
    let f = files(&docs, 2).await;

    let p1 = product(&docs, json!([f[0], f[1]])).await;
    let p2 = product(&docs, json!([f[0], f[1]])).await;
    let p3 = product(&docs, json!([f[0]])).await;

    let gallery = morph_rows(&db, "gallery").await;
    assert_dense(&gallery, "file_id", "order");
    assert_eq!(lineup(&gallery, f[0]), [p1.id, p2.id, p3.id]);

    update_product(&docs, &p2, json!({ "gallery": { "disconnect": [f[0]] } })).await;
    let gallery = morph_rows(&db, "gallery").await;
    assert_dense(&gallery, "file_id", "order");
    assert_eq!(lineup(&gallery, f[0]), [p1.id, p3.id]);

    update_product(&docs, &p1, json!({ "gallery": [f[1]] })).await;
    let gallery = morph_rows(&db, "gallery").await;
    assert_dense(&gallery, "file_id", "order");
    assert_eq!(lineup(&gallery, f[0]), [p3.id]);
    assert_eq!(lineup(&gallery, f[1]), [p2.id, p1.id], "{strategy:?}");

    update_product(&docs, &p3, json!({ "gallery": { "connect": [f[1]] } })).await;
    let gallery = morph_rows(&db, "gallery").await;
    assert_dense(&gallery, "file_id", "order");
    assert_eq!(lineup(&gallery, f[1]), [p2.id, p1.id, p3.id]);
  }
}

#[tokio::test]
async fn set_is_idempotent() {
  for strategy in STRATEGIES {
    let docs = documents_with(strategy).await;
    let db = docs.database().clone();
    let f = files(&docs, 2).await;

    let p1 = product(&docs, json!([])).await;
    product(&docs, json!([f[0], f[1]])).await;

    update_product(&docs, &p1, json!({ "gallery": { "set": [f[0], f[1]] } })).await;
    let once = without_ids(&morph_rows(&db, "gallery").await);
    update_product(&docs, &p1, json!({ "gallery": { "set": [f[0], f[1]] } })).await;
    let twice = without_ids(&morph_rows(&db, "gallery").await);

    assert_eq!(once, twice, "{strategy:?}");
    assert_dense(&morph_rows(&db, "gallery").await, "file_id", "order");
  }
}

#[tokio::test]
async fn reconnecting_an_edge_keeps_its_row() {
  for strategy in STRATEGIES {
    let docs = documents_with(strategy).await;
    let db = docs.database().clone();
    let f = files(&docs, 2).await;
    let p = product(&docs, json!([f[0]])).await;
    let before = morph_rows(&db, "gallery").await;

    update_product(&docs, &p, json!({ "gallery": { "connect": [f[0], f[1]] } })).await;
    update_product(
      &docs,
      &p,
      json!({ "gallery": { "connect": [f[0]], "disconnect": [f[0]] } }),
    )
    .await;

    let after = morph_rows(&db, "gallery").await;
    assert_eq!(after.len(), 2);
    assert_eq!(after[0]["id"], before[0]["id"], "{strategy:?}");
    assert_eq!(int(&after[1], "file_id"), f[1]);
  }
}

#[tokio::test]
async fn morph_one_keeps_a_single_value() {
  for strategy in STRATEGIES {
    let docs = documents_with(strategy).await;
    let db = docs.database().clone();
    let f = files(&docs, 2).await;

    let other = create(&docs, PRODUCT, json!({ "name": "other", "cover": f[0] })).await;
    let p = create(&docs, PRODUCT, json!({ "name": "p", "cover": f[0] })).await;
    assert_eq!(lineup(&morph_rows(&db, "cover").await, f[0]), [other.id, p.id]);

    // Writing from the file side: the product's previous cover row goes.
    let file = docs
      .get(FILE)
      .unwrap()
      .find_first(Params::new().filters(Filter::eq("id", f[1])))
      .await
      .unwrap()
      .unwrap();
    docs
      .get(FILE)
      .unwrap()
      .update(
        &file.document_id,
        Params::new().data(data(json!({
          "related": {
            "connect": [{ "id": p.id, "__type": PRODUCT, "__pivot": { "field": "cover" } }]
          }
        }))),
      )
      .await
      .unwrap();

    let covers = morph_rows(&db, "cover").await;
    let of_p: Vec<&Row> = covers.iter().filter(|r| int(r, "related_id") == p.id).collect();
    assert_eq!(of_p.len(), 1, "{strategy:?}");
    assert_eq!(int(of_p[0], "file_id"), f[1]);
    assert_eq!(lineup(&covers, f[0]), [other.id]);
    assert_dense(&covers, "file_id", "order");

    let loaded = docs
      .get(PRODUCT)
      .unwrap()
      .find_one(&p.document_id, Params::new().populate("cover"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(loaded.get("cover"), Some(&json!(f[1])));

    // Writing from the product side replaces the single value too.
    update_product(&docs, &p, json!({ "cover": { "connect": [f[0]] } })).await;
    let covers = morph_rows(&db, "cover").await;
    assert_eq!(lineup(&covers, f[0]), [other.id, p.id]);
    assert!(lineup(&covers, f[1]).is_empty());
  }
}

#[tokio::test]
async fn morph_one_eviction_covers_every_group() {
  for strategy in STRATEGIES {
    let docs = documents_with(strategy).await;
    let db = docs.database().clone();
    let f = files(&docs, 3).await;

    let other = create(&docs, PRODUCT, json!({ "name": "other", "cover": f[0] })).await;
    let p = create(&docs, PRODUCT, json!({ "name": "p", "cover": f[0] })).await;
    let c = create(&docs, CATEGORY, json!({ "name": "c", "icon": f[1] })).await;
    update_product(&docs, &other, json!({ "gallery": [f[1]] })).await;
    let of_product = |id: i64| (PRODUCT.to_owned(), id);
    let of_category = |id: i64| (CATEGORY.to_owned(), id);
    let all = rows(&db, MORPH_TABLE, None).await;
    assert_eq!(typed_lineup(&all, f[0]), [of_product(other.id), of_product(p.id)]);
    assert_eq!(typed_lineup(&all, f[1]), [of_category(c.id), of_product(other.id)]);

    // One payload claims both morphOne values for the third file.
    let file = docs
      .get(FILE)
      .unwrap()
      .find_first(Params::new().filters(Filter::eq("id", f[2])))
      .await
      .unwrap()
      .unwrap();
    docs
      .get(FILE)
      .unwrap()
      .update(
        &file.document_id,
        Params::new().data(data(json!({
          "related": [
            { "id": p.id, "__type": PRODUCT, "__pivot": { "field": "cover" } },
            { "id": c.id, "__type": CATEGORY, "__pivot": { "field": "icon" } }
          ]
        }))),
      )
      .await
      .unwrap();

    let all = rows(&db, MORPH_TABLE, None).await;
    assert_dense(&all, "file_id", "order");
    assert_eq!(typed_lineup(&all, f[0]), [of_product(other.id)], "{strategy:?}");
    assert_eq!(typed_lineup(&all, f[1]), [of_product(other.id)]);
    assert_eq!(typed_lineup(&all, f[2]), [of_product(p.id), of_category(c.id)]);

    let cover = docs
      .get(PRODUCT)
      .unwrap()
      .find_one(&p.document_id, Params::new().populate("cover"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(cover.get("cover"), Some(&json!(f[2])));
    let icon = docs
      .get(CATEGORY)
      .unwrap()
      .find_one(&c.document_id, Params::new().populate("icon"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(icon.get("icon"), Some(&json!(f[2])));
  }
}

#[tokio::test]
async fn deleting_every_edge_leaves_repair_to_the_caller() {
  for strategy in STRATEGIES {
    let docs = documents_with(strategy).await;
    let db = docs.database().clone();
    let f = files(&docs, 1).await;
    let p1 = product(&docs, json!([f[0]])).await;
    let p2 = product(&docs, json!([f[0]])).await;
    let p3 = product(&docs, json!([f[0]])).await;
    let owner = p2.id;

    let left = db
      .transaction(|trx| {
        let db = db.clone();
        async move {
          let jt = db.registry().morph_join_table(PRODUCT, "gallery")?;
          let target = MorphDelete {
            id:        owner,
            uid:       Some(PRODUCT),
            attribute: Some("gallery"),
            rel_ids:   RelIds::All,
          };
          delete_morph_relations(&trx, db.reorder(), jt, target).await
        }
      })
      .await
      .unwrap();
    assert_eq!(left, [f[0]]);
    assert_eq!(partitions(&morph_rows(&db, "gallery").await, "file_id", "order")[&f[0]], [1, 3]);

    db.transaction(|trx| {
      let db = db.clone();
      let left = left.clone();
      async move {
        let jt = db.registry().morph_join_table(PRODUCT, "gallery")?;
        clean_morph_order_columns(&trx, db.reorder(), jt, &left).await
      }
    })
    .await
    .unwrap();
    let gallery = morph_rows(&db, "gallery").await;
    assert_dense(&gallery, "file_id", "order");
    assert_eq!(lineup(&gallery, f[0]), [p1.id, p3.id], "{strategy:?}");
  }
}

#[tokio::test]
async fn deleting_by_target_repairs_the_partition() {
  for strategy in STRATEGIES {
    let docs = documents_with(strategy).await;
    let db = docs.database().clone();
    let f = files(&docs, 2).await;
    let p1 = product(&docs, json!([f[0], f[1]])).await;
    let p2 = product(&docs, json!([f[0]])).await;
    let (owner, file) = (p1.id, f[0]);

    db.transaction(|trx| {
      let db = db.clone();
      async move {
        let jt = db.registry().morph_join_table(PRODUCT, "gallery")?;
        let target = MorphDelete {
          id:        owner,
          uid:       Some(PRODUCT),
          attribute: Some("gallery"),
          rel_ids:   RelIds::Ids(vec![file]),
        };
        delete_morph_relations(&trx, db.reorder(), jt, target).await
      }
    })
    .await
    .unwrap();

    let gallery = morph_rows(&db, "gallery").await;
    assert_dense(&gallery, "file_id", "order");
    assert_eq!(lineup(&gallery, f[0]), [p2.id], "{strategy:?}");
    assert_eq!(lineup(&gallery, f[1]), [p1.id]);
  }
}

#[tokio::test]
async fn deleting_an_owner_repairs_its_targets() {
  for strategy in STRATEGIES {
    let docs = documents_with(strategy).await;
    let db = docs.database().clone();
    let f = files(&docs, 1).await;
    let p1 = product(&docs, json!([f[0]])).await;
    let p2 = product(&docs, json!([f[0]])).await;

    docs.get(PRODUCT).unwrap().delete(&p1.document_id, Params::new()).await.unwrap();

    let gallery = morph_rows(&db, "gallery").await;
    assert_eq!(lineup(&gallery, f[0]), [p2.id], "{strategy:?}");
    assert_dense(&gallery, "file_id", "order");
  }
}

#[tokio::test]
async fn pivot_values_are_stored_and_copied() {
  let docs = documents_with(ReorderStrategy::default()).await;
  let db = docs.database().clone();
  let f = files(&docs, 1).await;
  let p = product(
    &docs,
    json!([{ "id": f[0], "__pivot": { "caption": "front" } }]),
  )
  .await;

  let published = docs
    .get(PRODUCT)
    .unwrap()
    .publish(&p.document_id, Params::new())
    .await
    .unwrap();
  let published_id = published.entries[0].id;

  let gallery = morph_rows(&db, "gallery").await;
  assert_eq!(lineup(&gallery, f[0]), [p.id, published_id]);
  assert!(gallery.iter().all(|row| row["caption"] == "front"));
  assert_dense(&gallery, "file_id", "order");
}
