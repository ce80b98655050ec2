//! A small transactional query builder.
//!
//! Queries are plain data until [`QueryBuilder::execute`] compiles them to
//! one SQL statement (or one per row for inserts) and runs them on the
//! builder's transaction. A builder without `.transacting(..)` refuses to run.

use folio_core::{
  document::{SortOrder, fields},
  filter::{Condition, Filter},
};
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
  Error, Result,
  encode::{from_sql, to_sql},
  transaction::Transaction,
};

/// One result row, keyed by column name or alias.
pub type Row = Map<String, Value>;

/// Double-quote an identifier.
pub fn quote(ident: &str) -> String { format!("\"{}\"", ident.replace('"', "\"\"")) }

// ─── Column mapping ──────────────────────────────────────────────────────────

/// How filter and sort names resolve to SQL expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Columns {
  /// Names are raw column names.
  #[default]
  Raw,
  /// Names are document attributes: system fields map to their columns,
  /// everything else is read from the JSON `data` column.
  Document,
}

impl Columns {
  pub fn resolve(self, name: &str) -> String {
    match self {
      Self::Raw => quote(name),
      Self::Document => match name {
        fields::ID => quote("id"),
        fields::DOCUMENT_ID => quote("document_id"),
        fields::LOCALE => quote("locale"),
        fields::PUBLISHED_AT => quote("published_at"),
        fields::CREATED_AT => quote("created_at"),
        fields::UPDATED_AT => quote("updated_at"),
        attribute => format!(
          "json_extract(\"data\", '$.\"{}\"')",
          attribute.replace('\'', "''").replace('"', "\\\"")
        ),
      },
    }
  }
}

// ─── Filter compilation ──────────────────────────────────────────────────────

fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

fn compile_condition(
  column: &str,
  condition: &Condition,
  params: &mut Vec<SqlValue>,
) -> String {
  match condition {
    Condition::Eq(Value::Null) | Condition::Null => format!("{column} IS NULL"),
    Condition::Ne(Value::Null) | Condition::NotNull => format!("{column} IS NOT NULL"),
    Condition::Eq(v) => {
      params.push(to_sql(v));
      format!("{column} = ?")
    }
    Condition::Ne(v) => {
      params.push(to_sql(v));
      format!("{column} IS NOT ?")
    }
    Condition::In(values) if values.is_empty() => "0 = 1".to_owned(),
    Condition::NotIn(values) if values.is_empty() => "1 = 1".to_owned(),
    Condition::In(values) => {
      params.extend(values.iter().map(to_sql));
      format!("{column} IN ({})", placeholders(values.len()))
    }
    Condition::NotIn(values) => {
      params.extend(values.iter().map(to_sql));
      format!("{column} NOT IN ({})", placeholders(values.len()))
    }
    Condition::Lt(v) => {
      params.push(to_sql(v));
      format!("{column} < ?")
    }
    Condition::Gt(v) => {
      params.push(to_sql(v));
      format!("{column} > ?")
    }
    Condition::Contains(needle) => {
      params.push(SqlValue::Text(format!("%{needle}%")));
      format!("{column} LIKE ?")
    }
  }
}

/// Compile `filter` to a SQL boolean expression, appending its bindings to
/// `params` in placeholder order.
pub fn compile_filter(filter: &Filter, columns: Columns, params: &mut Vec<SqlValue>) -> String {
  match filter {
    Filter::Field(name, condition) => {
      compile_condition(&columns.resolve(name), condition, params)
    }
    Filter::And(parts) if parts.is_empty() => "1 = 1".to_owned(),
    Filter::Or(parts) if parts.is_empty() => "0 = 1".to_owned(),
    Filter::And(parts) => join(parts, " AND ", columns, params),
    Filter::Or(parts) => join(parts, " OR ", columns, params),
    Filter::Not(inner) => format!("NOT ({})", compile_filter(inner, columns, params)),
  }
}

fn join(parts: &[Filter], op: &str, columns: Columns, params: &mut Vec<SqlValue>) -> String {
  let compiled: Vec<String> = parts
    .iter()
    .map(|part| format!("({})", compile_filter(part, columns, params)))
    .collect();
  compiled.join(op)
}

// ─── Builder ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Selection {
  Column(String),
  Max { column: String, alias: String },
  Count { alias: String },
}

#[derive(Debug, Clone)]
enum Kind {
  Select(Vec<Selection>),
  Insert(Vec<Row>),
  Update(Row),
  Delete,
}

/// Result of [`QueryBuilder::execute`].
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
  /// Selected rows; empty for writes.
  pub rows:     Vec<Row>,
  /// Rows changed by a write.
  pub affected: usize,
  /// Row ids assigned by an insert, in input order.
  pub inserted: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
  table:    String,
  columns:  Columns,
  kind:     Kind,
  filter:   Option<Filter>,
  group_by: Vec<String>,
  order_by: Vec<(String, SortOrder)>,
  limit:    Option<usize>,
  offset:   Option<usize>,
  trx:      Option<Transaction>,
}

impl QueryBuilder {
  /// A `SELECT *` over `table` with raw column names.
  pub fn new(table: impl Into<String>) -> Self {
    Self {
      table:    table.into(),
      columns:  Columns::Raw,
      kind:     Kind::Select(Vec::new()),
      filter:   None,
      group_by: Vec::new(),
      order_by: Vec::new(),
      limit:    None,
      offset:   None,
      trx:      None,
    }
  }

  /// Like [`Self::new`], but filter and sort names are document attributes.
  pub fn documents(table: impl Into<String>) -> Self {
    Self { columns: Columns::Document, ..Self::new(table) }
  }

  pub fn select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
    self.push_selection(columns.into_iter().map(|c| Selection::Column(c.into())));
    self
  }

  pub fn max(mut self, column: impl Into<String>, alias: impl Into<String>) -> Self {
    self.push_selection([Selection::Max { column: column.into(), alias: alias.into() }]);
    self
  }

  pub fn count(mut self, alias: impl Into<String>) -> Self {
    self.push_selection([Selection::Count { alias: alias.into() }]);
    self
  }

  pub fn group_by(mut self, column: impl Into<String>) -> Self {
    self.group_by.push(column.into());
    self
  }

  pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
    self.order_by.push((column.into(), order));
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn offset(mut self, offset: usize) -> Self {
    self.offset = Some(offset);
    self
  }

  /// Add a condition; repeated calls are ANDed.
  pub fn where_(mut self, filter: Filter) -> Self {
    self.filter = Some(match self.filter.take() {
      Some(existing) => existing.and(filter),
      None => filter,
    });
    self
  }

  pub fn insert(mut self, rows: Vec<Row>) -> Self {
    self.kind = Kind::Insert(rows);
    self
  }

  pub fn update(mut self, row: Row) -> Self {
    self.kind = Kind::Update(row);
    self
  }

  pub fn delete(mut self) -> Self {
    self.kind = Kind::Delete;
    self
  }

  pub fn transacting(mut self, trx: &Transaction) -> Self {
    self.trx = Some(trx.clone());
    self
  }

  fn push_selection(&mut self, items: impl IntoIterator<Item = Selection>) {
    match &mut self.kind {
      Kind::Select(selection) => selection.extend(items),
      other => *other = Kind::Select(items.into_iter().collect()),
    }
  }

  fn where_clause(&self, params: &mut Vec<SqlValue>) -> String {
    self
      .filter
      .as_ref()
      .map(|f| format!(" WHERE {}", compile_filter(f, self.columns, params)))
      .unwrap_or_default()
  }

  /// The compiled statements with their bindings. Inserts compile to one
  /// statement per row.
  pub fn to_sql(&self) -> Vec<(String, Vec<SqlValue>)> {
    let table = quote(&self.table);
    match &self.kind {
      Kind::Select(selection) => {
        let mut params = Vec::new();
        let columns = if selection.is_empty() {
          "*".to_owned()
        } else {
          selection
            .iter()
            .map(|s| match s {
              Selection::Column(c) => quote(c),
              Selection::Max { column, alias } => {
                format!("MAX({}) AS {}", self.columns.resolve(column), quote(alias))
              }
              Selection::Count { alias } => format!("COUNT(*) AS {}", quote(alias)),
            })
            .collect::<Vec<_>>()
            .join(", ")
        };
        let mut sql = format!("SELECT {columns} FROM {table}");
        sql.push_str(&self.where_clause(&mut params));
        if !self.group_by.is_empty() {
          let groups: Vec<String> =
            self.group_by.iter().map(|c| self.columns.resolve(c)).collect();
          sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }
        if !self.order_by.is_empty() {
          let orders: Vec<String> = self
            .order_by
            .iter()
            .map(|(c, o)| {
              let dir = match o {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
              };
              format!("{} {dir}", self.columns.resolve(c))
            })
            .collect();
          sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }
        match (self.limit, self.offset) {
          (Some(limit), offset) => {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {}", offset.unwrap_or(0)))
          }
          (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
          (None, None) => {}
        }
        vec![(sql, params)]
      }
      Kind::Insert(rows) => rows
        .iter()
        .map(|row| {
          if row.is_empty() {
            return (format!("INSERT INTO {table} DEFAULT VALUES"), Vec::new());
          }
          let columns: Vec<String> = row.keys().map(|c| quote(c)).collect();
          let params: Vec<SqlValue> = row.values().map(to_sql).collect();
          let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders(params.len())
          );
          (sql, params)
        })
        .collect(),
      Kind::Update(row) => {
        let mut params: Vec<SqlValue> = row.values().map(to_sql).collect();
        let sets: Vec<String> = row.keys().map(|c| format!("{} = ?", quote(c))).collect();
        let mut sql = format!("UPDATE {table} SET {}", sets.join(", "));
        sql.push_str(&self.where_clause(&mut params));
        vec![(sql, params)]
      }
      Kind::Delete => {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {table}");
        sql.push_str(&self.where_clause(&mut params));
        vec![(sql, params)]
      }
    }
  }

  pub async fn execute(self) -> Result<QueryOutput> {
    let Some(trx) = self.trx.clone() else {
      return Err(Error::MissingTransaction(self.table));
    };
    let statements = self.to_sql();
    let is_select = matches!(self.kind, Kind::Select(_));
    let is_insert = matches!(self.kind, Kind::Insert(_));
    if let Kind::Update(row) = &self.kind
      && row.is_empty()
    {
      return Ok(QueryOutput::default());
    }
    debug!(table = %self.table, statements = statements.len(), "executing query");

    trx
      .call(move |conn| {
        let mut output = QueryOutput::default();
        for (sql, params) in statements {
          let mut stmt = conn.prepare_cached(&sql)?;
          if is_select {
            let names: Vec<String> =
              stmt.column_names().into_iter().map(str::to_owned).collect();
            let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
            while let Some(row) = rows.next()? {
              let mut out = Row::new();
              for (i, name) in names.iter().enumerate() {
                out.insert(name.clone(), from_sql(row.get_ref(i)?));
              }
              output.rows.push(out);
            }
          } else {
            output.affected += stmt.execute(rusqlite::params_from_iter(params))?;
            if is_insert {
              output.inserted.push(conn.last_insert_rowid());
            }
          }
        }
        Ok(output)
      })
      .await
  }
}
