//! Table-oriented access to one data source.
//!
//! Writes are grouped by table, turned into queued writer tasks and awaited
//! group by group. Reads go straight to the read-only pool.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Pool, Sqlite};
use sqlx_sqlite_datasource::{
   SqlResult, SqliteDataSource, Table, TableSpec, TaskArgs, bind_all, validate_ids,
};
use tracing::debug;

use crate::decode::{decode_row, decode_rows};
use crate::{Error, Result};

/// DAO over a single data source. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Dao {
   ds: Arc<SqliteDataSource>,
}

/// Records of one table, in call order
struct Group<'a> {
   spec: Arc<TableSpec>,
   models: Vec<&'a dyn Table>,
}

impl Dao {
   pub fn new(ds: Arc<SqliteDataSource>) -> Self {
      Self { ds }
   }

   pub fn data_source_id(&self) -> &str {
      self.ds.id()
   }

   pub fn data_source(&self) -> &Arc<SqliteDataSource> {
      &self.ds
   }

   /// Read-only pool for queries the DAO does not generate
   pub fn reader(&self) -> Result<&Pool<Sqlite>> {
      Ok(self.ds.read_pool()?)
   }

   /// Run a CREATE statement through the writer. Blank input does nothing.
   pub async fn create(&self, ddl: &str) -> Result<()> {
      let ddl = ddl.trim();
      if ddl.is_empty() {
         return Ok(());
      }

      let is_create = ddl
         .split_whitespace()
         .next()
         .is_some_and(|keyword| keyword.eq_ignore_ascii_case("CREATE"));
      if !is_create {
         return Err(Error::NotCreateStatement(ddl.to_string()));
      }

      self.ds.execute(ddl, Vec::new()).await?;
      Ok(())
   }

   /// Insert records, possibly of several tables.
   ///
   /// Returns the generated keys grouped by table in first-seen order, each
   /// group in call order. Every table is written in its own transaction, so
   /// a failing group leaves earlier groups committed.
   pub async fn table_insert(&self, models: &[&dyn Table]) -> Result<Vec<i64>> {
      let tasks = self
         .group(models)?
         .into_values()
         .map(|group| -> Result<(String, TaskArgs)> {
            let rows = group
               .models
               .iter()
               .map(|model| group.spec.insert_values(*model))
               .collect::<sqlx_sqlite_datasource::Result<Vec<_>>>()?;
            Ok((group.spec.insert_sql().to_string(), task_args(rows)))
         })
         .collect::<Result<Vec<_>>>()?;

      let mut ids = Vec::with_capacity(models.len());
      for (sql, args) in tasks {
         ids.extend(self.ds.submit(sql, args).await?.last_insert_ids);
      }
      Ok(ids)
   }

   /// Update records by primary key. Returns the number of rows changed.
   pub async fn table_update(&self, models: &[&dyn Table]) -> Result<u64> {
      let tasks = self
         .group(models)?
         .into_values()
         .map(|group| -> Result<(String, TaskArgs)> {
            let rows = group
               .models
               .iter()
               .map(|model| group.spec.update_values(*model))
               .collect::<sqlx_sqlite_datasource::Result<Vec<_>>>()?;
            Ok((group.spec.update_sql().to_string(), task_args(rows)))
         })
         .collect::<Result<Vec<_>>>()?;

      let mut rows_affected = 0;
      for (sql, args) in tasks {
         rows_affected += self.ds.submit(sql, args).await?.rows_affected;
      }
      Ok(rows_affected)
   }

   /// Delete rows of `table` by primary key.
   ///
   /// Tables with a logical delete column are stamped with the current time
   /// instead of losing rows.
   pub async fn table_delete(&self, table: &str, ids: &[i64]) -> Result<u64> {
      let spec = self.spec(table)?;
      if ids.is_empty() {
         return Ok(0);
      }

      let args = spec.delete_args(ids)?;
      let result = self.ds.execute(spec.delete_sql(ids.len()), args).await?;
      debug!(table, ids = ids.len(), rows = result.rows_affected, "deleted");
      Ok(result.rows_affected)
   }

   /// Fetch one live record by primary key
   pub async fn table_get<T>(&self, id: i64) -> Result<Option<T>>
   where
      T: Table + for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
   {
      if id <= 0 {
         return Err(Error::InvalidArgument(format!(
            "id must be a positive integer, got {id}"
         )));
      }
      let spec = self.read_spec::<T>()?;
      let sql = spec.select_sql(1);

      let record = sqlx::query_as::<_, T>(&sql)
         .bind(id)
         .fetch_optional(self.reader()?)
         .await?;
      Ok(record)
   }

   /// Fetch the live records among `ids`. Missing ids are skipped.
   pub async fn table_select<T>(&self, ids: &[i64]) -> Result<Vec<T>>
   where
      T: Table + for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
   {
      validate_ids(ids)?;
      let spec = self.read_spec::<T>()?;
      let sql = spec.select_sql(ids.len());

      let mut query = sqlx::query_as::<_, T>(&sql);
      for id in ids {
         query = query.bind(*id);
      }
      Ok(query.fetch_all(self.reader()?).await?)
   }

   /// Run any write statement through the writer queue
   pub async fn execute(
      &self,
      sql: impl Into<String>,
      values: Vec<JsonValue>,
   ) -> Result<SqlResult> {
      Ok(self.ds.execute(sql, values).await?)
   }

   /// Execute a SELECT on the read pool, rows decoded to JSON
   pub async fn fetch_all(
      &self,
      query: &str,
      values: Vec<JsonValue>,
   ) -> Result<Vec<IndexMap<String, JsonValue>>> {
      let rows = bind_all(sqlx::query(query), values)
         .fetch_all(self.reader()?)
         .await?;
      decode_rows(rows)
   }

   /// Execute a SELECT expecting zero or one row
   pub async fn fetch_one(
      &self,
      query: &str,
      values: Vec<JsonValue>,
   ) -> Result<Option<IndexMap<String, JsonValue>>> {
      // Two rows are enough to tell one from many
      let limited_query = format!("{} LIMIT 2", query.trim().trim_end_matches(';'));

      let rows = bind_all(sqlx::query(&limited_query), values)
         .fetch_all(self.reader()?)
         .await?;

      match rows.as_slice() {
         [] => Ok(None),
         [row] => Ok(Some(decode_row(row)?)),
         _ => Err(Error::MultipleRowsReturned(rows.len())),
      }
   }

   fn spec(&self, table: &str) -> Result<Arc<TableSpec>> {
      self
         .ds
         .table_spec(table)
         .ok_or_else(|| Error::TableSpecNotFound(table.to_string()))
   }

   fn read_spec<T: Table>(&self) -> Result<Arc<TableSpec>> {
      let schema = T::schema();
      let spec = self.spec(&schema.table)?;
      if !spec.matches_schema(&schema) {
         return Err(Error::ShapeMismatch {
            table: schema.table,
         });
      }
      Ok(spec)
   }

   fn group<'a>(&self, models: &[&'a dyn Table]) -> Result<IndexMap<String, Group<'a>>> {
      let mut groups: IndexMap<String, Group<'a>> = IndexMap::new();
      for model in models {
         let table = model.table_name();
         if let Some(group) = groups.get_mut(table) {
            group.models.push(*model);
            continue;
         }
         groups.insert(
            table.to_string(),
            Group {
               spec: self.spec(table)?,
               models: vec![*model],
            },
         );
      }
      Ok(groups)
   }
}

/// One row runs as a plain statement, several as a batch
fn task_args(mut rows: Vec<Vec<JsonValue>>) -> TaskArgs {
   if rows.len() == 1
      && let Some(row) = rows.pop()
   {
      return TaskArgs::Single(row);
   }
   TaskArgs::Batch(rows)
}
