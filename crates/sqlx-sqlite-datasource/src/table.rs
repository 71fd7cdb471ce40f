//! Table mapping and cached SQL generation.
//!
//! A record type describes its table once through [`Table::schema`]. The data
//! source turns that description into a [`TableSpec`], which validates it,
//! generates INSERT/UPDATE/DELETE/SELECT statements on first use and extracts
//! statement arguments from records in column order.
//!
//! Tables with a logical-delete column never lose rows through
//! [`TableSpec::delete_sql`]: the column is set to the deletion time instead,
//! and generated SELECTs only return rows where it is still `0`.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{Error, Result};

/// Declared shape of a table: name, key columns and persisted columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
   pub table: String,
   pub primary_key: String,
   /// Column holding the deletion time (`0` while the row is live)
   #[serde(default)]
   pub logical_delete_key: Option<String>,
   /// Persisted columns in declaration order, primary key included
   pub columns: Vec<String>,
   /// Columns maintained by the database, never written by UPDATE
   #[serde(default)]
   pub auto_update_columns: Vec<String>,
}

impl TableSchema {
   pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
      Self {
         table: table.into(),
         primary_key: primary_key.into(),
         logical_delete_key: None,
         columns: Vec::new(),
         auto_update_columns: Vec::new(),
      }
   }

   pub fn columns<I, S>(mut self, columns: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      self.columns = columns.into_iter().map(Into::into).collect();
      self
   }

   pub fn logical_delete(mut self, column: impl Into<String>) -> Self {
      self.logical_delete_key = Some(column.into());
      self
   }

   pub fn auto_update<I, S>(mut self, columns: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      self.auto_update_columns = columns.into_iter().map(Into::into).collect();
      self
   }
}

/// A record persisted in one table.
///
/// # Example
///
/// ```
/// use serde_json::{Value, json};
/// use sqlx_sqlite_datasource::{Table, TableSchema};
///
/// struct User {
///     id: i64,
///     name: String,
///     deleted_at: i64,
/// }
///
/// impl Table for User {
///     fn schema() -> TableSchema {
///         TableSchema::new("users", "id")
///             .columns(["id", "name", "deleted_at"])
///             .logical_delete("deleted_at")
///     }
///
///     fn table_name(&self) -> &str {
///         "users"
///     }
///
///     fn column_value(&self, column: &str) -> Option<Value> {
///         match column {
///             "id" => Some(json!(self.id)),
///             "name" => Some(json!(self.name)),
///             "deleted_at" => Some(json!(self.deleted_at)),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait Table: Send + Sync {
   /// Schema used to register the record type with a data source
   fn schema() -> TableSchema
   where
      Self: Sized;

   fn table_name(&self) -> &str;

   /// Value stored in `column`, or `None` if the record has no such column
   fn column_value(&self, column: &str) -> Option<JsonValue>;
}

/// Validated schema plus the SQL generated from it.
///
/// Immutable once built; statements are generated at most once per spec.
#[derive(Debug)]
pub struct TableSpec {
   schema: TableSchema,
   column_index: HashMap<String, usize>,
   auto_update: HashSet<String>,
   insert_sql: OnceLock<String>,
   update_sql: OnceLock<String>,
   delete_one_sql: OnceLock<String>,
   select_one_sql: OnceLock<String>,
}

impl TableSpec {
   pub fn new(schema: TableSchema) -> Result<Self> {
      let invalid = |reason: String| Error::InvalidTableSchema {
         table: schema.table.clone(),
         reason,
      };

      if !is_identifier(&schema.table) {
         return Err(invalid("table name must match [A-Za-z_][A-Za-z0-9_]*".into()));
      }

      let mut column_index = HashMap::with_capacity(schema.columns.len());
      for (i, column) in schema.columns.iter().enumerate() {
         if !is_identifier(column) {
            return Err(invalid(format!("invalid column name '{column}'")));
         }
         if column_index.insert(column.clone(), i).is_some() {
            return Err(invalid(format!("duplicate column '{column}'")));
         }
      }

      if !column_index.contains_key(&schema.primary_key) {
         return Err(invalid(format!(
            "primary key '{}' is not a persisted column",
            schema.primary_key
         )));
      }
      if let Some(delete_key) = &schema.logical_delete_key {
         if delete_key == &schema.primary_key || !column_index.contains_key(delete_key) {
            return Err(invalid(format!(
               "logical delete column '{delete_key}' is not a persisted non-key column"
            )));
         }
      }
      for column in &schema.auto_update_columns {
         if !column_index.contains_key(column) {
            return Err(invalid(format!(
               "auto update column '{column}' is not a persisted column"
            )));
         }
      }

      let auto_update = schema.auto_update_columns.iter().cloned().collect();
      Ok(Self {
         schema,
         column_index,
         auto_update,
         insert_sql: OnceLock::new(),
         update_sql: OnceLock::new(),
         delete_one_sql: OnceLock::new(),
         select_one_sql: OnceLock::new(),
      })
   }

   pub fn table_name(&self) -> &str {
      &self.schema.table
   }

   pub fn primary_key(&self) -> &str {
      &self.schema.primary_key
   }

   pub fn logical_delete_key(&self) -> Option<&str> {
      self.schema.logical_delete_key.as_deref()
   }

   pub fn is_logical_delete(&self) -> bool {
      self.schema.logical_delete_key.is_some()
   }

   pub fn columns(&self) -> &[String] {
      &self.schema.columns
   }

   pub fn schema(&self) -> &TableSchema {
      &self.schema
   }

   /// Position of `column` in the persisted column list
   pub fn column_index(&self, column: &str) -> Option<usize> {
      self.column_index.get(column).copied()
   }

   /// True when a read target declares the same table and column order.
   pub fn matches_schema(&self, schema: &TableSchema) -> bool {
      schema.table == self.schema.table && schema.columns == self.schema.columns
   }

   fn is_delete_key(&self, column: &str) -> bool {
      self.logical_delete_key() == Some(column)
   }

   fn insert_columns(&self) -> impl Iterator<Item = &String> {
      let pk = self.primary_key();
      self.schema.columns.iter().filter(move |c| c.as_str() != pk)
   }

   fn update_columns(&self) -> impl Iterator<Item = &String> {
      self
         .insert_columns()
         .filter(move |c| !self.is_delete_key(c) && !self.auto_update.contains(*c))
   }

   pub fn insert_sql(&self) -> &str {
      self.insert_sql.get_or_init(|| {
         let (columns, values): (Vec<&str>, Vec<&str>) = self
            .insert_columns()
            .map(|c| {
               if self.is_delete_key(c) {
                  (c.as_str(), "0")
               } else {
                  (c.as_str(), "?")
               }
            })
            .unzip();
         format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_name(),
            columns.join(","),
            values.join(",")
         )
      })
   }

   pub fn update_sql(&self) -> &str {
      self.update_sql.get_or_init(|| {
         let assignments: Vec<String> = self.update_columns().map(|c| format!("{c} = ?")).collect();
         format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.table_name(),
            assignments.join(","),
            self.primary_key()
         )
      })
   }

   /// DELETE (or logical-delete UPDATE) for `count` ids. `count` must be at
   /// least 1; the single-id statement is cached.
   ///
   /// For logical-delete tables the first argument is the deletion time, see
   /// [`TableSpec::delete_args`].
   pub fn delete_sql(&self, count: usize) -> String {
      if count == 1 {
         return self
            .delete_one_sql
            .get_or_init(|| self.build_delete_sql(1))
            .clone();
      }
      self.build_delete_sql(count)
   }

   fn build_delete_sql(&self, count: usize) -> String {
      let filter = key_filter(self.primary_key(), count);
      match self.logical_delete_key() {
         Some(delete_key) => format!(
            "UPDATE {} SET {} = ? WHERE {}",
            self.table_name(),
            delete_key,
            filter
         ),
         None => format!("DELETE FROM {} WHERE {}", self.table_name(), filter),
      }
   }

   /// SELECT of every persisted column for `count` ids, hiding logically
   /// deleted rows. The single-id statement is cached.
   pub fn select_sql(&self, count: usize) -> String {
      if count == 1 {
         return self
            .select_one_sql
            .get_or_init(|| self.build_select_sql(1))
            .clone();
      }
      self.build_select_sql(count)
   }

   fn build_select_sql(&self, count: usize) -> String {
      let mut sql = format!(
         "SELECT {} FROM {} WHERE {}",
         self.schema.columns.join(","),
         self.table_name(),
         key_filter(self.primary_key(), count)
      );
      if let Some(delete_key) = self.logical_delete_key() {
         sql.push_str(&format!(" AND {delete_key} = 0"));
      }
      sql
   }

   fn check_table(&self, model: &dyn Table) -> Result<()> {
      if model.table_name() != self.table_name() {
         return Err(Error::InvalidArgument(format!(
            "record for table '{}' passed to table '{}'",
            model.table_name(),
            self.table_name()
         )));
      }
      Ok(())
   }

   fn extract<'a>(
      &self,
      model: &dyn Table,
      columns: impl Iterator<Item = &'a String>,
   ) -> Result<Vec<JsonValue>> {
      columns
         .map(|column| {
            model.column_value(column).ok_or_else(|| Error::UnmappedColumn {
               table: self.table_name().to_string(),
               column: column.clone(),
            })
         })
         .collect()
   }

   /// Arguments for [`TableSpec::insert_sql`], in column order
   pub fn insert_values(&self, model: &dyn Table) -> Result<Vec<JsonValue>> {
      self.check_table(model)?;
      self.extract(model, self.insert_columns().filter(|c| !self.is_delete_key(c)))
   }

   /// Arguments for [`TableSpec::update_sql`]: column values, then the key
   pub fn update_values(&self, model: &dyn Table) -> Result<Vec<JsonValue>> {
      self.check_table(model)?;
      if self.update_columns().next().is_none() {
         return Err(Error::InvalidArgument(format!(
            "table '{}' has no updatable columns",
            self.table_name()
         )));
      }
      let id = self.model_id(model)?;
      let mut values = self.extract(model, self.update_columns())?;
      values.push(JsonValue::from(id));
      Ok(values)
   }

   /// Primary key of a record; must be a positive integer.
   pub fn model_id(&self, model: &dyn Table) -> Result<i64> {
      let value = model
         .column_value(self.primary_key())
         .ok_or_else(|| Error::UnmappedColumn {
            table: self.table_name().to_string(),
            column: self.primary_key().to_string(),
         })?;
      match value.as_i64() {
         Some(id) if id > 0 => Ok(id),
         _ => Err(Error::InvalidArgument(format!(
            "primary key of '{}' record must be a positive integer, got {value}",
            self.table_name()
         ))),
      }
   }

   /// Arguments for [`TableSpec::delete_sql`]
   pub fn delete_args(&self, ids: &[i64]) -> Result<Vec<JsonValue>> {
      validate_ids(ids)?;
      let mut args = Vec::with_capacity(ids.len() + 1);
      if self.is_logical_delete() {
         args.push(JsonValue::from(unix_now()));
      }
      args.extend(ids.iter().map(|id| JsonValue::from(*id)));
      Ok(args)
   }
}

/// Reject empty id lists and ids that can never name a row.
pub fn validate_ids(ids: &[i64]) -> Result<()> {
   if ids.is_empty() {
      return Err(Error::InvalidArgument("id list is empty".into()));
   }
   if let Some(id) = ids.iter().find(|id| **id <= 0) {
      return Err(Error::InvalidArgument(format!(
         "id must be a positive integer, got {id}"
      )));
   }
   Ok(())
}

/// `(?,?,...)` with `size` placeholders
pub fn sql_in_values(size: usize) -> String {
   format!("({})", vec!["?"; size].join(","))
}

/// Current time in epoch seconds
pub fn unix_now() -> i64 {
   time::OffsetDateTime::now_utc().unix_timestamp()
}

fn key_filter(primary_key: &str, count: usize) -> String {
   if count == 1 {
      format!("{primary_key} = ?")
   } else {
      format!("{primary_key} IN {}", sql_in_values(count))
   }
}

fn is_identifier(name: &str) -> bool {
   let mut chars = name.chars();
   match chars.next() {
      Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
      _ => return false,
   }
   chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   struct Article {
      id: i64,
      title: String,
      body: String,
      deleted_at: i64,
      updated_at: i64,
   }

   impl Table for Article {
      fn schema() -> TableSchema {
         TableSchema::new("articles", "id")
            .columns(["id", "title", "body", "deleted_at", "updated_at"])
            .logical_delete("deleted_at")
            .auto_update(["updated_at"])
      }

      fn table_name(&self) -> &str {
         "articles"
      }

      fn column_value(&self, column: &str) -> Option<JsonValue> {
         match column {
            "id" => Some(json!(self.id)),
            "title" => Some(json!(self.title)),
            "body" => Some(json!(self.body)),
            "deleted_at" => Some(json!(self.deleted_at)),
            "updated_at" => Some(json!(self.updated_at)),
            _ => None,
         }
      }
   }

   fn article(id: i64) -> Article {
      Article {
         id,
         title: "t".into(),
         body: "b".into(),
         deleted_at: 0,
         updated_at: 7,
      }
   }

   fn hard_spec() -> TableSpec {
      TableSpec::new(TableSchema::new("notes", "id").columns(["id", "text", "rank"])).unwrap()
   }

   #[test]
   fn test_insert_sql_forces_delete_column_to_zero() {
      let spec = TableSpec::new(Article::schema()).unwrap();
      assert_eq!(
         spec.insert_sql(),
         "INSERT INTO articles (title,body,deleted_at,updated_at) VALUES (?,?,0,?)"
      );
      assert_eq!(
         spec.insert_values(&article(0)).unwrap(),
         vec![json!("t"), json!("b"), json!(7)]
      );
   }

   #[test]
   fn test_update_sql_skips_key_delete_and_auto_columns() {
      let spec = TableSpec::new(Article::schema()).unwrap();
      assert_eq!(
         spec.update_sql(),
         "UPDATE articles SET title = ?,body = ? WHERE id = ?"
      );
      // Primary key goes last, matching the WHERE tail
      assert_eq!(
         spec.update_values(&article(9)).unwrap(),
         vec![json!("t"), json!("b"), json!(9)]
      );
   }

   #[test]
   fn test_update_rejects_zero_key() {
      let spec = TableSpec::new(Article::schema()).unwrap();
      let err = spec.update_values(&article(0)).unwrap_err();
      assert_eq!(err.error_code(), "INVALID_ARGUMENT");
   }

   #[test]
   fn test_delete_sql_logical_and_hard() {
      let logical = TableSpec::new(Article::schema()).unwrap();
      assert_eq!(
         logical.delete_sql(1),
         "UPDATE articles SET deleted_at = ? WHERE id = ?"
      );
      assert_eq!(
         logical.delete_sql(3),
         "UPDATE articles SET deleted_at = ? WHERE id IN (?,?,?)"
      );

      let hard = hard_spec();
      assert_eq!(hard.delete_sql(1), "DELETE FROM notes WHERE id = ?");
      assert_eq!(hard.delete_sql(2), "DELETE FROM notes WHERE id IN (?,?)");
   }

   #[test]
   fn test_delete_args_prepend_timestamp_for_logical_delete() {
      let logical = TableSpec::new(Article::schema()).unwrap();
      let before = unix_now();
      let args = logical.delete_args(&[4, 5]).unwrap();
      assert_eq!(args.len(), 3);
      assert!(args[0].as_i64().unwrap() >= before);
      assert_eq!(&args[1..], &[json!(4), json!(5)]);

      let hard = hard_spec();
      assert_eq!(hard.delete_args(&[4]).unwrap(), vec![json!(4)]);
      assert!(hard.delete_args(&[]).is_err());
      assert!(hard.delete_args(&[1, 0]).is_err());
   }

   #[test]
   fn test_select_sql_hides_deleted_rows() {
      let logical = TableSpec::new(Article::schema()).unwrap();
      assert_eq!(
         logical.select_sql(1),
         "SELECT id,title,body,deleted_at,updated_at FROM articles WHERE id = ? AND deleted_at = 0"
      );
      assert_eq!(
         hard_spec().select_sql(2),
         "SELECT id,text,rank FROM notes WHERE id IN (?,?)"
      );
   }

   #[test]
   fn test_generated_sql_is_cached() {
      let spec = hard_spec();
      let first = spec.insert_sql().as_ptr();
      let second = spec.insert_sql().as_ptr();
      assert_eq!(first, second);
   }

   #[test]
   fn test_invalid_schemas() {
      let missing_pk = TableSchema::new("t", "id").columns(["name"]);
      assert!(TableSpec::new(missing_pk).is_err());

      let bad_delete = TableSchema::new("t", "id")
         .columns(["id", "name"])
         .logical_delete("removed");
      assert!(TableSpec::new(bad_delete).is_err());

      let duplicate = TableSchema::new("t", "id").columns(["id", "name", "name"]);
      assert!(TableSpec::new(duplicate).is_err());

      let injection = TableSchema::new("t; DROP TABLE x", "id").columns(["id"]);
      let err = TableSpec::new(injection).unwrap_err();
      assert_eq!(err.error_code(), "INVALID_TABLE_SCHEMA");
   }

   #[test]
   fn test_unmapped_column() {
      let spec = TableSpec::new(
         TableSchema::new("articles", "id").columns(["id", "title", "summary"]),
      )
      .unwrap();
      let err = spec.insert_values(&article(1)).unwrap_err();
      assert!(matches!(err, Error::UnmappedColumn { ref column, .. } if column == "summary"));
   }

   #[test]
   fn test_record_for_other_table_is_rejected() {
      let err = hard_spec().insert_values(&article(1)).unwrap_err();
      assert_eq!(err.error_code(), "INVALID_ARGUMENT");
   }

   #[test]
   fn test_sql_in_values() {
      assert_eq!(sql_in_values(1), "(?)");
      assert_eq!(sql_in_values(3), "(?,?,?)");
   }
}
