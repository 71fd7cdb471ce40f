//! Binding JSON values as SQLite statement arguments

use serde_json::Value as JsonValue;
use sqlx::Sqlite;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;

/// A query with positional SQLite arguments
pub type SqliteQuery<'a> = Query<'a, Sqlite, SqliteArguments<'a>>;

/// Bind a JSON value to a SQLx query
///
/// Integers keep their precision as `i64`, booleans become `0`/`1`, and
/// arrays or objects are stored as JSON text.
pub fn bind_value(query: SqliteQuery<'_>, value: JsonValue) -> SqliteQuery<'_> {
   match value {
      JsonValue::Null => query.bind(None::<i64>),
      JsonValue::Bool(flag) => query.bind(i64::from(flag)),
      JsonValue::String(text) => query.bind(text),
      JsonValue::Number(number) => {
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Try to fit u64 into i64 (SQLite's INTEGER type)
            if uint_val <= i64::MAX as u64 {
               query.bind(uint_val as i64)
            } else {
               // Value too large for i64, use f64 (will lose precision)
               query.bind(uint_val as f64)
            }
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      other => query.bind(other),
   }
}

/// Bind every value in order
pub fn bind_all<'a>(mut query: SqliteQuery<'a>, values: Vec<JsonValue>) -> SqliteQuery<'a> {
   for value in values {
      query = bind_value(query, value);
   }
   query
}
