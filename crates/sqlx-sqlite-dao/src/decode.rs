//! SQLite values to JSON

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteRow, SqliteValueRef};
use sqlx::{Column, Decode, Row, Sqlite, TypeInfo, ValueRef};

use crate::{Error, Result};

/// Decode one value by its storage class. Blobs become base64 text.
pub fn to_json(value: SqliteValueRef<'_>) -> Result<JsonValue> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_name = value.type_info().name().to_string();
   let decoded = match type_name.as_str() {
      "INTEGER" => <i64 as Decode<Sqlite>>::decode(value).map(JsonValue::from),
      "REAL" => <f64 as Decode<Sqlite>>::decode(value).map(JsonValue::from),
      "TEXT" => <String as Decode<Sqlite>>::decode(value).map(JsonValue::String),
      "BLOB" => <Vec<u8> as Decode<Sqlite>>::decode(value)
         .map(|bytes| JsonValue::String(STANDARD.encode(bytes))),
      _ => return Err(Error::UnsupportedDatatype(type_name)),
   };

   decoded.map_err(|e| Error::Sqlx(sqlx::Error::Decode(e)))
}

/// Decode a row into column name → value, keeping column order
pub fn decode_row(row: &SqliteRow) -> Result<IndexMap<String, JsonValue>> {
   let mut value = IndexMap::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let v = row.try_get_raw(i)?;
      value.insert(column.name().to_string(), to_json(v)?);
   }
   Ok(value)
}

pub fn decode_rows(rows: Vec<SqliteRow>) -> Result<Vec<IndexMap<String, JsonValue>>> {
   rows.iter().map(decode_row).collect()
}
