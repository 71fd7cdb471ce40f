//! Key/value storage with optional expiry, kept in its own SQLite file.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::{Value as JsonValue, json};
use sqlx_sqlite_dao::Dao;
use sqlx_sqlite_datasource::{Table, TableSchema, sql_in_values, unix_now};
use tracing::debug;

use crate::registry::DataSourceRegistry;
use crate::{Error, Result};

/// Data source id used by local storage
pub const LOCAL_STORAGE_ID: &str = "_local_storage";

/// Expiry of entries that never expire (2125-01-01T00:00:00Z)
pub const PERMANENT_EXPIRY: i64 = 4_891_334_400;

const STORAGE_DDL: [&str; 3] = [
   "CREATE TABLE IF NOT EXISTS storage (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      store_key TEXT NOT NULL DEFAULT '',
      store_value TEXT NOT NULL DEFAULT '',
      expired_at INTEGER NOT NULL DEFAULT 0
   )",
   "CREATE INDEX IF NOT EXISTS idx_storage_store_key ON storage (store_key)",
   "CREATE INDEX IF NOT EXISTS idx_storage_expired_at ON storage (expired_at)",
];

/// One stored entry
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StorageModel {
   pub id: i64,
   pub store_key: String,
   pub store_value: String,
   /// Epoch seconds after which the entry is gone
   pub expired_at: i64,
}

impl StorageModel {
   fn new(key: &str, value: &str, expired_at: i64) -> Self {
      Self {
         id: 0,
         store_key: key.to_string(),
         store_value: value.to_string(),
         expired_at,
      }
   }
}

impl Table for StorageModel {
   fn schema() -> TableSchema {
      TableSchema::new("storage", "id").columns(["id", "store_key", "store_value", "expired_at"])
   }

   fn table_name(&self) -> &str {
      "storage"
   }

   fn column_value(&self, column: &str) -> Option<JsonValue> {
      match column {
         "id" => Some(json!(self.id)),
         "store_key" => Some(json!(self.store_key)),
         "store_value" => Some(json!(self.store_value)),
         "expired_at" => Some(json!(self.expired_at)),
         _ => None,
      }
   }
}

/// String key/value store. Setting a key replaces every earlier value for it.
#[derive(Debug, Clone)]
pub struct LocalStorage {
   dao: Dao,
}

impl LocalStorage {
   /// Open the storage file as the `_local_storage` data source and drop
   /// entries that expired while it was closed.
   pub async fn open(registry: &DataSourceRegistry, path: impl AsRef<Path>) -> Result<Self> {
      let url = format!("sqlite:{}", path.as_ref().display());
      let statements: Vec<String> = STORAGE_DDL.iter().map(|s| s.to_string()).collect();

      let ds = registry
         .create(
            LOCAL_STORAGE_ID,
            &url,
            &statements,
            vec![StorageModel::schema()],
            None,
         )
         .await?;

      let storage = Self { dao: Dao::new(ds) };
      let removed = storage.clear_expired().await?;
      debug!(removed, "local storage opened");
      Ok(storage)
   }

   /// Live value of `key`
   pub async fn get(&self, key: &str) -> Result<Option<String>> {
      let value = sqlx::query_scalar::<_, String>(
         "SELECT store_value FROM storage WHERE store_key = ? AND expired_at >= ? ORDER BY id DESC LIMIT 1",
      )
      .bind(key)
      .bind(unix_now())
      .fetch_optional(self.dao.reader()?)
      .await?;
      Ok(value)
   }

   /// Live values of `keys`. Keys without a live value are left out.
   pub async fn mget(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
      if keys.is_empty() {
         return Ok(HashMap::new());
      }

      let sql = format!(
         "SELECT store_key, store_value FROM storage WHERE store_key IN {} AND expired_at >= ? ORDER BY id",
         sql_in_values(keys.len())
      );
      let mut query = sqlx::query_as::<_, (String, String)>(&sql);
      for key in keys {
         query = query.bind(*key);
      }
      let rows = query.bind(unix_now()).fetch_all(self.dao.reader()?).await?;

      // Ordered by id, so the newest row of a key wins
      Ok(rows.into_iter().collect())
   }

   pub async fn set(&self, key: &str, value: &str) -> Result<()> {
      self.set_ex(key, value, PERMANENT_EXPIRY).await
   }

   /// Store `value` until `expired_at` (epoch seconds). Zero or negative
   /// means it never expires.
   pub async fn set_ex(&self, key: &str, value: &str, expired_at: i64) -> Result<()> {
      self.mset_ex(&[(key, value)], expired_at).await
   }

   pub async fn mset(&self, entries: &[(&str, &str)]) -> Result<()> {
      self.mset_ex(entries, PERMANENT_EXPIRY).await
   }

   /// Replace every key in `entries`, all sharing one expiry. When a key
   /// appears more than once its last value is stored.
   pub async fn mset_ex(&self, entries: &[(&str, &str)], expired_at: i64) -> Result<()> {
      if entries.is_empty() {
         return Ok(());
      }
      if entries.iter().any(|(key, _)| key.is_empty()) {
         return Err(Error::InvalidArgument("storage key is empty".into()));
      }

      let expired_at = if expired_at <= 0 {
         PERMANENT_EXPIRY
      } else {
         expired_at
      };
      let entries: IndexMap<&str, &str> = entries.iter().copied().collect();
      let keys: Vec<&str> = entries.keys().copied().collect();
      let models: Vec<StorageModel> = entries
         .iter()
         .map(|(key, value)| StorageModel::new(key, value, expired_at))
         .collect();
      let records: Vec<&dyn Table> = models.iter().map(|m| m as &dyn Table).collect();

      self.remove(&keys).await?;
      self.dao.table_insert(&records).await?;
      Ok(())
   }

   /// Delete every row of `keys`. Returns the number of rows removed.
   pub async fn remove(&self, keys: &[&str]) -> Result<u64> {
      if keys.is_empty() {
         return Ok(0);
      }

      let sql = format!(
         "DELETE FROM storage WHERE store_key IN {}",
         sql_in_values(keys.len())
      );
      let values = keys.iter().map(|key| json!(key)).collect();
      Ok(self.dao.execute(sql, values).await?.rows_affected)
   }

   /// Delete entries whose expiry has passed
   pub async fn clear_expired(&self) -> Result<u64> {
      let result = self
         .dao
         .execute("DELETE FROM storage WHERE expired_at < ?", vec![json!(unix_now())])
         .await?;
      Ok(result.rows_affected)
   }
}
