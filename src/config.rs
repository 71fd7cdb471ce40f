//! Host-facing configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx_sqlite_datasource::{SqliteDataSourceConfig, TableSchema};

/// Everything [`Lts::initialize`](crate::Lts::initialize) sets up.
///
/// Typically deserialized from the host's own config file:
///
/// ```
/// use sqlite_lts::Options;
///
/// let options: Options = serde_json::from_str(r#"{
///    "storage": { "file_path": "data/storage.db" },
///    "data_sources": [{
///       "id": "main",
///       "url": "sqlite:data/main.db",
///       "statements": ["CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"],
///       "tables": [{ "table": "users", "primary_key": "id", "columns": ["id", "name"] }]
///    }]
/// }"#).unwrap();
///
/// assert_eq!(options.data_sources[0].tables[0].columns.len(), 2);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Options {
   /// Local key/value storage; disabled when absent
   #[serde(default)]
   pub storage: Option<StorageConfig>,

   #[serde(default)]
   pub data_sources: Vec<DataSourceOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
   pub file_path: PathBuf,
}

/// One data source to create at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceOptions {
   pub id: String,

   /// `<driver>:<details>`, e.g. `sqlite:data/app.db`
   pub url: String,

   /// DDL run when the database file is created
   #[serde(default)]
   pub statements: Vec<String>,

   /// Tables registered for DAO access
   #[serde(default)]
   pub tables: Vec<TableSchema>,

   #[serde(default)]
   pub max_read_connections: Option<u32>,

   #[serde(default)]
   pub task_queue_capacity: Option<usize>,

   /// mmap ceiling for readers in bytes, `0` for none
   #[serde(default)]
   pub mmap_ceiling: Option<u64>,
}

impl DataSourceOptions {
   pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
      Self {
         id: id.into(),
         url: url.into(),
         statements: Vec::new(),
         tables: Vec::new(),
         max_read_connections: None,
         task_queue_capacity: None,
         mmap_ceiling: None,
      }
   }

   /// Data source config with these overrides applied to the defaults
   pub fn data_source_config(&self) -> SqliteDataSourceConfig {
      let mut config = SqliteDataSourceConfig {
         max_read_connections: self.max_read_connections,
         ..Default::default()
      };
      if let Some(capacity) = self.task_queue_capacity {
         config.task_queue_capacity = capacity;
      }
      if let Some(ceiling) = self.mmap_ceiling {
         config.mmap_ceiling = ceiling;
      }
      config
   }
}
