//! # sqlite-lts
//!
//! SQLite data sources with one queued writer and a read-only pool each,
//! table-level DAO access, and a small key/value local storage.
//!
//! ## Usage
//!
//! ```no_run
//! use sqlite_lts::{DataSourceOptions, Lts, Options, StorageConfig};
//!
//! #[tokio::main]
//! async fn main() -> sqlite_lts::Result<()> {
//!     let mut main_db = DataSourceOptions::new("main", "sqlite:data/main.db");
//!     main_db.statements = vec!["CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)".into()];
//!
//!     let lts = Lts::initialize(Options {
//!         storage: Some(StorageConfig { file_path: "data/storage.db".into() }),
//!         data_sources: vec![main_db],
//!     })
//!     .await?;
//!
//!     lts.storage()?.set("theme", "dark").await?;
//!     let users = lts.default_dao().await?.fetch_all("SELECT * FROM users", vec![]).await?;
//!     println!("{} users", users.len());
//!
//!     lts.dispose().await
//! }
//! ```

mod config;
mod error;
mod registry;
mod storage;

pub use config::{DataSourceOptions, Options, StorageConfig};
pub use error::{Error, Result};
pub use registry::{DataSourceRegistry, RESERVED_PREFIX};
pub use storage::{LOCAL_STORAGE_ID, LocalStorage, PERMANENT_EXPIRY, StorageModel};

pub use sqlx_sqlite_dao::Dao;
pub use sqlx_sqlite_datasource::{SqliteDataSource, SqliteDataSourceConfig, Table, TableSchema};

use std::sync::Arc;

use tracing::{info, warn};

/// Registry plus optional local storage, built from [`Options`].
#[derive(Debug)]
pub struct Lts {
   registry: Arc<DataSourceRegistry>,
   storage: Option<LocalStorage>,
}

impl Lts {
   /// Open local storage (if configured) and every configured data source.
   ///
   /// If any of them fails, whatever was already opened is closed again.
   pub async fn initialize(options: Options) -> Result<Self> {
      Self::initialize_with(Arc::new(DataSourceRegistry::new()), options).await
   }

   /// Like [`Lts::initialize`], but opens into a caller-owned registry.
   ///
   /// On failure the registry is left empty, with everything it held closed.
   pub async fn initialize_with(
      registry: Arc<DataSourceRegistry>,
      options: Options,
   ) -> Result<Self> {
      let opened = Self::open_all(&registry, &options).await;
      match opened {
         Ok(storage) => {
            info!(data_sources = options.data_sources.len(), "lts initialized");
            Ok(Self { registry, storage })
         }
         Err(e) => {
            if let Err(close_err) = registry.close_all().await {
               warn!(error = %close_err, "error closing data sources after failed initialization");
            }
            Err(e)
         }
      }
   }

   async fn open_all(
      registry: &DataSourceRegistry,
      options: &Options,
   ) -> Result<Option<LocalStorage>> {
      let storage = match &options.storage {
         Some(config) => Some(LocalStorage::open(registry, &config.file_path).await?),
         None => None,
      };

      for ds in &options.data_sources {
         registry
            .create(
               &ds.id,
               &ds.url,
               &ds.statements,
               ds.tables.clone(),
               Some(ds.data_source_config()),
            )
            .await?;
      }

      Ok(storage)
   }

   pub fn storage(&self) -> Result<&LocalStorage> {
      self.storage.as_ref().ok_or(Error::StorageNotConfigured)
   }

   pub fn registry(&self) -> &DataSourceRegistry {
      &self.registry
   }

   /// DAO for data source `id`; an empty id means the default data source
   pub async fn dao(&self, id: &str) -> Result<Dao> {
      self
         .registry
         .dao(id)
         .await
         .ok_or_else(|| Error::DataSourceNotFound(id.to_string()))
   }

   pub async fn default_dao(&self) -> Result<Dao> {
      self.dao("").await
   }

   /// Close every data source, local storage included
   pub async fn dispose(&self) -> Result<()> {
      self.registry.close_all().await
   }
}
