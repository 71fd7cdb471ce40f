use std::collections::HashMap;
use std::sync::Arc;

use sqlx_sqlite_dao::Dao;
use sqlx_sqlite_datasource::{
   ConnectionUrl, Driver, SqliteDataSource, SqliteDataSourceConfig, TableSchema,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Ids starting with this prefix are internal and never become the default.
pub const RESERVED_PREFIX: &str = "_";

#[derive(Debug, Default)]
struct RegistryState {
   sources: HashMap<String, Arc<SqliteDataSource>>,
   default_id: Option<String>,
}

/// Data sources by id.
///
/// The first non-reserved id created becomes the default, which is what an
/// empty id resolves to.
#[derive(Debug, Default)]
pub struct DataSourceRegistry(RwLock<RegistryState>);

impl DataSourceRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   /// Create the data source `id` from a `<driver>:<details>` url.
   ///
   /// A data source already registered under `id` is closed before the new
   /// one is opened. `statements` only run when the database file is new.
   pub async fn create(
      &self,
      id: &str,
      url: &str,
      statements: &[String],
      tables: Vec<TableSchema>,
      config: Option<SqliteDataSourceConfig>,
   ) -> Result<Arc<SqliteDataSource>> {
      if id.is_empty() {
         return Err(Error::InvalidArgument("data source id is empty".into()));
      }
      if url.trim().is_empty() {
         return Err(Error::InvalidArgument(format!(
            "connection url of data source '{id}' is empty"
         )));
      }
      let url = ConnectionUrl::parse(url)?;

      let mut state = self.0.write().await;

      if let Some(old) = state.sources.remove(id) {
         info!(data_source = id, "replacing data source");
         if state.default_id.as_deref() == Some(id) {
            state.default_id = None;
         }
         if let Err(e) = old.close().await {
            warn!(data_source = id, error = %e, "error closing replaced data source");
         }
      }

      let ds = match url.driver_kind() {
         Some(Driver::Sqlite) => {
            SqliteDataSource::open(id, &url.database, statements, config).await?
         }
         None => {
            return Err(sqlx_sqlite_datasource::Error::UnsupportedDriver(url.driver).into());
         }
      };

      if let Err(e) = ds.register_tables(tables) {
         if let Err(close_err) = ds.close().await {
            warn!(data_source = id, error = %close_err, "error closing rejected data source");
         }
         return Err(e.into());
      }

      let ds = Arc::new(ds);
      state.sources.insert(id.to_string(), Arc::clone(&ds));
      if state.default_id.is_none() && !id.starts_with(RESERVED_PREFIX) {
         debug!(data_source = id, "default data source");
         state.default_id = Some(id.to_string());
      }

      Ok(ds)
   }

   /// Data source `id`, or the default one when `id` is empty
   pub async fn get(&self, id: &str) -> Option<Arc<SqliteDataSource>> {
      let state = self.0.read().await;
      let id = if id.is_empty() {
         state.default_id.as_deref()?
      } else {
         id
      };
      state.sources.get(id).cloned()
   }

   pub async fn dao(&self, id: &str) -> Option<Dao> {
      self.get(id).await.map(Dao::new)
   }

   pub async fn default_id(&self) -> Option<String> {
      self.0.read().await.default_id.clone()
   }

   /// Registered ids, sorted
   pub async fn ids(&self) -> Vec<String> {
      let mut ids: Vec<String> = self.0.read().await.sources.keys().cloned().collect();
      ids.sort();
      ids
   }

   /// Close and forget one data source. Returns whether it existed.
   pub async fn remove(&self, id: &str) -> Result<bool> {
      let mut state = self.0.write().await;
      let Some(ds) = state.sources.remove(id) else {
         return Ok(false);
      };
      if state.default_id.as_deref() == Some(id) {
         state.default_id = None;
      }
      drop(state);

      ds.close().await?;
      Ok(true)
   }

   /// Close every data source and clear the registry.
   ///
   /// All data sources are closed even if some fail; the first error is
   /// returned.
   pub async fn close_all(&self) -> Result<()> {
      let sources = {
         let mut state = self.0.write().await;
         state.default_id = None;
         std::mem::take(&mut state.sources)
      };

      let mut first_error = None;
      for (id, ds) in sources {
         if let Err(e) = ds.close().await {
            warn!(data_source = %id, error = %e, "error closing data source");
            first_error.get_or_insert(e);
         }
      }

      match first_error {
         Some(e) => Err(e.into()),
         None => Ok(()),
      }
   }
}
