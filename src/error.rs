use serde::{Serialize, ser::Serializer};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from a data source: connection strings, schema setup, writer queue.
   #[error(transparent)]
   DataSource(#[from] sqlx_sqlite_datasource::Error),

   /// Error from DAO operations.
   #[error(transparent)]
   Dao(#[from] sqlx_sqlite_dao::Error),

   /// Error from SQLx queries issued directly by local storage.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   #[error("invalid argument: {0}")]
   InvalidArgument(String),

   /// No data source registered under this id (empty id means the default).
   #[error("data source not found: {0}")]
   DataSourceNotFound(String),

   #[error("local storage is not configured")]
   StorageNotConfigured,
}

impl Error {
   /// Machine-readable error code. Wrapped errors keep their own codes.
   pub fn error_code(&self) -> String {
      match self {
         Error::DataSource(e) => e.error_code(),
         Error::Dao(e) => e.error_code(),
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::InvalidArgument(_) => "INVALID_ARGUMENT".to_string(),
         Error::DataSourceNotFound(_) => "DATA_SOURCE_NOT_FOUND".to_string(),
         Error::StorageNotConfigured => "STORAGE_NOT_CONFIGURED".to_string(),
      }
   }
}

/// Serialized as `{ "code": ..., "message": ... }` for hosts that forward
/// errors across a process or language boundary.
impl Serialize for Error {
   fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
   where
      S: Serializer,
   {
      use serde::ser::SerializeStruct;
      let mut state = serializer.serialize_struct("Error", 2)?;
      state.serialize_field("code", &self.error_code())?;
      state.serialize_field("message", &self.to_string())?;
      state.end()
   }
}
