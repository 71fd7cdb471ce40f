//! Error types for sqlx-sqlite-datasource

use thiserror::Error;

/// Errors that may occur when opening, using or closing a data source
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library while executing a statement.
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Connection string could not be parsed.
   #[error("invalid connection url '{url}': {reason}")]
   InvalidUrl { url: String, reason: String },

   /// Connection string names a driver with no data source implementation.
   #[error("unsupported driver: {0}")]
   UnsupportedDriver(String),

   /// A DDL statement failed while initializing a freshly created database.
   #[error("schema initialization failed on `{statement}`: {source}")]
   SchemaInit {
      statement: String,
      #[source]
      source: sqlx::Error,
   },

   /// Table schema is not usable for SQL generation.
   #[error("invalid schema for table '{table}': {reason}")]
   InvalidTableSchema { table: String, reason: String },

   /// A record did not provide a value for one of its persisted columns.
   #[error("record for table '{table}' has no value for column '{column}'")]
   UnmappedColumn { table: String, column: String },

   /// Argument rejected before reaching the database.
   #[error("invalid argument: {0}")]
   InvalidArgument(String),

   /// Data source has been closed and cannot be used
   #[error("Data source has been closed")]
   DataSourceClosed,

   /// The writer dropped a task without answering it.
   #[error("writer stopped before answering the task")]
   WriterStopped,

   /// The writer task panicked or was cancelled.
   #[error("writer task failed: {0}")]
   WriterJoin(#[from] tokio::task::JoinError),

   /// Batch transaction could not be started.
   #[error("failed to begin transaction: {0}")]
   TransactionBeginFailed(#[source] sqlx::Error),

   /// A batch row failed; the whole batch was rolled back.
   #[error("batch rolled back at row {row}: {source}")]
   BatchRolledBack {
      row: usize,
      #[source]
      source: sqlx::Error,
   },

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// Every batch row succeeded but COMMIT did not.
   #[error("failed to commit transaction: {0}")]
   TransactionCommitFailed(#[source] sqlx::Error),
}

impl Error {
   /// Machine-readable error code.
   pub fn error_code(&self) -> String {
      match self {
         Error::Io(_) => "IO_ERROR".to_string(),
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::InvalidUrl { .. } => "INVALID_URL".to_string(),
         Error::UnsupportedDriver(_) => "UNSUPPORTED_DRIVER".to_string(),
         Error::SchemaInit { .. } => "SCHEMA_INIT_FAILED".to_string(),
         Error::InvalidTableSchema { .. } => "INVALID_TABLE_SCHEMA".to_string(),
         Error::UnmappedColumn { .. } => "UNMAPPED_COLUMN".to_string(),
         Error::InvalidArgument(_) => "INVALID_ARGUMENT".to_string(),
         Error::DataSourceClosed => "DATA_SOURCE_CLOSED".to_string(),
         Error::WriterStopped => "WRITER_STOPPED".to_string(),
         Error::WriterJoin(_) => "WRITER_JOIN_FAILED".to_string(),
         Error::TransactionBeginFailed(_) => "TRANSACTION_BEGIN_FAILED".to_string(),
         Error::BatchRolledBack { .. } => "BATCH_ROLLED_BACK".to_string(),
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED".to_string(),
         Error::TransactionCommitFailed(_) => "TRANSACTION_COMMIT_FAILED".to_string(),
      }
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
