/// Result type alias for DAO operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for DAO operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the data source (writer queue, table specs, pools).
   #[error(transparent)]
   DataSource(#[from] sqlx_sqlite_datasource::Error),

   /// Error from SQLx operations on the read pool.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// No table spec registered under this table name.
   #[error("no table spec registered for table '{0}'")]
   TableSpecNotFound(String),

   /// Argument rejected before any SQL ran.
   #[error("invalid argument: {0}")]
   InvalidArgument(String),

   /// Read target's declared columns differ from the registered table spec.
   #[error("record schema does not match the registered spec for table '{table}'")]
   ShapeMismatch { table: String },

   /// `create()` only accepts CREATE statements.
   #[error("not a CREATE statement: {0}")]
   NotCreateStatement(String),

   /// SQLite type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Multiple rows returned from fetch_one query.
   #[error("fetch_one() query returned {0} rows, expected 0 or 1")]
   MultipleRowsReturned(usize),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// Data source errors keep their own codes.
   pub fn error_code(&self) -> String {
      match self {
         Error::DataSource(e) => e.error_code(),
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::TableSpecNotFound(_) => "TABLE_SPEC_NOT_FOUND".to_string(),
         Error::InvalidArgument(_) => "INVALID_ARGUMENT".to_string(),
         Error::ShapeMismatch { .. } => "SHAPE_MISMATCH".to_string(),
         Error::NotCreateStatement(_) => "NOT_CREATE_STATEMENT".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::MultipleRowsReturned(_) => "MULTIPLE_ROWS_RETURNED".to_string(),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_error_code_data_source_passthrough() {
      let err = Error::from(sqlx_sqlite_datasource::Error::DataSourceClosed);
      assert_eq!(err.error_code(), "DATA_SOURCE_CLOSED");

      let err = Error::from(sqlx_sqlite_datasource::Error::InvalidArgument("id".into()));
      assert_eq!(err.error_code(), "INVALID_ARGUMENT");
   }

   #[test]
   fn test_error_code_table_spec_not_found() {
      let err = Error::TableSpecNotFound("ghosts".into());
      assert_eq!(err.error_code(), "TABLE_SPEC_NOT_FOUND");
      assert!(err.to_string().contains("ghosts"));
   }

   #[test]
   fn test_error_code_shape_mismatch() {
      let err = Error::ShapeMismatch {
         table: "articles".into(),
      };
      assert_eq!(err.error_code(), "SHAPE_MISMATCH");
      assert!(err.to_string().contains("articles"));
   }

   #[test]
   fn test_error_code_not_create_statement() {
      let err = Error::NotCreateStatement("DROP TABLE t".into());
      assert_eq!(err.error_code(), "NOT_CREATE_STATEMENT");
      assert!(err.to_string().contains("DROP TABLE t"));
   }

   #[test]
   fn test_error_code_multiple_rows_returned() {
      let err = Error::MultipleRowsReturned(2);
      assert_eq!(err.error_code(), "MULTIPLE_ROWS_RETURNED");
      assert!(err.to_string().contains("2 rows"));
   }

   #[test]
   fn test_error_code_unsupported_datatype() {
      let err = Error::UnsupportedDatatype("WEIRD".into());
      assert_eq!(err.error_code(), "UNSUPPORTED_DATATYPE");
   }

   #[test]
   fn test_error_code_sqlx_non_database() {
      // RowNotFound is not a database error, so no SQLite code
      let err = Error::Sqlx(sqlx::Error::RowNotFound);
      assert_eq!(err.error_code(), "SQLX_ERROR");
   }
}
