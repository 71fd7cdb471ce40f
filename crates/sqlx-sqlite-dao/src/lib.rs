//! # sqlx-sqlite-dao
//!
//! Record-level access to a [`SqliteDataSource`]: grouped, queued writes for
//! types implementing [`Table`] and typed or JSON reads from the read pool.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use sqlx_sqlite_dao::Dao;
//! use sqlx_sqlite_datasource::SqliteDataSource;
//!
//! #[tokio::main]
//! async fn main() -> sqlx_sqlite_dao::Result<()> {
//!     let ds = SqliteDataSource::open("main", "data/app.db", &[], None).await?;
//!     let dao = Dao::new(Arc::new(ds));
//!
//!     dao.create("CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT)")
//!         .await?;
//!     dao.execute("INSERT INTO users (name) VALUES (?)", vec![json!("Alice")])
//!         .await?;
//!
//!     let user = dao.fetch_one("SELECT * FROM users WHERE id = ?", vec![json!(1)]).await?;
//!     assert!(user.is_some());
//!     Ok(())
//! }
//! ```

mod dao;
mod decode;
mod error;

pub use dao::Dao;
pub use decode::{decode_row, decode_rows, to_json};
pub use error::{Error, Result};

// Re-export the types callers need to describe and register records
pub use sqlx_sqlite_datasource::{SqlResult, SqliteDataSource, Table, TableSchema};
