//! # sqlx-sqlite-datasource
//!
//! SQLite data sources built on SQLx that keep writes serialized and reads
//! parallel, plus the table mapping used to generate and cache CRUD SQL.
//!
//! ## Core Types
//!
//! - **[`SqliteDataSource`]**: one queued writer connection and a read-only pool
//! - **[`SqliteDataSourceConfig`]**: pool sizing, queue capacity and mmap ceiling
//! - **[`SqlTask`]** / **[`SqlResult`]**: a unit of write work and its outcome
//! - **[`Table`]** / **[`TableSchema`]** / **[`TableSpec`]**: record mapping and generated SQL
//! - **[`ConnectionUrl`]** / **[`Driver`]**: `<driver>:<details>` connection strings
//! - **[`ReaderTuning`]**: mmap and cache sizing for reader connections
//! - **[`Error`]**: Error type for data source operations
//!
//! ## Architecture
//!
//! - **Single writer**: one WAL-mode connection owned by a background task that
//!   drains a bounded queue in FIFO order; batches run in one transaction
//! - **Concurrent reads**: read-only `query_only` pool sized at ten per CPU
//! - **Backpressure**: enqueue waits while the queue is full
//! - **Draining close**: queued tasks finish before connections close
//!
//! ## Usage
//!
//! ```no_run
//! use serde_json::json;
//! use sqlx_sqlite_datasource::SqliteDataSource;
//!
//! #[tokio::main]
//! async fn main() -> sqlx_sqlite_datasource::Result<()> {
//!     let ddl = vec!["CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)".to_string()];
//!     let ds = SqliteDataSource::open("main", "data/app.db", &ddl, None).await?;
//!
//!     // Writes go through the writer queue
//!     let result = ds
//!         .execute("INSERT INTO users (name) VALUES (?)", vec![json!("Alice")])
//!         .await?;
//!     assert_eq!(result.rows_affected, 1);
//!
//!     // Reads use the pool directly
//!     let rows = sqlx::query("SELECT * FROM users")
//!         .fetch_all(ds.read_pool()?)
//!         .await?;
//!     assert_eq!(rows.len(), 1);
//!
//!     ds.close().await?;
//!     Ok(())
//! }
//! ```

mod bind;
mod config;
mod connection;
mod datasource;
mod error;
mod table;
mod task;
mod tuning;
mod writer;

// Re-export public types
pub use bind::{SqliteQuery, bind_all, bind_value};
pub use config::{DEFAULT_MMAP_CEILING, SqliteDataSourceConfig};
pub use connection::{ConnectionUrl, Driver};
pub use datasource::SqliteDataSource;
pub use error::{Error, Result};
pub use table::{Table, TableSchema, TableSpec, sql_in_values, unix_now, validate_ids};
pub use task::{SqlResult, SqlTask, TaskArgs, TaskReceiver};
pub use tuning::{ReaderTuning, host_available_memory, host_cpu_count};
pub use writer::WriterState;
