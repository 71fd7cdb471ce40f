//! Configuration for SQLite data sources

use std::time::Duration;

/// Default mmap ceiling applied to the read pool (64 MiB).
pub const DEFAULT_MMAP_CEILING: u64 = 64 * 1024 * 1024;

/// Configuration for [`SqliteDataSource`](crate::SqliteDataSource)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_datasource::SqliteDataSourceConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = SqliteDataSourceConfig::default();
/// assert_eq!(config.task_queue_capacity, 1000);
///
/// // Override just one field
/// let config = SqliteDataSourceConfig {
///     max_read_connections: Some(4),
///     ..Default::default()
/// };
/// assert_eq!(config.idle_timeout, Duration::from_secs(600));
/// ```
#[derive(Debug, Clone)]
pub struct SqliteDataSourceConfig {
   /// Maximum number of concurrent read connections
   ///
   /// `None` sizes the pool from the host: ten connections per CPU.
   ///
   /// Default: `None`
   pub max_read_connections: Option<u32>,

   /// Idle timeout for read connections
   ///
   /// Default: 10 minutes
   pub idle_timeout: Duration,

   /// Maximum lifetime of a read connection
   ///
   /// Default: 6 hours
   pub max_lifetime: Duration,

   /// Capacity of the write task queue. Enqueue waits when it is full.
   ///
   /// Default: 1000
   pub task_queue_capacity: usize,

   /// Upper bound for `mmap_size` on large database files. `0` disables the
   /// ceiling, leaving only file size and half of available memory.
   ///
   /// Default: 64 MiB
   pub mmap_ceiling: u64,
}

impl Default for SqliteDataSourceConfig {
   fn default() -> Self {
      Self {
         max_read_connections: None,
         idle_timeout: Duration::from_secs(10 * 60),
         max_lifetime: Duration::from_secs(6 * 60 * 60),
         task_queue_capacity: 1000,
         mmap_ceiling: DEFAULT_MMAP_CEILING,
      }
   }
}

impl SqliteDataSourceConfig {
   /// Read pool size: explicit setting, or ten per CPU.
   pub(crate) fn read_connections(&self, cpus: usize) -> u32 {
      match self.max_read_connections {
         Some(n) => n.max(1),
         None => u32::try_from(cpus.max(1) * 10).unwrap_or(u32::MAX),
      }
   }
}
