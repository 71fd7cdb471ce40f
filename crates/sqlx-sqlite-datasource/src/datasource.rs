//! SQLite data source with one queued writer and a read-only pool

use std::collections::HashMap;
use std::fs::{OpenOptions, create_dir_all};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{
   SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SqliteDataSourceConfig;
use crate::connection::Driver;
use crate::table::{Table, TableSchema, TableSpec};
use crate::task::{SqlResult, SqlTask, TaskArgs};
use crate::tuning::{ReaderTuning, host_available_memory, host_cpu_count};
use crate::writer::{self, StateCell, WriterState};
use crate::{Error, Result};

/// SQLite data source: one serialized writer, many concurrent readers.
///
/// ## Architecture
///
/// - **`write_pool`**: single-connection pool (max_connections=1, no lifetime
///   limit) in WAL mode. Its connection is held by the writer task for the
///   data source's whole life; nothing else touches it.
/// - **`tasks`**: bounded queue feeding the writer. Every mutation goes
///   through it, so writes are applied in enqueue order.
/// - **`read_pool`**: read-only, `query_only` connections tuned with
///   mmap/cache pragmas, sized from the CPU count. Reads bypass the queue.
/// - **`tables`**: [`TableSpec`] per registered table name.
///
/// ## Lifecycle
///
/// ```text
/// 1. open(): create file, open writer, run DDL on a fresh file, open readers, start writer task
/// 2. enqueue()/submit(): writes; read_pool(): reads
/// 3. close(): stop accepting tasks, drain the queue, close readers, then the writer
/// ```
#[derive(Debug)]
pub struct SqliteDataSource {
   id: String,

   /// Path to database file
   path: PathBuf,

   /// Pool of read-only connections for concurrent reads
   read_pool: Pool<Sqlite>,

   /// Single read-write connection pool, owned by the writer task
   write_pool: Pool<Sqlite>,

   /// Table specs by table name
   tables: RwLock<HashMap<String, Arc<TableSpec>>>,

   /// Queue sender; taken on close so the writer can drain and stop
   tasks: Mutex<Option<mpsc::Sender<SqlTask>>>,

   /// Writer task handle, awaited on close
   writer: Mutex<Option<JoinHandle<()>>>,

   writer_state: StateCell,

   tuning: ReaderTuning,

   /// Marks data source as closed to prevent further operations
   closed: AtomicBool,
}

impl SqliteDataSource {
   /// Open a data source on `path`.
   ///
   /// When the file does not exist yet it is created and `statements` are run
   /// against it in order. A failing statement aborts the open; statements are
   /// never run against an existing file.
   pub async fn open(
      id: impl Into<String>,
      path: impl AsRef<Path>,
      statements: &[String],
      config: Option<SqliteDataSourceConfig>,
   ) -> Result<Self> {
      let id = id.into();
      let path = path.as_ref().to_path_buf();
      let config = config.unwrap_or_default();

      if let Some(parent) = path.parent()
         && !parent.as_os_str().is_empty()
      {
         create_dir_all(parent)?;
      }

      let fresh = match OpenOptions::new().write(true).create_new(true).open(&path) {
         Ok(_) => true,
         Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
         Err(e) => return Err(e.into()),
      };
      debug!(data_source = %id, path = %path.display(), fresh, "opening sqlite data source");

      let write_pool = open_writer(&path).await?;

      if fresh
         && let Err(e) = run_statements(&write_pool, statements).await
      {
         write_pool.close().await;
         return Err(e);
      }

      let cpus = host_cpu_count();
      let file_size = match std::fs::metadata(&path) {
         Ok(metadata) => metadata.len(),
         Err(e) => {
            write_pool.close().await;
            return Err(e.into());
         }
      };
      let tuning = ReaderTuning::compute(file_size, host_available_memory(), config.mmap_ceiling);
      let read_pool = match open_readers(&path, &config, tuning, cpus).await {
         Ok(pool) => pool,
         Err(e) => {
            write_pool.close().await;
            return Err(e);
         }
      };

      let conn = match write_pool.acquire().await {
         Ok(conn) => conn,
         Err(e) => {
            read_pool.close().await;
            write_pool.close().await;
            return Err(e.into());
         }
      };

      let (sender, receiver) = mpsc::channel(config.task_queue_capacity.max(1));
      let writer_state = StateCell::new();
      let handle = tokio::spawn(writer::run(
         id.clone(),
         conn,
         receiver,
         writer_state.clone(),
      ));

      info!(
         data_source = %id,
         path = %path.display(),
         mmap_size = tuning.mmap_size,
         cache_size = tuning.cache_size,
         max_readers = config.read_connections(cpus),
         "sqlite data source ready"
      );

      Ok(Self {
         id,
         path,
         read_pool,
         write_pool,
         tables: RwLock::new(HashMap::new()),
         tasks: Mutex::new(Some(sender)),
         writer: Mutex::new(Some(handle)),
         writer_state,
         tuning,
         closed: AtomicBool::new(false),
      })
   }

   pub fn id(&self) -> &str {
      &self.id
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn driver(&self) -> Driver {
      Driver::Sqlite
   }

   /// Tuning applied to every reader connection
   pub fn reader_tuning(&self) -> ReaderTuning {
      self.tuning
   }

   pub fn writer_state(&self) -> WriterState {
      self.writer_state.get()
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::Acquire)
   }

   /// Get a reference to the read-only connection pool.
   ///
   /// Connections in this pool refuse writes (`PRAGMA query_only`).
   pub fn read_pool(&self) -> Result<&Pool<Sqlite>> {
      if self.is_closed() {
         return Err(Error::DataSourceClosed);
      }
      Ok(&self.read_pool)
   }

   /// Register table schemas, replacing any spec with the same table name.
   ///
   /// All schemas are validated before any is stored.
   pub fn register_tables<I>(&self, schemas: I) -> Result<()>
   where
      I: IntoIterator<Item = TableSchema>,
   {
      let specs = schemas
         .into_iter()
         .map(TableSpec::new)
         .collect::<Result<Vec<_>>>()?;

      let mut tables = self.tables.write();
      for spec in specs {
         debug!(data_source = %self.id, table = spec.table_name(), "registered table");
         tables.insert(spec.table_name().to_string(), Arc::new(spec));
      }
      Ok(())
   }

   /// Register the schema of record type `T`
   pub fn register<T: Table>(&self) -> Result<()> {
      self.register_tables([T::schema()])
   }

   pub fn table_spec(&self, table: &str) -> Option<Arc<TableSpec>> {
      self.tables.read().get(table).cloned()
   }

   pub fn table_names(&self) -> Vec<String> {
      let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
      names.sort();
      names
   }

   /// Queue a task for the writer.
   ///
   /// Waits while the queue is full. Fails once `close()` has started.
   pub async fn enqueue(&self, task: SqlTask) -> Result<()> {
      let sender = self
         .tasks
         .lock()
         .as_ref()
         .cloned()
         .ok_or(Error::DataSourceClosed)?;

      sender
         .send(task)
         .await
         .map_err(|_| Error::DataSourceClosed)
   }

   /// Queue a task and wait for its result
   pub async fn submit(&self, sql: impl Into<String>, args: TaskArgs) -> Result<SqlResult> {
      let (task, result) = SqlTask::new(sql, args);
      self.enqueue(task).await?;
      result.recv().await
   }

   /// Run one statement on the writer
   pub async fn execute(
      &self,
      sql: impl Into<String>,
      values: Vec<JsonValue>,
   ) -> Result<SqlResult> {
      self.submit(sql, TaskArgs::Single(values)).await
   }

   /// Run one statement per argument tuple on the writer, all or nothing
   pub async fn execute_batch(
      &self,
      sql: impl Into<String>,
      rows: Vec<Vec<JsonValue>>,
   ) -> Result<SqlResult> {
      self.submit(sql, TaskArgs::Batch(rows)).await
   }

   /// Close the data source.
   ///
   /// Tasks already enqueued still run and receive their results. Then the
   /// read pool is closed, then the writer. Calling this again is a no-op.
   pub async fn close(&self) -> Result<()> {
      if self.closed.swap(true, Ordering::AcqRel) {
         return Ok(());
      }
      debug!(data_source = %self.id, "closing sqlite data source");

      // Dropping the last sender lets the writer drain and exit
      drop(self.tasks.lock().take());
      self.writer_state.mark_draining();

      let handle = self.writer.lock().take();
      let joined = match handle {
         Some(handle) => handle.await,
         None => Ok(()),
      };
      debug!(data_source = %self.id, "writer tasks done");

      self.read_pool.close().await;
      debug!(data_source = %self.id, "reader closed");
      self.write_pool.close().await;
      debug!(data_source = %self.id, "writer closed");

      if let Err(e) = joined {
         warn!(data_source = %self.id, error = %e, "writer task did not finish cleanly");
         return Err(e.into());
      }
      Ok(())
   }
}

async fn open_writer(path: &Path) -> Result<Pool<Sqlite>> {
   let options = SqliteConnectOptions::new()
      .filename(path)
      .journal_mode(SqliteJournalMode::Wal);

   let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .min_connections(1)
      .max_lifetime(None)
      .idle_timeout(None)
      .connect_with(options)
      .await?;
   Ok(pool)
}

async fn run_statements(pool: &Pool<Sqlite>, statements: &[String]) -> Result<()> {
   for statement in statements {
      let statement = statement.trim();
      if statement.is_empty() {
         continue;
      }
      debug!(statement, "executing schema statement");
      sqlx::raw_sql(statement)
         .execute(pool)
         .await
         .map_err(|source| Error::SchemaInit {
            statement: statement.to_string(),
            source,
         })?;
   }
   Ok(())
}

async fn open_readers(
   path: &Path,
   config: &SqliteDataSourceConfig,
   tuning: ReaderTuning,
   cpus: usize,
) -> Result<Pool<Sqlite>> {
   let options = SqliteConnectOptions::new()
      .filename(path)
      .read_only(true)
      .shared_cache(true)
      .synchronous(SqliteSynchronous::Off)
      .foreign_keys(false)
      .pragma("mmap_size", tuning.mmap_size.to_string())
      .pragma("cache_size", tuning.cache_size_pragma())
      .pragma("temp_store", "MEMORY")
      .pragma("query_only", "ON");

   let max_connections = config.read_connections(cpus);
   let min_connections = u32::try_from(cpus).unwrap_or(u32::MAX).min(max_connections);

   let pool = SqlitePoolOptions::new()
      .max_connections(max_connections)
      .min_connections(min_connections)
      .idle_timeout(Some(config.idle_timeout))
      .max_lifetime(Some(config.max_lifetime))
      .connect_with(options)
      .await?;
   Ok(pool)
}
