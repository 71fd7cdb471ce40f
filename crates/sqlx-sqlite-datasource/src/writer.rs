//! The write serializer.
//!
//! Each data source runs exactly one writer task. It owns the only read-write
//! connection and executes queued tasks one at a time, in the order they were
//! enqueued. When every queue sender is gone it finishes the tasks still
//! buffered and stops, which is what lets `close()` drain instead of drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::bind::bind_all;
use crate::task::{SqlResult, SqlTask, TaskArgs};
use crate::{Error, Result};

/// Lifecycle of the writer task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
   /// Waiting for the next task
   Idle,
   /// Running a task against the write connection
   Executing,
   /// Queue closed; finishing the tasks already enqueued
   Draining,
   /// Queue drained and the write connection released
   Stopped,
}

impl WriterState {
   fn from_u8(value: u8) -> Self {
      match value {
         0 => WriterState::Idle,
         1 => WriterState::Executing,
         2 => WriterState::Draining,
         _ => WriterState::Stopped,
      }
   }
}

/// Shared view of the writer's state
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
   pub(crate) fn new() -> Self {
      Self(Arc::new(AtomicU8::new(WriterState::Idle as u8)))
   }

   pub(crate) fn set(&self, state: WriterState) {
      self.0.store(state as u8, Ordering::Release);
   }

   pub(crate) fn get(&self) -> WriterState {
      WriterState::from_u8(self.0.load(Ordering::Acquire))
   }

   /// Move to `Draining` unless the writer already stopped
   pub(crate) fn mark_draining(&self) {
      let _ = self
         .0
         .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
            match WriterState::from_u8(state) {
               WriterState::Stopped => None,
               _ => Some(WriterState::Draining as u8),
            }
         });
   }
}

/// Writer loop: runs until the queue is closed and empty.
pub(crate) async fn run(
   data_source: String,
   mut conn: PoolConnection<Sqlite>,
   mut tasks: mpsc::Receiver<SqlTask>,
   state: StateCell,
) {
   debug!(data_source = %data_source, "writer started");

   while let Some(task) = tasks.recv().await {
      state.set(WriterState::Executing);

      let SqlTask { sql, args, reply } = task;
      let result = execute(&mut conn, &sql, args).await;
      if let Err(e) = &result {
         warn!(data_source = %data_source, sql = %sql, error = %e, "write task failed");
      }

      if reply.send(result).is_err() {
         trace!(data_source = %data_source, "caller dropped before the result arrived");
      }

      state.set(if tasks.is_closed() {
         WriterState::Draining
      } else {
         WriterState::Idle
      });
   }

   state.set(WriterState::Stopped);
   debug!(data_source = %data_source, "writer drained and stopped");
}

async fn execute(conn: &mut SqliteConnection, sql: &str, args: TaskArgs) -> Result<SqlResult> {
   if sql.trim().is_empty() {
      return Ok(SqlResult::default());
   }

   match args {
      TaskArgs::Single(values) => execute_single(conn, sql, values).await,
      TaskArgs::Batch(rows) => execute_batch(conn, sql, rows).await,
   }
}

async fn execute_single(
   conn: &mut SqliteConnection,
   sql: &str,
   values: Vec<JsonValue>,
) -> Result<SqlResult> {
   let done = bind_all(sqlx::query(sql), values)
      .execute(&mut *conn)
      .await?;

   Ok(SqlResult {
      last_insert_ids: vec![done.last_insert_rowid().max(0)],
      rows_affected: done.rows_affected(),
   })
}

/// Run every argument tuple inside one transaction. The first failing row
/// rolls the whole batch back.
async fn execute_batch(
   conn: &mut SqliteConnection,
   sql: &str,
   rows: Vec<Vec<JsonValue>>,
) -> Result<SqlResult> {
   if rows.is_empty() {
      return Ok(SqlResult::default());
   }

   sqlx::query("BEGIN IMMEDIATE")
      .execute(&mut *conn)
      .await
      .map_err(Error::TransactionBeginFailed)?;

   let mut result = SqlResult {
      last_insert_ids: Vec::with_capacity(rows.len()),
      rows_affected: 0,
   };
   let mut failure = None;

   for (row, values) in rows.into_iter().enumerate() {
      match bind_all(sqlx::query(sql), values).execute(&mut *conn).await {
         Ok(done) => {
            result.last_insert_ids.push(done.last_insert_rowid().max(0));
            result.rows_affected += done.rows_affected();
         }
         Err(source) => {
            failure = Some((row, source));
            break;
         }
      }
   }

   if let Some((row, source)) = failure {
      return match sqlx::query("ROLLBACK").execute(&mut *conn).await {
         // Rollback succeeded, report the failing row
         Ok(_) => Err(Error::BatchRolledBack { row, source }),

         // Rollback also failed, report both errors
         Err(rollback_err) => Err(Error::TransactionRollbackFailed {
            transaction_error: source.to_string(),
            rollback_error: rollback_err.to_string(),
         }),
      };
   }

   if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
      // A failed COMMIT can leave the transaction open on the connection
      if let Err(rollback_err) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
         trace!(error = %rollback_err, "rollback after failed commit");
      }
      return Err(Error::TransactionCommitFailed(e));
   }

   Ok(result)
}
