//! Units of write work handed to the writer, and their outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Arguments of a write task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskArgs {
   /// One execution with one argument list
   Single(Vec<JsonValue>),
   /// One execution per argument tuple, inside a single transaction
   Batch(Vec<Vec<JsonValue>>),
}

impl TaskArgs {
   /// Number of statement executions this task performs
   pub fn len(&self) -> usize {
      match self {
         TaskArgs::Single(_) => 1,
         TaskArgs::Batch(rows) => rows.len(),
      }
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }
}

/// Result of a write task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlResult {
   /// Last inserted ROWID per execution, in execution order.
   ///
   /// Tables created with `WITHOUT ROWID` report 0.
   pub last_insert_ids: Vec<i64>,
   /// Total number of rows affected
   pub rows_affected: u64,
}

/// A statement with its arguments and the channel its result goes back on.
///
/// The reply sender is consumed when the result is delivered, so each task is
/// answered at most once.
#[derive(Debug)]
pub struct SqlTask {
   pub(crate) sql: String,
   pub(crate) args: TaskArgs,
   pub(crate) reply: oneshot::Sender<Result<SqlResult>>,
}

impl SqlTask {
   /// Create a task and the receiver its result will arrive on
   pub fn new(sql: impl Into<String>, args: TaskArgs) -> (Self, TaskReceiver) {
      let (reply, rx) = oneshot::channel();
      let task = Self {
         sql: sql.into(),
         args,
         reply,
      };
      (task, TaskReceiver(rx))
   }

   pub fn single(sql: impl Into<String>, values: Vec<JsonValue>) -> (Self, TaskReceiver) {
      Self::new(sql, TaskArgs::Single(values))
   }

   pub fn batch(sql: impl Into<String>, rows: Vec<Vec<JsonValue>>) -> (Self, TaskReceiver) {
      Self::new(sql, TaskArgs::Batch(rows))
   }

   pub fn sql(&self) -> &str {
      &self.sql
   }

   pub fn args(&self) -> &TaskArgs {
      &self.args
   }
}

/// Receiving half of a task's reply channel
#[derive(Debug)]
pub struct TaskReceiver(oneshot::Receiver<Result<SqlResult>>);

impl TaskReceiver {
   /// Wait for the writer's answer
   pub async fn recv(self) -> Result<SqlResult> {
      self.0.await.map_err(|_| Error::WriterStopped)?
   }
}
