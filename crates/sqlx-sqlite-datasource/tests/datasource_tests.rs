use std::sync::Arc;

use serde_json::json;
use sqlx::Row;
use sqlx_sqlite_datasource::{
   Error, SqlTask, SqliteDataSource, SqliteDataSourceConfig, TableSchema, TaskArgs, WriterState,
};
use tempfile::TempDir;

fn schema() -> Vec<String> {
   vec![
      "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)"
         .to_string(),
   ]
}

fn init_tracing() {
   let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn create_test_ds() -> (SqliteDataSource, TempDir) {
   init_tracing();
   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let db_path = temp_dir.path().join("test.db");
   let ds = SqliteDataSource::open("test", &db_path, &schema(), None)
      .await
      .expect("Failed to open test data source");

   (ds, temp_dir)
}

async fn count_users(ds: &SqliteDataSource) -> i64 {
   sqlx::query("SELECT COUNT(*) AS n FROM users")
      .fetch_one(ds.read_pool().unwrap())
      .await
      .unwrap()
      .get("n")
}

#[tokio::test]
async fn test_schema_runs_only_on_fresh_file() {
   let temp_dir = TempDir::new().unwrap();
   let db_path = temp_dir.path().join("nested").join("app.db");

   let ds = SqliteDataSource::open("first", &db_path, &schema(), None)
      .await
      .unwrap();
   ds.execute("INSERT INTO users (name) VALUES (?)", vec![json!("alice")])
      .await
      .unwrap();
   ds.close().await.unwrap();

   // Running the same CREATE TABLE again would fail, so success means it was skipped
   let ds = SqliteDataSource::open("second", &db_path, &schema(), None)
      .await
      .unwrap();
   assert_eq!(count_users(&ds).await, 1);
   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_failing_schema_statement_aborts_open() {
   let temp_dir = TempDir::new().unwrap();
   let db_path = temp_dir.path().join("broken.db");
   let statements = vec![
      "CREATE TABLE ok (id INTEGER PRIMARY KEY)".to_string(),
      "CREATE TABLE broken (".to_string(),
   ];

   let err = SqliteDataSource::open("broken", &db_path, &statements, None)
      .await
      .unwrap_err();

   assert_eq!(err.error_code(), "SCHEMA_INIT_FAILED");
   assert!(matches!(
      err,
      Error::SchemaInit { ref statement, .. } if statement == "CREATE TABLE broken ("
   ));
}

#[tokio::test]
async fn test_execute_reports_ids_and_rows_affected() {
   let (ds, _temp) = create_test_ds().await;

   let result = ds
      .execute("INSERT INTO users (name) VALUES (?)", vec![json!("alice")])
      .await
      .unwrap();
   assert_eq!(result.last_insert_ids, vec![1]);
   assert_eq!(result.rows_affected, 1);

   let result = ds
      .execute("INSERT INTO users (name) VALUES (?)", vec![json!("bob")])
      .await
      .unwrap();
   assert_eq!(result.last_insert_ids, vec![2]);

   let result = ds
      .execute("UPDATE users SET name = name || '!'", vec![])
      .await
      .unwrap();
   assert_eq!(result.rows_affected, 2);

   // Empty SQL never reaches the connection
   let result = ds.execute("  ", vec![]).await.unwrap();
   assert!(result.last_insert_ids.is_empty());
   assert_eq!(result.rows_affected, 0);

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_task_does_not_stop_writer() {
   let (ds, _temp) = create_test_ds().await;

   ds.execute("INSERT INTO users (name) VALUES (?)", vec![json!("alice")])
      .await
      .unwrap();
   let err = ds
      .execute("INSERT INTO users (name) VALUES (?)", vec![json!("alice")])
      .await
      .unwrap_err();
   assert!(err.error_code().starts_with("SQLITE_"));

   ds.execute("INSERT INTO users (name) VALUES (?)", vec![json!("bob")])
      .await
      .unwrap();
   assert_eq!(count_users(&ds).await, 2);

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_reader_refuses_writes() {
   let (ds, _temp) = create_test_ds().await;

   let result = sqlx::query("INSERT INTO users (name) VALUES ('mallory')")
      .execute(ds.read_pool().unwrap())
      .await;
   assert!(result.is_err());
   assert_eq!(count_users(&ds).await, 0);

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_inserts_get_unique_keys() {
   let (ds, _temp) = create_test_ds().await;
   let ds = Arc::new(ds);

   let mut handles = Vec::new();
   for i in 0..50 {
      let ds = Arc::clone(&ds);
      handles.push(tokio::spawn(async move {
         ds.execute("INSERT INTO users (name) VALUES (?)", vec![json!(format!("user-{i}"))])
            .await
            .unwrap()
            .last_insert_ids[0]
      }));
   }

   let mut ids = Vec::new();
   for handle in handles {
      ids.push(handle.await.unwrap());
   }
   ids.sort();
   ids.dedup();
   assert_eq!(ids, (1..=50).collect::<Vec<i64>>());

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_keys_follow_enqueue_order() {
   let (ds, _temp) = create_test_ds().await;

   let mut receivers = Vec::new();
   for i in 0..20 {
      let (task, rx) = SqlTask::single(
         "INSERT INTO users (name) VALUES (?)",
         vec![json!(i.to_string())],
      );
      ds.enqueue(task).await.unwrap();
      receivers.push(rx);
   }

   let mut previous = 0;
   for rx in receivers {
      let id = rx.recv().await.unwrap().last_insert_ids[0];
      assert!(id > previous);
      previous = id;
   }

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_small_queue_applies_backpressure_without_loss() {
   let temp_dir = TempDir::new().unwrap();
   let config = SqliteDataSourceConfig {
      task_queue_capacity: 1,
      ..Default::default()
   };
   let ds = SqliteDataSource::open("tiny", temp_dir.path().join("tiny.db"), &schema(), Some(config))
      .await
      .unwrap();
   let ds = Arc::new(ds);

   let mut handles = Vec::new();
   for i in 0..20 {
      let ds = Arc::clone(&ds);
      handles.push(tokio::spawn(async move {
         ds.execute("INSERT INTO users (name) VALUES (?)", vec![json!(i.to_string())])
            .await
      }));
   }
   for handle in handles {
      handle.await.unwrap().unwrap();
   }
   assert_eq!(count_users(&ds).await, 20);

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_batch_runs_in_one_transaction() {
   let (ds, _temp) = create_test_ds().await;

   let result = ds
      .execute_batch(
         "INSERT INTO users (name) VALUES (?)",
         vec![vec![json!("a")], vec![json!("b")], vec![json!("c")]],
      )
      .await
      .unwrap();
   assert_eq!(result.last_insert_ids, vec![1, 2, 3]);
   assert_eq!(result.rows_affected, 3);

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_batch_failure_rolls_back_every_row() {
   let (ds, _temp) = create_test_ds().await;

   let err = ds
      .execute_batch(
         "INSERT INTO users (name) VALUES (?)",
         vec![vec![json!("a")], vec![json!("b")], vec![json!("a")]],
      )
      .await
      .unwrap_err();

   assert_eq!(err.error_code(), "BATCH_ROLLED_BACK");
   assert!(matches!(err, Error::BatchRolledBack { row: 2, .. }));
   assert_eq!(count_users(&ds).await, 0);

   // The writer left no transaction open behind it
   ds.execute("INSERT INTO users (name) VALUES (?)", vec![json!("a")])
      .await
      .unwrap();
   assert_eq!(count_users(&ds).await, 1);

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_enqueued_batch_task() {
   let (ds, _temp) = create_test_ds().await;

   let (task, rx) = SqlTask::batch(
      "INSERT INTO users (name) VALUES (?)",
      vec![vec![json!("a")], vec![json!("b")]],
   );
   assert_eq!(task.sql(), "INSERT INTO users (name) VALUES (?)");
   assert_eq!(task.args().len(), 2);
   assert!(matches!(task.args(), TaskArgs::Batch(_)));

   ds.enqueue(task).await.unwrap();
   let result = rx.recv().await.unwrap();
   assert_eq!(result.last_insert_ids, vec![1, 2]);
   assert_eq!(count_users(&ds).await, 2);

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
   let (ds, _temp) = create_test_ds().await;

   let result = ds
      .submit("INSERT INTO users (name) VALUES (?)", TaskArgs::Batch(vec![]))
      .await
      .unwrap();
   assert!(result.last_insert_ids.is_empty());
   assert_eq!(count_users(&ds).await, 0);

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_close_drains_queued_tasks() {
   let temp_dir = TempDir::new().unwrap();
   let db_path = temp_dir.path().join("drain.db");
   let ds = SqliteDataSource::open("drain", &db_path, &schema(), None)
      .await
      .unwrap();

   let mut receivers = Vec::new();
   for i in 0..25 {
      let (task, rx) = SqlTask::single(
         "INSERT INTO users (name) VALUES (?)",
         vec![json!(i.to_string())],
      );
      ds.enqueue(task).await.unwrap();
      receivers.push(rx);
   }

   ds.close().await.unwrap();
   assert_eq!(ds.writer_state(), WriterState::Stopped);

   // Every task queued before close still got its answer
   for rx in receivers {
      let result = rx.recv().await.unwrap();
      assert_eq!(result.rows_affected, 1);
   }

   let ds = SqliteDataSource::open("drain", &db_path, &schema(), None)
      .await
      .unwrap();
   assert_eq!(count_users(&ds).await, 25);
   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_use_after_close() {
   let (ds, _temp) = create_test_ds().await;
   ds.close().await.unwrap();

   assert!(ds.is_closed());
   assert_eq!(ds.writer_state(), WriterState::Stopped);

   let (task, _rx) = SqlTask::single("INSERT INTO users (name) VALUES ('x')", vec![]);
   let err = ds.enqueue(task).await.unwrap_err();
   assert!(matches!(err, Error::DataSourceClosed));

   let err = ds.execute("SELECT 1", vec![]).await.unwrap_err();
   assert_eq!(err.error_code(), "DATA_SOURCE_CLOSED");

   assert!(matches!(ds.read_pool(), Err(Error::DataSourceClosed)));

   // Closing twice is fine
   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_register_tables() {
   let (ds, _temp) = create_test_ds().await;

   ds.register_tables([TableSchema::new("users", "id").columns(["id", "name"])])
      .unwrap();
   let spec = ds.table_spec("users").unwrap();
   assert_eq!(spec.insert_sql(), "INSERT INTO users (name) VALUES (?)");

   // One bad schema rejects the whole registration
   let err = ds
      .register_tables([
         TableSchema::new("posts", "id").columns(["id", "title"]),
         TableSchema::new("tags", "id").columns(["label"]),
      ])
      .unwrap_err();
   assert_eq!(err.error_code(), "INVALID_TABLE_SCHEMA");
   assert_eq!(ds.table_names(), vec!["users".to_string()]);

   // Re-registration replaces the spec
   ds.register_tables([TableSchema::new("users", "id")
      .columns(["id", "name", "deleted_at"])
      .logical_delete("deleted_at")])
      .unwrap();
   assert!(ds.table_spec("users").unwrap().is_logical_delete());

   ds.close().await.unwrap();
}

#[tokio::test]
async fn test_small_file_is_mapped_whole() {
   let (ds, _temp) = create_test_ds().await;

   let tuning = ds.reader_tuning();
   assert!(tuning.mmap_size < 64 * 1024 * 1024);
   assert_eq!(tuning.cache_size, 1024 * 1024);
   assert_eq!(ds.writer_state(), WriterState::Idle);

   ds.close().await.unwrap();
}
