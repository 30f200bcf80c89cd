use arrow::json::ArrayWriter;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::db_pool::DuckDbPool;
use crate::error::{EngineError, Result};

/// Rows returned by the execution service, one JSON object per row.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The SQL execution service. The engine decides what runs; implementors run it.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryRows>;
}

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// Runs SQL on pooled DuckDB connections with a per-query timeout.
///
/// The DuckDB bindings expose no way to interrupt a running statement, so a
/// timed-out query keeps its pooled connection until DuckDB finishes it. The
/// caller gets the timeout error at once; `abandoned_queries` counts the
/// statements still holding a connection that way.
pub struct DuckDbExecutor {
    pool: DuckDbPool,
    timeout: Duration,
    abandoned: Arc<AtomicUsize>,
}

impl DuckDbExecutor {
    pub fn new(pool: DuckDbPool, timeout: Duration) -> Self {
        Self {
            pool,
            timeout,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Timed-out statements still running on a pooled connection.
    pub fn abandoned_queries(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for DuckDbExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryRows> {
        let pool = self.pool.clone();
        let sql_to_execute = sql.to_string();
        let state = Arc::new(AtomicU8::new(RUNNING));
        let task_state = state.clone();
        let abandoned = self.abandoned.clone();

        let blocking_task = tokio::task::spawn_blocking(move || -> Result<QueryRows> {
            let start_time = Instant::now();
            let result = run_query(&pool, &sql_to_execute);
            if task_state.swap(FINISHED, Ordering::SeqCst) == ABANDONED {
                abandoned.fetch_sub(1, Ordering::SeqCst);
                warn!(
                    "Timed-out query finished after {:?}; connection released",
                    start_time.elapsed()
                );
            }
            result
        });

        match tokio::time::timeout(self.timeout, blocking_task).await {
            Ok(joined) => joined?,
            Err(_) => {
                self.abandoned.fetch_add(1, Ordering::SeqCst);
                let marked = state
                    .compare_exchange(RUNNING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if !marked {
                    // finished between the timeout firing and the mark
                    self.abandoned.fetch_sub(1, Ordering::SeqCst);
                }
                error!(
                    "Query execution exceeded {:?}; its connection stays busy until DuckDB finishes",
                    self.timeout
                );
                Err(EngineError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}

fn run_query(pool: &DuckDbPool, sql: &str) -> Result<QueryRows> {
    let start_time = Instant::now();
    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;
    let arrow = stmt.query_arrow([])?;

    let columns = arrow
        .get_schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect::<Vec<String>>();
    let batches: Vec<RecordBatch> = arrow.collect();

    let rows = batches_to_rows(&batches)?;
    debug!(
        "Query returned {} rows in {:?}",
        rows.len(),
        start_time.elapsed()
    );
    Ok(QueryRows { columns, rows })
}

fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Map<String, Value>>> {
    if batches.iter().all(|batch| batch.num_rows() == 0) {
        return Ok(Vec::new());
    }
    let mut writer = ArrayWriter::new(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer.write_batches(&refs)?;
    writer.finish()?;
    let buffer = writer.into_inner();
    Ok(serde_json::from_slice(&buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::db_pool::build_pool;

    fn seeded_pool() -> DuckDbPool {
        let pool = build_pool(":memory:", 2).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "CREATE TABLE Event (Id INTEGER, Status VARCHAR);
             INSERT INTO Event VALUES (1, 'open'), (2, 'closed'), (3, 'open');",
        )
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn executes_against_shared_in_memory_database() {
        let executor = DuckDbExecutor::new(seeded_pool(), Duration::from_secs(5));
        let result = executor
            .execute("SELECT Status, COUNT(*) AS total FROM Event GROUP BY Status ORDER BY Status")
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["Status", "total"]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.rows[1]["Status"], "open");
        assert_eq!(result.rows[1]["total"], 2);
    }

    #[tokio::test]
    async fn empty_result_has_columns_but_no_rows() {
        let executor = DuckDbExecutor::new(seeded_pool(), Duration::from_secs(5));
        let result = executor
            .execute("SELECT Id FROM Event WHERE Id > 100")
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.columns, vec!["Id"]);
    }

    #[tokio::test]
    async fn timed_out_query_releases_its_connection_when_duckdb_finishes() {
        let pool = build_pool(":memory:", 1).unwrap();
        let executor = DuckDbExecutor::new(pool.clone(), Duration::from_millis(1));

        let result = executor
            .execute("SELECT SUM(i) FROM range(500000000) t(i)")
            .await;
        assert!(matches!(result, Err(EngineError::Timeout(1))));

        let deadline = Instant::now() + Duration::from_secs(60);
        while executor.abandoned_queries() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(executor.abandoned_queries(), 0);
        assert_eq!(pool.state().idle_connections, 1);
    }

    #[tokio::test]
    async fn bad_sql_is_an_error() {
        let executor = DuckDbExecutor::new(seeded_pool(), Duration::from_secs(5));
        assert!(executor.execute("SELECT nope FROM Missing").await.is_err());
    }
}
