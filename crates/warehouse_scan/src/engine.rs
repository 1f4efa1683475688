//! Capabilities the planner needs from the remote SQL engine.
//!
//! The wire protocol and the physical batch format belong to the engine
//! client; the planner only sees these traits. Failures are reported as
//! `anyhow::Error` and wrapped into [`crate::ScanError`] by the caller.

use anyhow::Result;
use async_trait::async_trait;
use datafusion::arrow::record_batch::RecordBatch;

use crate::config::ConnectionParams;
use crate::split::{JobConfig, Split};

/// Direct statement execution, used by the count fast path.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs `sql` against `database` and returns at most `max_rows` rows.
    async fn execute_query(
        &self,
        connection: &ConnectionParams,
        database: &str,
        sql: &str,
        max_rows: u64,
    ) -> Result<RecordBatch>;
}

/// Remote split planner and owner of the resources a plan pins.
#[async_trait]
pub trait SplitSource: Send + Sync {
    /// Plans `job.query` and returns its ordered splits.
    async fn get_splits(&self, job: &JobConfig, num_splits: usize) -> Result<Vec<Split>>;

    /// Releases everything the engine holds for `handle_id`.
    async fn release(&self, handle_id: &str) -> Result<()>;
}

/// Everything a worker needs to read one data split.
#[derive(Debug, Clone)]
pub struct SplitTask {
    pub split: Split,
    pub job: JobConfig,
    pub schema_split: Split,
    pub plan_split: Split,
    pub buffer_max_bytes: u64,
}

/// Worker-side batch reading for data splits.
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Opens a reader positioned at the start of `task.split`.
    async fn open(&self, task: SplitTask) -> Result<Box<dyn BatchReader>>;
}

/// Sequential reader over the batches of one split.
#[async_trait]
pub trait BatchReader: Send {
    /// Returns the next batch, or `None` when the split is exhausted.
    async fn read_batch(&mut self) -> Result<Option<RecordBatch>>;

    /// Releases reader-side resources.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
