//! In-memory remote engine shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use datafusion::arrow::array::{Int64Array, StringArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use warehouse_scan::split::SCHEMA_DISCOVERY_SPLIT_HINT;
use warehouse_scan::{
    BatchReader, BatchSource, ConnectionParams, JobConfig, QueryExecutor, ScanContext,
    ScanCoordinator, ScanMetrics, ScanRequest, Split, SplitSource, SplitTask,
};

pub const SESSION_ID: &str = "session-1";
pub const HANDLE_ID: &str = "handle-1";
pub const ROWS_PER_BATCH: usize = 4;
pub const BATCHES_PER_SPLIT: usize = 2;

/// Installs a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warehouse_scan=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn orders_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("order_id", DataType::Int64, false),
        Field::new("status", DataType::Utf8, true),
        Field::new("total_cents", DataType::Int64, false),
    ]))
}

/// Scriptable stand-in for the remote engine: planner, executor and reader.
pub struct MockEngine {
    schema: SchemaRef,
    /// Total splits returned by a planning call, metadata splits included.
    total_splits: AtomicUsize,
    plan_token: Mutex<Vec<u8>>,
    count: AtomicU64,
    fail_planning: AtomicBool,
    fail_schema: AtomicBool,
    fail_release: AtomicBool,
    fail_count: AtomicBool,
    planned_queries: Mutex<Vec<String>>,
    executed_queries: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
    opened: Mutex<Vec<SplitTask>>,
}

impl MockEngine {
    pub fn new(total_splits: usize) -> Arc<Self> {
        Arc::new(Self {
            schema: orders_schema(),
            total_splits: AtomicUsize::new(total_splits),
            plan_token: Mutex::new(b"plan-v1".to_vec()),
            count: AtomicU64::new(0),
            fail_planning: AtomicBool::new(false),
            fail_schema: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
            fail_count: AtomicBool::new(false),
            planned_queries: Mutex::new(Vec::new()),
            executed_queries: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn set_total_splits(&self, total: usize) {
        self.total_splits.store(total, Ordering::SeqCst);
    }

    pub fn set_plan_token(&self, token: &[u8]) {
        *self.plan_token.lock().expect("plan token lock") = token.to_vec();
    }

    pub fn set_count(&self, count: u64) {
        self.count.store(count, Ordering::SeqCst);
    }

    pub fn fail_planning(&self, fail: bool) {
        self.fail_planning.store(fail, Ordering::SeqCst);
    }

    pub fn fail_schema(&self, fail: bool) {
        self.fail_schema.store(fail, Ordering::SeqCst);
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn fail_count(&self, fail: bool) {
        self.fail_count.store(fail, Ordering::SeqCst);
    }

    pub fn planned_queries(&self) -> Vec<String> {
        self.planned_queries.lock().expect("planned lock").clone()
    }

    pub fn executed_queries(&self) -> Vec<String> {
        self.executed_queries.lock().expect("executed lock").clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().expect("released lock").clone()
    }

    pub fn opened(&self) -> Vec<SplitTask> {
        self.opened.lock().expect("opened lock").clone()
    }

    fn batch(&self, first_id: i64) -> Result<RecordBatch> {
        let ids = (first_id..first_id + ROWS_PER_BATCH as i64).collect::<Vec<_>>();
        let statuses = ids.iter().map(|id| format!("status-{id}")).collect::<Vec<_>>();
        let totals = ids.iter().map(|id| id * 100).collect::<Vec<_>>();
        Ok(RecordBatch::try_new(
            Arc::clone(&self.schema),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(statuses)),
                Arc::new(Int64Array::from(totals)),
            ],
        )?)
    }
}

#[async_trait]
impl SplitSource for MockEngine {
    async fn get_splits(&self, job: &JobConfig, num_splits: usize) -> Result<Vec<Split>> {
        if num_splits == SCHEMA_DISCOVERY_SPLIT_HINT {
            if self.fail_schema.load(Ordering::SeqCst) {
                bail!("table not found");
            }
            return Ok(vec![
                Split::new(b"schema".to_vec()).with_schema(Arc::clone(&self.schema))
            ]);
        }

        self.planned_queries
            .lock()
            .expect("planned lock")
            .push(job.query.clone());
        if self.fail_planning.load(Ordering::SeqCst) {
            bail!("syntax error in query");
        }

        let total = self.total_splits.load(Ordering::SeqCst);
        let plan_token = self.plan_token.lock().expect("plan token lock").clone();
        let splits = (0..total)
            .map(|index| match index {
                0 => Split::new(b"schema".to_vec()).with_schema(Arc::clone(&self.schema)),
                1 => Split::new(plan_token.clone()),
                n => Split::new(format!("data-{n}").into_bytes())
                    .with_locations(vec![format!("worker-{}", n % 3)]),
            })
            .collect();
        Ok(splits)
    }

    async fn release(&self, handle_id: &str) -> Result<()> {
        if self.fail_release.load(Ordering::SeqCst) {
            bail!("engine unavailable");
        }
        self.released
            .lock()
            .expect("released lock")
            .push(handle_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for MockEngine {
    async fn execute_query(
        &self,
        _connection: &ConnectionParams,
        _database: &str,
        sql: &str,
        _max_rows: u64,
    ) -> Result<RecordBatch> {
        self.executed_queries
            .lock()
            .expect("executed lock")
            .push(sql.to_string());
        if self.fail_count.load(Ordering::SeqCst) {
            bail!("count query timed out");
        }
        let count = self.count.load(Ordering::SeqCst) as i64;
        Ok(RecordBatch::try_from_iter(vec![(
            "_c0",
            Arc::new(Int64Array::from(vec![count])) as _,
        )])?)
    }
}

#[async_trait]
impl BatchSource for MockEngine {
    async fn open(&self, task: SplitTask) -> Result<Box<dyn BatchReader>> {
        let mut batches = Vec::with_capacity(BATCHES_PER_SPLIT);
        for index in 0..BATCHES_PER_SPLIT {
            batches.push(self.batch((index * ROWS_PER_BATCH) as i64)?);
        }
        self.opened.lock().expect("opened lock").push(task);
        batches.reverse();
        Ok(Box::new(VecReader { batches }))
    }
}

/// Pops pre-built batches in order.
struct VecReader {
    batches: Vec<RecordBatch>,
}

#[async_trait]
impl BatchReader for VecReader {
    async fn read_batch(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.batches.pop())
    }
}

/// Builds the request used by most tests; `extra` overrides or adds options.
pub fn request(extra: &[(&str, &str)]) -> ScanRequest {
    let mut options = HashMap::from([
        ("table".to_string(), "sales.orders".to_string()),
        ("session_id".to_string(), SESSION_ID.to_string()),
        ("handle_id".to_string(), HANDLE_ID.to_string()),
        ("count_tasks".to_string(), "4".to_string()),
    ]);
    for (key, value) in extra {
        options.insert(key.to_string(), value.to_string());
    }
    ScanRequest::from_options_with_env(&options, |_| None).expect("valid scan request")
}

pub struct Harness {
    pub engine: Arc<MockEngine>,
    pub metrics: Arc<ScanMetrics>,
    pub ctx: ScanContext,
}

impl Harness {
    pub fn new(total_splits: usize) -> Self {
        init_tracing();
        let engine = MockEngine::new(total_splits);
        let metrics = Arc::new(ScanMetrics::default());
        let ctx = ScanContext::new(engine.clone(), engine.clone(), Arc::clone(&metrics));
        Self {
            engine,
            metrics,
            ctx,
        }
    }

    pub fn coordinator(&self, extra: &[(&str, &str)]) -> ScanCoordinator {
        ScanCoordinator::new(request(extra), self.ctx.clone())
    }
}
