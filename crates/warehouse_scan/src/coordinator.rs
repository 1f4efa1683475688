//! Scan coordination: the public contract the host engine drives.
//!
//! The host engine calls, in order:
//! 1. [`ScanCoordinator::resolve_schema`] to pull the unpruned schema,
//! 2. [`ScanCoordinator::prune_columns`] to push the pruned schema,
//! 3. [`ScanCoordinator::push_filters`] / [`ScanCoordinator::pushed_filters`]
//!    to negotiate filter pushdown,
//! 4. [`ScanCoordinator::emit_partitions`] to obtain partition descriptors,
//! 5. [`ScanCoordinator::close`] to release the session's remote handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::ScalarValue;
use datafusion::logical_expr::Expr;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, Instrument};

use crate::broadcast::{Broadcaster, LocalBroadcaster};
use crate::config::ScanRequest;
use crate::engine::{QueryExecutor, SplitSource};
use crate::error::{ScanError, ScanErrorKind, ScanResult};
use crate::filter::{negotiate_pushdown, FilterTranslator, SqlFilterTranslator};
use crate::metrics::ScanMetrics;
use crate::partition::{count_partitions, DataPartition, PartitionDescriptor};
use crate::plan_cache::CommonPlanCache;
use crate::query::{build_query, schema_discovery_query};
use crate::registry::{ResourceHandle, ResourceRegistry};
use crate::schema;
use crate::split::{plan_splits, JobConfig};

/// Lifecycle phase of one logical scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Unplanned,
    SchemaResolved,
    Pruned,
    Planned,
    PartitionsEmitted,
    Failed(ScanErrorKind),
}

/// Collaborators shared by the coordinators of one session.
#[derive(Clone)]
pub struct ScanContext {
    pub executor: Arc<dyn QueryExecutor>,
    pub splits: Arc<dyn SplitSource>,
    pub translator: Arc<dyn FilterTranslator>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub registry: Arc<ResourceRegistry>,
    pub metrics: Arc<ScanMetrics>,
}

impl ScanContext {
    /// Builds a context with the default SQL translator, an in-process
    /// broadcaster and a fresh registry releasing through `splits`.
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        splits: Arc<dyn SplitSource>,
        metrics: Arc<ScanMetrics>,
    ) -> Self {
        let registry = Arc::new(ResourceRegistry::new(
            Arc::clone(&splits),
            Arc::clone(&metrics),
        ));
        Self {
            executor,
            splits,
            translator: Arc::new(SqlFilterTranslator),
            broadcaster: Arc::new(LocalBroadcaster::new()),
            registry,
            metrics,
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn FilterTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_registry(mut self, registry: Arc<ResourceRegistry>) -> Self {
        self.registry = registry;
        self
    }
}

impl fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanContext")
            .field("tracked_sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Mutable per-scan state, guarded by the coordinator lock.
struct ScanState {
    phase: ScanPhase,
    /// Full schema, frozen after the first resolution.
    base_schema: Option<SchemaRef>,
    /// Pruned schema; an empty schema means "count only".
    active_schema: Option<SchemaRef>,
    pushed_filters: Vec<Expr>,
    handle: Option<ResourceHandle>,
}

/// Plans one logical scan and owns its partition lifecycle.
pub struct ScanCoordinator {
    request: ScanRequest,
    ctx: ScanContext,
    plan_cache: CommonPlanCache,
    state: Mutex<ScanState>,
}

impl ScanCoordinator {
    pub fn new(request: ScanRequest, ctx: ScanContext) -> Self {
        let plan_cache = CommonPlanCache::new(Arc::clone(&ctx.broadcaster), Arc::clone(&ctx.metrics));
        Self {
            request,
            ctx,
            plan_cache,
            state: Mutex::new(ScanState {
                phase: ScanPhase::Unplanned,
                base_schema: None,
                active_schema: None,
                pushed_filters: Vec::new(),
                handle: None,
            }),
        }
    }

    /// Parses host options and builds a coordinator; fails fast on bad options.
    pub fn from_options(options: &HashMap<String, String>, ctx: ScanContext) -> ScanResult<Self> {
        Ok(Self::new(ScanRequest::from_options(options)?, ctx))
    }

    pub fn request(&self) -> &ScanRequest {
        &self.request
    }

    pub fn metrics(&self) -> &Arc<ScanMetrics> {
        &self.ctx.metrics
    }

    pub async fn phase(&self) -> ScanPhase {
        self.state.lock().await.phase
    }

    /// Returns the scan schema, resolving it remotely on first use.
    ///
    /// Before pruning this is the base schema; afterwards it is the pruned
    /// schema the host pushed.
    pub async fn resolve_schema(&self) -> ScanResult<SchemaRef> {
        let mut state = self.state.lock().await;
        self.ensure_live(&state)?;
        let base = self.ensure_schema(&mut state).await?;
        Ok(state.active_schema.clone().unwrap_or(base))
    }

    /// Returns the full, unpruned schema.
    pub async fn base_schema(&self) -> ScanResult<SchemaRef> {
        let mut state = self.state.lock().await;
        self.ensure_live(&state)?;
        self.ensure_schema(&mut state).await
    }

    /// Replaces the active schema with `required`; the base schema is kept
    /// for filter translation.
    pub async fn prune_columns(&self, required: SchemaRef) -> ScanResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_live(&state)?;
        let base = self.ensure_schema(&mut state).await?;
        if let Some(unknown) = required
            .fields()
            .iter()
            .find(|field| base.field_with_name(field.name()).is_err())
        {
            return Err(ScanError::Config(format!(
                "pruned column `{}` is not part of the scan schema",
                unknown.name()
            )));
        }
        debug!(
            session_id = self.request.session_id(),
            columns = required.fields().len(),
            "pruned scan columns"
        );
        state.active_schema = Some(required);
        state.phase = ScanPhase::Pruned;
        Ok(())
    }

    /// Negotiates pushdown for `candidates` and returns the filters the caller
    /// must still evaluate. Replaces any previously accepted set.
    pub async fn push_filters(&self, candidates: Vec<Expr>) -> ScanResult<Vec<Expr>> {
        let mut state = self.state.lock().await;
        self.ensure_live(&state)?;
        let base = self.ensure_schema(&mut state).await?;
        let outcome = negotiate_pushdown(candidates, &base, self.ctx.translator.as_ref());
        self.ctx
            .metrics
            .record_pushdown(outcome.accepted.len(), outcome.rejected.len());
        debug!(
            session_id = self.request.session_id(),
            pushed = outcome.accepted.len(),
            unsupported = outcome.rejected.len(),
            "negotiated filter pushdown"
        );
        state.pushed_filters = outcome.accepted;
        Ok(outcome.rejected)
    }

    /// Filters accepted by the latest pushdown negotiation.
    pub async fn pushed_filters(&self) -> Vec<Expr> {
        self.state.lock().await.pushed_filters.clone()
    }

    /// Plans the scan and returns its partition descriptors.
    ///
    /// A scan with no active columns takes the count fast path. Either way
    /// the session's resource handle is registered, even when planning fails
    /// or yields no partitions, so [`ScanCoordinator::close`] has something
    /// deterministic to release.
    pub async fn emit_partitions(&self) -> ScanResult<Vec<PartitionDescriptor>> {
        let span = info_span!(
            "emit_partitions",
            session_id = self.request.session_id(),
            handle_id = self.request.handle_id()
        );
        self.emit_partitions_locked().instrument(span).await
    }

    /// Releases the resource handle registered by the last emission.
    pub async fn close(&self) -> ScanResult<()> {
        let mut state = self.state.lock().await;
        let Some(handle) = state.handle.take() else {
            return Ok(());
        };
        if let Err(err) = self
            .ctx
            .registry
            .release(self.request.session_id(), &handle)
            .await
        {
            state.handle = Some(handle);
            return Err(err);
        }
        Ok(())
    }

    async fn emit_partitions_locked(&self) -> ScanResult<Vec<PartitionDescriptor>> {
        let mut state = self.state.lock().await;
        self.ensure_live(&state)?;
        let base = self.ensure_schema(&mut state).await?;
        let active = state
            .active_schema
            .clone()
            .unwrap_or_else(|| Arc::clone(&base));
        let columns = active
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect::<Vec<_>>();
        let query = build_query(
            &columns,
            &state.pushed_filters,
            self.request.source(),
            &base,
            self.ctx.translator.as_ref(),
        );

        let outcome = if columns.is_empty() {
            self.plan_count_partitions(&query, &mut state).await
        } else {
            self.plan_data_partitions(&query, &mut state).await
        };

        let handle = ResourceHandle::new(self.request.handle_id(), self.plan_cache.current().await);
        self.ctx
            .registry
            .register(self.request.session_id(), handle.clone());
        state.handle = Some(handle);

        match outcome {
            Ok(partitions) => {
                state.phase = ScanPhase::PartitionsEmitted;
                Ok(partitions)
            }
            Err(err) => {
                state.phase = ScanPhase::Failed(err.kind());
                Err(err)
            }
        }
    }

    /// Rejects calls on a scan that already failed.
    fn ensure_live(&self, state: &ScanState) -> ScanResult<()> {
        match state.phase {
            ScanPhase::Failed(kind) => Err(ScanError::Aborted {
                session_id: self.request.session_id().to_string(),
                kind,
            }),
            _ => Ok(()),
        }
    }

    /// Resolves and freezes the base schema on first use.
    async fn ensure_schema(&self, state: &mut ScanState) -> ScanResult<SchemaRef> {
        if let Some(schema) = state.base_schema.as_ref() {
            return Ok(Arc::clone(schema));
        }
        match schema::resolve_schema(self.ctx.splits.as_ref(), &self.request).await {
            Ok(resolved) => {
                self.ctx.metrics.record_schema_resolution();
                state.base_schema = Some(Arc::clone(&resolved));
                state.active_schema = Some(Arc::clone(&resolved));
                state.phase = ScanPhase::SchemaResolved;
                Ok(resolved)
            }
            Err(err) => {
                let err = ScanError::planning(
                    self.request.session_id(),
                    schema_discovery_query(&self.request),
                    err,
                );
                state.phase = ScanPhase::Failed(err.kind());
                Err(err)
            }
        }
    }

    /// Count fast path: one aggregate query split into evenly sized chunks.
    async fn plan_count_partitions(
        &self,
        query: &str,
        state: &mut ScanState,
    ) -> ScanResult<Vec<PartitionDescriptor>> {
        info!(query, "executing count");
        let context = format!("session={} query={query}", self.request.session_id());
        let batch = self
            .ctx
            .executor
            .execute_query(
                self.request.connection(),
                self.request.default_db(),
                query,
                self.request.max_exec_results(),
            )
            .await
            .map_err(|err| ScanError::execution(context.clone(), err))?;
        let count = read_count(&batch).map_err(|err| ScanError::execution(context, err))?;
        state.phase = ScanPhase::Planned;

        let partitions = count_partitions(count, self.request.count_tasks())?;
        self.ctx.metrics.record_count_scan(partitions.len());
        info!(count, tasks = partitions.len(), "split count into partitions");
        Ok(partitions
            .into_iter()
            .map(PartitionDescriptor::Count)
            .collect())
    }

    /// Split path: plan, reconcile the shared metadata, one partition per data split.
    async fn plan_data_partitions(
        &self,
        query: &str,
        state: &mut ScanState,
    ) -> ScanResult<Vec<PartitionDescriptor>> {
        let planning_error = |err: anyhow::Error| {
            ScanError::planning(self.request.session_id(), query.to_string(), err)
        };

        let job = JobConfig::for_query(&self.request, query);
        let plan = plan_splits(self.ctx.splits.as_ref(), &job)
            .await
            .map_err(planning_error)?;
        state.phase = ScanPhase::Planned;

        let Some((schema_split, plan_split)) = plan.metadata() else {
            self.ctx.metrics.record_split_plan(0);
            return Ok(Vec::new());
        };
        let common_plan = self
            .plan_cache
            .reconcile(schema_split, plan_split)
            .await
            .map_err(planning_error)?;

        let data_splits = plan.data_splits();
        info!(splits = data_splits.len(), "serializing data splits for executors");
        let job_config: Arc<[u8]> = job.encode().map_err(planning_error)?.into();
        let buffer_max_bytes = self.request.buffer_max_bytes();
        debug!(buffer_max_bytes, "ceiling for reader buffers");

        let started = Instant::now();
        let partitions = data_splits
            .iter()
            .map(|split| {
                PartitionDescriptor::Data(DataPartition::new(
                    split.clone(),
                    Arc::clone(&job_config),
                    buffer_max_bytes,
                    Arc::clone(&common_plan),
                ))
            })
            .collect::<Vec<_>>();
        info!(
            splits = partitions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "serialized data splits"
        );
        self.ctx.metrics.record_split_plan(partitions.len());
        Ok(partitions)
    }
}

/// Reads the scalar row count from the first cell of a count result.
fn read_count(batch: &RecordBatch) -> anyhow::Result<u64> {
    if batch.num_rows() == 0 || batch.num_columns() == 0 {
        bail!("count query returned no rows");
    }
    let value = ScalarValue::try_from_array(batch.column(0), 0)?;
    let count = match value {
        ScalarValue::Int64(Some(v)) => u64::try_from(v).ok(),
        ScalarValue::Int32(Some(v)) => u64::try_from(v).ok(),
        ScalarValue::UInt64(Some(v)) => Some(v),
        ScalarValue::UInt32(Some(v)) => Some(v.into()),
        _ => None,
    };
    count.ok_or_else(|| anyhow!("count query returned unexpected value {value}"))
}
