//! Splits issued by the remote planner and the execution config shipped with them.
//!
//! A plan is an ordered list of splits. Index 0 is the schema split, index 1
//! the plan split (serialized query plan); both are metadata only. Every
//! split from index 2 on is a data split and maps to exactly one partition.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use datafusion::arrow::datatypes::SchemaRef;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{ConnectionParams, ScanRequest};
use crate::engine::SplitSource;

/// Number of leading metadata splits in every plan.
pub const METADATA_SPLIT_COUNT: usize = 2;

/// Split-count hint sent with schema discovery (the minimum the engine accepts).
pub const SCHEMA_DISCOVERY_SPLIT_HINT: usize = 0;

/// Split-count hint sent with data planning; the engine decides the real count.
pub const PLANNING_SPLIT_HINT: usize = 1;

/// Binary prefix that marks an encoded [`JobConfig`].
const JOB_CONFIG_MAGIC: &[u8] = b"warehouse_scan.job_config.v1:";

/// Opaque unit of work issued by the remote planner.
///
/// Equality is token equality; the attached schema and locations are hints.
#[derive(Clone)]
pub struct Split {
    token: Arc<[u8]>,
    schema: Option<SchemaRef>,
    locations: Vec<String>,
}

impl Split {
    pub fn new(token: impl Into<Arc<[u8]>>) -> Self {
        Self {
            token: token.into(),
            schema: None,
            locations: Vec::new(),
        }
    }

    /// Attaches the result schema this split describes.
    pub fn with_schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Attaches preferred reader locations.
    pub fn with_locations(mut self, locations: Vec<String>) -> Self {
        self.locations = locations;
        self
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Schema carried by the split, if any. Only schema splits must carry one.
    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }
}

impl PartialEq for Split {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for Split {}

impl fmt::Debug for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = &self.token[..self.token.len().min(16)];
        f.debug_struct("Split")
            .field("token", &hex::encode(preview))
            .field("token_len", &self.token.len())
            .field("has_schema", &self.schema.is_some())
            .field("locations", &self.locations)
            .finish()
    }
}

/// Execution configuration sufficient for a worker to re-issue its split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Finalized SQL the splits were planned for.
    pub query: String,
    pub database: String,
    pub connection: ConnectionParams,
    pub session_id: String,
    /// Remote handle that owns the planned resources.
    pub handle_id: String,
    /// Unrecognized scan options forwarded to the engine.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl JobConfig {
    /// Builds the job config for `query` under the scan's own handle.
    pub fn for_query(request: &ScanRequest, query: impl Into<String>) -> Self {
        Self::with_handle(request, query, request.handle_id())
    }

    /// Builds a job config bound to an explicit handle id.
    pub fn with_handle(
        request: &ScanRequest,
        query: impl Into<String>,
        handle_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            database: request.default_db().to_string(),
            connection: request.connection().clone(),
            session_id: request.session_id().to_string(),
            handle_id: handle_id.into(),
            properties: request.extra_options().clone(),
        }
    }

    /// Serializes the config for shipping inside partition descriptors.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)
            .with_context(|| format!("encode job config for handle {}", self.handle_id))?;
        let mut buf = Vec::with_capacity(JOB_CONFIG_MAGIC.len() + payload.len());
        buf.extend_from_slice(JOB_CONFIG_MAGIC);
        buf.extend_from_slice(payload.as_slice());
        Ok(buf)
    }

    /// Decodes a config produced by [`JobConfig::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let payload = buf
            .strip_prefix(JOB_CONFIG_MAGIC)
            .ok_or_else(|| anyhow!("job config payload is missing its magic prefix"))?;
        serde_json::from_slice(payload).context("decode job config")
    }
}

/// Plan of one finalized query, split into metadata and data splits.
#[derive(Debug, Clone)]
pub struct SplitPlan {
    splits: Vec<Split>,
}

impl SplitPlan {
    pub fn new(splits: Vec<Split>) -> Self {
        Self { splits }
    }

    /// Total number of splits, including the two metadata splits.
    pub fn total(&self) -> usize {
        self.splits.len()
    }

    /// Returns `(schema split, plan split)` when the plan has data splits.
    pub fn metadata(&self) -> Option<(&Split, &Split)> {
        if self.data_splits().is_empty() {
            return None;
        }
        Some((&self.splits[0], &self.splits[1]))
    }

    pub fn data_splits(&self) -> &[Split] {
        self.splits.get(METADATA_SPLIT_COUNT..).unwrap_or(&[])
    }
}

/// Requests the ordered split list for a finalized query.
pub async fn plan_splits(source: &dyn SplitSource, job: &JobConfig) -> Result<SplitPlan> {
    if !job.properties.is_empty() {
        info!(properties = ?job.properties, "additional properties for generating splits");
    }
    let splits = source
        .get_splits(job, PLANNING_SPLIT_HINT)
        .await
        .with_context(|| format!("get splits for handle {}", job.handle_id))?;
    info!(splits = splits.len(), "number of splits generated");
    let plan = SplitPlan::new(splits);
    if plan.data_splits().is_empty() {
        warn!(query = %job.query, total = plan.total(), "no data splits generated for query");
    }
    Ok(plan)
}
