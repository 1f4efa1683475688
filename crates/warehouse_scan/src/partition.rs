//! Partition descriptors handed to the host engine.
//!
//! A descriptor is immutable once built. Data partitions wrap one data
//! split; count partitions only carry the number of rows they owe.

use std::iter;
use std::sync::Arc;

use crate::engine::SplitTask;
use crate::error::{ScanError, ScanResult};
use crate::plan_cache::CommonPlanInfo;
use crate::split::{JobConfig, Split};

/// Work unit for one downstream reader.
#[derive(Debug, Clone)]
pub enum PartitionDescriptor {
    Data(DataPartition),
    Count(CountPartition),
}

impl PartitionDescriptor {
    pub fn as_data(&self) -> Option<&DataPartition> {
        match self {
            Self::Data(partition) => Some(partition),
            Self::Count(_) => None,
        }
    }

    pub fn as_count(&self) -> Option<&CountPartition> {
        match self {
            Self::Count(partition) => Some(partition),
            Self::Data(_) => None,
        }
    }

    /// Reader locations the host engine should prefer for this partition.
    pub fn preferred_locations(&self) -> &[String] {
        match self {
            Self::Data(partition) => partition.split.locations(),
            Self::Count(_) => &[],
        }
    }
}

/// Partition reading one data split.
#[derive(Debug, Clone)]
pub struct DataPartition {
    split: Split,
    job_config: Arc<[u8]>,
    buffer_max_bytes: u64,
    common_plan: Arc<CommonPlanInfo>,
}

impl DataPartition {
    pub fn new(
        split: Split,
        job_config: Arc<[u8]>,
        buffer_max_bytes: u64,
        common_plan: Arc<CommonPlanInfo>,
    ) -> Self {
        Self {
            split,
            job_config,
            buffer_max_bytes,
            common_plan,
        }
    }

    pub fn split(&self) -> &Split {
        &self.split
    }

    /// Encoded [`JobConfig`]; shared by every partition of the same plan.
    pub fn job_config(&self) -> &[u8] {
        &self.job_config
    }

    /// Ceiling for reader-side batch buffers, in bytes.
    pub fn buffer_max_bytes(&self) -> u64 {
        self.buffer_max_bytes
    }

    pub fn common_plan(&self) -> &Arc<CommonPlanInfo> {
        &self.common_plan
    }

    /// Resolves everything a worker needs to open this split.
    ///
    /// Fails when the job config does not decode or the broadcast metadata
    /// has already been released.
    pub fn task(&self) -> ScanResult<SplitTask> {
        let job = JobConfig::decode(&self.job_config)
            .map_err(|err| ScanError::execution("decode partition job config", err))?;
        if !self.common_plan.is_valid() {
            return Err(ScanError::execution(
                format!("session={} handle={}", job.session_id, job.handle_id),
                anyhow::anyhow!("broadcast plan metadata was released before the read started"),
            ));
        }
        Ok(SplitTask {
            split: self.split.clone(),
            schema_split: self.common_plan.schema_split().value().clone(),
            plan_split: self.common_plan.plan_split().value().clone(),
            job,
            buffer_max_bytes: self.buffer_max_bytes,
        })
    }
}

/// Partition that owes a fixed number of rows and reads nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountPartition {
    rows: u64,
}

impl CountPartition {
    pub fn new(rows: u64) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Largest task count the count fast path will split into.
pub const MAX_COUNT_TASKS: usize = 100_000;

/// Splits `count` rows over `tasks` count partitions.
///
/// The first `tasks - 1` partitions get `count / (tasks - 1)` rows each and
/// the last one gets the remainder `count % (tasks - 1)`, so the total is
/// always `count`.
pub fn count_partitions(count: u64, tasks: usize) -> ScanResult<Vec<CountPartition>> {
    if tasks < 2 {
        return Err(ScanError::Config(format!(
            "count fast path needs at least 2 tasks, got {tasks}"
        )));
    }
    if tasks > MAX_COUNT_TASKS {
        return Err(ScanError::Config(format!(
            "count fast path supports at most {MAX_COUNT_TASKS} tasks, got {tasks}"
        )));
    }
    let even_tasks = (tasks - 1) as u64;
    let per_task = count / even_tasks;
    let last_task = count % even_tasks;

    Ok(iter::repeat(CountPartition::new(per_task))
        .take(tasks - 1)
        .chain(iter::once(CountPartition::new(last_task)))
        .collect())
}
