//! Cache of the metadata split pair broadcast for a logical scan.
//!
//! Every data partition needs the schema split and the plan split. They are
//! distributed once and shared, so coordinator-to-worker traffic does not grow
//! with the partition count. A retried or chained emission that plans the
//! same pair reuses the previous distribution as long as it is still valid.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::broadcast::{Broadcast, Broadcaster};
use crate::metrics::ScanMetrics;
use crate::split::Split;

/// Broadcast (schema split, plan split) pair shared by all data partitions.
#[derive(Debug, Clone)]
pub struct CommonPlanInfo {
    schema_split: Broadcast<Split>,
    plan_split: Broadcast<Split>,
}

impl CommonPlanInfo {
    pub fn new(schema_split: Broadcast<Split>, plan_split: Broadcast<Split>) -> Self {
        Self {
            schema_split,
            plan_split,
        }
    }

    pub fn schema_split(&self) -> &Broadcast<Split> {
        &self.schema_split
    }

    pub fn plan_split(&self) -> &Broadcast<Split> {
        &self.plan_split
    }

    /// Returns `true` while both halves are still distributed.
    pub fn is_valid(&self) -> bool {
        self.schema_split.is_valid() && self.plan_split.is_valid()
    }

    /// Returns `true` if this pair was distributed for exactly these tokens.
    pub fn matches(&self, schema_split: &Split, plan_split: &Split) -> bool {
        self.plan_split.value() == plan_split && self.schema_split.value() == schema_split
    }

    /// Invalidates both halves for every holder.
    pub fn destroy(&self) {
        self.schema_split.destroy();
        self.plan_split.destroy();
    }
}

/// Lock-guarded cell holding the most recent [`CommonPlanInfo`] of a scan.
pub struct CommonPlanCache {
    current: Mutex<Option<Arc<CommonPlanInfo>>>,
    broadcaster: Arc<dyn Broadcaster>,
    metrics: Arc<ScanMetrics>,
}

impl CommonPlanCache {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, metrics: Arc<ScanMetrics>) -> Self {
        Self {
            current: Mutex::new(None),
            broadcaster,
            metrics,
        }
    }

    /// Returns the cached pair, if any.
    pub async fn current(&self) -> Option<Arc<CommonPlanInfo>> {
        self.current.lock().await.clone()
    }

    /// Returns the cached pair when it is valid and matches both candidates,
    /// otherwise distributes the candidates and caches the new pair.
    ///
    /// The lock is held across distribution so overlapping callers cannot
    /// install divergent pairs.
    pub async fn reconcile(
        &self,
        schema_split: &Split,
        plan_split: &Split,
    ) -> Result<Arc<CommonPlanInfo>> {
        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            if existing.is_valid() && existing.matches(schema_split, plan_split) {
                debug!(
                    schema_broadcast = existing.schema_split().id(),
                    plan_broadcast = existing.plan_split().id(),
                    "reusing broadcast plan and schema splits"
                );
                self.metrics.record_broadcast_reuse();
                return Ok(Arc::clone(existing));
            }
        }

        let plan = self
            .broadcaster
            .broadcast(plan_split.clone())
            .await
            .context("broadcast plan split")?;
        let schema = self
            .broadcaster
            .broadcast(schema_split.clone())
            .await
            .context("broadcast schema split")?;
        self.metrics.record_broadcast(2);
        info!(
            schema_broadcast = schema.id(),
            plan_broadcast = plan.id(),
            "broadcast plan and schema splits"
        );

        let info = Arc::new(CommonPlanInfo::new(schema, plan));
        *current = Some(Arc::clone(&info));
        Ok(info)
    }
}
