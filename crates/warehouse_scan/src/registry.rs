//! Session-scoped tracking of remote resource handles.
//!
//! Every emission registers the handle that pins its splits on the remote
//! engine under the scan's session id. A later emission for the same session
//! overwrites the entry; release is explicit and happens on scan close.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{info, warn};

use crate::engine::SplitSource;
use crate::error::{ScanError, ScanResult};
use crate::metrics::ScanMetrics;
use crate::plan_cache::CommonPlanInfo;

/// Remote handle id plus the broadcast metadata it keeps alive.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    handle_id: String,
    common_plan: Option<Arc<CommonPlanInfo>>,
}

impl ResourceHandle {
    pub fn new(handle_id: impl Into<String>, common_plan: Option<Arc<CommonPlanInfo>>) -> Self {
        Self {
            handle_id: handle_id.into(),
            common_plan,
        }
    }

    pub fn handle_id(&self) -> &str {
        &self.handle_id
    }

    pub fn common_plan(&self) -> Option<&Arc<CommonPlanInfo>> {
        self.common_plan.as_ref()
    }
}

/// Map from session id to the outstanding handle of that session's scan.
pub struct ResourceRegistry {
    source: Arc<dyn SplitSource>,
    handles: Mutex<HashMap<String, ResourceHandle>>,
    metrics: Arc<ScanMetrics>,
}

impl ResourceRegistry {
    pub fn new(source: Arc<dyn SplitSource>, metrics: Arc<ScanMetrics>) -> Self {
        Self {
            source,
            handles: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Registers `handle` for `session_id`, returning the handle it replaced.
    pub fn register(&self, session_id: &str, handle: ResourceHandle) -> Option<ResourceHandle> {
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let replaced = handles.insert(session_id.to_string(), handle);
        if let Some(previous) = replaced.as_ref() {
            warn!(
                session_id,
                handle_id = previous.handle_id(),
                "replacing unreleased resource handle"
            );
        }
        replaced
    }

    /// Returns the handle currently tracked for `session_id`.
    pub fn get(&self, session_id: &str) -> Option<ResourceHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Number of sessions with a tracked handle.
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases `handle` on the remote engine and destroys its broadcasts.
    ///
    /// The registry entry is dropped only if it still refers to `handle`; a
    /// newer handle registered for the same session is left alone.
    pub async fn release(&self, session_id: &str, handle: &ResourceHandle) -> ScanResult<()> {
        if let Err(err) = self
            .source
            .release(handle.handle_id())
            .await
            .with_context(|| format!("release remote handle {}", handle.handle_id()))
        {
            self.metrics.record_release(false);
            return Err(ScanError::Release {
                session_id: session_id.to_string(),
                handle_id: handle.handle_id().to_string(),
                source: err,
            });
        }
        self.metrics.record_release(true);

        if let Some(common_plan) = handle.common_plan() {
            common_plan.destroy();
        }

        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handles
            .get(session_id)
            .is_some_and(|tracked| tracked.handle_id() == handle.handle_id())
        {
            handles.remove(session_id);
        }
        info!(session_id, handle_id = handle.handle_id(), "released resource handle");
        Ok(())
    }
}
