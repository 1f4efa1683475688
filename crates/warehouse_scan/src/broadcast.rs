//! Read-only values shared with every partition reader of a scan.
//!
//! A [`Broadcast`] is distributed once and then only read. Its one mutable
//! bit is validity: destroying a broadcast marks every clone invalid, which
//! forces the plan cache to redistribute instead of reusing it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::split::Split;

/// Shared, read-only handle to a distributed value.
#[derive(Debug)]
pub struct Broadcast<T> {
    id: u64,
    value: Arc<T>,
    valid: Arc<AtomicBool>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
            valid: Arc::clone(&self.valid),
        }
    }
}

impl<T> Broadcast<T> {
    pub fn new(id: u64, value: T) -> Self {
        Self {
            id,
            value: Arc::new(value),
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns `false` once any clone has been destroyed.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Invalidates the value for every holder.
    pub fn destroy(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            debug!(broadcast_id = self.id, "destroyed broadcast");
        }
    }
}

/// Capability that distributes a split to every worker of the cluster.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, split: Split) -> Result<Broadcast<Split>>;
}

/// In-process broadcaster: workers share the coordinator's memory.
#[derive(Debug, Default)]
pub struct LocalBroadcaster {
    next_id: AtomicU64,
}

impl LocalBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broadcaster for LocalBroadcaster {
    async fn broadcast(&self, split: Split) -> Result<Broadcast<Split>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Broadcast::new(id, split))
    }
}
