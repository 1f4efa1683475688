//! Distributed scan planning over a remote SQL warehouse engine.
//!
//! A host query engine reads a warehouse table (or an arbitrary query) by
//! driving a [`ScanCoordinator`]:
//! - schema discovery through a minimal planning call on the remote engine,
//! - column pruning and filter pushdown folded into one remote SQL statement,
//! - split planning, with the two metadata splits distributed once per
//!   session and reused while unchanged,
//! - a count fast path when no columns are needed,
//! - session-scoped release of the remote resources a plan pins.
//!
//! The remote engine itself is reached through the capability traits in
//! [`engine`]; this crate owns planning and partition bookkeeping only.

pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod partition;
pub mod plan_cache;
pub mod query;
pub mod reader;
pub mod registry;
pub mod schema;
pub mod split;

pub use broadcast::{Broadcast, Broadcaster, LocalBroadcaster};
pub use config::{ConnectionParams, ScanRequest, ScanSource, TableRef};
pub use coordinator::{ScanContext, ScanCoordinator, ScanPhase};
pub use engine::{BatchReader, BatchSource, QueryExecutor, SplitSource, SplitTask};
pub use error::{ScanError, ScanErrorKind, ScanResult};
pub use filter::{FilterPushdown, FilterTranslator, SqlFilterTranslator};
pub use metrics::{ScanMetrics, ScanMetricsSnapshot};
pub use partition::{CountPartition, DataPartition, PartitionDescriptor};
pub use plan_cache::{CommonPlanCache, CommonPlanInfo};
pub use reader::PartitionReader;
pub use registry::{ResourceHandle, ResourceRegistry};
pub use split::{JobConfig, Split, SplitPlan};
