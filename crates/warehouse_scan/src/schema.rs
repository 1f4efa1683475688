//! Schema discovery through a minimal planning call.

use anyhow::{anyhow, Context, Result};
use datafusion::arrow::datatypes::SchemaRef;
use tracing::{debug, warn};

use crate::config::ScanRequest;
use crate::engine::SplitSource;
use crate::query::schema_discovery_query;
use crate::split::{JobConfig, SCHEMA_DISCOVERY_SPLIT_HINT};

/// Suffix of the handle that owns schema-discovery resources.
const SCHEMA_HANDLE_SUFFIX: &str = "-schema";

/// Discovers the result schema of the scan's base query.
///
/// The planning call uses its own handle, which is released before returning
/// on both success and failure. A failed release is logged and does not
/// discard a schema that was discovered.
pub async fn resolve_schema(source: &dyn SplitSource, request: &ScanRequest) -> Result<SchemaRef> {
    let query = schema_discovery_query(request);
    let handle_id = format!("{}{SCHEMA_HANDLE_SUFFIX}", request.handle_id());
    let job = JobConfig::with_handle(request, query.as_str(), handle_id.as_str());
    debug!(query = %query, handle_id = %handle_id, "discovering scan schema");

    let discovered = discover(source, &job).await;
    let released = source
        .release(&handle_id)
        .await
        .with_context(|| format!("release schema discovery handle {handle_id}"));

    if let Err(release_err) = released {
        warn!(
            handle_id = %handle_id,
            error = %format!("{release_err:#}"),
            "schema discovery cleanup failed"
        );
    }
    discovered
}

async fn discover(source: &dyn SplitSource, job: &JobConfig) -> Result<SchemaRef> {
    let splits = source
        .get_splits(job, SCHEMA_DISCOVERY_SPLIT_HINT)
        .await
        .context("get splits for schema discovery")?;
    let schema_split = splits
        .first()
        .ok_or_else(|| anyhow!("engine returned no splits for schema discovery"))?;
    schema_split
        .schema()
        .cloned()
        .ok_or_else(|| anyhow!("schema split carries no schema"))
}
