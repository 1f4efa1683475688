//! SQL text assembly for scan, count and schema-discovery queries.
//!
//! Every scan query has the shape
//! `SELECT <projection> FROM (<base query>) AS <alias> [WHERE <clause>]`.
//! An empty projection becomes `count(*)`, which routes the scan through the
//! count fast path.

use datafusion::arrow::datatypes::Schema;
use datafusion::logical_expr::Expr;
use tracing::info;

use crate::config::{ScanRequest, ScanSource};
use crate::filter::{build_where_clause, FilterTranslator};

/// Projection used when no columns are required.
pub const COUNT_STAR: &str = "count(*)";

/// Quotes an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quotes a string literal with single quotes, doubling embedded quotes.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Renders the projection list for `columns`, in input order.
pub fn projections(columns: &[String]) -> String {
    if columns.is_empty() {
        return COUNT_STAR.to_string();
    }
    columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn select_star(table: &str) -> String {
    format!("SELECT * FROM {table}")
}

/// Generates a fresh subquery alias.
pub fn random_alias() -> String {
    format!("q_{:016x}", rand::random::<u64>())
}

/// Wraps `base_query` in a projecting, aliased and optionally filtered select.
pub fn select_project_alias_filter(
    projection: &str,
    base_query: &str,
    alias: &str,
    where_clause: Option<&str>,
) -> String {
    match where_clause {
        Some(clause) => {
            format!("SELECT {projection} FROM ({base_query}) AS {alias} WHERE {clause}")
        }
        None => format!("SELECT {projection} FROM ({base_query}) AS {alias}"),
    }
}

/// Builds the single SQL statement for a scan.
///
/// Filters are always translated against `base_schema`, not the pruned
/// schema, so predicates on pruned-away columns still resolve.
pub fn build_query(
    required_columns: &[String],
    pushed_filters: &[Expr],
    source: &ScanSource,
    base_schema: &Schema,
    translator: &dyn FilterTranslator,
) -> String {
    let base_query = match source {
        ScanSource::Table(table) => select_star(&table.to_string()),
        ScanSource::Query(query) => query.clone(),
    };
    let where_clause = build_where_clause(pushed_filters, base_schema, translator);
    let query = select_project_alias_filter(
        &projections(required_columns),
        &base_query,
        &random_alias(),
        where_clause.as_deref(),
    );
    info!(query = %query, "final query");
    query
}

/// Builds the query used to discover the result schema of a scan.
pub fn schema_discovery_query(request: &ScanRequest) -> String {
    match request.source() {
        ScanSource::Table(table) => select_star(&table.qualified(request.default_db())),
        ScanSource::Query(query) => query.clone(),
    }
}
