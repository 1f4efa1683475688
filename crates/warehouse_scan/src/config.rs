//! Per-scan configuration parsed from the host engine's option map.
//!
//! A [`ScanRequest`] is built once per logical scan and never mutated. Numeric
//! tunables missing from the option map fall back to `WAREHOUSE_SCAN_*`
//! environment variables and then to the documented defaults.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::partition::MAX_COUNT_TASKS;

pub const OPTION_TABLE: &str = "table";
pub const OPTION_QUERY: &str = "query";
pub const OPTION_SESSION_ID: &str = "session_id";
pub const OPTION_DEFAULT_DB: &str = "default_db";
pub const OPTION_COUNT_TASKS: &str = "count_tasks";
pub const OPTION_BUFFER_MAX_BYTES: &str = "buffer_max_bytes";
pub const OPTION_MAX_EXEC_RESULTS: &str = "max_exec_results";
pub const OPTION_COUNT_BATCH_ROWS: &str = "count_batch_rows";
pub const OPTION_URL: &str = "url";
pub const OPTION_USER: &str = "user";
pub const OPTION_PASSWORD: &str = "password";
pub const OPTION_HANDLE_ID: &str = "handle_id";

pub const DEFAULT_DATABASE: &str = "default";
pub const DEFAULT_COUNT_TASKS: usize = 100;
pub const DEFAULT_BUFFER_MAX_BYTES: u64 = i64::MAX as u64;
pub const DEFAULT_MAX_EXEC_RESULTS: u64 = 1_000;
pub const DEFAULT_COUNT_BATCH_ROWS: usize = 1_000;

const ENV_PREFIX: &str = "WAREHOUSE_SCAN_";

const RECOGNIZED_OPTIONS: &[&str] = &[
    OPTION_TABLE,
    OPTION_QUERY,
    OPTION_SESSION_ID,
    OPTION_DEFAULT_DB,
    OPTION_COUNT_TASKS,
    OPTION_BUFFER_MAX_BYTES,
    OPTION_MAX_EXEC_RESULTS,
    OPTION_COUNT_BATCH_ROWS,
    OPTION_URL,
    OPTION_USER,
    OPTION_PASSWORD,
    OPTION_HANDLE_ID,
];

/// Table name, optionally qualified by its database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub database: Option<String>,
    pub table: String,
}

impl TableRef {
    /// Parses `table` or `db.table`.
    pub fn parse(raw: &str) -> ScanResult<Self> {
        let raw = raw.trim();
        let (database, table) = match raw.split_once('.') {
            Some((db, table)) => (Some(db.trim()), table.trim()),
            None => (None, raw),
        };
        if table.is_empty() || matches!(database, Some(db) if db.is_empty()) {
            return Err(ScanError::Config(format!("invalid table reference `{raw}`")));
        }
        Ok(Self {
            database: database.map(str::to_string),
            table: table.to_string(),
        })
    }

    /// Renders `db.table`, using `default_db` when the reference is unqualified.
    pub fn qualified(&self, default_db: &str) -> String {
        format!(
            "{}.{}",
            self.database.as_deref().unwrap_or(default_db),
            self.table
        )
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.database {
            Some(db) => write!(f, "{db}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}

/// What a scan reads: a named table or a caller-supplied query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanSource {
    /// Full table scan; the base query is `SELECT * FROM <table>`.
    Table(TableRef),
    /// Raw query text used verbatim as the base query.
    Query(String),
}

/// Connection parameters forwarded to the remote engine.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Immutable configuration of one logical scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    source: ScanSource,
    session_id: String,
    handle_id: String,
    default_db: String,
    count_tasks: usize,
    buffer_max_bytes: Option<u64>,
    max_exec_results: u64,
    count_batch_rows: usize,
    connection: ConnectionParams,
    extra: BTreeMap<String, String>,
}

impl ScanRequest {
    /// Builds a request from host options, consulting the process environment
    /// for tunables the options leave unset.
    pub fn from_options(options: &HashMap<String, String>) -> ScanResult<Self> {
        Self::from_options_with_env(options, |key| std::env::var(key).ok())
    }

    /// Builds a request from host options and an explicit environment lookup.
    pub fn from_options_with_env<F>(options: &HashMap<String, String>, env: F) -> ScanResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| non_empty(options.get(key).cloned());
        let tunable = |key: &str| {
            lookup(key).or_else(|| {
                non_empty(env(&format!("{ENV_PREFIX}{}", key.to_ascii_uppercase())))
            })
        };

        let session_id = lookup(OPTION_SESSION_ID).ok_or_else(|| {
            ScanError::Config(
                "session id is required; the scan must be created from an open session"
                    .to_string(),
            )
        })?;

        let source = match (lookup(OPTION_TABLE), lookup(OPTION_QUERY)) {
            (Some(table), None) => ScanSource::Table(TableRef::parse(&table)?),
            (None, Some(query)) => ScanSource::Query(query),
            (Some(_), Some(_)) => {
                return Err(ScanError::Config(format!(
                    "options `{OPTION_TABLE}` and `{OPTION_QUERY}` are mutually exclusive"
                )))
            }
            (None, None) => {
                return Err(ScanError::Config(format!(
                    "one of `{OPTION_TABLE}` or `{OPTION_QUERY}` is required"
                )))
            }
        };

        let count_tasks = parse_usize(tunable(OPTION_COUNT_TASKS), DEFAULT_COUNT_TASKS)
            .map_err(config_error)?;
        // Decision: the count path divides by `count_tasks - 1` and builds one
        // partition per task; reject values outside that range up front.
        if !(2..=MAX_COUNT_TASKS).contains(&count_tasks) {
            return Err(ScanError::Config(format!(
                "`{OPTION_COUNT_TASKS}` must be between 2 and {MAX_COUNT_TASKS}, got {count_tasks}"
            )));
        }
        let buffer_max_bytes = tunable(OPTION_BUFFER_MAX_BYTES)
            .map(|raw| parse_u64(Some(raw), DEFAULT_BUFFER_MAX_BYTES))
            .transpose()
            .map_err(config_error)?;
        let max_exec_results =
            parse_u64(tunable(OPTION_MAX_EXEC_RESULTS), DEFAULT_MAX_EXEC_RESULTS)
                .map_err(config_error)?;
        let count_batch_rows =
            parse_usize(tunable(OPTION_COUNT_BATCH_ROWS), DEFAULT_COUNT_BATCH_ROWS)
                .map_err(config_error)?
                .max(1);

        let handle_id = lookup(OPTION_HANDLE_ID)
            .unwrap_or_else(|| format!("{session_id}-{:016x}", rand::random::<u64>()));

        let extra = options
            .iter()
            .filter(|(key, _)| !RECOGNIZED_OPTIONS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            source,
            session_id,
            handle_id,
            default_db: lookup(OPTION_DEFAULT_DB).unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            count_tasks,
            buffer_max_bytes,
            max_exec_results,
            count_batch_rows,
            connection: ConnectionParams {
                url: lookup(OPTION_URL).unwrap_or_default(),
                user: lookup(OPTION_USER),
                password: lookup(OPTION_PASSWORD),
            },
            extra,
        })
    }

    pub fn source(&self) -> &ScanSource {
        &self.source
    }

    /// Returns `true` when the scan reads a named table.
    pub fn is_full_table_scan(&self) -> bool {
        matches!(self.source, ScanSource::Table(_))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Remote handle id that ties every split of this scan to one release.
    pub fn handle_id(&self) -> &str {
        &self.handle_id
    }

    pub fn default_db(&self) -> &str {
        &self.default_db
    }

    /// Target task count for the count fast path (always >= 2).
    pub fn count_tasks(&self) -> usize {
        self.count_tasks
    }

    /// Buffer-size ceiling handed to partition readers.
    pub fn buffer_max_bytes(&self) -> u64 {
        self.buffer_max_bytes.unwrap_or(DEFAULT_BUFFER_MAX_BYTES)
    }

    /// Row cap applied to direct query execution.
    pub fn max_exec_results(&self) -> u64 {
        self.max_exec_results
    }

    /// Maximum rows per batch emitted by count partition readers.
    pub fn count_batch_rows(&self) -> usize {
        self.count_batch_rows
    }

    pub fn connection(&self) -> &ConnectionParams {
        &self.connection
    }

    /// Options not recognized by the planner, forwarded to the remote engine.
    pub fn extra_options(&self) -> &BTreeMap<String, String> {
        &self.extra
    }
}

/// Treats empty or whitespace-only values as absent.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|raw| !raw.trim().is_empty())
}

/// Parses an optional `usize` with fallback default.
fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

/// Parses an optional `u64` with fallback default.
fn parse_u64(value: Option<String>, default_value: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid u64 value: {raw}")),
        None => Ok(default_value),
    }
}

fn config_error(err: anyhow::Error) -> ScanError {
    ScanError::Config(format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn table_scan_uses_documented_defaults() {
        let request = ScanRequest::from_options_with_env(
            &options(&[("table", "sales.orders"), ("session_id", "s1")]),
            no_env,
        )
        .expect("valid options");

        assert!(request.is_full_table_scan());
        assert_eq!(
            request.source(),
            &ScanSource::Table(TableRef {
                database: Some("sales".to_string()),
                table: "orders".to_string(),
            })
        );
        assert_eq!(request.default_db(), DEFAULT_DATABASE);
        assert_eq!(request.count_tasks(), DEFAULT_COUNT_TASKS);
        assert_eq!(request.buffer_max_bytes(), DEFAULT_BUFFER_MAX_BYTES);
        assert_eq!(request.max_exec_results(), DEFAULT_MAX_EXEC_RESULTS);
        assert!(request.handle_id().starts_with("s1-"));
    }

    #[test]
    fn missing_session_id_fails_fast() {
        let err = ScanRequest::from_options_with_env(&options(&[("table", "t")]), no_env)
            .expect_err("session id is required");
        assert!(matches!(err, ScanError::Config(message) if message.contains("session id")));
    }

    #[test]
    fn table_and_query_are_mutually_exclusive() {
        let both = options(&[("table", "t"), ("query", "SELECT 1"), ("session_id", "s")]);
        assert!(ScanRequest::from_options_with_env(&both, no_env).is_err());

        let neither = options(&[("session_id", "s")]);
        assert!(ScanRequest::from_options_with_env(&neither, no_env).is_err());
    }

    #[test]
    fn count_tasks_below_two_is_rejected() {
        let opts = options(&[("query", "SELECT 1"), ("session_id", "s"), ("count_tasks", "1")]);
        let err = ScanRequest::from_options_with_env(&opts, no_env).expect_err("T=1 rejected");
        assert!(err.to_string().contains("count_tasks"));
    }

    #[test]
    fn count_tasks_above_ceiling_is_rejected() {
        let opts = options(&[
            ("query", "SELECT 1"),
            ("session_id", "s"),
            ("count_tasks", "18446744073709551615"),
        ]);
        let err = ScanRequest::from_options_with_env(&opts, no_env).expect_err("too many tasks");
        assert!(matches!(err, ScanError::Config(message) if message.contains("count_tasks")));

        let at_ceiling = MAX_COUNT_TASKS.to_string();
        let opts = options(&[
            ("query", "SELECT 1"),
            ("session_id", "s"),
            ("count_tasks", at_ceiling.as_str()),
        ]);
        let request = ScanRequest::from_options_with_env(&opts, no_env).expect("ceiling accepted");
        assert_eq!(request.count_tasks(), MAX_COUNT_TASKS);
    }

    #[test]
    fn malformed_tunable_is_a_config_error() {
        let opts = options(&[
            ("query", "SELECT 1"),
            ("session_id", "s"),
            ("buffer_max_bytes", "lots"),
        ]);
        let err = ScanRequest::from_options_with_env(&opts, no_env).expect_err("bad number");
        assert!(matches!(err, ScanError::Config(message) if message.contains("lots")));
    }

    #[test]
    fn environment_fills_unset_tunables_only() {
        let env = |key: &str| match key {
            "WAREHOUSE_SCAN_COUNT_TASKS" => Some("8".to_string()),
            "WAREHOUSE_SCAN_BUFFER_MAX_BYTES" => Some("4096".to_string()),
            _ => None,
        };
        let opts = options(&[
            ("query", "SELECT 1"),
            ("session_id", "s"),
            ("buffer_max_bytes", "1024"),
            ("fetch.size", "50"),
        ]);
        let request = ScanRequest::from_options_with_env(&opts, env).expect("valid options");
        assert_eq!(request.count_tasks(), 8);
        assert_eq!(request.buffer_max_bytes(), 1024);
        assert_eq!(
            request.extra_options().get("fetch.size").map(String::as_str),
            Some("50")
        );
    }

    #[test]
    fn explicit_handle_id_is_kept() {
        let opts = options(&[("query", "SELECT 1"), ("session_id", "s"), ("handle_id", "h-7")]);
        let request = ScanRequest::from_options_with_env(&opts, no_env).expect("valid options");
        assert_eq!(request.handle_id(), "h-7");
    }

    #[test]
    fn table_ref_qualifies_with_default_database() {
        let table = TableRef::parse("orders").expect("table");
        assert_eq!(table.qualified("default"), "default.orders");
        assert!(TableRef::parse(".orders").is_err());
        assert!(TableRef::parse("db.").is_err());
    }

    #[test]
    fn connection_debug_redacts_password() {
        let params = ConnectionParams {
            url: "warehouse://host:10000".to_string(),
            user: Some("etl".to_string()),
            password: Some("hunter2".to_string()),
        };
        let rendered = format!("{params:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
