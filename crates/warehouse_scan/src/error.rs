//! Error taxonomy surfaced by scan planning and partition reads.
//!
//! Remote capabilities report failures as `anyhow::Error`; the coordinator
//! wraps them into one of the variants below together with enough context
//! (session id, query text, handle id) to diagnose the failing scan.

use std::fmt;

use thiserror::Error;

/// Result alias used by the public scan API.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Coarse failure class, recorded by the coordinator when a scan aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorKind {
    Config,
    Planning,
    Execution,
    Release,
    Aborted,
}

impl fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Planning => "planning",
            Self::Execution => "execution",
            Self::Release => "release",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Errors returned by scan construction, planning, reading and release.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Missing or malformed scan options; raised at construction.
    #[error("invalid scan configuration: {0}")]
    Config(String),

    /// Schema discovery or split planning failed; no partitions were produced.
    #[error("planning failed for session {session_id} query `{query}`: {source:#}")]
    Planning {
        session_id: String,
        query: String,
        #[source]
        source: anyhow::Error,
    },

    /// Count query or partition read failed.
    #[error("execution failed ({context}): {source:#}")]
    Execution {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Releasing a remote resource handle failed.
    #[error("release of handle {handle_id} failed for session {session_id}: {source:#}")]
    Release {
        session_id: String,
        handle_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The scan already failed earlier and cannot be driven further.
    #[error("scan for session {session_id} previously failed with {kind} error")]
    Aborted {
        session_id: String,
        kind: ScanErrorKind,
    },
}

impl ScanError {
    /// Returns the coarse failure class for this error.
    pub fn kind(&self) -> ScanErrorKind {
        match self {
            Self::Config(_) => ScanErrorKind::Config,
            Self::Planning { .. } => ScanErrorKind::Planning,
            Self::Execution { .. } => ScanErrorKind::Execution,
            Self::Release { .. } => ScanErrorKind::Release,
            Self::Aborted { .. } => ScanErrorKind::Aborted,
        }
    }

    pub(crate) fn planning(
        session_id: impl Into<String>,
        query: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::Planning {
            session_id: session_id.into(),
            query: query.into(),
            source,
        }
    }

    pub(crate) fn execution(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Execution {
            context: context.into(),
            source,
        }
    }
}
