//! The error taxonomy for the CDC core, and the propagation policy each
//! variant carries (see spec §7: data errors never stop the stream,
//! infrastructure errors do).

use std::fmt;

/// A single merge/maintenance failure pinned to the table it happened on,
/// used to build aggregated [`CoreError::MaintenanceFailed`] reports.
#[derive(Debug, Clone)]
pub struct TableFailure {
    pub path: String,
    pub cause: String,
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.cause)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A mandatory configuration key was absent. Fatal: process abort.
    #[error("missing required config key '{0}'")]
    ConfigMissing(String),

    /// No SourceReference is registered for (source, table). Per-row/per-batch:
    /// the affected rows are diverted to the violations zone.
    #[error("schema does not exist for {0}/{1}")]
    SchemaNotFound(String, String),

    /// A row failed [`crate::validator::RecordValidator`]. Per-row: diverted.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// The TableStore detected a conflicting concurrent commit. Transparent:
    /// consumed by [`crate::retry::RetryHarness`] and never meant to escape it
    /// except as the `cause` of a [`CoreError::RetriesExhausted`].
    #[error("concurrent modification detected")]
    ConcurrentModification,

    /// [`crate::retry::RetryHarness`] exhausted its attempt budget. Per-batch:
    /// diverted to violations with a zone tag; the stream continues.
    #[error("retries exhausted after {attempts} attempt(s): {cause}")]
    RetriesExhausted {
        attempts: u32,
        cause: Box<CoreError>,
    },

    /// Source columns are absent from (or mistyped relative to) the target
    /// table. Per-batch: logged, not retried, stream continues.
    #[error("schema drift on {0}: {1}")]
    SchemaDrift(String, String),

    /// A merge failed for a reason other than concurrent modification or
    /// drift. Per-batch: logged, stream continues (see open question in
    /// spec §9 — this is deliberately *not* diverted to violations).
    #[error("merge failed on {0}: {1}")]
    MergeFailure(String, String),

    /// One or more tables failed during a maintenance pass. Fatal to the
    /// maintenance operation, non-fatal to the sibling tables that did
    /// succeed; carries every per-table failure.
    #[error(
        "maintenance failed on {} of {attempted} table(s): {}",
        .failures.len(),
        .failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    )]
    MaintenanceFailed {
        attempted: usize,
        failures: Vec<TableFailure>,
    },

    /// Auth, I/O, malformed URI, or anything else that isn't a data error.
    /// Fatal to the current streaming query.
    #[error("infrastructure failure: {0}")]
    Infrastructure(#[source] anyhow::Error),
}

impl CoreError {
    pub fn infra(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Infrastructure(err.into())
    }

    /// Whether this error is the distinguished concurrent-modification kind
    /// that [`crate::retry::RetryHarness`] retries on.
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, CoreError::ConcurrentModification)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
