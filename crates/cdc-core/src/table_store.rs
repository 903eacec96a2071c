//! C2: the TableStore interface (spec §4.2). Treated as an opaque,
//! versioned keyed table with optimistic concurrency; the core only ever
//! sees the operations below.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{ColumnDef, Event, Op};

/// An action a matched-clause or the unmatched-clause installs on the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAction {
    /// Replace every destination column with the source row's value, except
    /// columns named in [`MergeRequest::excluded_columns`].
    UpdateAll,
    Delete,
    InsertAll,
}

/// Which source rows a clause applies to. The opaque `predicate` text is
/// what a real TableStore (e.g. a Delta-Lake-style `MERGE ... WHEN MATCHED`)
/// would receive; `guard` is the same decision expressed structurally so an
/// in-process TableStore can evaluate it without a predicate interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseGuard {
    OpEquals(Op),
    OpNotEquals(Op),
    Always,
}

impl ClauseGuard {
    pub fn matches(&self, op: Op) -> bool {
        match self {
            ClauseGuard::OpEquals(expected) => op == *expected,
            ClauseGuard::OpNotEquals(excluded) => op != *excluded,
            ClauseGuard::Always => true,
        }
    }
}

/// A single `whenMatched`/`whenNotMatched` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeClause {
    pub predicate: String,
    pub guard: ClauseGuard,
    pub action: MergeAction,
}

/// The clause-ordered merge primitive described in spec §4.2: matched
/// clauses are evaluated in declaration order, stopping at the first match;
/// exactly one unmatched clause applies when no target row matches.
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    pub path: String,
    pub source_rows: &'a [Event],
    pub join_columns: &'a [String],
    pub matched_clauses: Vec<MergeClause>,
    pub unmatched_clause: MergeClause,
    pub excluded_columns: Vec<String>,
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, CoreError>;
    async fn has_rows(&self, path: &str) -> Result<bool, CoreError>;

    /// Appends rows without key reconciliation.
    async fn append(&self, path: &str, rows: &[Event]) -> Result<(), CoreError>;

    /// Fully replaces the table contents. `replace_schema` makes a schema
    /// swap explicit rather than implicit.
    async fn overwrite(
        &self,
        path: &str,
        rows: &[Event],
        replace_schema: Option<&[ColumnDef]>,
    ) -> Result<(), CoreError>;

    /// Atomic upsert/delete. Implementations must fail with
    /// [`CoreError::ConcurrentModification`] on a conflicting concurrent
    /// commit so that [`crate::retry::RetryHarness`] can retry it.
    async fn merge(&self, request: MergeRequest<'_>) -> Result<(), CoreError>;

    async fn delete(&self, path: &str) -> Result<(), CoreError>;
    async fn vacuum(&self, path: &str) -> Result<(), CoreError>;
    async fn compact(&self, path: &str) -> Result<(), CoreError>;
    async fn refresh_manifest(&self, path: &str) -> Result<(), CoreError>;

    /// Recursively enumerates every real table below `root`, pruning
    /// recursion at the first table found on a branch, honouring
    /// `depth_limit >= 1`.
    async fn list_tables(&self, root: &str, depth_limit: u32) -> Result<Vec<String>, CoreError>;
}
