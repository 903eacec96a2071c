//! In-memory fakes for the external collaborators (spec §1: TableStore,
//! EventSource, QueryEngine are all opaque interfaces owned elsewhere).
//! These are the only concrete implementations the core ships; they back
//! the crate's own unit tests and `cdc-job`'s demo wiring.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;
use crate::model::{ColumnDef, Event, MicroBatch};
use crate::table_store::{MergeAction, MergeRequest, TableStore};

type Row = BTreeMap<String, Value>;

struct TableState {
    schema: Vec<ColumnDef>,
    rows: Vec<Row>,
}

/// An in-memory TableStore. Keyed rows are linearly scanned, which is fine
/// for the small batches exercised in tests; it exists purely to give the
/// rest of the core something concrete to drive.
#[derive(Default)]
pub struct InMemoryTableStore {
    tables: Mutex<std::collections::HashMap<String, TableState>>,
    pending_conflicts: Mutex<std::collections::HashMap<String, u32>>,
}

impl InMemoryTableStore {
    pub fn create_empty(&self, path: &str, schema: Vec<ColumnDef>) {
        self.tables
            .lock()
            .unwrap()
            .insert(path.to_string(), TableState { schema, rows: vec![] });
    }

    pub fn seed(&self, path: &str, rows: Vec<Event>) {
        let schema = rows
            .first()
            .map(|e| infer_schema(e))
            .unwrap_or_default();
        let mut tables = self.tables.lock().unwrap();
        let entry = tables
            .entry(path.to_string())
            .or_insert_with(|| TableState { schema, rows: vec![] });
        for row in rows {
            entry.rows.push(row.payload);
        }
    }

    pub fn row_count(&self, path: &str) -> usize {
        self.tables.lock().unwrap().get(path).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn get_row(&self, path: &str, pk_values: &[Value]) -> Option<Row> {
        let tables = self.tables.lock().unwrap();
        let table = tables.get(path)?;
        let pk_cols = &table_pk_hint(table);
        table
            .rows
            .iter()
            .find(|row| row_key(row, pk_cols) == pk_values)
            .cloned()
    }

    /// Makes the next `n` `merge()` calls on any table fail with
    /// [`CoreError::ConcurrentModification`].
    pub fn fail_merges_with_conflict(&self, n: u32) {
        self.pending_conflicts.lock().unwrap().insert("*".to_string(), n);
    }

    fn take_conflict(&self) -> bool {
        let mut guard = self.pending_conflicts.lock().unwrap();
        match guard.get_mut("*") {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Best-effort: infer a schema from the first seeded row's keys, treating
/// every column as a nullable string. Only used by [`InMemoryTableStore::seed`]
/// when no schema was supplied, which is sufficient for this crate's tests.
fn infer_schema(event: &Event) -> Vec<ColumnDef> {
    event
        .payload
        .keys()
        .map(|name| ColumnDef {
            name: name.clone(),
            logical_type: crate::model::LogicalType::String,
            nullable: true,
        })
        .collect()
}

fn table_pk_hint(_table: &TableState) -> Vec<String> {
    vec!["id".to_string()]
}

fn row_key(row: &Row, columns: &[String]) -> Vec<Value> {
    columns.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect()
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn exists(&self, path: &str) -> Result<bool, CoreError> {
        Ok(self.tables.lock().unwrap().contains_key(path))
    }

    async fn has_rows(&self, path: &str) -> Result<bool, CoreError> {
        Ok(self.tables.lock().unwrap().get(path).map(|t| !t.rows.is_empty()).unwrap_or(false))
    }

    async fn append(&self, path: &str, rows: &[Event]) -> Result<(), CoreError> {
        let mut tables = self.tables.lock().unwrap();
        let schema = rows.first().map(infer_schema).unwrap_or_default();
        let entry = tables
            .entry(path.to_string())
            .or_insert_with(|| TableState { schema, rows: vec![] });
        for row in rows {
            entry.rows.push(row.payload.clone());
        }
        Ok(())
    }

    async fn overwrite(
        &self,
        path: &str,
        rows: &[Event],
        replace_schema: Option<&[ColumnDef]>,
    ) -> Result<(), CoreError> {
        let mut tables = self.tables.lock().unwrap();
        let schema = replace_schema
            .map(|s| s.to_vec())
            .or_else(|| tables.get(path).map(|t| t.schema.clone()))
            .unwrap_or_default();
        tables.insert(
            path.to_string(),
            TableState { schema, rows: rows.iter().map(|e| e.payload.clone()).collect() },
        );
        Ok(())
    }

    async fn merge(&self, request: MergeRequest<'_>) -> Result<(), CoreError> {
        if self.take_conflict() {
            return Err(CoreError::ConcurrentModification);
        }

        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .entry(request.path.clone())
            .or_insert_with(|| TableState { schema: vec![], rows: vec![] });

        for source in request.source_rows {
            let join_key = row_key(&source.payload, request.join_columns);
            let existing_idx = table
                .rows
                .iter()
                .position(|r| row_key(r, request.join_columns) == join_key);

            let matched_action = if let Some(idx) = existing_idx {
                request
                    .matched_clauses
                    .iter()
                    .find(|c| c.guard.matches(source.op))
                    .map(|c| (idx, c.action.clone()))
            } else {
                None
            };

            match (existing_idx, matched_action) {
                (Some(idx), Some((_, MergeAction::UpdateAll))) => {
                    table.rows[idx] = apply_exclusions(&source.payload, &request.excluded_columns);
                }
                (Some(idx), Some((_, MergeAction::Delete))) => {
                    table.rows.remove(idx);
                }
                (Some(idx), Some((_, MergeAction::InsertAll))) => {
                    table.rows[idx] = apply_exclusions(&source.payload, &request.excluded_columns);
                }
                (Some(_), None) => {
                    // Matched, but no clause's guard fired: no-op, matching a
                    // real MERGE's behaviour of leaving the row untouched.
                }
                (None, _) => {
                    if request.unmatched_clause.guard.matches(source.op) {
                        table.rows.push(apply_exclusions(&source.payload, &request.excluded_columns));
                    }
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), CoreError> {
        self.tables.lock().unwrap().remove(path);
        Ok(())
    }

    async fn vacuum(&self, _path: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn compact(&self, _path: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn refresh_manifest(&self, _path: &str) -> Result<(), CoreError> {
        Ok(())
    }

    async fn list_tables(&self, root: &str, _depth_limit: u32) -> Result<Vec<String>, CoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.keys().filter(|p| p.starts_with(root)).cloned().collect())
    }
}

fn apply_exclusions(payload: &Row, excluded: &[String]) -> Row {
    payload
        .iter()
        .filter(|(k, _)| !excluded.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// A lazy, restartable, in-memory micro-batch sequence for one
/// `(source, table)`, standing in for the real EventSource (spec §1).
pub struct InMemoryEventSource {
    batches: Mutex<std::collections::VecDeque<MicroBatch>>,
    next_id: Mutex<u64>,
}

impl InMemoryEventSource {
    pub fn new(batches: Vec<Vec<Event>>) -> Self {
        let batches = batches
            .into_iter()
            .enumerate()
            .map(|(i, rows)| MicroBatch { batch_id: i as u64, rows })
            .collect();
        InMemoryEventSource { batches: Mutex::new(batches), next_id: Mutex::new(0) }
    }
}

#[async_trait]
impl crate::supervisor::EventSource for InMemoryEventSource {
    async fn next_batch(&self) -> Result<Option<MicroBatch>, CoreError> {
        let mut id = self.next_id.lock().unwrap();
        let batch = self.batches.lock().unwrap().pop_front();
        *id += 1;
        Ok(batch)
    }
}

/// Evaluates a hand-registered Rust closure in place of a real SQL engine
/// (spec §1: "an opaque QueryEngine that ... returns a derived row set").
pub struct FnQueryEngine<F>
where
    F: Fn(&str, &[Event]) -> Vec<Event> + Send + Sync,
{
    eval: F,
}

impl<F> FnQueryEngine<F>
where
    F: Fn(&str, &[Event]) -> Vec<Event> + Send + Sync,
{
    pub fn new(eval: F) -> Self {
        FnQueryEngine { eval }
    }
}

#[async_trait]
impl<F> crate::domain_refresh::QueryEngine for FnQueryEngine<F>
where
    F: Fn(&str, &[Event]) -> Vec<Event> + Send + Sync,
{
    async fn evaluate(
        &self,
        view_text: &str,
        input_name: &str,
        rows: &[Event],
    ) -> Result<Vec<Event>, CoreError> {
        let _ = input_name;
        Ok((self.eval)(view_text, rows))
    }
}
