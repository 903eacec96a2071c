//! C8: builds or incrementally refreshes domain tables via the QueryEngine
//! from a CDC slice (spec §4.6).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::merge::{MergeEngine, MergeMode};
use crate::model::{ColumnDef, DomainDefinition, Event, Op};
use crate::table_store::TableStore;

/// The SQL engine that evaluates domain transforms (spec §1): given a named
/// input table and a SELECT expression, returns a derived row set.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn evaluate(
        &self,
        view_text: &str,
        input_name: &str,
        rows: &[Event],
    ) -> Result<Vec<Event>, CoreError>;
}

pub struct DomainRefreshEngine {
    definitions: Vec<DomainDefinition>,
    query_engine: Arc<dyn QueryEngine>,
    merge_engine: Arc<MergeEngine>,
    domain_root: String,
}

/// Per-table outcome of one `refresh_cdc_slice` call, so a caller can log a
/// batch-level warning without aborting the remaining tables (spec §4.6:
/// "a domain refresh that throws for one table must not abort processing of
/// the remaining tables").
#[derive(Debug)]
pub struct DomainRefreshReport {
    pub table: String,
    pub result: Result<(), CoreError>,
}

impl DomainRefreshEngine {
    pub fn new(
        definitions: Vec<DomainDefinition>,
        query_engine: Arc<dyn QueryEngine>,
        merge_engine: Arc<MergeEngine>,
        domain_root: impl Into<String>,
    ) -> Self {
        DomainRefreshEngine {
            definitions,
            query_engine,
            merge_engine,
            domain_root: domain_root.into(),
        }
    }

    fn table_path(&self, domain: &str, table: &str) -> String {
        format!("{}/{}/{}", self.domain_root.trim_end_matches('/'), domain, table)
    }

    /// Incrementally refreshes every domain table whose transform reads from
    /// `(source, table_name)`, given the CDC slice for that source table.
    #[tracing::instrument(skip(self, rows), fields(source, table_name, rows = rows.len()))]
    pub async fn refresh_cdc_slice(
        &self,
        source: &str,
        table_name: &str,
        rows: &[Event],
    ) -> Vec<DomainRefreshReport> {
        // LOAD is a no-op for domains (spec §4.6 step 1).
        let deltas: Vec<Event> = rows.iter().filter(|e| e.op.is_cdc_delta()).cloned().collect();
        if deltas.is_empty() {
            return vec![];
        }

        let input_name = format!("{source}.{table_name}");
        let mut reports = vec![];

        for domain in &self.definitions {
            for table in domain.tables_sourced_from(source, table_name) {
                let result = self
                    .refresh_one_table(domain, table, &input_name, &deltas)
                    .await;
                if let Err(err) = &result {
                    tracing::warn!(domain = %domain.name, table = %table.name, error = %err, "domain refresh failed for table");
                }
                reports.push(DomainRefreshReport { table: table.name.clone(), result });
            }
        }
        reports
    }

    async fn refresh_one_table(
        &self,
        domain: &crate::model::DomainDefinition,
        table: &crate::model::TableDefinition,
        input_name: &str,
        deltas: &[Event],
    ) -> Result<(), CoreError> {
        let derived = self
            .query_engine
            .evaluate(&table.view_text, input_name, deltas)
            .await?;
        if derived.is_empty() {
            return Ok(());
        }
        let path = self.table_path(&domain.name, &table.name);
        let schema = inferred_schema(&derived);
        self.merge_engine
            .merge(&path, &derived, &table.primary_key, MergeMode::Cdc, &[], &schema)
            .await?;
        Ok(())
    }

    /// Full-refresh (non-CDC) mode: resolves a single DomainDefinition by
    /// `(domain_name, table_name)` and overwrites the target.
    pub async fn full_refresh(
        &self,
        store: &dyn TableStore,
        domain_name: &str,
        table_name: &str,
        rows: &[Event],
    ) -> Result<(), CoreError> {
        let _ = self.resolve(domain_name, table_name)?;
        let schema = inferred_schema(rows);
        let path = self.table_path(domain_name, table_name);
        store.overwrite(&path, rows, Some(&schema)).await
    }

    /// Delete mode: removes the target table entirely.
    pub async fn delete_table(
        &self,
        store: &dyn TableStore,
        domain_name: &str,
        table_name: &str,
    ) -> Result<(), CoreError> {
        let _ = self.resolve(domain_name, table_name)?;
        let path = self.table_path(domain_name, table_name);
        store.delete(&path).await
    }

    fn resolve(&self, domain_name: &str, table_name: &str) -> Result<&crate::model::TableDefinition, CoreError> {
        self.definitions
            .iter()
            .find(|d| d.name == domain_name)
            .and_then(|d| d.tables.iter().find(|t| t.name == table_name))
            .ok_or_else(|| {
                CoreError::SchemaNotFound(domain_name.to_string(), table_name.to_string())
            })
    }
}

fn inferred_schema(rows: &[Event]) -> Vec<ColumnDef> {
    let mut seen = std::collections::BTreeSet::new();
    let mut schema = vec![];
    for row in rows {
        for key in row.payload.keys() {
            if seen.insert(key.clone()) {
                schema.push(ColumnDef {
                    name: key.clone(),
                    logical_type: crate::model::LogicalType::String,
                    nullable: true,
                });
            }
        }
    }
    schema
}
