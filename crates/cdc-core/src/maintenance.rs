//! C10: walks a root prefix and performs compact/vacuum on every discovered
//! table, aggregating per-table failures rather than aborting on the first
//! one (spec §4.8).

use std::sync::Arc;

use crate::error::{CoreError, TableFailure};
use crate::retry::RetryHarness;
use crate::table_store::TableStore;

pub struct MaintenanceEngine {
    store: Arc<dyn TableStore>,
    retry: RetryHarness,
}

impl MaintenanceEngine {
    pub fn new(store: Arc<dyn TableStore>, retry: RetryHarness) -> Self {
        MaintenanceEngine { store, retry }
    }

    pub async fn compact_all(&self, root: &str, depth_limit: u32) -> Result<(), CoreError> {
        self.run_over_tables(root, depth_limit, |path| {
            let store = self.store.clone();
            let path = path.to_string();
            async move { store.compact(&path).await }
        })
        .await
    }

    pub async fn vacuum_all(&self, root: &str, depth_limit: u32) -> Result<(), CoreError> {
        self.run_over_tables(root, depth_limit, |path| {
            let store = self.store.clone();
            let path = path.to_string();
            async move { store.vacuum(&path).await }
        })
        .await
    }

    async fn run_over_tables<F, Fut>(&self, root: &str, depth_limit: u32, action: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Fut,
        Fut: std::future::Future<Output = Result<(), CoreError>>,
    {
        let tables = self.store.list_tables(root, depth_limit).await?;
        let attempted = tables.len();
        let mut failures = vec![];

        for path in &tables {
            let result = self.retry.run(|| action(path)).await;
            if let Err(err) = result {
                tracing::warn!(path, error = %err, "maintenance action failed for table");
                failures.push(TableFailure { path: path.clone(), cause: err.to_string() });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::MaintenanceFailed { attempted, failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicyConfig;
    use crate::model::{ColumnDef, LogicalType};
    use crate::testing::InMemoryTableStore;

    fn engine(store: Arc<InMemoryTableStore>) -> MaintenanceEngine {
        MaintenanceEngine::new(
            store,
            RetryHarness::new(RetryPolicyConfig { min_wait_ms: 1, max_wait_ms: 2, jitter_factor: 0.0, max_attempts: 1 }),
        )
    }

    #[tokio::test]
    async fn compacts_every_discovered_table_despite_intermediate_failures() {
        let store = Arc::new(InMemoryTableStore::default());
        store.create_empty("root/a", vec![ColumnDef { name: "id".into(), logical_type: LogicalType::Long, nullable: false }]);
        store.create_empty("root/b", vec![]);
        let eng = engine(store.clone());

        let result = eng.compact_all("root", 4).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn aggregates_failures_and_continues_to_remaining_tables() {
        struct FlakyStore(Arc<InMemoryTableStore>);
        #[async_trait::async_trait]
        impl TableStore for FlakyStore {
            async fn exists(&self, p: &str) -> Result<bool, CoreError> { self.0.exists(p).await }
            async fn has_rows(&self, p: &str) -> Result<bool, CoreError> { self.0.has_rows(p).await }
            async fn append(&self, p: &str, r: &[crate::model::Event]) -> Result<(), CoreError> { self.0.append(p, r).await }
            async fn overwrite(&self, p: &str, r: &[crate::model::Event], s: Option<&[ColumnDef]>) -> Result<(), CoreError> { self.0.overwrite(p, r, s).await }
            async fn merge(&self, r: crate::table_store::MergeRequest<'_>) -> Result<(), CoreError> { self.0.merge(r).await }
            async fn delete(&self, p: &str) -> Result<(), CoreError> { self.0.delete(p).await }
            async fn vacuum(&self, _p: &str) -> Result<(), CoreError> { Ok(()) }
            async fn compact(&self, p: &str) -> Result<(), CoreError> {
                if p == "root/bad" {
                    Err(CoreError::infra(anyhow::anyhow!("disk full")))
                } else {
                    Ok(())
                }
            }
            async fn refresh_manifest(&self, p: &str) -> Result<(), CoreError> { self.0.refresh_manifest(p).await }
            async fn list_tables(&self, r: &str, d: u32) -> Result<Vec<String>, CoreError> { self.0.list_tables(r, d).await }
        }

        let inner = Arc::new(InMemoryTableStore::default());
        inner.create_empty("root/good", vec![]);
        inner.create_empty("root/bad", vec![]);
        let flaky = Arc::new(FlakyStore(inner));
        let eng = MaintenanceEngine::new(
            flaky,
            RetryHarness::new(RetryPolicyConfig { min_wait_ms: 1, max_wait_ms: 2, jitter_factor: 0.0, max_attempts: 1 }),
        );

        let result = eng.compact_all("root", 4).await;
        match result {
            Err(CoreError::MaintenanceFailed { attempted, failures }) => {
                assert_eq!(attempted, 2);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].path, "root/bad");
            }
            other => panic!("expected MaintenanceFailed, got {other:?}"),
        }
    }
}
