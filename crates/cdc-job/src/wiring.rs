//! Demo wiring: real deployments supply their own TableStore,
//! SchemaRegistry, QueryEngine and EventSource (spec §1, external
//! collaborators); this binary wires up the in-memory fakes the core ships
//! so the CLI is runnable end-to-end without those systems present.

use std::sync::Arc;

use cdc_core::config::RetryPolicyConfig;
use cdc_core::domain_refresh::DomainRefreshEngine;
use cdc_core::merge::MergeEngine;
use cdc_core::retry::RetryHarness;
use cdc_core::schema_registry::StaticSchemaRegistry;
use cdc_core::supervisor::TableStreamingSupervisor;
use cdc_core::table_store::TableStore;
use cdc_core::testing::{FnQueryEngine, InMemoryEventSource, InMemoryTableStore};
use cdc_core::violations::ViolationRouter;
use cdc_core::zone_pipeline::ZonePipeline;

pub fn demo_table_store() -> InMemoryTableStore {
    InMemoryTableStore::default()
}

pub fn demo_supervisor(job_tag: &str, source: &str, table: &str) -> TableStreamingSupervisor {
    let store: Arc<dyn TableStore> = Arc::new(InMemoryTableStore::default());
    let registry = Arc::new(StaticSchemaRegistry::new(vec![]));
    let retry = RetryHarness::new(RetryPolicyConfig {
        min_wait_ms: 500,
        max_wait_ms: 30_000,
        jitter_factor: 0.2,
        max_attempts: 3,
    });
    let merge = Arc::new(MergeEngine::new(store.clone(), retry));
    let violations = Arc::new(ViolationRouter::new(store.clone(), "violations"));
    let pipeline = Arc::new(ZonePipeline::new(
        store,
        registry,
        merge.clone(),
        violations,
        "raw",
        "structured",
        vec![],
    ));
    let domain_refresh = Arc::new(DomainRefreshEngine::new(
        vec![],
        Arc::new(FnQueryEngine::new(|_view, rows: &[cdc_core::model::Event]| rows.to_vec())),
        merge,
        "domains",
    ));
    let event_source = Arc::new(InMemoryEventSource::new(vec![]));

    TableStreamingSupervisor::new(job_tag, source, table, event_source, pipeline, domain_refresh)
}

pub fn demo_domain_refresh_engine(
    retry_policy: RetryPolicyConfig,
) -> (Arc<InMemoryTableStore>, DomainRefreshEngine) {
    let store = Arc::new(InMemoryTableStore::default());
    let merge = Arc::new(MergeEngine::new(store.clone(), RetryHarness::new(retry_policy)));
    let engine = DomainRefreshEngine::new(
        vec![],
        Arc::new(FnQueryEngine::new(|_view, rows: &[cdc_core::model::Event]| rows.to_vec())),
        merge,
        "domains",
    );
    (store, engine)
}
