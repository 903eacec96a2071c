//! C9: one streaming query per source table; checkpointed; resilient
//! per-batch (spec §4.7).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain_refresh::DomainRefreshEngine;
use crate::error::CoreError;
use crate::model::{Event, MicroBatch, Op};
use crate::validator::RawRow;
use crate::zone_pipeline::ZonePipeline;

/// A lazy, restartable, per-table micro-batch sequence (spec §1). Real
/// implementations own their own checkpointing; the supervisor only calls
/// `next_batch` in a loop and observes `stop()` between calls.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn next_batch(&self) -> Result<Option<MicroBatch>, CoreError>;
}

/// One supervisor per `(jobTag, source, table)` per process (spec §4.7
/// contract). Exactly one instance may run against a given checkpoint
/// prefix/target table pair at a time; the caller is responsible for that
/// exclusivity (the supervisor itself holds no lock).
pub struct TableStreamingSupervisor {
    job_tag: String,
    source: String,
    table: String,
    event_source: Arc<dyn EventSource>,
    zone_pipeline: Arc<ZonePipeline>,
    domain_refresh: Arc<DomainRefreshEngine>,
    stop_requested: Arc<AtomicBool>,
}

impl TableStreamingSupervisor {
    pub fn new(
        job_tag: impl Into<String>,
        source: impl Into<String>,
        table: impl Into<String>,
        event_source: Arc<dyn EventSource>,
        zone_pipeline: Arc<ZonePipeline>,
        domain_refresh: Arc<DomainRefreshEngine>,
    ) -> Self {
        TableStreamingSupervisor {
            job_tag: job_tag.into(),
            source: source.into(),
            table: table.into(),
            event_source,
            zone_pipeline,
            domain_refresh,
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn query_name(&self) -> String {
        format!("{} {}.{}", self.job_tag, self.source, self.table)
    }

    /// `<checkpointRoot>/<jobTag>/<queryName>`. This path is stable by
    /// construction: moving it resets delivery, so callers must never
    /// derive it from anything but `job_tag`/`source`/`table`.
    pub fn checkpoint_prefix(&self, checkpoint_root: &str) -> String {
        format!(
            "{}/{}/{}",
            checkpoint_root.trim_end_matches('/'),
            self.job_tag,
            self.query_name()
        )
    }

    /// Cooperative: requests the underlying streaming engine to cease.
    /// Observed only between batches; a merge already in flight runs to
    /// completion.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_requested.clone()
    }

    /// Drives the micro-batch loop until the EventSource is exhausted or
    /// `stop()` is observed between batches. Returns the number of batches
    /// processed. A per-batch data error never aborts this loop; only an
    /// infrastructure failure propagates (spec §4.5, §7).
    #[tracing::instrument(skip(self), fields(query_name = %self.query_name()))]
    pub async fn run(&self) -> Result<u64, CoreError> {
        let stop = self.stop_handle();
        let mut processed = 0u64;

        while !stop.load(Ordering::SeqCst) {
            let Some(batch) = self.event_source.next_batch().await? else {
                break;
            };
            self.process_batch(batch).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Archives every row regardless of op, then routes LOAD rows through
    /// structured-load and CDC-delta rows through structured-cdc (spec §2's
    /// data flow: RawWrite sees the whole batch; the structured-load stage
    /// operates on rows with op = LOAD).
    #[tracing::instrument(skip(self, batch), fields(batch_id = batch.batch_id, rows = batch.rows.len()))]
    async fn process_batch(&self, batch: MicroBatch) -> Result<(), CoreError> {
        self.archive_raw(&batch.rows).await?;

        let (load_rows, cdc_rows): (Vec<Event>, Vec<Event>) =
            batch.rows.iter().cloned().partition(|e| !e.op.is_cdc_delta());

        if !load_rows.is_empty() {
            let raw_rows = load_rows.into_iter().map(|e| (to_raw_row(&e), e)).collect();
            self.zone_pipeline
                .structured_load(&self.source, &self.table, raw_rows)
                .await?;
        }

        self.zone_pipeline
            .structured_cdc(&self.source, &self.table, &cdc_rows)
            .await?;

        let reports = self
            .domain_refresh
            .refresh_cdc_slice(&self.source, &self.table, &cdc_rows)
            .await;
        for report in reports.iter().filter(|r| r.result.is_err()) {
            tracing::warn!(table = %report.table, batch_id = batch.batch_id, "domain refresh failed for batch");
        }
        Ok(())
    }

    /// Writes every row in the batch to the raw zone, grouped by op (each op
    /// has its own raw path, spec §4.5).
    async fn archive_raw(&self, rows: &[Event]) -> Result<(), CoreError> {
        let mut by_op: HashMap<Op, Vec<Event>> = HashMap::new();
        for row in rows {
            by_op.entry(row.op).or_default().push(row.clone());
        }
        for (op, rows) in by_op {
            self.zone_pipeline
                .raw_write(&self.source, &self.table, op, &rows)
                .await?;
        }
        Ok(())
    }
}

/// Re-derives a validator-shaped raw row from an already-decoded Event. The
/// EventSource hands the supervisor decoded rows, not the original wire
/// bytes, so this is the closest available stand-in for the raw payload the
/// upstream replicator emitted.
fn to_raw_row(event: &Event) -> RawRow {
    RawRow {
        data: serde_json::to_string(&event.payload).unwrap_or_default(),
        metadata: serde_json::to_string(&event.metadata).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicyConfig;
    use crate::merge::MergeEngine;
    use crate::model::{ColumnDef, EventMetadata, LogicalType, Op, SourceReference};
    use crate::retry::RetryHarness;
    use crate::schema_registry::StaticSchemaRegistry;
    use crate::table_store::TableStore;
    use crate::testing::{FnQueryEngine, InMemoryTableStore};
    use crate::violations::ViolationRouter;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct QueueEventSource(Mutex<std::collections::VecDeque<MicroBatch>>);

    #[async_trait]
    impl EventSource for QueueEventSource {
        async fn next_batch(&self) -> Result<Option<MicroBatch>, CoreError> {
            Ok(self.0.lock().unwrap().pop_front())
        }
    }

    fn event(id: i64, op: Op) -> crate::model::Event {
        let mut payload = BTreeMap::new();
        payload.insert("id".into(), json!(id));
        crate::model::Event {
            metadata: EventMetadata { source: "src".into(), table: "t".into() },
            payload,
            op,
            commit_ts: 0,
        }
    }

    fn schema_ref() -> SourceReference {
        SourceReference {
            fully_qualified_name: "src.t".into(),
            source: "src".into(),
            table: "t".into(),
            primary_key: vec!["id".into()],
            schema: vec![ColumnDef { name: "id".into(), logical_type: LogicalType::Long, nullable: false }],
        }
    }

    #[tokio::test]
    async fn runs_until_event_source_is_exhausted() {
        let store: Arc<dyn TableStore> = Arc::new(InMemoryTableStore::default());
        let registry = Arc::new(StaticSchemaRegistry::new(vec![schema_ref()]));
        let merge = Arc::new(MergeEngine::new(
            store.clone(),
            RetryHarness::new(RetryPolicyConfig { min_wait_ms: 1, max_wait_ms: 2, jitter_factor: 0.0, max_attempts: 3 }),
        ));
        let violations = Arc::new(ViolationRouter::new(store.clone(), "violations"));
        let pipeline = Arc::new(ZonePipeline::new(store.clone(), registry, merge.clone(), violations, "raw", "structured", vec![]));
        let domain_refresh = Arc::new(DomainRefreshEngine::new(
            vec![],
            Arc::new(FnQueryEngine::new(|_v, rows: &[crate::model::Event]| rows.to_vec())),
            merge,
            "domains",
        ));

        let source = Arc::new(QueueEventSource(Mutex::new(
            vec![
                MicroBatch { batch_id: 0, rows: vec![event(1, Op::Insert)] },
                MicroBatch { batch_id: 1, rows: vec![event(2, Op::Insert)] },
            ]
            .into(),
        )));

        let supervisor = TableStreamingSupervisor::new("job", "src", "t", source, pipeline, domain_refresh);
        let processed = supervisor.run().await.unwrap();

        assert_eq!(processed, 2);
    }

    #[tokio::test]
    async fn load_rows_are_archived_and_structured_loaded() {
        let store = Arc::new(InMemoryTableStore::default());
        let registry = Arc::new(StaticSchemaRegistry::new(vec![schema_ref()]));
        let merge = Arc::new(MergeEngine::new(
            store.clone(),
            RetryHarness::new(RetryPolicyConfig { min_wait_ms: 1, max_wait_ms: 2, jitter_factor: 0.0, max_attempts: 3 }),
        ));
        let violations = Arc::new(ViolationRouter::new(store.clone(), "violations"));
        let pipeline = Arc::new(ZonePipeline::new(store.clone(), registry, merge.clone(), violations, "raw", "structured", vec![]));
        let domain_refresh = Arc::new(DomainRefreshEngine::new(
            vec![],
            Arc::new(FnQueryEngine::new(|_v, rows: &[crate::model::Event]| rows.to_vec())),
            merge,
            "domains",
        ));

        let source = Arc::new(QueueEventSource(Mutex::new(
            vec![MicroBatch { batch_id: 0, rows: vec![event(1, Op::Load)] }].into(),
        )));

        let supervisor = TableStreamingSupervisor::new("job", "src", "t", source, pipeline, domain_refresh);
        let processed = supervisor.run().await.unwrap();

        assert_eq!(processed, 1);
        assert_eq!(store.row_count("raw/src/t/l"), 1);
        assert_eq!(store.row_count("structured/src/t"), 1);
    }

    #[test]
    fn checkpoint_prefix_is_stable_given_identical_inputs() {
        let store: Arc<dyn TableStore> = Arc::new(InMemoryTableStore::default());
        let registry = Arc::new(StaticSchemaRegistry::new(vec![]));
        let merge = Arc::new(MergeEngine::new(
            store.clone(),
            RetryHarness::new(RetryPolicyConfig { min_wait_ms: 1, max_wait_ms: 2, jitter_factor: 0.0, max_attempts: 1 }),
        ));
        let violations = Arc::new(ViolationRouter::new(store.clone(), "violations"));
        let pipeline = Arc::new(ZonePipeline::new(store, registry, merge.clone(), violations, "raw", "structured", vec![]));
        let domain_refresh = Arc::new(DomainRefreshEngine::new(vec![], Arc::new(FnQueryEngine::new(|_v, r: &[crate::model::Event]| r.to_vec())), merge, "domains"));
        let source = Arc::new(QueueEventSource(Mutex::new(Default::default())));

        let a = TableStreamingSupervisor::new("job", "src", "t", source.clone(), pipeline.clone(), domain_refresh.clone());
        let b = TableStreamingSupervisor::new("job", "src", "t", source, pipeline, domain_refresh);

        assert_eq!(a.checkpoint_prefix("chk"), b.checkpoint_prefix("chk"));
        assert_eq!(a.checkpoint_prefix("chk"), "chk/job/job src.t");
    }
}
