//! C5: writes rejected rows to the violations zone with a reason column
//! (spec §4.5).

use std::sync::Arc;

use crate::error::CoreError;
use crate::model::Event;
use crate::table_store::TableStore;

/// Tags the zone/stage a violation was diverted from, so operators can
/// distinguish e.g. `STRUCTURED_CDC` retry exhaustion from a plain schema
/// lookup failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationZoneTag {
    StructuredLoad,
    StructuredCdc,
    DomainRefresh,
}

impl ViolationZoneTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationZoneTag::StructuredLoad => "STRUCTURED_LOAD",
            ViolationZoneTag::StructuredCdc => "STRUCTURED_CDC",
            ViolationZoneTag::DomainRefresh => "DOMAIN_REFRESH",
        }
    }
}

pub struct ViolationRouter {
    store: Arc<dyn TableStore>,
    violations_root: String,
}

impl ViolationRouter {
    pub fn new(store: Arc<dyn TableStore>, violations_root: impl Into<String>) -> Self {
        ViolationRouter { store, violations_root: violations_root.into() }
    }

    fn path(&self, source: &str, table: &str) -> String {
        format!("{}/{}/{}", self.violations_root.trim_end_matches('/'), source, table)
    }

    /// Writes `rows` to the violations zone, attaching `error` as the
    /// `error` column on each row and `zone` as the diversion tag.
    #[tracing::instrument(skip(self, rows), fields(source, table, zone = zone.as_str()))]
    pub async fn divert(
        &self,
        source: &str,
        table: &str,
        rows: &[Event],
        error: &str,
        zone: ViolationZoneTag,
    ) -> Result<(), CoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        tracing::warn!(source, table, error, zone = zone.as_str(), count = rows.len(), "diverting rows to violations");
        let annotated: Vec<Event> = rows
            .iter()
            .cloned()
            .map(|mut e| {
                e.payload.insert("error".to_string(), serde_json::Value::String(error.to_string()));
                e.payload.insert("zone".to_string(), serde_json::Value::String(zone.as_str().to_string()));
                e
            })
            .collect();
        self.store.append(&self.path(source, table), &annotated).await
    }

    /// Writes `rows` where each row carries its own per-row error string in
    /// the `error` column already (the RecordValidator's output shape).
    pub async fn divert_validated(&self, source: &str, table: &str, rows: &[Event]) -> Result<(), CoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.store.append(&self.path(source, table), rows).await
    }
}
