//! C3: the schema catalogue client (spec §4.2 design note: "model as an
//! immutable, init-time-populated mapping behind an interface"). Populated
//! once per process; read-only for the life of a streaming query.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::SourceReference;

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Resolves `(source, table) -> SourceReference`, or `Ok(None)` when no
    /// schema is registered (the caller diverts to violations, spec §4.5).
    async fn resolve(&self, source: &str, table: &str) -> Result<Option<SourceReference>, CoreError>;
}

/// An in-memory, init-time-populated registry. The production registry is an
/// external collaborator (spec §1); this is the one concrete implementation
/// the core ships, used by tests and by `cdc-job`'s demo wiring.
pub struct StaticSchemaRegistry {
    entries: std::collections::HashMap<(String, String), SourceReference>,
}

impl StaticSchemaRegistry {
    pub fn new(refs: impl IntoIterator<Item = SourceReference>) -> Self {
        let entries = refs
            .into_iter()
            .map(|r| ((r.source.clone(), r.table.clone()), r))
            .collect();
        StaticSchemaRegistry { entries }
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn resolve(&self, source: &str, table: &str) -> Result<Option<SourceReference>, CoreError> {
        Ok(self.entries.get(&(source.to_string(), table.to_string())).cloned())
    }
}
