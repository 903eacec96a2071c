//! The data model shared by every component: CDC events, source references,
//! table identifiers and domain definitions (spec §3).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of CDC operation codes. The on-wire form is a single
/// character, mapped bidirectionally via [`Op::from_code`]/[`Op::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    /// Initial bulk import of a row; not a CDC delta.
    Load,
    Insert,
    Update,
    Delete,
}

impl Op {
    pub fn code(self) -> char {
        match self {
            Op::Load => 'l',
            Op::Insert => 'i',
            Op::Update => 'u',
            Op::Delete => 'd',
        }
    }

    pub fn from_code(c: char) -> Option<Op> {
        match c {
            'l' | 'L' => Some(Op::Load),
            'i' | 'I' => Some(Op::Insert),
            'u' | 'U' => Some(Op::Update),
            'd' | 'D' => Some(Op::Delete),
            _ => None,
        }
    }

    /// Whether this op participates in domain-table derivation (spec §4.6
    /// step 1: LOAD is a no-op for domains).
    pub fn is_cdc_delta(self) -> bool {
        !matches!(self, Op::Load)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Load => "LOAD",
            Op::Insert => "INSERT",
            Op::Update => "UPDATE",
            Op::Delete => "DELETE",
        })
    }
}

/// Identifies the origin of an event: the source system and the table
/// within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMetadata {
    pub source: String,
    pub table: String,
}

/// One immutable CDC row. The payload is a keyed mapping from column name to
/// value conforming to the table schema; `BTreeMap` gives deterministic
/// iteration order, which the merge engine's equality checks rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub metadata: EventMetadata,
    pub payload: BTreeMap<String, Value>,
    pub op: Op,
    /// Monotonic per source. Not wall-clock time across sources.
    pub commit_ts: i64,
}

impl Event {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.payload.get(column)
    }
}

/// `{database, schema, table}` plus the derived storage path
/// `root/database/schema/table` (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdentifier {
    pub database: String,
    pub schema: String,
    pub table: String,
}

impl TableIdentifier {
    pub fn new(database: impl Into<String>, schema: impl Into<String>, table: impl Into<String>) -> Self {
        TableIdentifier {
            database: database.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn path(&self, root: &str) -> String {
        format!("{}/{}/{}/{}", root.trim_end_matches('/'), self.database, self.schema, self.table)
    }

    /// The catalogue name the core registers tables under: underscore-joined
    /// `databaseName.<schema>_<table>` (spec §6).
    pub fn catalogue_name(&self) -> String {
        format!("{}.{}_{}", self.database, self.schema, self.table)
    }
}

/// A logical column type, widened to the catalogue's numeric types as named
/// in spec §6 (long→bigint, short→smallint, integer→int, byte→tinyint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalType {
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    Boolean,
    String,
    Timestamp,
    Date,
    Binary,
}

impl LogicalType {
    /// The catalogue's widened numeric type name.
    pub fn catalogue_type(self) -> &'static str {
        match self {
            LogicalType::Byte => "tinyint",
            LogicalType::Short => "smallint",
            LogicalType::Integer => "int",
            LogicalType::Long => "bigint",
            LogicalType::Float => "float",
            LogicalType::Double => "double",
            LogicalType::Boolean => "boolean",
            LogicalType::String => "string",
            LogicalType::Timestamp => "timestamp",
            LogicalType::Date => "date",
            LogicalType::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub logical_type: LogicalType,
    pub nullable: bool,
}

/// `{fullyQualifiedName, source, table, primaryKey, schema}`, immutable
/// after registration (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReference {
    pub fully_qualified_name: String,
    pub source: String,
    pub table: String,
    pub primary_key: Vec<String>,
    pub schema: Vec<ColumnDef>,
}

impl SourceReference {
    /// Validates the invariant that every primary key column exists in the
    /// schema and is non-nullable.
    pub fn validate(&self) -> Result<(), String> {
        if self.primary_key.is_empty() {
            return Err("primary key must be non-empty".into());
        }
        for key in &self.primary_key {
            match self.schema.iter().find(|c| &c.name == key) {
                Some(col) if col.nullable => {
                    return Err(format!("primary key column '{key}' must be non-nullable"))
                }
                Some(_) => {}
                None => return Err(format!("primary key column '{key}' not present in schema")),
            }
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.schema.iter().find(|c| c.name == name)
    }
}

/// One target table derived from a SQL transform over one or more sources.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub primary_key: Vec<String>,
    pub violations: String,
    pub sources: Vec<String>,
    pub view_text: String,
}

/// `{name, tables}` — a named group of derived domain tables (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct DomainDefinition {
    pub name: String,
    pub tables: Vec<TableDefinition>,
}

impl DomainDefinition {
    /// Tables within this domain whose transform reads from `source.table`.
    pub fn tables_sourced_from<'a>(&'a self, source: &str, table: &str) -> impl Iterator<Item = &'a TableDefinition> {
        let qualified = format!("{source}.{table}");
        self.tables
            .iter()
            .filter(move |t| t.sources.iter().any(|s| s == &qualified))
    }
}

/// An ordered, finite row set produced by one tick of an EventSource,
/// carrying a monotonically-increasing batch id (spec §3).
#[derive(Debug, Clone)]
pub struct MicroBatch {
    pub batch_id: u64,
    pub rows: Vec<Event>,
}
