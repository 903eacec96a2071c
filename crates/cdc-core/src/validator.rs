//! C4: parses a raw CDC row against a schema and produces a `(valid, error)`
//! annotation (spec §4.3).
//!
//! The upstream replicator silently nullifies both missing fields and
//! fields whose types don't match, so equality on *normalised* payloads is
//! the only reliable oracle: re-encoding the parsed row and comparing its
//! key set against the raw payload (after the source filter) surfaces
//! exactly those silent drops.

use regex::Regex;
use serde_json::Value;

use crate::model::SourceReference;

/// One raw CDC row before validation: `data` and `metadata` are the raw
/// JSON text as received from the upstream replicator.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub data: String,
    pub metadata: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub error: String,
}

impl ValidationOutcome {
    fn ok() -> Self {
        ValidationOutcome { valid: true, error: String::new() }
    }

    fn fail(error: impl Into<String>) -> Self {
        ValidationOutcome { valid: false, error: error.into() }
    }
}

/// Pure and deterministic per `(schema, row)`.
pub struct RecordValidator;

impl RecordValidator {
    /// Normalises known idiosyncrasies of the upstream replicator before the
    /// key-set comparison, e.g. a zero-time ISO-8601 timestamp collapsed to
    /// a bare date (`2024-01-01T00:00:00Z` -> `2024-01-01`).
    fn source_filter(raw: &str) -> String {
        let zero_time: Regex = Regex::new(r"(\d{4}-\d{2}-\d{2})T00:00:00(\.0+)?Z?").unwrap();
        zero_time.replace_all(raw, "$1").into_owned()
    }

    pub fn validate(row: &RawRow, schema: &SourceReference) -> ValidationOutcome {
        // Step 1: parse.
        let parsed: Value = match serde_json::from_str(&row.data) {
            Ok(v) => v,
            Err(e) => return ValidationOutcome::fail(format!("parse failure: {e}")),
        };
        let parsed_obj = match parsed.as_object() {
            Some(obj) => obj,
            None => return ValidationOutcome::fail("parse failure: payload is not a JSON object"),
        };

        // Step 2: key-set-wise comparison after the source filter.
        let filtered_raw = Self::source_filter(&row.data);
        let raw_parsed: Value = match serde_json::from_str(&filtered_raw) {
            Ok(v) => v,
            Err(e) => return ValidationOutcome::fail(format!("parse failure: {e}")),
        };
        let raw_obj = raw_parsed.as_object();

        for column in &schema.schema {
            if column.nullable {
                continue;
            }
            let raw_value = raw_obj.and_then(|o| o.get(&column.name));
            let parsed_value = parsed_obj.get(&column.name);
            let ok = matches!((raw_value, parsed_value), (Some(rv), Some(pv)) if rv == pv && !pv.is_null());
            if !ok {
                return ValidationOutcome::fail(format!("non-null field {} is null", column.name));
            }
        }

        // Step 3: every non-nullable field has a non-null value (covered by
        // the loop above; this second pass also rejects cases where the
        // parser silently dropped a nullable key the raw row actually set,
        // which spec §4.3 step 2 treats as a failure independent of
        // nullability).
        let raw_keys: std::collections::BTreeSet<&String> = raw_obj
            .map(|o| o.keys().collect())
            .unwrap_or_default();
        for key in raw_keys {
            if schema.column(key).is_none() {
                continue;
            }
            match (raw_obj.and_then(|o| o.get(key)), parsed_obj.get(key)) {
                (Some(rv), Some(pv)) if rv == pv => {}
                (Some(rv), None) if !rv.is_null() => {
                    return ValidationOutcome::fail(format!(
                        "parse failure: field {key} present in source but absent after parse"
                    ));
                }
                _ => {}
            }
        }

        ValidationOutcome::ok()
    }
}
