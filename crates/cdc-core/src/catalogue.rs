//! Catalogue registration (spec §6): on create/replace, the core registers
//! a table under `databaseName.<schema>_<table>`, pointing at
//! `tablePath/_symlink_format_manifest`, classified as columnar, with the
//! numeric type widenings named in spec §6.

use regex::Regex;

use crate::model::{LogicalType, TableIdentifier};

pub const MANIFEST_DIR: &str = "_symlink_format_manifest";

/// Table names must match this pattern to be registered. Spec §9 leaves
/// open whether the empty string should be tightened out (`^\w+$`); that
/// change is *not* taken here pending stakeholder confirmation (see
/// DESIGN.md), so the empty string is still accepted, matching the
/// original `^\w*$`.
fn name_pattern() -> Regex {
    Regex::new(r"^[A-Za-z0-9_]*$").unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueEntry {
    pub name: String,
    pub location: String,
    pub format: &'static str,
}

pub fn register(table: &TableIdentifier, root: &str) -> Result<CatalogueEntry, String> {
    let pattern = name_pattern();
    if !pattern.is_match(&table.database) || !pattern.is_match(&table.schema) || !pattern.is_match(&table.table) {
        return Err(format!(
            "table identifier '{}' contains characters outside [A-Za-z0-9_]",
            table.catalogue_name()
        ));
    }
    let base = table.path(root);
    Ok(CatalogueEntry {
        name: table.catalogue_name(),
        location: format!("{base}/{MANIFEST_DIR}"),
        format: "columnar",
    })
}

pub fn widen(logical_type: LogicalType) -> &'static str {
    logical_type.catalogue_type()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_underscore_joined_name_and_manifest_path() {
        let table = TableIdentifier::new("lake", "src", "people");
        let entry = register(&table, "root").unwrap();
        assert_eq!(entry.name, "lake.src_people");
        assert_eq!(entry.location, "root/lake/src/people/_symlink_format_manifest");
        assert_eq!(entry.format, "columnar");
    }

    #[test]
    fn rejects_names_with_disallowed_characters() {
        let table = TableIdentifier::new("lake", "src", "people;drop");
        assert!(register(&table, "root").is_err());
    }

    #[test]
    fn widens_long_to_bigint() {
        assert_eq!(widen(LogicalType::Long), "bigint");
        assert_eq!(widen(LogicalType::Short), "smallint");
        assert_eq!(widen(LogicalType::Integer), "int");
        assert_eq!(widen(LogicalType::Byte), "tinyint");
    }
}
