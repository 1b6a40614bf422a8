//! The mapping registry: which destination table and columns each source table feeds.

use etl_config::shared::{EtlEntry, MappingTable};
use std::collections::HashMap;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::extract::FieldPath;

/// A validated mapping entry with parsed field paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    table: String,
    primary_key: String,
    columns: Vec<(String, FieldPath)>,
}

impl TableMapping {
    fn compile(source_table: &str, entry: &EtlEntry) -> EtlResult<TableMapping> {
        entry.validate(source_table).map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Invalid table mapping",
                err,
                source: err
            )
        })?;

        let columns = entry
            .fields
            .iter()
            .map(|mapping| Ok((mapping.column.clone(), FieldPath::parse(&mapping.path)?)))
            .collect::<EtlResult<Vec<_>>>()?;

        Ok(TableMapping {
            table: entry.table.clone(),
            primary_key: entry.primary_key.clone(),
            columns,
        })
    }

    /// Destination table, optionally schema-qualified.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Declared columns and their paths, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &FieldPath)> {
        self.columns
            .iter()
            .map(|(column, path)| (column.as_str(), path))
    }
}

/// Read-only lookup of [`TableMapping`]s by source table name.
///
/// Built once at startup and shared by reference for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    entries: HashMap<String, TableMapping>,
}

impl MappingRegistry {
    /// Compiles every entry of `table`, failing on the first invalid one.
    pub fn from_table(table: &MappingTable) -> EtlResult<MappingRegistry> {
        let entries = table
            .iter()
            .map(|(source_table, entry)| {
                Ok((
                    source_table.to_string(),
                    TableMapping::compile(source_table, entry)?,
                ))
            })
            .collect::<EtlResult<HashMap<_, _>>>()?;

        Ok(MappingRegistry { entries })
    }

    /// Parses, validates and compiles a JSON mapping document.
    pub fn from_json(document: &str) -> EtlResult<MappingRegistry> {
        let table = MappingTable::from_json(document).map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Invalid mapping document",
                err,
                source: err
            )
        })?;

        MappingRegistry::from_table(&table)
    }

    pub fn get(&self, source_table: &str) -> Option<&TableMapping> {
        self.entries.get(source_table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source_tables(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_entries_in_declaration_order() {
        let registry = MappingRegistry::from_json(
            r#"{
                "Users": {
                    "table": "analytics.users_dw",
                    "primaryKey": "id",
                    "fields": {"name": "/name", "id": "/id", "city": "/address/city"}
                }
            }"#,
        )
        .unwrap();

        let users = registry.get("Users").unwrap();
        assert_eq!(users.table(), "analytics.users_dw");
        assert_eq!(users.primary_key(), "id");
        assert_eq!(
            users
                .columns()
                .map(|(column, path)| format!("{column}={path}"))
                .collect::<Vec<_>>(),
            vec!["name=/name", "id=/id", "city=/address/city"]
        );
        assert!(registry.get("Orders").is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.source_tables().collect::<Vec<_>>(), vec!["Users"]);
    }

    #[test]
    fn rejects_invalid_documents() {
        for document in [
            "not json",
            r#"{"Users": {"table": "t", "primaryKey": "id", "fields": {"name": "/name"}}}"#,
            r#"{"Users": {"table": "t", "primaryKey": "id", "fields": {"id": "id"}}}"#,
        ] {
            let err = MappingRegistry::from_json(document).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConfigError, "{document}");
        }
    }
}
