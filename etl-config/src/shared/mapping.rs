use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::shared::ValidationError;

/// The mapping document: source table name to [`EtlEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct MappingTable(BTreeMap<String, EtlEntry>);

impl MappingTable {
    /// Parses and validates a JSON mapping document.
    pub fn from_json(document: &str) -> Result<Self, ValidationError> {
        let table: MappingTable = serde_json::from_str(document)
            .map_err(|err| ValidationError::InvalidMappingDocument(err.to_string()))?;
        table.validate()?;

        Ok(table)
    }

    /// Validates every entry of the table.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.0
            .iter()
            .try_for_each(|(source_table, entry)| entry.validate(source_table))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(source table, entry)` pairs in source table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EtlEntry)> {
        self.0.iter().map(|(name, entry)| (name.as_str(), entry))
    }
}

impl FromIterator<(String, EtlEntry)> for MappingTable {
    fn from_iter<I: IntoIterator<Item = (String, EtlEntry)>>(iter: I) -> Self {
        MappingTable(iter.into_iter().collect())
    }
}

/// How the rows of one source table land in the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtlEntry {
    /// Destination table, optionally schema-qualified.
    #[serde(alias = "destinationTable")]
    pub table: String,
    /// Column used to identify an existing row.
    #[serde(alias = "primaryKeyColumn")]
    pub primary_key: String,
    /// Destination columns in declaration order.
    #[serde(alias = "columns")]
    pub fields: ColumnMappings,
}

impl EtlEntry {
    /// Checks the entry invariants for the given source table.
    ///
    /// The primary key column must be declared, column names must be non-empty and every path
    /// must be a pointer (empty, or starting with `/`).
    pub fn validate(&self, source_table: &str) -> Result<(), ValidationError> {
        if self.table.trim().is_empty() {
            return Err(ValidationError::EmptyDestinationTable {
                source_table: source_table.to_string(),
            });
        }

        if self.fields.is_empty() {
            return Err(ValidationError::NoColumns {
                source_table: source_table.to_string(),
            });
        }

        for mapping in self.fields.iter() {
            if mapping.column.trim().is_empty() {
                return Err(ValidationError::EmptyColumnName {
                    source_table: source_table.to_string(),
                });
            }

            if !mapping.path.is_empty() && !mapping.path.starts_with('/') {
                return Err(ValidationError::InvalidFieldPath {
                    source_table: source_table.to_string(),
                    column: mapping.column.clone(),
                    path: mapping.path.clone(),
                });
            }
        }

        if self.fields.get(&self.primary_key).is_none() {
            return Err(ValidationError::PrimaryKeyNotMapped {
                source_table: source_table.to_string(),
                primary_key: self.primary_key.clone(),
            });
        }

        Ok(())
    }
}

/// A destination column and the pointer path its value is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub column: String,
    pub path: String,
}

impl ColumnMapping {
    pub fn new(column: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            path: path.into(),
        }
    }
}

/// Column mappings in declaration order.
///
/// Deserializes from a JSON object `{"column": "/path", ...}`, keeping the order in which
/// the columns are written and rejecting duplicate column names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMappings(Vec<ColumnMapping>);

impl ColumnMappings {
    pub fn new(mappings: Vec<ColumnMapping>) -> Self {
        Self(mappings)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ColumnMapping> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the mapping declared for `column`.
    pub fn get(&self, column: &str) -> Option<&ColumnMapping> {
        self.0.iter().find(|mapping| mapping.column == column)
    }
}

impl<'a> IntoIterator for &'a ColumnMappings {
    type Item = &'a ColumnMapping;
    type IntoIter = std::slice::Iter<'a, ColumnMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for ColumnMappings {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColumnMappingsVisitor;

        impl<'de> Visitor<'de> for ColumnMappingsVisitor {
            type Value = ColumnMappings;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of destination column names to field paths")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut seen = HashSet::new();
                let mut mappings = Vec::with_capacity(access.size_hint().unwrap_or(0));

                while let Some((column, path)) = access.next_entry::<String, String>()? {
                    if !seen.insert(column.clone()) {
                        return Err(de::Error::custom(format!("duplicate column `{column}`")));
                    }
                    mappings.push(ColumnMapping { column, path });
                }

                Ok(ColumnMappings(mappings))
            }
        }

        deserializer.deserialize_map(ColumnMappingsVisitor)
    }
}
