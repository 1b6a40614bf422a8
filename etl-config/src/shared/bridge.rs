use serde::Deserialize;
use std::time::Duration;

use crate::Config;
use crate::shared::{MappingTable, ValidationError, WarehouseConnectionConfig};

/// Complete configuration of the bridge binary.
///
/// This intentionally does not implement `Serialize` to avoid leaking secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Warehouse connection target and credentials.
    pub warehouse: WarehouseConnectionConfig,
    #[serde(default)]
    pub upsert: UpsertConfig,
    /// JSON mapping document, usually supplied through `APP_MAPPINGS`.
    pub mappings: String,
    /// Deadline for processing one invocation, unbounded when absent.
    #[serde(default)]
    pub batch_timeout_ms: Option<u64>,
}

impl BridgeConfig {
    /// Validates the connection settings and the mapping document.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.warehouse.validate()?;
        self.mapping_table().map(|_| ())
    }

    /// Parses and validates the mapping document.
    pub fn mapping_table(&self) -> Result<MappingTable, ValidationError> {
        MappingTable::from_json(&self.mappings)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }
}

impl Config for BridgeConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["warehouse.credentials_command"];
}

/// Upsert behavior settings.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UpsertConfig {
    #[serde(default)]
    pub mode: UpsertMode,
}

/// Statement protocol used to upsert a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertMode {
    /// Existence check followed by an `UPDATE` or an `INSERT`.
    ///
    /// Not atomic across concurrent writers of the same key.
    #[default]
    CheckThenAct,
    /// Single `INSERT ... ON CONFLICT (key) DO UPDATE` statement.
    ///
    /// Requires a uniqueness constraint on the key column.
    OnConflict,
}
