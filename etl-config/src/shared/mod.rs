//! Shared configuration types for the bridge.

mod base;
mod bridge;
mod connection;
mod mapping;

pub use base::ValidationError;
pub use bridge::{BridgeConfig, UpsertConfig, UpsertMode};
pub use connection::{
    DEFAULT_WAREHOUSE_PORT, TlsConfig, WAREHOUSE_APPLICATION_NAME, WarehouseConnectionConfig,
};
pub use mapping::{ColumnMapping, ColumnMappings, EtlEntry, MappingTable};
