mod base;
pub mod postgres;

pub use base::{Statement, StatementKind, WarehouseConnector, WarehouseSession};
