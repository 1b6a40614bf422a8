//! Test doubles and builders for exercising the bridge without a warehouse.
//!
//! - [`memory`] holds [`memory::MemoryWarehouse`], which interprets upsert statements against
//!   in-memory tables, records every statement and supports transactions and injected failures.
//! - [`records`] builds change records, payloads and registries in wire form.
pub mod memory;
pub mod records;
