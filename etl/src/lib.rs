//! Change-data-capture bridge from stream change records into a relational warehouse.
//!
//! A batch of change records flows through four stages, each in its own module:
//!
//! 1. [`conversions`] decodes a record's typed-attribute new image into a
//!    [`types::ValueTree`].
//! 2. [`extract`] pulls the configured columns out of the tree by pointer path into a
//!    [`types::UpsertRow`].
//! 3. [`upsert`] writes the row by primary key through a [`destination::WarehouseSession`].
//! 4. [`batch`] drives the stages for every record of an invocation, resolving each record's
//!    mapping in the [`registry`].
//!
//! [`destination::postgres`] implements the warehouse session over the Postgres wire protocol
//! and [`credentials`] supplies and refreshes the credentials it connects with.

pub mod batch;
pub mod conversions;
pub mod credentials;
pub mod destination;
pub mod error;
pub mod extract;
mod macros;
pub mod registry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod upsert;
