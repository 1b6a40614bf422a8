//! Common types used throughout the bridge.
//!
//! Re-exports the decoded value model, the inbound change record model and the flat row
//! produced for the warehouse.

mod record;
mod row;
mod value;

pub use record::*;
pub use row::*;
pub use value::*;
