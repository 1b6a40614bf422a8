//! Telemetry setup shared by the bridge binary and tests.

pub mod tracing;
