//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging through `tracing`
//! - OpenTelemetry metrics for query execution and publishing

pub mod metrics;
pub mod tracing;
