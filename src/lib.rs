//! sqlgate: declarative SQL over HTTP and MQTT.
//!
//! Query definitions are plain configuration strings. Each one becomes an
//! HTTP endpoint backed by a placeholder template, an HTTP endpoint backed
//! by a mapper XML statement, or a timer that publishes query results to an
//! MQTT topic.
//!
//! # Architecture
//!
//! - **Declarative**: `api`, `mqtt` and `mybatis` entries parsed into typed definitions
//! - **Screened**: optional signature-based rejection of injected request values
//! - **Lossless**: integers beyond the JSON safe range are returned as strings
//! - **Observable**: structured logs and OpenTelemetry metrics
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`gateway`]: SQL execution and row normalization
//! - [`mapper`]: MyBatis-style dynamic statements
//! - [`observability`]: Metrics and tracing setup
//! - [`params`]: Per-request parameter values
//! - [`publish`]: MQTT transport and publish scheduler
//! - [`registry`]: Query definition parsing
//! - [`server`]: Process wiring and lifecycle
//! - [`service`]: HTTP endpoint handlers
//! - [`template`]: `#{name}` placeholder rendering and injection screening

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // mapper::MapperError is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL and XML
    clippy::struct_excessive_bools,     // Config structs may have flags
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod config;
pub mod gateway;
pub mod mapper;
pub mod observability;
pub mod params;
pub mod publish;
pub mod registry;
pub mod server;
pub mod service;
pub mod template;
