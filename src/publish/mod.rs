//! Publish path for scheduled queries.
//!
//! Provides:
//! - [`PublishTransport`], the readiness + fire-and-forget publish seam
//! - An MQTT implementation over rumqttc
//! - The per-definition publish scheduler

pub mod mqtt;
pub mod scheduler;

pub use scheduler::{PublishScheduler, ScheduleState};

use thiserror::Error;

/// Error type for handing a payload to the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// A message transport the scheduler publishes into.
///
/// `publish` hands the payload off and returns; delivery is not awaited.
pub trait PublishTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Transport used when no broker is configured. Never connects.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedTransport;

impl PublishTransport for DisconnectedTransport {
    fn is_connected(&self) -> bool {
        false
    }

    fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }
}
