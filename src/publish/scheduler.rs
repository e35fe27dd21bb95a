//! Per-definition publish loop.
//!
//! Each scheduled definition gets one task:
//!
//! ```text
//! Idle -> AwaitingTransport -+-> (not connected) sleep interval -> AwaitingTransport
//!                            +-> Executing -> Published | Failed -> sleep interval -> AwaitingTransport
//! ```
//!
//! Cycles of one definition never overlap. A failed cycle is logged and
//! counted; the next cycle runs after the interval regardless.

use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{PublishTransport, TransportError};
use crate::gateway::{ExecutionError, ExecutionGateway, QuerySource, Row};
use crate::observability::metrics::{record_cycle_failure, record_publish};
use crate::params::ParameterBag;
use crate::registry::{QueryDefinition, Registry, ScheduledQuery};
use crate::template::{self, InjectionDetected};

/// Lifecycle state of one scheduled definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Idle,
    AwaitingTransport,
    Executing,
    Published,
    Failed,
}

#[derive(Debug, Error)]
enum CycleError {
    #[error(transparent)]
    Render(#[from] InjectionDetected),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Serialize rows into the publish payload.
pub fn encode_payload(rows: &[Row]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&json!({ "rows": rows }))
}

struct PublishTask {
    definition: Arc<QueryDefinition>,
    topic: String,
    gateway: ExecutionGateway,
    transport: Arc<dyn PublishTransport>,
    state: watch::Sender<ScheduleState>,
}

impl PublishTask {
    async fn run(self, token: CancellationToken) {
        let Some(query) = self.definition.as_scheduled() else {
            return;
        };
        tracing::info!(topic = %self.topic, interval_ms = query.interval.as_millis() as u64, "Scheduled query started");

        loop {
            self.state.send_replace(ScheduleState::AwaitingTransport);

            if self.transport.is_connected() {
                self.state.send_replace(ScheduleState::Executing);
                match self.cycle(query).await {
                    Ok(rows) => {
                        record_publish(&self.topic);
                        tracing::debug!(topic = %self.topic, rows, "Published query result");
                        self.state.send_replace(ScheduleState::Published);
                    }
                    Err(e) => {
                        record_cycle_failure(&self.topic);
                        tracing::warn!(topic = %self.topic, error = %e, "Scheduled cycle failed");
                        self.state.send_replace(ScheduleState::Failed);
                    }
                }
            } else {
                tracing::trace!(topic = %self.topic, "Transport not connected, skipping cycle");
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(query.interval) => {}
            }
        }

        tracing::info!(topic = %self.topic, "Scheduled query stopped");
    }

    async fn cycle(&self, query: &ScheduledQuery) -> Result<usize, CycleError> {
        let statement = template::render(&query.template, &ParameterBag::new(), false)?;
        let rows = self
            .gateway
            .execute(&statement.sql, QuerySource::Schedule)
            .await?;
        let payload = encode_payload(&rows)?;
        self.transport.publish(&self.topic, payload)?;
        Ok(rows.len())
    }
}

/// Observer handle for one running scheduled definition.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    pub topic: String,
    pub state: watch::Receiver<ScheduleState>,
}

/// Spawns and tracks one publish task per scheduled definition.
pub struct PublishScheduler {
    handles: Vec<ScheduleHandle>,
}

impl PublishScheduler {
    /// Spawn a task for every scheduled definition in `registry`.
    ///
    /// Full topics are `topic_prefix` followed by the definition's suffix.
    /// Tasks run on `tracker` until `token` is cancelled.
    pub fn spawn(
        registry: &Registry,
        gateway: ExecutionGateway,
        transport: Arc<dyn PublishTransport>,
        topic_prefix: &str,
        tracker: &TaskTracker,
        token: CancellationToken,
    ) -> Self {
        let handles = registry
            .scheduled()
            .filter_map(|definition| {
                let query = definition.as_scheduled()?;
                let topic = format!("{topic_prefix}{}", query.topic);
                let (state, rx) = watch::channel(ScheduleState::Idle);
                let task = PublishTask {
                    definition: Arc::clone(definition),
                    topic: topic.clone(),
                    gateway: gateway.clone(),
                    transport: transport.clone(),
                    state,
                };
                tracker.spawn(task.run(token.clone()));
                Some(ScheduleHandle { topic, state: rx })
            })
            .collect();

        Self { handles }
    }

    pub fn handles(&self) -> &[ScheduleHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
