//! Process wiring and lifecycle.
//!
//! Builds the execution backend, registry, mappers and transport from
//! [`Config`], then runs:
//! - the axum HTTP server for request-driven definitions
//! - one publish task per scheduled definition
//!
//! Shutdown stops the HTTP server gracefully, cancels the publish tasks and
//! waits for them to finish.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::gateway::sqlite::SqliteExecutor;
use crate::gateway::ExecutionGateway;
use crate::mapper::MapperRegistry;
use crate::publish::mqtt::MqttTransport;
use crate::publish::{DisconnectedTransport, PublishScheduler, PublishTransport};
use crate::registry::{QueryDefinition, Registry};
use crate::service::{create_router, AppState};

/// Run the sqlgate server.
///
/// # Arguments
///
/// * `config` - Server configuration
/// * `shutdown_rx` - Receiver for shutdown signal
///
/// # Returns
///
/// Returns when the server has shut down.
pub async fn run_server(config: Config, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(listener, config, shutdown_rx).await
}

/// Run the server on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let executor = SqliteExecutor::open(&config.database, config.max_pool_size)
        .with_context(|| format!("failed to open database {}", config.database.display()))?;
    match executor.probe() {
        Ok(()) => tracing::info!(database = %config.database.display(), "Database connection ready"),
        Err(e) => tracing::error!(database = %config.database.display(), error = %e, "Database probe failed"),
    }
    let gateway = ExecutionGateway::new(Arc::new(executor));

    let registry = Registry::load(config.query_entries());
    tracing::info!(
        definitions = registry.len(),
        rejected = registry.rejected().len(),
        "Query definitions loaded"
    );

    let mappers = match &config.mapper_dir {
        Some(dir) => MapperRegistry::load_dir(dir)
            .with_context(|| format!("failed to load mappers from {}", dir.display()))?,
        None => MapperRegistry::new(),
    };
    warn_unresolved_mappers(&registry, &mappers);

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    let transport: Arc<dyn PublishTransport> = match config.mqtt_settings() {
        Some(settings) => Arc::new(MqttTransport::connect(&settings, &tracker, token.clone())),
        None => {
            if registry.scheduled().next().is_some() {
                tracing::warn!("No MQTT host configured, scheduled queries will not run");
            }
            Arc::new(DisconnectedTransport)
        }
    };

    let scheduler = PublishScheduler::spawn(
        &registry,
        gateway.clone(),
        transport,
        &config.mqtt_topic,
        &tracker,
        token.clone(),
    );
    tracing::info!(tasks = scheduler.len(), "Publish scheduler started");

    let state = AppState {
        mappers: Arc::new(mappers),
        gateway,
        screen_injection: config.sql_injection,
    };
    let app = create_router(&registry, state);

    let addr = listener.local_addr().context("listener has no local address")?;
    tracing::info!(address = %addr, "Starting sqlgate HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Shutdown signal received, stopping server");
        })
        .await
        .context("HTTP server error")?;

    tracing::info!("Stopping scheduled queries");
    token.cancel();
    tracker.close();
    tracker.wait().await;

    tracing::info!("Server stopped");
    Ok(())
}

fn warn_unresolved_mappers(registry: &Registry, mappers: &MapperRegistry) {
    for def in registry.definitions() {
        if let QueryDefinition::Mapped(q) = def.as_ref() {
            if !q.namespace.is_empty()
                && !q.statement_id.is_empty()
                && !mappers.contains(&q.namespace, &q.statement_id)
            {
                tracing::warn!(
                    namespace = %q.namespace,
                    id = %q.statement_id,
                    endpoint = %q.endpoint,
                    "Mapped endpoint refers to an unknown statement"
                );
            }
        }
    }
}
