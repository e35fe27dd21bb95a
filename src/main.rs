//! sqlgate: declarative SQL over HTTP and MQTT.
//!
//! # Usage
//!
//! ```bash
//! sqlgate --port 3000 --database ./data/app.db \
//!     --query 'api;SELECT * FROM users WHERE id = #{id};/users' \
//!     --query 'mqtt;SELECT * FROM readings;sensors/latest;5000' \
//!     --mqtt-host localhost --mqtt-topic plant/
//! ```
//!
//! Every flag also reads an environment variable, for example:
//! - `SQLGATE_PORT`: Port to listen on
//! - `SQLGATE_DATABASE`: SQLite database file
//! - `QUERY_*`: Query entries, registered in variable-name order
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use sqlgate::config::Config;
use sqlgate::observability::metrics::init_metrics_with_endpoint;
use sqlgate::observability::tracing::init_tracing;
use sqlgate::server::run_server;
use std::fs;
use tokio::sync::watch;

/// Startup banner on stderr. Credentials are masked.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let mqtt = match &config.mqtt_host {
        Some(host) if !host.is_empty() => {
            let user = match (&config.mqtt_username, &config.mqtt_password) {
                (Some(user), Some(_)) => format!("{user}:****@"),
                (Some(user), None) => format!("{user}@"),
                _ => String::new(),
            };
            format!("{user}{host}:{} (topic prefix '{}')", config.mqtt_port, config.mqtt_topic)
        }
        _ => "disabled".to_string(),
    };

    eprintln!(
        r#"
            _             _
  ___  __ _| | __ _  __ _| |_ ___
 / __|/ _` | |/ _` |/ _` | __/ _ \
 \__ \ (_| | | (_| | (_| | ||  __/
 |___/\__, |_|\__, |\__,_|\__\___|
         |_|  |___/

  sqlgate v{} - Declarative SQL Gateway

  Configuration:
    Address:        {}:{}
    Database:       {}
    Mapper Dir:     {}
    MQTT:           {}
    SQL Injection:  {}
    Log Level:      {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.host,
        config.port,
        config.database.display(),
        config
            .mapper_dir
            .as_ref()
            .map_or_else(|| "none".to_string(), |d| d.display().to_string()),
        mqtt,
        if config.sql_injection { "screened" } else { "off" },
        config.log_level
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // CLI flags, then environment
    let config = Config::parse_args();

    init_tracing(&config.log_level, config.log_json);

    // OTLP export only when an endpoint is configured
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    // Ensure the database directory exists
    if let Some(parent) = config.database.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    print_banner(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // SIGINT/SIGTERM flip the shutdown channel
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("SIGINT received, shutting down");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("SIGTERM received, shutting down");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    if ctrl_c.await.is_ok() {
                        tracing::info!("SIGINT received, shutting down");
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            tracing::info!("Ctrl+C received, shutting down");
        }

        let _ = shutdown_tx.send(true);
    });

    run_server(config, shutdown_rx).await?;

    tracing::info!("sqlgate shutdown complete");
    Ok(())
}
