//! Configuration parsing for the sqlgate server.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - `QUERY_*` environment variables as query entries

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::publish::mqtt::MqttSettings;

/// Prefix of environment variables holding query entries.
pub const QUERY_ENV_PREFIX: &str = "QUERY_";

/// sqlgate: declarative SQL over HTTP and MQTT.
#[derive(Parser, Debug, Clone)]
#[command(name = "sqlgate")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "SQLGATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "SQLGATE_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "SQLGATE_LOG_JSON")]
    pub log_json: bool,

    /// SQLite database file
    #[arg(short, long, env = "SQLGATE_DATABASE", default_value = "./data/sqlgate.db")]
    pub database: PathBuf,

    /// Maximum number of pooled database connections
    #[arg(long, env = "SQLGATE_MAX_POOL_SIZE", default_value_t = 10)]
    pub max_pool_size: u32,

    /// Reject request values that look like SQL injection
    #[arg(long, env = "SQLGATE_SQL_INJECTION")]
    pub sql_injection: bool,

    /// Directory of mapper XML files
    #[arg(long, env = "SQLGATE_MAPPER_DIR")]
    pub mapper_dir: Option<PathBuf>,

    /// MQTT broker host; scheduled queries stay idle without one
    #[arg(long, env = "SQLGATE_MQTT_HOST")]
    pub mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "SQLGATE_MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// MQTT client id
    #[arg(long, env = "SQLGATE_MQTT_CLIENT_ID", default_value = "sqlgate")]
    pub mqtt_client_id: String,

    /// MQTT username
    #[arg(long, env = "SQLGATE_MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    /// MQTT password
    #[arg(long, env = "SQLGATE_MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    /// Prefix prepended to every scheduled query topic
    #[arg(long, env = "SQLGATE_MQTT_TOPIC", default_value = "")]
    pub mqtt_topic: String,

    /// Query entry (`api;sql;endpoint`, `mqtt;sql;topic;interval_ms`,
    /// `mybatis;namespace;id;endpoint`). Repeatable.
    #[arg(short, long = "query")]
    pub queries: Vec<String>,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// All query entries: `--query` values, then `QUERY_*` variables of
    /// the process environment ordered by name.
    pub fn query_entries(&self) -> Vec<String> {
        let vars = std::env::vars_os()
            .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)));
        self.query_entries_from(vars)
    }

    /// Same as [`Config::query_entries`] over an explicit variable set.
    pub fn query_entries_from<I>(&self, vars: I) -> Vec<String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut from_env: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(name, _)| name.starts_with(QUERY_ENV_PREFIX))
            .collect();
        from_env.sort_by(|a, b| a.0.cmp(&b.0));

        self.queries
            .iter()
            .cloned()
            .chain(from_env.into_iter().map(|(_, value)| value))
            .collect()
    }

    /// Broker settings, if a broker host is configured.
    pub fn mqtt_settings(&self) -> Option<MqttSettings> {
        let host = self.mqtt_host.as_ref().filter(|h| !h.is_empty())?;
        Some(MqttSettings {
            host: host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            keep_alive: Duration::from_secs(30),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            log_level: "info".into(),
            log_json: false,
            database: PathBuf::from("./data/sqlgate.db"),
            max_pool_size: 10,
            sql_injection: false,
            mapper_dir: None,
            mqtt_host: None,
            mqtt_port: 1883,
            mqtt_client_id: "sqlgate".into(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_topic: String::new(),
            queries: Vec::new(),
            otel_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(!config.sql_injection);
        assert!(config.mqtt_settings().is_none());
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::try_parse_from([
            "sqlgate",
            "--port",
            "8080",
            "--sql-injection",
            "--mqtt-host",
            "broker.local",
            "--mqtt-topic",
            "plant/",
            "-q",
            "api;SELECT 1;/one",
            "--query",
            "mqtt;SELECT 2;two;1000",
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert!(config.sql_injection);
        assert_eq!(config.mqtt_topic, "plant/");
        assert_eq!(config.queries.len(), 2);

        let mqtt = config.mqtt_settings().unwrap();
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.client_id, "sqlgate");
    }

    #[test]
    fn test_log_json_flag() {
        assert!(!Config::try_parse_from(["sqlgate"]).unwrap().log_json);
        assert!(Config::try_parse_from(["sqlgate", "--log-json"]).unwrap().log_json);
    }

    #[test]
    fn test_query_entries_order() {
        let config = Config {
            queries: vec!["api;SELECT 0;/zero".into()],
            ..Config::default()
        };
        let vars = vec![
            ("QUERY_B".to_string(), "api;SELECT 2;/two".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("QUERY_A".to_string(), "api;SELECT 1;/one".to_string()),
        ];

        assert_eq!(
            config.query_entries_from(vars),
            vec!["api;SELECT 0;/zero", "api;SELECT 1;/one", "api;SELECT 2;/two"]
        );
    }

    #[test]
    fn test_empty_mqtt_host_means_no_broker() {
        let config = Config {
            mqtt_host: Some(String::new()),
            ..Config::default()
        };
        assert!(config.mqtt_settings().is_none());
    }
}
