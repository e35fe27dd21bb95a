//! Typed query definitions parsed from `;`-delimited configuration entries.
//!
//! | kind token | field 2      | field 3      | field 4       |
//! |------------|--------------|--------------|---------------|
//! | `api`      | SQL template | endpoint     |               |
//! | `mqtt`     | SQL template | topic suffix | interval (ms) |
//! | `mybatis`  | namespace    | statement id | endpoint      |

use std::time::Duration;
use thiserror::Error;

/// Field delimiter inside a raw entry.
pub const FIELD_DELIMITER: char = ';';

/// Error raised for a single malformed configuration entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown query kind `{0}` (expected api, mqtt or mybatis)")]
    UnknownKind(String),

    #[error("{kind} entry is missing field `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("invalid interval `{0}`: expected a positive integer of milliseconds")]
    InvalidInterval(String),
}

/// A synchronous request/response endpoint over a placeholder template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchronousQuery {
    pub template: String,
    pub endpoint: String,
}

/// A template executed on a fixed cadence and published to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledQuery {
    pub template: String,
    /// Suffix appended to the transport's base prefix.
    pub topic: String,
    pub interval: Duration,
}

/// An endpoint whose SQL is assembled by a named mapper statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedQuery {
    pub namespace: String,
    pub statement_id: String,
    pub endpoint: String,
}

/// One configured query, classified by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryDefinition {
    Synchronous(SynchronousQuery),
    Scheduled(ScheduledQuery),
    Mapped(MappedQuery),
}

impl QueryDefinition {
    /// Parse one raw entry.
    pub fn parse(raw: &str) -> Result<Self, ConfigurationError> {
        let fields: Vec<&str> = raw.split(FIELD_DELIMITER).collect();
        let kind = fields[0].trim().to_lowercase();

        let field = |index: usize, kind: &'static str, name: &'static str| {
            fields
                .get(index)
                .map(|s| s.to_string())
                .ok_or(ConfigurationError::MissingField { kind, field: name })
        };

        match kind.as_str() {
            "api" => Ok(Self::Synchronous(SynchronousQuery {
                template: field(1, "api", "template")?,
                endpoint: field(2, "api", "endpoint")?,
            })),
            "mqtt" => {
                let template = field(1, "mqtt", "template")?;
                let topic = field(2, "mqtt", "topic")?;
                let raw_interval = field(3, "mqtt", "interval")?;
                let interval_ms: u64 = raw_interval
                    .trim()
                    .parse()
                    .map_err(|_| ConfigurationError::InvalidInterval(raw_interval.clone()))?;
                if interval_ms == 0 {
                    return Err(ConfigurationError::InvalidInterval(raw_interval));
                }
                Ok(Self::Scheduled(ScheduledQuery {
                    template,
                    topic,
                    interval: Duration::from_millis(interval_ms),
                }))
            }
            "mybatis" => Ok(Self::Mapped(MappedQuery {
                namespace: field(1, "mybatis", "namespace")?,
                statement_id: field(2, "mybatis", "statement id")?,
                endpoint: field(3, "mybatis", "endpoint")?,
            })),
            _ => Err(ConfigurationError::UnknownKind(kind)),
        }
    }

    /// Route path served by this definition, if it is request-driven.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Synchronous(q) => Some(&q.endpoint),
            Self::Mapped(q) => Some(&q.endpoint),
            Self::Scheduled(_) => None,
        }
    }

    /// The scheduled payload, if this is a scheduled definition.
    pub fn as_scheduled(&self) -> Option<&ScheduledQuery> {
        match self {
            Self::Scheduled(q) => Some(q),
            Self::Synchronous(_) | Self::Mapped(_) => None,
        }
    }

    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Synchronous(_) => "api",
            Self::Scheduled(_) => "mqtt",
            Self::Mapped(_) => "mybatis",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_entry() {
        let def = QueryDefinition::parse("api;SELECT * FROM t WHERE id=#{id};/items").unwrap();
        assert_eq!(
            def,
            QueryDefinition::Synchronous(SynchronousQuery {
                template: "SELECT * FROM t WHERE id=#{id}".into(),
                endpoint: "/items".into(),
            })
        );
        assert_eq!(def.endpoint(), Some("/items"));
    }

    #[test]
    fn test_parse_mqtt_entry() {
        let def = QueryDefinition::parse("MQTT;SELECT 1;/status;1500").unwrap();
        match def {
            QueryDefinition::Scheduled(q) => {
                assert_eq!(q.topic, "/status");
                assert_eq!(q.interval, Duration::from_millis(1500));
            }
            other => panic!("expected scheduled definition, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_mybatis_entry() {
        let def = QueryDefinition::parse("mybatis;shop;findItems;/shop/items").unwrap();
        assert_eq!(
            def,
            QueryDefinition::Mapped(MappedQuery {
                namespace: "shop".into(),
                statement_id: "findItems".into(),
                endpoint: "/shop/items".into(),
            })
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(
            QueryDefinition::parse("graphql;x;y"),
            Err(ConfigurationError::UnknownKind("graphql".into()))
        );
    }

    #[test]
    fn test_mqtt_without_interval_rejected() {
        assert_eq!(
            QueryDefinition::parse("mqtt;SELECT 1;/status"),
            Err(ConfigurationError::MissingField {
                kind: "mqtt",
                field: "interval"
            })
        );
    }

    #[test]
    fn test_mqtt_non_numeric_or_zero_interval_rejected() {
        assert!(matches!(
            QueryDefinition::parse("mqtt;SELECT 1;/status;soon"),
            Err(ConfigurationError::InvalidInterval(_))
        ));
        assert!(matches!(
            QueryDefinition::parse("mqtt;SELECT 1;/status;0"),
            Err(ConfigurationError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_empty_template_is_accepted_at_load() {
        let def = QueryDefinition::parse("api;;/empty").unwrap();
        match def {
            QueryDefinition::Synchronous(q) => assert!(q.template.is_empty()),
            other => panic!("expected synchronous definition, got {other:?}"),
        }
    }
}
