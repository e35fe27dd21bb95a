//! Definition registry built once at startup.
//!
//! The registry owns every [`QueryDefinition`] behind an `Arc`; the HTTP
//! layer and the publish scheduler hold references, never copies. A
//! malformed entry is rejected on its own; the rest of the load continues.
//!
//! Endpoint uniqueness is not enforced here. When two request-driven
//! definitions share an endpoint, [`Registry::endpoints`] yields only the
//! first one registered.

pub mod definition;

pub use definition::{
    ConfigurationError, MappedQuery, QueryDefinition, ScheduledQuery, SynchronousQuery,
};

use std::collections::HashSet;
use std::sync::Arc;

/// An entry that failed to parse, with its position in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    pub index: usize,
    pub raw: String,
    pub error: ConfigurationError,
}

/// Immutable set of query definitions in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    definitions: Vec<Arc<QueryDefinition>>,
    rejected: Vec<RejectedEntry>,
}

impl Registry {
    /// Parse raw entries in order, keeping every valid definition.
    pub fn load<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::default();

        for (index, raw) in entries.into_iter().enumerate() {
            let raw = raw.as_ref();
            match QueryDefinition::parse(raw) {
                Ok(def) => {
                    tracing::debug!(index, kind = def.kind(), "Query definition loaded");
                    registry.definitions.push(Arc::new(def));
                }
                Err(error) => {
                    tracing::warn!(index, entry = raw, error = %error, "Rejected query definition");
                    registry.rejected.push(RejectedEntry {
                        index,
                        raw: raw.to_string(),
                        error,
                    });
                }
            }
        }

        registry
    }

    /// All valid definitions in registration order.
    pub fn definitions(&self) -> &[Arc<QueryDefinition>] {
        &self.definitions
    }

    /// Entries that failed to parse.
    pub fn rejected(&self) -> &[RejectedEntry] {
        &self.rejected
    }

    /// Scheduled definitions in registration order.
    pub fn scheduled(&self) -> impl Iterator<Item = &Arc<QueryDefinition>> {
        self.definitions
            .iter()
            .filter(|def| def.as_scheduled().is_some())
    }

    /// Request-driven definitions, one per endpoint; the first registration wins.
    pub fn endpoints(&self) -> Vec<(&str, &Arc<QueryDefinition>)> {
        let mut seen = HashSet::new();
        let mut routes = Vec::new();

        for def in &self.definitions {
            let Some(endpoint) = def.endpoint() else {
                continue;
            };
            if seen.insert(endpoint) {
                routes.push((endpoint, def));
            } else {
                tracing::warn!(endpoint, kind = def.kind(), "Endpoint already registered, definition shadowed");
            }
        }

        routes
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_keeps_valid_entries_and_reports_rejects() {
        let registry = Registry::load([
            "api;SELECT 1;/one",
            "bogus;x",
            "mqtt;SELECT 2;/two;100",
            "mqtt;SELECT 3;/three",
            "mybatis;ns;stmt;/four",
        ]);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.rejected().len(), 2);
        assert_eq!(registry.rejected()[0].index, 1);
        assert_eq!(registry.rejected()[1].index, 3);
        assert_eq!(registry.scheduled().count(), 1);
    }

    #[test]
    fn test_duplicate_endpoints_first_registration_wins() {
        let registry = Registry::load([
            "api;SELECT 'first';/dup",
            "mybatis;ns;stmt;/dup",
            "api;SELECT 'other';/other",
        ]);

        let routes = registry.endpoints();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].0, "/dup");
        assert!(matches!(routes[0].1.as_ref(), QueryDefinition::Synchronous(_)));
        assert_eq!(routes[1].0, "/other");
    }

    #[test]
    fn test_scheduled_definitions_have_no_endpoint() {
        let registry = Registry::load(["mqtt;SELECT 1;/t;10"]);
        assert!(registry.endpoints().is_empty());
    }
}
