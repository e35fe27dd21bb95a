//! Request handlers for request-driven query definitions.

use axum::Json;
use serde::Serialize;

use super::error::ApiError;
use super::AppState;
use crate::gateway::{QuerySource, Row};
use crate::observability::metrics::record_injection_rejected;
use crate::params::ParameterBag;
use crate::registry::{MappedQuery, QueryDefinition, SynchronousQuery};
use crate::template;

/// Successful endpoint response.
#[derive(Debug, Serialize)]
pub struct RowsResponse {
    pub rows: Vec<Row>,
}

/// Run the definition bound to `endpoint` with the request's parameters.
pub async fn handle_query(
    state: &AppState,
    endpoint: &str,
    definition: &QueryDefinition,
    bag: ParameterBag,
) -> Result<Json<RowsResponse>, ApiError> {
    let sql = match definition {
        QueryDefinition::Synchronous(query) => render_synchronous(state, query, &bag),
        QueryDefinition::Mapped(query) => resolve_mapped(state, query, &bag),
        QueryDefinition::Scheduled(_) => Err(ApiError::Misconfigured(
            "Scheduled queries are not served over HTTP",
        )),
    };

    let sql = match sql {
        Ok(sql) => sql,
        Err(e @ ApiError::Injection(_)) => {
            record_injection_rejected(endpoint);
            tracing::info!(endpoint, error = %e, "Request rejected by injection screening");
            return Err(e);
        }
        Err(e) => {
            tracing::warn!(endpoint, error = %e, "Failed to build statement");
            return Err(e);
        }
    };

    let rows = state
        .gateway
        .execute(&sql, QuerySource::Endpoint)
        .await
        .map_err(|e| {
            tracing::error!(endpoint, error = %e, "Query execution failed");
            ApiError::from(e)
        })?;

    Ok(Json(RowsResponse { rows }))
}

fn render_synchronous(
    state: &AppState,
    query: &SynchronousQuery,
    bag: &ParameterBag,
) -> Result<String, ApiError> {
    if query.template.trim().is_empty() {
        return Err(ApiError::Misconfigured("SQL template is empty"));
    }
    let statement = template::render(&query.template, bag, state.screen_injection)?;
    Ok(statement.sql)
}

fn resolve_mapped(
    state: &AppState,
    query: &MappedQuery,
    bag: &ParameterBag,
) -> Result<String, ApiError> {
    if query.namespace.is_empty() || query.statement_id.is_empty() {
        return Err(ApiError::Misconfigured("Namespace or Query ID is empty"));
    }
    let sql = state.mappers.resolve(
        &query.namespace,
        &query.statement_id,
        bag,
        state.screen_injection,
    )?;
    Ok(sql)
}
