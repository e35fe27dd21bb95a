//! HTTP surface for request-driven query definitions.
//!
//! Every synchronous and mapped definition is mounted as `GET <endpoint>`.
//! Query-string pairs become the request's parameter bag.
//!
//! Responses:
//! - `200 {"rows": [...]}` on success
//! - `400 {"message": ...}` for rejected input or a mapper caller error
//! - `500 {"message": ...}` for a misconfigured definition or failed execution

pub mod error;
pub mod query;

pub use error::ApiError;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, MethodRouter};
use axum::Router;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::gateway::ExecutionGateway;
use crate::mapper::MapperRegistry;
use crate::params::ParameterBag;
use crate::registry::Registry;

/// Path of the liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

/// State shared by every endpoint handler.
#[derive(Clone)]
pub struct AppState {
    pub mappers: Arc<MapperRegistry>,
    pub gateway: ExecutionGateway,
    pub screen_injection: bool,
}

/// Return `endpoint` with a leading `/`.
pub fn route_path(endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{endpoint}")
    }
}

/// Build the router for every endpoint in `registry`.
///
/// When two definitions map to the same path the first one registered is
/// served. A path the router refuses (an unnamed wildcard, or a pattern
/// that overlaps an earlier one such as `/a/:x` and `/a/:y`) skips only
/// that definition. `/health` is mounted unless a definition already
/// claims it.
pub fn create_router(registry: &Registry, state: AppState) -> Router {
    let mut router: Router<AppState> = Router::new();
    let mut mounted = HashSet::new();

    for (endpoint, definition) in registry.endpoints() {
        let path = route_path(endpoint);
        if mounted.contains(&path) {
            tracing::warn!(endpoint = %path, "Endpoint already registered, definition shadowed");
            continue;
        }

        let definition = Arc::clone(definition);
        let kind = definition.kind();
        let route_endpoint: Arc<str> = Arc::from(path.as_str());
        let handler = get(
            move |State(state): State<AppState>, Query(params): Query<HashMap<String, String>>| {
                let definition = definition.clone();
                let endpoint = route_endpoint.clone();
                async move {
                    let bag: ParameterBag = params.into_iter().collect();
                    query::handle_query(&state, &endpoint, &definition, bag).await
                }
            },
        );

        match try_route(&router, &path, handler) {
            Ok(next) => {
                router = next;
                tracing::info!(endpoint = %path, kind, "Endpoint registered");
                mounted.insert(path);
            }
            Err(reason) => {
                tracing::warn!(
                    endpoint = %path,
                    kind,
                    reason = %reason,
                    "Endpoint rejected, definition skipped"
                );
            }
        }
    }

    if !mounted.contains(HEALTH_PATH) {
        match try_route(&router, HEALTH_PATH, get(health_handler)) {
            Ok(next) => router = next,
            Err(reason) => tracing::warn!(reason = %reason, "Health endpoint not mounted"),
        }
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Add `method_router` at `path` on a copy of `router`.
///
/// axum panics on paths it cannot insert; the panic is turned into the
/// error text and `router` is left as it was.
fn try_route(
    router: &Router<AppState>,
    path: &str,
    method_router: MethodRouter<AppState>,
) -> Result<Router<AppState>, String> {
    let router = router.clone();
    panic::catch_unwind(AssertUnwindSafe(move || router.route(path, method_router)))
        .map_err(|payload| panic_reason(payload.as_ref()))
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "route rejected".to_string())
}

/// Handle GET /health.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
