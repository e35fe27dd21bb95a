//! HTTP error mapping for endpoint handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::gateway::ExecutionError;
use crate::mapper::MapperError;
use crate::template::InjectionDetected;

/// Body text for requests refused by injection screening.
pub const INJECTION_MESSAGE: &str = "SQL inject data detected.";

/// Error type for endpoint requests.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Injection(#[from] InjectionDetected),

    #[error(transparent)]
    Mapper(MapperError),

    #[error("{0}")]
    Misconfigured(&'static str),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<MapperError> for ApiError {
    fn from(e: MapperError) -> Self {
        match e {
            MapperError::Injection(e) => Self::Injection(e),
            other => Self::Mapper(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Injection(_) | Self::Mapper(_) => StatusCode::BAD_REQUEST,
            Self::Misconfigured(_) | Self::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Injection(_) => INJECTION_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
