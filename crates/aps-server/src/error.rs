use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use aps_engine::EngineError;

/// Error returned by every handler, rendered as `{error, message, violations?}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest {
        message: String,
        violations: Vec<String>,
    },
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    violations: Option<&'a [String]>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            violations: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { violations, .. } if !violations.is_empty() => "validation_error",
            Self::BadRequest { .. } => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "calculation_failed",
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        if e.is_not_found() {
            return Self::NotFound(e.to_string());
        }
        if let Some(violations) = e.violations() {
            return Self::BadRequest {
                message: e.to_string(),
                violations: violations.to_vec(),
            };
        }
        match e {
            EngineError::UnknownScenario(_) | EngineError::UnknownTemplate(_) => {
                Self::bad_request(e.to_string())
            }
            other => {
                warn!(error_kind = other.error_kind(), error = %other, "request failed");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (message, violations) = match &self {
            Self::BadRequest {
                message,
                violations,
            } => (message.as_str(), violations.as_slice()),
            Self::NotFound(message) | Self::Internal(message) => (message.as_str(), &[][..]),
        };
        let body = ErrorBody {
            error: code,
            message,
            violations: (!violations.is_empty()).then_some(violations),
        };
        (status, Json(body)).into_response()
    }
}

/// Turns a handler panic into a JSON 500.
pub fn panic_response(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "handler panicked");
    ApiError::Internal(format!("internal error: {detail}")).into_response()
}
