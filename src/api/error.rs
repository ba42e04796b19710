//! Failure taxonomy shared by the auth core and the HTTP boundary.
//!
//! Components return `ApiError` to their callers instead of recovering locally.
//! The boundary renders it as `{"status": "error", "error": <message>}` with a
//! status code per variant. `Internal` and `Timeout` responses also carry a
//! [`FailureReport`] extension which the boundary middleware forwards to the
//! error-report webhook.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};
use utoipa::ToSchema;

/// One rejected request field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or missing parameters, malformed email.
    #[error("{message}")]
    InvalidInput {
        message: String,
        fields: Vec<FieldError>,
    },
    /// No matching credential, no such code.
    #[error("{0}")]
    NotFound(String),
    /// Duplicate account.
    #[error("{0}")]
    Conflict(String),
    /// Code requested again within the cooldown.
    #[error("{0}")]
    RateLimited(String),
    /// Attempts exceeded, expired code, wrong code.
    #[error("{0}")]
    Forbidden(String),
    /// Storage or transport failure. The detail is logged and reported, never returned.
    #[error("internal server error: {0}")]
    Internal(String),
    #[error("operation timed out")]
    Timeout,
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Build an `InvalidInput` from a list of field errors.
    pub fn invalid_fields(fields: Vec<FieldError>) -> Self {
        let message = fields
            .iter()
            .map(|field| field.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Self::InvalidInput { message, fields }
    }

    pub fn internal(detail: impl std::fmt::Display) -> Self {
        Self::Internal(detail.to_string())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Internal and timeout failures go to the error-report webhook.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::Timeout)
    }

    fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Alternate formatting keeps the whole context chain.
        Self::Internal(format!("{err:#}"))
    }
}

/// Error payload returned for every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    #[schema(example = "error")]
    pub status: String,
    #[schema(example = "wrong code")]
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

/// Response extension marking a failure for the error-report webhook.
#[derive(Clone, Debug)]
pub struct FailureReport {
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reportable = self.is_reportable();
        let detail = self.to_string();

        if reportable {
            error!("{detail}");
        } else {
            debug!(status = status.as_u16(), "{detail}");
        }

        let body = ErrorBody {
            status: "error".to_string(),
            error: self.public_message(),
            fields: match self {
                Self::InvalidInput { fields, .. } => fields,
                _ => Vec::new(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if reportable {
            response
                .extensions_mut()
                .insert(FailureReport { message: detail });
        }
        response
    }
}
