//! Failure taxonomy shared by the lender client, webhook pipeline and
//! reference-data caches. Callers map these onto transport responses
//! without looking at provider-specific detail.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum FinanceError {
    /// A named field failed local validation before any provider call.
    #[error("invalid value for {field}: {message}")]
    Validation { field: String, message: String },

    /// Credentials rejected or a session expired mid-flight.
    #[error("authentication with the lender failed: {0}")]
    Authentication(String),

    /// A referenced external resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The provider throttled us.
    #[error("rate limited by the lender: {0}")]
    RateLimited(String),

    /// Any other non-2xx from the provider, or a transport failure.
    #[error("lender request failed with status {status}: {message}")]
    Provider {
        status: u16,
        message: String,
        detail: Option<serde_json::Value>,
    },

    /// Missing credentials or broken deployment wiring. Fatal, operator-facing.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl FinanceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        FinanceError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code, safe to match on across versions.
    pub fn code(&self) -> &'static str {
        match self {
            FinanceError::Validation { .. } => "validation_error",
            FinanceError::Authentication(_) => "authentication_error",
            FinanceError::NotFound(_) => "not_found",
            FinanceError::RateLimited(_) => "rate_limited",
            FinanceError::Provider { .. } => "provider_error",
            FinanceError::Configuration(_) => "configuration_error",
        }
    }

    /// HTTP status mirrored outward. Provider-side failures surface as 502
    /// because the fault is upstream of this service.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FinanceError::Validation { .. } => StatusCode::BAD_REQUEST,
            FinanceError::Authentication(_) => StatusCode::UNAUTHORIZED,
            FinanceError::NotFound(_) => StatusCode::NOT_FOUND,
            FinanceError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            FinanceError::Provider { .. } => StatusCode::BAD_GATEWAY,
            FinanceError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message safe to show to an end user. Raw provider
    /// payloads never leak through here; use [`log_details`](Self::log_details)
    /// for the full picture.
    pub fn user_message(&self) -> String {
        match self {
            FinanceError::Validation { field, message } => {
                format!("Invalid value for {field}: {message}")
            }
            FinanceError::Authentication(_) => {
                "Could not authenticate with the financing provider.".to_string()
            }
            FinanceError::NotFound(resource) => format!("{resource} was not found."),
            FinanceError::RateLimited(_) => {
                "The financing provider is busy. Please try again shortly.".to_string()
            }
            FinanceError::Provider { .. } => {
                "The financing provider returned an error. Please try again.".to_string()
            }
            FinanceError::Configuration(_) => {
                "The financing integration is not configured. Contact your administrator."
                    .to_string()
            }
        }
    }

    /// Emits the full raw detail for operational diagnosis, including the
    /// original provider payload when one was captured.
    pub fn log_details(&self) {
        match self {
            FinanceError::Provider {
                status,
                message,
                detail,
            } => {
                error!(code = self.code(), status, %message, ?detail, "lender request failed");
            }
            other => {
                error!(code = other.code(), error = %other, "finance operation failed");
            }
        }
    }

    /// Classifies a non-2xx provider response into the taxonomy.
    pub fn from_provider_response(status: u16, body: &str) -> Self {
        let detail: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let message = detail
            .as_ref()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()))
            .unwrap_or("no message in response")
            .to_string();

        match status {
            401 | 403 => FinanceError::Authentication(message),
            404 => FinanceError::NotFound(message),
            429 => FinanceError::RateLimited(message),
            _ => FinanceError::Provider {
                status,
                message,
                detail,
            },
        }
    }
}

impl From<reqwest::Error> for FinanceError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16()).unwrap_or(0);
        FinanceError::Provider {
            status,
            message: err.to_string(),
            detail: None,
        }
    }
}

impl IntoResponse for FinanceError {
    fn into_response(self) -> Response {
        self.log_details();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.user_message(),
            }
        }));
        (self.status_code(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, FinanceError>;
