//! Request-boundary error type.
//!
//! Every handler returns `Result<_, ApiError>`; the `IntoResponse` impl turns
//! each variant into the uniform `{ "error": ..., "details"?: ... }` body.
//! Upstream and persistence causes are logged here and never echoed back.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::provider::ProviderError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<String>,
    },

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("{context}: {source}")]
    Persistence {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn unauthorized() -> Self {
        Self::Auth("Unauthorized".to_string())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn upstream(context: &'static str, source: ProviderError) -> Self {
        Self::Upstream { context, source }
    }

    pub fn persistence(context: &'static str, source: StoreError) -> Self {
        Self::Persistence { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } | Self::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The JSON body sent to the caller.
    pub fn body(&self) -> Value {
        match self {
            Self::Validation {
                message,
                details: Some(details),
            } => json!({ "error": message, "details": details }),
            Self::Validation { message, .. } => json!({ "error": message }),
            Self::Auth(message) | Self::NotFound(message) => json!({ "error": message }),
            Self::Upstream { context, .. } | Self::Persistence { context, .. } => {
                json!({ "error": context })
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(source: StoreError) -> Self {
        Self::persistence("Internal storage error", source)
    }
}

impl From<ProviderError> for ApiError {
    fn from(source: ProviderError) -> Self {
        Self::upstream("Upstream provider request failed", source)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation_with_details("Invalid JSON body", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Upstream { context, source } => {
                error!(error = %source, "{context}");
            }
            Self::Persistence { context, source } => {
                error!(error = %source, "{context}");
            }
            Self::Auth(_) => warn!("rejected unauthenticated request"),
            _ => {}
        }
        (self.status(), Json(self.body())).into_response()
    }
}
