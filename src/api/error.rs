//! API error type and its HTTP mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::ImportError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("upstream responded with {0}")]
    Upstream(StatusCode),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Import(e) => match e {
                ImportError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                ImportError::UpstreamFetch(_) | ImportError::UpstreamStatus(_) => {
                    StatusCode::BAD_GATEWAY
                }
                ImportError::NotAnImage(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ImportError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ImportError::Storage(_) | ImportError::Database(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %message, "Request rejected");
        }

        let body = match &self {
            ApiError::Upstream(upstream) => json!({
                "error": message,
                "upstreamStatus": upstream.as_u16(),
            }),
            _ => json!({ "error": message }),
        };

        (status, Json(body)).into_response()
    }
}
