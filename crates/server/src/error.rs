use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use eclosion_broker::BrokerError;
use eclosion_state::StateError;

/// Errors surfaced to IFTTT in its `{errors:[{message}]}` shape.
#[derive(Debug, Error)]
pub enum ServerError {
    /// No bearer token on a request that needs one.
    #[error("invalid or expired access token")]
    AuthMissing,

    /// Bad signature, unknown issuer, or a disconnected tenant.
    #[error("invalid or expired access token")]
    AuthRejected,

    /// Wrong or missing `IFTTT-Service-Key` on a platform endpoint.
    #[error("invalid IFTTT service key")]
    ServiceKeyRejected,

    /// The tenant has no action secret.
    #[error("connection not properly configured")]
    NotConfigured,

    /// Missing or malformed request field.
    #[error("{0}")]
    Validation(String),

    /// Unknown slug or missing resource.
    #[error("{0}")]
    NotFound(String),

    /// The request conflicts with current state (e.g. already connected).
    #[error("{0}")]
    Conflict(String),

    /// The tenant's action budget for the current window is spent.
    #[error("Rate limit exceeded ({current}/{limit} actions per minute). Please wait {} seconds.", retry_after_secs(*retry_after_ms))]
    RateLimited {
        retry_after_ms: i64,
        current: usize,
        limit: usize,
    },

    /// The origin answered but reported failure.
    #[error("{0}")]
    OriginFailed(String),

    /// Anything unexpected. The detail is logged, never sent.
    #[error("internal error")]
    Internal(String),
}

/// Seconds IFTTT should wait before retrying, rounded up, at least 1.
fn retry_after_secs(retry_after_ms: i64) -> i64 {
    (retry_after_ms.max(1) + 999) / 1000
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::AuthMissing | Self::AuthRejected | Self::ServiceKeyRejected => {
                StatusCode::UNAUTHORIZED
            }
            Self::NotConfigured => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::OriginFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wrap an unexpected error, logging the detail.
    pub fn internal(error: impl std::fmt::Display) -> Self {
        let detail = error.to_string();
        tracing::error!(error = %detail, "internal server error");
        Self::Internal(detail)
    }
}

impl From<BrokerError> for ServerError {
    fn from(error: BrokerError) -> Self {
        Self::internal(error)
    }
}

impl From<StateError> for ServerError {
    fn from(error: StateError) -> Self {
        Self::internal(error)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "errors": [{"message": self.to_string()}]
        }));

        let mut response = (status, body).into_response();
        if let Self::RateLimited { retry_after_ms, .. } = self {
            let seconds = retry_after_secs(retry_after_ms);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
