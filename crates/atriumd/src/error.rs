//! Error taxonomy shared by the stores, the engine, and the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::json;

/// Failures surfaced by the coordinator.
///
/// Every variant maps to a single HTTP status so handlers can bubble
/// errors with `?` and let [`IntoResponse`] do the rest.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid signature, timestamp, or invite code.
    #[error("{0}")]
    Unauthenticated(String),

    /// Valid identity acting outside its home or role.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// Malformed request body or rule configuration.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    RateLimited(String),

    /// Deployment misconfiguration, e.g. no gateway shared secret.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Acknowledgment from a gateway that does not own the command.
    #[error("{0}")]
    Mismatch(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::Unauthorized(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Mismatch(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
