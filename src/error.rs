use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

/// Unified error type for the xero-kpi service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ── Client Errors ───────────────────────────────────────────────────
    #[error("Not connected to Xero")]
    NotConnected,

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid state parameter: {0}")]
    InvalidState(String),

    // ── Upstream Errors ─────────────────────────────────────────────────
    /// The API still answered 401 after the single refresh attempt
    /// (or no refresh was possible).
    #[error("Xero rejected the access token")]
    UpstreamAuth { body: Option<Value> },

    /// Any other non-success response from the API, relayed as-is.
    #[error("Xero API error (HTTP {status})")]
    Upstream { status: u16, body: Option<Value> },

    #[error("Token refresh failed: {message}")]
    RefreshFailed {
        message: String,
        status: Option<u16>,
        body: Option<Value>,
    },

    #[error("OAuth flow error: {0}")]
    FlowError(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Upstream status code when this error came back from an HTTP response.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            AppError::UpstreamAuth { .. } => Some(401),
            AppError::Upstream { status, .. } => Some(*status),
            AppError::RefreshFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Response payload carried by an upstream error, if any.
    pub fn upstream_body(&self) -> Option<&Value> {
        match self {
            AppError::UpstreamAuth { body }
            | AppError::Upstream { body, .. }
            | AppError::RefreshFailed { body, .. } => body.as_ref(),
            _ => None,
        }
    }
}

/// Read a failed response's body: JSON when it parses, raw text otherwise,
/// `None` when empty.
pub(crate) async fn error_body(response: reqwest::Response) -> Option<Value> {
    let text = response.text().await.unwrap_or_default();
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Http(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotConnected => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidState(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamAuth { .. } => StatusCode::BAD_GATEWAY,
            AppError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::RefreshFailed { .. } => StatusCode::BAD_GATEWAY,
            AppError::FlowError(_) => StatusCode::BAD_GATEWAY,
            AppError::Http(_) => StatusCode::BAD_GATEWAY,
            AppError::CryptoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "API error: {self}");
        }

        // Upstream payloads are forwarded untouched so callers see Xero's
        // validation messages.
        let error = match self.upstream_body() {
            Some(body) => body.clone(),
            None => Value::String(self.to_string()),
        };

        (status, axum::Json(json!({ "ok": false, "error": error }))).into_response()
    }
}
