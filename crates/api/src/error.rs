//! API error types with HTTP response mapping.

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use channel_sync::{SyncError, WebhookError};
use inventory::ConflictError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Channel sync or management error.
    Sync(SyncError),
    /// Webhook rejected or failed.
    Webhook(WebhookError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Sync(err) => sync_error_to_response(err),
            ApiError::Webhook(err) => webhook_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, status = status.as_u16(), "request failed");
        }

        let body = serde_json::json!({ "error": message });
        let mut response = (status, axum::Json(body)).into_response();
        if let Some(retry_after) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, retry_after_header(retry_after));
        }
        response
    }
}

type ErrorParts = (StatusCode, String, Option<Duration>);

fn sync_error_to_response(err: SyncError) -> ErrorParts {
    let status = match &err {
        SyncError::ChannelNotFound(_) | SyncError::ReviewNotFound(_) => StatusCode::NOT_FOUND,
        SyncError::Conflict(ConflictError::EmptyReport(_)) => StatusCode::NOT_FOUND,
        SyncError::ChannelNotConnected { .. }
        | SyncError::ChannelAlreadyConnected(_)
        | SyncError::SyncInProgress(_)
        | SyncError::ConflictUnresolved { .. } => StatusCode::CONFLICT,
        SyncError::RateLimitExceeded { retry_after, .. } => {
            return (StatusCode::TOO_MANY_REQUESTS, err.to_string(), Some(*retry_after));
        }
        SyncError::InvalidRecord(_) | SyncError::InvalidSettings { .. } => StatusCode::BAD_REQUEST,
        SyncError::AdapterTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SyncError::Adapter { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string(), None)
}

fn webhook_error_to_response(err: WebhookError) -> ErrorParts {
    if let WebhookError::Sync(inner) = err {
        return sync_error_to_response(inner);
    }
    let status = match &err {
        WebhookError::ChannelNotFound(_) => StatusCode::NOT_FOUND,
        WebhookError::WebhooksDisabled(_) => StatusCode::FORBIDDEN,
        WebhookError::ChannelNotConnected { .. } => StatusCode::CONFLICT,
        WebhookError::RateLimited { retry_after, .. } => {
            return (StatusCode::TOO_MANY_REQUESTS, err.to_string(), Some(*retry_after));
        }
        WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        WebhookError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string(), None)
}

/// Whole seconds, rounded up, never below one.
fn retry_after_header(retry_after: Duration) -> HeaderValue {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    HeaderValue::from(secs.max(1))
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError::Sync(err)
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::Webhook(err)
    }
}
