//! Maps domain errors onto the HTTP status codes and JSON error body
//! shape the external interface specifies (§7): `{error, required?,
//! retry_after?}`, plus a stable `type` discriminant for client-side
//! handling.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use voiceslot_core::errors::{LedgerError, ObjectStoreError, QueueError, VoiceError};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("insufficient credits: need {needed}, have {available}")]
    InsufficientCredits { needed: i64, available: i64 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream or storage failure: {0}")]
    BadGateway(String),

    #[error("timed out waiting for a voice slot")]
    GatewayTimeout,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    error_type: Option<&'static str>,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message, required, retry_after, error_type) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None, None, None),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None, None, None),
            Self::InsufficientCredits { needed, .. } => (
                StatusCode::PAYMENT_REQUIRED,
                self.to_string(),
                Some(*needed),
                None,
                Some("insufficient_credits"),
            ),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None, None, None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None, None, None),
            Self::RateLimited { retry_after_secs } => (
                StatusCode::SERVICE_UNAVAILABLE,
                self.to_string(),
                None,
                Some(*retry_after_secs),
                Some("provider_rate_limited"),
            ),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg.clone(), None, None, None),
            Self::GatewayTimeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string(), None, None, None),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), None, None, None),
        };

        let body = ErrorBody {
            error: message,
            required,
            retry_after,
            error_type,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Per the error table in §7: `VoiceSlotManagerError`-shaped failures
/// (capacity accounting, lock contention, catch-all) surface as 500 —
/// the caller has already had any tentative debit refunded by the
/// orchestrator before this conversion runs.
impl From<VoiceError> for HttpError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::NotFound { id } => Self::NotFound(format!("voice {id} not found")),
            VoiceError::InsufficientCredits { needed, available } => {
                Self::InsufficientCredits { needed, available }
            }
            VoiceError::SampleMissing { id } => {
                Self::Conflict(format!("voice {id} has no usable recording sample"))
            }
            VoiceError::CapacityExhausted { .. } | VoiceError::LockContended { .. } => {
                Self::Internal(err.to_string())
            }
            VoiceError::ProviderRateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            VoiceError::ProviderCloneFailed { message } | VoiceError::ProviderDeleteFailed { message } => {
                Self::BadGateway(message)
            }
            VoiceError::ObjectStoreFailure { message } => Self::BadGateway(message),
            VoiceError::QueueTimeout => Self::GatewayTimeout,
            VoiceError::Other { message } => Self::Internal(message),
        }
    }
}

impl From<LedgerError> for HttpError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits { needed, available } => {
                Self::InsufficientCredits { needed, available }
            }
            LedgerError::UserNotFound { id } => Self::NotFound(format!("user {id} not found")),
            LedgerError::Other { message } => Self::Internal(message),
        }
    }
}

impl From<ObjectStoreError> for HttpError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound { key } => Self::NotFound(format!("object {key} not found")),
            ObjectStoreError::RequestFailed { message } => Self::BadGateway(message),
        }
    }
}

impl From<QueueError> for HttpError {
    fn from(err: QueueError) -> Self {
        Self::Internal(err.to_string())
    }
}
