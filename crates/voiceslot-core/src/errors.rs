//! Domain error types for each subsystem.
//!
//! Mirrors the shape of the download subsystem's error type this workspace
//! already used: serializable, independent of any infrastructure error
//! type, with constructor helpers and a `user_message` for surfacing to
//! callers outside this crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the voice entity / slot allocator subsystem.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum VoiceError {
    #[error("voice {id} not found")]
    NotFound { id: i64 },

    #[error("insufficient credits: need {needed}, have {available}")]
    InsufficientCredits { needed: i64, available: i64 },

    #[error("voice {id} has no usable recording sample")]
    SampleMissing { id: i64 },

    #[error("provider capacity exhausted for {provider}")]
    CapacityExhausted { provider: String },

    #[error("allocation lock for voice {id} is held by another worker")]
    LockContended { id: i64 },

    #[error("upstream provider rate limited, retry after {retry_after_secs}s")]
    ProviderRateLimited { retry_after_secs: u64 },

    #[error("upstream clone call failed: {message}")]
    ProviderCloneFailed { message: String },

    #[error("upstream delete call failed: {message}")]
    ProviderDeleteFailed { message: String },

    #[error("object storage failure: {message}")]
    ObjectStoreFailure { message: String },

    #[error("max re-schedule attempts exceeded waiting for a slot")]
    QueueTimeout,

    #[error("{message}")]
    Other { message: String },
}

impl VoiceError {
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether this error should translate into a refund of any tentative
    /// debit before surfacing to the caller.
    #[must_use]
    pub const fn warrants_refund(&self) -> bool {
        !matches!(
            self,
            Self::NotFound { .. } | Self::SampleMissing { .. } | Self::InsufficientCredits { .. }
        )
    }
}

/// Errors from the credit ledger.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient credits: need {needed}, have {available}")]
    InsufficientCredits { needed: i64, available: i64 },

    #[error("user {id} not found")]
    UserNotFound { id: i64 },

    #[error("{message}")]
    Other { message: String },
}

impl LedgerError {
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Errors from the KV queue / concurrency lock primitives.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueError {
    #[error("backing store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("payload corrupt for key {key}: {message}")]
    CorruptPayload { key: String, message: String },
}

/// Errors from `VoiceServiceProvider` adapters.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider request failed: {message}")]
    RequestFailed { message: String },
}

/// Errors from `ObjectStorePort` adapters.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("object store request failed: {message}")]
    RequestFailed { message: String },
}

pub type VoiceResult<T> = Result<T, VoiceError>;
pub type LedgerResult<T> = Result<T, LedgerError>;
pub type QueueResult<T> = Result<T, QueueError>;
pub type ProviderResult<T> = Result<T, ProviderError>;
pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

impl From<ProviderError> for VoiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited { retry_after_secs } => {
                Self::ProviderRateLimited { retry_after_secs }
            }
            ProviderError::RequestFailed { message } => Self::ProviderCloneFailed { message },
        }
    }
}

impl From<ObjectStoreError> for VoiceError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound { key } => Self::ObjectStoreFailure {
                message: format!("object not found: {key}"),
            },
            ObjectStoreError::RequestFailed { message } => Self::ObjectStoreFailure { message },
        }
    }
}

impl From<QueueError> for VoiceError {
    fn from(err: QueueError) -> Self {
        Self::other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_serde_round_trip() {
        let err = VoiceError::ProviderRateLimited {
            retry_after_secs: 30,
        };
        let json = serde_json::to_string(&err).unwrap();
        let parsed: VoiceError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn not_found_does_not_warrant_refund() {
        assert!(!VoiceError::NotFound { id: 1 }.warrants_refund());
        assert!(!VoiceError::SampleMissing { id: 1 }.warrants_refund());
        assert!(VoiceError::QueueTimeout.warrants_refund());
    }
}
