//! Error taxonomy shared by the backend clients, the cache, and the resolver.
//!
//! `NotFound` is definitive and drives fallback; it is never a logged error.
//! `Transport` wraps anything the remote side or the network did wrong and
//! carries the logical operation name for diagnosis.

use std::time::SystemTime;

use thiserror::Error;

use crate::provider_id::ProviderIdError;

/// Errors produced by backend calls and node resolution.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials for this backend were never configured. Permanent until
    /// an operator mounts them; never equivalent to "not found".
    #[error("{backend} backend credentials are not configured")]
    NotConfigured { backend: &'static str },

    /// The entity definitively does not exist on the queried backend.
    #[error("server not found")]
    NotFound,

    /// The backend refused the call; no further calls are allowed before
    /// `retry_after`.
    #[error("rate limit exceeded, next call possible at {retry_after:?}")]
    RateLimited { retry_after: SystemTime },

    /// Bad identifier, bad node metadata, or bad backend data. A user or
    /// configuration error, not retryable.
    #[error("{op}: {message}")]
    Malformed { op: &'static str, message: String },

    /// Network or remote failure. Retryable by the caller with backoff.
    #[error("{op}: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ApiError {
    pub fn transport(
        op: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ApiError::Transport {
            op,
            source: source.into(),
        }
    }

    pub fn malformed(op: &'static str, message: impl Into<String>) -> Self {
        ApiError::Malformed {
            op,
            message: message.into(),
        }
    }

    /// Whether this error means "definitively absent" rather than "failed".
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }
}

impl From<ProviderIdError> for ApiError {
    fn from(err: ProviderIdError) -> Self {
        ApiError::malformed("provider-id/decode", err.to_string())
    }
}
