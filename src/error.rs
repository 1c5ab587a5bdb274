// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Crate-level error for callers that want a single type.
//!
//! Each concern keeps its own enum; [`Error`] only composes them.

use crate::adapter::AdapterError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::lock::LockError;
use crate::rate_limit::RateLimitError;
use crate::resilience::{Classify, ErrorKind, RetryError};
use crate::store::StoreError;

/// Failure of one attempt at a rate-limited adapter call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl Classify for CallError {
    fn kind(&self) -> ErrorKind {
        match self {
            // the bucket refills, so another attempt can get a token
            Self::RateLimited(_) => ErrorKind::RateLimit,
            Self::Adapter(e) => e.kind(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Retry(#[from] RetryError<AdapterError>),
    #[error(transparent)]
    Call(#[from] RetryError<CallError>),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::RateLimit(_) => ErrorKind::RateLimit,
            Self::Lock(e) => e.kind(),
            Self::Adapter(e) => e.kind(),
            Self::Cache(_) => ErrorKind::Unknown,
            Self::Config(_) => ErrorKind::InvalidRequest,
            Self::Retry(e) => e.kind(),
            Self::Call(e) => e.kind(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_limit_wait_is_retryable() {
        let err = CallError::from(RateLimitError::Timeout { platform: "wish".into(), waited: Duration::from_secs(1) });
        assert_eq!(err.kind(), ErrorKind::RateLimit);
    }

    #[test]
    fn test_kind_passes_through_composition() {
        let err: Error = AdapterError::Http { status: 401, body: String::new() }.into();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);

        let err: Error = RetryError::Exhausted {
            attempts: 4,
            kind: ErrorKind::Timeout,
            source: CallError::Adapter(AdapterError::Timeout("slow".into())),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("4 attempts"));
    }
}
