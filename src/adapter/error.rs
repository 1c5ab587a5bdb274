// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use super::types::Platform;
use crate::resilience::classify::{classify_message, classify_status, Classify, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The platform has no API for this operation
    #[error("{platform} does not support {operation}")]
    Unsupported { platform: Platform, operation: &'static str },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    /// Missing credential or malformed adapter configuration
    #[error("adapter misconfigured: {0}")]
    Config(String),

    /// A 2xx response whose body reports failure
    #[error("platform error {code}: {message}")]
    Api { code: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl AdapterError {
    pub(crate) fn unsupported(platform: Platform, operation: &'static str) -> Self {
        Self::Unsupported { platform, operation }
    }

    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

impl Classify for AdapterError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported { .. } | Self::Config(_) => ErrorKind::InvalidRequest,
            Self::Http { status, body } => match classify_status(*status) {
                ErrorKind::Unknown => classify_message(body),
                kind => kind,
            },
            Self::Transport(msg) => match classify_message(msg) {
                ErrorKind::Timeout => ErrorKind::Timeout,
                ErrorKind::NetworkUnreachable => ErrorKind::NetworkUnreachable,
                _ => ErrorKind::ConnectionError,
            },
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Auth(_) => ErrorKind::AuthenticationFailed,
            Self::Decode(_) => ErrorKind::Unknown,
            Self::Api { message, .. } => classify_message(message),
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http { status: status.as_u16(), body: err.to_string() }
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
