// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error classification for retry decisions.
//!
//! Every failure that crosses a retry boundary is mapped to an [`ErrorKind`].
//! Typed errors implement [`Classify`] directly; anything else can be
//! classified from its message with [`classify_message`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Failure categories understood by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionError,
    NetworkUnreachable,
    RateLimit,
    #[serde(rename = "server_error_5xx")]
    ServerError5xx,
    AuthenticationFailed,
    PermissionDenied,
    InvalidRequest,
    NotFound,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Timeout,
        ErrorKind::ConnectionError,
        ErrorKind::NetworkUnreachable,
        ErrorKind::RateLimit,
        ErrorKind::ServerError5xx,
        ErrorKind::AuthenticationFailed,
        ErrorKind::PermissionDenied,
        ErrorKind::InvalidRequest,
        ErrorKind::NotFound,
        ErrorKind::Unknown,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionError => "connection_error",
            Self::NetworkUnreachable => "network_unreachable",
            Self::RateLimit => "rate_limit",
            Self::ServerError5xx => "server_error_5xx",
            Self::AuthenticationFailed => "authentication_failed",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown error kind: {s}"))
    }
}

/// Implemented by errors that know which retry category they belong to.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for ErrorKind {
    fn kind(&self) -> ErrorKind {
        *self
    }
}

impl Classify for std::io::Error {
    fn kind(&self) -> ErrorKind {
        use std::io::ErrorKind as Io;
        match std::io::Error::kind(self) {
            Io::TimedOut | Io::WouldBlock => ErrorKind::Timeout,
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe => ErrorKind::ConnectionError,
            Io::AddrNotAvailable => ErrorKind::NetworkUnreachable,
            Io::PermissionDenied => ErrorKind::PermissionDenied,
            Io::NotFound => ErrorKind::NotFound,
            Io::InvalidInput | Io::InvalidData => ErrorKind::InvalidRequest,
            _ => classify_message(&self.to_string()),
        }
    }
}

/// Map an HTTP status code to a kind. 2xx/3xx map to `Unknown`.
#[must_use]
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::InvalidRequest,
        401 => ErrorKind::AuthenticationFailed,
        403 => ErrorKind::PermissionDenied,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimit,
        500..=599 => ErrorKind::ServerError5xx,
        _ => ErrorKind::Unknown,
    }
}

/// Classify free-form error text.
///
/// Checks run in a fixed order so that e.g. "connection timeout" is a
/// timeout, and "429 rate limit exceeded (not found in cache)" is a rate
/// limit rather than a not-found.
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let msg = message.to_ascii_lowercase();

    if msg.contains("timeout") || msg.contains("timed out") {
        return ErrorKind::Timeout;
    }
    if msg.contains("network is unreachable") || msg.contains("network unreachable") {
        return ErrorKind::NetworkUnreachable;
    }
    if msg.contains("connection") {
        return ErrorKind::ConnectionError;
    }
    if msg.contains("rate limit") || msg.contains("too many requests") || has_status(&msg, 429) {
        return ErrorKind::RateLimit;
    }
    if msg.contains("server error") || (500..600).any(|code| has_status(&msg, code)) {
        return ErrorKind::ServerError5xx;
    }
    if msg.contains("authentication") || msg.contains("unauthorized") || has_status(&msg, 401) {
        return ErrorKind::AuthenticationFailed;
    }
    if msg.contains("permission") || msg.contains("forbidden") || has_status(&msg, 403) {
        return ErrorKind::PermissionDenied;
    }
    if msg.contains("invalid") || msg.contains("bad request") || has_status(&msg, 400) {
        return ErrorKind::InvalidRequest;
    }
    if msg.contains("not found") || has_status(&msg, 404) {
        return ErrorKind::NotFound;
    }
    ErrorKind::Unknown
}

/// True when `code` appears in `msg` as a standalone three-digit number.
fn has_status(msg: &str, code: u16) -> bool {
    let needle = code.to_string();
    let bytes = msg.as_bytes();
    msg.match_indices(&needle).any(|(idx, _)| {
        let before = idx.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(idx + needle.len()).copied();
        !before.is_some_and(|b| b.is_ascii_digit()) && !after.is_some_and(|b| b.is_ascii_digit())
    })
}
