//! Error types for the pan_share crate.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while driving the cloud storage backend.
#[derive(Error, Debug)]
pub enum PanError {
    #[error("Could not parse share link: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Share requires a valid extraction code: {0}")]
    ShareAuth(String),

    #[error("Share link is invalid or expired: {0}")]
    ShareExpired(String),

    #[error("No files matched the filter: {0}")]
    NoMatch(String),

    #[error("Transfer task polling failed: {0}")]
    Poll(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({code}): {message}")]
    Remote { code: i64, message: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Timed out after {0:?} waiting for QR login")]
    AcquireTimeout(Duration),

    #[error("Login abandoned: {0}")]
    AcquireAbandoned(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for PanError {
    fn from(err: reqwest::Error) -> Self {
        PanError::Network(err.to_string())
    }
}

impl From<figment::Error> for PanError {
    fn from(err: figment::Error) -> Self {
        PanError::Config(err.to_string())
    }
}

impl PanError {
    /// The taxonomy tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PanError::Parse(_) => ErrorKind::Parse,
            PanError::Auth(_) => ErrorKind::Auth,
            PanError::ShareAuth(_) => ErrorKind::ShareAuth,
            PanError::ShareExpired(_) => ErrorKind::ShareExpired,
            PanError::NoMatch(_) => ErrorKind::NoMatch,
            PanError::Poll(_) => ErrorKind::Poll,
            PanError::Network(_) => ErrorKind::Network,
            PanError::Remote { .. } | PanError::UnexpectedResponse(_) | PanError::Json(_) => {
                ErrorKind::Remote
            }
            PanError::AcquireTimeout(_) => ErrorKind::AcquireTimeout,
            PanError::AcquireAbandoned(_) => ErrorKind::AcquireAbandoned,
            PanError::Cancelled(_) => ErrorKind::Cancelled,
            PanError::Config(_) => ErrorKind::Config,
            PanError::Io(_) => ErrorKind::Io,
        }
    }

    /// Transport failures are the only errors worth retrying blindly.
    pub fn is_transient(&self) -> bool {
        matches!(self, PanError::Network(_))
    }
}

/// Copyable error tag carried inside per-reference outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    Auth,
    ShareAuth,
    ShareExpired,
    NoMatch,
    Poll,
    Network,
    Remote,
    AcquireTimeout,
    AcquireAbandoned,
    Cancelled,
    Config,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "ParseError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::ShareAuth => "ShareAuthError",
            ErrorKind::ShareExpired => "ShareExpiredError",
            ErrorKind::NoMatch => "NoMatchError",
            ErrorKind::Poll => "PollError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Remote => "RemoteError",
            ErrorKind::AcquireTimeout => "AcquireTimeout",
            ErrorKind::AcquireAbandoned => "AcquireAbandoned",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Io => "IoError",
        };
        f.write_str(name)
    }
}

/// Result type alias for PanError.
pub type Result<T> = std::result::Result<T, PanError>;
