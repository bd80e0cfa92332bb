//! Error taxonomy shared by every bridge layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-distinguishable error kind surfaced to the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout, 5xx, connection reset. Retried before surfacing.
    Transient,
    /// Validation or auth failure reported by the server. Never retried.
    Permanent,
    /// Unparseable server response.
    Protocol,
    /// Malformed caller input, rejected before any remote call.
    InvalidCommand,
    /// Memory block value exceeds its declared limit.
    ValueTooLong,
    /// Stream terminated before a terminal event.
    ConnectionLost,
    /// Referenced agent or session is absent.
    NotFound,
}

impl ErrorKind {
    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Protocol => "protocol",
            Self::InvalidCommand => "invalid_command",
            Self::ValueTooLong => "value_too_long",
            Self::ConnectionLost => "connection_lost",
            Self::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bridge error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Transient failure after {attempts} attempt(s): {message}")]
    Transient { message: String, attempts: u32 },
    #[error("Request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("Request rejected{}: {message}", status_suffix(.status))]
    Permanent { status: Option<u16>, message: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Value for block '{label}' is {len} characters, limit is {limit}")]
    ValueTooLong {
        label: String,
        len: usize,
        limit: usize,
    },
    #[error("Connection lost before the response completed")]
    ConnectionLost,
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
}

impl BridgeError {
    /// Transient failure observed on a single attempt.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            attempts: 1,
        }
    }

    /// Shorthand for an invalid command.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidCommand(message.into())
    }

    /// Shorthand for a missing agent.
    #[must_use]
    pub fn agent_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "Agent",
            id: id.into(),
        }
    }

    /// The machine-distinguishable kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } | Self::Timeout { .. } => ErrorKind::Transient,
            Self::Permanent { .. } => ErrorKind::Permanent,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::InvalidCommand(_) => ErrorKind::InvalidCommand,
            Self::ValueTooLong { .. } => ErrorKind::ValueTooLong,
            Self::ConnectionLost => ErrorKind::ConnectionLost,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Whether an automatic retry may help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Record the number of attempts made before surfacing.
    #[must_use]
    pub fn after_attempts(self, n: u32) -> Self {
        match self {
            Self::Transient { message, .. } => Self::Transient {
                message,
                attempts: n,
            },
            Self::Timeout { .. } => Self::Timeout { attempts: n },
            other => other,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}
