//! Incremental agent response events.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::ErrorKind;

/// Lazy, finite, non-resumable stream of response events.
///
/// Always ends with exactly one terminal event (`Completed` or `Failed`).
/// Dropping it stops consumption and releases the underlying connection.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// One unit of an incremental agent response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Assistant text fragment.
    TextDelta { text: String },
    /// The agent invoked a tool.
    ToolCall { name: String, arguments: String },
    /// The turn finished normally.
    Completed,
    /// The turn ended abnormally. Deltas delivered before this are kept.
    Failed { reason: FailureReason },
}

impl StreamEvent {
    /// Text delta shorthand.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Failure shorthand.
    #[must_use]
    pub const fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }

    /// Whether this event ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

/// Why a stream ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Disconnect, read error or idle timeout before a terminal event.
    ConnectionLost,
    /// The server reported an error inside the stream.
    Server { message: String },
    /// A complete frame could not be decoded.
    Protocol { message: String },
}

impl FailureReason {
    /// The error kind this failure maps to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionLost => ErrorKind::ConnectionLost,
            Self::Server { .. } => ErrorKind::Permanent,
            Self::Protocol { .. } => ErrorKind::Protocol,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::Server { message } => write!(f, "server error: {message}"),
            Self::Protocol { message } => write!(f, "malformed frame: {message}"),
        }
    }
}
