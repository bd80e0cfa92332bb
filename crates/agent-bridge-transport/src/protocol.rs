//! Wire protocol for frontend connections.

use agent_bridge_core::{BridgeError, ErrorKind, StreamEvent};
use agent_bridge_session::DispatchOutput;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{command_line::parse_command_line, tool::ToolCall};

/// Message from frontend to bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Invoke a tool by name.
    Invoke {
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    /// Run an `agent ...` text command.
    Command { line: String },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Convert to a dispatchable command. `None` for `Ping`.
    ///
    /// # Errors
    /// Returns `InvalidCommand` if the tool call or command line is malformed.
    pub fn into_command(self) -> Option<Result<agent_bridge_session::Command, BridgeError>> {
        match self {
            Self::Invoke { tool, arguments } => {
                Some(ToolCall::from_value(tool, arguments).and_then(ToolCall::into_command))
            }
            Self::Command { line } => Some(parse_command_line(&line)),
            Self::Ping => None,
        }
    }
}

/// Message from bridge to frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Result of a non-streaming command.
    Result {
        command: String,
        text: String,
        #[serde(default)]
        data: Value,
    },
    /// One event of a streamed response.
    Event { event: StreamEvent },
    /// Structured failure.
    Error { kind: ErrorKind, message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Create an error message from a bridge error.
    #[must_use]
    pub fn error(err: &BridgeError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Create a result message from a dispatch output. `None` for streams.
    #[must_use]
    pub fn result(command: &str, output: &DispatchOutput) -> Option<Self> {
        let text = output.render()?;
        Some(Self::Result {
            command: command.to_string(),
            text,
            data: output_data(output),
        })
    }
}

/// Structured payload of a non-streaming output.
fn output_data(output: &DispatchOutput) -> Value {
    match output {
        DispatchOutput::Stream(_) | DispatchOutput::Archived | DispatchOutput::Help(_) => Value::Null,
        DispatchOutput::Agents(agents) => json!({ "agents": agents }),
        DispatchOutput::Switched(agent) | DispatchOutput::Created(agent) => json!({ "agent": agent }),
        DispatchOutput::Block(block) => json!({ "block": block }),
        DispatchOutput::Deleted {
            agent_id,
            evicted_sessions,
        } => json!({ "agent_id": agent_id, "evicted_sessions": evicted_sessions }),
        DispatchOutput::HistoryCleared { remaining } => json!({ "remaining": remaining }),
    }
}

#[cfg(test)]
mod tests {
    use agent_bridge_core::{Agent, FailureReason, MemoryBlock};
    use agent_bridge_session::Command;

    use super::*;

    #[test]
    fn test_client_message_shapes() {
        let invoke: ClientMessage = serde_json::from_str(
            r#"{"type": "invoke", "tool": "read_memory", "arguments": {"label": "human"}}"#,
        )
        .unwrap();
        assert_eq!(
            invoke.into_command().unwrap().unwrap(),
            Command::ReadMemory {
                label: "human".into()
            }
        );

        let line: ClientMessage =
            serde_json::from_str(r#"{"type": "command", "line": "agent list"}"#).unwrap();
        assert_eq!(line.into_command().unwrap().unwrap(), Command::ListAgents);

        let bare: ClientMessage = serde_json::from_str(r#"{"type": "invoke", "tool": "help"}"#).unwrap();
        assert_eq!(bare.into_command().unwrap().unwrap(), Command::Help);

        let ping: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(ping.into_command().is_none());
    }

    #[test]
    fn test_error_carries_kind() {
        let json = serde_json::to_value(ServerMessage::error(&BridgeError::ValueTooLong {
            label: "human".into(),
            len: 110,
            limit: 100,
        }))
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "value_too_long");
        assert!(json["message"].as_str().unwrap().contains("limit is 100"));
    }

    #[test]
    fn test_event_nests_stream_event() {
        let json = serde_json::to_value(ServerMessage::Event {
            event: StreamEvent::failed(FailureReason::ConnectionLost),
        })
        .unwrap();
        assert_eq!(
            json,
            json!({"type": "event", "event": {"type": "failed", "reason": {"kind": "connection_lost"}}})
        );
    }

    #[test]
    fn test_result_from_output() {
        let output = DispatchOutput::Agents(vec![Agent {
            id: "agent-1".into(),
            name: "research".into(),
            blocks: vec![MemoryBlock::new("persona", "calm")],
        }]);
        let Some(ServerMessage::Result { command, text, data }) =
            ServerMessage::result("list_agents", &output)
        else {
            panic!("expected result");
        };
        assert_eq!(command, "list_agents");
        assert_eq!(text, "research: agent-1");
        assert_eq!(data["agents"][0]["id"], "agent-1");
    }

    #[test]
    fn test_stream_has_no_result() {
        let output = DispatchOutput::Stream(Box::pin(futures::stream::empty()));
        assert!(ServerMessage::result("send_message", &output).is_none());
    }
}
