//! Tool definitions for tool-calling frontends.

use agent_bridge_core::BridgeError;
use agent_bridge_session::Command;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// A named, independently callable operation advertised to the frontend.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

fn tool(name: &'static str, description: &'static str, args: &[(&str, &str)]) -> ToolDefinition {
    let properties: Map<String, Value> = args
        .iter()
        .map(|(arg, desc)| ((*arg).to_string(), json!({"type": "string", "description": desc})))
        .collect();
    let required: Vec<&str> = args.iter().map(|(arg, _)| *arg).collect();
    ToolDefinition {
        name,
        description,
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// Every tool the bridge offers, one per command.
#[must_use]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "send_message",
            "Send a message to the conversation's agent and stream its reply",
            &[("message", "Message text")],
        ),
        tool("list_agents", "List agents on the server", &[]),
        tool(
            "switch_agent",
            "Bind this conversation to another agent",
            &[("agent", "Agent id or name")],
        ),
        tool(
            "read_memory",
            "Read one of the agent's memory blocks",
            &[("label", "Block label, e.g. persona or human")],
        ),
        tool(
            "write_memory",
            "Replace the value of one of the agent's memory blocks",
            &[("label", "Block label"), ("value", "New block value")],
        ),
        tool(
            "delete_agent",
            "Delete an agent and unbind every conversation using it",
            &[("agent_id", "Agent id")],
        ),
        tool(
            "create_agent",
            "Create a named agent and bind this conversation to it",
            &[("name", "Agent name")],
        ),
        tool("clear_history", "Clear the agent's message history", &[]),
        tool(
            "archive_memory",
            "Store text in the agent's archival memory",
            &[("text", "Text to store")],
        ),
        tool("help", "Show the command reference", &[]),
    ]
}

/// A tool invocation from the frontend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Create a tool call.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Build from a tool name and a raw arguments value. `null` means no
    /// arguments.
    ///
    /// # Errors
    /// Returns `InvalidCommand` if `arguments` is neither an object nor null.
    pub fn from_value(name: impl Into<String>, arguments: Value) -> Result<Self, BridgeError> {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(BridgeError::invalid("tool arguments must be a JSON object")),
        };
        Ok(Self::new(name, arguments))
    }

    fn string(&self, key: &str) -> Result<String, BridgeError> {
        match self.arguments.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(BridgeError::invalid(format!("argument `{key}` must be a string"))),
            None => Err(BridgeError::invalid(format!(
                "tool `{}` requires argument `{key}`",
                self.name
            ))),
        }
    }

    /// Convert to a validated command.
    ///
    /// # Errors
    /// Returns `InvalidCommand` for an unknown tool or a missing, non-string
    /// or empty argument.
    pub fn into_command(self) -> Result<Command, BridgeError> {
        let command = match self.name.as_str() {
            "send_message" => Command::SendMessage {
                text: self.string("message")?,
            },
            "list_agents" => Command::ListAgents,
            "switch_agent" => Command::SwitchAgent {
                agent: self.string("agent")?,
            },
            "read_memory" => Command::ReadMemory {
                label: self.string("label")?,
            },
            "write_memory" => Command::WriteMemory {
                label: self.string("label")?,
                value: self.string("value")?,
            },
            "delete_agent" => Command::DeleteAgent {
                agent_id: self.string("agent_id")?,
            },
            "create_agent" => Command::CreateAgent {
                name: self.string("name")?,
            },
            "clear_history" => Command::ClearHistory,
            "archive_memory" => Command::ArchiveMemory {
                text: self.string("text")?,
            },
            "help" => Command::Help,
            other => return Err(BridgeError::invalid(format!("unknown tool `{other}`"))),
        };
        command.validate()?;
        Ok(command)
    }
}
