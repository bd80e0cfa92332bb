//! Frontend surface for the agent bridge.
//!
//! Provides:
//! - Tool definitions and argument validation for tool-calling frontends
//! - `agent <verb>` text command grammar
//! - Wire protocol (`ClientMessage` / `ServerMessage`)
//! - HTTP + SSE and WebSocket router (feature: http)

pub mod command_line;
pub mod protocol;
pub mod tool;

#[cfg(feature = "http")]
pub mod http;

pub use command_line::parse_command_line;
pub use protocol::{ClientMessage, ServerMessage};
pub use tool::{ToolCall, ToolDefinition, tool_definitions};
