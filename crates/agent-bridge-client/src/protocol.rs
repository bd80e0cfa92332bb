//! Wire types for the remote agent server's REST API.

use agent_bridge_core::{Agent, ArchivalPassage, MemoryBlock, Message};
use serde::{Deserialize, Serialize};

/// Body of `POST /v1/agents/`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateAgentRequest<'a> {
    pub name: &'a str,
    pub memory_blocks: Vec<BlockWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<&'a str>,
}

/// Agent state as returned by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentState {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub memory: Option<MemoryState>,
    /// Some server versions inline blocks at the top level.
    #[serde(default)]
    pub blocks: Option<Vec<BlockWire>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryState {
    #[serde(default)]
    pub blocks: Vec<BlockWire>,
}

impl From<AgentState> for Agent {
    fn from(state: AgentState) -> Self {
        let blocks = state
            .memory
            .map(|m| m.blocks)
            .or(state.blocks)
            .unwrap_or_default();
        Self {
            id: state.id,
            name: state.name,
            blocks: blocks.into_iter().map(MemoryBlock::from).collect(),
        }
    }
}

/// A memory block on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockWire {
    pub label: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl From<BlockWire> for MemoryBlock {
    fn from(wire: BlockWire) -> Self {
        Self {
            label: wire.label,
            value: wire.value,
            limit: wire.limit,
        }
    }
}

impl From<&MemoryBlock> for BlockWire {
    fn from(block: &MemoryBlock) -> Self {
        Self {
            label: block.label.clone(),
            value: block.value.clone(),
            limit: block.limit,
        }
    }
}

/// Body of `PATCH /v1/agents/{id}/core-memory/blocks/{label}`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateBlockRequest<'a> {
    pub value: &'a str,
}

/// Body of `POST /v1/agents/{id}/messages/stream`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub messages: Vec<MessageWire>,
    pub stream_tokens: bool,
}

impl SendMessageRequest {
    /// A single user message, token-streamed.
    #[must_use]
    pub fn user(text: &str) -> Self {
        Self {
            messages: vec![MessageWire::from(&Message::user(text))],
            stream_tokens: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageWire {
    pub role: agent_bridge_core::Role,
    pub content: String,
}

impl From<&Message> for MessageWire {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Body of `POST /v1/agents/{id}/archival-memory`.
#[derive(Debug, Clone, Serialize)]
pub struct ArchivalInsertRequest<'a> {
    pub text: &'a str,
}

/// Response of `GET /v1/agents/{id}/archival-memory`.
///
/// Older servers return a bare array, newer ones wrap it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArchivalListing {
    Bare(Vec<ArchivalPassage>),
    Wrapped { passages: Vec<ArchivalPassage> },
}

impl ArchivalListing {
    #[must_use]
    pub fn into_passages(self) -> Vec<ArchivalPassage> {
        match self {
            Self::Bare(p) | Self::Wrapped { passages: p } => p,
        }
    }
}

/// Response of `GET /v1/agents/{id}/messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageListing {
    Bare(Vec<serde_json::Value>),
    Wrapped { messages: Vec<serde_json::Value> },
}

impl MessageListing {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bare(m) | Self::Wrapped { messages: m } => m.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Error body returned by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default, alias = "message")]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Best human-readable message from a raw body.
    #[must_use]
    pub fn message_from(raw: &str) -> String {
        let detail = serde_json::from_str::<Self>(raw).ok().and_then(|b| b.detail);
        match detail {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None if raw.trim().is_empty() => "no response body".to_string(),
            None => raw.chars().take(500).collect(),
        }
    }
}
