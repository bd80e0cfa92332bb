//! Domain model shared by the bridge layers.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A remote agent as projected by the bridge.
///
/// The remote server owns the agent; this is a cached view and is never
/// assumed fresh across a process restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Server-assigned identifier, immutable once created.
    pub id: String,
    /// Human-readable agent name.
    pub name: String,
    /// Memory blocks in server order.
    #[serde(default)]
    pub blocks: Vec<MemoryBlock>,
}

impl Agent {
    /// Find a block by label.
    #[must_use]
    pub fn block(&self, label: &str) -> Option<&MemoryBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }
}

/// A named, size-bounded text field attached to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBlock {
    /// Label, unique within an agent (e.g. `persona`, `human`).
    pub label: String,
    /// Block contents. Opaque text.
    pub value: String,
    /// Server-declared character limit, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl MemoryBlock {
    /// Create a block with no declared limit.
    #[must_use]
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            limit: None,
        }
    }

    /// Set the declared character limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Length of the value in characters, the unit limits are expressed in.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.value.chars().count()
    }
}

/// One entry of an agent's archival memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivalPassage {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
}

/// Binding between a frontend conversation and a remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Key derived from the conversation identity.
    pub session_key: String,
    /// Bound agent.
    pub agent_id: String,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
    /// Last command timestamp (Unix epoch milliseconds).
    pub last_active_at: i64,
}

impl Session {
    /// Create a binding stamped with the current time.
    #[must_use]
    pub fn new(session_key: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            session_key: session_key.into(),
            agent_id: agent_id.into(),
            created_at: now,
            last_active_at: now,
        }
    }

    /// Milliseconds since the last command, saturating at zero.
    #[must_use]
    pub fn idle_millis(&self, now: i64) -> u64 {
        u64::try_from(now.saturating_sub(self.last_active_at)).unwrap_or(0)
    }
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A conversational message. Transient; history lives on the remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl Message {
    /// Create a user message stamped now.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// Current time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
