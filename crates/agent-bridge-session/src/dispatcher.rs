//! Command dispatcher: the single entry point for the frontend.
//!
//! Commands for the same session run one at a time; different sessions run
//! fully in parallel. A `SendMessage` keeps its session's slot until the
//! returned stream ends or is dropped, so a caller must finish or drop a
//! stream before dispatching the next command for that session.

use std::{fmt, sync::Arc};

use agent_bridge_core::{Agent, AgentApi, BridgeError, EventStream, MemoryBlock};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    memory_sync::MemorySynchronizer,
    registry::{SessionRegistry, SessionSlot},
};

/// Characters of an archived text that must be found in storage to count
/// the insert as verified.
const ARCHIVE_VERIFY_PREFIX: usize = 50;

/// Command reference returned by `Help`.
pub const HELP_TEXT: &str = "\
Agent commands:
  agent send MESSAGE             Send a message to the current agent
  agent list                     List available agents
  agent switch AGENT             Switch to another agent (id or name)
  agent create NAME              Create a new agent and switch to it
  agent delete AGENT_ID          Delete an agent
  agent memory read LABEL        Show a memory block
  agent memory write LABEL VALUE Replace a memory block's value
  agent archivemem TEXT          Store text in archival memory
  agent clearhistory             Clear the agent's message history
  agent help                     Show this help";

/// A frontend command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendMessage { text: String },
    ListAgents,
    SwitchAgent { agent: String },
    ReadMemory { label: String },
    WriteMemory { label: String, value: String },
    DeleteAgent { agent_id: String },
    CreateAgent { name: String },
    ClearHistory,
    ArchiveMemory { text: String },
    Help,
}

fn require(field: &str, value: &str) -> Result<(), BridgeError> {
    if value.trim().is_empty() {
        Err(BridgeError::invalid(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

impl Command {
    /// Stable snake_case name, used for logging and tool names.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::ListAgents => "list_agents",
            Self::SwitchAgent { .. } => "switch_agent",
            Self::ReadMemory { .. } => "read_memory",
            Self::WriteMemory { .. } => "write_memory",
            Self::DeleteAgent { .. } => "delete_agent",
            Self::CreateAgent { .. } => "create_agent",
            Self::ClearHistory => "clear_history",
            Self::ArchiveMemory { .. } => "archive_memory",
            Self::Help => "help",
        }
    }

    /// Check the command's shape.
    ///
    /// # Errors
    /// Returns `InvalidCommand` for empty text, labels or identifiers.
    /// Memory values may be empty.
    pub fn validate(&self) -> Result<(), BridgeError> {
        match self {
            Self::SendMessage { text } => require("message", text),
            Self::SwitchAgent { agent } => require("agent", agent),
            Self::ReadMemory { label } | Self::WriteMemory { label, .. } => {
                require("label", label)?;
                if label.chars().any(char::is_whitespace) {
                    return Err(BridgeError::invalid("label must not contain whitespace"));
                }
                Ok(())
            }
            Self::DeleteAgent { agent_id } => require("agent_id", agent_id),
            Self::CreateAgent { name } => require("name", name),
            Self::ArchiveMemory { text } => require("text", text),
            Self::ListAgents | Self::ClearHistory | Self::Help => Ok(()),
        }
    }
}

/// Result of a dispatched command.
pub enum DispatchOutput {
    /// Incremental response of a `SendMessage`.
    Stream(EventStream),
    Agents(Vec<Agent>),
    Switched(Agent),
    Created(Agent),
    Block(MemoryBlock),
    Deleted {
        agent_id: String,
        evicted_sessions: Vec<String>,
    },
    HistoryCleared {
        remaining: usize,
    },
    Archived,
    Help(&'static str),
}

impl fmt::Debug for DispatchOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Agents(agents) => f.debug_tuple("Agents").field(agents).finish(),
            Self::Switched(agent) => f.debug_tuple("Switched").field(agent).finish(),
            Self::Created(agent) => f.debug_tuple("Created").field(agent).finish(),
            Self::Block(block) => f.debug_tuple("Block").field(block).finish(),
            Self::Deleted {
                agent_id,
                evicted_sessions,
            } => f
                .debug_struct("Deleted")
                .field("agent_id", agent_id)
                .field("evicted_sessions", evicted_sessions)
                .finish(),
            Self::HistoryCleared { remaining } => f
                .debug_struct("HistoryCleared")
                .field("remaining", remaining)
                .finish(),
            Self::Archived => f.write_str("Archived"),
            Self::Help(_) => f.write_str("Help"),
        }
    }
}

impl DispatchOutput {
    /// Human-readable rendering for text surfaces. `None` for streams.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        let text = match self {
            Self::Stream(_) => return None,
            Self::Agents(agents) if agents.is_empty() => "No agents found.".to_string(),
            Self::Agents(agents) => agents
                .iter()
                .map(|a| format!("{}: {}", a.name, a.id))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Switched(agent) => format!("Switched to agent {} ({})", agent.name, agent.id),
            Self::Created(agent) => format!("Created agent {} ({})", agent.name, agent.id),
            Self::Block(block) => format!("{}: {}", block.label, block.value),
            Self::Deleted { agent_id, .. } => format!("Deleted agent {agent_id}"),
            Self::HistoryCleared { remaining } => {
                format!("Message history cleared ({remaining} messages remaining)")
            }
            Self::Archived => "Stored in archival memory.".to_string(),
            Self::Help(text) => (*text).to_string(),
        };
        Some(text)
    }
}

/// Routes commands to the registry, the synchronizer and the remote API.
pub struct CommandDispatcher {
    api: Arc<dyn AgentApi>,
    registry: Arc<SessionRegistry>,
    memory: Arc<MemorySynchronizer>,
}

impl CommandDispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new(
        api: Arc<dyn AgentApi>,
        registry: Arc<SessionRegistry>,
        memory: Arc<MemorySynchronizer>,
    ) -> Self {
        Self {
            api,
            registry,
            memory,
        }
    }

    /// Get the session registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Validate and run a command for a session.
    ///
    /// # Errors
    /// Returns `InvalidCommand` without contacting the server if the command
    /// or session key is malformed; otherwise the first error raised while
    /// running it, kind preserved.
    pub async fn dispatch(
        &self,
        session_key: &str,
        command: Command,
    ) -> Result<DispatchOutput, BridgeError> {
        require("session key", session_key)?;
        command.validate()?;

        if matches!(command, Command::Help) {
            return Ok(DispatchOutput::Help(HELP_TEXT));
        }

        let span = tracing::info_span!(
            "dispatch",
            session_key,
            command = command.name(),
            request_id = %Uuid::new_v4()
        );

        async move {
            let slot = self.registry.acquire(session_key).await;
            let result = self.run(session_key, command, slot).await;
            if let Err(e) = &result {
                tracing::warn!(kind = %e.kind(), "Command failed: {e}");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        session_key: &str,
        command: Command,
        slot: SessionSlot,
    ) -> Result<DispatchOutput, BridgeError> {
        match command {
            Command::SendMessage { text } => {
                let agent_id = self.registry.resolve(session_key).await?;
                let stream = self.api.send_message(&agent_id, &text).await?;
                tracing::debug!(%agent_id, "Streaming response");
                Ok(DispatchOutput::Stream(hold_until_end(stream, slot)))
            }
            Command::ListAgents => Ok(DispatchOutput::Agents(self.api.list_agents().await?)),
            Command::SwitchAgent { agent } => {
                Ok(DispatchOutput::Switched(self.registry.rebind(session_key, &agent).await?))
            }
            Command::CreateAgent { name } => Ok(DispatchOutput::Created(
                self.registry.create_and_bind(session_key, &name).await?,
            )),
            Command::ReadMemory { label } => {
                let agent_id = self.registry.resolve(session_key).await?;
                Ok(DispatchOutput::Block(self.memory.read_block(&agent_id, &label).await?))
            }
            Command::WriteMemory { label, value } => {
                let agent_id = self.registry.resolve(session_key).await?;
                Ok(DispatchOutput::Block(
                    self.memory.write_block(&agent_id, &label, &value).await?,
                ))
            }
            Command::DeleteAgent { agent_id } => {
                self.api.delete_agent(&agent_id).await?;
                self.memory.invalidate_agent(&agent_id);
                let evicted_sessions = self.registry.unbind_agent(&agent_id).await?;
                tracing::info!(%agent_id, "Deleted agent");
                Ok(DispatchOutput::Deleted {
                    agent_id,
                    evicted_sessions,
                })
            }
            Command::ClearHistory => {
                let agent_id = self.registry.resolve(session_key).await?;
                let remaining = self.api.reset_messages(&agent_id).await?;
                Ok(DispatchOutput::HistoryCleared { remaining })
            }
            Command::ArchiveMemory { text } => {
                let agent_id = self.registry.resolve(session_key).await?;
                self.archive(&agent_id, &text).await?;
                Ok(DispatchOutput::Archived)
            }
            Command::Help => Ok(DispatchOutput::Help(HELP_TEXT)),
        }
    }

    async fn archive(&self, agent_id: &str, text: &str) -> Result<(), BridgeError> {
        self.api.insert_archival(agent_id, text).await?;

        let prefix: String = text.chars().take(ARCHIVE_VERIFY_PREFIX).collect();
        let stored = self
            .api
            .list_archival(agent_id)
            .await?
            .iter()
            .any(|p| p.text.contains(&prefix));
        if !stored {
            return Err(BridgeError::Protocol(
                "archival insert was accepted but the passage is not listed".to_string(),
            ));
        }
        Ok(())
    }
}

/// Keep the session slot until the stream finishes or is dropped.
fn hold_until_end(stream: EventStream, slot: SessionSlot) -> EventStream {
    Box::pin(async_stream::stream! {
        let _slot = slot;
        for await event in stream {
            yield event;
        }
    })
}
