//! Core traits for the remote agent server and binding storage.

use async_trait::async_trait;

use crate::{Agent, ArchivalPassage, BridgeError, EventStream, MemoryBlock, Session};

/// Operations offered by the remote agent server.
///
/// Implementations hold no mutable state beyond connection pools. Every call
/// except `send_message` resolves to a single result; transient failures are
/// retried inside the implementation before they surface.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Create an agent with the given name and initial memory blocks.
    async fn create_agent(&self, name: &str, blocks: &[MemoryBlock]) -> Result<Agent, BridgeError>;

    /// List all agents visible to the configured credential.
    async fn list_agents(&self) -> Result<Vec<Agent>, BridgeError>;

    /// Delete an agent.
    async fn delete_agent(&self, agent_id: &str) -> Result<(), BridgeError>;

    /// Send a user message and open the response stream.
    ///
    /// The returned future resolves once the server accepted the request;
    /// the stream then yields events until a terminal one.
    async fn send_message(&self, agent_id: &str, text: &str) -> Result<EventStream, BridgeError>;

    /// Fetch a memory block.
    async fn get_memory_block(&self, agent_id: &str, label: &str) -> Result<MemoryBlock, BridgeError>;

    /// Replace a memory block's value.
    async fn update_memory_block(
        &self,
        agent_id: &str,
        label: &str,
        value: &str,
    ) -> Result<MemoryBlock, BridgeError>;

    /// Clear the agent's message history. Returns the number of messages left.
    async fn reset_messages(&self, agent_id: &str) -> Result<usize, BridgeError>;

    /// Insert a passage into archival memory.
    async fn insert_archival(&self, agent_id: &str, text: &str) -> Result<(), BridgeError>;

    /// List archival memory passages.
    async fn list_archival(&self, agent_id: &str) -> Result<Vec<ArchivalPassage>, BridgeError>;
}

/// Storage for session bindings.
///
/// The bridge only needs process-lifetime storage; a collaborator may plug
/// in a persistent backend.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Get the binding for a session key.
    async fn get(&self, session_key: &str) -> Result<Option<Session>, BridgeError>;

    /// Insert or replace a binding.
    async fn put(&self, session: Session) -> Result<(), BridgeError>;

    /// Update the last-active timestamp. Missing keys are ignored.
    async fn touch(&self, session_key: &str, now: i64) -> Result<(), BridgeError>;

    /// Remove a binding, returning it if present.
    async fn remove(&self, session_key: &str) -> Result<Option<Session>, BridgeError>;

    /// List all bindings.
    async fn list(&self) -> Result<Vec<Session>, BridgeError>;
}
