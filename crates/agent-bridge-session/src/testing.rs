//! In-process stand-in for the remote agent server.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use agent_bridge_core::{
    Agent, AgentApi, ArchivalPassage, BridgeError, EventStream, MemoryBlock, StreamEvent,
};
use async_trait::async_trait;
use futures::StreamExt;

/// Fake `AgentApi` with a call log, injectable latency and scripted replies.
#[derive(Default)]
pub struct FakeAgentApi {
    next_id: AtomicU64,
    agents: Mutex<Vec<Agent>>,
    blocks: Mutex<HashMap<(String, String), MemoryBlock>>,
    archival: Mutex<HashMap<String, Vec<ArchivalPassage>>>,
    calls: Mutex<Vec<String>>,
    latency: Mutex<Duration>,
    reply: Mutex<Vec<StreamEvent>>,
    drop_archival: Mutex<bool>,
    read_delay: Mutex<Option<Duration>>,
}

impl FakeAgentApi {
    pub fn new() -> Self {
        Self {
            reply: Mutex::new(vec![StreamEvent::text("ok"), StreamEvent::Completed]),
            ..Self::default()
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = latency;
        self
    }

    pub fn set_reply(&self, events: Vec<StreamEvent>) {
        *self.reply.lock().unwrap() = events;
    }

    /// Accept archival inserts without storing them.
    pub fn drop_archival_inserts(&self) {
        *self.drop_archival.lock().unwrap() = true;
    }

    /// Make the next block read return its snapshot only after `delay`.
    pub fn delay_next_read(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    /// Seed an existing agent, bypassing the call log.
    pub fn seed_agent(&self, id: &str, name: &str) {
        self.agents.lock().unwrap().push(Agent {
            id: id.to_string(),
            name: name.to_string(),
            blocks: Vec::new(),
        });
    }

    /// Seed a block, bypassing the call log.
    pub fn seed_block(&self, agent_id: &str, block: MemoryBlock) {
        self.blocks
            .lock()
            .unwrap()
            .insert((agent_id.to_string(), block.label.clone()), block);
    }

    /// Change a block behind the bridge's back.
    pub fn external_write(&self, agent_id: &str, label: &str, value: &str) {
        if let Some(block) = self
            .blocks
            .lock()
            .unwrap()
            .get_mut(&(agent_id.to_string(), label.to_string()))
        {
            block.value = value.to_string();
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.lock().unwrap().iter().map(|a| a.id.clone()).collect()
    }

    async fn record(&self, operation: &str) {
        self.calls.lock().unwrap().push(operation.to_string());
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn require_agent(&self, agent_id: &str) -> Result<(), BridgeError> {
        if self.agents.lock().unwrap().iter().any(|a| a.id == agent_id) {
            Ok(())
        } else {
            Err(BridgeError::agent_not_found(agent_id))
        }
    }
}

#[async_trait]
impl AgentApi for FakeAgentApi {
    async fn create_agent(&self, name: &str, blocks: &[MemoryBlock]) -> Result<Agent, BridgeError> {
        self.record("create_agent").await;
        let id = format!("agent-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let agent = Agent {
            id: id.clone(),
            name: name.to_string(),
            blocks: blocks.to_vec(),
        };
        self.agents.lock().unwrap().push(agent.clone());
        for block in blocks {
            self.seed_block(&id, block.clone());
        }
        Ok(agent)
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, BridgeError> {
        self.record("list_agents").await;
        Ok(self.agents.lock().unwrap().clone())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<(), BridgeError> {
        self.record("delete_agent").await;
        self.require_agent(agent_id)?;
        self.agents.lock().unwrap().retain(|a| a.id != agent_id);
        Ok(())
    }

    async fn send_message(&self, agent_id: &str, _text: &str) -> Result<EventStream, BridgeError> {
        self.record("send_message").await;
        self.require_agent(agent_id)?;
        let events = self.reply.lock().unwrap().clone();
        Ok(futures::stream::iter(events).boxed())
    }

    async fn get_memory_block(&self, agent_id: &str, label: &str) -> Result<MemoryBlock, BridgeError> {
        self.record("get_memory_block").await;
        let snapshot = self
            .blocks
            .lock()
            .unwrap()
            .get(&(agent_id.to_string(), label.to_string()))
            .cloned();
        let delay = self.read_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        snapshot.ok_or_else(|| BridgeError::NotFound {
            resource: "Memory block",
            id: format!("{agent_id}/{label}"),
        })
    }

    async fn update_memory_block(
        &self,
        agent_id: &str,
        label: &str,
        value: &str,
    ) -> Result<MemoryBlock, BridgeError> {
        self.record("update_memory_block").await;
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks
            .get_mut(&(agent_id.to_string(), label.to_string()))
            .ok_or_else(|| BridgeError::NotFound {
                resource: "Memory block",
                id: format!("{agent_id}/{label}"),
            })?;
        block.value = value.to_string();
        Ok(block.clone())
    }

    async fn reset_messages(&self, agent_id: &str) -> Result<usize, BridgeError> {
        self.record("reset_messages").await;
        self.require_agent(agent_id)?;
        Ok(1)
    }

    async fn insert_archival(&self, agent_id: &str, text: &str) -> Result<(), BridgeError> {
        self.record("insert_archival").await;
        self.require_agent(agent_id)?;
        if !*self.drop_archival.lock().unwrap() {
            self.archival
                .lock()
                .unwrap()
                .entry(agent_id.to_string())
                .or_default()
                .push(ArchivalPassage {
                    id: None,
                    text: text.to_string(),
                });
        }
        Ok(())
    }

    async fn list_archival(&self, agent_id: &str) -> Result<Vec<ArchivalPassage>, BridgeError> {
        self.record("list_archival").await;
        Ok(self
            .archival
            .lock()
            .unwrap()
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }
}
