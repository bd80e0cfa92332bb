//! Session registry: conversation key to remote agent bindings.
//!
//! Bindings and agents have independent lifecycles. Evicting a binding never
//! deletes the agent; deleting an agent evicts every binding pointing at it.

use std::{sync::Arc, time::Duration};

use agent_bridge_core::{
    Agent, AgentApi, BindingStore, BridgeError, Session,
    config::{AgentSelection, SessionConfig},
    types::now_millis,
};
use dashmap::DashMap;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    task::JoinHandle,
};

type KeyLock = Arc<Mutex<()>>;
type LockTable = DashMap<String, KeyLock>;

/// Drop a lock entry that only the table itself still references.
fn prune(table: &LockTable, key: &str) {
    table.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
}

/// Exclusive use of a session's command slot.
///
/// Dropping it frees the slot and forgets the slot entry when no other
/// command is queued on it.
pub struct SessionSlot {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    slots: Arc<LockTable>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.slots, &self.key);
    }
}

/// Maps session keys to remote agent ids.
///
/// Two lock tables, both keyed by session key:
/// - `slots` serialize whole commands for a session (held by the dispatcher)
/// - `creating` serialize first-contact agent creation inside `resolve`
pub struct SessionRegistry {
    api: Arc<dyn AgentApi>,
    store: Arc<dyn BindingStore>,
    config: SessionConfig,
    slots: Arc<LockTable>,
    creating: LockTable,
}

impl SessionRegistry {
    /// Create a new registry.
    #[must_use]
    pub fn new(api: Arc<dyn AgentApi>, store: Arc<dyn BindingStore>, config: SessionConfig) -> Self {
        Self {
            api,
            store,
            config,
            slots: Arc::new(DashMap::new()),
            creating: DashMap::new(),
        }
    }

    /// Wait for exclusive use of a session's command slot.
    pub async fn acquire(&self, session_key: &str) -> SessionSlot {
        let slot = Arc::clone(self.slots.entry(session_key.to_string()).or_default().value());
        SessionSlot {
            guard: Some(slot.lock_owned().await),
            key: session_key.to_string(),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Current binding for a session, if any.
    ///
    /// # Errors
    /// Returns error if the binding store fails.
    pub async fn binding(&self, session_key: &str) -> Result<Option<Session>, BridgeError> {
        self.store.get(session_key).await
    }

    /// Return the agent bound to `session_key`, creating and binding one on
    /// first contact.
    ///
    /// Concurrent calls for the same unbound key create at most one agent:
    /// the first caller creates, the rest wait and reuse its binding.
    ///
    /// # Errors
    /// Returns error if agent lookup or creation fails. No binding is
    /// recorded in that case.
    pub async fn resolve(&self, session_key: &str) -> Result<String, BridgeError> {
        if let Some(agent_id) = self.bound_agent(session_key).await? {
            return Ok(agent_id);
        }

        let lock = Arc::clone(self.creating.entry(session_key.to_string()).or_default().value());
        let guard = lock.lock().await;

        let result = match self.bound_agent(session_key).await {
            Ok(Some(agent_id)) => Ok(agent_id),
            Ok(None) => self.bind_default(session_key).await,
            Err(e) => Err(e),
        };

        drop(guard);
        drop(lock);
        prune(&self.creating, session_key);
        result
    }

    async fn bound_agent(&self, session_key: &str) -> Result<Option<String>, BridgeError> {
        let Some(session) = self.store.get(session_key).await? else {
            return Ok(None);
        };
        self.store.touch(session_key, now_millis()).await?;
        Ok(Some(session.agent_id))
    }

    async fn bind_default(&self, session_key: &str) -> Result<String, BridgeError> {
        let name = self.config.agent_name_for(session_key);

        let existing = match self.config.selection {
            AgentSelection::ReuseByName => self
                .api
                .list_agents()
                .await?
                .into_iter()
                .find(|a| a.name == name),
            AgentSelection::AlwaysCreate => None,
        };

        let agent_id = match existing {
            Some(agent) => {
                tracing::info!(session_key, agent_id = %agent.id, %name, "Reusing existing agent");
                agent.id
            }
            None => {
                let agent = self.api.create_agent(&name, &self.config.initial_blocks).await?;
                tracing::info!(session_key, agent_id = %agent.id, %name, "Created agent for session");
                agent.id
            }
        };

        self.store.put(Session::new(session_key, &agent_id)).await?;
        Ok(agent_id)
    }

    /// Look up an agent by id, or by name when no id matches.
    ///
    /// # Errors
    /// Returns `NotFound` if no agent matches.
    pub async fn find_agent(&self, reference: &str) -> Result<Agent, BridgeError> {
        let agents = self.api.list_agents().await?;
        let by_id = agents.iter().position(|a| a.id == reference);
        let index = by_id.or_else(|| agents.iter().position(|a| a.name == reference));
        index
            .and_then(|i| agents.into_iter().nth(i))
            .ok_or_else(|| BridgeError::agent_not_found(reference))
    }

    /// Explicitly bind `session_key` to an existing agent.
    ///
    /// The target is validated against the server before the binding changes.
    ///
    /// # Errors
    /// Returns `NotFound` if the agent does not exist; the previous binding
    /// is kept.
    pub async fn rebind(&self, session_key: &str, reference: &str) -> Result<Agent, BridgeError> {
        let agent = self.find_agent(reference).await?;
        self.bind(session_key, &agent.id).await?;
        tracing::info!(session_key, agent_id = %agent.id, "Rebound session");
        Ok(agent)
    }

    /// Create a named agent and bind `session_key` to it.
    ///
    /// # Errors
    /// Returns error if creation fails; the previous binding is kept.
    pub async fn create_and_bind(&self, session_key: &str, name: &str) -> Result<Agent, BridgeError> {
        let agent = self.api.create_agent(name, &self.config.initial_blocks).await?;
        self.bind(session_key, &agent.id).await?;
        tracing::info!(session_key, agent_id = %agent.id, name, "Created and bound agent");
        Ok(agent)
    }

    async fn bind(&self, session_key: &str, agent_id: &str) -> Result<(), BridgeError> {
        let mut session = Session::new(session_key, agent_id);
        if let Some(previous) = self.store.get(session_key).await? {
            session.created_at = previous.created_at;
        }
        self.store.put(session).await
    }

    /// Remove a binding. The remote agent is left untouched.
    ///
    /// # Errors
    /// Returns error if the binding store fails.
    pub async fn evict(&self, session_key: &str) -> Result<Option<Session>, BridgeError> {
        let removed = self.store.remove(session_key).await?;
        if let Some(session) = &removed {
            tracing::info!(session_key, agent_id = %session.agent_id, "Evicted session");
        }
        Ok(removed)
    }

    /// Remove every binding pointing at `agent_id`. Returns the evicted keys.
    ///
    /// # Errors
    /// Returns error if the binding store fails.
    pub async fn unbind_agent(&self, agent_id: &str) -> Result<Vec<String>, BridgeError> {
        let mut evicted = Vec::new();
        for session in self.store.list().await? {
            if session.agent_id == agent_id {
                self.store.remove(&session.session_key).await?;
                evicted.push(session.session_key);
            }
        }
        if !evicted.is_empty() {
            tracing::info!(agent_id, sessions = ?evicted, "Unbound sessions from deleted agent");
        }
        Ok(evicted)
    }

    /// Evict bindings idle for at least `max_idle`. Sessions with a command
    /// in flight are skipped. Returns the evicted keys.
    ///
    /// # Errors
    /// Returns error if the binding store fails.
    pub async fn evict_idle(&self, max_idle: Duration) -> Result<Vec<String>, BridgeError> {
        let now = now_millis();
        let max_idle_ms = u64::try_from(max_idle.as_millis()).unwrap_or(u64::MAX);
        let mut evicted = Vec::new();

        for session in self.store.list().await? {
            if session.idle_millis(now) < max_idle_ms {
                continue;
            }
            let key = session.session_key;
            let slot = self.slots.get(&key).map(|s| Arc::clone(s.value()));
            let guard = match slot.as_ref().map(|s| s.try_lock()) {
                Some(Err(_)) => {
                    tracing::debug!(session_key = %key, "Skipping busy session");
                    continue;
                }
                Some(Ok(guard)) => Some(guard),
                None => None,
            };

            self.store.remove(&key).await?;
            // A command may have queued on the slot while the store was busy;
            // the entry then stays so it keeps serializing with later ones.
            drop(guard);
            drop(slot);
            prune(&self.slots, &key);
            tracing::info!(session_key = %key, agent_id = %session.agent_id, "Evicted idle session");
            evicted.push(key);
        }

        Ok(evicted)
    }

    /// Spawn the periodic idle-eviction sweep.
    #[must_use]
    pub fn spawn_eviction_sweep(
        self: Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.evict_idle(max_idle).await {
                    Ok(evicted) if !evicted.is_empty() => {
                        tracing::debug!(count = evicted.len(), "Eviction sweep finished");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Eviction sweep failed: {e}"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use agent_bridge_core::MemoryBlock;
    use async_trait::async_trait;
    use tokio_test::assert_ok;

    use super::*;
    use crate::{storage::MemoryBindingStore, testing::FakeAgentApi};

    fn registry_with(api: &Arc<FakeAgentApi>, config: SessionConfig) -> SessionRegistry {
        SessionRegistry::new(
            Arc::clone(api) as Arc<dyn AgentApi>,
            Arc::new(MemoryBindingStore::new()),
            config,
        )
    }

    fn registry(api: &Arc<FakeAgentApi>) -> SessionRegistry {
        registry_with(api, SessionConfig::default())
    }

    /// Binding store whose removals take a while.
    struct SlowRemoveStore {
        inner: MemoryBindingStore,
        delay: Duration,
    }

    #[async_trait]
    impl BindingStore for SlowRemoveStore {
        async fn get(&self, session_key: &str) -> Result<Option<Session>, BridgeError> {
            self.inner.get(session_key).await
        }

        async fn put(&self, session: Session) -> Result<(), BridgeError> {
            self.inner.put(session).await
        }

        async fn touch(&self, session_key: &str, now: i64) -> Result<(), BridgeError> {
            self.inner.touch(session_key, now).await
        }

        async fn remove(&self, session_key: &str) -> Result<Option<Session>, BridgeError> {
            tokio::time::sleep(self.delay).await;
            self.inner.remove(session_key).await
        }

        async fn list(&self) -> Result<Vec<Session>, BridgeError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_resolve_creates_then_reuses() {
        let api = Arc::new(FakeAgentApi::new());
        let registry = registry(&api);

        let first = registry.resolve("conv-1").await.unwrap();
        let second = registry.resolve("conv-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(api.count("create_agent"), 1);
        let agents = api.list_agents().await.unwrap();
        assert_eq!(agents[0].name, "agent-conv-1");
        assert_eq!(agents[0].blocks.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolve_creates_one_agent() {
        let api = Arc::new(FakeAgentApi::new().with_latency(Duration::from_millis(20)));
        let registry = Arc::new(registry(&api));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.resolve("conv-1").await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(api.count("create_agent"), 1);
        assert!(ids.iter().all(|id| id == &ids[0]));
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_agents() {
        let api = Arc::new(FakeAgentApi::new());
        let registry = registry(&api);

        let a = registry.resolve("conv-1").await.unwrap();
        let b = registry.resolve("conv-2").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_resolve_reuses_agent_by_name() {
        let api = Arc::new(FakeAgentApi::new());
        api.seed_agent("agent-existing", "agent-conv-1");
        let registry = registry(&api);

        assert_eq!(registry.resolve("conv-1").await.unwrap(), "agent-existing");
        assert_eq!(api.count("create_agent"), 0);
    }

    #[tokio::test]
    async fn test_always_create_ignores_existing_name() {
        let api = Arc::new(FakeAgentApi::new());
        api.seed_agent("agent-existing", "agent-conv-1");
        let registry = registry_with(
            &api,
            SessionConfig {
                selection: AgentSelection::AlwaysCreate,
                initial_blocks: vec![MemoryBlock::new("persona", "terse")],
                ..SessionConfig::default()
            },
        );

        let id = registry.resolve("conv-1").await.unwrap();
        assert_ne!(id, "agent-existing");
        assert_eq!(api.count("list_agents"), 0);
        assert_eq!(api.count("create_agent"), 1);
    }

    #[tokio::test]
    async fn test_rebind_validates_target() {
        let api = Arc::new(FakeAgentApi::new());
        api.seed_agent("agent-other", "research");
        let registry = registry(&api);
        let original = registry.resolve("conv-1").await.unwrap();

        let err = registry.rebind("conv-1", "ghost").await.unwrap_err();
        assert_eq!(err, BridgeError::agent_not_found("ghost"));
        assert_eq!(registry.resolve("conv-1").await.unwrap(), original);

        let agent = assert_ok!(registry.rebind("conv-1", "research").await);
        assert_eq!(agent.id, "agent-other");
        assert_eq!(registry.resolve("conv-1").await.unwrap(), "agent-other");
    }

    #[tokio::test]
    async fn test_find_agent_prefers_id() {
        let api = Arc::new(FakeAgentApi::new());
        api.seed_agent("alpha", "beta");
        api.seed_agent("beta", "gamma");
        let registry = registry(&api);

        assert_eq!(registry.find_agent("beta").await.unwrap().id, "beta");
        assert_eq!(registry.find_agent("gamma").await.unwrap().id, "beta");
    }

    #[tokio::test]
    async fn test_evict_keeps_remote_agent() {
        let api = Arc::new(FakeAgentApi::new());
        let registry = registry(&api);
        let agent_id = registry.resolve("conv-1").await.unwrap();

        let removed = registry.evict("conv-1").await.unwrap();
        assert_eq!(removed.map(|s| s.agent_id), Some(agent_id.clone()));
        assert_eq!(api.count("delete_agent"), 0);
        assert!(registry.binding("conv-1").await.unwrap().is_none());

        // Default naming rebinds to the surviving agent
        assert_eq!(registry.resolve("conv-1").await.unwrap(), agent_id);
        assert_eq!(api.count("create_agent"), 1);
    }

    #[tokio::test]
    async fn test_unbind_agent_removes_all_pointing_sessions() {
        let api = Arc::new(FakeAgentApi::new());
        api.seed_agent("shared", "shared");
        let registry = registry(&api);
        registry.rebind("conv-1", "shared").await.unwrap();
        registry.rebind("conv-2", "shared").await.unwrap();
        registry.resolve("conv-3").await.unwrap();

        let mut evicted = registry.unbind_agent("shared").await.unwrap();
        evicted.sort();
        assert_eq!(evicted, vec!["conv-1", "conv-2"]);
        assert!(registry.binding("conv-3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_evict_idle_skips_busy_and_recent() {
        let api = Arc::new(FakeAgentApi::new());
        let store = Arc::new(MemoryBindingStore::new());
        let registry = SessionRegistry::new(
            Arc::clone(&api) as Arc<dyn AgentApi>,
            Arc::clone(&store) as Arc<dyn BindingStore>,
            SessionConfig::default(),
        );
        let old = now_millis() - 2 * 3_600_000;
        for key in ["idle", "busy"] {
            let mut session = Session::new(key, "agent-1");
            session.last_active_at = old;
            store.put(session).await.unwrap();
        }
        store.put(Session::new("fresh", "agent-1")).await.unwrap();

        let busy = registry.acquire("busy").await;
        let evicted = registry.evict_idle(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(evicted, vec!["idle"]);
        drop(busy);

        let evicted = registry.evict_idle(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(evicted, vec!["busy"]);
        assert!(registry.binding("fresh").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_sweep_runs_periodically() {
        let api = Arc::new(FakeAgentApi::new());
        let store = Arc::new(MemoryBindingStore::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&api) as Arc<dyn AgentApi>,
            Arc::clone(&store) as Arc<dyn BindingStore>,
            SessionConfig::default(),
        ));
        let mut session = Session::new("stale", "agent-1");
        session.last_active_at = 0;
        store.put(session).await.unwrap();

        let sweep = Arc::clone(&registry).spawn_eviction_sweep(Duration::from_secs(60), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(store.get("stale").await.unwrap().is_none());
        sweep.abort();
    }

    #[tokio::test]
    async fn test_released_slots_are_forgotten() {
        let api = Arc::new(FakeAgentApi::new());
        let registry = Arc::new(registry(&api));

        drop(registry.acquire("conv-1").await);
        assert!(registry.slots.is_empty());

        let first = registry.acquire("conv-1").await;
        let queued = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { drop(registry.acquire("conv-1").await) })
        };
        tokio::task::yield_now().await;
        drop(first);
        assert_eq!(registry.slots.len(), 1);

        queued.await.unwrap();
        assert!(registry.slots.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_queued_during_eviction_keeps_serializing() {
        let api = Arc::new(FakeAgentApi::new());
        let store = Arc::new(SlowRemoveStore {
            inner: MemoryBindingStore::new(),
            delay: Duration::from_millis(50),
        });
        let mut session = Session::new("conv-1", "agent-1");
        session.last_active_at = 0;
        store.put(session).await.unwrap();
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&api) as Arc<dyn AgentApi>,
            store,
            SessionConfig::default(),
        ));

        let sweep = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.evict_idle(Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Takes the slot while the sweep is still removing the binding
        let running = registry.acquire("conv-1").await;
        assert_eq!(sweep.await.unwrap().unwrap(), vec!["conv-1"]);

        let next = tokio::time::timeout(Duration::from_millis(20), registry.acquire("conv-1")).await;
        assert!(next.is_err());

        drop(running);
        assert_ok!(tokio::time::timeout(Duration::from_millis(20), registry.acquire("conv-1")).await);
    }

    #[tokio::test]
    async fn test_failed_rebind_records_no_binding() {
        let api = Arc::new(FakeAgentApi::new());
        let registry = registry(&api);
        assert!(registry.rebind("conv-1", "missing").await.is_err());
        assert!(registry.binding("conv-1").await.unwrap().is_none());
    }
}
