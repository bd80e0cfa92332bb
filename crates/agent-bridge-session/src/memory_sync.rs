//! Memory block synchronization.
//!
//! Reads are served from a per-(agent, label) cache while it is younger than
//! the staleness threshold. Writes always re-fetch first (remote wins),
//! replace the whole value, and only update the cache once the server
//! accepted the write.
//!
//! Cache fills and writes for the same block run under one lock, so a fill
//! that started before a write can never land after it. Writes are not
//! versioned: of two concurrent writers the one that acquires the lock last
//! wins, and the earlier value is silently overwritten.

use std::sync::Arc;

use agent_bridge_core::{AgentApi, BridgeError, MemoryBlock, config::MemoryConfig};
use dashmap::DashMap;
use tokio::{sync::Mutex, time::Instant};

type BlockKey = (String, String);
type BlockLock = Arc<Mutex<()>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    block: MemoryBlock,
    synced_at: Instant,
}

/// Read-through cache over remote memory blocks.
pub struct MemorySynchronizer {
    api: Arc<dyn AgentApi>,
    config: MemoryConfig,
    cache: DashMap<BlockKey, CacheEntry>,
    block_locks: DashMap<BlockKey, BlockLock>,
}

fn key(agent_id: &str, label: &str) -> BlockKey {
    (agent_id.to_string(), label.to_string())
}

impl MemorySynchronizer {
    /// Create a new synchronizer.
    #[must_use]
    pub fn new(api: Arc<dyn AgentApi>, config: MemoryConfig) -> Self {
        Self {
            api,
            config,
            cache: DashMap::new(),
            block_locks: DashMap::new(),
        }
    }

    /// Read a block, from cache when fresh.
    ///
    /// # Errors
    /// Returns error if a remote read is needed and fails. The cache is left
    /// untouched in that case.
    pub async fn read_block(&self, agent_id: &str, label: &str) -> Result<MemoryBlock, BridgeError> {
        let key = key(agent_id, label);
        if let Some(block) = self.fresh(&key) {
            tracing::debug!(agent_id, label, "Memory cache hit");
            return Ok(block);
        }

        let lock = self.lock_for(&key);
        let guard = lock.lock().await;
        let result = match self.fresh(&key) {
            Some(block) => Ok(block),
            None => {
                tracing::debug!(agent_id, label, "Memory cache miss, fetching");
                self.api.get_memory_block(agent_id, label).await.map(|block| {
                    self.store(key.clone(), block.clone());
                    block
                })
            }
        };
        drop(guard);
        self.release(&key, lock);
        result
    }

    /// Replace a block's value.
    ///
    /// The limit is checked before any remote call, using the cached
    /// server-declared limit or the configured one. It is checked again
    /// against the freshly fetched block before writing.
    ///
    /// # Errors
    /// Returns `ValueTooLong` if the value exceeds the block's limit, or the
    /// remote error if the fetch or write fails. The cache only changes on
    /// success.
    pub async fn write_block(
        &self,
        agent_id: &str,
        label: &str,
        value: &str,
    ) -> Result<MemoryBlock, BridgeError> {
        let key = key(agent_id, label);
        let known_limit = self.cache.get(&key).and_then(|e| e.block.limit);
        self.check_limit(label, value, known_limit)?;

        let lock = self.lock_for(&key);
        let guard = lock.lock().await;
        let result = self.replace(&key, value).await;
        drop(guard);
        self.release(&key, lock);
        result
    }

    async fn replace(&self, key: &BlockKey, value: &str) -> Result<MemoryBlock, BridgeError> {
        let (agent_id, label) = (key.0.as_str(), key.1.as_str());
        let current = self.api.get_memory_block(agent_id, label).await?;
        self.check_limit(label, value, current.limit)?;
        if current.value != value {
            tracing::debug!(agent_id, label, previous_len = current.char_len(), "Replacing block value");
        }

        let updated = self.api.update_memory_block(agent_id, label, value).await?;
        self.store(key.clone(), updated.clone());
        Ok(updated)
    }

    /// Drop every cached block of an agent.
    pub fn invalidate_agent(&self, agent_id: &str) {
        self.cache.retain(|(agent, _), _| agent != agent_id);
        self.block_locks
            .retain(|(agent, _), lock| agent != agent_id || Arc::strong_count(lock) > 1);
    }

    /// Cached copy of a block, regardless of age.
    #[must_use]
    pub fn cached(&self, agent_id: &str, label: &str) -> Option<MemoryBlock> {
        self.cache.get(&key(agent_id, label)).map(|e| e.block.clone())
    }

    fn fresh(&self, key: &BlockKey) -> Option<MemoryBlock> {
        self.cache
            .get(key)
            .filter(|entry| entry.synced_at.elapsed() < self.config.staleness())
            .map(|entry| entry.block.clone())
    }

    fn lock_for(&self, key: &BlockKey) -> BlockLock {
        Arc::clone(self.block_locks.entry(key.clone()).or_default().value())
    }

    /// Forget the block's lock once nobody else holds or waits on it.
    fn release(&self, key: &BlockKey, lock: BlockLock) {
        drop(lock);
        self.block_locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
    }

    fn store(&self, key: BlockKey, block: MemoryBlock) {
        self.cache.insert(
            key,
            CacheEntry {
                block,
                synced_at: Instant::now(),
            },
        );
    }

    fn check_limit(&self, label: &str, value: &str, limit: Option<usize>) -> Result<(), BridgeError> {
        let limit = limit.unwrap_or_else(|| self.config.limit_for(label));
        let len = value.chars().count();
        if len > limit {
            return Err(BridgeError::ValueTooLong {
                label: label.to_string(),
                len,
                limit,
            });
        }
        Ok(())
    }
}
