//! In-memory binding storage.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use agent_bridge_core::{BindingStore, BridgeError, Session};
use async_trait::async_trait;

/// In-memory binding store.
///
/// The default for single-process deployments. Bindings are lost on
/// restart; the registry rebinds by agent name on next contact.
pub struct MemoryBindingStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryBindingStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBindingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::needless_pass_by_value)]
fn poisoned<T>(e: PoisonError<T>) -> BridgeError {
    BridgeError::Permanent {
        status: None,
        message: format!("binding store lock poisoned: {e}"),
    }
}

#[async_trait]
impl BindingStore for MemoryBindingStore {
    async fn get(&self, session_key: &str) -> Result<Option<Session>, BridgeError> {
        Ok(self
            .sessions
            .read()
            .map_err(poisoned)?
            .get(session_key)
            .cloned())
    }

    async fn put(&self, session: Session) -> Result<(), BridgeError> {
        self.sessions
            .write()
            .map_err(poisoned)?
            .insert(session.session_key.clone(), session);
        Ok(())
    }

    async fn touch(&self, session_key: &str, now: i64) -> Result<(), BridgeError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if let Some(session) = sessions.get_mut(session_key) {
            session.last_active_at = session.last_active_at.max(now);
        }
        Ok(())
    }

    async fn remove(&self, session_key: &str) -> Result<Option<Session>, BridgeError> {
        Ok(self.sessions.write().map_err(poisoned)?.remove(session_key))
    }

    async fn list(&self) -> Result<Vec<Session>, BridgeError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        let mut result: Vec<Session> = sessions.values().cloned().collect();

        // Most recently active first
        result.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));

        Ok(result)
    }
}
