//! Process-wide registry of active channel agents.
//!
//! Agents are keyed by the bot user id derived from their channel. Creating
//! an agent involves several remote calls, so the registry also tracks keys
//! whose creation is in flight: a second `start` for the same channel waits
//! for the first instead of building a duplicate.
//!
//! Creation runs on its own task. A caller that goes away mid-start (a
//! disconnected HTTP client) does not abandon a half-built agent: the task
//! still registers it, or disposes it on failure.
//!
//! Both maps sit behind short, synchronous critical sections that are never
//! held across an await point.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quill_agent::{AgentError, AgentFactory, SharedAgent, bot_identity};
use quill_chat::{ChannelRef, ChatError, SharedTransport, bot_user_id};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Provisioning the bot in the chat platform failed.
    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    /// Building the agent failed.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// A concurrent start for the same channel failed.
    #[error("Concurrent start for {0} failed")]
    ConcurrentStartFailed(String),

    /// Disposing an agent panicked.
    #[error("Dispose failed: {0}")]
    Dispose(String),

    /// The creation task panicked.
    #[error("Agent creation task failed: {0}")]
    Task(String),
}

type AgentMap = Arc<Mutex<HashMap<String, SharedAgent>>>;
type PendingMap = Arc<Mutex<HashMap<String, watch::Receiver<()>>>>;

/// Connection state of a channel's agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Connected,
    Connecting,
    Disconnected,
}

/// Removes the pending marker when creation ends, however it ends.
///
/// Waiters hold receivers for `_done`; dropping the sender wakes them.
struct PendingGuard {
    pending: PendingMap,
    key: String,
    _done: watch::Sender<()>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.key);
    }
}

enum Slot {
    Existing(SharedAgent),
    Pending(watch::Receiver<()>),
    Vacant(watch::Sender<()>),
}

/// Registry of active agents.
pub struct SessionRegistry {
    transport: SharedTransport,
    factory: Arc<dyn AgentFactory>,
    agents: AgentMap,
    pending: PendingMap,
}

impl SessionRegistry {
    pub fn new(transport: SharedTransport, factory: Arc<dyn AgentFactory>) -> Self {
        Self {
            transport,
            factory,
            agents: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the agent for a channel, creating it if needed.
    pub async fn start(
        &self,
        channel_type: &str,
        channel_id: &str,
    ) -> Result<SharedAgent, RegistryError> {
        let key = bot_user_id(channel_id);

        let done = match self.claim(&key) {
            Slot::Existing(agent) => return Ok(agent),
            Slot::Pending(mut rx) => {
                tracing::debug!(%key, "Waiting for pending agent creation");
                // Err means the creator finished and dropped its sender.
                let _ = rx.changed().await;
                return self
                    .agents
                    .lock()
                    .get(&key)
                    .cloned()
                    .ok_or(RegistryError::ConcurrentStartFailed(key));
            }
            Slot::Vacant(done) => done,
        };

        let guard = PendingGuard {
            pending: self.pending.clone(),
            key: key.clone(),
            _done: done,
        };
        let transport = self.transport.clone();
        let factory = self.factory.clone();
        let agents = self.agents.clone();
        let channel = ChannelRef::new(channel_type, channel_id);

        tokio::spawn(async move {
            let _guard = guard;
            create_and_register(transport, factory, agents, channel, key).await
        })
        .await
        .map_err(|e| RegistryError::Task(e.to_string()))?
    }

    fn claim(&self, key: &str) -> Slot {
        let agents = self.agents.lock();
        if let Some(agent) = agents.get(key) {
            return Slot::Existing(agent.clone());
        }
        let mut pending = self.pending.lock();
        if let Some(rx) = pending.get(key) {
            return Slot::Pending(rx.clone());
        }
        let (tx, rx) = watch::channel(());
        pending.insert(key.to_string(), rx);
        Slot::Vacant(tx)
    }

    /// Insert `agent` unless the key is taken. Returns the existing agent if
    /// it was.
    pub fn register(&self, key: &str, agent: SharedAgent) -> Option<SharedAgent> {
        register_in(&self.agents, key, agent)
    }

    /// Dispose and remove a channel's agent. Returns false if there was none.
    pub async fn stop(&self, channel_id: &str) -> Result<bool, RegistryError> {
        let key = bot_user_id(channel_id);
        let Some(agent) = self.agents.lock().remove(&key) else {
            return Ok(false);
        };

        tokio::spawn(async move { agent.dispose().await })
            .await
            .map_err(|e| RegistryError::Dispose(e.to_string()))?;

        tracing::info!(%key, %channel_id, "AI agent stopped");
        Ok(true)
    }

    pub fn status(&self, channel_id: &str) -> AgentStatus {
        let key = bot_user_id(channel_id);
        if self.agents.lock().contains_key(&key) {
            AgentStatus::Connected
        } else if self.pending.lock().contains_key(&key) {
            AgentStatus::Connecting
        } else {
            AgentStatus::Disconnected
        }
    }

    pub fn get(&self, channel_id: &str) -> Option<SharedAgent> {
        self.agents.lock().get(&bot_user_id(channel_id)).cloned()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every agent idle for longer than `threshold` as of `now`.
    pub async fn reap_idle(&self, threshold: Duration, now: DateTime<Utc>) -> usize {
        let expired: Vec<(String, SharedAgent)> = {
            let mut agents = self.agents.lock();
            let keys: Vec<String> = agents
                .iter()
                .filter(|(_, agent)| {
                    (now - agent.last_interaction())
                        .to_std()
                        .is_ok_and(|idle| idle > threshold)
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| agents.remove(&key).map(|agent| (key, agent)))
                .collect()
        };

        let count = expired.len();
        for (key, agent) in expired {
            tracing::info!(%key, "Disposing idle agent");
            agent.dispose().await;
        }
        count
    }

    /// Dispose and remove every agent.
    pub async fn dispose_all(&self) -> usize {
        let agents: Vec<SharedAgent> = self.agents.lock().drain().map(|(_, a)| a).collect();
        let count = agents.len();
        for agent in agents {
            agent.dispose().await;
        }
        count
    }
}

async fn create_and_register(
    transport: SharedTransport,
    factory: Arc<dyn AgentFactory>,
    agents: AgentMap,
    channel: ChannelRef,
    key: String,
) -> Result<SharedAgent, RegistryError> {
    let channel_id = channel.id.clone();
    let agent = create_agent(transport, factory, channel).await?;

    match register_in(&agents, &key, agent.clone()) {
        None => {
            tracing::info!(%key, %channel_id, "AI agent started");
            Ok(agent)
        }
        Some(existing) => {
            tracing::warn!(%key, "Agent registered concurrently, discarding the new one");
            agent.dispose().await;
            Ok(existing)
        }
    }
}

async fn create_agent(
    transport: SharedTransport,
    factory: Arc<dyn AgentFactory>,
    channel: ChannelRef,
) -> Result<SharedAgent, RegistryError> {
    let user = bot_identity(&channel.id);

    transport.upsert_user(&user).await?;
    transport
        .add_members(&channel, std::slice::from_ref(&user.id))
        .await?;

    let agent = factory.create(channel, user);
    if let Err(e) = agent.init().await {
        agent.dispose().await;
        return Err(e.into());
    }
    Ok(agent)
}

fn register_in(agents: &AgentMap, key: &str, agent: SharedAgent) -> Option<SharedAgent> {
    let mut agents = agents.lock();
    if let Some(existing) = agents.get(key) {
        return Some(existing.clone());
    }
    agents.insert(key.to_string(), agent);
    None
}
