use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use tokio::sync::watch;

use super::actor::{AgentHandle, spawn_runner};
use super::transport::AgentTransport;
use super::{AgentEndpoint, SharedStores};
use crate::error::{Error, Result};
use crate::storage::KeyValueStore;

static GLOBAL: OnceCell<AgentRegistry> = OnceCell::new();

struct RegisteredAgent {
    endpoint_tx: watch::Sender<AgentEndpoint>,
    handle: AgentHandle,
}

/// Owns one runner per agent id for the lifetime of the process.
///
/// Runners are created lazily by [`AgentRegistry::acquire`] and are never torn
/// down, so a stream keeps flowing after every subscriber has gone away.
pub struct AgentRegistry {
    stores: SharedStores,
    transport: Arc<dyn AgentTransport>,
    agents: Mutex<HashMap<String, RegisteredAgent>>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, transport: Arc<dyn AgentTransport>) -> Self {
        Self {
            stores: SharedStores::open(store),
            transport,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// Make `registry` the process-wide instance returned by [`global`](Self::global).
    pub fn install(registry: AgentRegistry) -> Result<&'static AgentRegistry> {
        GLOBAL.try_insert(registry).map_err(|_| {
            Error::InvalidOperation("agent registry is already installed".to_string())
        })
    }

    pub fn global() -> Option<&'static AgentRegistry> {
        GLOBAL.get()
    }

    /// Handle to the runner for `agent_id`, starting it on first use.
    ///
    /// An endpoint that differs from the registered one replaces it; the
    /// change applies from the next send and leaves an in-flight stream alone.
    /// Must be called from within a Tokio runtime.
    pub fn acquire(&self, agent_id: &str, endpoint: AgentEndpoint) -> Result<AgentHandle> {
        let mut agents = self
            .agents
            .lock()
            .map_err(|e| Error::InvalidOperation(format!("agent registry lock poisoned: {e}")))?;

        if let Some(agent) = agents.get(agent_id) {
            agent.endpoint_tx.send_if_modified(|current| {
                if *current == endpoint {
                    false
                } else {
                    tracing::debug!(
                        target: "relay::runner",
                        agent_id = %agent_id,
                        url = %endpoint.url,
                        "Updated agent endpoint"
                    );
                    *current = endpoint;
                    true
                }
            });
            return Ok(agent.handle.clone());
        }

        let (endpoint_tx, endpoint_rx) = watch::channel(endpoint);
        let handle = spawn_runner(agent_id, endpoint_rx, &self.stores, self.transport.clone());
        tracing::debug!(target: "relay::runner", agent_id = %agent_id, "Started agent runner");

        agents.insert(
            agent_id.to_string(),
            RegisteredAgent {
                endpoint_tx,
                handle: handle.clone(),
            },
        );
        Ok(handle)
    }

    /// Handle to an already running agent.
    pub fn get(&self, agent_id: &str) -> Option<AgentHandle> {
        let agents = self.agents.lock().ok()?;
        agents.get(agent_id).map(|agent| agent.handle.clone())
    }

    /// Ids of every started runner, sorted.
    pub fn agents(&self) -> Vec<String> {
        let Ok(agents) = self.agents.lock() else {
            return Vec::new();
        };
        let mut ids: Vec<String> = agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn stores(&self) -> &SharedStores {
        &self.stores
    }
}
