//! Per-agent stream consumers and the registry that keeps them alive.

mod actor;
pub mod registry;
pub mod transport;

use std::sync::Arc;

use serde_json::Value;

use crate::session::{ConversationMap, Message, Session};
use crate::storage::{CONVERSATIONS_REGION, DEBUG_REGION, KeyValueStore, SyncedAtom};
use crate::trace::{self, DebugData};

pub use actor::AgentHandle;
pub use registry::AgentRegistry;
pub use transport::{AgentRequest, AgentRequestBody, AgentResponse, AgentTransport, HttpTransport};

/// Where and how to reach one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentEndpoint {
    pub url: String,
    pub context: Value,
    pub test_build_id: Option<String>,
}

impl AgentEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            context: Value::Object(Default::default()),
            test_build_id: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_test_build_id(mut self, test_build_id: Option<String>) -> Self {
        self.test_build_id = test_build_id;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Do not add the input to the transcript, e.g. when it is already there.
    pub skip_user_message: bool,
    /// Overrides the endpoint's `context` for this request.
    pub context: Option<Value>,
    /// Overrides the endpoint's `testBuildId` for this request.
    pub test_build_id: Option<String>,
}

/// Snapshot published by an agent's runner after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRunnerState {
    pub agent_id: String,
    pub messages: Vec<Message>,
    pub in_progress: bool,
    pub session_id: String,
    /// Most recently updated first.
    pub sessions: Vec<Session>,
    pub debug_data: DebugData,
}

impl AgentRunnerState {
    pub(crate) fn empty(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            messages: Vec::new(),
            in_progress: false,
            session_id: crate::session::TEMPORARY_SESSION_ID.to_string(),
            sessions: Vec::new(),
            debug_data: DebugData::new(),
        }
    }
}

/// The two persisted regions shared by every runner.
#[derive(Clone)]
pub struct SharedStores {
    pub conversations: Arc<SyncedAtom<ConversationMap>>,
    pub debug: Arc<SyncedAtom<DebugData>>,
}

impl SharedStores {
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let conversations = SyncedAtom::new(
            store.clone(),
            CONVERSATIONS_REGION,
            ConversationMap::new(),
        );
        let debug =
            SyncedAtom::new(store, DEBUG_REGION, DebugData::new()).with_degrade(trace::degrade);

        Self {
            conversations: Arc::new(conversations),
            debug: Arc::new(debug),
        }
    }
}
