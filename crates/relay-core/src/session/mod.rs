//! Conversation sessions and the per-agent repository over them.

mod repository;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use repository::SessionRepository;

/// Reserved session id meaning "no persisted session yet".
pub const TEMPORARY_SESSION_ID: &str = "temporary";
/// Display name used when the server does not name a new session.
pub const DEFAULT_SESSION_NAME: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>, execution_id: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            execution_id,
        }
    }

    pub fn agent(content: impl Into<String>, execution_id: Option<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
            execution_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Milliseconds since the Unix epoch; never decreases for a given id.
    pub updated_at: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `sessionId -> Session` for one agent.
pub type AgentSessions = HashMap<String, Session>;

/// `agentId -> (sessionId -> Session)`, the persisted `conversations` region.
pub type ConversationMap = HashMap<String, AgentSessions>;

pub fn is_temporary(session_id: &str) -> bool {
    session_id == TEMPORARY_SESSION_ID
}
