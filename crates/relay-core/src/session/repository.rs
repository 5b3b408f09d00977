use std::sync::Arc;

use super::{
    AgentSessions, ConversationMap, DEFAULT_SESSION_NAME, Message, Session, TEMPORARY_SESSION_ID,
    is_temporary,
};
use crate::storage::SyncedAtom;
use crate::utils::now_millis;

/// Session CRUD for a single agent, backed by the shared conversations atom.
///
/// The repository also owns the agent's current-session pointer and the last
/// transcript it synchronized, which `sync(None)` falls back to.
pub struct SessionRepository {
    agent_id: String,
    conversations: Arc<SyncedAtom<ConversationMap>>,
    current: String,
    last_messages: Vec<Message>,
}

impl SessionRepository {
    pub fn new(agent_id: impl Into<String>, conversations: Arc<SyncedAtom<ConversationMap>>) -> Self {
        let mut repo = Self {
            agent_id: agent_id.into(),
            conversations,
            current: TEMPORARY_SESSION_ID.to_string(),
            last_messages: Vec::new(),
        };
        repo.current = repo.initial_session_id();
        repo.last_messages = repo.current_messages();
        repo
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn current_session_id(&self) -> &str {
        &self.current
    }

    pub fn is_temporary(&self) -> bool {
        is_temporary(&self.current)
    }

    /// The most recently updated session for this agent, or the temporary sentinel.
    pub fn initial_session_id(&self) -> String {
        self.most_recent_session_id()
            .unwrap_or_else(|| TEMPORARY_SESSION_ID.to_string())
    }

    /// All sessions for this agent, most recently updated first.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .conversations
            .read(|map| map.get(&self.agent_id).map(|s| s.values().cloned().collect()))
            .unwrap_or_default();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.conversations.read(|map| {
            map.get(&self.agent_id)
                .and_then(|sessions| sessions.get(session_id))
                .cloned()
        })
    }

    /// Transcript stored for the current session; empty when it has no record.
    pub fn current_messages(&self) -> Vec<Message> {
        self.session(&self.current)
            .map(|s| s.messages)
            .unwrap_or_default()
    }

    /// Point at `session_id`, or the temporary sentinel when `None`.
    ///
    /// The id is not validated; an unknown id reads back as an empty transcript.
    /// Returns the transcript of the newly selected session.
    pub fn switch_session(&mut self, session_id: Option<&str>) -> Vec<Message> {
        self.current = session_id.unwrap_or(TEMPORARY_SESSION_ID).to_string();
        self.last_messages = self.current_messages();

        tracing::debug!(
            target: "relay::session",
            agent_id = %self.agent_id,
            session_id = %self.current,
            "Switched session"
        );

        self.last_messages.clone()
    }

    /// Remove `session_id`. Returns `true` when it was the current session, in
    /// which case the pointer has moved to the most recent remaining session.
    pub fn delete_session(&mut self, session_id: &str) -> bool {
        if session_id.is_empty() || is_temporary(session_id) {
            return false;
        }

        let agent_id = self.agent_id.clone();
        let target = session_id.to_string();
        self.conversations.update(move |map| {
            let mut next = map.clone();
            if let Some(sessions) = next.get_mut(&agent_id) {
                sessions.remove(&target);
            }
            next
        });

        tracing::info!(
            target: "relay::session",
            agent_id = %self.agent_id,
            session_id = %session_id,
            "Deleted session"
        );

        if self.current != session_id {
            return false;
        }

        self.current = self.initial_session_id();
        self.last_messages = self.current_messages();
        true
    }

    /// Insert a session whose id was assigned by the server and make it current.
    pub fn create_session_from_response(
        &mut self,
        session_id: &str,
        name: Option<String>,
        messages: Vec<Message>,
    ) {
        let now = now_millis();
        let session = Session {
            id: session_id.to_string(),
            created_at: now,
            updated_at: now,
            messages: messages.clone(),
            name: Some(name.unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string())),
        };

        self.modify_agent_sessions(move |sessions| {
            sessions.insert(session.id.clone(), session);
        });

        self.current = session_id.to_string();
        self.last_messages = messages;

        tracing::info!(
            target: "relay::session",
            agent_id = %self.agent_id,
            session_id = %session_id,
            "Created session from response"
        );
    }

    /// Write `messages` (or the last synchronized transcript) into the current
    /// session's record. Temporary sessions are never persisted.
    pub fn sync(&mut self, messages: Option<&[Message]>) {
        if let Some(messages) = messages {
            self.last_messages = messages.to_vec();
        }

        if self.is_temporary() {
            return;
        }

        let session_id = self.current.clone();
        let messages = self.last_messages.clone();
        self.modify_agent_sessions(move |sessions| {
            let now = now_millis();
            match sessions.get_mut(&session_id) {
                Some(session) => {
                    session.messages = messages;
                    session.updated_at = session.updated_at.max(now);
                }
                None => {
                    sessions.insert(
                        session_id.clone(),
                        Session {
                            id: session_id,
                            created_at: now,
                            updated_at: now,
                            messages,
                            name: None,
                        },
                    );
                }
            }
        });
    }

    fn most_recent_session_id(&self) -> Option<String> {
        self.conversations.read(|map| {
            map.get(&self.agent_id).and_then(|sessions| {
                sessions
                    .values()
                    .max_by_key(|s| s.updated_at)
                    .map(|s| s.id.clone())
            })
        })
    }

    fn modify_agent_sessions(&self, f: impl FnOnce(&mut AgentSessions) + Send + 'static) {
        let agent_id = self.agent_id.clone();
        self.conversations.update(move |map| {
            let mut next = map.clone();
            f(next.entry(agent_id).or_default());
            next
        });
    }
}
