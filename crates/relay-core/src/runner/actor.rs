use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::transport::{AgentRequest, AgentRequestBody, AgentTransport};
use super::{AgentEndpoint, AgentRunnerState, SendOptions, SharedStores};
use crate::error::AgentError;
use crate::session::{ConversationMap, Message, Role, SessionRepository, is_temporary};
use crate::storage::SyncedAtom;
use crate::stream::frame::is_trace_kind;
use crate::stream::{AgentEvent, parse_frame};
use crate::trace::{DebugData, TraceEvent, TraceReducer};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

pub(crate) enum RunnerCmd {
    Send {
        input: String,
        options: SendOptions,
        reply: oneshot::Sender<Result<(), AgentError>>,
    },
    AddOptimisticMessage {
        input: String,
        reply: oneshot::Sender<()>,
    },
    SwitchSession {
        session_id: Option<String>,
        reply: oneshot::Sender<()>,
    },
    DeleteSession {
        session_id: String,
        reply: oneshot::Sender<()>,
    },
    GetState {
        reply: oneshot::Sender<AgentRunnerState>,
    },
}

/// What an attempt task reports back, tagged with its attempt number.
struct AttemptMsg {
    attempt: u64,
    signal: AttemptSignal,
}

enum AttemptSignal {
    Opened {
        session_id: Option<String>,
        session_name: Option<String>,
        execution_id: Option<String>,
    },
    Frame(String),
    Closed,
    Failed(AgentError),
}

/// The user message added for an attempt, kept so a failed attempt can
/// restore it.
struct PendingUserMessage {
    content: String,
    provisional_id: String,
    assigned_id: Option<String>,
}

impl PendingUserMessage {
    fn matches(&self, message: &Message) -> bool {
        message.role == Role::User
            && message.content == self.content
            && message.execution_id.as_ref().is_some_and(|id| {
                *id == self.provisional_id || Some(id) == self.assigned_id.as_ref()
            })
    }
}

struct ActiveAttempt {
    id: u64,
    token: CancellationToken,
    reply: Option<oneshot::Sender<Result<(), AgentError>>>,
    pending_user: Option<PendingUserMessage>,
}

/// Cloneable handle to one agent's runner.
///
/// Dropping handles or subscriptions never stops the runner; it lives as long
/// as its registry entry.
#[derive(Clone)]
pub struct AgentHandle {
    agent_id: Arc<str>,
    cmd_tx: mpsc::Sender<RunnerCmd>,
    state_rx: watch::Receiver<AgentRunnerState>,
}

impl AgentHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Send `input` and stream the reply into the transcript.
    ///
    /// Resolves once the stream closes. A later send for the same agent
    /// supersedes this one, which then resolves with [`AgentError::Cancelled`].
    pub async fn send(
        &self,
        input: impl Into<String>,
        options: SendOptions,
    ) -> Result<(), AgentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(RunnerCmd::Send {
                input: input.into(),
                options,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AgentError::ChannelClosed)?
    }

    /// Append a user message without contacting the agent.
    pub async fn add_optimistic_message(&self, input: impl Into<String>) -> Result<(), AgentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(RunnerCmd::AddOptimisticMessage {
                input: input.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AgentError::ChannelClosed)
    }

    /// Select `session_id`, or the temporary session when `None`.
    pub async fn switch_session(&self, session_id: Option<String>) -> Result<(), AgentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(RunnerCmd::SwitchSession {
                session_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AgentError::ChannelClosed)
    }

    pub async fn delete_session(&self, session_id: impl Into<String>) -> Result<(), AgentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(RunnerCmd::DeleteSession {
                session_id: session_id.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AgentError::ChannelClosed)
    }

    /// State as seen by the runner after every queued command has run.
    pub async fn snapshot(&self) -> Result<AgentRunnerState, AgentError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(RunnerCmd::GetState { reply: reply_tx })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AgentError::ChannelClosed)
    }

    /// Latest published state.
    pub fn state(&self) -> AgentRunnerState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentRunnerState> {
        self.state_rx.clone()
    }
}

pub(crate) fn spawn_runner(
    agent_id: &str,
    endpoint_rx: watch::Receiver<AgentEndpoint>,
    stores: &SharedStores,
    transport: Arc<dyn AgentTransport>,
) -> AgentHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (state_tx, state_rx) = watch::channel(AgentRunnerState::empty(agent_id));

    let runner = AgentRunner::new(agent_id, endpoint_rx, stores, transport, state_tx);
    runner.publish();
    tokio::spawn(runner.run(cmd_rx));

    AgentHandle {
        agent_id: Arc::from(agent_id),
        cmd_tx,
        state_rx,
    }
}

struct AgentRunner {
    agent_id: String,
    endpoint_rx: watch::Receiver<AgentEndpoint>,
    transport: Arc<dyn AgentTransport>,
    sessions: SessionRepository,
    debug: Arc<SyncedAtom<DebugData>>,
    conversations_rx: watch::Receiver<ConversationMap>,
    debug_rx: watch::Receiver<DebugData>,
    reducer: TraceReducer,
    messages: Vec<Message>,
    attempt: Option<ActiveAttempt>,
    next_attempt: u64,
    signal_tx: mpsc::UnboundedSender<AttemptMsg>,
    signal_rx: mpsc::UnboundedReceiver<AttemptMsg>,
    state_tx: watch::Sender<AgentRunnerState>,
}

impl AgentRunner {
    fn new(
        agent_id: &str,
        endpoint_rx: watch::Receiver<AgentEndpoint>,
        stores: &SharedStores,
        transport: Arc<dyn AgentTransport>,
        state_tx: watch::Sender<AgentRunnerState>,
    ) -> Self {
        let sessions = SessionRepository::new(agent_id, stores.conversations.clone());
        let messages = sessions.current_messages();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        Self {
            agent_id: agent_id.to_string(),
            endpoint_rx,
            transport,
            sessions,
            debug: stores.debug.clone(),
            conversations_rx: stores.conversations.subscribe(),
            debug_rx: stores.debug.subscribe(),
            reducer: TraceReducer::new(),
            messages,
            attempt: None,
            next_attempt: 0,
            signal_tx,
            signal_rx,
            state_tx,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<RunnerCmd>) {
        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },

                Some(msg) = self.signal_rx.recv() => self.handle_signal(msg),

                Ok(()) = self.conversations_rx.changed() => self.publish(),

                Ok(()) = self.debug_rx.changed() => self.publish(),
            }
        }

        self.cancel_attempt();
        tracing::debug!(target: "relay::runner", agent_id = %self.agent_id, "Agent runner stopped");
    }

    fn handle_command(&mut self, cmd: RunnerCmd) {
        match cmd {
            RunnerCmd::Send {
                input,
                options,
                reply,
            } => self.start_send(input, options, reply),
            RunnerCmd::AddOptimisticMessage { input, reply } => {
                self.messages.push(Message::user(input, None));
                self.sync();
                self.publish();
                let _ = reply.send(());
            }
            RunnerCmd::SwitchSession { session_id, reply } => {
                if session_id.as_deref() != Some(self.sessions.current_session_id()) {
                    self.cancel_attempt();
                }
                self.messages = self.sessions.switch_session(session_id.as_deref());
                self.publish();
                let _ = reply.send(());
            }
            RunnerCmd::DeleteSession { session_id, reply } => {
                // Deleting the sentinel or an empty id is a no-op and must not
                // touch the in-flight stream.
                let deletable = !session_id.is_empty() && !is_temporary(&session_id);
                if deletable && session_id == self.sessions.current_session_id() {
                    self.cancel_attempt();
                }
                if self.sessions.delete_session(&session_id) {
                    self.messages = self.sessions.current_messages();
                }
                self.publish();
                let _ = reply.send(());
            }
            RunnerCmd::GetState { reply } => {
                let _ = reply.send(self.build_state());
            }
        }
    }

    fn start_send(
        &mut self,
        input: String,
        options: SendOptions,
        reply: oneshot::Sender<Result<(), AgentError>>,
    ) {
        self.cancel_attempt();

        let pending_user = if options.skip_user_message {
            None
        } else {
            let provisional_id = Uuid::new_v4().to_string();
            self.messages
                .push(Message::user(input.clone(), Some(provisional_id.clone())));
            self.sync();
            Some(PendingUserMessage {
                content: input.clone(),
                provisional_id,
                assigned_id: None,
            })
        };

        let endpoint = self.endpoint_rx.borrow().clone();
        let request = AgentRequest {
            url: endpoint.url,
            session_id: (!self.sessions.is_temporary())
                .then(|| self.sessions.current_session_id().to_string()),
            body: AgentRequestBody {
                stream: true,
                input,
                context: options.context.unwrap_or(endpoint.context),
                test_build_id: options.test_build_id.or(endpoint.test_build_id),
            },
        };

        let id = self.next_attempt;
        self.next_attempt += 1;
        let token = CancellationToken::new();

        tracing::info!(
            target: "relay::runner",
            agent_id = %self.agent_id,
            attempt = id,
            url = %request.url,
            session_id = ?request.session_id,
            "Starting agent stream"
        );

        tokio::spawn(run_attempt(
            self.transport.clone(),
            request,
            id,
            token.clone(),
            self.signal_tx.clone(),
        ));

        self.attempt = Some(ActiveAttempt {
            id,
            token,
            reply: Some(reply),
            pending_user,
        });
        self.publish();
    }

    fn handle_signal(&mut self, msg: AttemptMsg) {
        if self.attempt.as_ref().map(|a| a.id) != Some(msg.attempt) {
            tracing::trace!(
                target: "relay::runner",
                agent_id = %self.agent_id,
                attempt = msg.attempt,
                "Dropping signal from superseded attempt"
            );
            return;
        }

        match msg.signal {
            AttemptSignal::Opened {
                session_id,
                session_name,
                execution_id,
            } => self.on_opened(session_id, session_name, execution_id),
            AttemptSignal::Frame(raw) => self.on_frame(&raw),
            AttemptSignal::Closed => self.finish(Ok(())),
            AttemptSignal::Failed(err) => self.finish(Err(err)),
        }
    }

    fn on_opened(
        &mut self,
        session_id: Option<String>,
        session_name: Option<String>,
        execution_id: Option<String>,
    ) {
        if self.sessions.is_temporary() {
            if let Some(session_id) = session_id {
                self.sessions.create_session_from_response(
                    &session_id,
                    session_name,
                    self.messages.clone(),
                );
            }
        }

        if let Some(execution_id) = execution_id {
            self.attach_execution_id(execution_id);
        }

        self.publish();
    }

    /// Tag the trailing user message with the server's execution id. Only a
    /// missing id or this attempt's provisional id is replaced.
    fn attach_execution_id(&mut self, execution_id: String) {
        let pending = self
            .attempt
            .as_mut()
            .and_then(|attempt| attempt.pending_user.as_mut());

        let Some(last) = self.messages.last_mut() else {
            return;
        };
        if last.role != Role::User {
            return;
        }

        let replaceable = match (&last.execution_id, &pending) {
            (None, _) => true,
            (Some(id), Some(pending)) => *id == pending.provisional_id,
            (Some(_), None) => false,
        };
        if !replaceable {
            return;
        }

        last.execution_id = Some(execution_id.clone());
        if let Some(pending) = pending {
            pending.assigned_id = Some(execution_id);
        }
        self.sync();
    }

    fn on_frame(&mut self, raw: &str) {
        let event = match parse_frame(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    target: "relay::runner",
                    agent_id = %self.agent_id,
                    error = %e,
                    "Dropping malformed frame"
                );
                return;
            }
        };

        match event {
            AgentEvent::TextDelta { text, meta } => {
                self.append_text(&text, meta.execution_id);
                self.sync();
                self.publish();
            }
            AgentEvent::Trace {
                execution_id,
                event,
                ..
            } => self.apply_trace(&execution_id, &event),
            AgentEvent::Unknown { kind } => {
                tracing::debug!(
                    target: "relay::runner",
                    agent_id = %self.agent_id,
                    kind = %kind,
                    trace_kind = is_trace_kind(&kind),
                    "Ignoring unhandled frame type"
                );
            }
        }
    }

    fn append_text(&mut self, text: &str, execution_id: Option<String>) {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Agent => last.content.push_str(text),
            _ => self.messages.push(Message::agent(text, execution_id)),
        }
    }

    fn apply_trace(&mut self, execution_id: &str, event: &TraceEvent) {
        let reducer = &mut self.reducer;
        let changed = self
            .debug
            .try_update(|data| reducer.reduce(data, execution_id, event));
        if changed {
            self.publish();
        }
    }

    fn finish(&mut self, result: Result<(), AgentError>) {
        let Some(mut attempt) = self.attempt.take() else {
            return;
        };

        self.sync();

        match &result {
            Ok(()) => tracing::info!(
                target: "relay::runner",
                agent_id = %self.agent_id,
                attempt = attempt.id,
                "Agent stream finished"
            ),
            Err(err) => {
                tracing::warn!(
                    target: "relay::runner",
                    agent_id = %self.agent_id,
                    attempt = attempt.id,
                    error = %err,
                    "Agent stream failed"
                );
                if let Some(pending) = &attempt.pending_user {
                    self.restore_user_message(pending);
                }
            }
        }

        self.publish();
        if let Some(reply) = attempt.reply.take() {
            let _ = reply.send(result);
        }
    }

    fn restore_user_message(&mut self, pending: &PendingUserMessage) {
        if self.messages.iter().any(|m| pending.matches(m)) {
            return;
        }

        let execution_id = pending
            .assigned_id
            .clone()
            .unwrap_or_else(|| pending.provisional_id.clone());
        self.messages
            .push(Message::user(pending.content.clone(), Some(execution_id)));
        self.sync();
    }

    fn cancel_attempt(&mut self) {
        let Some(mut attempt) = self.attempt.take() else {
            return;
        };

        attempt.token.cancel();
        tracing::debug!(
            target: "relay::runner",
            agent_id = %self.agent_id,
            attempt = attempt.id,
            "Cancelled in-flight agent stream"
        );

        if let Some(reply) = attempt.reply.take() {
            let _ = reply.send(Err(AgentError::Cancelled));
        }
    }

    fn sync(&mut self) {
        self.sessions.sync(Some(&self.messages));
    }

    fn build_state(&self) -> AgentRunnerState {
        AgentRunnerState {
            agent_id: self.agent_id.clone(),
            messages: self.messages.clone(),
            in_progress: self.attempt.is_some(),
            session_id: self.sessions.current_session_id().to_string(),
            sessions: self.sessions.sessions(),
            debug_data: self.debug.get(),
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.build_state());
    }
}

async fn run_attempt(
    transport: Arc<dyn AgentTransport>,
    request: AgentRequest,
    attempt: u64,
    token: CancellationToken,
    signal_tx: mpsc::UnboundedSender<AttemptMsg>,
) {
    let send = |signal: AttemptSignal| {
        let _ = signal_tx.send(AttemptMsg { attempt, signal });
    };

    let result = tokio::select! {
        biased;
        () = token.cancelled() => return,
        result = stream_attempt(transport.as_ref(), request, &send) => result,
    };

    match result {
        Ok(()) => send(AttemptSignal::Closed),
        Err(err) => send(AttemptSignal::Failed(err)),
    }
}

async fn stream_attempt(
    transport: &dyn AgentTransport,
    request: AgentRequest,
    send: &impl Fn(AttemptSignal),
) -> Result<(), AgentError> {
    let url = request.url.clone();
    let response = transport.open(request).await?;

    match response.status {
        404 => return Err(AgentError::NotFound { url }),
        status if status >= 400 => return Err(AgentError::RequestFailed { url, status }),
        _ => {}
    }

    send(AttemptSignal::Opened {
        session_id: response.session_id,
        session_name: response.session_name,
        execution_id: response.execution_id,
    });

    let mut frames = response.frames;
    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(|e| match e {
            AgentError::ExecutionFailed { .. } => e,
            other => AgentError::execution_failed(other.to_string()),
        })?;
        send(AttemptSignal::Frame(frame));
    }

    Ok(())
}
