use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, eyre};

use relay_core::runner::{
    AgentEndpoint, AgentRegistry, AgentRunnerState, HttpTransport, SendOptions,
};
use relay_core::session::Role;

use super::{AppContext, Command};

pub struct SendCommand {
    pub agent: String,
    pub url: Option<String>,
    pub session: Option<String>,
    pub new: bool,
    pub skip_user_message: bool,
    pub test_build_id: Option<String>,
    pub input: String,
    pub context: AppContext,
}

impl SendCommand {
    fn endpoint(&self) -> Result<AgentEndpoint> {
        let configured = self.context.config.agent(&self.agent);
        let url = self
            .url
            .clone()
            .or_else(|| configured.map(|agent| agent.url.clone()))
            .ok_or_else(|| {
                eyre!(
                    "No URL for agent '{}': pass --url or add [agents.{}] to the config file",
                    self.agent,
                    self.agent
                )
            })?;

        let mut endpoint = AgentEndpoint::new(url);
        if let Some(agent) = configured {
            endpoint = endpoint
                .with_context(agent.context_json())
                .with_test_build_id(agent.test_build_id.clone());
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl Command for SendCommand {
    async fn execute(&self) -> Result<()> {
        let endpoint = self.endpoint()?;
        let registry = AgentRegistry::install(AgentRegistry::new(
            self.context.store.clone(),
            Arc::new(HttpTransport::new()),
        ))?;
        let handle = registry.acquire(&self.agent, endpoint)?;

        if self.new {
            handle.switch_session(None).await?;
        } else if let Some(session_id) = &self.session {
            handle.switch_session(Some(session_id.clone())).await?;
        }

        let mut printer = ReplyPrinter::new(&handle.snapshot().await?);
        let mut updates = handle.subscribe();

        let options = SendOptions {
            skip_user_message: self.skip_user_message,
            test_build_id: self.test_build_id.clone(),
            ..Default::default()
        };
        let send = handle.send(self.input.clone(), options);
        tokio::pin!(send);

        let result = loop {
            tokio::select! {
                result = &mut send => break result,
                Ok(()) = updates.changed() => {
                    let state = updates.borrow_and_update().clone();
                    printer.print(&state)?;
                }
            }
        };

        let state = handle.snapshot().await?;
        printer.print(&state)?;
        printer.finish()?;

        result.map_err(|e| eyre!("Agent request failed: {}", e))?;

        if !relay_core::session::is_temporary(&state.session_id) {
            tracing::info!(session_id = %state.session_id, "Conversation saved");
        }
        Ok(())
    }
}

/// Writes the reply to stdout as it grows.
///
/// A transcript that already ends with an agent message may have the reply
/// appended to it, so only the text beyond its initial length counts.
struct ReplyPrinter {
    start: usize,
    skip: usize,
    current: Option<usize>,
    printed: usize,
}

impl ReplyPrinter {
    fn new(before: &AgentRunnerState) -> Self {
        let (start, skip) = match before.messages.last() {
            Some(last) if last.role == Role::Agent => {
                (before.messages.len() - 1, last.content.len())
            }
            _ => (before.messages.len(), 0),
        };
        Self {
            start,
            skip,
            current: None,
            printed: 0,
        }
    }

    fn print(&mut self, state: &AgentRunnerState) -> Result<()> {
        let Some((index, reply)) = reply_text(state, self.start, self.skip) else {
            return Ok(());
        };
        if self.current != Some(index) {
            self.current = Some(index);
            self.printed = 0;
        }
        let Some(unseen) = reply.get(self.printed..) else {
            return Ok(());
        };
        if unseen.is_empty() {
            return Ok(());
        }

        let mut stdout = std::io::stdout();
        stdout.write_all(unseen.as_bytes())?;
        stdout.flush()?;
        self.printed = reply.len();
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if self.printed > 0 {
            writeln!(std::io::stdout())?;
        }
        Ok(())
    }
}

/// Index and new text of the latest agent message at or after `start`. For the
/// message at `start` itself, its first `skip` bytes predate this send.
fn reply_text(state: &AgentRunnerState, start: usize, skip: usize) -> Option<(usize, &str)> {
    let (index, message) = state
        .messages
        .iter()
        .enumerate()
        .skip(start)
        .filter(|(_, message)| message.role == Role::Agent)
        .last()?;

    let text = if index == start {
        message.content.get(skip..)?
    } else {
        message.content.as_str()
    };
    Some((index, text))
}
