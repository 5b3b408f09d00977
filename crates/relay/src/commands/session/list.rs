use std::io::Write;

use async_trait::async_trait;
use eyre::Result;

use relay_core::session::SessionRepository;

use super::super::{Command, format_millis};

pub struct ListSessionCommand {
    pub repository: SessionRepository,
}

#[async_trait]
impl Command for ListSessionCommand {
    async fn execute(&self) -> Result<()> {
        let sessions = self.repository.sessions();
        let mut stdout = std::io::stdout();

        if sessions.is_empty() {
            writeln!(
                stdout,
                "No sessions found for agent {}.",
                self.repository.agent_id()
            )?;
            return Ok(());
        }

        let current = self.repository.current_session_id();
        writeln!(
            stdout,
            "  {:<36} {:<20} {:<20} {:<10} {:<30}",
            "ID", "Created", "Updated", "Messages", "Name"
        )?;
        writeln!(stdout, "{}", "-".repeat(120))?;

        for session in sessions {
            let marker = if session.id == current { "*" } else { " " };
            writeln!(
                stdout,
                "{} {:<36} {:<20} {:<20} {:<10} {:<30}",
                marker,
                session.id,
                format_millis(session.created_at),
                format_millis(session.updated_at),
                session.messages.len(),
                session.name.as_deref().unwrap_or("N/A"),
            )?;
        }

        Ok(())
    }
}
