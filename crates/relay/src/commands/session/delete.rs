use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use eyre::{Result, eyre};

use relay_core::session::SessionRepository;

use super::super::Command;

fn confirm_prompt(prompt: &str) -> Result<bool> {
    let mut stdout = io::stdout();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().to_lowercase().starts_with('y'))
}

pub struct DeleteSessionCommand {
    pub session_id: String,
    pub force: bool,
    pub repository: Mutex<SessionRepository>,
}

#[async_trait]
impl Command for DeleteSessionCommand {
    async fn execute(&self) -> Result<()> {
        let mut repository = self
            .repository
            .lock()
            .map_err(|e| eyre!("Session repository lock poisoned: {}", e))?;

        if repository.session(&self.session_id).is_none() {
            return Err(eyre!("Session not found: {}", self.session_id));
        }

        if !self.force
            && !confirm_prompt(&format!(
                "Are you sure you want to delete session {}? (y/N): ",
                self.session_id
            ))?
        {
            writeln!(io::stdout(), "Deletion cancelled.")?;
            return Ok(());
        }

        repository.delete_session(&self.session_id);
        writeln!(io::stdout(), "Session {} deleted.", self.session_id)?;
        Ok(())
    }
}
