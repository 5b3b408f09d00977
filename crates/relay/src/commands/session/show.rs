use async_trait::async_trait;
use eyre::{Result, eyre};

use relay_core::session::{Role, SessionRepository};

use super::super::{Command, format_millis};

pub struct ShowSessionCommand {
    pub session_id: String,
    pub repository: SessionRepository,
}

#[async_trait]
impl Command for ShowSessionCommand {
    async fn execute(&self) -> Result<()> {
        let session = self
            .repository
            .session(&self.session_id)
            .ok_or_else(|| eyre!("Session not found: {}", self.session_id))?;

        println!("Session Details:");
        println!("ID: {}", session.id);
        println!("Name: {}", session.name.as_deref().unwrap_or("N/A"));
        println!("Created: {}", format_millis(session.created_at));
        println!("Updated: {}", format_millis(session.updated_at));
        println!("Messages: {}", session.messages.len());
        println!();

        for message in &session.messages {
            let speaker = match message.role {
                Role::User => "user",
                Role::Agent => "agent",
            };
            match &message.execution_id {
                Some(execution_id) => println!("[{speaker}] ({execution_id})"),
                None => println!("[{speaker}]"),
            }
            println!("{}", message.content);
            println!();
        }

        Ok(())
    }
}
