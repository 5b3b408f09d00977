use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

use relay_core::runner::SharedStores;
use relay_core::session::SessionRepository;

use super::{AppContext, Command};
use crate::cli::SessionCommands;

mod delete;
mod list;
mod show;

pub use delete::DeleteSessionCommand;
pub use list::ListSessionCommand;
pub use show::ShowSessionCommand;

pub struct SessionCommand {
    pub agent: String,
    pub command: SessionCommands,
    pub context: AppContext,
}

impl SessionCommand {
    fn repository(&self) -> SessionRepository {
        let stores = SharedStores::open(self.context.store.clone());
        SessionRepository::new(self.agent.clone(), Arc::clone(&stores.conversations))
    }
}

#[async_trait]
impl Command for SessionCommand {
    async fn execute(&self) -> Result<()> {
        match &self.command {
            SessionCommands::List => {
                let cmd = ListSessionCommand {
                    repository: self.repository(),
                };
                cmd.execute().await
            }
            SessionCommands::Show { session_id } => {
                let cmd = ShowSessionCommand {
                    session_id: session_id.clone(),
                    repository: self.repository(),
                };
                cmd.execute().await
            }
            SessionCommands::Delete { session_id, force } => {
                let cmd = DeleteSessionCommand {
                    session_id: session_id.clone(),
                    force: *force,
                    repository: std::sync::Mutex::new(self.repository()),
                };
                cmd.execute().await
            }
        }
    }
}
