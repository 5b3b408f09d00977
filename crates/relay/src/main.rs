use clap::Parser;
use eyre::Result;

use relay::cli::{Cli, Commands};
use relay::commands::{
    AppContext, Command, send::SendCommand, session::SessionCommand, trace::TraceCommand,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Level configured via RUST_LOG, file output via RELAY_LOG_DIR
    relay_core::utils::tracing::init_tracing()?;

    let context = AppContext::load(cli.config.as_deref(), cli.data_dir.clone())?;

    match cli.command {
        Commands::Send {
            agent,
            url,
            session,
            new,
            skip_user_message,
            test_build_id,
            input,
        } => {
            let cmd = SendCommand {
                agent,
                url,
                session,
                new,
                skip_user_message,
                test_build_id,
                input,
                context,
            };
            cmd.execute().await
        }
        Commands::Session { agent, command } => {
            let cmd = SessionCommand {
                agent,
                command,
                context,
            };
            cmd.execute().await
        }
        Commands::Trace { execution_id, json } => {
            let cmd = TraceCommand {
                execution_id,
                json,
                context,
            };
            cmd.execute().await
        }
    }
}
