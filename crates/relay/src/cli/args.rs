use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Talk to streaming agents and inspect the sessions and traces they leave behind.
#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the config file (defaults to the platform config dir, e.g. ~/.config/relay/config.toml)
    #[arg(long, env = "RELAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Directory for persisted sessions and traces (overrides the config file)
    #[arg(long, env = "RELAY_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Send a message and stream the reply to stdout
    Send {
        /// Agent id, as configured under [agents.<id>]
        #[arg(long)]
        agent: String,
        /// Endpoint URL (overrides the configured one)
        #[arg(long)]
        url: Option<String>,
        /// Continue this session instead of the most recent one
        #[arg(long, conflicts_with = "new")]
        session: Option<String>,
        /// Start a new conversation
        #[arg(long)]
        new: bool,
        /// Do not record the input as a user message
        #[arg(long)]
        skip_user_message: bool,
        /// Test build to run (overrides the configured one)
        #[arg(long)]
        test_build_id: Option<String>,
        /// Message to send
        input: String,
    },
    /// Manage stored sessions
    Session {
        /// Agent id whose sessions to manage
        #[arg(long)]
        agent: String,
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Print the stored execution trace for an execution id
    Trace {
        execution_id: String,
        /// Print the raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum SessionCommands {
    /// List sessions, most recently updated first
    List,
    /// Show a session's transcript
    Show { session_id: String },
    /// Delete a session
    Delete {
        session_id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}
