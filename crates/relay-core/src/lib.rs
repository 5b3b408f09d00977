// Client-side session and stream-reconstruction engine for streaming agents

pub mod config;
pub mod error;
pub mod runner;
pub mod session;
pub mod storage;
pub mod stream;
pub mod test_utils;
pub mod trace;
pub mod utils;

pub use error::{AgentError, Error, Result, StorageError};
pub use runner::{AgentEndpoint, AgentHandle, AgentRegistry, AgentRunnerState, SendOptions};
