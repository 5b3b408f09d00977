pub mod cli;
pub mod commands;

pub use relay_core::{config, runner, session, storage, trace, utils};
