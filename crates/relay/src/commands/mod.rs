use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use eyre::Result;

use relay_core::config::RelayConfig;
use relay_core::storage::{FileStore, KeyValueStore};

pub mod send;
pub mod session;
pub mod trace;

#[async_trait]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Config and storage shared by every command.
#[derive(Clone)]
pub struct AppContext {
    pub config: RelayConfig,
    pub store: Arc<dyn KeyValueStore>,
}

impl AppContext {
    pub fn load(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = RelayConfig::load(config_path)?;
        if let Some(dir) = data_dir {
            config.storage.dir = Some(dir);
        }

        let store: FileStore = config.file_store()?;
        tracing::debug!(data_dir = %store.dir().display(), "Using file store");

        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }
}

pub(crate) fn format_millis(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "N/A".to_string(),
    }
}
