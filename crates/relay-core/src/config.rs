use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::storage::FileStore;
use crate::utils::paths::AppPaths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the persisted regions; platform data dir when unset.
    pub dir: Option<PathBuf>,
    /// Largest region, in bytes, the store accepts.
    pub quota_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub url: String,
    pub test_build_id: Option<String>,
    /// Sent as the request's `context` object.
    #[serde(default)]
    pub context: Option<toml::Table>,
}

impl AgentConfig {
    pub fn context_json(&self) -> Value {
        self.context
            .as_ref()
            .and_then(|table| serde_json::to_value(table).ok())
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

impl RelayConfig {
    /// Load from `path`, or the default location when `None`.
    ///
    /// A missing file yields defaults. A file that fails to parse is logged
    /// and also yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => AppPaths::config_file().ok_or_else(|| {
                Error::Configuration("Could not determine config directory".to_string())
            })?,
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse config file at {:?}: {}. Using defaults.",
                    path,
                    e
                );
                Ok(Self::default())
            }
        }
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.agents.get(agent_id)
    }

    /// File store for the configured directory and quota.
    pub fn file_store(&self) -> Result<FileStore> {
        let store = match &self.storage.dir {
            Some(dir) => FileStore::new(dir),
            None => FileStore::default_location().ok_or_else(|| {
                Error::Configuration("Could not determine data directory".to_string())
            })?,
        };
        Ok(store.with_quota(self.storage.quota_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_agents_and_storage() {
        let config: RelayConfig = toml::from_str(
            r#"
            [storage]
            dir = "/tmp/relay"
            quota_bytes = 1024

            [agents.support]
            url = "https://example.com/agent"
            test_build_id = "build_1"
            context = { locale = "en" }
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.quota_bytes, Some(1024));
        let agent = config.agent("support").unwrap();
        assert_eq!(agent.url, "https://example.com/agent");
        assert_eq!(agent.test_build_id.as_deref(), Some("build_1"));
        assert_eq!(agent.context_json(), serde_json::json!({"locale": "en"}));
    }

    #[test]
    fn missing_context_is_an_empty_object() {
        let agent = AgentConfig {
            url: "http://localhost".into(),
            test_build_id: None,
            context: None,
        };
        assert_eq!(agent.context_json(), serde_json::json!({}));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RelayConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(config.agents.is_empty());
    }

    #[test]
    fn unparseable_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "agents = 3 = 4").unwrap();

        let config = RelayConfig::load(Some(&path)).unwrap();
        assert!(config.agents.is_empty());
    }
}
