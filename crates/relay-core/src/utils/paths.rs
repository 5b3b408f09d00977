use std::path::PathBuf;

/// Standardized application directories for Relay.
pub struct AppPaths;

impl AppPaths {
    /// Return the user-level config directory (platform-specific)
    pub fn user_config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "relay").map(|d| d.config_dir().to_path_buf())
    }

    /// Return the user-level data directory (platform-specific)
    pub fn user_data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "relay").map(|d| d.data_dir().to_path_buf())
    }

    /// Return the user-level config file path (platform-specific)
    pub fn config_file() -> Option<PathBuf> {
        Self::user_config_dir().map(|d| d.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_lives_in_user_config_dir() {
        if let Some(dir) = AppPaths::user_config_dir() {
            assert_eq!(AppPaths::config_file(), Some(dir.join("config.toml")));
        } else {
            assert_eq!(AppPaths::config_file(), None);
        }
    }
}
