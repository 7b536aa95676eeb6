//! Bot configuration
//!
//! Read once at startup from a YAML file. Every field has a default, so a missing file
//! gives a working bot.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CONDEMNER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/condemner.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Prefix for text commands
    pub prefix: String,
    pub vote_window_secs: u64,
    /// Root of the guild settings and saved restrictions
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: "!jail ".to_string(),
            vote_window_secs: 60,
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl BotConfig {
    /// Load from `$CONDEMNER_CONFIG`, or the default path
    ///
    /// # Errors
    /// See [`BotConfig::load`].
    pub async fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(path).await
    }

    /// Load from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    #[must_use]
    pub fn vote_window(&self) -> Duration {
        Duration::from_secs(self.vote_window_secs)
    }

    #[must_use]
    pub fn guild_settings_dir(&self) -> PathBuf {
        self.data_dir.join("guild-configs")
    }

    #[must_use]
    pub fn restrictions_dir(&self) -> PathBuf {
        self.data_dir.join("jail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("condemner-{}.yaml", uuid::Uuid::new_v4()));
        let config = BotConfig::load(&path).await.unwrap();
        assert_eq!(config, BotConfig::default());
        assert_eq!(config.vote_window(), Duration::from_secs(60));
        assert_eq!(config.restrictions_dir(), PathBuf::from("data/jail"));
        assert_eq!(config.guild_settings_dir(), PathBuf::from("data/guild-configs"));
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let path = std::env::temp_dir().join(format!("condemner-{}.yaml", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "vote_window_secs: 30\ndata_dir: /srv/condemner\n")
            .await
            .unwrap();

        let config = BotConfig::load(&path).await.unwrap();
        assert_eq!(config.vote_window(), Duration::from_secs(30));
        assert_eq!(config.data_dir, PathBuf::from("/srv/condemner"));
        assert_eq!(config.prefix, "!jail ");

        tokio::fs::write(&path, "vote_window_secs: [nope\n").await.unwrap();
        assert!(matches!(
            BotConfig::load(&path).await,
            Err(ConfigError::Parse { .. })
        ));
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
