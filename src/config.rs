use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::store::DEFAULT_PAGE_SIZE;
use crate::view::Targets;

/// Runtime configuration, read from an optional TOML file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Holds the users file and the document snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Maximum records fetched per collection
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub monthly_target: Targets,
    /// Feed the mirrors from push snapshots rather than one-shot loads
    #[serde(default = "default_true")]
    pub live_updates: bool,
    /// Browsers silent for this many seconds lose their server-side state
    #[serde(default = "default_client_idle_secs")]
    pub client_idle_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("database")
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_true() -> bool {
    true
}

fn default_client_idle_secs() -> u64 {
    30 * 60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            data_dir: default_data_dir(),
            page_size: default_page_size(),
            monthly_target: Targets::default(),
            live_updates: true,
            client_idle_secs: default_client_idle_secs(),
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn documents_path(&self) -> PathBuf {
        self.data_dir.join("documents.json.gz")
    }

    pub fn client_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.client_idle_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn partial_targets_keep_other_defaults() {
        let config = Config::parse(
            r#"
            bind = "0.0.0.0:8080"
            page_size = 50

            [monthly_target]
            total = 800
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.monthly_target.total, 800);
        assert_eq!(config.monthly_target.complete, 400);
        assert_eq!(config.data_dir, PathBuf::from("database"));
        assert_eq!(config.client_idle_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load(Some(Path::new("/nonexistent/waspa.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
