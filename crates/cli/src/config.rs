use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use chicken_core::Config;

/// CLI configuration loaded from TOML file.
///
/// Every field is optional; a set field overrides the environment-derived
/// [`Config`], and command-line flags override both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Backend base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    /// Agent for new sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,

    /// Model override sent with each message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Messages fetched per history page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_page_size: Option<u32>,

    /// Give up on a silent stream after this many seconds (0 disables)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_idle_timeout_secs: Option<u64>,

    /// Show backend progress messages while waiting for a reply
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_show_progress() -> bool {
    true
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            agent_type: None,
            model: None,
            history_page_size: None,
            stream_idle_timeout_secs: None,
            show_progress: default_show_progress(),
        }
    }
}

impl CliConfig {
    /// Return the default config directory path: ~/.config/chicken-cli/
    pub fn default_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("chicken-cli");
        Ok(config_dir)
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from the given path, or the default path.
    /// Writes and returns a default config if the file does not exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("failed to parse config: {}", config_path.display()))?;
            Ok(config)
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            let config = Self::default();
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let toml_str =
                toml::to_string_pretty(&config).context("failed to serialize default config")?;
            std::fs::write(&config_path, toml_str).ok();
            Ok(config)
        }
    }

    /// Overlay the file's values onto an env-derived config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.server_url {
            config.backend.url = url.clone();
        }
        if let Some(agent_type) = &self.agent_type {
            config.backend.agent_type = agent_type.clone();
        }
        if let Some(page_size) = self.history_page_size {
            config.streaming.history_page_size = page_size;
        }
        if let Some(secs) = self.stream_idle_timeout_secs {
            config.streaming.idle_timeout_secs = (secs > 0).then_some(secs);
        }
    }

    /// Resolve the model override.
    /// Priority: cli_override > config file > none (backend default).
    pub fn resolve_model(&self, cli_override: Option<&str>) -> Option<String> {
        cli_override
            .map(str::to_string)
            .or_else(|| self.model.clone())
            .filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        let mut config = Config::for_profile("clicfgtest");
        config.backend.url = "http://127.0.0.1:8009".to_string();
        config.backend.agent_type = "chat".to_string();
        config.streaming.idle_timeout_secs = None;
        config
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = CliConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert!(config.show_progress);
        assert!(config.server_url.is_none());
        assert!(path.exists());

        let reloaded = CliConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "server_url = \"http://backend:9000\"\nagent_type = \"search\"\nshow_progress = false\n",
        )
        .unwrap();

        let config = CliConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.server_url.as_deref(), Some("http://backend:9000"));
        assert_eq!(config.agent_type.as_deref(), Some("search"));
        assert!(!config.show_progress);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server_url = [").unwrap();
        assert!(CliConfig::load(Some(path.to_str().unwrap())).is_err());
    }

    #[test]
    fn test_apply_overrides_only_set_fields() {
        let file = CliConfig {
            agent_type: Some("search".into()),
            stream_idle_timeout_secs: Some(0),
            ..CliConfig::default()
        };
        let mut config = base_config();
        config.streaming.idle_timeout_secs = Some(60);
        file.apply(&mut config);

        assert_eq!(config.backend.url, "http://127.0.0.1:8009");
        assert_eq!(config.backend.agent_type, "search");
        assert!(config.streaming.idle_timeout().is_none());
    }

    #[test]
    fn test_resolve_model_priority() {
        let file = CliConfig {
            model: Some("from-file".into()),
            ..CliConfig::default()
        };
        assert_eq!(file.resolve_model(Some("from-cli")).as_deref(), Some("from-cli"));
        assert_eq!(file.resolve_model(None).as_deref(), Some("from-file"));
        assert_eq!(CliConfig::default().resolve_model(None), None);
    }
}
