use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChickenError;
use crate::session::DEFAULT_AGENT_TYPE;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64_opt(profile: &str, key: &str) -> Option<u64> {
    profiled_env_opt(profile, key).and_then(|v| v.parse().ok())
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub backend: BackendConfig,
    pub streaming: StreamingConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CHICKEN_PROFILE`. When set (e.g. `DEV`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CHICKEN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            backend: BackendConfig::from_env_profiled(p),
            streaming: StreamingConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject values that would only fail later at request time.
    pub fn validate(&self) -> Result<(), ChickenError> {
        url::Url::parse(&self.backend.url).map_err(|_| ChickenError::InvalidConfig {
            key: "CHICKEN_BACKEND_URL".to_string(),
            value: self.backend.url.clone(),
        })?;
        if self.streaming.history_page_size == 0 {
            return Err(ChickenError::InvalidConfig {
                key: "CHICKEN_HISTORY_PAGE_SIZE".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  backend:     url={}, agent_type={}", self.backend.url, self.backend.agent_type);
        tracing::info!(
            "  streaming:   page_size={}, idle_timeout={}",
            self.streaming.history_page_size,
            self.streaming
                .idle_timeout_secs
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "(none)".to_string())
        );
    }
}

// ── Backend ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    /// Agent that answers messages (`agent_type` query parameter).
    pub agent_type: String,
    /// Timeout for non-streaming requests.
    pub request_timeout_secs: u64,
}

impl BackendConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_or(p, "CHICKEN_BACKEND_URL", "http://127.0.0.1:8009"),
            agent_type: profiled_env_or(p, "CHICKEN_AGENT_TYPE", DEFAULT_AGENT_TYPE),
            request_timeout_secs: profiled_env_u64_opt(p, "CHICKEN_REQUEST_TIMEOUT_SECS")
                .unwrap_or(30),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ── Streaming ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Messages requested per history page.
    pub history_page_size: u32,
    /// Abandon a stream after this long without a frame. `None` waits forever.
    pub idle_timeout_secs: Option<u64>,
}

impl StreamingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            history_page_size: profiled_env_u32(p, "CHICKEN_HISTORY_PAGE_SIZE", 200),
            idle_timeout_secs: profiled_env_u64_opt(p, "CHICKEN_STREAM_IDLE_TIMEOUT_SECS")
                .filter(|s| *s > 0),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            history_page_size: 200,
            idle_timeout_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Uses a profile name no other test sets, so env mutation stays isolated.
    #[test]
    fn test_profiled_lookup_prefers_prefix() {
        env::set_var("CFGTEST_CHICKEN_AGENT_TYPE", "search");
        let config = Config::for_profile("cfgtest");
        assert_eq!(config.profile, "CFGTEST");
        assert_eq!(config.backend.agent_type, "search");
        env::remove_var("CFGTEST_CHICKEN_AGENT_TYPE");
    }

    #[test]
    fn test_idle_timeout_zero_means_disabled() {
        env::set_var("ZEROTEST_CHICKEN_STREAM_IDLE_TIMEOUT_SECS", "0");
        let config = Config::for_profile("zerotest");
        assert!(config.streaming.idle_timeout().is_none());
        env::remove_var("ZEROTEST_CHICKEN_STREAM_IDLE_TIMEOUT_SECS");
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = Config::for_profile("validatetest");
        config.backend.url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ChickenError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let mut config = Config::for_profile("defaultstest");
        config.backend.url = "http://127.0.0.1:8009".to_string();
        config.streaming = StreamingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.profile_label(), "DEFAULTSTEST");
    }
}
