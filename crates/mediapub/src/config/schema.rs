use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::publisher::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Falls back to `~/.mediapub/data/mediapub.db` when unset.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub executors: ExecutorConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub publishers: PublishersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            log_level: default_log_level(),
            log_json: false,
            executors: ExecutorConfig::default(),
            retry: RetryPolicy::default(),
            encryption: EncryptionConfig::default(),
            publishers: PublishersConfig::default(),
        }
    }
}

impl Config {
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on how long an idle executor sleeps before re-checking
    /// for delayed jobs.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Environment variable holding the 64 hex char media key.
    #[serde(default = "default_key_env_var")]
    pub key_env_var: String,
    #[serde(default)]
    pub encrypt_at_rest: bool,
}

fn default_key_env_var() -> String {
    crate::encryption::MEDIA_KEY_ENV_VAR.to_string()
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_env_var: default_key_env_var(),
            encrypt_at_rest: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishersConfig {
    #[serde(default)]
    pub storymaker: StoryMakerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryMakerConfig {
    #[serde(default = "default_render_spec")]
    pub render_spec: Option<String>,
}

fn default_render_spec() -> Option<String> {
    Some("mp4".to_string())
}

impl Default for StoryMakerConfig {
    fn default() -> Self {
        Self {
            render_spec: default_render_spec(),
        }
    }
}
