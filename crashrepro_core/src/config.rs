use crate::error::ReproError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERVICE_URL: &str = "https://clusterfuzz.com";
pub const DEFAULT_USER_DATA_DIR: &str = "/tmp/clusterfuzz-user-data-dir";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for ReproError {
    fn from(err: ConfigError) -> Self {
        ReproError::Config(err.to_string())
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ReproduceSettings {
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_kill_wait_ms")]
    pub kill_wait_ms: u64,
    #[serde(default)]
    pub disable_xvfb: bool,
    #[serde(default)]
    pub target_args: String,
    #[serde(default)]
    pub edit_mode: bool,
    #[serde(default)]
    pub enable_debug: bool,
}

pub fn default_iterations() -> u32 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_delay_ms() -> u64 {
    3_000
}

fn default_kill_wait_ms() -> u64 {
    3_000
}

impl Default for ReproduceSettings {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            timeout_secs: default_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            kill_wait_ms: default_kill_wait_ms(),
            disable_xvfb: false,
            target_args: String::new(),
            edit_mode: false,
            enable_debug: false,
        }
    }
}

impl ReproduceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_millis(self.kill_wait_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ServiceSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_auth_header_file")]
    pub auth_header_file: PathBuf,
}

fn default_base_url() -> String {
    DEFAULT_SERVICE_URL.to_string()
}

pub fn default_auth_header_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clusterfuzz")
        .join("auth_header")
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_header_file: default_auth_header_file(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PathSettings {
    #[serde(default = "default_resources_dir")]
    pub resources_dir: PathBuf,
    #[serde(default = "default_testcases_dir")]
    pub testcases_dir: PathBuf,
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: PathBuf,
}

fn clusterfuzz_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clusterfuzz")
}

pub fn default_resources_dir() -> PathBuf {
    clusterfuzz_dir().join("resources")
}

pub fn default_testcases_dir() -> PathBuf {
    clusterfuzz_dir().join("testcases")
}

fn default_user_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_USER_DATA_DIR)
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            resources_dir: default_resources_dir(),
            testcases_dir: default_testcases_dir(),
            user_data_dir: default_user_data_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ReproConfig {
    #[serde(default)]
    pub reproduce: ReproduceSettings,
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

impl ReproConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reproduce.iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "reproduce.iterations",
                reason: "must be at least 1".into(),
            });
        }
        if self.reproduce.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "reproduce.timeout-secs",
                reason: "must be at least 1".into(),
            });
        }
        if !self.service.base_url.starts_with("http://")
            && !self.service.base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid {
                field: "service.base-url",
                reason: format!("{:?} is not an http(s) URL", self.service.base_url),
            });
        }
        Ok(())
    }
}
