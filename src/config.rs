//! Client configuration.
//!
//! Defaults, then an optional `config.toml` in the data directory, then the
//! environment (a `.env` file is honored).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_WS_URL: &str = "http://localhost:5000";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// REST base, including the `/api` prefix
    pub api_url: String,

    /// Realtime service root
    pub ws_url: String,

    /// Where `session.json` and `config.toml` live
    pub home: PathBuf,

    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            home: default_home(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Load configuration from `config.toml` and environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Ok(home) = std::env::var("MATH_MENTOR_HOME") {
            config.home = PathBuf::from(home);
        }

        let file = config.home.join("config.toml");
        if file.exists() {
            config.merge_file(&FileConfig::load(&file)?);
        }

        config.merge_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Everything rooted at `home`, ignoring the environment.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    pub fn merge_file(&mut self, file: &FileConfig) {
        if let Some(url) = &file.api_url {
            self.api_url = url.clone();
        }
        if let Some(url) = &file.ws_url {
            self.ws_url = url.clone();
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
    }

    fn merge_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("MATH_MENTOR_API_URL") {
            self.api_url = url;
        }
        if let Some(url) = var("MATH_MENTOR_WS_URL") {
            self.ws_url = url;
        }
        if let Some(secs) = var("MATH_MENTOR_REQUEST_TIMEOUT_SECS") {
            self.request_timeout = parse_secs("MATH_MENTOR_REQUEST_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = var("MATH_MENTOR_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout = parse_secs("MATH_MENTOR_CONNECT_TIMEOUT_SECS", &secs)?;
        }
        Ok(())
    }

    pub fn session_path(&self) -> PathBuf {
        self.home.join("session.json")
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config in {}", path.display()))
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds, got {value:?}"))?;
    Ok(Duration::from_secs(secs))
}

fn default_home() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".math-mentor")
}
