use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::time::Duration;

use crate::security::cipher::CipherCodec;
use crate::security::policy::{MatchMode, PolicyEntry, PolicyTable};

pub const BASE_URL_ENV: &str = "API_BASE_URL";
pub const ENCRYPTION_KEY_ENV: &str = "API_ENCRYPTION_SECRET_KEY";
pub const TIMEOUT_ENV: &str = "API_TIMEOUT_SECS";
pub const MATCH_MODE_ENV: &str = "API_POLICY_MATCH_MODE";

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Base64 AES-256 key. Absent means encryption is disabled.
    #[serde(default, skip_serializing)]
    pub encryption_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Replaces the built-in policy table when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<Vec<PolicyEntry>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            encryption_key: None,
            timeout_secs: default_timeout_secs(),
            match_mode: MatchMode::default(),
            refresh_path: default_refresh_path(),
            policies: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("match_mode", &self.match_mode)
            .field("refresh_path", &self.refresh_path)
            .field("policies", &self.policies.as_ref().map(Vec::len))
            .finish()
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let cfg: Config = serde_json::from_str(&raw).context("parsing config JSON")?;
        Ok(cfg)
    }

    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Load from `path` if given, then apply environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            self.base_url = url;
        }
        if let Ok(key) = std::env::var(ENCRYPTION_KEY_ENV) {
            self.encryption_key = Some(key);
        }
        if let Ok(secs) = std::env::var(TIMEOUT_ENV) {
            self.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("parsing {TIMEOUT_ENV}"))?;
        }
        if let Ok(mode) = std::env::var(MATCH_MODE_ENV) {
            self.match_mode = mode.parse()?;
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn codec(&self) -> Result<CipherCodec> {
        CipherCodec::from_base64_key(self.encryption_key.as_deref())
            .context("loading encryption key")
    }

    pub fn policy_table(&self) -> Result<PolicyTable> {
        match &self.policies {
            Some(entries) => PolicyTable::from_entries(entries, self.match_mode),
            None => Ok(PolicyTable::defaults().with_match_mode(self.match_mode)),
        }
    }
}
