//! CLI configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunklift/cli.toml`
//! - Windows: `%APPDATA%/chunklift/cli.toml`
//!
//! Every key is optional; command-line flags override the file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chunklift_uploader::EngineConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Base URL of the upload server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How many times an interrupted or merge-paused task is resumed
    /// automatically before it counts as failed.
    #[serde(default = "default_auto_resume")]
    pub auto_resume: u32,

    /// Delay before an automatic resume.
    #[serde(default = "default_auto_resume_delay_ms")]
    pub auto_resume_delay_ms: u64,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8080".into()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_auto_resume() -> u32 {
    3
}

fn default_auto_resume_delay_ms() -> u64 {
    1000
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_secs: default_request_timeout_secs(),
            auto_resume: default_auto_resume(),
            auto_resume_delay_ms: default_auto_resume_delay_ms(),
            engine: EngineConfig::default(),
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: CliConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("chunklift").join("cli.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("chunklift")
            .join("cli.toml")
    }
}
