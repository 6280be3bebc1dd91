//! Agent configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux/macOS: `~/.config/wallstream/agent.toml`
//! - Windows: `%APPDATA%/wallstream/agent.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which side of the sync this agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Publisher => f.write_str("publisher"),
            Self::Subscriber => f.write_str("subscriber"),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_role")]
    pub role: Role,

    /// Base URL of the Wallstream server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Publisher to follow (subscriber role).
    #[serde(default)]
    pub publisher_id: String,

    /// This machine's device ID (hostname by default).
    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_interval_secs")]
    pub poll_interval_secs: u64,

    /// Upper bound for every HTTP request.
    #[serde(default = "default_interval_secs")]
    pub http_timeout_secs: u64,

    /// Overrides the platform cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Upload credentials (publisher role). Upload is off while either is empty.
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub api_key: String,
}

fn default_role() -> Role {
    Role::Subscriber
}

fn default_server_url() -> String {
    "http://localhost:8080".into()
}

fn default_device_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "wallstream-agent".into())
}

fn default_interval_secs() -> u64 {
    wallstream_sync::DEFAULT_INTERVAL.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: default_role(),
            server_url: default_server_url(),
            publisher_id: String::new(),
            device_id: default_device_id(),
            poll_interval_secs: default_interval_secs(),
            http_timeout_secs: default_interval_secs(),
            cache_dir: None,
            username: String::new(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, writing the defaults there if it is missing.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Holds the API key.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Rejects configurations the agent cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server_url.trim().is_empty() {
            anyhow::bail!("server_url is empty");
        }
        if self.role == Role::Subscriber && self.publisher_id.trim().is_empty() {
            anyhow::bail!("subscriber role needs a publisher_id");
        }
        if self.poll_interval_secs == 0 || self.http_timeout_secs == 0 {
            anyhow::bail!("poll_interval_secs and http_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn upload_enabled(&self) -> bool {
        !self.username.is_empty() && !self.api_key.is_empty()
    }
}

/// Returns the platform-specific configuration file path.
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("wallstream").join("agent.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("wallstream")
            .join("agent.toml")
    }
}
