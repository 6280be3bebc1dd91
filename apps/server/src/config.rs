//! Server configuration (`wallstream-server.toml`).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use wallstream_server::principal::User;

pub const DEFAULT_CONFIG_FILE: &str = "wallstream-server.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Prefix for file URLs handed to subscribers. Empty keeps them server-relative.
    #[serde(default)]
    pub public_url: String,

    /// Where uploaded images are stored.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default)]
    pub users: Vec<User>,
}

fn default_bind() -> String {
    "0.0.0.0:8080".into()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: String::new(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            users: Vec::new(),
        }
    }
}

impl Config {
    /// Loads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
