//! Client configuration: an optional JSON file under the user's config
//! directory, overridden by command-line flags.

use crate::normalize::Capabilities;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
const APP_DIR: &str = "sheetplot";
const CONFIG_FILE: &str = "config.json";

/// Everything the HTTP client and the workflow need at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub capabilities: Capabilities,
    pub download_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("sheetplot/{}", env!("CARGO_PKG_VERSION")),
            capabilities: Capabilities::default(),
            download_dir: None,
        }
    }
}

/// On-disk config. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub capabilities: Capabilities,
    pub download_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn into_client_config(self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            user_agent: self.user_agent.unwrap_or(defaults.user_agent),
            capabilities: self.capabilities,
            download_dir: self.download_dir,
        }
    }
}

/// `<config dir>/sheetplot/config.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

/// Load a config file. A missing file yields the defaults; a malformed one is
/// an error.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        log::debug!("no config file at {}", path.display());
        return Ok(FileConfig::default());
    }
    let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parse {}", path.display()))
}
