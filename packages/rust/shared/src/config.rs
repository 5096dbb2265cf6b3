//! Application configuration for docpipe.
//!
//! User config lives at `~/.docpipe/docpipe.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DocpipeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docpipe.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docpipe";

// ---------------------------------------------------------------------------
// Config structs (matching docpipe.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote processing service settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Pipeline behaviour.
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// `[service]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the processing service (stage routes hang off `/api`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Whole-request timeout for a stage call. Stages can take minutes.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5000".into()
}
fn default_request_timeout() -> u64 {
    600
}
fn default_connect_timeout() -> u64 {
    10
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Progress shown when a stage becomes active, before its response arrives.
    #[serde(default = "default_probe_progress")]
    pub probe_progress: u8,

    /// Directory artifacts are downloaded into after a successful run.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            probe_progress: default_probe_progress(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_probe_progress() -> u8 {
    10
}
fn default_output_dir() -> String {
    "downloads".into()
}

// ---------------------------------------------------------------------------
// Service client config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime HTTP client configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Build from the `[service]` section, optionally overriding the base URL.
    pub fn from_service(service: &ServiceConfig, base_url_override: Option<&str>) -> Result<Self> {
        let raw = base_url_override.unwrap_or(&service.base_url);
        let base_url = Url::parse(raw).map_err(|e| {
            DocpipeError::config(format!("invalid service base_url '{raw}': {e}"))
        })?;

        if base_url.cannot_be_a_base() {
            return Err(DocpipeError::config(format!(
                "service base_url '{raw}' cannot be used as a base URL"
            )));
        }

        Ok(Self {
            base_url,
            request_timeout: Duration::from_secs(service.request_timeout_secs),
            connect_timeout: Duration::from_secs(service.connect_timeout_secs),
        })
    }
}

impl TryFrom<&AppConfig> for ClientConfig {
    type Error = DocpipeError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        Self::from_service(&config.service, None)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docpipe/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocpipeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docpipe/docpipe.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocpipeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DocpipeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocpipeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocpipeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocpipeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
