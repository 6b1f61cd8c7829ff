//! Application configuration (`toolchat.yaml`).
//!
//! ```yaml
//! model:
//!   model_name: gemini-2.5-pro-preview-05-06
//!   api_key: ${GEMINI_API_KEY}
//!   temperature: 0.2
//! server:
//!   name: products
//!   command: ${TOOLCHAT_HOME:-~/.local/bin}/product-server
//!   args: ["--db", "~/products.db"]
//!   call_timeout_secs: 30
//! http:
//!   bind: 127.0.0.1:8000
//! ```
//!
//! Every section is optional. Values are interpolated from the environment
//! before parsing (`${VAR}` / `${VAR:-default}`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::inference::config::{expand_tilde, interpolate_env_vars};
use crate::inference::ModelConfig;
use crate::mcp_client::session::DEFAULT_CALL_TIMEOUT;
use crate::mcp_client::ServerConfig;

/// File name searched for upward from the working directory.
pub const CONFIG_FILE_NAME: &str = "toolchat.yaml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TOOLCHAT_CONFIG";

/// Name of the bundled tool server binary.
pub const PRODUCT_SERVER_BIN: &str = "product-server";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

// ─── Types ───────────────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_server")]
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// HTTP front-end settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

/// Launch the `product-server` binary installed next to the running one.
fn default_server() -> ServerConfig {
    let bin = format!("{PRODUCT_SERVER_BIN}{}", std::env::consts::EXE_SUFFIX);
    let command = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&bin)))
        .filter(|path| path.exists())
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or(bin);

    ServerConfig {
        name: "products".to_string(),
        command,
        args: Vec::new(),
        env: Default::default(),
        cwd: None,
        call_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            server: default_server(),
            http: HttpConfig::default(),
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: explicit path, `$TOOLCHAT_CONFIG`, then `toolchat.yaml` in `start`
/// or any of its ancestors. `Ok(None)` means "use the defaults".
pub fn find_config_path(
    explicit: Option<&Path>,
    start: &Path,
) -> Result<Option<PathBuf>, ConfigError> {
    // 1. Explicit flag: must exist
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }
        return Ok(Some(path.to_path_buf()));
    }

    // 2. Env var: must exist too
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            let path = PathBuf::from(expand_tilde(path.trim()));
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.display().to_string(),
                });
            }
            return Ok(Some(path));
        }
    }

    // 3. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
        if !dir.pop() {
            break;
        }
    }

    Ok(None)
}

/// Parse a config file, interpolating environment variables first.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw).map_err(|reason| ConfigError::Parse {
        path: path.display().to_string(),
        reason,
    })
}

fn parse_config(raw: &str) -> Result<AppConfig, String> {
    let interpolated = interpolate_env_vars(raw);
    // An empty file is a valid "all defaults" config.
    if interpolated.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    let mut config: AppConfig = serde_yaml::from_str(&interpolated).map_err(|e| e.to_string())?;
    config.server.command = expand_tilde(&config.server.command);
    config.server.cwd = config.server.cwd.as_deref().map(expand_tilde);
    Ok(config)
}

/// Resolve and load the configuration, falling back to the defaults.
pub fn resolve(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match find_config_path(explicit, &cwd)? {
        Some(path) => {
            let config = load_config(&path)?;
            tracing::info!(path = %path.display(), "loaded configuration");
            Ok(config)
        }
        None => {
            tracing::info!("no {CONFIG_FILE_NAME} found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
