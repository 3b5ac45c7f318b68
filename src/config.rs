use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ServerError;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 30;

const STATIC_ASSETS_DIR_NAME: &str = "static-assets";
const ERROR_TEMPLATE_NAME: &str = "404.html";
const REDIRECTS_FILE_NAME: &str = "redirects.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration. Every field may be omitted from a config file;
/// command-line flags are layered on top by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// Document root served as static content.
    pub root_dir: PathBuf,
    /// Client-rendered shell for historical-version routes.
    /// Defaults to `{root_dir}/static-assets`.
    pub static_assets_dir: Option<PathBuf>,
    /// 404 page template. Defaults to `{root_dir}/404.html` when present.
    pub error_template: Option<PathBuf>,
    /// JSON list of `[source, target]` redirect pairs.
    /// Defaults to `{root_dir}/redirects.json` when present.
    pub redirects_file: Option<PathBuf>,
    pub search_proxy_url: Option<String>,
    pub portal_proxy_url: Option<String>,
    pub proxy_timeout_secs: u64,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            root_dir: PathBuf::from("."),
            static_assets_dir: None,
            error_template: None,
            redirects_file: None,
            search_proxy_url: None,
            portal_proxy_url: None,
            proxy_timeout_secs: DEFAULT_PROXY_TIMEOUT_SECS,
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
        }
    }
}

/// A zero timeout would fail every upstream round trip.
pub fn validate_proxy_timeout(secs: u64) -> Result<u64, ServerError> {
    if secs == 0 {
        return Err(ServerError::Config(
            "Invalid proxy timeout: 0. Must be at least 1 second".to_string(),
        ));
    }
    Ok(secs)
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        validate_proxy_timeout(self.proxy_timeout_secs)?;
        Ok(())
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ServerError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// A config with every optional field filled in, for `--generate-config`.
    pub fn sample() -> Self {
        Self {
            static_assets_dir: Some(PathBuf::from("./static-assets")),
            error_template: Some(PathBuf::from("./404.html")),
            redirects_file: Some(PathBuf::from("./redirects.json")),
            search_proxy_url: Some("https://search.example.com".to_string()),
            portal_proxy_url: Some("http://localhost:3000".to_string()),
            ..Self::default()
        }
    }

    pub fn static_assets_dir(&self) -> PathBuf {
        self.static_assets_dir
            .clone()
            .unwrap_or_else(|| self.root_dir.join(STATIC_ASSETS_DIR_NAME))
    }

    pub fn error_template_path(&self) -> Option<PathBuf> {
        Self::explicit_or_present(&self.error_template, self.root_dir.join(ERROR_TEMPLATE_NAME))
    }

    pub fn redirects_path(&self) -> Option<PathBuf> {
        Self::explicit_or_present(&self.redirects_file, self.root_dir.join(REDIRECTS_FILE_NAME))
    }

    // An explicit path is returned even if missing so the loader can warn about it.
    fn explicit_or_present(explicit: &Option<PathBuf>, default: PathBuf) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.clone()),
            None if default.is_file() => Some(default),
            None => None,
        }
    }
}
