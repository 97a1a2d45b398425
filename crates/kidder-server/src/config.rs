//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (KIDDER_HOST, KIDDER_PORT, PORT)
//! - TOML configuration file (KIDDER_CONFIG or the default search paths)

use anyhow::{Context, Result};
use kidder_core::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// History replay configuration.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Message storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Image upload configuration.
    #[serde(default)]
    pub uploads: UploadConfig,

    /// Display name configuration.
    #[serde(default)]
    pub names: NamesConfig,

    /// Directory with a built frontend to serve, if any.
    #[serde(default)]
    pub static_dir: Option<String>,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Per-participant write timeout during fan-out, in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// History replay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of messages replayed to a joining participant.
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database file.
    Sqlite,
    /// In-process memory, lost on restart.
    Memory,
}

/// Message storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use.
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Database file path (`~` is expanded).
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Maximum pooled database connections.
    #[serde(default = "default_max_db_connections")]
    pub max_connections: u32,
}

/// Image upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Enable the upload endpoint.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory uploads are written to (`~` is expanded).
    #[serde(default = "default_upload_dir")]
    pub dir: String,

    /// Maximum upload size in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_size: usize,

    /// Accepted content types.
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

/// Display name configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamesConfig {
    /// Prefix for synthesized names.
    #[serde(default = "default_name_prefix")]
    pub prefix: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("KIDDER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("KIDDER_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_history_limit() -> usize {
    50
}

fn default_backend() -> StorageBackend {
    StorageBackend::Sqlite
}

fn default_database_path() -> String {
    "kidder.db".to_string()
}

fn default_max_db_connections() -> u32 {
    5
}

fn default_upload_dir() -> String {
    "uploads".to_string()
}

fn default_max_upload_size() -> usize {
    10 * 1024 * 1024 // 10 MB
}

fn default_allowed_types() -> Vec<String> {
    ["image/jpeg", "image/jpg", "image/png", "image/gif", "image/webp"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_name_prefix() -> String {
    kidder_core::names::DEFAULT_PREFIX.to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            history: HistoryConfig::default(),
            storage: StorageConfig::default(),
            uploads: UploadConfig::default(),
            names: NamesConfig::default(),
            static_dir: None,
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_path: default_database_path(),
            max_connections: default_max_db_connections(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_upload_dir(),
            max_size: default_max_upload_size(),
            allowed_types: default_allowed_types(),
        }
    }
}

impl Default for NamesConfig {
    fn default() -> Self {
        Self {
            prefix: default_name_prefix(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl StorageConfig {
    /// Database path with `~` expanded.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).as_ref())
    }
}

impl UploadConfig {
    /// Upload directory with `~` expanded.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).as_ref())
    }

    /// Check a content type against the allow-list.
    #[must_use]
    pub fn is_allowed(&self, content_type: &str) -> bool {
        self.allowed_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("KIDDER_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        // Try to load from default paths
        let config_paths = [
            "kidder.toml",
            "/etc/kidder/kidder.toml",
            "~/.config/kidder/kidder.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Settings for the chat hub.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            history_limit: self.history.limit,
            name_prefix: self.names.prefix.clone(),
            write_timeout: Duration::from_millis(self.transport.write_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.history.limit, 50);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.uploads.max_size, 10 * 1024 * 1024);
        assert_eq!(config.names.prefix, "Kidder");
        assert!(config.static_dir.is_none());
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "0.0.0.0".to_string();
        config.port = 8080;
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        config.host = "not a host".to_string();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000
            static_dir = "./frontend/build"

            [history]
            limit = 20

            [storage]
            backend = "memory"

            [uploads]
            max_size = 1024
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.history.limit, 20);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.uploads.max_size, 1024);
        assert!(config.uploads.is_allowed("image/png"));
        assert_eq!(config.static_dir.as_deref(), Some("./frontend/build"));

        let hub = config.hub_config();
        assert_eq!(hub.history_limit, 20);
        assert_eq!(hub.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_allowed_types() {
        let uploads = UploadConfig::default();
        assert!(uploads.is_allowed("image/webp"));
        assert!(uploads.is_allowed("IMAGE/PNG"));
        assert!(!uploads.is_allowed("application/pdf"));
        assert!(!uploads.is_allowed(""));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kidder.toml");
        std::fs::write(&path, "port = 7000\n[names]\nprefix = \"Guest\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.names.prefix, "Guest");

        assert!(Config::from_file(dir.path().join("missing.toml")).is_err());
    }
}
