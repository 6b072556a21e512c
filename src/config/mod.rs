//! Configuration management for downlink
//!
//! Layered configuration loaded from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file (default: `config/downlink.toml`)
//! 3. Environment variables (highest priority)
//!
//! Environment overrides use the pattern `DOWNLINK__<section>__<key>`, e.g.
//! `DOWNLINK__SERVER__BIND_ADDR=0.0.0.0:9000` or
//! `DOWNLINK__ENGINE__RPC_URL=http://localhost:6800/jsonrpc`.
//! The config file path itself can be overridden with `DOWNLINK_CONFIG`.

use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

const CONFIG_ENV_VAR: &str = "DOWNLINK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/downlink.toml";
const ENV_PREFIX: &str = "DOWNLINK";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub handlers: HandlersConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            downloads: DownloadsConfig::default(),
            engine: EngineConfig::default(),
            reconciler: ReconcilerConfig::default(),
            handlers: HandlersConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

/// Download destination configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_download_dir")]
    pub dir: PathBuf,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            dir: default_download_dir(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

/// External engine (aria2 RPC) configuration
///
/// The engine is assumed to be already running at `rpc_url`; when `enabled`
/// is false the service runs in handler-only mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// RPC secret token (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret: Option<String>,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: default_engine_enabled(),
            rpc_url: default_rpc_url(),
            secret: None,
            timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

fn default_engine_enabled() -> bool {
    true
}

fn default_rpc_url() -> String {
    "http://localhost:6800/jsonrpc".to_string()
}

fn default_rpc_timeout_ms() -> u64 {
    5_000
}

/// Reconciliation loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1_000
}

/// Handler availability and probe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandlersConfig {
    /// Enable the media-site handler (requires a working yt-dlp binary)
    #[serde(default = "default_media_enabled")]
    pub media_enabled: bool,
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: String,
    /// Timeout for can_handle/probe network calls
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            media_enabled: default_media_enabled(),
            ytdlp_bin: default_ytdlp_bin(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

fn default_media_enabled() -> bool {
    true
}

fn default_ytdlp_bin() -> String {
    "yt-dlp".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Priority (highest to lowest): environment variables (`DOWNLINK__*`),
    /// TOML file, struct defaults. A missing config file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file doesn't exist)
        let _ = dotenvy::dotenv();

        let config_path = env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Self::load_from_path(config_path)?;
        load_secrets(&mut config);

        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if config_path.exists() {
            tracing::info!("Loading configuration from: {}", config_path.display());
            builder = builder.add_source(File::from(config_path).required(false));
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults and environment overrides",
                config_path.display()
            );
        }

        // DOWNLINK__SERVER__BIND_ADDR -> server.bind_addr
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Load secrets from environment variables into config
/// Secrets are never stored in TOML files, only in environment
fn load_secrets(config: &mut Config) {
    if let Ok(secret) = env::var("ARIA2_RPC_SECRET") {
        if !secret.is_empty() {
            config.engine.secret = Some(secret);
        }
    }
}
