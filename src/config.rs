//! Configuration management for the PVE exporter.
//!
//! Configuration is resolved in three layers: built-in defaults, then
//! environment variables, then an optional YAML file. The file wins over the
//! environment, the environment wins over the defaults.

use crate::error::{ExporterError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Proxmox VE API connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProxmoxConfig {
    /// API hostname
    pub host: String,

    /// API port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Password-mode user (e.g. "root@pam")
    #[serde(default)]
    pub user: String,

    /// Password-mode secret
    #[serde(default)]
    pub password: String,

    /// Token-mode ID (e.g. "monitor@pve!exporter")
    #[serde(default)]
    pub token_id: String,

    /// Token-mode secret
    #[serde(default)]
    pub token_secret: String,

    /// Disable TLS certificate verification (Proxmox ships self-signed certs)
    #[serde(default = "default_insecure_skip_verify")]
    pub insecure_skip_verify: bool,

    /// Per-request timeout in seconds (the file may spell it `timeout`)
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_seconds: u64,
}

impl ProxmoxConfig {
    /// Whether API-token authentication is configured. Token credentials
    /// take precedence over a password when both are present.
    pub fn uses_token(&self) -> bool {
        !self.token_id.is_empty() && !self.token_secret.is_empty()
    }
}

impl std::fmt::Debug for ProxmoxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxmoxConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***REDACTED***")
            .field("token_id", &self.token_id)
            .field("token_secret", &"***REDACTED***")
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind for the metrics endpoint (":9221" or "0.0.0.0:9221")
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Path the metrics are scraped from
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl ServerConfig {
    /// A Go-style listen address of the form ":9221" binds all interfaces.
    pub fn bind_address(&self) -> String {
        if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        }
    }
}

/// Disk SMART collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartConfig {
    /// Where SMART data comes from: "sidecar" (JSON artifact written by the
    /// smart scraper script) or "api" (per-node Proxmox disk endpoints)
    #[serde(default = "default_smart_source")]
    pub source: String,

    /// Path of the sidecar JSON artifact
    #[serde(default = "default_sidecar_path")]
    pub sidecar_path: String,
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub proxmox: ProxmoxConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub smart: SmartConfig,
}

fn default_port() -> u16 {
    8006
}

fn default_insecure_skip_verify() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_listen_address() -> String {
    ":9221".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_smart_source() -> String {
    "sidecar".to_string()
}

fn default_sidecar_path() -> String {
    "/var/lib/pve-exporter/smart.json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            metrics_path: default_metrics_path(),
        }
    }
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            source: default_smart_source(),
            sidecar_path: default_sidecar_path(),
        }
    }
}

/// Environment variable value, or the built-in default.
fn env_or(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_bool_or(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) if !v.is_empty() => matches!(v.as_str(), "true" | "1" | "yes"),
        _ => default,
    }
}

impl Settings {
    /// Load configuration from the environment and an optional YAML file.
    ///
    /// Environment variables seed the defaults, so a value from the file
    /// overrides the environment, which overrides the built-ins.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("proxmox.host", env_or("PVE_HOST", "localhost"))?
            .set_default("proxmox.port", 8006i64)?
            .set_default("proxmox.user", env_or("PVE_USER", "root@pam"))?
            .set_default("proxmox.password", env_or("PVE_PASSWORD", ""))?
            .set_default("proxmox.token_id", env_or("PVE_TOKEN_ID", ""))?
            .set_default("proxmox.token_secret", env_or("PVE_TOKEN_SECRET", ""))?
            .set_default(
                "proxmox.insecure_skip_verify",
                env_bool_or("PVE_INSECURE_SKIP_VERIFY", true),
            )?
            .set_default("server.listen_address", env_or("LISTEN_ADDRESS", ":9221"))?
            .set_default("server.metrics_path", env_or("METRICS_PATH", "/metrics"))?
            .set_default("smart.source", default_smart_source())?
            .set_default("smart.sidecar_path", default_sidecar_path())?;

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder
                    .add_source(config::File::new(path, config::FileFormat::Yaml));
            } else {
                return Err(ExporterError::Other(format!(
                    "config file not found: {path}"
                )));
            }
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.proxmox.host.is_empty() {
            return Err(ExporterError::Config(config::ConfigError::Message(
                "proxmox host is required".to_string(),
            )));
        }

        let has_password = !self.proxmox.password.is_empty();
        if !has_password && !self.proxmox.uses_token() {
            return Err(ExporterError::Config(config::ConfigError::Message(
                "either password or token authentication must be configured".to_string(),
            )));
        }

        match self.smart.source.as_str() {
            "sidecar" | "api" => {}
            other => {
                return Err(ExporterError::Config(config::ConfigError::Message(
                    format!("smart.source must be \"sidecar\" or \"api\", got \"{other}\""),
                )));
            }
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxmox: ProxmoxConfig {
                host: "localhost".to_string(),
                port: default_port(),
                user: "root@pam".to_string(),
                password: String::new(),
                token_id: String::new(),
                token_secret: String::new(),
                insecure_skip_verify: default_insecure_skip_verify(),
                timeout_seconds: default_timeout(),
            },
            server: ServerConfig::default(),
            smart: SmartConfig::default(),
        }
    }
}
