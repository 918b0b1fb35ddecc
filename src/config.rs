use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Platform-level lender credentials. One pair for the whole deployment;
/// dealers are routed by org alias, never by their own credentials.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LenderConfig {
    #[serde(default = "default_lender_id")]
    pub lender_id: String,
    pub base_url: String,
    pub email: String,
    #[serde(default)]
    pub password: String,
}

fn default_lender_id() -> String {
    "helios".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WebhookConfig {
    /// Shared secret for HMAC verification of inbound events. When unset,
    /// signatures are not enforced.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CompanyConfig {
    #[serde(default)]
    pub org_alias: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub lender: LenderConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub companies: HashMap<String, CompanyConfig>,
    /// Substitutes deterministic mock data for every lender operation.
    #[serde(default)]
    pub test_mode: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "finbridge", "finbridge")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.apply_env_overrides();
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Secrets can stay out of the file and arrive via the environment.
    fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var("FINBRIDGE_LENDER_PASSWORD") {
            self.lender.password = password;
        }
        if let Ok(secret) = std::env::var("FINBRIDGE_WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
    }
}
