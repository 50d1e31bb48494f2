//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::GuiServerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

pub const DEFAULT_SETTINGS_FILE: &str = "/etc/guiserver/settings.json";

/// Server settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory of the rolling log files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Log in JSON format
    #[serde(default)]
    pub json_logs: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Juju environment configuration
    #[serde(default)]
    pub environment: EnvironmentSettings,

    /// Deployer configuration
    #[serde(default)]
    pub deployer: DeployerSettings,

    /// Login credentials
    #[serde(default)]
    pub auth: AuthSettings,
}

impl Settings {
    /// Read the settings file, falling back to defaults if it does not exist
    pub async fn load(file: &File) -> Result<Self, GuiServerError> {
        if !file.exists().await {
            info!(
                "Settings file {} not found, using defaults",
                file.path().display()
            );
            return Ok(Self::default());
        }
        file.read_json().await
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Juju environment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    /// Environment API endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment API flavor
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Charm store endpoint used for deployment counters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charmworld_url: Option<String>,
}

fn default_api_url() -> String {
    "wss://localhost:17070".to_string()
}

fn default_api_version() -> String {
    "go".to_string()
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_version: default_api_version(),
            charmworld_url: None,
        }
    }
}

/// Deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerSettings {
    /// Command importing a bundle file into the environment
    #[serde(default = "default_deployer_command")]
    pub command: String,

    /// Number of finished deployments to remember, all if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_completed: Option<usize>,
}

fn default_deployer_command() -> String {
    "juju-deployer".to_string()
}

impl Default for DeployerSettings {
    fn default() -> Self {
        Self {
            command: default_deployer_command(),
            retain_completed: None,
        }
    }
}

/// Login settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_username")]
    pub username: String,

    /// Never written back to the settings file
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
}

fn default_username() -> String {
    "user-admin".to_string()
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: None,
        }
    }
}
