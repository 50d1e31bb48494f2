//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::bundles::deployer::DeployerOptions;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployer configuration
    pub deployer: DeployerOptions,

    /// Command importing bundles into the environment
    pub deployer_command: String,

    /// Charm store endpoint for deployment counters, disabled if unset
    pub charmworld_url: Option<String>,

    pub auth: AuthOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions::default(),
            deployer: DeployerOptions::default(),
            deployer_command: "juju-deployer".to_string(),
            charmworld_url: None,
            auth: AuthOptions::default(),
        }
    }
}

/// Lifecycle options for the server
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on, 0 picks a free one
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
        }
    }
}

/// Credentials accepted by the login handshake
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub username: String,

    /// Every login is rejected when unset
    pub password: Option<SecretString>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            username: "user-admin".to_string(),
            password: None,
        }
    }
}
