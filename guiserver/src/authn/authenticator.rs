//! Credential checks

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

/// Credential checker, a trait for testability
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether the credentials are valid
    async fn authenticate(&self, username: &str, password: &SecretString) -> bool;
}

/// Authenticator accepting a single configured user
pub struct StaticAuthenticator {
    username: String,
    password: Option<SecretString>,
}

impl StaticAuthenticator {
    /// Without a password every login is rejected
    pub fn new(username: impl Into<String>, password: Option<SecretString>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, username: &str, password: &SecretString) -> bool {
        let Some(expected) = &self.password else {
            warn!("No password configured, rejecting login for {}", username);
            return false;
        };
        username == self.username && password.expose_secret() == expected.expose_secret()
    }
}
