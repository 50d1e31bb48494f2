//! Connection user

use std::sync::{Arc, RwLock};

use secrecy::SecretString;

/// User of a WebSocket connection, as established by the login handshake
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,

    /// Needed to authenticate imports against the environment
    pub password: SecretString,

    pub is_authenticated: bool,
}

/// User shared by the middlewares of one connection
pub type SharedUser = Arc<RwLock<User>>;

impl User {
    /// A user who has not logged in yet
    pub fn anonymous() -> Self {
        Self {
            username: String::new(),
            password: SecretString::from(String::new()),
            is_authenticated: false,
        }
    }

    pub fn authenticated(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
            is_authenticated: true,
        }
    }

    /// Copy of the current user, taken per request
    pub fn snapshot(shared: &SharedUser) -> Self {
        shared.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for User {
    fn default() -> Self {
        Self::anonymous()
    }
}
