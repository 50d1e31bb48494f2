//! Login handling for WebSocket connections

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::authn::authenticator::Authenticator;
use crate::authn::user::{SharedUser, User};
use crate::errors::GuiServerError;
use crate::protocol::{self, ResponseSender};

const INVALID_CREDENTIALS: &str = "invalid entity name or password";

#[derive(Debug, Deserialize)]
struct LoginParams {
    #[serde(rename = "AuthTag")]
    auth_tag: String,

    #[serde(rename = "Password")]
    password: String,
}

/// Authenticates the connection user from `Admin`/`Login` requests
pub struct AuthMiddleware {
    user: SharedUser,
    authenticator: Arc<dyn Authenticator>,
    tx: ResponseSender,
}

impl AuthMiddleware {
    pub fn new(user: SharedUser, authenticator: Arc<dyn Authenticator>, tx: ResponseSender) -> Self {
        Self {
            user,
            authenticator,
            tx,
        }
    }

    /// Whether the message is a login request
    pub fn requested(&self, message: &serde_json::Value) -> bool {
        protocol::is_request(message, "Admin", &["Login"])
    }

    /// Check the credentials and update the connection user
    pub async fn process_request(&self, message: &serde_json::Value) -> Result<(), GuiServerError> {
        let result = self.login(protocol::params(message)).await;
        let response = protocol::response(protocol::request_id(message), result);
        self.tx
            .send(response)
            .map_err(|_| GuiServerError::ServerError("connection closed".to_string()))
    }

    async fn login(&self, params: serde_json::Value) -> Result<serde_json::Value, String> {
        let params: LoginParams = serde_json::from_value(params)
            .map_err(|e| format!("invalid request: invalid data parameters: {}", e))?;
        let password = secrecy::SecretString::from(params.password);

        if !self.authenticator.authenticate(&params.auth_tag, &password).await {
            debug!("Login failed for {}", params.auth_tag);
            return Err(INVALID_CREDENTIALS.to_string());
        }

        info!("User {} logged in", params.auth_tag);
        let mut user = self.user.write().unwrap_or_else(|e| e.into_inner());
        *user = User::authenticated(params.auth_tag, password);
        Ok(serde_json::json!({}))
    }
}
