//! Routing of `Deployer` requests to their views

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::authn::user::{SharedUser, User};
use crate::bundles::deployer::Deployer;
use crate::bundles::views::{self, Request, ViewResult};
use crate::errors::GuiServerError;
use crate::protocol::{self, ResponseSender};

const REQUEST_TYPE: &str = "Deployer";

/// Operations served by the deploy middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Import,
    Watch,
    Next,
    Cancel,
    Status,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Import,
        Operation::Watch,
        Operation::Next,
        Operation::Cancel,
        Operation::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Import => "Import",
            Operation::Watch => "Watch",
            Operation::Next => "Next",
            Operation::Cancel => "Cancel",
            Operation::Status => "Status",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }
}

/// Handles the deployer requests of one connection
pub struct DeployMiddleware {
    user: SharedUser,
    deployer: Arc<Deployer>,
    tx: ResponseSender,
}

impl DeployMiddleware {
    pub fn new(user: SharedUser, deployer: Arc<Deployer>, tx: ResponseSender) -> Self {
        Self { user, deployer, tx }
    }

    /// Whether the message is a deployer request this middleware serves
    pub fn requested(&self, message: &Value) -> bool {
        let operations = Operation::ALL.map(|op| op.as_str());
        protocol::is_request(message, REQUEST_TYPE, &operations)
    }

    /// Run the matching view and send back its response.
    ///
    /// `Next` requests may take as long as the deployment, so callers are
    /// expected to run this on its own task.
    pub async fn process_request(&self, message: Value) -> Result<(), GuiServerError> {
        let request_id = protocol::request_id(&message);
        let result = self.route(&message).await;
        self.tx
            .send(protocol::response(request_id, result))
            .map_err(|_| GuiServerError::ServerError("connection closed".to_string()))
    }

    async fn route(&self, message: &Value) -> ViewResult {
        let operation = message
            .get("Request")
            .and_then(Value::as_str)
            .and_then(Operation::parse)
            .ok_or_else(|| "invalid request: unsupported operation".to_string())?;
        debug!("Deployer request: {}", operation.as_str());

        let request = Request {
            params: protocol::params(message),
            user: User::snapshot(&self.user),
        };
        let deployer = self.deployer.as_ref();
        match operation {
            Operation::Import => views::import_bundle(request, deployer).await,
            Operation::Watch => views::watch(request, deployer).await,
            Operation::Next => views::next(request, deployer).await,
            Operation::Cancel => views::cancel(request, deployer).await,
            Operation::Status => views::status(request, deployer).await,
        }
    }
}
