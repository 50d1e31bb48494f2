//! Server state

use std::sync::Arc;

use crate::authn::authenticator::Authenticator;
use crate::bundles::deployer::Deployer;

/// Server state shared across handlers and connections
pub struct ServerState {
    pub deployer: Arc<Deployer>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl ServerState {
    pub fn new(deployer: Arc<Deployer>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            deployer,
            authenticator,
        }
    }
}
