//! Integration tests for the deployment engine and its WebSocket server

mod support;
mod test_deployer;
