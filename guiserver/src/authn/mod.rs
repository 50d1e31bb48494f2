//! Authentication of WebSocket connections

pub mod authenticator;
pub mod middleware;
pub mod user;
