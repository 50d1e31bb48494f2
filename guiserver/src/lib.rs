//! Juju GUI server library
//!
//! Bundle deployment engine served over a WebSocket RPC protocol.

pub mod app;
pub mod authn;
pub mod bundles;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod utils;
