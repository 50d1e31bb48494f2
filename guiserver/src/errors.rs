//! Error types for the GUI server

use thiserror::Error;

use crate::bundles::models::{DeploymentId, WatcherId};

/// Main error type for the GUI server
#[derive(Error, Debug)]
pub enum GuiServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Watcher error: {0}")]
    WatcherError(#[from] WatcherError),

    #[error("Deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Misuse of a deployment change log
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatcherError {
    #[error("the watcher is closed")]
    Closed,

    #[error("subscriber {0} is already waiting for changes")]
    AlreadyWaiting(WatcherId),

    #[error("the watcher is empty")]
    Empty,

    #[error("the watcher was dropped before delivering changes")]
    Dropped,
}
