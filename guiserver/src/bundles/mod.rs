//! Bundle deployments: change logs, queueing and the deployer requests

pub mod backend;
pub mod deployer;
pub mod middleware;
pub mod models;
pub mod observer;
pub mod utils;
pub mod views;
pub mod watcher;
