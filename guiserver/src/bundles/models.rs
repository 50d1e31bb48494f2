//! Deployment and bundle models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of a deployment, unique for the server lifetime
pub type DeploymentId = u64;

/// Identifier of a subscriber to a deployment change log
pub type WatcherId = u64;

/// Deployment status as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Waiting in the queue
    Scheduled,

    /// Taken by the worker
    Started,

    /// Removed from the queue before starting
    Cancelled,

    /// Finished, successfully or not
    Completed,
}

/// One immutable entry of a deployment change log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "DeploymentId")]
    pub deployment_id: DeploymentId,

    #[serde(rename = "Status")]
    pub status: DeploymentStatus,

    /// Seconds since the epoch
    #[serde(rename = "Time")]
    pub time: i64,

    #[serde(rename = "Queue", default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<usize>,

    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Change {
    /// Create a change stamped with the current time
    pub fn new(deployment_id: DeploymentId, status: DeploymentStatus) -> Self {
        Self {
            deployment_id,
            status,
            time: chrono::Utc::now().timestamp(),
            queue: None,
            error: None,
        }
    }

    pub fn with_queue(mut self, position: usize) -> Self {
        self.queue = Some(position);
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

/// A bundle: a set of services and their relations deployed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,

    #[serde(default)]
    pub services: BTreeMap<String, Service>,

    /// Relations are kept verbatim, endpoints may be nested lists
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<serde_yaml::Value>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Bundle {
    /// All relation endpoints, flattened, in declaration order
    pub fn relation_endpoints(&self) -> Vec<String> {
        fn collect(value: &serde_yaml::Value, out: &mut Vec<String>) {
            match value {
                serde_yaml::Value::String(endpoint) => out.push(endpoint.clone()),
                serde_yaml::Value::Sequence(items) => {
                    items.iter().for_each(|item| collect(item, out))
                }
                _ => {}
            }
        }

        let mut endpoints = Vec::new();
        self.relations
            .iter()
            .for_each(|relation| collect(relation, &mut endpoints));
        endpoints
    }
}

/// A service entry of a bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charm: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_units: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Service constraints as written by users: a mapping or a `key=value,...` string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constraints {
    Map(BTreeMap<String, serde_yaml::Value>),
    Text(String),
}
