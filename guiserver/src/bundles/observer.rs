//! Deployment observer
//!
//! Owns one change log per deployment and turns deployment events into
//! changes appended to those logs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::bundles::models::{Change, DeploymentId, DeploymentStatus, WatcherId};
use crate::bundles::watcher::Watcher;
use crate::errors::GuiServerError;

/// Tracks deployments and the watchers subscribed to them
#[derive(Default)]
pub struct Observer {
    /// Ordered by id, ids being minted in insertion order
    deployments: BTreeMap<DeploymentId, Arc<Watcher>>,
    watchers: HashMap<WatcherId, DeploymentId>,
    next_deployment_id: DeploymentId,
    next_watcher_id: WatcherId,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start observing a new deployment, returning its id
    pub fn add_deployment(&mut self) -> DeploymentId {
        let deployment_id = self.next_deployment_id;
        self.next_deployment_id += 1;
        self.deployments
            .insert(deployment_id, Arc::new(Watcher::new()));
        deployment_id
    }

    /// Bind a new watcher id to the given deployment.
    ///
    /// The deployment is not required to exist.
    pub fn add_watcher(&mut self, deployment_id: DeploymentId) -> WatcherId {
        let watcher_id = self.next_watcher_id;
        self.next_watcher_id += 1;
        self.watchers.insert(watcher_id, deployment_id);
        watcher_id
    }

    pub fn contains(&self, deployment_id: DeploymentId) -> bool {
        self.deployments.contains_key(&deployment_id)
    }

    /// Change log of the deployment bound to the given watcher id
    pub fn watcher(&self, watcher_id: WatcherId) -> Option<Arc<Watcher>> {
        self.watchers
            .get(&watcher_id)
            .and_then(|deployment_id| self.deployments.get(deployment_id))
            .cloned()
    }

    fn deployment(&self, deployment_id: DeploymentId) -> Result<&Watcher, GuiServerError> {
        self.deployments
            .get(&deployment_id)
            .map(Arc::as_ref)
            .ok_or(GuiServerError::DeploymentNotFound(deployment_id))
    }

    /// Record the queue position: 0 means started, anything else scheduled
    pub fn notify_position(
        &self,
        deployment_id: DeploymentId,
        position: usize,
    ) -> Result<(), GuiServerError> {
        let status = if position > 0 {
            DeploymentStatus::Scheduled
        } else {
            DeploymentStatus::Started
        };
        debug!("Deployment {} is {:?} at position {}", deployment_id, status, position);
        let change = Change::new(deployment_id, status).with_queue(position);
        self.deployment(deployment_id)?.put(change)?;
        Ok(())
    }

    pub fn notify_cancelled(&self, deployment_id: DeploymentId) -> Result<(), GuiServerError> {
        let change = Change::new(deployment_id, DeploymentStatus::Cancelled);
        self.deployment(deployment_id)?.close(change)?;
        Ok(())
    }

    pub fn notify_completed(
        &self,
        deployment_id: DeploymentId,
        error: Option<String>,
    ) -> Result<(), GuiServerError> {
        let change = Change::new(deployment_id, DeploymentStatus::Completed).with_error(error);
        self.deployment(deployment_id)?.close(change)?;
        Ok(())
    }

    /// Last change of every deployment, in deployment id order
    pub fn last_changes(&self) -> Vec<Change> {
        self.deployments
            .values()
            .filter_map(|watcher| watcher.getlast().ok())
            .collect()
    }

    /// Forget the oldest finished deployments, keeping at most `keep` of them.
    ///
    /// Returns the ids of the evicted deployments.
    pub fn prune(&mut self, keep: usize) -> Vec<DeploymentId> {
        let finished: Vec<DeploymentId> = self
            .deployments
            .iter()
            .filter(|(_, watcher)| watcher.is_closed())
            .map(|(id, _)| *id)
            .collect();
        let excess = finished.len().saturating_sub(keep);
        let evicted: Vec<DeploymentId> = finished.into_iter().take(excess).collect();

        for deployment_id in &evicted {
            self.deployments.remove(deployment_id);
        }
        if !evicted.is_empty() {
            self.watchers
                .retain(|_, deployment_id| !evicted.contains(deployment_id));
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}
