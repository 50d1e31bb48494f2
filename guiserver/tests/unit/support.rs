//! Test doubles shared by the integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use guiserver::authn::user::User;
use guiserver::bundles::backend::{BundleBackend, ImportOptions};
use guiserver::bundles::deployer::{Deployer, DeployerOptions};
use guiserver::bundles::models::{Bundle, Change, DeploymentId, WatcherId};
use guiserver::http::client::HttpClient;
use secrecy::SecretString;
use tokio::sync::{mpsc, oneshot};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Backend whose imports block until the test lets them finish
pub struct GatedBackend {
    validated: AtomicUsize,
    gate: Mutex<std_mpsc::Receiver<Result<(), String>>>,
    started: mpsc::UnboundedSender<String>,
}

impl GatedBackend {
    pub fn validated(&self) -> usize {
        self.validated.load(Ordering::SeqCst)
    }
}

impl BundleBackend for GatedBackend {
    fn validate(&self, _: &str, _: &SecretString, bundle: &Bundle) -> anyhow::Result<()> {
        self.validated.fetch_add(1, Ordering::SeqCst);
        if bundle.services.contains_key("broken") {
            anyhow::bail!("charm not found: broken");
        }
        Ok(())
    }

    fn import_bundle(
        &self,
        _: &str,
        _: &SecretString,
        name: &str,
        _: &Bundle,
        _: &ImportOptions,
    ) -> anyhow::Result<()> {
        let _ = self.started.send(name.to_string());
        let outcome = self
            .gate
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| anyhow::anyhow!("gate closed"))?;
        outcome.map_err(anyhow::Error::msg)
    }
}

/// A deployer with a running import worker driven by a [`GatedBackend`]
pub struct Harness {
    pub deployer: Arc<Deployer>,
    pub backend: Arc<GatedBackend>,
    gate: std_mpsc::Sender<Result<(), String>>,
    started: mpsc::UnboundedReceiver<String>,
}

impl Harness {
    pub fn start(options: DeployerOptions) -> Self {
        Self::start_with_counter(options, None)
    }

    pub fn start_with_counter(options: DeployerOptions, counter: Option<Arc<HttpClient>>) -> Self {
        let (gate, gate_rx) = std_mpsc::channel();
        let (started_tx, started) = mpsc::unbounded_channel();
        let backend = Arc::new(GatedBackend {
            validated: AtomicUsize::new(0),
            gate: Mutex::new(gate_rx),
            started: started_tx,
        });

        let (deployer, worker) = Deployer::new(options, backend.clone(), counter);
        tokio::spawn(worker.run(Box::pin(std::future::pending::<()>())));

        Self {
            deployer: Arc::new(deployer),
            backend,
            gate,
            started,
        }
    }

    pub fn import(&self, name: &str) -> DeploymentId {
        self.deployer.import_bundle(&user(), name, bundle(), None, None)
    }

    /// Import with a completion callback, returning a receiver fired on completion
    pub fn import_notified(&self, name: &str) -> (DeploymentId, oneshot::Receiver<DeploymentId>) {
        let (tx, rx) = oneshot::channel();
        let callback = Box::new(move |deployment_id| {
            let _ = tx.send(deployment_id);
        });
        let deployment_id = self
            .deployer
            .import_bundle(&user(), name, bundle(), None, Some(callback));
        (deployment_id, rx)
    }

    /// Let the running import finish with the given outcome
    pub fn finish(&self, outcome: Result<(), String>) {
        self.gate.send(outcome).unwrap();
    }

    /// Wait until the worker starts the next import, returning the bundle name
    pub async fn wait_started(&mut self) -> String {
        tokio::time::timeout(TIMEOUT, self.started.recv())
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn next(&self, watcher_id: WatcherId) -> Vec<Change> {
        tokio::time::timeout(TIMEOUT, self.deployer.next(watcher_id))
            .await
            .unwrap()
            .unwrap()
    }
}

pub async fn completed(rx: oneshot::Receiver<DeploymentId>) -> DeploymentId {
    tokio::time::timeout(TIMEOUT, rx).await.unwrap().unwrap()
}

pub fn user() -> User {
    User::authenticated("user-admin", SecretString::from("hunter2".to_string()))
}

pub fn bundle() -> Bundle {
    serde_yaml::from_str("services:\n  mysql: {charm: \"cs:precise/mysql-26\"}\n").unwrap()
}
