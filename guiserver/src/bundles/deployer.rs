//! Bundle deployment engine
//!
//! The [`Deployer`] validates bundles and schedules their import on a single
//! worker, so that imports mutating the same environment never run
//! concurrently. Deployments wait in a FIFO queue: the head of the queue is
//! the started one, every other deployment is scheduled and is told its
//! position each time the queue moves.
//!
//! Deployment progress is reported through the [`Observer`] change logs.
//! A deployment can be cancelled only while it is still waiting in the queue.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::authn::user::User;
use crate::bundles::backend::{BundleBackend, ImportOptions};
use crate::bundles::models::{Bundle, Change, DeploymentId, WatcherId};
use crate::bundles::observer::Observer;
use crate::http::client::HttpClient;

/// API versions the import backend knows how to talk to
pub const SUPPORTED_API_VERSIONS: &[&str] = &["go"];

const NOT_FOUND: &str = "deployment not found or already completed";
const CANNOT_CANCEL: &str = "unable to cancel the deployment";

/// Invoked with the deployment id once its completion has been recorded
pub type CompletionCallback = Box<dyn FnOnce(DeploymentId) + Send>;

/// Deployer options
#[derive(Debug, Clone)]
pub struct DeployerOptions {
    /// Environment API endpoint
    pub api_url: String,

    /// Environment API flavor
    pub api_version: String,

    /// Options passed to every import
    pub import_options: ImportOptions,

    /// Number of finished deployments to remember, all of them if unset
    pub retain_completed: Option<usize>,
}

impl Default for DeployerOptions {
    fn default() -> Self {
        Self {
            api_url: "wss://localhost:17070".to_string(),
            api_version: "go".to_string(),
            import_options: ImportOptions::default(),
            retain_completed: None,
        }
    }
}

const JOB_PENDING: u8 = 0;
const JOB_RUNNING: u8 = 1;
const JOB_CANCELLED: u8 = 2;

/// Handle on a queued import, used to cancel it
struct JobHandle {
    state: AtomicU8,
    bundle_id: Option<String>,
    callback: Mutex<Option<CompletionCallback>>,
}

impl JobHandle {
    fn new(bundle_id: Option<String>, callback: Option<CompletionCallback>) -> Self {
        Self {
            state: AtomicU8::new(JOB_PENDING),
            bundle_id,
            callback: Mutex::new(callback),
        }
    }

    /// Claim the job for the worker; fails if it was cancelled
    fn start(&self) -> bool {
        self.state
            .compare_exchange(JOB_PENDING, JOB_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Cancel the job; fails if the worker already took it
    fn cancel(&self) -> bool {
        self.state
            .compare_exchange(JOB_PENDING, JOB_CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn take_callback(&self) -> Option<CompletionCallback> {
        self.callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

struct ImportJob {
    deployment_id: DeploymentId,
    handle: Arc<JobHandle>,
    password: secrecy::SecretString,
    name: String,
    bundle: Bundle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JobOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

#[derive(Default)]
struct DeployerState {
    observer: Observer,
    queue: Vec<DeploymentId>,
    futures: HashMap<DeploymentId, Arc<JobHandle>>,
}

/// State shared by the deployer and its import worker
struct Shared {
    state: Mutex<DeployerState>,
    counter: Option<Arc<HttpClient>>,
    retain_completed: Option<usize>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DeployerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the outcome of a job and move the queue forward
    fn complete(&self, deployment_id: DeploymentId, outcome: JobOutcome) {
        let handle = self.record(&mut self.lock(), deployment_id, &outcome);
        self.finish(deployment_id, outcome, handle);
    }

    /// Bookkeeping done under the lock: notify the outcome, renumber the
    /// remaining deployments and prune the finished ones.
    fn record(
        &self,
        state: &mut DeployerState,
        deployment_id: DeploymentId,
        outcome: &JobOutcome,
    ) -> Option<Arc<JobHandle>> {
        let notified = match outcome {
            JobOutcome::Cancelled => state.observer.notify_cancelled(deployment_id),
            JobOutcome::Failed(err) => state
                .observer
                .notify_completed(deployment_id, Some(err.clone())),
            JobOutcome::Succeeded => state.observer.notify_completed(deployment_id, None),
        };
        if let Err(e) = notified {
            warn!("Unable to notify completion of deployment {}: {}", deployment_id, e);
        }

        state.queue.retain(|id| *id != deployment_id);
        let handle = state.futures.remove(&deployment_id);
        for (position, id) in state.queue.iter().enumerate() {
            if let Err(e) = state.observer.notify_position(*id, position) {
                warn!("Unable to notify position of deployment {}: {}", id, e);
            }
        }

        if let Some(keep) = self.retain_completed {
            let evicted = state.observer.prune(keep);
            if !evicted.is_empty() {
                debug!("Evicted finished deployments {:?}", evicted);
            }
        }
        handle
    }

    fn finish(
        &self,
        deployment_id: DeploymentId,
        outcome: JobOutcome,
        handle: Option<Arc<JobHandle>>,
    ) {
        let Some(handle) = handle else {
            return;
        };
        if outcome == JobOutcome::Succeeded {
            if let Some(bundle_id) = handle.bundle_id.clone() {
                self.increment_counter(bundle_id);
            }
        }
        if let Some(callback) = handle.take_callback() {
            callback(deployment_id);
        }
    }

    /// Fire and forget: failures are only logged
    fn increment_counter(&self, bundle_id: String) {
        let Some(client) = self.counter.clone() else {
            return;
        };
        tokio::spawn(async move {
            match client.increment_deployment_counter(&bundle_id).await {
                Ok(true) => debug!("Deployment counter incremented for {}", bundle_id),
                Ok(false) => warn!("Deployment counter not incremented for {}", bundle_id),
                Err(e) => error!("Unable to increment deployment counter for {}: {}", bundle_id, e),
            }
        });
    }
}

/// Validates bundles and queues their import
pub struct Deployer {
    options: DeployerOptions,
    backend: Arc<dyn BundleBackend>,
    shared: Arc<Shared>,
    jobs_tx: mpsc::UnboundedSender<ImportJob>,
    validation: Semaphore,
}

impl Deployer {
    /// Create a deployer and the worker executing its imports.
    ///
    /// Nothing is imported until [`ImportWorker::run`] is spawned.
    pub fn new(
        options: DeployerOptions,
        backend: Arc<dyn BundleBackend>,
        counter: Option<Arc<HttpClient>>,
    ) -> (Self, ImportWorker) {
        let shared = Arc::new(Shared {
            state: Mutex::new(DeployerState::default()),
            counter,
            retain_completed: options.retain_completed,
        });
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let worker = ImportWorker {
            shared: shared.clone(),
            backend: backend.clone(),
            api_url: options.api_url.clone(),
            import_options: options.import_options.clone(),
            jobs_rx,
        };
        let deployer = Self {
            options,
            backend,
            shared,
            jobs_tx,
            validation: Semaphore::new(1),
        };
        (deployer, worker)
    }

    /// Check the bundle against the environment.
    ///
    /// Returns a human readable error if the bundle cannot be deployed.
    pub async fn validate(&self, user: &User, name: &str, bundle: &Bundle) -> Option<String> {
        let api_version = &self.options.api_version;
        if !SUPPORTED_API_VERSIONS.contains(&api_version.as_str()) {
            return Some(format!("unsupported API version: {}", api_version));
        }

        let _permit = match self.validation.acquire().await {
            Ok(permit) => permit,
            Err(e) => return Some(e.to_string()),
        };
        debug!("Validating bundle {}", name);

        let backend = self.backend.clone();
        let api_url = self.options.api_url.clone();
        let password = user.password.clone();
        let bundle = bundle.clone();
        let result =
            tokio::task::spawn_blocking(move || backend.validate(&api_url, &password, &bundle))
                .await;

        match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                info!("Bundle {} is not valid: {:#}", name, e);
                Some(format!("{:#}", e))
            }
            Err(e) => {
                error!("Bundle {} validation task failed: {}", name, e);
                Some(e.to_string())
            }
        }
    }

    /// Schedule the import of a bundle, returning the new deployment id.
    ///
    /// The import runs in the background; its progress is available through
    /// [`Deployer::watch`] and [`Deployer::next`]. When `test_callback` is
    /// given it is invoked once the deployment is finished.
    pub fn import_bundle(
        &self,
        user: &User,
        name: &str,
        bundle: Bundle,
        bundle_id: Option<String>,
        test_callback: Option<CompletionCallback>,
    ) -> DeploymentId {
        let handle = Arc::new(JobHandle::new(bundle_id, test_callback));

        let (deployment_id, sent) = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;

            let deployment_id = state.observer.add_deployment();
            if let Err(e) = state
                .observer
                .notify_position(deployment_id, state.queue.len())
            {
                warn!("Unable to notify position of deployment {}: {}", deployment_id, e);
            }
            state.queue.push(deployment_id);
            state.futures.insert(deployment_id, handle.clone());

            // Sent under the lock so that the worker sees jobs in queue order.
            let sent = self.jobs_tx.send(ImportJob {
                deployment_id,
                handle,
                password: user.password.clone(),
                name: name.to_string(),
                bundle,
            });
            (deployment_id, sent.is_ok())
        };

        info!("Deployment {} scheduled for bundle {}", deployment_id, name);
        if !sent {
            error!("Import worker is not running, deployment {} aborted", deployment_id);
            self.shared.complete(
                deployment_id,
                JobOutcome::Failed("the import worker is not running".to_string()),
            );
        }
        deployment_id
    }

    /// Start watching a deployment, returning `None` if it is unknown
    pub fn watch(&self, deployment_id: DeploymentId) -> Option<WatcherId> {
        let mut state = self.shared.lock();
        if !state.observer.contains(deployment_id) {
            return None;
        }
        Some(state.observer.add_watcher(deployment_id))
    }

    /// Wait for the changes not yet seen by the given watcher.
    ///
    /// Returns `None` if the watcher is unknown or already waiting.
    pub async fn next(&self, watcher_id: WatcherId) -> Option<Vec<Change>> {
        let pending = {
            let state = self.shared.lock();
            let watcher = state.observer.watcher(watcher_id)?;
            watcher.next(watcher_id)
        };
        let result = match pending {
            Ok(pending) => pending.await,
            Err(e) => Err(e),
        };
        match result {
            Ok(changes) => Some(changes),
            Err(e) => {
                debug!("No changes for watcher {}: {}", watcher_id, e);
                None
            }
        }
    }

    /// Cancel a deployment still waiting in the queue.
    ///
    /// Returns an error message if the deployment cannot be cancelled.
    pub fn cancel(&self, deployment_id: DeploymentId) -> Option<String> {
        let handle = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;

            let Some(handle) = state.futures.get(&deployment_id) else {
                return Some(NOT_FOUND.to_string());
            };
            // The head of the queue is reported started before the worker claims it.
            if state.queue.first() == Some(&deployment_id) || !handle.cancel() {
                return Some(CANNOT_CANCEL.to_string());
            }
            self.shared.record(state, deployment_id, &JobOutcome::Cancelled)
        };
        info!("Deployment {} cancelled", deployment_id);
        self.shared.finish(deployment_id, JobOutcome::Cancelled, handle);
        None
    }

    /// Last known change of every deployment, oldest deployment first
    pub fn status(&self) -> Vec<Change> {
        self.shared.lock().observer.last_changes()
    }

    /// Deployments scheduled or running, in queue order
    pub fn queue(&self) -> Vec<DeploymentId> {
        self.shared.lock().queue.clone()
    }
}

/// Executes imports one at a time, in queue order
pub struct ImportWorker {
    shared: Arc<Shared>,
    backend: Arc<dyn BundleBackend>,
    api_url: String,
    import_options: ImportOptions,
    jobs_rx: mpsc::UnboundedReceiver<ImportJob>,
}

impl ImportWorker {
    /// Run the worker until shutdown or until the deployer is dropped
    pub async fn run(mut self, mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>) {
        info!("Import worker starting...");

        loop {
            let job = tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Import worker shutting down...");
                    return;
                }
                job = self.jobs_rx.recv() => match job {
                    Some(job) => job,
                    None => {
                        info!("Deployer dropped, import worker exiting...");
                        return;
                    }
                },
            };

            if !job.handle.start() {
                debug!("Skipping cancelled deployment {}", job.deployment_id);
                continue;
            }
            let deployment_id = job.deployment_id;
            let outcome = self.execute(job).await;
            self.shared.complete(deployment_id, outcome);
        }
    }

    async fn execute(&self, job: ImportJob) -> JobOutcome {
        let deployment_id = job.deployment_id;
        info!("Deployment {} started", deployment_id);

        let backend = self.backend.clone();
        let api_url = self.api_url.clone();
        let options = self.import_options.clone();
        let result = tokio::task::spawn_blocking(move || {
            backend.import_bundle(&api_url, &job.password, &job.name, &job.bundle, &options)
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Deployment {} completed", deployment_id);
                JobOutcome::Succeeded
            }
            Ok(Err(e)) => {
                error!("Deployment {} failed: {:#}", deployment_id, e);
                JobOutcome::Failed(format!("{:#}", e))
            }
            Err(e) => {
                error!("Deployment {} import task failed: {}", deployment_id, e);
                JobOutcome::Failed(e.to_string())
            }
        }
    }
}
