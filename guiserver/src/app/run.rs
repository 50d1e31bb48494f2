//! Main application run loop

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::authn::authenticator::{Authenticator, StaticAuthenticator};
use crate::bundles::backend::CommandBackend;
use crate::bundles::deployer::Deployer;
use crate::errors::GuiServerError;
use crate::http::client::HttpClient;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the GUI server until the shutdown signal fires
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), GuiServerError> {
    info!("Initializing GUI server...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    match init(&options, &shutdown_tx, &mut shutdown_manager).await {
        Ok(addr) => info!("GUI server listening on {}", addr),
        Err(e) => {
            error!("Failed to start the GUI server: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<SocketAddr, GuiServerError> {
    let deployer = init_deployer(options, shutdown_manager, shutdown_tx.subscribe())?;

    let authenticator: Arc<dyn Authenticator> = Arc::new(StaticAuthenticator::new(
        options.auth.username.clone(),
        options.auth.password.clone(),
    ));
    if options.auth.password.is_none() {
        warn!("No password configured, every login will be rejected");
    }

    init_server(
        options,
        ServerState::new(deployer, authenticator),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await
}

fn init_deployer(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<Arc<Deployer>, GuiServerError> {
    info!("Initializing deployer...");

    let counter = match &options.charmworld_url {
        Some(url) => Some(Arc::new(HttpClient::new(url)?)),
        None => {
            info!("No charmworld URL configured, deployment counters disabled");
            None
        }
    };
    let backend = Arc::new(CommandBackend::new(options.deployer_command.clone()));
    let (deployer, worker) = Deployer::new(options.deployer.clone(), backend, counter);

    let worker_handle = tokio::spawn(async move {
        worker
            .run(Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }))
            .await;
    });
    shutdown_manager.with_import_worker_handle(worker_handle)?;

    Ok(Arc::new(deployer))
}

async fn init_server(
    options: &AppOptions,
    state: ServerState,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<SocketAddr, GuiServerError> {
    info!("Initializing HTTP server...");

    let (addr, server_handle) = serve(&options.server, Arc::new(state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(addr)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), GuiServerError>>>,
    import_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            import_worker_handle: None,
        }
    }

    pub fn with_import_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), GuiServerError> {
        if self.import_worker_handle.is_some() {
            return Err(GuiServerError::ShutdownError(
                "import_worker_handle already set".to_string(),
            ));
        }
        self.import_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), GuiServerError>>,
    ) -> Result<(), GuiServerError> {
        if self.server_handle.is_some() {
            return Err(GuiServerError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), GuiServerError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), GuiServerError> {
        info!("Shutting down GUI server...");

        // 1. Server, no new deployments past this point
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| GuiServerError::ShutdownError(e.to_string()))??;
        }

        // 2. Import worker, waits for the running import
        if let Some(handle) = self.import_worker_handle.take() {
            handle
                .await
                .map_err(|e| GuiServerError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
