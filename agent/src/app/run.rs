//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::alerts::Priority;
use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::heartbeat::scheduler::HeartbeatScheduler;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the keeper until the shutdown signal fires
pub async fn run(
    state: Arc<AppState>,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing phoenix {}...", state.version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(state.clone(), &options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start phoenix: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    state: Arc<AppState>,
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    ensure_deployed(&state, options).await?;

    init_failover_recorder(state.clone(), shutdown_manager, shutdown_tx.subscribe())?;

    state.register_jobs(options)?;
    state.scheduler.start();
    shutdown_manager.with_scheduler(state.scheduler.clone())?;

    if options.enable_server {
        init_server(options, state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;
    }

    Ok(())
}

/// Deploy the configured workload unless a recorded deployment was restored
async fn ensure_deployed(state: &AppState, options: &AppOptions) -> Result<(), AgentError> {
    if let Some(deployment) = state.manager.active_deployment() {
        info!("Keeping deployment {} on {}", deployment.id, deployment.provider);
        return Ok(());
    }

    info!("No recorded deployment, deploying {}", options.deployment.image);
    match state.manager.deploy(&options.deployment).await {
        Ok(deployment) => {
            state.persist().await?;
            state
                .notifier
                .notify(
                    &format!("Deployed {} on {}", deployment.id, deployment.provider),
                    Priority::Normal,
                )
                .await;
            Ok(())
        }
        Err(e) => {
            state
                .notifier
                .notify(&format!("Initial deploy failed: {}", e), Priority::High)
                .await;
            Err(e)
        }
    }
}

/// Keep the deployment record in step with failover events
fn init_failover_recorder(
    state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    let mut events = state.manager.subscribe();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Failover recorder shutting down...");
                    return;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = state.persist().await {
                            error!("Failed to record failover to {}: {}", event.to, e);
                        }
                        state
                            .notifier
                            .notify(
                                &format!("Failed over from {} to {} ({})", event.from, event.to, event.deployment_id),
                                Priority::Normal,
                            )
                            .await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} failover events", skipped);
                        if let Err(e) = state.persist().await {
                            error!("Failed to record active deployment: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    });

    shutdown_manager.with_failover_recorder_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AgentError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(
        state.version.clone(),
        state.manager.clone(),
        state.scheduler.clone(),
        state.healer.clone(),
        state.storage.clone(),
    );

    let handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    scheduler: Option<Arc<HeartbeatScheduler>>,
    failover_recorder_handle: Option<JoinHandle<()>>,
    server_handle: Option<JoinHandle<Result<(), AgentError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            scheduler: None,
            failover_recorder_handle: None,
            server_handle: None,
        }
    }

    pub fn with_scheduler(&mut self, scheduler: Arc<HeartbeatScheduler>) -> Result<(), AgentError> {
        if self.scheduler.is_some() {
            return Err(AgentError::ShutdownError("scheduler already set".to_string()));
        }
        self.scheduler = Some(scheduler);
        Ok(())
    }

    pub fn with_failover_recorder_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.failover_recorder_handle.is_some() {
            return Err(AgentError::ShutdownError("failover_recorder_handle already set".to_string()));
        }
        self.failover_recorder_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        if self.server_handle.is_some() {
            return Err(AgentError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
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

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down phoenix...");

        // 1. Scheduler timers
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }

        // 2. Failover recorder
        if let Some(handle) = self.failover_recorder_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 3. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
