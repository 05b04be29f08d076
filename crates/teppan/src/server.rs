//! The batching server: listener, per-connection handlers, batch scheduler
//! and idle monitor sharing one group table.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::backend::ComputeBackend;
use crate::config::ServerConfig;
use crate::core::batch::BatchScheduler;
use crate::core::idle::idle_monitor;
use crate::core::listener::accept_loop;
use crate::core::shared_state;
use crate::core::worker::{Shutdown, WorkerHandle};
use crate::error::{ComputeFailure, ServerError};
use crate::transport::{Address, Listener, remove_stale};

/// # Server
///
/// Owns a compute backend and serves batched requests for it on one address.
///
/// ```no_run
/// # use teppan::{Address, Server, ServerConfig, ComputeBackend};
/// # async fn example<C: ComputeBackend>(backend: C) -> Result<(), teppan::ServerError> {
/// let server = Server::new(backend, Address::for_backend("my-model"), ServerConfig::default());
/// // Serves until no client has been connected for the idle timeout.
/// server.run().await
/// # }
/// ```
pub struct Server<C> {
    backend: Arc<C>,
    address: Address,
    config: ServerConfig,
}

impl<C: ComputeBackend> Server<C> {
    pub fn new(backend: C, address: Address, config: ServerConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            address,
            config,
        }
    }

    /// Build the backend with `loader`, then create the server.
    pub fn from_loader<F>(loader: F, address: Address, config: ServerConfig) -> Result<Self, ServerError>
    where
        F: FnOnce() -> Result<C, ComputeFailure>,
    {
        let backend = loader()?;
        Ok(Self::new(backend, address, config))
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Bind the address and spawn the server's tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        self.config.validate()?;
        let listener = Listener::bind(&self.address).map_err(|source| ServerError::Bind {
            address: self.address.to_string(),
            source,
        })?;
        tracing::info!(
            address = %self.address,
            max_batch_size = self.config.max_batch_size,
            batch_timeout_ms = self.config.batch_timeout.as_millis() as u64,
            idle_timeout_ms = self.config.idle_timeout.as_millis() as u64,
            "server listening"
        );

        let state = shared_state();
        let shutdown = Arc::new(Shutdown::new());

        let scheduler = WorkerHandle::new(shutdown.clone(), {
            let batcher = BatchScheduler::new(self.backend, state.clone(), self.config.clone());
            move |shutdown| tokio::spawn(async move { batcher.run(shutdown).await })
        });
        let idle = WorkerHandle::new(shutdown.clone(), {
            let state = state.clone();
            let idle_timeout = self.config.idle_timeout;
            move |shutdown| tokio::spawn(idle_monitor(state, idle_timeout, shutdown))
        });

        let task = tokio::spawn({
            let address = self.address.clone();
            let shutdown = shutdown.clone();
            async move {
                accept_loop(listener, state.clone(), shutdown).await;
                if let Err(e) = remove_stale(&address) {
                    tracing::warn!(address = %address, error = %e, "could not remove socket");
                }
                {
                    let mut state = state.lock().await;
                    if !state.groups.is_empty() {
                        tracing::warn!(groups = state.groups.len(), "dropping queued requests");
                    }
                    // Waiting handlers see their completions close and ask for a resend.
                    state.groups.clear();
                }
                scheduler.join().await;
                idle.join().await;
                tracing::info!(address = %address, "server stopped");
            }
        });

        Ok(ServerHandle {
            address: self.address,
            shutdown,
            task,
        })
    }

    /// Start the server and serve until it shuts down.
    pub async fn run(self) -> Result<(), ServerError> {
        self.start()?.wait().await;
        Ok(())
    }
}

/// A running server.
///
/// Dropping the handle does not stop the server.
pub struct ServerHandle {
    address: Address,
    shutdown: Arc<Shutdown>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_running()
    }

    /// Ask the server to stop. Use [`ServerHandle::wait`] to wait for it.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for the server to stop and release its address.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "server task ended abnormally");
        }
    }
}
