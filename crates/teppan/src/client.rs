//! Client side of the IPC protocol.

use std::io;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::backend::ComputeBackend;
use crate::communication::{Request, Response, RetryReason};
use crate::config::{ClientConfig, ServerConfig};
use crate::error::{ClientError, ComputeFailure, TransportError};
use crate::params::Parameters;
use crate::server::Server;
use crate::tensor::Tensor;
use crate::transport::{self, Address, ClientChannel};
use crate::Inputs;

/// Starts a server for an address in the background.
type Launcher = Arc<dyn Fn(Address, ServerConfig) -> JoinHandle<()> + Send + Sync>;

/// # Client
///
/// Holds one connection to the server for its address, reconnecting when the
/// connection is lost. A client built with [`Client::with_loader`] starts its
/// own server in this process when none is running.
///
/// Requests on one client are strictly sequential; use one client per
/// concurrent caller.
///
/// ```no_run
/// # use teppan::{Address, Client, ClientConfig, Inputs, Parameters};
/// # async fn example(inputs: Inputs) -> Result<(), teppan::ClientError> {
/// let mut client = Client::connect(Address::for_backend("my-model"), ClientConfig::default()).await?;
/// let output = client.generate(inputs, Parameters::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    address: Address,
    config: ClientConfig,
    launcher: Option<Launcher>,
    channel: Option<ClientChannel>,
    server: Option<JoinHandle<()>>,
}

impl Client {
    /// Connect to an already running server.
    pub async fn connect(address: Address, config: ClientConfig) -> Result<Self, ClientError> {
        let mut client = Self {
            address,
            config,
            launcher: None,
            channel: None,
            server: None,
        };
        client.ensure_connected().await?;
        Ok(client)
    }

    /// A client that starts a server with a backend built by `loader` if none
    /// is listening. Nothing happens until the first request.
    pub fn with_loader<C, F>(address: Address, config: ClientConfig, loader: F) -> Self
    where
        C: ComputeBackend,
        F: Fn() -> Result<C, ComputeFailure> + Send + Sync + 'static,
    {
        let loader = Arc::new(loader);
        let launcher: Launcher = Arc::new(move |address: Address, config: ServerConfig| {
            let loader = loader.clone();
            tokio::spawn(async move {
                let built = tokio::task::spawn_blocking(move || Server::from_loader(&*loader, address, config)).await;
                let result = match built {
                    Ok(Ok(server)) => server.run().await,
                    Ok(Err(e)) => Err(e),
                    Err(e) => {
                        tracing::error!(error = %e, "backend loader panicked");
                        return;
                    }
                };
                if let Err(e) = result {
                    tracing::error!(error = %e, "spawned server failed");
                }
            })
        });

        Self {
            address,
            config,
            launcher: Some(launcher),
            channel: None,
            server: None,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Close the connection. The next request reconnects.
    pub fn disconnect(&mut self) {
        self.channel = None;
    }

    /// Open the connection if there is none, starting a server first when
    /// this client has a loader and nothing is listening.
    pub async fn ensure_connected(&mut self) -> Result<(), ClientError> {
        if self.channel.is_some() {
            return Ok(());
        }

        let channel = match transport::connect(&self.address).await {
            Ok(channel) => channel,
            Err(e) if e.is_unavailable() => match self.launcher.clone() {
                Some(launch) => {
                    // A server this client started may still be loading its
                    // backend, or still winding down after going idle.
                    let relaunch = if self.spawn_server(&launch) { None } else { Some(launch) };
                    self.wait_for_server(relaunch).await?
                }
                None => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(address = %self.address, "connected");
        self.channel = Some(channel);
        Ok(())
    }

    /// Start a server unless one this client started is still running.
    /// Returns whether a new one was started.
    fn spawn_server(&mut self, launch: &Launcher) -> bool {
        if self.server.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }
        tracing::info!(address = %self.address, "no server running; starting one");
        self.server = Some(launch(self.address.clone(), self.config.server.clone()));
        true
    }

    /// Poll until the spawned server accepts a connection.
    ///
    /// If the server being waited on exits and `relaunch` is set, a fresh
    /// one is started once.
    async fn wait_for_server(&mut self, mut relaunch: Option<Launcher>) -> Result<ClientChannel, ClientError> {
        let started = Instant::now();
        loop {
            match transport::connect(&self.address).await {
                Ok(channel) => return Ok(channel),
                Err(e) if e.is_unavailable() => {}
                Err(e) => return Err(e.into()),
            }

            let waited = started.elapsed();
            let mut exited = self.server.as_ref().is_some_and(JoinHandle::is_finished);
            if exited {
                if let Some(launch) = relaunch.take() {
                    self.spawn_server(&launch);
                    exited = false;
                }
            }
            if exited || waited >= self.config.startup_timeout {
                return Err(ClientError::ServerUnavailable {
                    address: self.address.to_string(),
                    waited,
                });
            }
            time::sleep(self.config.poll_interval).await;
        }
    }

    /// Run `inputs` through the server's backend under `parameters`.
    ///
    /// A failed batch or a lost connection costs one attempt out of
    /// `max_retries`. A corrupted frame is resent without costing one.
    pub async fn generate(&mut self, inputs: Inputs, parameters: Parameters) -> Result<Tensor, ClientError> {
        let request = Request { inputs, parameters };

        for attempt in 1..=self.config.max_retries {
            self.ensure_connected().await?;
            match self.round_trip(&request).await {
                Ok(Response::Output(output)) => return Ok(output),
                Ok(Response::Rejected(reason)) => return Err(ClientError::Rejected(reason)),
                Ok(Response::Resend(reason)) => {
                    tracing::warn!(attempt, ?reason, "server asked for the request again");
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "connection lost; reconnecting");
                    self.channel = None;
                }
            }
        }
        Err(ClientError::RetryBudgetExhausted(self.config.max_retries))
    }

    async fn round_trip(&mut self, request: &Request) -> Result<Response, TransportError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| TransportError::Unavailable(self.address.to_string()))?;

        loop {
            channel.send(request).await?;
            match channel.recv::<Response>().await? {
                Some(Response::Resend(RetryReason::CorruptFrame)) => {
                    tracing::debug!("request frame arrived corrupt; resending");
                }
                Some(response) => return Ok(response),
                None => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection").into());
                }
            }
        }
    }
}
