use std::sync::Arc;
use std::time::Duration;

use super::SharedState;
use super::handler::handle_connection;
use super::worker::Shutdown;
use crate::transport::Listener;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Accept connections until shutdown, one handler task per connection.
pub(crate) async fn accept_loop(mut listener: Listener, state: SharedState, shutdown: Arc<Shutdown>) {
    while shutdown.is_running() {
        let accepted = tokio::select! {
            _ = shutdown.stopped() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(channel) => {
                state.lock().await.connection_opened();
                tracing::debug!("client connected");
                tokio::spawn(handle_connection(channel, state.clone(), shutdown.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed; retrying");
                tokio::select! {
                    _ = shutdown.stopped() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
    tracing::debug!("listener stopped");
}
