use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use super::SharedState;
use super::worker::Shutdown;
use crate::communication::{Outcome, Request, RequestRecord, Response, RetryReason};
use crate::error::TransportError;
use crate::params::GroupKey;
use crate::transport::Channel;

/// Serve one client connection until it closes or the server shuts down.
///
/// The caller counts the connection as open before spawning this; it is
/// counted as closed here however the loop ends.
pub(crate) async fn handle_connection<S>(channel: Channel<S>, state: SharedState, shutdown: Arc<Shutdown>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    serve(channel, &state, &shutdown).await;
    state.lock().await.connection_closed();
}

async fn serve<S>(mut channel: Channel<S>, state: &SharedState, shutdown: &Shutdown)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    while shutdown.is_running() {
        let received = tokio::select! {
            _ = shutdown.stopped() => break,
            received = channel.recv::<Request>() => received,
        };

        let response = match received {
            Ok(Some(request)) => submit(state, shutdown, request).await,
            Ok(None) => {
                tracing::debug!("client disconnected");
                break;
            }
            Err(TransportError::Corrupt(e)) => {
                tracing::debug!(error = %e, "undecodable request frame; asking for resend");
                Response::Resend(RetryReason::CorruptFrame)
            }
            Err(e) => {
                tracing::debug!(error = %e, "connection lost");
                break;
            }
        };

        // The client may have gone while its request was in flight.
        if let Err(e) = channel.send(&response).await {
            tracing::debug!(error = %e, "could not deliver response");
            break;
        }
    }
}

/// Queue `request` and wait for the scheduler to finish it.
pub(crate) async fn submit(state: &SharedState, shutdown: &Shutdown, request: Request) -> Response {
    let Request { inputs, parameters } = request;
    let (record, completion) = match RequestRecord::new(inputs) {
        Ok(created) => created,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting request");
            return Response::Rejected(e.to_string());
        }
    };

    let key = GroupKey::from(&parameters);
    tracing::trace!(record = %record.id(), rows = record.total_work(), group = %key, "request queued");
    {
        let mut state = state.lock().await;
        // Checked under the lock so nothing is queued after shutdown clears the table.
        if !shutdown.is_running() {
            return Response::Resend(RetryReason::BatchFailed);
        }
        state.groups.enqueue(key, parameters, record);
    }

    match completion.await {
        Ok(Outcome::Completed(output)) => Response::Output(output),
        Ok(Outcome::Retry(reason)) => Response::Resend(reason),
        // Dropped unsignalled, which only happens on shutdown.
        Err(_) => Response::Resend(RetryReason::BatchFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{DuplexStream, duplex};
    use tokio::time;

    use crate::backend::mock::EchoBackend;
    use crate::config::ServerConfig;
    use crate::core::batch::BatchScheduler;
    use crate::core::shared_state;
    use crate::core::worker::WorkerHandle;
    use crate::params::Parameters;
    use crate::tensor::Tensor;
    use crate::Inputs;

    const SLOT: &str = "decoder_input_ids";

    fn request(rows: usize) -> Request {
        let mut inputs = Inputs::new();
        inputs.insert(
            SLOT.into(),
            Tensor::from_i64(vec![rows, 2], (0..rows as i64 * 2).collect()).unwrap(),
        );
        Request {
            inputs,
            parameters: Parameters::new(),
        }
    }

    struct Harness {
        state: SharedState,
        shutdown: Arc<Shutdown>,
        _scheduler: WorkerHandle,
    }

    fn harness() -> Harness {
        let state = shared_state();
        let shutdown = Arc::new(Shutdown::new());
        let config = ServerConfig {
            batch_timeout: Duration::from_millis(5),
            ..ServerConfig::default()
        };
        let batcher = Arc::new(BatchScheduler::new(Arc::new(EchoBackend::new(SLOT)), state.clone(), config));
        let scheduler = WorkerHandle::new(shutdown.clone(), |shutdown| {
            tokio::spawn(async move { batcher.run(shutdown).await })
        });
        Harness {
            state,
            shutdown,
            _scheduler: scheduler,
        }
    }

    async fn open(harness: &Harness) -> (Channel<DuplexStream>, tokio::task::JoinHandle<()>) {
        let (client, server) = duplex(1 << 16);
        harness.state.lock().await.connection_opened();
        let task = tokio::spawn(handle_connection(
            Channel::new(server),
            harness.state.clone(),
            harness.shutdown.clone(),
        ));
        (Channel::new(client), task)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let harness = harness();
        let (mut client, _task) = open(&harness).await;

        let sent = request(3);
        client.send(&sent).await.unwrap();
        let reply: Response = client.recv().await.unwrap().unwrap();
        assert_eq!(reply, Response::Output(sent.inputs[SLOT].clone()));

        // A connection carries any number of sequential requests.
        client.send(&request(1)).await.unwrap();
        assert!(matches!(client.recv::<Response>().await.unwrap(), Some(Response::Output(_))));
    }

    #[tokio::test]
    async fn test_corrupt_frame_asks_for_resend() {
        let harness = harness();
        let (mut client, _task) = open(&harness).await;

        client.send_raw(&[0xc1, 0xc1, 0xc1]).await.unwrap();
        let reply: Response = client.recv().await.unwrap().unwrap();
        assert_eq!(reply, Response::Resend(RetryReason::CorruptFrame));

        client.send(&request(2)).await.unwrap();
        assert!(matches!(client.recv::<Response>().await.unwrap(), Some(Response::Output(_))));
    }

    #[tokio::test]
    async fn test_malformed_request_rejected() {
        let harness = harness();
        let (mut client, _task) = open(&harness).await;

        client.send(&request(0)).await.unwrap();
        let reply: Response = client.recv().await.unwrap().unwrap();
        assert!(matches!(reply, Response::Rejected(_)));
        assert!(harness.state.lock().await.groups.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_closes_connection() {
        let harness = harness();
        let (client, task) = open(&harness).await;
        assert_eq!(harness.state.lock().await.connections, 1);

        drop(client);
        time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(harness.state.lock().await.connections, 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_resends() {
        let state = shared_state();
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let reply = submit(&state, &shutdown, request(1)).await;
        assert_eq!(reply, Response::Resend(RetryReason::BatchFailed));
        assert!(state.lock().await.groups.is_empty());
    }

    #[tokio::test]
    async fn test_cleared_table_resends() {
        let state = shared_state();
        let shutdown = Arc::new(Shutdown::new());

        let waiting = tokio::spawn({
            let state = state.clone();
            let shutdown = shutdown.clone();
            async move { submit(&state, &shutdown, request(1)).await }
        });
        while state.lock().await.groups.is_empty() {
            tokio::task::yield_now().await;
        }

        state.lock().await.groups.clear();
        let reply = time::timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
        assert_eq!(reply, Response::Resend(RetryReason::BatchFailed));
    }
}
