#![cfg(unix)]

mod common;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Echo, SLOT, fast_client, socket, tokens};
use teppan::transport::{Listener, ServerChannel};
use teppan::{Client, ClientConfig, ClientError, Parameters, Request, Response, RetryReason};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Serve requests on `listener`, answering the `n`th request with
/// `reply(n, request)`, or dropping the connection when it returns `None`.
fn fake_server<F>(mut listener: Listener, mut reply: F) -> (JoinHandle<()>, Arc<AtomicUsize>)
where
    F: FnMut(usize, &Request) -> Option<Response> + Send + 'static,
{
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let task = tokio::spawn(async move {
        while let Ok(mut channel) = listener.accept().await {
            while let Some(request) = next_request(&mut channel).await {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let Some(response) = reply(n, &request) else {
                    break;
                };
                if channel.send(&response).await.is_err() {
                    break;
                }
            }
        }
    });
    (task, seen)
}

async fn next_request(channel: &mut ServerChannel) -> Option<Request> {
    channel.recv::<Request>().await.ok().flatten()
}

#[tokio::test]
async fn reconnects_after_dropped_connection() {
    let dir = tempfile::tempdir().unwrap();
    let address = socket(&dir, "drop.sock");
    let listener = Listener::bind(&address).unwrap();
    let (_server, _) = fake_server(listener, |seen, request| {
        (seen > 1).then(|| Response::Output(request.inputs[SLOT].clone()))
    });

    let inputs = tokens(2, 2, 0);
    let mut client = Client::connect(address, fast_client()).await.unwrap();
    let output = timeout(Duration::from_secs(5), client.generate(inputs.clone(), Parameters::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output, inputs[SLOT]);
    assert!(client.is_connected());
}

#[tokio::test]
async fn retry_budget_is_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let address = socket(&dir, "budget.sock");
    let listener = Listener::bind(&address).unwrap();
    let (_server, seen) = fake_server(listener, |_, _| Some(Response::Resend(RetryReason::BatchFailed)));

    let mut client = Client::connect(address, fast_client()).await.unwrap();
    let err = client.generate(tokens(1, 1, 0), Parameters::new()).await.err().unwrap();
    assert!(matches!(err, ClientError::RetryBudgetExhausted(3)));

    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn repeated_connection_loss_spends_budget() {
    let dir = tempfile::tempdir().unwrap();
    let address = socket(&dir, "lost.sock");
    let listener = Listener::bind(&address).unwrap();
    let (_server, seen) = fake_server(listener, |_, _| None);

    let mut client = Client::connect(address, fast_client()).await.unwrap();
    let err = timeout(Duration::from_secs(5), client.generate(tokens(1, 1, 0), Parameters::new()))
        .await
        .unwrap()
        .err()
        .unwrap();
    assert!(matches!(err, ClientError::RetryBudgetExhausted(3)));
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn corrupt_frame_resends_do_not_spend_budget() {
    let dir = tempfile::tempdir().unwrap();
    let address = socket(&dir, "corrupt.sock");
    let listener = Listener::bind(&address).unwrap();
    let (_server, _) = fake_server(listener, |seen, request| {
        Some(if seen <= 5 {
            Response::Resend(RetryReason::CorruptFrame)
        } else {
            Response::Output(request.inputs[SLOT].clone())
        })
    });

    let config = ClientConfig {
        max_retries: 1,
        ..fast_client()
    };
    let mut client = Client::connect(address, config).await.unwrap();
    let output = client.generate(tokens(1, 3, 0), Parameters::new()).await.unwrap();
    assert_eq!(output.shape(), &[1, 3]);
}

#[tokio::test]
async fn rejection_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let address = socket(&dir, "reject.sock");
    let listener = Listener::bind(&address).unwrap();
    let (_server, seen) = fake_server(listener, |_, _| Some(Response::Rejected("no inputs".into())));

    let mut client = Client::connect(address, fast_client()).await.unwrap();
    let err = client.generate(tokens(1, 1, 0), Parameters::new()).await.err().unwrap();
    assert!(matches!(err, ClientError::Rejected(reason) if reason == "no inputs"));

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn loader_spawns_server_on_first_request() {
    let dir = tempfile::tempdir().unwrap();
    let address = socket(&dir, "spawn.sock");
    let mut client = Client::with_loader(address.clone(), fast_client(), || Ok(Echo::new()));
    assert!(!Path::new(address.as_str()).exists());

    let inputs = tokens(3, 2, 0);
    let output = timeout(Duration::from_secs(5), client.generate(inputs.clone(), Parameters::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output, inputs[SLOT]);
    assert!(Path::new(address.as_str()).exists());

    // A second client finds the running server instead of starting another.
    let mut other = Client::connect(address, fast_client()).await.unwrap();
    other.generate(tokens(1, 2, 0), Parameters::new()).await.unwrap();
}

#[tokio::test]
async fn loader_starts_a_fresh_server_after_idle_exit() {
    let dir = tempfile::tempdir().unwrap();
    let address = socket(&dir, "respawn.sock");
    let mut config = fast_client();
    config.server.idle_timeout = Duration::from_millis(200);

    let loads = Arc::new(AtomicUsize::new(0));
    let mut client = Client::with_loader(address.clone(), config, {
        let loads = loads.clone();
        move || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Echo::new())
        }
    });

    let inputs = tokens(2, 2, 0);
    let first = timeout(Duration::from_secs(5), client.generate(inputs.clone(), Parameters::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, inputs[SLOT]);
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    // With no client connected the server exits and releases its socket.
    client.disconnect();
    timeout(Duration::from_secs(5), async {
        while Path::new(address.as_str()).exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let second = timeout(Duration::from_secs(5), client.generate(inputs.clone(), Parameters::new()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, inputs[SLOT]);
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}
