use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::Outcome;

/// # Completion
///
/// Resolves once the scheduler has finished, or given up on, a request.
///
/// An error means the record was dropped without being signalled, which
/// happens when the server shuts down with the request still queued.
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<Outcome>,
}

impl Completion {
    pub(crate) fn new(receiver: oneshot::Receiver<Outcome>) -> Self {
        Self { receiver }
    }
}

impl Future for Completion {
    type Output = Result<Outcome, oneshot::error::RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().receiver).poll(cx)
    }
}
