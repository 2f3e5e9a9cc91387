//! Channel-backed event streams with explicit cancellation.

use crate::{Error, Result};
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Events after which a stream ends.
pub trait TerminalEvent {
    fn is_terminal(&self) -> bool;
}

/// Item produced by a running generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// Text from the active provider, in provider order.
    Fragment { text: String },
    /// The active provider failed after emitting fragments; everything
    /// received since the last `Discard` must be dropped.
    Discard { provider: String },
    /// Terminal success: the stream from `provider` ran to completion.
    Completed { provider: String },
}

impl TerminalEvent for GenerationEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Cancels a running stream.
///
/// Cancelling tears down the active provider request. The outcome is neutral
/// for circuit bookkeeping.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Consumer side of a spawned producer.
///
/// Ends after a terminal event or the first error. A cancelled stream yields
/// a single `Err(Error::Cancelled)`; items still buffered are dropped.
/// Dropping the stream cancels the producer.
pub struct EventStream<T> {
    rx: mpsc::Receiver<Result<T>>,
    token: CancellationToken,
    finished: bool,
}

pub type GenerationStream = EventStream<GenerationEvent>;

impl<T> EventStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Result<T>>, token: CancellationToken) -> Self {
        Self {
            rx,
            token,
            finished: false,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    fn finish_cancelled(&mut self) -> Poll<Option<Result<T>>> {
        self.finished = true;
        self.rx.close();
        Poll::Ready(Some(Err(Error::Cancelled)))
    }
}

impl<T: TerminalEvent> Stream for EventStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if this.token.is_cancelled() {
            return this.finish_cancelled();
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                let terminal = match &item {
                    Ok(event) => event.is_terminal(),
                    Err(_) => true,
                };
                if terminal {
                    this.finished = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                // Producers exit promptly on cancellation, closing the channel.
                if this.token.is_cancelled() {
                    return this.finish_cancelled();
                }
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Unpin for EventStream<T> {}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Producer side: send unless the consumer cancelled or went away.
pub(crate) async fn emit<T>(
    tx: &mpsc::Sender<Result<T>>,
    token: &CancellationToken,
    event: T,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        sent = tx.send(Ok(event)) => sent.map_err(|_| Error::Cancelled),
    }
}
