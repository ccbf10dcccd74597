//! Bounded FIFO between the puller and the pusher. Send blocks while the
//! queue is full, which is the pipeline's backpressure point; receive offers
//! a timeout-bounded variant so batch assembly never stalls indefinitely on a
//! slow producer.

use crate::btc::types::Header;
use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Creates the single-producer single-consumer header queue.
pub fn header_queue(capacity: usize) -> (HeaderSender, HeaderReceiver) {
    assert!(capacity > 0, "queue capacity must be greater than zero");
    let (tx, rx) = mpsc::channel(capacity);
    (HeaderSender { tx }, HeaderReceiver { rx })
}

/// Outcome of a timeout-bounded receive attempt.
#[derive(Debug)]
pub enum QueuePoll {
    /// A header was waiting (or arrived) within the window.
    Received(Header),
    /// The window elapsed with nothing to hand out.
    Empty,
    /// The producer is gone and the buffer is drained.
    Closed,
}

#[derive(Debug, Clone)]
pub struct HeaderSender {
    tx: mpsc::Sender<Header>,
}

impl HeaderSender {
    /// Enqueues one header, waiting for a free slot while the queue is full.
    pub async fn send(&self, header: Header) -> Result<()> {
        self.tx
            .send(header)
            .await
            .map_err(|_| anyhow!("header queue is closed"))
    }

    /// Number of headers currently buffered.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[derive(Debug)]
pub struct HeaderReceiver {
    rx: mpsc::Receiver<Header>,
}

impl HeaderReceiver {
    /// Waits for the next header with no time bound.
    pub async fn recv(&mut self) -> Option<Header> {
        self.rx.recv().await
    }

    /// Waits for the next header for at most `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> QueuePoll {
        match timeout(wait, self.rx.recv()).await {
            Ok(Some(header)) => QueuePoll::Received(header),
            Ok(None) => QueuePoll::Closed,
            Err(_) => QueuePoll::Empty,
        }
    }
}
