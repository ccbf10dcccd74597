//! Pushing half of the forwarder: assembles bounded batches from the queue,
//! submits them to the host chain, and paces itself between submissions so
//! the host chain can finalize and fees stay sane.

use crate::btc::types::Header;
use crate::forwarder::queue::{HeaderReceiver, QueuePoll};
use crate::forwarder::{ForwarderOptions, DIFFICULTY_EPOCH_DURATION};
use crate::host::HostChain;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub(crate) struct Pusher {
    host: Arc<dyn HostChain>,
    headers_rx: HeaderReceiver,
    /// Difficulty-epoch boundary header pulled off the queue while closing the
    /// previous batch; it seeds the next batch so ordering is preserved.
    carried_over: Option<Header>,
    telemetry: Arc<Telemetry>,
    options: ForwarderOptions,
    shutdown: CancellationToken,
}

impl Pusher {
    pub(crate) fn new(
        host: Arc<dyn HostChain>,
        headers_rx: HeaderReceiver,
        telemetry: Arc<Telemetry>,
        options: ForwarderOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            host,
            headers_rx,
            carried_over: None,
            telemetry,
            options,
            shutdown,
        }
    }

    /// Runs until cancellation, queue closure, or the first failed
    /// submission. Returns `Ok(())` on the former two; any `Err` is fatal to
    /// the whole pipeline.
    pub(crate) async fn run(mut self) -> Result<()> {
        tracing::info!("running forwarder pushing loop");

        loop {
            let Some(batch) = self.assemble_batch().await else {
                tracing::info!("forwarder pushing loop done");
                return Ok(());
            };

            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let Some(first) = batch.first() else {
                continue;
            };
            let opens_epoch = is_retarget_height(first.height());

            tracing::info!(
                count = batch.len(),
                start_height = first.height(),
                retarget = opens_epoch,
                "pushing headers to host chain"
            );

            let submission = tokio::select! {
                result = self.submit(&batch, opens_epoch) => result,
                _ = self.shutdown.cancelled() => return Ok(()),
            };
            submission.context("could not push headers to host chain")?;

            self.telemetry.record_submitted_batch();
            self.telemetry.record_processed_headers(batch.len() as u64);

            tracing::info!(
                pause = ?self.options.pushing_sleep_time,
                "suspending pushing loop after submission"
            );
            tokio::select! {
                _ = sleep(self.options.pushing_sleep_time) => {}
                _ = self.shutdown.cancelled() => return Ok(()),
            }
        }
    }

    /// Drains up to `headers_batch_size` headers. The first header waits
    /// without a time bound; each further header waits at most
    /// `header_timeout`, so a slow producer yields a partial batch rather
    /// than an ever-pending one. A batch never crosses a difficulty-epoch
    /// boundary: the boundary header is held back and seeds the next batch.
    ///
    /// Returns `None` when the pusher should terminate (cancellation, or the
    /// queue closed with nothing left to submit).
    async fn assemble_batch(&mut self) -> Option<Vec<Header>> {
        let first = match self.carried_over.take() {
            Some(header) => header,
            None => tokio::select! {
                received = self.headers_rx.recv() => received?,
                _ = self.shutdown.cancelled() => return None,
            },
        };

        let mut batch = vec![first];

        while batch.len() < self.options.headers_batch_size {
            match self.headers_rx.recv_timeout(self.options.header_timeout).await {
                QueuePoll::Received(header) => {
                    if is_retarget_height(header.height()) {
                        self.carried_over = Some(header);
                        break;
                    }
                    batch.push(header);
                }
                QueuePoll::Empty | QueuePoll::Closed => break,
            }
        }

        Some(batch)
    }

    async fn submit(&self, batch: &[Header], opens_epoch: bool) -> Result<()> {
        if opens_epoch {
            self.host.add_headers_with_retarget(batch).await
        } else {
            self.host.add_headers(batch).await
        }
    }
}

/// A retarget header opens a new difficulty epoch; the host contract
/// validates the difficulty transition for batches starting at one.
fn is_retarget_height(height: u64) -> bool {
    height % DIFFICULTY_EPOCH_DURATION == 0
}
