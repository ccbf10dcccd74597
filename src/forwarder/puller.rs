//! Pulling half of the forwarder: discovers the common ancestor between the
//! host chain's SPV view and Bitcoin's canonical chain, then walks forward
//! one height at a time, handing each extending header to the queue.

use crate::btc::types::Header;
use crate::btc::BtcChain;
use crate::forwarder::queue::HeaderSender;
use crate::forwarder::ForwarderOptions;
use crate::host::HostChain;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub(crate) struct Puller {
    btc: Arc<dyn BtcChain>,
    host: Arc<dyn HostChain>,
    headers_tx: HeaderSender,
    telemetry: Arc<Telemetry>,
    options: ForwarderOptions,
    shutdown: CancellationToken,
}

impl Puller {
    pub(crate) fn new(
        btc: Arc<dyn BtcChain>,
        host: Arc<dyn HostChain>,
        headers_tx: HeaderSender,
        telemetry: Arc<Telemetry>,
        options: ForwarderOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            btc,
            host,
            headers_tx,
            telemetry,
            options,
            shutdown,
        }
    }

    /// Runs until cancellation or the first unrecoverable error. Returns
    /// `Ok(())` on cancellation; the caller treats any `Err` as fatal to the
    /// whole pipeline.
    pub(crate) async fn run(self) -> Result<()> {
        tracing::info!("running forwarder pulling loop");

        let ancestor = tokio::select! {
            result = self.find_best_block() => {
                result.context("failure while trying to find best block for pulling loop")?
            }
            _ = self.shutdown.cancelled() => return Ok(()),
        };

        tracing::info!(
            hash = %ancestor.hash(),
            height = ancestor.height(),
            "starting pulling loop from common ancestor"
        );

        let mut latest_height = ancestor.height() + 1;
        let mut last_added: Option<Header> = None;

        loop {
            let chain_height = tokio::select! {
                count = self.btc.get_block_count() => {
                    count.context("could not get block count")?
                }
                _ = self.shutdown.cancelled() => return Ok(()),
            };

            if latest_height > chain_height {
                tracing::info!(
                    next_height = latest_height,
                    tip = chain_height,
                    "caught up with the bitcoin tip; suspending pulling loop"
                );
                tokio::select! {
                    _ = sleep(self.options.pulling_sleep_time) => {}
                    _ = self.shutdown.cancelled() => return Ok(()),
                }
                continue;
            }

            let new_header = tokio::select! {
                header = self.btc.get_header_by_height(latest_height) => {
                    header.with_context(|| {
                        format!("could not get header by height at {latest_height}")
                    })?
                }
                _ = self.shutdown.cancelled() => return Ok(()),
            };

            // An upstream node can momentarily re-serve its previous answer;
            // the cursor only advances once a genuinely new header arrives.
            if last_added.as_ref() == Some(&new_header) {
                continue;
            }

            tokio::select! {
                sent = self.headers_tx.send(new_header.clone()) => sent?,
                _ = self.shutdown.cancelled() => return Ok(()),
            }

            tracing::info!(
                hash = %new_header.hash(),
                height = new_header.height(),
                "enqueued header"
            );
            self.telemetry.record_enqueued_header();

            last_added = Some(new_header);
            latest_height += 1;
        }
    }

    /// Resolves the host chain's best known digest to the most recent header
    /// that is still on Bitcoin's canonical chain.
    ///
    /// If Bitcoin reorganized since the host last updated, the host's header
    /// is no longer canonical at its height; the loop then walks back through
    /// parents until candidate and canonical agree. Termination is guaranteed
    /// because the candidate height strictly decreases towards genesis.
    async fn find_best_block(&self) -> Result<Header> {
        let best_digest = self
            .host
            .get_best_known_digest()
            .await
            .context("could not get best known digest from host chain")?;

        tracing::info!(digest = %best_digest, "best known digest returned by host chain");

        let mut candidate = self
            .btc
            .get_header_by_digest(best_digest)
            .await
            .context("host best digest could not be resolved on the bitcoin chain")?;
        let mut canonical = self.btc.get_header_by_height(candidate.height()).await?;

        // TODO: establish whether candidate and canonical can differ here
        // outside of an in-progress reorg; until settled, the cross-check
        // runs unconditionally.
        while candidate != canonical {
            candidate = self
                .btc
                .get_header_by_digest(*candidate.prev_hash())
                .await?;
            canonical = self.btc.get_header_by_height(candidate.height()).await?;
        }

        tracing::info!(
            hash = %candidate.hash(),
            height = candidate.height(),
            "found common ancestor with the host chain"
        );

        Ok(candidate)
    }
}
