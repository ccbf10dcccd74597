//! In-memory doubles for both chain adapters, scriptable from the tests:
//! canonical/orphan header views and tip control on the Bitcoin side, gated
//! and failable submissions on the host side.

use anyhow::{anyhow, bail, Result};
use bitcoin::BlockHash;
use futures::future::BoxFuture;
use spvrelay::{BtcChain, Header, HostChain};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Default)]
struct BtcState {
    by_height: HashMap<u64, Header>,
    by_hash: HashMap<BlockHash, Header>,
    block_count: u64,
    fail_message: Option<String>,
}

#[derive(Default)]
pub struct MockBtcChain {
    state: Mutex<BtcState>,
    max_height_requested: AtomicU64,
}

impl MockBtcChain {
    pub fn with_canonical(headers: &[Header]) -> Self {
        let chain = Self::default();
        for header in headers {
            chain.insert_canonical(header.clone());
        }
        chain
    }

    pub fn insert_canonical(&self, header: Header) {
        let mut state = self.state.lock().unwrap();
        state.by_hash.insert(*header.hash(), header.clone());
        state.block_count = state.block_count.max(header.height());
        state.by_height.insert(header.height(), header);
    }

    /// Known to the node but not on the canonical chain, which is what a
    /// reorged-away header looks like.
    pub fn insert_orphan(&self, header: Header) {
        let mut state = self.state.lock().unwrap();
        state.by_hash.insert(*header.hash(), header);
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        self.state.lock().unwrap().fail_message = Some(message.into());
    }

    /// Highest height the puller has asked for so far.
    pub fn max_height_requested(&self) -> u64 {
        self.max_height_requested.load(Ordering::SeqCst)
    }

    fn check_failure(state: &BtcState) -> Result<()> {
        if let Some(message) = &state.fail_message {
            bail!("{message}");
        }
        Ok(())
    }
}

impl BtcChain for MockBtcChain {
    fn get_header_by_height(&self, height: u64) -> BoxFuture<'_, Result<Header>> {
        Box::pin(async move {
            self.max_height_requested.fetch_max(height, Ordering::SeqCst);
            let state = self.state.lock().unwrap();
            Self::check_failure(&state)?;
            state
                .by_height
                .get(&height)
                .cloned()
                .ok_or_else(|| anyhow!("no canonical header at height {height}"))
        })
    }

    fn get_header_by_digest(&self, digest: BlockHash) -> BoxFuture<'_, Result<Header>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Self::check_failure(&state)?;
            state
                .by_hash
                .get(&digest)
                .cloned()
                .ok_or_else(|| anyhow!("digest {digest} is unknown to the bitcoin node"))
        })
    }

    fn get_block_count(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Self::check_failure(&state)?;
            Ok(state.block_count)
        })
    }
}

#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub retarget: bool,
    pub headers: Vec<Header>,
}

pub struct MockHostChain {
    best_digest: BlockHash,
    batches: Mutex<Vec<SubmittedBatch>>,
    reject_message: Mutex<Option<String>>,
    held: AtomicBool,
}

impl MockHostChain {
    pub fn new(best_digest: BlockHash) -> Self {
        Self {
            best_digest,
            batches: Mutex::new(Vec::new()),
            reject_message: Mutex::new(None),
            held: AtomicBool::new(false),
        }
    }

    pub fn reject_with(&self, message: impl Into<String>) {
        *self.reject_message.lock().unwrap() = Some(message.into());
    }

    /// Makes `add_headers` park until [`Self::release_submissions`], so tests
    /// can pile headers up behind a stalled consumer.
    pub fn hold_submissions(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_submissions(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<SubmittedBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn submitted_headers(&self) -> Vec<Header> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|batch| batch.headers.clone())
            .collect()
    }

    pub async fn wait_for_batches(
        &self,
        count: usize,
        wait: Duration,
    ) -> Result<Vec<SubmittedBatch>> {
        let start = Instant::now();
        loop {
            {
                let batches = self.batches.lock().unwrap();
                if batches.len() >= count {
                    return Ok(batches.clone());
                }
            }

            if start.elapsed() > wait {
                bail!("host did not record {count} batches within {wait:?}");
            }

            sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_headers(&self, count: usize, wait: Duration) -> Result<Vec<Header>> {
        let start = Instant::now();
        loop {
            let headers = self.submitted_headers();
            if headers.len() >= count {
                return Ok(headers);
            }

            if start.elapsed() > wait {
                bail!("host did not record {count} headers within {wait:?}");
            }

            sleep(Duration::from_millis(10)).await;
        }
    }

    async fn record(&self, retarget: bool, headers: &[Header]) -> Result<()> {
        while self.held.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(5)).await;
        }

        if let Some(message) = self.reject_message.lock().unwrap().clone() {
            return Err(anyhow!("{message}"));
        }

        self.batches.lock().unwrap().push(SubmittedBatch {
            retarget,
            headers: headers.to_vec(),
        });
        Ok(())
    }
}

impl HostChain for MockHostChain {
    fn get_best_known_digest(&self) -> BoxFuture<'_, Result<BlockHash>> {
        Box::pin(async move { Ok(self.best_digest) })
    }

    fn add_headers<'a>(&'a self, headers: &'a [Header]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.record(false, headers).await })
    }

    fn add_headers_with_retarget<'a>(&'a self, headers: &'a [Header]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.record(true, headers).await })
    }
}
