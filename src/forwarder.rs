//! The forwarder: a two-stage pipeline that pulls block headers off the
//! Bitcoin chain and pushes them to the host chain's SPV contract. The
//! supervisor here spawns the two loops, owns the one-slot error channel,
//! and translates cancellation into loop termination.

mod puller;
mod pusher;
pub mod queue;


use crate::btc::BtcChain;
use crate::host::HostChain;
use crate::runtime::telemetry::Telemetry;
use anyhow::Result;
use puller::Puller;
use pusher::Pusher;
use queue::header_queue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the queue between the pulling and pushing loops.
pub const HEADERS_QUEUE_SIZE: usize = 50;

/// Maximum number of headers submitted to the host chain in one batch.
pub const HEADERS_BATCH_SIZE: usize = 5;

/// Block count of a Bitcoin difficulty epoch.
pub const DIFFICULTY_EPOCH_DURATION: u64 = 2016;

/// Maximum time the pushing loop waits for a single header while filling up
/// a batch.
const HEADER_TIMEOUT: Duration = Duration::from_secs(1);

/// Rest period after the pulling loop reaches the Bitcoin tip.
const PULLING_SLEEP_TIME: Duration = Duration::from_secs(60);

/// Rest period after each submission, throttling host-chain fees and staying
/// behind its finality cadence.
const PUSHING_SLEEP_TIME: Duration = Duration::from_secs(45);

/// Tuning knobs for the forwarder loops. The defaults are the design values;
/// overriding them is mainly useful in tests.
#[derive(Debug, Clone)]
pub struct ForwarderOptions {
    pub headers_queue_size: usize,
    pub headers_batch_size: usize,
    pub header_timeout: Duration,
    pub pulling_sleep_time: Duration,
    pub pushing_sleep_time: Duration,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        Self {
            headers_queue_size: HEADERS_QUEUE_SIZE,
            headers_batch_size: HEADERS_BATCH_SIZE,
            header_timeout: HEADER_TIMEOUT,
            pulling_sleep_time: PULLING_SLEEP_TIME,
            pushing_sleep_time: PUSHING_SLEEP_TIME,
        }
    }
}

impl ForwarderOptions {
    pub fn validate(&self) -> Result<()> {
        if self.headers_queue_size == 0 {
            anyhow::bail!("headers_queue_size must be greater than 0");
        }
        if self.headers_batch_size == 0 {
            anyhow::bail!("headers_batch_size must be greater than 0");
        }
        if self.header_timeout.is_zero() {
            anyhow::bail!("header_timeout must be greater than 0");
        }
        Ok(())
    }
}

/// Handle to a running forwarder.
///
/// The owner watches [`Forwarder::next_error`]; on the first error it cancels
/// the shared token (or calls [`Forwarder::cancel`]) so the surviving loop
/// terminates too, then awaits [`Forwarder::join`].
pub struct Forwarder {
    err_rx: mpsc::Receiver<anyhow::Error>,
    shutdown: CancellationToken,
    telemetry: Arc<Telemetry>,
    puller_handle: JoinHandle<()>,
    pusher_handle: JoinHandle<()>,
}

impl Forwarder {
    /// Spawns the pulling and pushing loops with the design defaults. The
    /// lifecycle of the forwarder is managed through the passed token.
    pub fn run(
        btc: Arc<dyn BtcChain>,
        host: Arc<dyn HostChain>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::with_options(btc, host, shutdown, ForwarderOptions::default())
    }

    pub fn with_options(
        btc: Arc<dyn BtcChain>,
        host: Arc<dyn HostChain>,
        shutdown: CancellationToken,
        options: ForwarderOptions,
    ) -> Self {
        debug_assert!(
            options.validate().is_ok(),
            "forwarder options should be validated before running"
        );

        let (headers_tx, headers_rx) = header_queue(options.headers_queue_size);
        // One slot: the first reporter wins, later errors are dropped.
        let (err_tx, err_rx) = mpsc::channel(1);
        let telemetry = Arc::new(Telemetry::default());

        let puller = Puller::new(
            btc,
            host.clone(),
            headers_tx,
            telemetry.clone(),
            options.clone(),
            shutdown.clone(),
        );
        let pusher = Pusher::new(
            host,
            headers_rx,
            telemetry.clone(),
            options,
            shutdown.clone(),
        );

        let puller_handle = spawn_loop("pulling", puller.run(), err_tx.clone());
        let pusher_handle = spawn_loop("pushing", pusher.run(), err_tx);

        Self {
            err_rx,
            shutdown,
            telemetry,
            puller_handle,
            pusher_handle,
        }
    }

    /// Receives the first fatal loop error. Returns `None` once both loops
    /// have finished without reporting one (e.g. after cancellation).
    pub async fn next_error(&mut self) -> Option<anyhow::Error> {
        self.err_rx.recv().await
    }

    /// Requests termination of both loops.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Number of headers that crossed the whole pipeline.
    pub fn processed_headers(&self) -> u64 {
        self.telemetry.processed_headers()
    }

    /// Waits for both loops to finish. Call after cancellation (or after an
    /// error was observed and the token cancelled).
    pub async fn join(self) {
        if let Err(err) = self.puller_handle.await {
            tracing::warn!(error = %err, "pulling loop task terminated unexpectedly");
        }
        if let Err(err) = self.pusher_handle.await {
            tracing::warn!(error = %err, "pushing loop task terminated unexpectedly");
        }
    }
}

fn spawn_loop(
    name: &'static str,
    loop_future: impl Future<Output = Result<()>> + Send + 'static,
    err_tx: mpsc::Sender<anyhow::Error>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = loop_future.await {
            tracing::error!(loop_name = name, error = %err, "forwarder loop failed");
            let _ = err_tx.try_send(err);
        }
    })
}
