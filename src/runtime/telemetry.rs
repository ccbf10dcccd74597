use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if present, otherwise it falls back to
/// `info`. Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters describing pipeline progress.
#[derive(Default, Debug)]
pub struct Telemetry {
    enqueued_headers: AtomicU64,
    processed_headers: AtomicU64,
    submitted_batches: AtomicU64,
}

impl Telemetry {
    pub fn record_enqueued_header(&self) {
        self.enqueued_headers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed_headers(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.processed_headers.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_submitted_batch(&self) {
        self.submitted_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enqueued_headers(&self) -> u64 {
        self.enqueued_headers.load(Ordering::Relaxed)
    }

    /// Headers that crossed the whole pipeline (pulled, queued, submitted).
    pub fn processed_headers(&self) -> u64 {
        self.processed_headers.load(Ordering::Relaxed)
    }

    pub fn submitted_batches(&self) -> u64 {
        self.submitted_batches.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            enqueued_headers: self.enqueued_headers(),
            processed_headers: self.processed_headers(),
            submitted_batches: self.submitted_batches(),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub enqueued_headers: u64,
    pub processed_headers: u64,
    pub submitted_batches: u64,
}

impl TelemetrySnapshot {
    /// Headers pulled off Bitcoin but not yet accepted by the host chain.
    pub fn in_flight(&self) -> u64 {
        self.enqueued_headers.saturating_sub(self.processed_headers)
    }
}

/// Spawns a background task that periodically logs pipeline progress.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "spvrelay::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let delta = current
                        .processed_headers
                        .saturating_sub(last_snapshot.processed_headers);

                    tracing::info!(
                        target: "spvrelay::metrics",
                        processed = current.processed_headers,
                        processed_delta = delta,
                        enqueued = current.enqueued_headers,
                        in_flight = current.in_flight(),
                        batches = current.submitted_batches,
                        "relay progress snapshot"
                    );

                    last_snapshot = current;
                }
            }
        }
    })
}
