use crate::btc::BtcChain;
use crate::forwarder::{Forwarder, ForwarderOptions};
use crate::host::HostChain;
use crate::runtime::telemetry::{spawn_metrics_reporter, DEFAULT_METRICS_INTERVAL};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Supervises the forwarder for the lifetime of the process: watches the
/// error stream, handles Ctrl-C, and turns either into cancellation of both
/// loops before returning.
pub struct Runner {
    btc: Arc<dyn BtcChain>,
    host: Arc<dyn HostChain>,
    shutdown: CancellationToken,
    options: ForwarderOptions,
    metrics_interval: Duration,
}

impl Runner {
    pub fn new(btc: Arc<dyn BtcChain>, host: Arc<dyn HostChain>) -> Self {
        Self {
            btc,
            host,
            shutdown: CancellationToken::new(),
            options: ForwarderOptions::default(),
            metrics_interval: DEFAULT_METRICS_INTERVAL,
        }
    }

    pub fn with_options(mut self, options: ForwarderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate their own cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until the forwarder reports a fatal error, Ctrl-C (SIGINT) is
    /// received, or the shutdown token is cancelled elsewhere. Both loops are
    /// joined before this returns; the first fatal error (if any) is the
    /// return value.
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        let Self {
            btc,
            host,
            shutdown,
            options,
            metrics_interval,
        } = self;

        let mut forwarder = Forwarder::with_options(btc, host, shutdown.clone(), options);
        let reporter =
            spawn_metrics_reporter(forwarder.telemetry(), shutdown.clone(), metrics_interval);

        tracing::info!("relay runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        let result = tokio::select! {
            maybe_err = forwarder.next_error() => {
                match maybe_err {
                    Some(err) => {
                        tracing::error!(error = %err, "forwarder failed; shutting down");
                        Err(err)
                    }
                    // Both loops ended without reporting; nothing left to do.
                    None => Ok(()),
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down relay");
                Ok(())
            }
            _ = shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
                Ok(())
            }
        };

        shutdown.cancel();
        forwarder.join().await;
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter terminated unexpectedly");
        }

        result
    }
}
