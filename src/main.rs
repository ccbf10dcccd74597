use anyhow::{Context, Result};
use spvrelay::{init_tracing, BitcoinRpc, HostRpc, RelayConfig, Runner};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = RelayConfig::load(config_path.as_deref())
        .context("failed to load relay configuration")?;

    tracing::info!(
        btc_url = config.btc_url(),
        host_url = config.host_url(),
        contract = config.host_contract_address(),
        "starting spvrelay"
    );

    let btc = Arc::new(BitcoinRpc::from_config(&config)?);
    let host = Arc::new(HostRpc::from_config(&config)?);

    Runner::new(btc, host)
        .with_metrics_interval(config.metrics_interval())
        .run_until_ctrl_c()
        .await
}
