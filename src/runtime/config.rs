use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;

const ENV_BTC_URL: &str = "SPVRELAY_BTC_URL";
const ENV_BTC_USERNAME: &str = "SPVRELAY_BTC_USERNAME";
const ENV_BTC_PASSWORD: &str = "SPVRELAY_BTC_PASSWORD";
const ENV_HOST_URL: &str = "SPVRELAY_HOST_URL";
const ENV_HOST_KEYFILE: &str = "SPVRELAY_HOST_KEYFILE";
const ENV_HOST_CONTRACT_ADDRESS: &str = "SPVRELAY_HOST_CONTRACT_ADDRESS";

/// Startup configuration for the relay process.
///
/// All instances must be constructed via [`RelayConfig::builder`] or
/// [`RelayConfig::load`] so invariants are validated before any consumer
/// observes the values. Nothing here is reloadable at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    btc_url: String,
    btc_username: String,
    btc_password: String,
    host_url: String,
    host_keyfile: Option<PathBuf>,
    host_contract_address: String,
    rpc_timeout: Duration,
    metrics_interval: Duration,
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Loads the configuration from an optional TOML file, then applies
    /// `SPVRELAY_*` environment overrides (useful for keeping credentials out
    /// of the file).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                RelayConfigBuilder::from_toml_str(&contents)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Self::builder(),
        };

        builder.apply_env_overrides().build()
    }

    /// Bitcoin Core JSON-RPC endpoint (`btc.url`).
    pub fn btc_url(&self) -> &str {
        &self.btc_url
    }

    /// Bitcoin Core RPC username (`btc.username`).
    pub fn btc_username(&self) -> &str {
        &self.btc_username
    }

    /// Bitcoin Core RPC password (`btc.password`).
    pub fn btc_password(&self) -> &str {
        &self.btc_password
    }

    /// Host-chain relay gateway endpoint (`host.url`).
    pub fn host_url(&self) -> &str {
        &self.host_url
    }

    /// Optional credential file for the gateway (`host.keyfile`).
    pub fn host_keyfile(&self) -> Option<&Path> {
        self.host_keyfile.as_deref()
    }

    /// Address of the SPV relay contract (`host.contract_address`).
    pub fn host_contract_address(&self) -> &str {
        &self.host_contract_address
    }

    /// Per-request timeout applied to both RPC clients.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Interval used by the metrics reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.btc_url, "btc.url")?;
        ensure_not_empty(&self.btc_username, "btc.username")?;
        ensure_not_empty(&self.btc_password, "btc.password")?;
        validate_url(&self.host_url, "host.url")?;
        validate_contract_address(&self.host_contract_address)?;

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }
        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct RelayConfigBuilder {
    btc_url: Option<String>,
    btc_username: Option<String>,
    btc_password: Option<String>,
    host_url: Option<String>,
    host_keyfile: Option<PathBuf>,
    host_contract_address: Option<String>,
    rpc_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    btc: RawBtcSection,
    #[serde(default)]
    host: RawHostSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBtcSection {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHostSection {
    url: Option<String>,
    keyfile: Option<PathBuf>,
    #[serde(alias = "contractAddress")]
    contract_address: Option<String>,
}

impl RelayConfigBuilder {
    /// Seeds a builder from a TOML document with `[btc]` and `[host]` tables.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(contents).context("malformed relay config")?;

        let mut builder = Self::default();
        builder.btc_url = raw.btc.url;
        builder.btc_username = raw.btc.username;
        builder.btc_password = raw.btc.password;
        builder.host_url = raw.host.url;
        builder.host_keyfile = raw.host.keyfile;
        builder.host_contract_address = raw.host.contract_address;
        Ok(builder)
    }

    /// Replaces any value for which the corresponding `SPVRELAY_*` variable is
    /// set in the environment.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var(ENV_BTC_URL) {
            self.btc_url = Some(url);
        }
        if let Ok(username) = env::var(ENV_BTC_USERNAME) {
            self.btc_username = Some(username);
        }
        if let Ok(password) = env::var(ENV_BTC_PASSWORD) {
            self.btc_password = Some(password);
        }
        if let Ok(url) = env::var(ENV_HOST_URL) {
            self.host_url = Some(url);
        }
        if let Ok(keyfile) = env::var(ENV_HOST_KEYFILE) {
            self.host_keyfile = Some(PathBuf::from(keyfile));
        }
        if let Ok(address) = env::var(ENV_HOST_CONTRACT_ADDRESS) {
            self.host_contract_address = Some(address);
        }
        self
    }

    pub fn btc_url(mut self, url: impl Into<String>) -> Self {
        self.btc_url = Some(url.into());
        self
    }

    pub fn btc_username(mut self, username: impl Into<String>) -> Self {
        self.btc_username = Some(username.into());
        self
    }

    pub fn btc_password(mut self, password: impl Into<String>) -> Self {
        self.btc_password = Some(password.into());
        self
    }

    pub fn host_url(mut self, url: impl Into<String>) -> Self {
        self.host_url = Some(url.into());
        self
    }

    pub fn host_keyfile(mut self, keyfile: impl Into<PathBuf>) -> Self {
        self.host_keyfile = Some(keyfile.into());
        self
    }

    pub fn host_contract_address(mut self, address: impl Into<String>) -> Self {
        self.host_contract_address = Some(address.into());
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<RelayConfig> {
        let config = RelayConfig {
            btc_url: trimmed(self.btc_url.context("btc.url is required")?),
            btc_username: trimmed(self.btc_username.context("btc.username is required")?),
            btc_password: trimmed(self.btc_password.context("btc.password is required")?),
            host_url: trimmed(self.host_url.context("host.url is required")?),
            host_keyfile: self.host_keyfile,
            host_contract_address: trimmed(
                self.host_contract_address
                    .context("host.contract_address is required")?,
            ),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        config.validate()?;
        Ok(config)
    }
}

fn trimmed(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}

fn validate_contract_address(address: &str) -> Result<()> {
    let hex_part = match address.strip_prefix("0x") {
        Some(rest) => rest,
        None => bail!("host.contract_address must start with 0x"),
    };
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("host.contract_address must be a 20-byte hex address");
    }
    Ok(())
}
