//! JSON-RPC binding to the host chain's relay gateway. The gateway wraps the
//! SPV contract: it resolves the contract's best known digest and submits
//! signed header-extension transactions on the relay's behalf.

use crate::btc::types::Header;
use crate::runtime::config::RelayConfig;
use anyhow::{anyhow, bail, Context, Result};
use bitcoin::BlockHash;
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::http_client::{HeaderMap, HeaderValue, HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use std::fs;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug)]
pub enum HostError {
    Timeout {
        method: &'static str,
    },
    /// The gateway (or the contract behind it) refused the call. For header
    /// submissions this is how a non-contiguous or invalid-PoW batch surfaces.
    Rejected {
        method: &'static str,
        code: i32,
        message: String,
    },
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostError::Timeout { method } => write!(f, "host method {method} timed out"),
            HostError::Rejected {
                method,
                code,
                message,
            } => write!(
                f,
                "host rejected {method} (code={code}, message={message})"
            ),
        }
    }
}

impl std::error::Error for HostError {}

/// Write-mostly view of the host chain's SPV contract.
pub trait HostChain: Send + Sync {
    /// The host's currently recognized Bitcoin tip.
    fn get_best_known_digest(&self) -> BoxFuture<'_, Result<BlockHash>>;

    /// Submits an ordered batch extending the host's current tip (or the last
    /// header of a prior in-flight submission). The contract rejects
    /// non-contiguous or invalid-PoW batches.
    fn add_headers<'a>(&'a self, headers: &'a [Header]) -> BoxFuture<'a, Result<()>>;

    /// Submits a batch whose first header opens a new difficulty epoch, so the
    /// contract validates the retarget before accepting the extension.
    fn add_headers_with_retarget<'a>(&'a self, headers: &'a [Header]) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Clone)]
pub struct HostRpc {
    client: HttpClient,
    contract_address: String,
    request_timeout: Duration,
}

impl HostRpc {
    pub fn new(
        url: impl AsRef<str>,
        contract_address: impl Into<String>,
        access_token: Option<&str>,
    ) -> Result<Self> {
        Self::with_timeout(
            url,
            contract_address,
            access_token,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        url: impl AsRef<str>,
        contract_address: impl Into<String>,
        access_token: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("failed to build Authorization header")?;
            headers.insert("Authorization", value);
        }

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(request_timeout)
            .build(url.as_ref())
            .map_err(|err| anyhow!("failed to build host rpc client: {err}"))?;

        Ok(Self {
            client,
            contract_address: contract_address.into(),
            request_timeout,
        })
    }

    /// Builds the client from the relay configuration, reading the gateway
    /// credential from `host.keyfile` when one is configured.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let token = match config.host_keyfile() {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("failed to read host keyfile {}", path.display()))?
                    .trim()
                    .to_owned(),
            ),
            None => None,
        };

        Self::with_timeout(
            config.host_url(),
            config.host_contract_address(),
            token.as_deref(),
            config.rpc_timeout(),
        )
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    pub async fn get_best_known_digest(&self) -> Result<BlockHash> {
        const METHOD: &str = "relay_getBestKnownDigest";

        let digest_hex: String = self
            .call(METHOD, rpc_params![&self.contract_address])
            .await?;

        BlockHash::from_str(digest_hex.trim_start_matches("0x"))
            .with_context(|| format!("host returned malformed digest {digest_hex}"))
    }

    pub async fn add_headers(&self, headers: &[Header]) -> Result<()> {
        self.submit("relay_addHeaders", headers).await
    }

    pub async fn add_headers_with_retarget(&self, headers: &[Header]) -> Result<()> {
        self.submit("relay_addHeadersWithRetarget", headers).await
    }

    async fn submit(&self, method: &'static str, headers: &[Header]) -> Result<()> {
        if headers.is_empty() {
            bail!("cannot submit an empty header batch");
        }

        let payload = concat_raw_hex(headers);
        let tx_hash: String = self
            .call(method, rpc_params![&self.contract_address, &payload])
            .await?;

        tracing::debug!(method, tx_hash, count = headers.len(), "host accepted header batch");
        Ok(())
    }

    async fn call<R>(
        &self,
        method: &'static str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        timeout(self.request_timeout, self.client.request(method, params))
            .await
            .map_err(|_| HostError::Timeout { method })?
            .map_err(|err| map_host_error(method, err))
    }
}

impl HostChain for HostRpc {
    fn get_best_known_digest(&self) -> BoxFuture<'_, Result<BlockHash>> {
        Box::pin(self.get_best_known_digest())
    }

    fn add_headers<'a>(&'a self, headers: &'a [Header]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.add_headers(headers))
    }

    fn add_headers_with_retarget<'a>(&'a self, headers: &'a [Header]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.add_headers_with_retarget(headers))
    }
}

/// The gateway consumes the batch as one hex string of concatenated 80-byte
/// headers, in submission order.
fn concat_raw_hex(headers: &[Header]) -> String {
    let mut payload = String::with_capacity(headers.len() * crate::btc::types::RAW_HEADER_LEN * 2);
    for header in headers {
        payload.push_str(&header.raw_hex());
    }
    payload
}

fn map_host_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    match err {
        JsonRpcError::Call(object) => HostError::Rejected {
            method,
            code: object.code(),
            message: object.message().to_string(),
        }
        .into(),
        JsonRpcError::RequestTimeout => HostError::Timeout { method }.into(),
        other => anyhow!("host {method} call failed: {other}"),
    }
}
