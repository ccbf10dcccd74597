//! JSON-RPC client for the Bitcoin node plus the `BtcChain` trait the
//! forwarder consumes. Transient failures are retried here with bounded
//! backoff; terminal outcomes (unknown digest, height out of range) surface
//! immediately so the pipeline can fail fast.

use crate::btc::auth::basic_auth_headers;
use crate::btc::options::RpcClientOptions;
use crate::btc::types::Header;
use crate::runtime::config::RelayConfig;
use anyhow::{anyhow, bail, Result};
use bitcoin::BlockHash;
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

// Bitcoin Core JSON-RPC error codes.
const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;
const RPC_INVALID_PARAMETER: i32 = -8;

#[derive(Debug)]
pub enum RpcError {
    Timeout {
        method: &'static str,
    },
    Transport {
        method: &'static str,
        message: String,
    },
    Call {
        method: &'static str,
        code: i32,
        message: String,
    },
    UnknownDigest {
        digest: BlockHash,
    },
    HeightOutOfRange {
        height: u64,
    },
}

impl RpcError {
    /// Transient failures are worth another attempt; everything else is a
    /// definitive answer from the node.
    fn is_transient(&self) -> bool {
        matches!(self, RpcError::Timeout { .. } | RpcError::Transport { .. })
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::Transport { method, message } => {
                write!(f, "rpc {method} transport failure: {message}")
            }
            RpcError::Call {
                method,
                code,
                message,
            } => write!(f, "rpc {method} call failed (code={code}, message={message})"),
            RpcError::UnknownDigest { digest } => {
                write!(f, "digest {digest} is unknown to the bitcoin node")
            }
            RpcError::HeightOutOfRange { height } => {
                write!(f, "requested height {height} is above the current tip")
            }
        }
    }
}

impl std::error::Error for RpcError {}

/// Read-only view of the Bitcoin canonical chain as the forwarder needs it.
pub trait BtcChain: Send + Sync {
    /// Canonical header at the given height.
    fn get_header_by_height(&self, height: u64) -> BoxFuture<'_, Result<Header>>;

    /// Header by block hash; errors if the node does not know the digest.
    fn get_header_by_digest(&self, digest: BlockHash) -> BoxFuture<'_, Result<Header>>;

    /// Tip height of the longest chain.
    fn get_block_count(&self) -> BoxFuture<'_, Result<u64>>;
}

/// Fields of the verbose `getblockheader` response the relay cares about.
#[derive(Debug, Deserialize)]
struct HeaderInfo {
    height: u64,
}

#[derive(Debug, Clone)]
pub struct BitcoinRpc {
    client: HttpClient,
    options: RpcClientOptions,
}

impl BitcoinRpc {
    pub fn new(
        url: impl AsRef<str>,
        username: impl AsRef<str>,
        password: impl AsRef<str>,
    ) -> Result<Self> {
        Self::with_options(url, username, password, RpcClientOptions::default())
    }

    pub fn with_options(
        url: impl AsRef<str>,
        username: impl AsRef<str>,
        password: impl AsRef<str>,
        options: RpcClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let headers = basic_auth_headers(username.as_ref(), password.as_ref())?;
        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(options.request_timeout)
            .build(url.as_ref())
            .map_err(|err| anyhow!("failed to build bitcoin rpc client: {err}"))?;

        Ok(Self { client, options })
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let options = RpcClientOptions {
            request_timeout: config.rpc_timeout(),
            ..RpcClientOptions::default()
        };
        Self::with_options(
            config.btc_url(),
            config.btc_username(),
            config.btc_password(),
            options,
        )
    }

    pub async fn get_block_count(&self) -> Result<u64> {
        const METHOD: &str = "getblockcount";

        self.retry(METHOD, || self.call::<u64>(METHOD, rpc_params![]))
            .await
    }

    pub async fn get_header_by_height(&self, height: u64) -> Result<Header> {
        self.retry("getblockhash", || self.header_by_height_once(height))
            .await
    }

    pub async fn get_header_by_digest(&self, digest: BlockHash) -> Result<Header> {
        self.retry("getblockheader", || self.header_by_digest_once(digest))
            .await
    }

    async fn header_by_height_once(&self, height: u64) -> Result<Header> {
        let hash_hex: String = self
            .call("getblockhash", rpc_params![height])
            .await
            .map_err(|err| match call_error_code(&err) {
                Some(RPC_INVALID_PARAMETER) => RpcError::HeightOutOfRange { height }.into(),
                _ => err,
            })?;

        let raw_hex: String = self
            .call("getblockheader", rpc_params![&hash_hex, false])
            .await?;

        Header::from_raw_hex(&raw_hex, height)
    }

    async fn header_by_digest_once(&self, digest: BlockHash) -> Result<Header> {
        let digest_hex = digest.to_string();

        let info: HeaderInfo = self
            .call("getblockheader", rpc_params![&digest_hex, true])
            .await
            .map_err(|err| match call_error_code(&err) {
                Some(RPC_INVALID_ADDRESS_OR_KEY) => RpcError::UnknownDigest { digest }.into(),
                _ => err,
            })?;

        let raw_hex: String = self
            .call("getblockheader", rpc_params![&digest_hex, false])
            .await?;

        let header = Header::from_raw_hex(&raw_hex, info.height)?;
        if *header.hash() != digest {
            bail!(
                "node returned header {} for requested digest {digest}",
                header.hash()
            );
        }

        Ok(header)
    }

    async fn call<R>(
        &self,
        method: &'static str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> Result<R>
    where
        R: DeserializeOwned,
    {
        timeout(
            self.options.request_timeout,
            self.client.request(method, params),
        )
        .await
        .map_err(|_| RpcError::Timeout { method })?
        .map_err(|err| map_rpc_error(method, err))
    }

    /// Bounded retry loop for transient failures. Terminal errors and
    /// exhausted attempts propagate to the caller, which treats them as fatal.
    async fn retry<T, F, Fut>(&self, method: &'static str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(method, attempt, "rpc call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let transient = err
                        .downcast_ref::<RpcError>()
                        .map(RpcError::is_transient)
                        .unwrap_or(false);

                    if !transient || attempt >= self.options.max_attempts {
                        return Err(err);
                    }

                    let backoff = self.backoff_delay(attempt);
                    tracing::warn!(
                        method,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient rpc failure; retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return self.options.initial_backoff;
        }

        let exponent = attempt.saturating_sub(1) as u32;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let delay = self.options.initial_backoff.saturating_mul(multiplier);

        delay.min(self.options.max_backoff)
    }
}

impl BtcChain for BitcoinRpc {
    fn get_header_by_height(&self, height: u64) -> BoxFuture<'_, Result<Header>> {
        Box::pin(self.get_header_by_height(height))
    }

    fn get_header_by_digest(&self, digest: BlockHash) -> BoxFuture<'_, Result<Header>> {
        Box::pin(self.get_header_by_digest(digest))
    }

    fn get_block_count(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.get_block_count())
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    match err {
        JsonRpcError::Call(object) => RpcError::Call {
            method,
            code: object.code(),
            message: object.message().to_string(),
        }
        .into(),
        JsonRpcError::Transport(inner) => RpcError::Transport {
            method,
            message: inner.to_string(),
        }
        .into(),
        JsonRpcError::RequestTimeout => RpcError::Timeout { method }.into(),
        other => anyhow!("rpc {method} call failed: {other}"),
    }
}

fn call_error_code(err: &anyhow::Error) -> Option<i32> {
    match err.downcast_ref::<RpcError>() {
        Some(RpcError::Call { code, .. }) => Some(*code),
        _ => None,
    }
}
