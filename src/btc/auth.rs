//! Basic-auth plumbing for Bitcoin Core's JSON-RPC endpoint.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use jsonrpsee::http_client::{HeaderMap, HeaderValue};

/// Builds the `Authorization: Basic` header set expected by `bitcoind` when
/// `rpcuser`/`rpcpassword` authentication is configured.
pub(crate) fn basic_auth_headers(username: &str, password: &str) -> Result<HeaderMap> {
    let token = BASE64_STANDARD.encode(format!("{username}:{password}"));
    let authorization = HeaderValue::from_str(&format!("Basic {token}"))
        .context("failed to build Authorization header")?;

    let mut headers = HeaderMap::with_capacity(1);
    headers.insert("Authorization", authorization);
    Ok(headers)
}
