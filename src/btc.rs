//! Bitcoin node adapter: header and digest types plus the JSON-RPC client
//! used to read the canonical chain (`getblockcount`, `getblockhash`,
//! `getblockheader`).

pub mod auth;
pub mod client;
pub mod options;
pub mod types;

pub use client::{BitcoinRpc, BtcChain, RpcError};
pub use options::RpcClientOptions;
pub use types::{Header, RAW_HEADER_LEN};
