//! Host chain adapter: a thin binding to the relay gateway in front of the
//! SPV contract. The forwarder only depends on the `HostChain` trait, so the
//! gateway binding can be swapped without touching the pipeline.

pub mod client;

pub use client::{HostChain, HostError, HostRpc};
