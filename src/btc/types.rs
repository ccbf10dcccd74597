use anyhow::{bail, Context, Result};
use bitcoin::block::Header as RawHeader;
use bitcoin::{consensus, BlockHash, TxMerkleNode};
use std::fmt;

/// Length of a serialized Bitcoin block header.
pub const RAW_HEADER_LEN: usize = 80;

/// Immutable record describing one Bitcoin block header as the relay sees it.
///
/// Equality covers every field, including the serialized bytes: two headers
/// that hash alike but differ on the wire are treated as different, so a
/// misbehaving upstream cannot smuggle mismatched bytes past the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    hash: BlockHash,
    height: u64,
    prev_hash: BlockHash,
    merkle_root: TxMerkleNode,
    raw: Vec<u8>,
}

impl Header {
    /// Builds a header by consensus-decoding the 80-byte serialized form.
    ///
    /// The block hash is recomputed from the bytes rather than taken from the
    /// node's response, so the stored fields are always consistent with `raw`.
    pub fn from_raw(raw: Vec<u8>, height: u64) -> Result<Self> {
        if raw.len() != RAW_HEADER_LEN {
            bail!(
                "serialized header must be {RAW_HEADER_LEN} bytes, got {}",
                raw.len()
            );
        }

        let decoded: RawHeader =
            consensus::deserialize(&raw).context("failed to deserialize block header bytes")?;

        Ok(Self {
            hash: decoded.block_hash(),
            height,
            prev_hash: decoded.prev_blockhash,
            merkle_root: decoded.merkle_root,
            raw,
        })
    }

    /// Decodes a header from the hex transport form returned by
    /// `getblockheader <hash> false`.
    pub fn from_raw_hex(hex_str: &str, height: u64) -> Result<Self> {
        let raw = hex::decode(hex_str.trim()).context("invalid header hex")?;
        Self::from_raw(raw, height)
    }

    pub fn hash(&self) -> &BlockHash {
        &self.hash
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn prev_hash(&self) -> &BlockHash {
        &self.prev_hash
    }

    pub fn merkle_root(&self) -> &TxMerkleNode {
        &self.merkle_root
    }

    /// The canonical on-wire form consumed by the host contract.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at height {}", self.hash, self.height)
    }
}
