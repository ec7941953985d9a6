//! Purpose: Content identifiers for app data blobs pinned on IPFS.
//! Exports: `Cid`, `DEFAULT_GATEWAY`.
//! Role: Turn the 32-byte digest recorded on chain into a fetchable CID/URL.
//! Invariants: Binary form is always the 4-byte CIDv1 prefix plus a 32-byte digest.
//! Invariants: Hex input is accepted with or without `0x`, in either case.
use std::fmt;

use crate::core::error::{Error, ErrorKind};

// CIDv1, dag-pb codec, sha2-256 multihash, 32-byte digest length.
const CID_PREFIX: [u8; 4] = [0x01, 0x70, 0x12, 0x20];
const DIGEST_LEN: usize = 32;

pub const DEFAULT_GATEWAY: &str = "https://gnosis.mypinata.cloud";

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Cid {
    bytes: [u8; CID_PREFIX.len() + DIGEST_LEN],
}

impl Cid {
    pub fn from_hex(hex_str: &str) -> Result<Self, Error> {
        let trimmed = hex_str.trim();
        let stripped = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let digest = hex::decode(stripped).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid app hash {hex_str:?}"))
                .with_source(err)
        })?;
        if digest.len() != DIGEST_LEN {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "app hash must be {DIGEST_LEN} bytes, got {}",
                digest.len()
            )));
        }
        let mut bytes = [0u8; CID_PREFIX.len() + DIGEST_LEN];
        bytes[..CID_PREFIX.len()].copy_from_slice(&CID_PREFIX);
        bytes[CID_PREFIX.len()..].copy_from_slice(&digest);
        Ok(Self { bytes })
    }

    /// Digest as `0x`-prefixed lowercase hex, the form the analytics tables use.
    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(&self.bytes[CID_PREFIX.len()..]))
    }

    pub fn url(&self, gateway: &str) -> String {
        format!("{}/ipfs/{self}", gateway.trim_end_matches('/'))
    }
}

impl fmt::Display for Cid {
    // Multibase base58btc.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "z{}", bs58::encode(&self.bytes).into_string())
    }
}
