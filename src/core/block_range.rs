// Inclusive block window scanned by one sync run.
use std::fmt;

use crate::core::error::{Error, ErrorKind};

/// First block at which the settlement contract could have emitted app hashes.
pub const GENESIS_BLOCK: u64 = 12_153_262;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockRange {
    pub block_from: u64,
    pub block_to: u64,
}

impl BlockRange {
    /// Builds a range, refusing one whose end lies before its start.
    ///
    /// A start beyond the end means the stored checkpoint is ahead of what the
    /// analytics service has indexed; advancing from there would move the
    /// checkpoint backwards.
    pub fn new(block_from: u64, block_to: u64) -> Result<Self, Error> {
        if block_to < block_from {
            return Err(Error::new(ErrorKind::Config)
                .with_message(format!(
                    "checkpoint ahead of source: block_from {block_from} > block_to {block_to}"
                ))
                .with_hint("The analytics service may be lagging; retry later."));
        }
        Ok(Self {
            block_from,
            block_to,
        })
    }

    pub fn from_genesis(block_to: u64) -> Result<Self, Error> {
        Self::new(GENESIS_BLOCK, block_to)
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockRange(from={}, to={})", self.block_from, self.block_to)
    }
}
