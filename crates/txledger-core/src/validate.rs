//! Whole-chain audit.
//!
//! Checks hash recomputation and linkage for every block after genesis.
//! Genesis is trusted as-is. Difficulty is not re-checked here, only at mining
//! time, so chains mined under an older difficulty stay valid.

use crate::Block;
use std::fmt;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// Stored hash differs from the hash recomputed over the block's fields.
    HashMismatch { index: u64 },
    /// `previous_hash` does not equal the preceding block's hash.
    BrokenLink { index: u64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::HashMismatch { index } => write!(f, "invalid hash in block {index}"),
            Violation::BrokenLink { index } => write!(f, "invalid previous hash in block {index}"),
        }
    }
}

/// First violation found walking forward from block 1, if any.
pub fn first_violation(blocks: &[Block]) -> Option<Violation> {
    blocks.windows(2).find_map(|pair| {
        let (previous, current) = (&pair[0], &pair[1]);
        if current.hash != current.compute_hash() {
            Some(Violation::HashMismatch {
                index: current.index,
            })
        } else if current.previous_hash != previous.hash {
            Some(Violation::BrokenLink {
                index: current.index,
            })
        } else {
            None
        }
    })
}

pub fn is_valid(blocks: &[Block]) -> bool {
    match first_violation(blocks) {
        Some(violation) => {
            warn!("chain validation failed: {violation}");
            false
        }
        None => true,
    }
}
