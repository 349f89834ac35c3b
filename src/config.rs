//! Tunable NAT tree parameters (spec §4.2's implicit fixed constants,
//! generalized per `SPEC_FULL.md` §0.2 so a caller building against a
//! different on-media page size can supply its own tree height instead of
//! the crate baking one in).
//!
//! [`NAT_ENTRY_PER_BLOCK`](crate::types::NAT_ENTRY_PER_BLOCK) and
//! [`NAT_ADDR_PER_NODE`](crate::types::NAT_ADDR_PER_NODE) stay compile-time
//! constants: they size the fixed-length arrays inside [`crate::types::NatBlock`]
//! and [`crate::types::NatNode`], so changing them is a binary-layout change,
//! not a runtime parameter. The tree height `H`, however, is already threaded
//! through every C2/C3/C4 function as a plain `u32` argument — this type
//! exists only to name that one genuinely variable dimension and derive
//! `max_nid` from it consistently, instead of every caller recomputing the
//! formula from spec §3 by hand.

use crate::types::{NAT_ADDR_PER_NODE, NAT_ENTRY_PER_BLOCK};

/// The NAT tree's variable dimension (its height) plus the formula for the
/// largest nid it can address (spec §3: `max_nid = NAT_ENTRY_PER_BLOCK *
/// NAT_ADDR_PER_NODE^(H-1)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatTreeConfig {
    pub height: u32,
}

impl NatTreeConfig {
    #[must_use]
    pub const fn new(height: u32) -> Self {
        Self { height }
    }

    /// The literal configuration from spec §8's end-to-end scenarios
    /// (`NAT_ENTRY_PER_BLOCK = 455`, `NAT_ADDR_PER_NODE = 512`, `H = 3`).
    #[must_use]
    pub const fn reference() -> Self {
        Self::new(3)
    }

    /// `hmfs_max_nid()`: the first nid that is out of range for this tree
    /// (spec §10.1 of `SPEC_FULL.md`). Saturates at `u32::MAX` rather than
    /// overflowing for degenerate (very tall) configurations — a real
    /// on-media layout never approaches that, but the formula itself is
    /// exponential and must not panic on a caller-supplied height.
    #[must_use]
    pub fn max_nid(self) -> u32 {
        let mut max = u64::from(NAT_ENTRY_PER_BLOCK as u32);
        for _ in 1..self.height {
            max = max.saturating_mul(NAT_ADDR_PER_NODE as u64);
            if max > u64::from(u32::MAX) {
                return u32::MAX;
            }
        }
        u32::try_from(max).unwrap_or(u32::MAX)
    }
}
