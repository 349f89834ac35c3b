//! Error taxonomy for the NAT subsystem (spec §7).

use crate::types::{BlockAddr, Nid};

/// Failure modes the NAT subsystem can report to a caller.
///
/// `truncate_*` treats [`NatError::NoSuchEntry`] as "already gone" and
/// continues; every other variant aborts the enclosing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NatError {
    /// The allocator refused a fresh block, or `valid_node_count + 1 >= max_nid`.
    #[error("no space left to allocate a node (nid {nid:?})")]
    NoSpace { nid: Nid },

    /// `nid` is absent from the cache, the journal, and the NVM tree.
    #[error("nid {0:?} has no mapping in the cache, journal, or NAT tree")]
    NoSuchEntry(Nid),

    /// `blk_addr` holds a sentinel where a live address was required.
    #[error("nid {nid:?} resolves to sentinel address {addr:?}, not a live block")]
    Invalid { nid: Nid, addr: BlockAddr },

    /// The owning inode has `FI_NO_ALLOC` set.
    #[error("nid {0:?}'s inode does not permit new block allocation")]
    NotPermitted(Nid),

    /// Cache or slab allocation failed even after the internal retry policy.
    #[error("out of memory allocating a cache entry for nid {0:?}")]
    OutOfMemory(Nid),

    /// A file-relative block index fell outside every range `get_node_path`
    /// understands.
    #[error("block index {0} is beyond the largest representable file offset")]
    FileTooLarge(u64),
}

pub type NatResult<T> = Result<T, NatError>;
