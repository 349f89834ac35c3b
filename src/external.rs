//! Interfaces to the collaborators spec §1 treats as out of scope: the
//! segment/block allocator and the global node/inode accounting counters
//! (spec §6, "From external → into core").

use crate::types::BlockAddr;

/// Provider of fresh NVM block addresses and of block reclamation, owned by
/// the segment manager this subsystem never implements.
pub trait SegmentAllocator {
    /// Returns a fresh, page-aligned block address disjoint from every
    /// other live allocation, or `None` if the segment manager is out of
    /// space.
    fn alloc_node_block(&self) -> Option<BlockAddr>;

    /// Marks a previously live block reclaimable.
    fn invalidate_block(&self, addr: BlockAddr);
}

/// Global node/inode accounting, failable the way the real checkpoint's
/// counters are (spec §6).
pub trait NodeAccounting {
    /// Attempts to grow the valid-node count by `count`. Returns `false` if
    /// the budget would be exceeded.
    #[must_use]
    fn inc_valid_node_count(&self, count: u32) -> bool;

    /// Shrinks the valid-node count by `count`.
    fn dec_valid_node_count(&self, count: u32);

    /// Shrinks the valid-inode count by one.
    fn dec_valid_inode_count(&self);
}
