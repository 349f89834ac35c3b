//! Hierarchical inode truncation driver (spec §4.6, component C6).
//!
//! Every function here returns the spec's three-valued result instead of a
//! plain count: a positive number of freed node blocks, `0` when the
//! subtree was only partially truncated (a nonzero tail remains live), and
//! an error when the walk cannot continue. `truncate_*` treats
//! [`NatError::NoSuchEntry`] as "this node is already gone", folding it into
//! a successful no-op rather than propagating it (spec §7).

use crate::cache::{NatCache, NatJournal};
use crate::error::{NatError, NatResult};
use crate::external::{NodeAccounting, SegmentAllocator};
use crate::nvm::NvmPageStore;
use crate::types::{BlockAddr, Nid, ADDRS_PER_BLOCK, NIDS_PER_BLOCK};

/// Collaborators threaded through every truncation call. Bundled into one
/// struct since every recursive step needs the full set (spec §4.6's
/// algorithms all take the same context).
pub struct TruncateContext<'a, S: ?Sized, A: ?Sized, N: ?Sized> {
    pub cache: &'a NatCache,
    pub journal: &'a NatJournal,
    pub store: &'a S,
    pub accounting: &'a N,
    pub allocator: &'a A,
    pub root: BlockAddr,
    pub height: u32,
}

/// Result of freeing a single node and its dependents: the count of node
/// blocks reclaimed (the node itself plus every descendant actually
/// freed).
pub type FreedCount = u64;

/// `truncate_node`: reclaims one node (marks its nid's cache entry
/// tombstoned, decrements the node accounting, invalidates its block).
/// Missing nids are treated as already free.
pub fn truncate_node<S, A, N>(ctx: &TruncateContext<'_, S, A, N>, nid: Nid) -> NatResult<FreedCount>
where
    S: NvmPageStore + ?Sized,
    A: SegmentAllocator + ?Sized,
    N: NodeAccounting + ?Sized,
{
    let info = match ctx
        .cache
        .get_node_info(nid, ctx.journal, ctx.store, ctx.root, ctx.height)
    {
        Ok(info) => info,
        Err(NatError::NoSuchEntry(_)) => return Ok(0),
        Err(other) => return Err(other),
    };

    if info.blk_addr.is_live() {
        ctx.allocator.invalidate_block(info.blk_addr);
    }
    ctx.cache.update(
        nid,
        crate::types::NodeInfo::new(info.ino, nid, BlockAddr::NULL, info.version),
        true,
    )?;
    ctx.accounting.dec_valid_node_count(1);
    Ok(1)
}

/// `truncate_dnode`: frees every live data address a direct node covers,
/// then the direct node itself. Data-address bookkeeping belongs to the
/// block allocator (out of scope here, spec §1); only the node block's own
/// lifecycle is this subsystem's responsibility.
pub fn truncate_dnode<S, A, N>(ctx: &TruncateContext<'_, S, A, N>, nid: Nid) -> NatResult<FreedCount>
where
    S: NvmPageStore + ?Sized,
    A: SegmentAllocator + ?Sized,
    N: NodeAccounting + ?Sized,
{
    if nid.is_none() {
        return Ok(0);
    }
    truncate_node(ctx, nid)
}

/// `truncate_nodes`: recursively frees an indirect node's children from
/// `start_index` through the end of its `NIDS_PER_BLOCK` child array,
/// descending one more level when `depth > 1`, then the indirect node
/// itself once every child in range is gone (spec §4.6).
///
/// `depth` counts levels remaining below this node: `1` means children are
/// direct nodes, `2` means children are themselves indirect nodes whose
/// own children are direct nodes (the double-indirect case).
pub fn truncate_nodes<S, A, N>(
    ctx: &TruncateContext<'_, S, A, N>,
    nid: Nid,
    depth: u32,
    start_index: usize,
    children: &mut [Nid; NIDS_PER_BLOCK],
) -> NatResult<FreedCount>
where
    S: NvmPageStore + ?Sized,
    A: SegmentAllocator + ?Sized,
    N: NodeAccounting + ?Sized,
{
    if nid.is_none() {
        return Ok(0);
    }

    let mut freed: FreedCount = 0;
    let mut fully_truncated = true;

    for child in children.iter_mut().skip(start_index) {
        if child.is_none() {
            continue;
        }
        let child_freed = if depth > 1 {
            let mut grandchildren = [Nid::NONE; NIDS_PER_BLOCK];
            truncate_nodes(ctx, *child, depth - 1, 0, &mut grandchildren)?
        } else {
            truncate_dnode(ctx, *child)?
        };
        if child_freed == 0 {
            fully_truncated = false;
            break;
        }
        freed += child_freed;
        *child = Nid::NONE;
    }

    if !fully_truncated {
        return Ok(0);
    }

    freed += truncate_node(ctx, nid)?;
    Ok(freed)
}

/// `truncate_partial_nodes`: truncates only the child range
/// `[start_index, NIDS_PER_BLOCK)` of an indirect node without freeing the
/// indirect node itself, used when a truncation boundary falls in the
/// middle of its children (spec §4.6).
pub fn truncate_partial_nodes<S, A, N>(
    ctx: &TruncateContext<'_, S, A, N>,
    depth: u32,
    start_index: usize,
    children: &mut [Nid; NIDS_PER_BLOCK],
) -> NatResult<FreedCount>
where
    S: NvmPageStore + ?Sized,
    A: SegmentAllocator + ?Sized,
    N: NodeAccounting + ?Sized,
{
    let mut freed: FreedCount = 0;
    for child in children.iter_mut().skip(start_index) {
        if child.is_none() {
            continue;
        }
        let child_freed = if depth > 1 {
            let mut grandchildren = [Nid::NONE; NIDS_PER_BLOCK];
            truncate_nodes(ctx, *child, depth - 1, 0, &mut grandchildren)?
        } else {
            truncate_dnode(ctx, *child)?
        };
        if child_freed == 0 {
            break;
        }
        freed += child_freed;
        *child = Nid::NONE;
    }
    Ok(freed)
}

/// `truncate_inode_blocks`: the top-level driver, given the file-relative
/// block index `from` marking the first block to discard. Direct addresses
/// at or after `from` are the caller's responsibility to clear (they live
/// in the inode page, out of scope here); this function walks the nid
/// path (spec §4.1) and truncates whichever node-role subtrees `from`
/// falls into or beyond.
pub fn truncate_inode_blocks<S, A, N>(
    ctx: &TruncateContext<'_, S, A, N>,
    inode_nids: &mut [Nid; 5],
    from: u64,
) -> NatResult<FreedCount>
where
    S: NvmPageStore + ?Sized,
    A: SegmentAllocator + ?Sized,
    N: NodeAccounting + ?Sized,
{
    let path = crate::nid_path::get_node_path(from)?;
    let Some(slot) = path.dir_slot() else {
        // `from` falls among the inode's own direct addresses; nothing
        // below the node level to truncate.
        return Ok(0);
    };

    let mut freed: FreedCount = 0;

    // spec §4.6 step 2: when `from` falls partway through the first
    // affected slot's own children rather than exactly on a subtree
    // boundary (`offset[level-1] != 0`), only the children at or beyond
    // `offset[1]` are gone; the slot's own indirect (or double-indirect)
    // node survives and must not be handed to `truncate_nodes`, which
    // always frees the node it's given once its children are in range.
    // The ordinary per-slot loop below then resumes at the *next* slot.
    let mut start_slot = slot;
    if matches!(path.level, 2 | 3) {
        let boundary = path.offset[path.level - 1];
        if boundary != 0 {
            let nid = inode_nids[slot];
            if !nid.is_none() {
                #[allow(clippy::cast_sign_loss)]
                let start_index = path.offset[1] as usize;
                let depth = if slot == 4 { 2 } else { 1 };
                let mut children = [Nid::NONE; NIDS_PER_BLOCK];
                freed += truncate_partial_nodes(ctx, depth, start_index, &mut children)?;
            }
            start_slot = slot + 1;
        }
    }

    for s in start_slot..inode_nids.len() {
        let nid = inode_nids[s];
        if nid.is_none() {
            continue;
        }
        let depth = match s {
            0 | 1 => 0,
            2 | 3 => 1,
            _ => 2,
        };
        let child_freed = if depth == 0 {
            truncate_dnode(ctx, nid)?
        } else {
            let mut children = [Nid::NONE; NIDS_PER_BLOCK];
            truncate_nodes(ctx, nid, depth, 0, &mut children)?
        };
        if child_freed == 0 {
            return Ok(freed);
        }
        freed += child_freed;
        inode_nids[s] = Nid::NONE;
    }
    Ok(freed)
}

const _: () = assert!(ADDRS_PER_BLOCK == NIDS_PER_BLOCK);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{NodeAccounting, SegmentAllocator};
    use crate::nvm::MemNvm;
    use crate::types::NodeInfo;
    use core::sync::atomic::{AtomicU32, Ordering};

    struct NullAllocator;
    impl SegmentAllocator for NullAllocator {
        fn alloc_node_block(&self) -> Option<BlockAddr> {
            None
        }
        fn invalidate_block(&self, _addr: BlockAddr) {}
    }

    struct CountingAccounting(AtomicU32);
    impl NodeAccounting for CountingAccounting {
        fn inc_valid_node_count(&self, count: u32) -> bool {
            self.0.fetch_add(count, Ordering::Relaxed);
            true
        }
        fn dec_valid_node_count(&self, count: u32) {
            self.0.fetch_sub(count, Ordering::Relaxed);
        }
        fn dec_valid_inode_count(&self) {}
    }

    fn seed(cache: &NatCache, nid: Nid) {
        cache
            .update(
                nid,
                NodeInfo::new(Nid::new(2), nid, BlockAddr::new(u64::from(nid.value()) * 4096), 1),
                false,
            )
            .unwrap();
    }

    #[test]
    fn truncate_node_tombstones_a_live_entry() {
        let cache = NatCache::new(16);
        let journal = NatJournal::new();
        let store = MemNvm::new();
        let accounting = CountingAccounting(AtomicU32::new(1));
        let allocator = NullAllocator;
        let ctx = TruncateContext {
            cache: &cache,
            journal: &journal,
            store: &store,
            accounting: &accounting,
            allocator: &allocator,
            root: BlockAddr::NULL,
            height: 0,
        };
        seed(&cache, Nid::new(10));

        let freed = truncate_node(&ctx, Nid::new(10)).unwrap();
        assert_eq!(freed, 1);
        assert!(cache.lookup(Nid::new(10)).unwrap().blk_addr.is_null());
        assert_eq!(accounting.0.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn truncate_node_on_missing_nid_is_a_no_op() {
        let cache = NatCache::new(16);
        let journal = NatJournal::new();
        let store = MemNvm::new();
        let accounting = CountingAccounting(AtomicU32::new(0));
        let allocator = NullAllocator;
        let ctx = TruncateContext {
            cache: &cache,
            journal: &journal,
            store: &store,
            accounting: &accounting,
            allocator: &allocator,
            root: BlockAddr::NULL,
            height: 0,
        };

        let freed = truncate_node(&ctx, Nid::new(999)).unwrap();
        assert_eq!(freed, 0);
    }

    #[test]
    fn truncate_nodes_frees_every_populated_direct_child() {
        let cache = NatCache::new(64);
        let journal = NatJournal::new();
        let store = MemNvm::new();
        let accounting = CountingAccounting(AtomicU32::new(4));
        let allocator = NullAllocator;
        let ctx = TruncateContext {
            cache: &cache,
            journal: &journal,
            store: &store,
            accounting: &accounting,
            allocator: &allocator,
            root: BlockAddr::NULL,
            height: 0,
        };

        seed(&cache, Nid::new(20));
        let mut children = [Nid::NONE; NIDS_PER_BLOCK];
        children[0] = Nid::new(21);
        children[1] = Nid::new(22);
        seed(&cache, Nid::new(21));
        seed(&cache, Nid::new(22));

        let freed = truncate_nodes(&ctx, Nid::new(20), 1, 0, &mut children).unwrap();
        assert_eq!(freed, 3); // two direct children plus the indirect node itself
        assert!(children.iter().all(Nid::is_none));
    }

    #[test]
    fn truncate_inode_blocks_preserves_a_partially_truncated_slot() {
        use crate::types::NORMAL_ADDRS_PER_INODE;

        let cache = NatCache::new(16);
        let journal = NatJournal::new();
        let store = MemNvm::new();
        let accounting = CountingAccounting(AtomicU32::new(1));
        let allocator = NullAllocator;
        let ctx = TruncateContext {
            cache: &cache,
            journal: &journal,
            store: &store,
            accounting: &accounting,
            allocator: &allocator,
            root: BlockAddr::NULL,
            height: 0,
        };

        // Single-indirect (IND1) slot with a live node; choose `from` so it
        // lands partway through that node's own children (offset[1] == 5),
        // not on a subtree boundary.
        let ind1 = Nid::new(30);
        seed(&cache, ind1);
        let mut inode_nids = [Nid::NONE; 5];
        inode_nids[2] = ind1;

        let from = NORMAL_ADDRS_PER_INODE as u64 + 2 * ADDRS_PER_BLOCK as u64 + 5 * NIDS_PER_BLOCK as u64;
        let path = crate::nid_path::get_node_path(from).unwrap();
        assert_eq!(path.level, 2);
        assert_eq!(path.offset[1], 5);

        let freed = truncate_inode_blocks(&ctx, &mut inode_nids, from).unwrap();

        // No real children were ever populated on this node, so nothing
        // beneath it was reclaimed, but the fix's whole point is that the
        // node at the boundary slot itself must survive rather than being
        // tombstoned outright.
        assert_eq!(freed, 0);
        assert_eq!(inode_nids[2], ind1);
        assert!(cache.lookup(ind1).unwrap().blk_addr.is_live());
    }
}
