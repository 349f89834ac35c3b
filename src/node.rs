//! Node lookup and copy-on-write node allocation (spec §4.5, component C5).

use crate::cache::{NatCache, NatJournal};
use crate::error::{NatError, NatResult};
use crate::external::{NodeAccounting, SegmentAllocator};
use crate::nvm::NvmPageStore;
use crate::types::{
    BlockAddr, IndirectNodeChildren, InodeFlags, Nid, NodeFooter, NodeInfo, NodeRole, SummaryType,
};

/// Read/write access to an indirect node page's child nid array — the
/// file's own node tree, as distinct from the NAT tree [`NvmPageStore`]
/// covers. The truncation driver (component C6) needs this to discover
/// which nids to recurse into.
pub trait NodeTreeStore {
    fn read_children(&self, addr: BlockAddr) -> IndirectNodeChildren;
    fn write_children(&self, addr: BlockAddr, children: &IndirectNodeChildren);
}

/// `get_node`: the read-only lookup. Resolves `nid` through the cache,
/// journal, and NAT tree in turn (spec §4.3's `get_node_info`, re-exposed
/// here under the name spec §4.5 calls it by), rejecting nids whose mapping
/// is a sentinel rather than a live block.
pub fn get_node<S: NvmPageStore + ?Sized>(
    cache: &NatCache,
    journal: &NatJournal,
    store: &S,
    root: BlockAddr,
    height: u32,
    nid: Nid,
) -> NatResult<NodeInfo> {
    let info = cache.get_node_info(nid, journal, store, root, height)?;
    if info.blk_addr.is_null() {
        return Err(NatError::NoSuchEntry(nid));
    }
    if info.blk_addr.is_sentinel() {
        return Err(NatError::Invalid {
            nid,
            addr: info.blk_addr,
        });
    }
    Ok(info)
}

/// The footer and mapping produced by [`get_new_node`] for the caller to
/// stamp onto the freshly allocated page before writing its typed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewNode {
    pub info: NodeInfo,
    pub footer: NodeFooter,
    /// The node's role, for the caller to stamp into the segment summary
    /// (spec §9's mandatory `NodeRole` discriminant; the summary area
    /// itself belongs to the segment manager, out of scope here).
    pub summary_type: SummaryType,
}

/// `get_new_node`: copy-on-write allocation of a fresh physical block for
/// `nid` (spec §4.5).
///
/// `flags` is the owning inode's flags; only [`InodeFlags::NO_ALLOC`] is
/// consulted (spec §4.5 step 3). `store_version` is the active checkpoint's
/// generation, stamped into both the cache entry and the node footer.
#[allow(clippy::too_many_arguments)]
pub fn get_new_node<S, A, N>(
    cache: &NatCache,
    journal: &NatJournal,
    store: &S,
    accounting: &N,
    allocator: &A,
    root: BlockAddr,
    height: u32,
    ino: Nid,
    nid: Nid,
    role: NodeRole,
    flags: InodeFlags,
    store_version: u32,
) -> NatResult<NewNode>
where
    S: NvmPageStore + ?Sized,
    A: SegmentAllocator + ?Sized,
    N: NodeAccounting + ?Sized,
{
    // The node may already be mapped (a previous generation's block being
    // superseded) or brand new (just returned by `alloc_nid`); either is a
    // legal starting point.
    let previous = cache
        .get_node_info(nid, journal, store, root, height)
        .ok()
        .filter(|info| info.blk_addr.is_live());

    // Spec §4.5 step 1: a node already wandered (copied) in this checkpoint
    // is returned unchanged; no further allocation is needed or permitted.
    if let Some(prev) = previous {
        if prev.version == store_version {
            let footer = NodeFooter {
                ino: prev.ino.value(),
                nid: nid.value(),
                cp_ver: store_version,
            };
            return Ok(NewNode {
                info: prev,
                footer,
                summary_type: role.summary_type(),
            });
        }
    }

    if !accounting.inc_valid_node_count(1) {
        return Err(NatError::NoSpace { nid });
    }

    if flags.contains(InodeFlags::NO_ALLOC) {
        accounting.dec_valid_node_count(1);
        return Err(NatError::NotPermitted(nid));
    }

    let Some(new_addr) = allocator.alloc_node_block() else {
        accounting.dec_valid_node_count(1);
        return Err(NatError::NoSpace { nid });
    };

    // A node already wandered this checkpoint (its version matches the one
    // we are about to stamp) keeps its block; otherwise the old block is
    // superseded and can be reclaimed.
    if let Some(prev) = previous {
        if prev.version != store_version {
            allocator.invalidate_block(prev.blk_addr);
        }
    }

    let info = NodeInfo::new(ino, nid, new_addr, store_version);
    cache.update(nid, info, true)?;

    let footer = NodeFooter {
        ino: ino.value(),
        nid: nid.value(),
        cp_ver: store_version,
    };
    Ok(NewNode {
        info,
        footer,
        summary_type: role.summary_type(),
    })
}
