//! The NAT on-NVM tree: read path and copy-on-write flush path (spec §4.2,
//! component C2).

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::types::{BlockAddr, NatBlock, NatNode, LOG2_NAT_ADDRS_PER_NODE, NAT_ADDR_PER_NODE};

/// Read/write access to the flat, memory-mapped NVM address space that
/// backs the NAT tree. Modeled after `block_io`'s device-by-index trait,
/// simplified to unbuffered load/store since NVM access is direct memory
/// access rather than a bounded page cache (spec §5: "NVM access is
/// memory-mapped load/store").
///
/// Implementations are not required to make `addr` dense; the reference
/// implementation ([`MemNvm`]) stores pages in a map keyed by address.
pub trait NvmPageStore {
    fn read_nat_leaf(&self, addr: BlockAddr) -> NatBlock;
    fn write_nat_leaf(&self, addr: BlockAddr, block: &NatBlock);
    fn read_nat_node(&self, addr: BlockAddr) -> NatNode;
    fn write_nat_node(&self, addr: BlockAddr, node: &NatNode);
}

/// Selects the child index at interior height `h` and the residual
/// `blk_order` to carry into the next level down, mirroring the shift/mask
/// scheme shared by the read and write paths (spec §9: these must agree
/// exactly or the tree silently corrupts).
#[must_use]
pub fn child_index_at_height(blk_order: u64, height: u32) -> (usize, u64) {
    debug_assert!(height > 0);
    let shift = (height - 1) * LOG2_NAT_ADDRS_PER_NODE;
    let index = (blk_order >> shift) as usize % NAT_ADDR_PER_NODE;
    (index, blk_order)
}

/// Walks the NAT tree from `root` down to the leaf covering `blk_order`,
/// returning the leaf's physical address, or `None` if any node on the path
/// is absent ("the subtree is uninitialized", spec §4.2).
pub fn get_nat_page_by_order<S: NvmPageStore + ?Sized>(
    store: &S,
    root: BlockAddr,
    height: u32,
    blk_order: u64,
) -> Option<BlockAddr> {
    if root.is_null() {
        return None;
    }
    if height == 0 {
        return Some(root);
    }
    let (index, _) = child_index_at_height(blk_order, height);
    let node = store.read_nat_node(root);
    let child = node.child(index);
    get_nat_page_by_order(store, child, height - 1, blk_order)
}

/// Computes `blk_order` for `nid` and walks the tree for its leaf (spec
/// §4.2). `NAT_ENTRY_PER_BLOCK` need not be a power of two (the reference
/// layout fixes it at 455), so this uses true division, unlike the
/// power-of-two shift used between interior levels — see `DESIGN.md` for
/// why the two schemes differ.
#[must_use]
pub fn blk_order_of(nid: crate::types::Nid) -> u64 {
    u64::from(nid.value()) / crate::types::NAT_ENTRY_PER_BLOCK as u64
}

pub fn get_nat_page<S: NvmPageStore + ?Sized>(
    store: &S,
    root: BlockAddr,
    height: u32,
    nid: crate::types::Nid,
) -> Option<BlockAddr> {
    let blk_order = blk_order_of(nid);
    get_nat_page_by_order(store, root, height, blk_order)
}

/// Publishes one dirty leaf image into the tree as a new checkpoint,
/// allocating fresh NVM for every interior node on the path that was not
/// already copied this checkpoint, and mutating in place the ones that
/// were (spec §4.2, "Write path").
///
/// Returns the (possibly new) address of the node at this level, or `None`
/// if it was mutated in place — callers must treat `None` as "keep the
/// existing parent slot", not as an error (spec §9).
pub fn recursive_flush_nat_pages<S, A>(
    store: &S,
    alloc: &A,
    old_root: BlockAddr,
    cur_root: BlockAddr,
    height: u32,
    blk_order: u64,
    leaf_image: &NatBlock,
) -> Option<BlockAddr>
where
    S: NvmPageStore + ?Sized,
    A: crate::external::SegmentAllocator + ?Sized,
{
    if height == 0 {
        let addr = alloc.alloc_node_block()?;
        store.write_nat_leaf(addr, leaf_image);
        return Some(addr);
    }

    let (index, _) = child_index_at_height(blk_order, height);

    enum Disposition {
        AllocateZeroed,
        CowCopy(NatNode),
        MutateInPlace(NatNode),
    }

    let disposition = if cur_root.is_null() {
        Disposition::AllocateZeroed
    } else if cur_root == old_root {
        Disposition::CowCopy(store.read_nat_node(cur_root))
    } else {
        Disposition::MutateInPlace(store.read_nat_node(cur_root))
    };

    let (mut node, node_addr, allocated_fresh) = match disposition {
        Disposition::AllocateZeroed => (NatNode::zeroed(), None, true),
        Disposition::CowCopy(node) => (node, None, true),
        Disposition::MutateInPlace(node) => (node, Some(cur_root), false),
    };

    let old_child = if old_root.is_null() {
        BlockAddr::NULL
    } else {
        store.read_nat_node(old_root).child(index)
    };
    let cur_child = node.child(index);

    let new_child = recursive_flush_nat_pages(
        store,
        alloc,
        old_child,
        cur_child,
        height - 1,
        blk_order,
        leaf_image,
    );
    if let Some(child_addr) = new_child {
        node.set_child(index, child_addr);
    }

    if allocated_fresh {
        let addr = alloc.alloc_node_block()?;
        store.write_nat_node(addr, &node);
        Some(addr)
    } else {
        let addr = node_addr.expect("in-place mutation always has an existing address");
        store.write_nat_node(addr, &node);
        None
    }
}

/// A reference, in-memory [`NvmPageStore`] used by this crate's own tests
/// and exported for downstream integration tests, analogous to
/// `block_io`'s `MockDevice`.
pub struct MemNvm {
    leaves: RwLock<BTreeMap<u64, NatBlock>>,
    nodes: RwLock<BTreeMap<u64, NatNode>>,
    children: RwLock<BTreeMap<u64, crate::types::IndirectNodeChildren>>,
}

impl Default for MemNvm {
    fn default() -> Self {
        Self::new()
    }
}

impl MemNvm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            leaves: RwLock::new(BTreeMap::new()),
            nodes: RwLock::new(BTreeMap::new()),
            children: RwLock::new(BTreeMap::new()),
        }
    }
}

impl crate::node::NodeTreeStore for MemNvm {
    fn read_children(&self, addr: BlockAddr) -> crate::types::IndirectNodeChildren {
        self.children
            .read()
            .expect("nvm lock poisoned")
            .get(&addr.value())
            .copied()
            .unwrap_or_else(crate::types::IndirectNodeChildren::zeroed)
    }

    fn write_children(&self, addr: BlockAddr, children: &crate::types::IndirectNodeChildren) {
        self.children
            .write()
            .expect("nvm lock poisoned")
            .insert(addr.value(), *children);
    }
}

impl NvmPageStore for MemNvm {
    fn read_nat_leaf(&self, addr: BlockAddr) -> NatBlock {
        self.leaves
            .read()
            .expect("nvm lock poisoned")
            .get(&addr.value())
            .copied()
            .unwrap_or_else(NatBlock::zeroed)
    }

    fn write_nat_leaf(&self, addr: BlockAddr, block: &NatBlock) {
        self.leaves
            .write()
            .expect("nvm lock poisoned")
            .insert(addr.value(), *block);
    }

    fn read_nat_node(&self, addr: BlockAddr) -> NatNode {
        self.nodes
            .read()
            .expect("nvm lock poisoned")
            .get(&addr.value())
            .copied()
            .unwrap_or_else(NatNode::zeroed)
    }

    fn write_nat_node(&self, addr: BlockAddr, node: &NatNode) {
        self.nodes
            .write()
            .expect("nvm lock poisoned")
            .insert(addr.value(), *node);
    }
}
