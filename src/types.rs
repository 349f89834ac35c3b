//! On-disk and in-memory data model for the NAT subsystem (spec §3).

use core::fmt;

use bitflags::bitflags;
use dataview::Pod;

bitflags! {
    /// The subset of an inode's in-memory flags that `get_new_node`
    /// consults (spec §4.5 step 3, "If the inode has `FI_NO_ALLOC` set, fail
    /// with *not-permitted*"). The real inode carries many more flags; only
    /// the one this subsystem branches on is modeled here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        /// Forbids allocating a fresh physical block for any of this
        /// inode's nodes, e.g. while the inode is mid-eviction.
        const NO_ALLOC = 1 << 0;
    }
}

/// Number of raw [`RawNatEntry`] records held by one NAT leaf page.
///
/// Fixed by the on-media page layout, analogous to how
/// `ov6_fs_types::INODE_PER_BLOCK` is derived from a fixed `FS_BLOCK_SIZE`
/// rather than being a runtime parameter.
pub const NAT_ENTRY_PER_BLOCK: usize = 455;

/// Number of child addresses held by one NAT interior page. Must be a power
/// of two: it is indexed by bit-shifting, not by division.
pub const NAT_ADDR_PER_NODE: usize = 512;
pub const LOG2_NAT_ADDRS_PER_NODE: u32 = 9;
const _: () = assert!(1 << LOG2_NAT_ADDRS_PER_NODE == NAT_ADDR_PER_NODE);

/// Direct data addresses stored in the inode itself.
pub const NORMAL_ADDRS_PER_INODE: usize = 923;
/// Data addresses per direct node.
pub const ADDRS_PER_BLOCK: usize = 1018;
/// Child nids per indirect node.
pub const NIDS_PER_BLOCK: usize = 1018;

/// `nid` of the filesystem root inode. Reserved: never handed out by the
/// free-nid pool, never scanned as a candidate.
pub const HMFS_ROOT_INO: u32 = 2;

/// Sentinel meaning "this entry is tombstoned / absent".
pub const NULL_ADDR: u64 = 0;
/// Sentinel meaning "reserved by the allocator, not yet populated".
pub const NEW_ADDR: u64 = u64::MAX;
/// Sentinel meaning "this slot is free for allocation".
pub const FREE_ADDR: u64 = u64::MAX - 1;

/// A node identifier: a dense 32-bit key for an inode or an indirect/direct
/// block node. `0` means "no node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod)]
#[repr(transparent)]
pub struct Nid(u32);

impl Nid {
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A physical byte offset of a node inside the NVM address space, or one of
/// the three sentinel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
#[repr(transparent)]
pub struct BlockAddr(u64);

impl BlockAddr {
    pub const NULL: Self = Self(NULL_ADDR);
    pub const NEW: Self = Self(NEW_ADDR);
    pub const FREE: Self = Self(FREE_ADDR);

    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_ADDR
    }

    #[must_use]
    pub const fn is_sentinel(self) -> bool {
        matches!(self.0, NEW_ADDR | FREE_ADDR)
    }

    #[must_use]
    pub const fn is_live(self) -> bool {
        !self.is_null() && !self.is_sentinel()
    }
}

/// The role a node plays, threaded explicitly through [`crate::node::get_new_node`]
/// so the correct summary type is stamped (spec §9, "Polymorphic node type").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Inode,
    IndirectNode,
    DirectNode,
}

impl NodeRole {
    #[must_use]
    pub const fn summary_type(self) -> SummaryType {
        match self {
            Self::Inode => SummaryType::Inode,
            Self::IndirectNode => SummaryType::IndirectNode,
            Self::DirectNode => SummaryType::DirectNode,
        }
    }
}

/// Per-block metadata describing which logical object and version owns a
/// physical block (spec §6, "Summary").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryType {
    Inode,
    IndirectNode,
    DirectNode,
}

/// `(ino, nid, blk_addr, version)`, the canonical in-memory lookup result
/// (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// The inode nid that owns this node (equals `nid` when the node *is*
    /// the inode).
    pub ino: Nid,
    pub nid: Nid,
    pub blk_addr: BlockAddr,
    /// The checkpoint generation in which `blk_addr` became current.
    pub version: u32,
}

impl NodeInfo {
    #[must_use]
    pub const fn new(ino: Nid, nid: Nid, blk_addr: BlockAddr, version: u32) -> Self {
        Self {
            ino,
            nid,
            blk_addr,
            version,
        }
    }
}

/// On-disk NAT entry, `(ino, block_addr, version)` plus implicit padding to
/// the leaf's record stride (spec §6, "Persisted layout").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
#[repr(C)]
pub struct RawNatEntry {
    pub block_addr: u64,
    pub ino: u32,
    pub version: u32,
}

impl RawNatEntry {
    pub const EMPTY: Self = Self {
        block_addr: NULL_ADDR,
        ino: 0,
        version: 0,
    };
}

/// Converts a looked-up [`NodeInfo`] into its on-disk representation.
#[must_use]
pub fn node_info_to_raw_nat(info: &NodeInfo) -> RawNatEntry {
    RawNatEntry {
        block_addr: info.blk_addr.value(),
        ino: info.ino.value(),
        version: info.version,
    }
}

/// Reconstructs a [`NodeInfo`] for `nid` from its on-disk representation.
#[must_use]
pub fn node_info_from_raw_nat(nid: Nid, raw: &RawNatEntry) -> NodeInfo {
    NodeInfo {
        ino: Nid::new(raw.ino),
        nid,
        blk_addr: BlockAddr::new(raw.block_addr),
        version: raw.version,
    }
}

/// `start_nid(nid)`: the first nid covered by the leaf that holds `nid`'s
/// entry (spec §3).
#[must_use]
pub const fn start_nid(nid: Nid) -> Nid {
    let n = nid.value();
    #[allow(clippy::cast_possible_truncation)]
    let rem = n % NAT_ENTRY_PER_BLOCK as u32;
    Nid::new(n - rem)
}

/// Offset of `nid`'s record within its leaf block.
#[must_use]
pub const fn offset_in_block(nid: Nid) -> usize {
    #[allow(clippy::cast_possible_truncation)]
    let per_block = NAT_ENTRY_PER_BLOCK as u32;
    (nid.value() % per_block) as usize
}

/// A fixed-size NAT leaf page: `NAT_ENTRY_PER_BLOCK` raw records.
#[derive(Clone, Copy, Pod)]
#[repr(C)]
pub struct NatBlock {
    entries: [RawNatEntry; NAT_ENTRY_PER_BLOCK],
}

impl NatBlock {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [RawNatEntry::EMPTY; NAT_ENTRY_PER_BLOCK],
        }
    }

    #[must_use]
    pub fn entry(&self, offset: usize) -> &RawNatEntry {
        &self.entries[offset]
    }

    pub fn entry_mut(&mut self, offset: usize) -> &mut RawNatEntry {
        &mut self.entries[offset]
    }
}

/// A fixed-size NAT interior page: `NAT_ADDR_PER_NODE` little-endian child
/// addresses.
#[derive(Clone, Copy, Pod)]
#[repr(C)]
pub struct NatNode {
    children: [u64; NAT_ADDR_PER_NODE],
}

impl NatNode {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            children: [NULL_ADDR; NAT_ADDR_PER_NODE],
        }
    }

    #[must_use]
    pub fn child(&self, index: usize) -> BlockAddr {
        BlockAddr::new(self.children[index])
    }

    pub fn set_child(&mut self, index: usize, addr: BlockAddr) {
        self.children[index] = addr.value();
    }
}

/// `(ino, nid, cp_ver)` footer shared by every node page, followed by its
/// typed body (spec §6, "Node page footer").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod)]
#[repr(C)]
pub struct NodeFooter {
    pub ino: u32,
    pub nid: u32,
    pub cp_ver: u32,
}

/// The child nid array carried by an indirect node page (single- or
/// double-indirect). Distinct from [`NatNode`]: this is the *file's* own
/// node tree, not the NAT tree — its slots are nids to be resolved through
/// the NAT subsystem, not raw physical addresses.
#[derive(Clone, Copy, Pod)]
#[repr(C)]
pub struct IndirectNodeChildren {
    nids: [u32; NIDS_PER_BLOCK],
}

impl IndirectNodeChildren {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            nids: [0; NIDS_PER_BLOCK],
        }
    }

    #[must_use]
    pub fn child(&self, index: usize) -> Nid {
        Nid::new(self.nids[index])
    }

    pub fn set_child(&mut self, index: usize, nid: Nid) {
        self.nids[index] = nid.value();
    }

    #[must_use]
    pub fn to_array(&self) -> [Nid; NIDS_PER_BLOCK] {
        let mut out = [Nid::NONE; NIDS_PER_BLOCK];
        for (o, n) in out.iter_mut().zip(self.nids.iter()) {
            *o = Nid::new(*n);
        }
        out
    }

    #[must_use]
    pub fn from_array(nids: &[Nid; NIDS_PER_BLOCK]) -> Self {
        let mut out = Self::zeroed();
        for (i, nid) in nids.iter().enumerate() {
            out.set_child(i, *nid);
        }
        out
    }
}
