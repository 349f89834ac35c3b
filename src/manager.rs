//! `NodeManager`: the facade tying components C1-C6 together and exposing
//! the external-interface surface of spec §6 (`build_node_manager`,
//! `alloc_nid`, `get_node`, `get_new_node`, `truncate_inode_blocks`, the
//! checkpoint flush entry point, ...).
//!
//! Grounded on `kernel/src/fs/inode/mod.rs`'s role in the teacher repo: a
//! single type that owns every lock and collaborator a subsystem needs and
//! exposes a small set of whole-operation methods, rather than making
//! callers thread `NatCache`/`NatJournal`/`NvmPageStore` references through
//! by hand the way the lower `cache`/`nvm`/`free_nid` modules do internally.

use std::sync::Mutex as StdSyncMutex;

use mutex_api::Mutex;

use crate::cache::{NatCache, NatJournal};
use crate::config::NatTreeConfig;
use crate::error::{NatError, NatResult};
use crate::external::{NodeAccounting, SegmentAllocator};
use crate::free_nid::FreeNidPool;
use crate::node::{self, NewNode};
use crate::nvm::{self, NvmPageStore};
use crate::truncate::{self, FreedCount, TruncateContext};
use crate::types::{BlockAddr, InodeFlags, Nid, NodeInfo, NodeRole};

/// The active checkpoint's NAT-relevant state (spec §6, `CURCP_I(sbi)`):
/// the generation counter, the tree's root and height, and the global
/// valid-node budget `alloc_nid` checks against. Checkpoint record layout
/// and orchestration beyond this is out of scope (spec §1).
pub trait CheckpointHandle {
    fn store_version(&self) -> u32;
    fn nat_root(&self) -> BlockAddr;
    fn set_nat_root(&self, root: BlockAddr);
    fn nat_height(&self) -> u32;
    fn valid_node_count(&self) -> u32;
}

/// A `mutex_api::Mutex<Data = ()>` backed by `std::sync::Mutex`, the
/// default lock implementation this crate provides for hosted (non-kernel)
/// use — analogous to how the teacher provides `SpinLock` as its concrete
/// `Mutex` impl for `no_std` kernel code, adapted here to a plain OS mutex
/// since this crate runs on a normal thread scheduler, not bare metal.
pub struct StdMutex<T>(StdSyncMutex<T>);

impl<T> Mutex for StdMutex<T> {
    type Data = T;
    type Guard<'a>
        = std::sync::MutexGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        Self(StdSyncMutex::new(data))
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.0.lock().expect("checkpoint flush lock poisoned")
    }
}

/// Ties together the NAT cache (C3), free-nid pool (C4), node lookup/COW
/// allocation (C5), and truncation driver (C6) over a caller-supplied NVM
/// store, segment allocator, node accounting, and checkpoint handle.
///
/// `L` is the lock used to serialize `checkpoint()` against itself (spec
/// §5: "implementers SHOULD take the write lock around flush, or snapshot
/// the dirty list into a private sequence first" — this type does both,
/// snapshotting the dirty list in `NatCache::snapshot_dirty` and also
/// serializing concurrent flushes through `checkpoint_lock`). Defaults to
/// [`StdMutex`].
pub struct NodeManager<S, A, N, C, L = StdMutex<()>>
where
    L: Mutex<Data = ()>,
{
    cache: NatCache,
    journal: NatJournal,
    pool: FreeNidPool,
    store: S,
    allocator: A,
    accounting: N,
    checkpoint: C,
    config: NatTreeConfig,
    checkpoint_lock: L,
}

impl<S, A, N, C, L> NodeManager<S, A, N, C, L>
where
    S: NvmPageStore,
    A: SegmentAllocator,
    N: NodeAccounting,
    C: CheckpointHandle,
    L: Mutex<Data = ()>,
{
    /// `build_node_manager`: wires the collaborators together. `cache_capacity`
    /// and `pool_capacity` replace the original's process-wide slab and
    /// fixed `2 * page` pool array with explicit, instance-scoped bounds
    /// (spec §9, "Process-wide slab").
    pub fn new(
        store: S,
        allocator: A,
        accounting: N,
        checkpoint: C,
        config: NatTreeConfig,
        cache_capacity: usize,
        pool_capacity: usize,
        first_scan_nid: Nid,
    ) -> Self {
        Self {
            cache: NatCache::new(cache_capacity),
            journal: NatJournal::new(),
            pool: FreeNidPool::new(pool_capacity, first_scan_nid),
            store,
            allocator,
            accounting,
            checkpoint,
            config,
            checkpoint_lock: L::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> NatTreeConfig {
        self.config
    }

    /// `get_node_info`: the canonical read (spec §4.3).
    pub fn get_node_info(&self, nid: Nid) -> NatResult<NodeInfo> {
        self.cache.get_node_info(
            nid,
            &self.journal,
            &self.store,
            self.checkpoint.nat_root(),
            self.checkpoint.nat_height(),
        )
    }

    /// `get_node`: resolves `nid` to a live mapping, or fails (spec §4.5).
    pub fn get_node(&self, nid: Nid) -> NatResult<NodeInfo> {
        node::get_node(
            &self.cache,
            &self.journal,
            &self.store,
            self.checkpoint.nat_root(),
            self.checkpoint.nat_height(),
            nid,
        )
    }

    /// `get_new_node`: copy-on-write allocation of a fresh physical block
    /// for `nid`, owned by inode `ino` (spec §4.5).
    pub fn get_new_node(
        &self,
        ino: Nid,
        nid: Nid,
        role: NodeRole,
        flags: InodeFlags,
    ) -> NatResult<NewNode> {
        node::get_new_node(
            &self.cache,
            &self.journal,
            &self.store,
            &self.accounting,
            &self.allocator,
            self.checkpoint.nat_root(),
            self.checkpoint.nat_height(),
            ino,
            nid,
            role,
            flags,
            self.checkpoint.store_version(),
        )
    }

    /// `update_nat_entry`: direct cache write, bypassing `get_new_node`'s
    /// allocation path (spec §4.3). Used by callers that already hold a
    /// `NodeInfo` to publish, such as `truncate_node`.
    pub fn update_nat_entry(&self, nid: Nid, info: NodeInfo, dirty: bool) -> NatResult<()> {
        self.cache.update(nid, info, dirty)
    }

    /// `alloc_nid`: pops a candidate from the free pool, rebuilding it
    /// exactly once if empty (spec §4.4).
    pub fn alloc_nid(&self) -> NatResult<Nid> {
        let max_nid = self.config.max_nid();
        if self.checkpoint.valid_node_count() + 1 >= max_nid {
            return Err(NatError::NoSpace { nid: Nid::NONE });
        }

        if let Some(nid) = self.pool.alloc_nid() {
            return Ok(nid);
        }

        self.pool.build_free_nids(
            &self.journal,
            &self.store,
            self.checkpoint.nat_root(),
            self.checkpoint.nat_height(),
            max_nid,
        );
        self.pool.alloc_nid().ok_or(NatError::NoSpace { nid: Nid::NONE })
    }

    /// `alloc_nid_failed`: returns a nid that was allocated but never used
    /// (spec §4.4).
    pub fn alloc_nid_failed(&self, nid: Nid) {
        self.pool.alloc_nid_failed(nid);
    }

    /// Builds a [`TruncateContext`] borrowing this manager's collaborators,
    /// for `truncate_inode_blocks` and its helpers (spec §4.6).
    fn truncate_context(&self) -> TruncateContext<'_, S, A, N> {
        TruncateContext {
            cache: &self.cache,
            journal: &self.journal,
            store: &self.store,
            accounting: &self.accounting,
            allocator: &self.allocator,
            root: self.checkpoint.nat_root(),
            height: self.checkpoint.nat_height(),
        }
    }

    /// `truncate_node`: reclaims a single node (spec §4.6).
    pub fn truncate_node(&self, nid: Nid) -> NatResult<FreedCount> {
        truncate::truncate_node(&self.truncate_context(), nid)
    }

    /// `truncate_inode_blocks`: the top-level truncation entry point (spec
    /// §4.6).
    pub fn truncate_inode_blocks(
        &self,
        inode_nids: &mut [Nid; 5],
        from: u64,
    ) -> NatResult<FreedCount> {
        truncate::truncate_inode_blocks(&self.truncate_context(), inode_nids, from)
    }

    /// The checkpoint flush entry point (spec §4.2, §4.3): walks the dirty
    /// list in ascending-nid order, groups entries by leaf, and calls
    /// `recursive_flush_nat_pages` once per leaf, reusing the previous
    /// group's (possibly new) root address so later groups see already-COWed
    /// ancestors and mutate them in place rather than re-allocating.
    ///
    /// Returns the new root address (unchanged from the old root if there
    /// was nothing dirty to flush) and clears the dirty flag on every
    /// flushed nid.
    pub fn checkpoint(&self) -> NatResult<BlockAddr> {
        let _guard = self.checkpoint_lock.lock();

        let dirty = self.cache.snapshot_dirty();
        let old_root = self.checkpoint.nat_root();
        let height = self.checkpoint.nat_height();

        let mut cur_root = old_root;
        let mut flushed_nids = Vec::with_capacity(dirty.len());
        let mut entries = dirty.into_iter().peekable();

        while let Some(&(first_nid, _)) = entries.peek() {
            let blk_order = nvm::blk_order_of(first_nid);

            let leaf_addr = nvm::get_nat_page_by_order(&self.store, old_root, height, blk_order);
            let mut leaf_image = leaf_addr
                .map(|addr| self.store.read_nat_leaf(addr))
                .unwrap_or_else(crate::types::NatBlock::zeroed);

            while let Some(&(nid, raw)) = entries.peek() {
                if nvm::blk_order_of(nid) != blk_order {
                    break;
                }
                entries.next();
                *leaf_image.entry_mut(crate::types::offset_in_block(nid)) = raw;
                flushed_nids.push(nid);
            }

            if let Some(new_addr) = nvm::recursive_flush_nat_pages(
                &self.store,
                &self.allocator,
                old_root,
                cur_root,
                height,
                blk_order,
                &leaf_image,
            ) {
                cur_root = new_addr;
            }
        }

        if cur_root != old_root {
            self.checkpoint.set_nat_root(cur_root);
        }
        self.cache.mark_clean(flushed_nids);
        Ok(cur_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvm::MemNvm;
    use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    struct FakeAllocator(AtomicU64);
    impl SegmentAllocator for FakeAllocator {
        fn alloc_node_block(&self) -> Option<BlockAddr> {
            Some(BlockAddr::new(self.0.fetch_add(1, Ordering::Relaxed)))
        }
        fn invalidate_block(&self, _addr: BlockAddr) {}
    }

    struct FakeAccounting(AtomicU32);
    impl NodeAccounting for FakeAccounting {
        fn inc_valid_node_count(&self, count: u32) -> bool {
            self.0.fetch_add(count, Ordering::Relaxed);
            true
        }
        fn dec_valid_node_count(&self, count: u32) {
            self.0.fetch_sub(count, Ordering::Relaxed);
        }
        fn dec_valid_inode_count(&self) {}
    }

    struct FakeCheckpoint {
        root: StdSyncMutex<BlockAddr>,
        height: u32,
        version: u32,
    }

    impl CheckpointHandle for FakeCheckpoint {
        fn store_version(&self) -> u32 {
            self.version
        }
        fn nat_root(&self) -> BlockAddr {
            *self.root.lock().unwrap()
        }
        fn set_nat_root(&self, root: BlockAddr) {
            *self.root.lock().unwrap() = root;
        }
        fn nat_height(&self) -> u32 {
            self.height
        }
        fn valid_node_count(&self) -> u32 {
            0
        }
    }

    fn build_manager() -> NodeManager<MemNvm, FakeAllocator, FakeAccounting, FakeCheckpoint> {
        NodeManager::new(
            MemNvm::new(),
            FakeAllocator(AtomicU64::new(1)),
            FakeAccounting(AtomicU32::new(0)),
            FakeCheckpoint {
                root: StdSyncMutex::new(BlockAddr::NULL),
                height: 2,
                version: 1,
            },
            NatTreeConfig::reference(),
            64,
            16,
            Nid::new(crate::types::HMFS_ROOT_INO + 1),
        )
    }

    #[test]
    fn alloc_nid_then_get_new_node_observes_the_allocation() {
        let manager = build_manager();
        let nid = manager.alloc_nid().unwrap();
        let new_node = manager
            .get_new_node(Nid::new(2), nid, NodeRole::DirectNode, InodeFlags::empty())
            .unwrap();
        assert!(new_node.info.blk_addr.is_live());
        assert_eq!(manager.get_node_info(nid).unwrap().blk_addr, new_node.info.blk_addr);
    }

    #[test]
    fn truncate_node_then_get_node_reports_no_such_entry() {
        let manager = build_manager();
        let nid = manager.alloc_nid().unwrap();
        manager
            .get_new_node(Nid::new(2), nid, NodeRole::DirectNode, InodeFlags::empty())
            .unwrap();

        manager.truncate_node(nid).unwrap();
        let err = manager.get_node(nid).unwrap_err();
        assert_eq!(err, NatError::NoSuchEntry(nid));
    }

    #[test]
    fn checkpoint_with_nothing_dirty_keeps_the_same_root() {
        let manager = build_manager();
        let root = manager.checkpoint().unwrap();
        assert_eq!(root, BlockAddr::NULL);
    }

    #[test]
    fn checkpoint_flushes_distinct_leaves_and_marks_entries_clean() {
        let manager = build_manager();
        // Three nids landing in three distinct leaf blocks.
        let a = Nid::new(10);
        let b = Nid::new(10 + crate::types::NAT_ENTRY_PER_BLOCK as u32);
        let c = Nid::new(10 + 2 * crate::types::NAT_ENTRY_PER_BLOCK as u32);
        for nid in [a, b, c] {
            manager
                .get_new_node(Nid::new(2), nid, NodeRole::DirectNode, InodeFlags::empty())
                .unwrap();
        }

        let new_root = manager.checkpoint().unwrap();
        assert!(new_root.is_live());

        // Reading straight from NVM through the new root (bypassing the
        // cache) must show all three nids as live, each in its own leaf.
        let mut leaf_addrs = Vec::new();
        for nid in [a, b, c] {
            let leaf_addr = nvm::get_nat_page(&manager.store, new_root, manager.checkpoint.height, nid)
                .expect("leaf for a flushed nid must be reachable from the new root");
            let leaf = manager.store.read_nat_leaf(leaf_addr);
            let raw = leaf.entry(crate::types::offset_in_block(nid));
            assert!(raw.block_addr != crate::types::NULL_ADDR);
            leaf_addrs.push(leaf_addr);
        }
        assert_eq!(
            leaf_addrs.iter().collect::<std::collections::HashSet<_>>().len(),
            3,
            "each nid landed in a distinct leaf block"
        );
    }
}
