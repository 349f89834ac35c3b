//! Free-nid pool: allocator for fresh node ids (spec §4.4, component C4).

use std::sync::{Mutex, RwLock};

use crate::cache::NatJournal;
use crate::nvm::{get_nat_page, NvmPageStore};
use crate::types::{offset_in_block, BlockAddr, Nid, FREE_ADDR, HMFS_ROOT_INO, NULL_ADDR};

/// Where a free-nid slot's nid value came from (spec §3, `FreeNidSlot`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeNidOrigin {
    /// Discovered by scanning a NAT leaf for a tombstoned record.
    Scan,
    /// Returned to the pool by `alloc_nid_failed`, or recycled from a
    /// free-tagged journal slot.
    Recycle,
}

/// A candidate nid plus the reason it is believed free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeNidSlot {
    pub nid: Nid,
    pub origin: FreeNidOrigin,
}

impl FreeNidSlot {
    #[must_use]
    pub const fn make_free_nid(nid: Nid, origin: FreeNidOrigin) -> Self {
        Self { nid, origin }
    }
}

struct PoolState {
    slots: Vec<FreeNidSlot>,
}

/// Fixed-capacity stack of free nids plus the scan cursor used to refill it.
///
/// `free_nid_list_lock` (here, a single mutex over the stack) and
/// `build_lock` (serializing `build_free_nids`) are kept as two distinct
/// locks per spec §5's ordering rule `build_lock` → `free_nid_list_lock`,
/// even though a simpler design could fold them into one: a caller blocked
/// waiting to rebuild must never also block an unrelated `alloc_nid` for
/// the whole rebuild duration's non-mutating phases.
pub struct FreeNidPool {
    capacity: usize,
    state: Mutex<PoolState>,
    build_lock: Mutex<()>,
    next_scan_nid: RwLock<Nid>,
}

impl FreeNidPool {
    #[must_use]
    pub fn new(capacity: usize, first_scan_nid: Nid) -> Self {
        Self {
            capacity,
            state: Mutex::new(PoolState { slots: Vec::new() }),
            build_lock: Mutex::new(()),
            next_scan_nid: RwLock::new(first_scan_nid),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("free_nid_list_lock poisoned").slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `alloc_nid`: pops the next candidate, or `None` if the pool is empty
    /// and the caller must rebuild it first (spec §4.4).
    pub fn alloc_nid(&self) -> Option<Nid> {
        self.state
            .lock()
            .expect("free_nid_list_lock poisoned")
            .slots
            .pop()
            .map(|slot| slot.nid)
    }

    /// `alloc_nid_failed`: the caller could not actually use `nid` (its
    /// inode/node accounting budget rejected it, say); pushes it back
    /// tagged [`FreeNidOrigin::Recycle`] so it is handed out again ahead of
    /// unscanned nids (spec §8, testable property: the slot produced here
    /// equals `make_free_nid(nid, 1)`, i.e. the recycle-origin tag).
    pub fn alloc_nid_failed(&self, nid: Nid) {
        let mut state = self.state.lock().expect("free_nid_list_lock poisoned");
        if state.slots.len() < self.capacity {
            state
                .slots
                .push(FreeNidSlot::make_free_nid(nid, FreeNidOrigin::Recycle));
        }
    }

    /// `build_free_nids`: serialized by `build_lock`; recycles free-tagged
    /// journal slots first, then scans forward through NAT leaves from the
    /// saved cursor until the pool is full or `max_nid` is reached (spec
    /// §4.4). Returns the number of slots added.
    ///
    /// Scanning does not wrap back to the start once `max_nid` is reached —
    /// the next checkpoint's `hmfs_max_nid()` recomputation naturally grows
    /// the ceiling, and a caller that needs to reclaim below the original
    /// cursor again can reset it explicitly.
    pub fn build_free_nids<S: NvmPageStore + ?Sized>(
        &self,
        journal: &NatJournal,
        store: &S,
        root: BlockAddr,
        height: u32,
        max_nid: u32,
    ) -> usize {
        let _build = self.build_lock.lock().expect("build_lock poisoned");
        let mut state = self.state.lock().expect("free_nid_list_lock poisoned");
        let before = state.slots.len();

        journal.recycle_free_slots(HMFS_ROOT_INO, |nid| {
            if state.slots.len() < self.capacity {
                state
                    .slots
                    .push(FreeNidSlot::make_free_nid(nid, FreeNidOrigin::Recycle));
            }
        });

        let mut scan_nid = *self.next_scan_nid.read().expect("scan cursor poisoned");
        while state.slots.len() < self.capacity && scan_nid.value() < max_nid {
            if scan_nid.value() > HMFS_ROOT_INO && is_candidate_free(store, root, height, scan_nid)
            {
                state
                    .slots
                    .push(FreeNidSlot::make_free_nid(scan_nid, FreeNidOrigin::Scan));
            }
            scan_nid = Nid::new(scan_nid.value() + 1);
        }
        *self.next_scan_nid.write().expect("scan cursor poisoned") = scan_nid;

        state.slots.len() - before
    }
}

fn is_candidate_free<S: NvmPageStore + ?Sized>(
    store: &S,
    root: BlockAddr,
    height: u32,
    nid: Nid,
) -> bool {
    match get_nat_page(store, root, height, nid) {
        None => true,
        Some(addr) => {
            let leaf = store.read_nat_leaf(addr);
            let raw = leaf.entry(offset_in_block(nid));
            matches!(raw.block_addr, NULL_ADDR | FREE_ADDR)
        }
    }
}
