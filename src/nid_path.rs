//! Nid arithmetic and node-path computation (spec §4.1, component C1).

use crate::{
    error::{NatError, NatResult},
    types::{ADDRS_PER_BLOCK, NIDS_PER_BLOCK, NORMAL_ADDRS_PER_INODE},
};

/// Sentinel `offset[0]` values marking "this is a child-node slot of the
/// inode", not a real data-block index. Sequential by convention, indexed
/// as `offset[0] - NODE_DIR1_BLOCK` to select `i_nid[..]`.
pub const NODE_DIR1_BLOCK: i64 = NORMAL_ADDRS_PER_INODE as i64 + 1;
pub const NODE_DIR2_BLOCK: i64 = NODE_DIR1_BLOCK + 1;
pub const NODE_IND1_BLOCK: i64 = NODE_DIR2_BLOCK + 1;
pub const NODE_IND2_BLOCK: i64 = NODE_IND1_BLOCK + 1;
pub const NODE_DIND_BLOCK: i64 = NODE_IND2_BLOCK + 1;

/// The traversal from an inode to the node covering a file-relative block
/// index, as produced by [`get_node_path`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePath {
    pub offset: [i64; 4],
    pub noffset: [u32; 4],
    pub level: usize,
}

impl NodePath {
    /// `offset[0]` dispatches which of the inode's five node-role slots
    /// (`i_nid[..]`) the rest of the path walks through. `None` when the
    /// target is one of the inode's own direct data addresses.
    #[must_use]
    pub fn dir_slot(&self) -> Option<usize> {
        if self.offset[0] < NODE_DIR1_BLOCK {
            None
        } else {
            #[allow(clippy::cast_sign_loss)]
            Some((self.offset[0] - NODE_DIR1_BLOCK) as usize)
        }
    }
}

/// Computes the traversal from the inode to the node covering `block`
/// (spec §4.1).
///
/// Overflow beyond the double-indirect range is a programming error at the
/// call site (a file offset that does not fit the tree); it is reported as
/// [`NatError::FileTooLarge`] rather than asserted, since the caller
/// supplies the offset and may be handling attacker-controlled input.
pub fn get_node_path(block: u64) -> NatResult<NodePath> {
    let direct_index = NORMAL_ADDRS_PER_INODE as u64;
    let direct_blks = ADDRS_PER_BLOCK as u64;
    let dptrs_per_blk = NIDS_PER_BLOCK as u64;
    let indirect_blks = direct_blks * dptrs_per_blk;

    let mut offset = [0i64; 4];
    let mut noffset = [0u32; 4];
    let mut block = block;

    if block < direct_index {
        offset[0] = block as i64;
        return Ok(NodePath {
            offset,
            noffset,
            level: 0,
        });
    }
    block -= direct_index;

    if block < direct_blks {
        offset[0] = NODE_DIR1_BLOCK;
        noffset[1] = 1;
        offset[1] = block as i64;
        return Ok(NodePath {
            offset,
            noffset,
            level: 1,
        });
    }
    block -= direct_blks;

    if block < direct_blks {
        offset[0] = NODE_DIR2_BLOCK;
        noffset[1] = 2;
        offset[1] = block as i64;
        return Ok(NodePath {
            offset,
            noffset,
            level: 1,
        });
    }
    block -= direct_blks;

    if block < indirect_blks {
        offset[0] = NODE_IND1_BLOCK;
        noffset[1] = 3;
        offset[1] = (block / dptrs_per_blk) as i64;
        #[allow(clippy::cast_possible_truncation)]
        {
            noffset[2] = 4 + offset[1] as u32;
        }
        offset[2] = (block % dptrs_per_blk) as i64;
        return Ok(NodePath {
            offset,
            noffset,
            level: 2,
        });
    }
    block -= indirect_blks;

    if block < indirect_blks {
        offset[0] = NODE_IND2_BLOCK;
        #[allow(clippy::cast_possible_truncation)]
        let base = 4 + dptrs_per_blk as u32;
        noffset[1] = base;
        offset[1] = (block / dptrs_per_blk) as i64;
        #[allow(clippy::cast_possible_truncation)]
        {
            noffset[2] = 1 + base + offset[1] as u32;
        }
        offset[2] = (block % dptrs_per_blk) as i64;
        return Ok(NodePath {
            offset,
            noffset,
            level: 2,
        });
    }
    block -= indirect_blks;

    let dindirect_blks = dptrs_per_blk * indirect_blks;
    if block < dindirect_blks {
        offset[0] = NODE_DIND_BLOCK;
        #[allow(clippy::cast_possible_truncation)]
        let base = 5 + dptrs_per_blk as u32 * 2;
        noffset[1] = base;
        offset[1] = (block / indirect_blks) as i64;
        #[allow(clippy::cast_possible_truncation)]
        let stride = dptrs_per_blk as u32 + 1;
        #[allow(clippy::cast_possible_truncation)]
        {
            noffset[2] = 1 + base + offset[1] as u32 * stride;
        }
        offset[2] = ((block / dptrs_per_blk) % dptrs_per_blk) as i64;
        #[allow(clippy::cast_possible_truncation)]
        {
            noffset[3] = noffset[2] + 1 + offset[2] as u32;
        }
        offset[3] = (block % dptrs_per_blk) as i64;
        return Ok(NodePath {
            offset,
            noffset,
            level: 3,
        });
    }

    Err(NatError::FileTooLarge(block))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_block_zero_is_level_zero() {
        let path = get_node_path(0).unwrap();
        assert_eq!(path.level, 0);
        assert_eq!(path.offset[0], 0);
    }

    #[test]
    fn first_single_indirect_slot_is_level_one() {
        let path = get_node_path(NORMAL_ADDRS_PER_INODE as u64).unwrap();
        assert_eq!(path.level, 1);
        assert_eq!(path.offset[0], NODE_DIR1_BLOCK);
        assert_eq!(path.offset[1], 0);
        assert_eq!(path.noffset[1], 1);
    }

    #[test]
    fn second_direct_node_slot_is_level_one() {
        // The second direct-node range starts right after the first one
        // (`ADDRS_PER_BLOCK` data blocks in), not after a full indirect
        // range's worth of blocks.
        let block = NORMAL_ADDRS_PER_INODE as u64 + ADDRS_PER_BLOCK as u64;
        let path = get_node_path(block).unwrap();
        assert_eq!(path.level, 1);
        assert_eq!(path.offset[0], NODE_DIR2_BLOCK);
        assert_eq!(path.offset[1], 0);
    }

    #[test]
    fn second_double_indirect_entry_is_level_two() {
        let block = NORMAL_ADDRS_PER_INODE as u64
            + 2 * NIDS_PER_BLOCK as u64
            + NIDS_PER_BLOCK as u64 * NIDS_PER_BLOCK as u64;
        let path = get_node_path(block).unwrap();
        assert_eq!(path.level, 2);
        assert_eq!(path.offset[0], NODE_IND2_BLOCK);
        assert_eq!(path.offset[1], 0);
        assert_eq!(path.offset[2], 0);
    }

    #[test]
    fn path_reconstructs_the_original_block_index() {
        for block in [
            0,
            1,
            NORMAL_ADDRS_PER_INODE as u64 - 1,
            NORMAL_ADDRS_PER_INODE as u64,
            NORMAL_ADDRS_PER_INODE as u64 + ADDRS_PER_BLOCK as u64 * 2 + 5,
        ] {
            let path = get_node_path(block).unwrap();
            let reconstructed = reconstruct(&path);
            assert_eq!(reconstructed, block, "block={block}");
        }
    }

    /// Inverse of [`get_node_path`] for the property test above: rebuilds
    /// the linear file-block index from `(offset, level)`.
    fn reconstruct(path: &NodePath) -> u64 {
        let direct_index = NORMAL_ADDRS_PER_INODE as u64;
        let direct_blks = ADDRS_PER_BLOCK as u64;
        let dptrs_per_blk = NIDS_PER_BLOCK as u64;
        let indirect_blks = direct_blks * dptrs_per_blk;

        match path.level {
            0 => path.offset[0] as u64,
            1 if path.offset[0] == NODE_DIR1_BLOCK => direct_index + path.offset[1] as u64,
            1 if path.offset[0] == NODE_DIR2_BLOCK => {
                direct_index + direct_blks + path.offset[1] as u64
            }
            2 if path.offset[0] == NODE_IND1_BLOCK => {
                direct_index
                    + direct_blks * 2
                    + path.offset[1] as u64 * dptrs_per_blk
                    + path.offset[2] as u64
            }
            2 if path.offset[0] == NODE_IND2_BLOCK => {
                direct_index
                    + direct_blks * 2
                    + indirect_blks
                    + path.offset[1] as u64 * dptrs_per_blk
                    + path.offset[2] as u64
            }
            3 => {
                direct_index
                    + direct_blks * 2
                    + indirect_blks * 2
                    + path.offset[1] as u64 * indirect_blks
                    + path.offset[2] as u64 * dptrs_per_blk
                    + path.offset[3] as u64
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn block_beyond_double_indirect_range_is_rejected() {
        let dindirect = NORMAL_ADDRS_PER_INODE as u64
            + 2 * ADDRS_PER_BLOCK as u64
            + 2 * ADDRS_PER_BLOCK as u64 * NIDS_PER_BLOCK as u64
            + NIDS_PER_BLOCK as u64 * ADDRS_PER_BLOCK as u64 * NIDS_PER_BLOCK as u64;
        assert!(get_node_path(dindirect).is_err());
    }
}
