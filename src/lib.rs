//! Node Address Translation (NAT) subsystem for a copy-on-write,
//! NVM-resident filesystem.
//!
//! Maps a dense space of node identifiers ([`types::Nid`]) — one per inode
//! or indirect-block node — to the physical byte offsets of the nodes
//! inside a single persistent address space (a [`types::BlockAddr`]), and
//! supports the allocation, freeing, lookup, update, and durable
//! publication (checkpoint) of those mappings.
//!
//! The subsystem is organized into six cooperating components, leaves
//! first:
//!
//! - [`nid_path`] (C1) — nid arithmetic and node-path computation.
//! - [`nvm`] (C2) — the on-NVM radix tree: read path and copy-on-write
//!   flush path.
//! - [`cache`] (C3) — the in-memory write-back cache layered over C2.
//! - [`free_nid`] (C4) — the bounded free-nid pool and its allocator.
//! - [`node`] (C5) — node lookup and copy-on-write node allocation.
//! - [`truncate`] (C6) — the hierarchical inode truncation driver.
//!
//! [`manager::NodeManager`] ties all six together behind the external
//! interface a caller (VFS glue, checkpoint orchestration) actually needs;
//! [`external`] names the collaborators this crate treats as out of scope
//! (segment allocator, node/inode accounting, checkpoint descriptor).

pub mod cache;
pub mod config;
pub mod error;
pub mod external;
pub mod free_nid;
pub mod manager;
pub mod nid_path;
pub mod node;
pub mod nvm;
pub mod truncate;
pub mod types;

pub use config::NatTreeConfig;
pub use error::{NatError, NatResult};
pub use manager::{CheckpointHandle, NodeManager};
pub use types::{BlockAddr, Nid, NodeInfo, NodeRole};
