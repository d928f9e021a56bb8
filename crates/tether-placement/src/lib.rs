//! Consistent hashing for sticky connection routing.
//!
//! This crate holds the two ordered structures that share one 32-bit
//! position space:
//!
//! - [`HashRing`] maps positions to the nodes that own them. Each physical
//!   node contributes a fixed number of virtual nodes at
//!   `ring_hash("<node_id>#<index>")`.
//! - [`PlacementRing`] maps positions to the live connection placements
//!   recorded by the router, with a secondary index by connection id.
//!
//! Positions come from [`ring_hash`], an FNV1-32 variant whose output must
//! agree bit-for-bit with every other router instance.

mod hash;
mod placements;
mod ring;

pub use hash::{ring_hash, routing_key, vnode_key};
pub use placements::PlacementRing;
pub use ring::{HashRing, RingArc};
