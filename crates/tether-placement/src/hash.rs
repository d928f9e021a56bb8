//! Ring position hashing.

use std::fmt::Display;

const FNV_PRIME: i32 = 16_777_619;
const FNV_OFFSET: u32 = 0x811c_9dc5;

/// Map a key to its ring position.
///
/// FNV1-32 over the UTF-16 code units of `key` in wrapping signed 32-bit
/// arithmetic, followed by a shift/add avalanche (13, 7, 3, 17, 5) and an
/// absolute value. The output is part of the routing contract: two routers
/// that disagree here send the same connection to different nodes.
pub fn ring_hash(key: &str) -> u32 {
    let mut hash = FNV_OFFSET as i32;
    for unit in key.encode_utf16() {
        hash = (hash ^ i32::from(unit)).wrapping_mul(FNV_PRIME);
    }

    hash = hash.wrapping_add(hash << 13);
    hash ^= hash >> 7;
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 17;
    hash = hash.wrapping_add(hash << 5);

    to_position(hash)
}

/// Absolute value of the mixed hash. i32::MIN has no positive counterpart
/// and lands on 2^31.
fn to_position(hash: i32) -> u32 {
    hash.unsigned_abs()
}

/// Hash input for virtual node `index` of `node_id`: `"<node_id>#<index>"`.
pub fn vnode_key(node_id: impl Display, index: u16) -> String {
    format!("{node_id}#{index}")
}

/// Hash input for a connection asking for a space: `"<identity>-<space>"`.
pub fn routing_key(identity: &str, space: impl Display) -> String {
    format!("{identity}-{space}")
}
