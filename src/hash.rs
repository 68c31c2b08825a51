//! hash256 and the keyed bucket-placement hashes (§4.1).
//!
//! The source mixes native-endian bytes of small integers into the hash in two
//! places. Per the design notes (spec §9) this implementation fixes both to
//! little-endian for cross-platform/cross-implementation interchange, rather
//! than silently matching native endianness.

use sha2::{Digest, Sha256};

pub const FRESH_BUCKETS: usize = 1024;
pub const USED_BUCKETS: usize = 256;

/// Double SHA-256 of the concatenation of every part.
pub fn hash256(parts: &[&[u8]]) -> [u8; 32] {
    let mut first = Sha256::new();
    for part in parts {
        first.input(part);
    }
    let first = first.result();
    let second = Sha256::digest(&first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

fn hash_u32_le(parts: &[&[u8]]) -> u32 {
    let h = hash256(parts);
    u32::from_le_bytes([h[0], h[1], h[2], h[3]])
}

/// §4.1: `h1 = H(key, group(addr), group(src)) mod 64; h2 = H(key, group(src),
/// h1_le); index = h2 mod 1024`.
pub fn fresh_bucket(key: &[u8; 32], addr_group: &[u8; 6], src_group: &[u8; 6]) -> usize {
    let h1 = hash_u32_le(&[key, addr_group, src_group]) % 64;
    let h2 = hash_u32_le(&[key, src_group, &h1.to_le_bytes()]);
    (h2 as usize) % FRESH_BUCKETS
}

/// §4.1: `h1 = H(key, addr.raw, addr.port_le) mod 8; h2 = H(key, group(addr),
/// h1_le); index = h2 mod 256`.
pub fn used_bucket(key: &[u8; 32], addr_raw: &[u8; 16], addr_port: u16, addr_group: &[u8; 6]) -> usize {
    let port_le = addr_port.to_le_bytes();
    let h1 = hash_u32_le(&[key, addr_raw, &port_le]) % 8;
    let h2 = hash_u32_le(&[key, addr_group, &h1.to_le_bytes()]);
    (h2 as usize) % USED_BUCKETS
}
