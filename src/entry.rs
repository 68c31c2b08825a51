//! The per-endpoint record (spec §3 "Entry").

use crate::net::NetAddress;

/// One known endpoint. Owned exclusively by the master index; fresh buckets
/// hold non-owning references counted by `ref_count`, the used bucket holds it
/// by intrusive membership (see `used_bucket` and the design notes in §9).
#[derive(Debug, Clone)]
pub struct AddrEntry {
    pub addr: NetAddress,
    /// The announcing peer's address. Immutable after creation; fresh-bucket
    /// placement is always computed from this field, not from whatever `src`
    /// a later `Add` call for the same endpoint happens to pass.
    pub src: NetAddress,
    pub used: bool,
    /// Number of fresh buckets this entry currently occupies, `0..=MAX_REFS`.
    pub ref_count: u8,
    pub attempts: i32,
    pub last_success: i64,
    pub last_attempt: i64,
    /// Which used bucket this entry lives in, when `used == true`. A safe
    /// alternative to scanning all used buckets for the owning one on removal
    /// (spec §9 design notes).
    pub used_bucket: Option<usize>,
}

impl AddrEntry {
    pub fn new(addr: NetAddress, src: NetAddress) -> Self {
        Self {
            addr,
            src,
            used: false,
            ref_count: 0,
            attempts: 0,
            last_success: 0,
            last_attempt: 0,
            used_bucket: None,
        }
    }
}
