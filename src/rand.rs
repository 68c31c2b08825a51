//! The random-source collaborator (spec §1): a uniform-integer oracle plus a
//! 32-byte key source. Out of scope for the core algorithm, so it is modeled
//! as a trait an embedder can substitute in tests.

use rand::{thread_rng, Rng, RngCore};

pub trait RandSource {
    /// A fresh 32-byte bucket-selection key.
    fn key(&mut self) -> [u8; 32];

    /// A uniform integer in `[0, bound)`. Returns 0 when `bound == 0`.
    fn uniform(&mut self, bound: u64) -> u64;
}

/// Default [`RandSource`] backed by `rand::thread_rng()`.
#[derive(Debug, Default)]
pub struct ThreadRandSource;

impl RandSource for ThreadRandSource {
    fn key(&mut self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        thread_rng().fill_bytes(&mut buf);
        buf
    }

    fn uniform(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        thread_rng().gen_range(0, bound)
    }
}
