//! Configuration surface, shaped like the `connections` section of
//! `witnet_config::config::Config`: a plain, TOML-loadable settings struct
//! plus the seed-list collaborator `Open` pulls from (spec §4.10).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::net::NetAddress;

/// Temporary cap on how many seed-resolved addresses `Open` will add before
/// short-circuiting (spec §9 "Seed-resolution short-circuit").
pub const SEED_SHORT_CIRCUIT_CAP: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddrManConfig {
    /// TTL, in seconds, for entries in the ban list.
    pub ban_time_secs: i64,
    /// Services this node advertises about itself; stamped onto local entries.
    pub self_services: u64,
    /// Where `Flush`/`Open` read and write the persisted format, if anywhere.
    pub storage_path: Option<PathBuf>,
}

impl Default for AddrManConfig {
    fn default() -> Self {
        Self {
            ban_time_secs: 86_400,
            self_services: 0,
            storage_path: None,
        }
    }
}

/// The DNS-seed-resolution collaborator (spec §1, out of scope for the core).
pub trait SeedSource {
    fn seeds(&self) -> Vec<NetAddress>;
}

/// A network with no configured seed list, driving `Open`'s loopback fallback.
#[derive(Debug, Default)]
pub struct NoSeeds;

impl SeedSource for NoSeeds {
    fn seeds(&self) -> Vec<NetAddress> {
        Vec::new()
    }
}

/// A fixed list of addresses, for tests and for embedders that resolve DNS
/// seeds themselves before calling `Open`.
#[derive(Debug, Clone, Default)]
pub struct StaticSeeds(pub Vec<NetAddress>);

impl SeedSource for StaticSeeds {
    fn seeds(&self) -> Vec<NetAddress> {
        self.0.clone()
    }
}
