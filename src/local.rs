//! The local-address table (spec §3, §4.9): addresses this node can announce
//! about itself, ranked by reachability toward a requesting source and by a
//! manually incremented score.

use std::collections::HashMap;

use crate::net::{reachability, AddrKey, NetAddress};

#[derive(Debug)]
struct LocalEntry {
    addr: NetAddress,
    /// The local-address class this entry was registered under; fixed at
    /// `add_local` time to the caller's `score` argument, same as `score`
    /// starts out, but never touched by `mark_local` afterward.
    r#type: i32,
    score: i32,
}

#[derive(Debug)]
pub struct LocalAddresses {
    entries: HashMap<AddrKey, LocalEntry>,
    services: u64,
}

impl LocalAddresses {
    pub fn new(services: u64) -> Self {
        Self {
            entries: HashMap::new(),
            services,
        }
    }

    /// Rejects non-routable or already-known addresses.
    pub fn add_local(&mut self, mut addr: NetAddress, score: i32) -> bool {
        if !addr.is_routable() {
            return false;
        }
        let key = addr.key();
        if self.entries.contains_key(&key) {
            return false;
        }
        addr.services = self.services;
        self.entries.insert(
            key,
            LocalEntry {
                addr,
                r#type: score,
                score,
            },
        );
        true
    }

    pub fn mark_local(&mut self, addr: &NetAddress) -> bool {
        match self.entries.get_mut(&addr.key()) {
            Some(entry) => {
                entry.score += 1;
                true
            }
            None => false,
        }
    }

    pub fn has_local(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Picks the stored local address with the largest `(reachability toward
    /// src, score)` pair; with no `src`, picks the largest score. Stamps the
    /// winner's `time` to `now` on a hit.
    pub fn get_local(&mut self, src: Option<&NetAddress>, now: i64) -> Option<NetAddress> {
        let best_key = self
            .entries
            .values()
            .map(|entry| {
                let reach = src.map(|s| reachability(&entry.addr, s)).unwrap_or(0);
                (reach, entry.score, entry.addr.key())
            })
            .max_by_key(|(reach, score, _)| (*reach, *score))
            .map(|(_, _, key)| key)?;

        let entry = self.entries.get_mut(&best_key)?;
        entry.addr.time = now;
        Some(entry.addr.clone())
    }
}
