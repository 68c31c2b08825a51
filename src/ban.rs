//! The ban list (spec §3, §4.8): a simple TTL store keyed by address with the
//! port zeroed out.

use std::collections::HashMap;

use crate::net::{AddrKey, NetAddress};

#[derive(Debug)]
pub struct BanList {
    bans: HashMap<AddrKey, NetAddress>,
    pub ban_time: i64,
}

fn ban_key(addr: &NetAddress) -> AddrKey {
    AddrKey {
        ip: addr.ip,
        port: 0,
    }
}

impl BanList {
    pub fn new(ban_time: i64) -> Self {
        Self {
            bans: HashMap::new(),
            ban_time,
        }
    }

    /// Duplicate inserts are ignored; the original ban record remains.
    pub fn ban(&mut self, addr: &NetAddress, now: i64) {
        let key = ban_key(addr);
        self.bans.entry(key).or_insert_with(|| {
            let mut cloned = addr.clone();
            cloned.port = 0;
            cloned.time = now;
            cloned
        });
    }

    pub fn unban(&mut self, addr: &NetAddress) {
        self.bans.remove(&ban_key(addr));
    }

    pub fn clear(&mut self) {
        self.bans.clear();
    }

    /// Lazily evicts the record if it has outlived `ban_time`.
    pub fn is_banned(&mut self, addr: &NetAddress, now: i64) -> bool {
        let key = ban_key(addr);
        let expired = self
            .bans
            .get(&key)
            .map(|record| now > record.time + self.ban_time)
            .unwrap_or(false);

        if expired {
            self.bans.remove(&key);
            return false;
        }
        self.bans.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}
