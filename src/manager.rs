//! The address manager core: the dual fresh/used bucket structure, placement,
//! eviction, promotion, selection and (de)serialization. See spec §3 and §4.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ban::BanList;
use crate::config::{AddrManConfig, SeedSource, SEED_SHORT_CIRCUIT_CAP};
use crate::entry::AddrEntry;
use crate::error::AddrManError;
use crate::hash::{self, FRESH_BUCKETS, USED_BUCKETS};
use crate::local::LocalAddresses;
use crate::net::{AddrKey, Network, NetAddress};
use crate::rand::{RandSource, ThreadRandSource};
use crate::serialize::{read_addr_key, read_varint, write_addr_key, write_varint};
use crate::time::{SystemTimeSource, TimeSource};

/// Entries per fresh or used bucket (spec §3, §4).
pub const MAX_ENTRIES: usize = 64;
/// Fresh buckets a single entry may occupy at once (spec §3).
pub const MAX_REFS: u8 = 8;

const HORIZON_DAYS: i64 = 30;
const MIN_FAIL_DAYS: i64 = 7;
const MAX_FAILURES: i32 = 10;
const MAX_RETRIES: i32 = 3;
const PERSISTED_VERSION: u32 = 0;

/// Safety net for `Select`'s rejection sampler (spec §9 design notes): the
/// loop is statistically certain to terminate in a handful of iterations, but
/// a reimplementation should cap it defensively rather than trust that alone.
const MAX_SELECT_ITERATIONS: u32 = 100_000;

fn is_stale(entry: &AddrEntry, now: i64) -> bool {
    if entry.last_attempt >= now - 60 {
        return false;
    }
    if entry.addr.time > now + 600 {
        return true;
    }
    if entry.addr.time == 0 {
        return true;
    }
    if now - entry.addr.time > HORIZON_DAYS * 86_400 {
        return true;
    }
    if entry.last_success == 0 && entry.attempts >= MAX_RETRIES {
        return true;
    }
    if now - entry.last_success > MIN_FAIL_DAYS * 86_400 && entry.attempts >= MAX_FAILURES {
        return true;
    }
    false
}

fn chance(entry: &AddrEntry, now: i64) -> f64 {
    let attempts = entry.attempts.clamp(0, 8);
    let base = 0.66f64.powi(attempts);
    if now - entry.last_attempt < 600 {
        base * 0.01
    } else {
        base
    }
}

/// The dual stochastic hash-table peer address store (spec §3/§4).
pub struct AddrMan {
    network: Network,
    key: [u8; 32],
    master: HashMap<AddrKey, AddrEntry>,
    fresh: Vec<HashSet<AddrKey>>,
    used: Vec<Vec<AddrKey>>,
    total_fresh: u32,
    total_used: u32,
    bans: BanList,
    locals: LocalAddresses,
    dirty: bool,
    file_path: Option<PathBuf>,
    config: AddrManConfig,
    rand: Box<dyn RandSource>,
    time: Box<dyn TimeSource>,
}

impl AddrMan {
    pub fn new(network: Network, config: AddrManConfig) -> Self {
        Self::with_sources(
            network,
            config,
            Box::new(ThreadRandSource),
            Box::new(SystemTimeSource),
        )
    }

    /// Construct with substitutable random/time collaborators, for
    /// deterministic tests.
    pub fn with_sources(
        network: Network,
        config: AddrManConfig,
        mut rand: Box<dyn RandSource>,
        time: Box<dyn TimeSource>,
    ) -> Self {
        let key = rand.key();
        let ban_time = config.ban_time_secs;
        let self_services = config.self_services;
        let file_path = config.storage_path.clone();
        Self {
            network,
            key,
            master: HashMap::new(),
            fresh: vec![HashSet::new(); FRESH_BUCKETS],
            used: vec![Vec::new(); USED_BUCKETS],
            total_fresh: 0,
            total_used: 0,
            bans: BanList::new(ban_time),
            locals: LocalAddresses::new(self_services),
            dirty: false,
            file_path,
            config,
            rand,
            time,
        }
    }

    // -- configuration setters (spec §6) ---------------------------------

    pub fn set_ban_time(&mut self, secs: i64) {
        self.config.ban_time_secs = secs;
        self.bans.ban_time = secs;
    }

    pub fn set_self_services(&mut self, services: u64) {
        self.config.self_services = services;
    }

    pub fn set_time_source(&mut self, time: Box<dyn TimeSource>) {
        self.time = time;
    }

    // -- queries (spec §6) ------------------------------------------------

    pub fn total(&self) -> u32 {
        self.total_fresh + self.total_used
    }

    pub fn total_fresh(&self) -> u32 {
        self.total_fresh
    }

    pub fn total_used(&self) -> u32 {
        self.total_used
    }

    pub fn is_full(&self) -> bool {
        self.total_fresh as usize >= FRESH_BUCKETS * MAX_ENTRIES
    }

    pub fn size(&self) -> usize {
        self.export().len()
    }

    pub fn get_entry(&self, addr: &NetAddress) -> Option<&AddrEntry> {
        self.master.get(&addr.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddrEntry> {
        self.master.values()
    }

    pub fn fresh_bucket_of(&self, addr: &NetAddress, src: &NetAddress) -> usize {
        hash::fresh_bucket(&self.key, &addr.group(), &src.group())
    }

    pub fn used_bucket_of(&self, addr: &NetAddress) -> usize {
        hash::used_bucket(&self.key, &addr.ip, addr.port, &addr.group())
    }

    // -- mutations (spec §4.2 Add) -----------------------------------------

    /// Announces `addr` from `src` (or, if `src` is `None`, self-announced
    /// with no recency penalty). Returns `true` if the entry ended up
    /// (re)placed into a fresh bucket by this call.
    pub fn add(&mut self, addr: NetAddress, src: Option<NetAddress>) -> bool {
        assert_ne!(addr.port, 0, "addrman: add() called with a zero port");

        let self_announced = src.is_none();
        let src = src.unwrap_or_else(|| addr.clone());
        let now = self.time.now();
        let key = addr.key();

        if self.master.contains_key(&key) {
            let should_grow = {
                let entry = self.master.get_mut(&key).expect("checked above");
                entry.addr.services |= addr.services;

                let interval = if now - addr.time < 86_400 { 3_600 } else { 86_400 };
                let penalty = if self_announced { 0 } else { 7_200 };
                if entry.addr.time < addr.time - interval - penalty {
                    entry.addr.time = addr.time;
                    self.dirty = true;
                }

                if addr.time <= entry.addr.time || entry.used || entry.ref_count >= MAX_REFS {
                    false
                } else {
                    let factor = 1u64 << entry.ref_count;
                    self.rand.uniform(factor) == 0
                }
            };

            if !should_grow {
                return false;
            }
            log::trace!("addrman: stochastic reference growth for an existing entry");
            return self.place_in_fresh(&key);
        }

        let mut stored_addr = addr;
        if stored_addr.time <= 100_000_000 || stored_addr.time > now + 600 {
            stored_addr.time = now - 5 * 86_400;
        }
        self.master.insert(key, AddrEntry::new(stored_addr, src));
        self.total_fresh += 1;
        log::trace!("addrman: inserted a new entry into the master index");
        self.place_in_fresh(&key)
    }

    fn place_in_fresh(&mut self, key: &AddrKey) -> bool {
        let (addr_group, src_group) = {
            let entry = self
                .master
                .get(key)
                .expect("place_in_fresh called on a tracked entry");
            (entry.addr.group(), entry.src.group())
        };
        let bucket = hash::fresh_bucket(&self.key, &addr_group, &src_group);

        if self.fresh[bucket].contains(key) {
            return false;
        }
        if self.fresh[bucket].len() >= MAX_ENTRIES {
            self.evict_fresh(bucket);
        }
        self.fresh[bucket].insert(*key);
        let entry = self.master.get_mut(key).expect("entry still tracked");
        entry.ref_count += 1;
        self.dirty = true;
        true
    }

    /// §4.3: prune stale entries from `bucket`, then evict the oldest
    /// remaining one if any slot still needs freeing.
    fn evict_fresh(&mut self, bucket: usize) {
        let now = self.time.now();
        let keys: Vec<AddrKey> = self.fresh[bucket].iter().copied().collect();
        let mut oldest: Option<AddrKey> = None;
        let mut oldest_time = i64::MAX;

        for key in keys {
            let stale = is_stale(
                self.master
                    .get(&key)
                    .expect("fresh bucket must reference a live entry"),
                now,
            );
            if stale {
                self.drop_fresh_ref(bucket, &key);
            } else {
                let entry_time = self.master[&key].addr.time;
                if entry_time < oldest_time {
                    oldest_time = entry_time;
                    oldest = Some(key);
                }
            }
        }

        if let Some(key) = oldest {
            self.drop_fresh_ref(bucket, &key);
        }
    }

    fn drop_fresh_ref(&mut self, bucket: usize, key: &AddrKey) {
        self.fresh[bucket].remove(key);
        let delete = {
            let entry = self
                .master
                .get_mut(key)
                .expect("ref drop on a tracked entry");
            assert!(entry.ref_count > 0, "addrman: ref_count underflow");
            entry.ref_count -= 1;
            entry.ref_count == 0
        };
        if delete {
            self.master.remove(key);
            self.total_fresh -= 1;
        }
    }

    // -- promotion (spec §4.4 MarkAck) -------------------------------------

    /// Promotes `addr` from fresh to used, demoting the used bucket's oldest
    /// occupant back into fresh if the target bucket is already full.
    pub fn mark_ack(&mut self, addr: &NetAddress, services: u64) {
        let key = addr.key();
        let now = self.time.now();

        let already_used = match self.master.get_mut(&key) {
            Some(entry) => {
                entry.addr.services |= services;
                entry.last_success = now;
                entry.last_attempt = now;
                entry.attempts = 0;
                self.dirty = true;
                entry.used
            }
            None => return,
        };
        if already_used {
            return;
        }

        let mut last_fresh_bucket = None;
        for bucket in 0..FRESH_BUCKETS {
            if self.fresh[bucket].remove(&key) {
                let entry = self.master.get_mut(&key).expect("entry still tracked");
                entry.ref_count -= 1;
                last_fresh_bucket = Some(bucket);
            }
        }
        assert_eq!(
            self.master[&key].ref_count, 0,
            "addrman: ref_count must be zero after leaving every fresh bucket"
        );
        self.total_fresh -= 1;

        let used_idx = {
            let entry = &self.master[&key];
            hash::used_bucket(&self.key, &entry.addr.ip, entry.addr.port, &entry.addr.group())
        };

        if self.used[used_idx].len() < MAX_ENTRIES {
            self.used[used_idx].push(key);
            let entry = self.master.get_mut(&key).expect("entry still tracked");
            entry.used = true;
            entry.used_bucket = Some(used_idx);
            self.total_used += 1;
            return;
        }

        let evicted_key = self.used[used_idx]
            .iter()
            .min_by_key(|k| self.master[*k].addr.time)
            .copied()
            .expect("a full used bucket cannot be empty");

        let evicted_fresh_bucket = {
            let evicted = &self.master[&evicted_key];
            hash::fresh_bucket(&self.key, &evicted.addr.group(), &evicted.src.group())
        };
        let target_fresh_bucket = if self.fresh[evicted_fresh_bucket].len() >= MAX_ENTRIES {
            last_fresh_bucket.expect("demotion requires a fallback fresh bucket")
        } else {
            evicted_fresh_bucket
        };

        let pos = self.used[used_idx]
            .iter()
            .position(|k| *k == evicted_key)
            .expect("evicted key is a member of this used bucket");
        self.used[used_idx][pos] = key;

        {
            let entry = self.master.get_mut(&key).expect("entry still tracked");
            entry.used = true;
            entry.used_bucket = Some(used_idx);
        }

        self.fresh[target_fresh_bucket].insert(evicted_key);
        {
            let evicted = self
                .master
                .get_mut(&evicted_key)
                .expect("evicted entry still tracked");
            evicted.used = false;
            evicted.used_bucket = None;
            evicted.ref_count = 1;
        }
        self.total_fresh += 1;
        log::trace!("addrman: used-bucket overflow demoted an entry back into fresh");
    }

    pub fn mark_attempt(&mut self, addr: &NetAddress) {
        let now = self.time.now();
        if let Some(entry) = self.master.get_mut(&addr.key()) {
            entry.attempts += 1;
            entry.last_attempt = now;
            self.dirty = true;
        }
    }

    pub fn mark_success(&mut self, addr: &NetAddress) {
        let now = self.time.now();
        if let Some(entry) = self.master.get_mut(&addr.key()) {
            if now - entry.addr.time > 20 * 60 {
                entry.addr.time = now;
                self.dirty = true;
            }
        }
    }

    // -- selection (spec §4.6) ---------------------------------------------

    /// Rejection-samples a candidate entry, biased toward low recent-failure
    /// weight. Returns `None` only when the manager is empty.
    pub fn select(&mut self) -> Option<&AddrEntry> {
        let key = self.select_key()?;
        self.master.get(&key)
    }

    fn select_key(&mut self) -> Option<AddrKey> {
        if self.total_fresh == 0 && self.total_used == 0 {
            return None;
        }
        let now = self.time.now();
        let use_fresh = if self.total_used == 0 {
            true
        } else if self.total_fresh == 0 {
            false
        } else {
            self.rand.uniform(2) == 0
        };

        let mut factor = 1.0f64;
        let mut last_seen = None;
        for _ in 0..MAX_SELECT_ITERATIONS {
            let candidate = if use_fresh {
                self.pick_fresh_candidate()
            } else {
                self.pick_used_candidate()
            };
            let key = match candidate {
                Some(k) => k,
                None => continue,
            };
            last_seen = Some(key);
            let c = chance(&self.master[&key], now);
            let r = self.rand.uniform(1u64 << 30) as f64;
            if r < factor * c * (1u64 << 30) as f64 {
                return Some(key);
            }
            factor *= 1.2;
        }
        log::warn!("addrman: select() exceeded its iteration cap, returning the last sampled candidate");
        last_seen
    }

    fn pick_fresh_candidate(&mut self) -> Option<AddrKey> {
        let bucket = self.rand.uniform(FRESH_BUCKETS as u64) as usize;
        let b = &self.fresh[bucket];
        if b.is_empty() {
            return None;
        }
        let idx = self.rand.uniform(b.len() as u64) as usize;
        b.iter().nth(idx).copied()
    }

    fn pick_used_candidate(&mut self) -> Option<AddrKey> {
        let bucket = self.rand.uniform(USED_BUCKETS as u64) as usize;
        let b = &self.used[bucket];
        if b.is_empty() {
            return None;
        }
        let idx = self.rand.uniform(b.len() as u64) as usize;
        b.get(idx).copied()
    }

    // -- removal (spec §4.7) -------------------------------------------------

    pub fn remove(&mut self, addr: &NetAddress) -> bool {
        let key = addr.key();
        if !self.master.contains_key(&key) {
            return false;
        }

        let used = self.master[&key].used;
        if used {
            let bucket = self.master[&key]
                .used_bucket
                .expect("a used entry must record its bucket");
            self.used[bucket].retain(|k| *k != key);
            self.total_used -= 1;
        } else {
            for bucket in 0..FRESH_BUCKETS {
                if self.fresh[bucket].remove(&key) {
                    let entry = self.master.get_mut(&key).expect("entry still tracked");
                    entry.ref_count -= 1;
                }
            }
            assert_eq!(
                self.master[&key].ref_count, 0,
                "addrman: ref_count must reach zero after leaving every fresh bucket"
            );
            self.total_fresh -= 1;
        }

        self.master.remove(&key);
        self.dirty = true;
        true
    }

    // -- bans (spec §4.8) -----------------------------------------------------

    pub fn ban(&mut self, addr: &NetAddress) {
        let now = self.time.now();
        self.bans.ban(addr, now);
    }

    pub fn unban(&mut self, addr: &NetAddress) {
        self.bans.unban(addr);
    }

    pub fn clear_banned(&mut self) {
        self.bans.clear();
    }

    pub fn is_banned(&mut self, addr: &NetAddress) -> bool {
        let now = self.time.now();
        self.bans.is_banned(addr, now)
    }

    // -- local addresses (spec §4.9) ------------------------------------------

    pub fn add_local(&mut self, addr: NetAddress, score: i32) -> bool {
        self.locals.add_local(addr, score)
    }

    pub fn mark_local(&mut self, addr: &NetAddress) -> bool {
        self.locals.mark_local(addr)
    }

    pub fn has_local(&self) -> bool {
        self.locals.has_local()
    }

    pub fn get_local(&mut self, src: Option<&NetAddress>) -> Option<NetAddress> {
        let now = self.time.now();
        self.locals.get_local(src, now)
    }

    // -- lifecycle (spec §4.10) ------------------------------------------------

    /// Loads the persisted file at `path` if given and valid; otherwise seeds
    /// from `seeds` (or a single loopback self-entry if the seed list is
    /// empty). Returns `true` iff the manager ends up non-empty.
    pub fn open(&mut self, path: Option<PathBuf>, seeds: &dyn SeedSource) -> bool {
        if let Some(ref p) = path {
            if let Ok(bytes) = fs::read(p) {
                if self.import(&bytes).is_ok() {
                    self.file_path = Some(p.clone());
                    return self.total() > 0;
                }
            }
        }
        self.file_path = path;

        let seed_list = seeds.seeds();
        if seed_list.is_empty() {
            self.add(NetAddress::loopback(), None);
        } else {
            for seed in seed_list {
                self.add(seed, None);
                if self.master.len() >= SEED_SHORT_CIRCUIT_CAP {
                    break;
                }
            }
        }
        self.total() > 0
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        if self.dirty {
            if let Some(path) = self.file_path.clone() {
                let data = self.export();
                fs::write(path, data)?;
                self.dirty = false;
            }
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.master.clear();
        self.fresh = vec![HashSet::new(); FRESH_BUCKETS];
        self.used = vec![Vec::new(); USED_BUCKETS];
        self.total_fresh = 0;
        self.total_used = 0;
        self.key = self.rand.key();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // -- serialization (spec §6 persisted format) -------------------------------

    pub fn export(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(PERSISTED_VERSION)
            .expect("writing to a Vec cannot fail");
        buf.write_u32::<LittleEndian>(self.network.magic())
            .expect("writing to a Vec cannot fail");
        buf.extend_from_slice(&self.key);

        write_varint(&mut buf, self.master.len() as u64).expect("writing to a Vec cannot fail");
        for entry in self.master.values() {
            write_addr_key(&mut buf, &entry.addr.key()).expect("writing to a Vec cannot fail");
            buf.write_u64::<LittleEndian>(entry.addr.services)
                .expect("writing to a Vec cannot fail");
            buf.write_i64::<LittleEndian>(entry.addr.time)
                .expect("writing to a Vec cannot fail");
            write_addr_key(&mut buf, &entry.src.key()).expect("writing to a Vec cannot fail");
            buf.write_i32::<LittleEndian>(entry.attempts)
                .expect("writing to a Vec cannot fail");
            buf.write_i64::<LittleEndian>(entry.last_success)
                .expect("writing to a Vec cannot fail");
            buf.write_i64::<LittleEndian>(entry.last_attempt)
                .expect("writing to a Vec cannot fail");
        }

        for bucket in &self.fresh {
            write_varint(&mut buf, bucket.len() as u64).expect("writing to a Vec cannot fail");
            for key in bucket {
                write_addr_key(&mut buf, key).expect("writing to a Vec cannot fail");
            }
        }
        for bucket in &self.used {
            write_varint(&mut buf, bucket.len() as u64).expect("writing to a Vec cannot fail");
            for key in bucket {
                write_addr_key(&mut buf, key).expect("writing to a Vec cannot fail");
            }
        }

        buf
    }

    /// Any failure resets the whole manager as a side effect (spec §7), so the
    /// caller can fall back to seeds.
    pub fn import(&mut self, buf: &[u8]) -> Result<(), AddrManError> {
        match self.try_import(buf) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reset();
                self.dirty = false;
                Err(e)
            }
        }
    }

    fn try_import(&mut self, buf: &[u8]) -> Result<(), AddrManError> {
        let mut cursor = Cursor::new(buf);

        let version = cursor.read_u32::<LittleEndian>()?;
        if version != PERSISTED_VERSION {
            return Err(AddrManError::BadImportVersion(version));
        }
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != self.network.magic() {
            return Err(AddrManError::BadImportMagic {
                expected: self.network.magic(),
                found: magic,
            });
        }
        let mut key = [0u8; 32];
        cursor.read_exact(&mut key)?;

        let now = self.time.now();
        let n = read_varint(&mut cursor)?;
        let mut master = HashMap::with_capacity(n as usize);
        for _ in 0..n {
            let addr_key = read_addr_key(&mut cursor)?;
            let services = cursor.read_u64::<LittleEndian>()?;
            let time = cursor.read_i64::<LittleEndian>()?;
            let src_key = read_addr_key(&mut cursor)?;
            let attempts = cursor.read_i32::<LittleEndian>()?;
            let last_success = cursor.read_i64::<LittleEndian>()?;
            let last_attempt = cursor.read_i64::<LittleEndian>()?;

            let addr = NetAddress {
                ip: addr_key.ip,
                port: addr_key.port,
                services,
                time,
            };
            let src = NetAddress {
                ip: src_key.ip,
                port: src_key.port,
                services: self.config.self_services,
                time: now,
            };
            let mut entry = AddrEntry::new(addr, src);
            entry.attempts = attempts;
            entry.last_success = last_success;
            entry.last_attempt = last_attempt;
            master.insert(addr_key, entry);
        }

        let mut fresh: Vec<HashSet<AddrKey>> = vec![HashSet::new(); FRESH_BUCKETS];
        for bucket in fresh.iter_mut() {
            let l = read_varint(&mut cursor)?;
            for _ in 0..l {
                let k = read_addr_key(&mut cursor)?;
                let entry = master.get_mut(&k).ok_or(AddrManError::BadImportBucket)?;
                entry.ref_count += 1;
                bucket.insert(k);
            }
            if bucket.len() > MAX_ENTRIES {
                return Err(AddrManError::BadImportBucket);
            }
        }

        let mut used: Vec<Vec<AddrKey>> = vec![Vec::new(); USED_BUCKETS];
        for (i, bucket) in used.iter_mut().enumerate() {
            let l = read_varint(&mut cursor)?;
            for _ in 0..l {
                let k = read_addr_key(&mut cursor)?;
                let entry = master.get_mut(&k).ok_or(AddrManError::BadImportBucket)?;
                if entry.used || entry.ref_count != 0 {
                    return Err(AddrManError::BadImportBucket);
                }
                entry.used = true;
                entry.used_bucket = Some(i);
                bucket.push(k);
            }
            if bucket.len() > MAX_ENTRIES {
                return Err(AddrManError::BadImportBucket);
            }
        }

        if cursor.position() as usize != buf.len() {
            return Err(AddrManError::BadImportTrailingBytes);
        }

        for entry in master.values() {
            if !entry.used && entry.ref_count == 0 {
                return Err(AddrManError::BadImportUnreferenced);
            }
        }

        let total_fresh = master.values().filter(|e| !e.used).count() as u32;
        let total_used = master.values().filter(|e| e.used).count() as u32;

        self.key = key;
        self.master = master;
        self.fresh = fresh;
        self.used = used;
        self.total_fresh = total_fresh;
        self.total_used = total_used;
        self.dirty = false;

        Ok(())
    }
}
