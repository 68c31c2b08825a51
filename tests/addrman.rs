//! Boundary-scenario tests for the address manager core: insertion, the
//! Sybil-resistant clustering that a single source induces, fresh-bucket
//! eviction under pressure, promotion, and promotion-with-demotion.

use addrman::config::AddrManConfig;
use addrman::manager::AddrMan;
use addrman::net::{NetAddress, Network};
use addrman::rand::ThreadRandSource;
use addrman::time::FixedTimeSource;

const NOW: i64 = 1_700_000_000;

fn addr(a: u8, b: u8, c: u8, d: u8, port: u16) -> NetAddress {
    let mut a = NetAddress::from_ipv4(a, b, c, d, port);
    a.time = NOW;
    a.services = 1;
    a
}

fn fixed_manager() -> AddrMan {
    AddrMan::with_sources(
        Network::Main,
        AddrManConfig::default(),
        Box::new(ThreadRandSource),
        Box::new(FixedTimeSource(NOW)),
    )
}

#[test]
fn basic_add_and_select_roundtrips_the_entry() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 8333);
    let target = addr(1, 2, 3, 4, 8333);

    assert!(am.add(target.clone(), Some(src.clone())));
    assert_eq!(am.total_fresh(), 1);
    assert_eq!(am.total_used(), 0);

    let selected = am.select().expect("a single entry must always be selectable");
    assert_eq!(selected.addr.ip, target.ip);
    assert_eq!(selected.addr.port, target.port);
    assert_eq!(selected.src.ip, src.ip);
}

#[test]
fn adding_the_same_address_twice_does_not_duplicate_the_entry() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 8333);
    let target = addr(1, 2, 3, 4, 8333);

    am.add(target.clone(), Some(src.clone()));
    am.add(target.clone(), Some(src));
    assert_eq!(am.total(), 1, "re-announcing a known address must not grow the master index");
}

#[test]
fn a_single_source_clusters_its_announcements_into_few_fresh_buckets() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 0);

    let mut buckets = std::collections::HashSet::new();
    for b in 0..200u16 {
        let target = addr(1, (b / 256) as u8, (b % 256) as u8, 7, 8333);
        am.add(target.clone(), Some(src.clone()));
        buckets.insert(am.fresh_bucket_of(&target, &src));
    }

    // Bucket placement for entries sharing one source is keyed only by the
    // source's group plus a 6-bit intermediate hash, so at most 64 distinct
    // fresh buckets are reachable no matter how many addresses are announced.
    assert!(
        buckets.len() <= 64,
        "a single source should never spread its announcements past 64 buckets, saw {}",
        buckets.len()
    );
    assert!(am.total_fresh() <= 200);
}

#[test]
fn fresh_bucket_overflow_evicts_stale_entries_to_make_room() {
    let mut am = fixed_manager();
    let src = addr(9, 9, 9, 9, 8333);

    let probe = addr(1, 0, 0, 1, 8333);
    let target_bucket = am.fresh_bucket_of(&probe, &src);

    let mut sharing = Vec::new();
    'search: for b3 in 0..=255u8 {
        for b4 in 0..=255u8 {
            let candidate = addr(1, 0, b3, b4, 8333);
            if am.fresh_bucket_of(&candidate, &src) == target_bucket {
                sharing.push(candidate);
                if sharing.len() == 65 {
                    break 'search;
                }
            }
        }
    }
    assert_eq!(
        sharing.len(),
        65,
        "expected to find 65 addresses sharing one fresh bucket with this key"
    );

    // Fill the bucket with 64 entries old enough to be stale by the horizon rule.
    for candidate in &sharing[..64] {
        let mut stale = candidate.clone();
        stale.time = NOW - 31 * 86_400;
        assert!(am.add(stale, Some(src.clone())));
    }
    assert_eq!(am.total_fresh(), 64);

    // The 65th add targeting the same bucket must still succeed.
    let mut fresh_entry = sharing[64].clone();
    fresh_entry.time = NOW;
    assert!(am.add(fresh_entry.clone(), Some(src.clone())));

    let occupants = am.fresh_bucket_of(&fresh_entry, &src);
    assert_eq!(occupants, target_bucket);

    // All 64 stale entries were stale and should have been pruned from the
    // master index by the eviction pass, leaving only the new arrival.
    for candidate in &sharing[..64] {
        assert!(am.get_entry(candidate).is_none());
    }
    assert!(am.get_entry(&fresh_entry).is_some());
}

#[test]
fn mark_ack_promotes_an_entry_from_fresh_to_used() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 8333);
    let target = addr(1, 2, 3, 4, 8333);

    am.add(target.clone(), Some(src));
    am.mark_ack(&target, 9);

    assert_eq!(am.total_fresh(), 0);
    assert_eq!(am.total_used(), 1);

    let entry = am.get_entry(&target).expect("entry must still be tracked");
    assert!(entry.used);
    assert_eq!(entry.ref_count, 0);
    assert_eq!(entry.addr.services & 9, 9);
    assert_eq!(entry.last_success, NOW);
    assert_eq!(entry.last_attempt, NOW);
    assert_eq!(entry.attempts, 0);
}

#[test]
fn mark_ack_on_an_already_used_entry_is_a_no_op() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 8333);
    let target = addr(1, 2, 3, 4, 8333);

    am.add(target.clone(), Some(src));
    am.mark_ack(&target, 1);
    am.mark_ack(&target, 1);

    assert_eq!(am.total_used(), 1);
    assert_eq!(am.total(), 1);
}

#[test]
fn mark_ack_overflow_demotes_the_used_buckets_oldest_entry() {
    let mut am = fixed_manager();

    let probe = addr(1, 0, 0, 1, 8333);
    let target_used_bucket = am.used_bucket_of(&probe);

    let mut sharing = Vec::new();
    'search: for b3 in 0..=255u8 {
        for b4 in 0..=255u8 {
            let candidate = addr(1, 0, b3, b4, 8333);
            if am.used_bucket_of(&candidate) == target_used_bucket {
                sharing.push(candidate);
                if sharing.len() == 65 {
                    break 'search;
                }
            }
        }
    }
    assert_eq!(
        sharing.len(),
        65,
        "expected to find 65 addresses sharing one used bucket with this key"
    );

    for (i, candidate) in sharing[..64].iter().enumerate() {
        let mut filler = candidate.clone();
        filler.time = NOW - i as i64 - 1;
        let src = filler.clone();
        am.add(filler.clone(), Some(src));
        am.mark_ack(&filler, 1);
    }
    assert_eq!(am.total_used(), 64);
    assert_eq!(am.total_fresh(), 0);

    // Filler index 63 was given the smallest addr.time (NOW - 64), so it is
    // the bucket's oldest occupant and the one `mark_ack` should demote.
    let oldest = sharing[63].clone();

    let mut newcomer = sharing[64].clone();
    newcomer.time = NOW + 500;
    let newcomer_src = newcomer.clone();
    am.add(newcomer.clone(), Some(newcomer_src));
    am.mark_ack(&newcomer, 1);

    assert_eq!(am.total_used(), 64, "used bucket population must not grow past MAX_ENTRIES");
    assert_eq!(am.total_fresh(), 1, "the demoted occupant must land back in fresh");

    let promoted = am.get_entry(&newcomer).expect("newcomer must be tracked");
    assert!(promoted.used);

    let demoted = am.get_entry(&oldest).expect("demoted occupant must still be tracked");
    assert!(!demoted.used);
    assert_eq!(demoted.used_bucket, None);
}

#[test]
fn removing_a_fresh_entry_clears_it_from_every_bucket() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 8333);
    let target = addr(1, 2, 3, 4, 8333);

    am.add(target.clone(), Some(src));
    assert!(am.remove(&target));
    assert_eq!(am.total(), 0);
    assert!(am.get_entry(&target).is_none());
    assert!(!am.remove(&target));
}

#[test]
fn removing_a_used_entry_clears_its_used_bucket() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 8333);
    let target = addr(1, 2, 3, 4, 8333);

    am.add(target.clone(), Some(src));
    am.mark_ack(&target, 1);
    assert!(am.remove(&target));
    assert_eq!(am.total_used(), 0);
}

#[test]
fn mark_attempt_increments_attempts_and_stamps_last_attempt() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 8333);
    let target = addr(1, 2, 3, 4, 8333);
    am.add(target.clone(), Some(src));

    am.mark_attempt(&target);
    am.mark_attempt(&target);

    let entry = am.get_entry(&target).expect("entry must still be tracked");
    assert_eq!(entry.attempts, 2);
    assert_eq!(entry.last_attempt, NOW);
}

#[test]
fn mark_success_refreshes_addr_time_only_past_the_twenty_minute_threshold() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 8333);
    let mut target = addr(1, 2, 3, 4, 8333);
    target.time = NOW - 1_000;
    am.add(target.clone(), Some(src));

    am.mark_success(&target);
    let entry = am.get_entry(&target).expect("entry must still be tracked");
    assert_eq!(entry.addr.time, NOW - 1_000, "a recent addr.time must not be refreshed yet");
    assert_eq!(entry.last_success, 0, "mark_success must not touch last_success");

    am.set_time_source(Box::new(FixedTimeSource(NOW + 2_000)));
    am.mark_success(&target);
    let entry = am.get_entry(&target).expect("entry must still be tracked");
    assert_eq!(
        entry.addr.time,
        NOW + 2_000,
        "addr.time must refresh once the 20-minute threshold is exceeded"
    );
    assert_eq!(entry.last_success, 0, "mark_success still must not touch last_success");
}

#[test]
fn select_returns_none_when_empty() {
    let mut am = fixed_manager();
    assert!(am.select().is_none());
}

#[test]
fn select_is_eventually_fair_across_a_small_population() {
    let mut am = fixed_manager();
    let src = addr(5, 6, 7, 8, 8333);
    let mut all = Vec::new();
    for i in 0..10u8 {
        let target = addr(1, 2, 3, i, 8333);
        am.add(target.clone(), Some(src.clone()));
        all.push(target.key());
    }

    let mut hits = std::collections::HashMap::new();
    for _ in 0..5_000 {
        if let Some(entry) = am.select() {
            *hits.entry(entry.addr.key()).or_insert(0u32) += 1;
        }
    }

    for key in all {
        assert!(
            hits.get(&key).copied().unwrap_or(0) > 0,
            "every entry should be selectable at least once over many draws"
        );
    }
}

#[test]
fn select_favors_the_low_failure_entry_by_roughly_the_documented_ratio() {
    let mut am = fixed_manager();
    let good = addr(1, 2, 3, 4, 8333);
    let bad = addr(1, 2, 3, 5, 8333);
    let src = addr(9, 9, 9, 9, 8333);

    am.add(good.clone(), Some(src.clone()));
    am.add(bad.clone(), Some(src));
    for _ in 0..5 {
        am.mark_attempt(&bad);
    }

    // Push the clock out far enough that `bad`'s last attempt no longer
    // counts as "recent", isolating the attempts=5 penalty in `chance()`.
    am.set_time_source(Box::new(FixedTimeSource(NOW + 10_000)));

    let mut hits_good = 0u32;
    let mut hits_bad = 0u32;
    for _ in 0..10_000 {
        match am.select() {
            Some(entry) if entry.addr.key() == good.key() => hits_good += 1,
            Some(entry) if entry.addr.key() == bad.key() => hits_bad += 1,
            _ => {}
        }
    }

    assert!(hits_good > 0 && hits_bad > 0);
    let ratio = f64::from(hits_good) / f64::from(hits_bad);
    // 1 / 0.66^5 ~= 7.5x per spec; allow a wide statistical band since this
    // runs on real thread_rng rather than a seeded source.
    assert!(
        ratio > 4.0 && ratio < 12.0,
        "expected the zero-attempt entry to win roughly 7.5x as often as the five-attempt one, got ratio {ratio}"
    );
}
