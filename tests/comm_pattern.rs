//! Ghost synchronization across in-process ranks.
//!
//! Every test drives several ranks with `LocalUniverse::run`, builds a
//! `CommPattern` per rank and checks what the ghosts hold after a
//! synchronization.

use blocklss::parallel::{Comm, CommPattern, LocalUniverse, PatternState};
use blocklss::LssError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const NPROC: usize = 4;
const NGID: u64 = 24;

/// Value the owner of `gid` stores in equation `k`.
fn owned_value(gid: u64, k: usize) -> f64 {
    gid as f64 * 10.0 + k as f64
}

/// Round-robin topology: rank `p` owns every gid with `gid % 4 == p` and
/// holds the gids just before and after its owned range as ghosts. Ghosts
/// are listed first to exercise the owned-first reordering.
fn round_robin(me: usize) -> (Vec<u64>, Vec<usize>) {
    let p = me as u64;
    let before = (p + NGID - 1) % NGID;
    let after = (p + 21) % NGID;
    let mut gid = vec![before, after];
    gid.extend((0..NGID).filter(|g| g % NPROC as u64 == p));
    let rank = gid.iter().map(|&g| (g % NPROC as u64) as usize).collect();
    (gid, rank)
}

/// Four processes, six owned gids each plus two ghosts.
///
/// - Owned slots are filled with a value derived from the gid.
/// - Ghost slots start as -1.
/// - After `synchronize` every ghost holds its owner's value, twice in a row.
#[test]
fn round_robin_ghosts_receive_owner_values() {
    let out = LocalUniverse::run(NPROC, |comm| {
        let me = comm.rank();
        let mut cp = CommPattern::new(comm);
        let (gid, rank) = round_robin(me);
        cp.setup_from(gid, rank).unwrap();
        assert_eq!(cp.num_updatable(), 6);
        assert_eq!(cp.num_ghosts(), 2);
        assert!((0..cp.size()).all(|lid| cp.is_updatable(lid) == (lid < 6)));

        let mut data = Vec::new();
        for lid in 0..cp.size() {
            for k in 0..2 {
                data.push(if cp.is_updatable(lid) { owned_value(cp.gid(lid), k) } else { -1.0 });
            }
        }
        cp.insert("u", data, 2, true).unwrap();
        cp.synchronize("u").unwrap();
        let first = cp.get("u").unwrap().data.clone();
        cp.synchronize_all().unwrap();
        let second = cp.get("u").unwrap().data.clone();
        (cp.gids().to_vec(), first, second)
    })
    .unwrap();

    for (gids, first, second) in out {
        assert_eq!(first, second);
        for (lid, &g) in gids.iter().enumerate() {
            for k in 0..2 {
                assert_eq!(first[lid * 2 + k], owned_value(g, k), "gid {} eq {}", g, k);
            }
        }
    }
}

#[test]
fn empty_pattern_does_not_block() {
    let out = LocalUniverse::run(3, |comm| {
        let mut cp = CommPattern::new(comm);
        cp.setup().unwrap();
        let mut data: Vec<f64> = Vec::new();
        cp.synchronize_slice(&mut data, 3, None).unwrap();
        (cp.state(), cp.send_map().is_empty(), cp.recv_map().is_empty(), cp.send_count().len())
    })
    .unwrap();
    for (state, no_send, no_recv, peers) in out {
        assert_eq!(state, PatternState::Ready);
        assert!(no_send && no_recv);
        assert_eq!(peers, 3);
    }
}

/// A ghost whose owner does not hold the gid is reported by the owner.
#[test]
fn unknown_ghost_is_reported_by_its_owner() {
    let out = LocalUniverse::run(2, |comm| {
        let mut cp = CommPattern::new(comm.clone());
        let outcome = if comm.rank() == 0 {
            cp.setup_from(vec![0, 5], vec![0, 1])
        } else {
            cp.setup_from(vec![1], vec![1])
        };
        outcome.map_err(|e| match e {
            LssError::ValueNotFound { gid, requester, rank } => (gid, requester, rank),
            other => panic!("unexpected error {}", other),
        })
    })
    .unwrap();
    assert!(out[0].is_ok());
    assert_eq!(out[1], Err((5, 0, 1)));
}

/// Incremental edits: a gid moves to another rank, one is removed
/// everywhere, and the ghosts follow the new owners.
#[test]
fn moved_and_removed_gids_follow_new_owners() {
    let out = LocalUniverse::run(2, |comm| {
        let me = comm.rank();
        let mut cp = CommPattern::new(comm);
        // gids 0..4 owned by rank 0, 4..8 by rank 1, every rank sees all
        let gid: Vec<u64> = (0..8).collect();
        let rank: Vec<usize> = (0..8).map(|g| g / 4).collect();
        cp.setup_from(gid, rank).unwrap();

        // gid 3 changes hands, gid 7 disappears
        cp.move_gid(3, 1, true).unwrap();
        if me == 1 {
            cp.remove(7, 1, true).unwrap();
        }
        cp.setup().unwrap();

        let data: Vec<f64> = (0..cp.size())
            .map(|lid| if cp.is_updatable(lid) { cp.gid(lid) as f64 + 100.0 * me as f64 } else { 0.0 })
            .collect();
        cp.insert("x", data, 1, true).unwrap();
        cp.synchronize_all().unwrap();
        let x = cp.get("x").unwrap().data.clone();
        (cp.gids().to_vec(), cp.ranks().to_vec(), x)
    })
    .unwrap();

    for (gids, ranks, x) in out {
        assert!(!gids.contains(&7));
        assert_eq!(gids.len(), 7);
        for (lid, &g) in gids.iter().enumerate() {
            let owner = if g == 3 { 1 } else { (g / 4) as usize };
            assert_eq!(ranks[lid], owner);
            assert_eq!(x[lid], g as f64 + 100.0 * owner as f64);
        }
    }
}

/// Random ownership and ghost sets, shuffled local order.
#[test]
fn random_topologies_round_trip() {
    const N: u64 = 60;
    for seed in 0..5u64 {
        let out = LocalUniverse::run(3, |comm| {
            let me = comm.rank();
            // same ownership on every rank, rank-local ghost choice
            let mut shared = StdRng::seed_from_u64(seed);
            let owner: Vec<usize> = (0..N).map(|_| shared.gen_range(0..3)).collect();
            let mut local = StdRng::seed_from_u64(seed * 31 + me as u64);
            let mut slots: Vec<(u64, usize)> = (0..N)
                .filter(|&g| owner[g as usize] == me || local.gen_bool(0.3))
                .map(|g| (g, owner[g as usize]))
                .collect();
            slots.shuffle(&mut local);

            let mut cp = CommPattern::new(comm);
            let (gid, rank) = slots.into_iter().unzip();
            cp.setup_from(gid, rank).unwrap();
            let mut data: Vec<f64> = (0..cp.size())
                .map(|lid| if cp.is_updatable(lid) { cp.gid(lid) as f64 * 1.5 } else { f64::NAN })
                .collect();
            cp.synchronize_slice(&mut data, 1, None).unwrap();
            (cp.gids().to_vec(), data)
        })
        .unwrap();
        for (gids, data) in out {
            for (g, v) in gids.into_iter().zip(data) {
                assert_eq!(v, g as f64 * 1.5, "seed {} gid {}", seed, g);
            }
        }
    }
}

/// One rank assigns a gid to a rank outside the communicator. Both ranks
/// return a setup error and keep their previous topology.
#[test]
fn invalid_topology_on_one_rank_fails_everywhere() {
    let out = LocalUniverse::run(2, |comm| {
        let me = comm.rank();
        let mut cp = CommPattern::new(comm);
        cp.setup_from(vec![me as u64], vec![me]).unwrap();
        let outcome = if me == 0 {
            cp.setup_from(vec![0], vec![5])
        } else {
            cp.setup_from(vec![1, 0], vec![1, 0])
        };
        let failed = matches!(outcome, Err(LssError::Setup(_)));
        (failed, cp.state(), cp.gids().to_vec())
    })
    .unwrap();
    assert_eq!(out[0], (true, PatternState::Pending, vec![0]));
    assert_eq!(out[1], (true, PatternState::Pending, vec![1]));
}

/// `synchronize_all` skips arrays registered without `needs_update`, while
/// `synchronize` by name still refreshes them.
#[test]
fn synchronize_all_skips_arrays_without_update_flag() {
    let out = LocalUniverse::run(NPROC, |comm| {
        let me = comm.rank();
        let mut cp = CommPattern::new(comm);
        let (gid, rank) = round_robin(me);
        cp.setup_from(gid, rank).unwrap();
        let fill = |cp: &CommPattern| -> Vec<f64> {
            (0..cp.size())
                .map(|lid| if cp.is_updatable(lid) { owned_value(cp.gid(lid), 0) } else { -1.0 })
                .collect()
        };
        cp.insert("live", fill(&cp), 1, true).unwrap();
        cp.insert("frozen", fill(&cp), 1, false).unwrap();

        cp.synchronize_all().unwrap();
        let live = cp.get("live").unwrap().data.clone();
        let stale = cp.get("frozen").unwrap().data.clone();
        cp.synchronize("frozen").unwrap();
        let refreshed = cp.get("frozen").unwrap().data.clone();
        (cp.gids().to_vec(), cp.num_updatable(), live, stale, refreshed)
    })
    .unwrap();

    for (gids, owned, live, stale, refreshed) in out {
        for (lid, &g) in gids.iter().enumerate() {
            assert_eq!(live[lid], owned_value(g, 0));
            assert_eq!(refreshed[lid], owned_value(g, 0));
            let expected = if lid < owned { owned_value(g, 0) } else { -1.0 };
            assert_eq!(stale[lid], expected, "gid {}", g);
        }
    }
}
