//! Communication pattern for ghost synchronization.
//!
//! A [`CommPattern`] holds, for every locally stored slot (its *local id*),
//! the slot's global id and the rank that owns it. Slots owned by this rank
//! are *updatable*; the others are *ghosts* mirroring a value owned
//! elsewhere. From this assignment [`CommPattern::setup`] derives the tables
//! every synchronization uses:
//!
//! - `recv_count[p]` / `recv_map`: ghost slots filled with data from rank `p`,
//! - `send_count[p]` / `send_map`: updatable slots packed for rank `p`.
//!
//! Topology edits (`add`, `move_gid`, `remove`) are buffered and only take
//! effect at the next `setup`, which rebuilds every table from scratch.
//! Batch edits and call `setup` once.
//!
//! After `setup` the local ids are ordered owned-first: updatable slots form
//! the prefix `0..num_updatable()`, ghosts the suffix. The reordering applied
//! is available from [`CommPattern::last_permutation`]; arrays registered
//! with [`CommPattern::insert`] follow it automatically.
//!
//! `setup`, `synchronize` and `synchronize_all` are collective.

use std::collections::{BTreeMap, HashMap, HashSet};

use bitflags::bitflags;
use log::debug;

use super::collectives::{all_to_all_indexed_in_place, Side};
use super::{Comm, CommData, UniverseComm};
use crate::error::{LssError, Result};

/// Process-independent identifier of a mesh entity.
pub type Gid = u64;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct SlotFlags: u8 {
        const UPDATABLE       = 0b0000_0001;
        const PENDING_REMOVAL = 0b0000_0010;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternState {
    /// Never set up.
    Empty,
    /// Edits are buffered, or the last setup failed.
    Pending,
    /// Tables match the committed topology.
    Ready,
}

#[derive(Clone, Copy, Debug)]
enum Change {
    Add { gid: Gid, rank: usize },
    Move { gid: Gid, rank: usize, keep_as_ghost: bool },
    Remove { gid: Gid, rank: usize, on_all_ranks: bool },
}

/// A distributed array registered with a pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct DistArray {
    /// `stride` values per local id.
    pub data: Vec<f64>,
    pub stride: usize,
    /// Only arrays with this flag take part in `synchronize_all`.
    pub needs_update: bool,
}

#[derive(Clone, Debug, Default)]
struct SyncMaps {
    send_count: Vec<usize>,
    send_map: Vec<usize>,
    recv_count: Vec<usize>,
    recv_map: Vec<usize>,
}

impl SyncMaps {
    fn exchange<T: CommData>(
        &self,
        comm: &UniverseComm,
        data: &mut [T],
        stride: usize,
        position: Option<&[usize]>,
    ) -> Result<()> {
        let mut send = Side::new(&self.send_count, stride).with_ids(&self.send_map);
        let mut recv = Side::new(&self.recv_count, stride).with_ids(&self.recv_map);
        if let Some(p) = position {
            send = send.with_position(p);
            recv = recv.with_position(p);
        }
        all_to_all_indexed_in_place(comm, data, send, recv)
    }
}

/// Topology produced by a setup before it is committed.
struct Staged {
    gid: Vec<Gid>,
    rank: Vec<usize>,
    lookup: HashMap<Gid, usize>,
    num_updatable: usize,
    /// New lid -> lid before setup.
    permutation: Vec<usize>,
}

pub struct CommPattern {
    comm: UniverseComm,
    gid: Vec<Gid>,
    rank: Vec<usize>,
    flags: Vec<SlotFlags>,
    lookup: HashMap<Gid, usize>,
    num_updatable: usize,
    pending: Vec<Change>,
    maps: SyncMaps,
    permutation: Vec<usize>,
    arrays: BTreeMap<String, DistArray>,
    state: PatternState,
    frozen: bool,
}

impl CommPattern {
    pub fn new(comm: impl Into<UniverseComm>) -> Self {
        Self {
            comm: comm.into(),
            gid: Vec::new(),
            rank: Vec::new(),
            flags: Vec::new(),
            lookup: HashMap::new(),
            num_updatable: 0,
            pending: Vec::new(),
            maps: SyncMaps::default(),
            permutation: Vec::new(),
            arrays: BTreeMap::new(),
            state: PatternState::Empty,
            frozen: false,
        }
    }

    pub fn comm(&self) -> &UniverseComm {
        &self.comm
    }

    fn ensure_unfrozen(&self) -> Result<()> {
        if self.frozen { Err(LssError::Frozen) } else { Ok(()) }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            PatternState::Ready => Ok(()),
            PatternState::Pending => Err(LssError::NotReady("pending topology changes")),
            PatternState::Empty => Err(LssError::NotReady("setup has not been called")),
        }
    }

    /// Buffers a new local slot holding `gid`, owned by `rank`.
    pub fn add(&mut self, gid: Gid, rank: usize) -> Result<()> {
        self.ensure_unfrozen()?;
        self.pending.push(Change::Add { gid, rank });
        self.state = PatternState::Pending;
        Ok(())
    }

    /// Buffers an ownership change of the local slot holding `gid`.
    ///
    /// When the slot no longer belongs to this rank and `keep_as_ghost` is
    /// false, the slot is dropped from this rank.
    pub fn move_gid(&mut self, gid: Gid, rank: usize, keep_as_ghost: bool) -> Result<()> {
        self.ensure_unfrozen()?;
        self.pending.push(Change::Move { gid, rank, keep_as_ghost });
        self.state = PatternState::Pending;
        Ok(())
    }

    /// Buffers the removal of the local slot holding `gid`, whose owner is
    /// expected to be `rank`. With `on_all_ranks` every rank holding `gid`
    /// drops it at the next setup.
    pub fn remove(&mut self, gid: Gid, rank: usize, on_all_ranks: bool) -> Result<()> {
        self.ensure_unfrozen()?;
        self.pending.push(Change::Remove { gid, rank, on_all_ranks });
        self.state = PatternState::Pending;
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Replaces the whole local topology with `(gid[i], rank[i])` pairs and
    /// runs `setup`. Registered arrays are reset to zeros of the new size.
    /// Edits buffered before the call are discarded.
    pub fn setup_from(&mut self, gid: Vec<Gid>, rank: Vec<usize>) -> Result<()> {
        self.pending.clear();
        let changes: Result<Vec<Change>> = self.ensure_unfrozen().and_then(|_| {
            if gid.len() != rank.len() {
                return Err(LssError::Setup(format!(
                    "{} global ids but {} ranks",
                    gid.len(),
                    rank.len()
                )));
            }
            Ok(gid
                .into_iter()
                .zip(rank)
                .map(|(gid, rank)| Change::Add { gid, rank })
                .collect())
        });
        self.commit(changes, true)
    }

    /// Commits the buffered edits and rebuilds the send/receive tables.
    ///
    /// A rejected batch is dropped and the committed topology is left as it
    /// was. Every rank returns an error when any rank rejects its batch.
    pub fn setup(&mut self) -> Result<()> {
        let changes = std::mem::take(&mut self.pending);
        self.commit(Ok(changes), false)
    }

    fn commit(&mut self, changes: Result<Vec<Change>>, replace: bool) -> Result<()> {
        let me = self.comm.rank();
        let nproc = self.comm.size();
        self.state = PatternState::Pending;

        let global: Vec<Gid> = changes
            .iter()
            .flatten()
            .filter_map(|c| match *c {
                Change::Remove { gid, on_all_ranks: true, .. } => Some(gid),
                _ => None,
            })
            .collect();
        let global: HashSet<Gid> = self.comm.all_gather_v(&global)?.into_iter().flatten().collect();

        let staged = changes.and_then(|changes| self.stage(&changes, &global, replace, me, nproc));
        let rejected_by = self
            .comm
            .all_reduce_max(if staged.is_err() { (me + 1) as f64 } else { 0.0 })?;
        let staged = staged?;
        if rejected_by > 0.0 {
            return Err(LssError::Setup(format!(
                "topology rejected on rank {}",
                rejected_by as usize - 1
            )));
        }

        let mut by_owner: Vec<Vec<usize>> = vec![Vec::new(); nproc];
        for lid in staged.num_updatable..staged.gid.len() {
            by_owner[staged.rank[lid]].push(lid);
        }
        let recv_count: Vec<usize> = by_owner.iter().map(Vec::len).collect();
        let recv_map: Vec<usize> = by_owner.into_iter().flatten().collect();
        let requested: Vec<Gid> = recv_map.iter().map(|&lid| staged.gid[lid]).collect();

        let send_count = self.comm.exchange_counts(&recv_count)?;
        let incoming = self.comm.all_to_all_v(&requested, &recv_count, &send_count)?;

        let mut send_map = Vec::with_capacity(incoming.len());
        let mut offset = 0;
        for (requester, &count) in send_count.iter().enumerate() {
            for &gid in &incoming[offset..offset + count] {
                match staged.lookup.get(&gid) {
                    Some(&lid) if lid < staged.num_updatable => send_map.push(lid),
                    _ => return Err(LssError::ValueNotFound { gid, requester, rank: me }),
                }
            }
            offset += count;
        }

        for array in self.arrays.values_mut() {
            let s = array.stride;
            let old = std::mem::take(&mut array.data);
            let mut data = Vec::with_capacity(staged.permutation.len() * s);
            for &l in &staged.permutation {
                match old.get(l * s..(l + 1) * s) {
                    Some(values) if !replace => data.extend_from_slice(values),
                    _ => data.resize(data.len() + s, 0.0),
                }
            }
            array.data = data;
        }
        self.flags = staged
            .rank
            .iter()
            .map(|&r| if r == me { SlotFlags::UPDATABLE } else { SlotFlags::empty() })
            .collect();
        self.gid = staged.gid;
        self.rank = staged.rank;
        self.lookup = staged.lookup;
        self.num_updatable = staged.num_updatable;
        self.permutation = staged.permutation;
        self.maps = SyncMaps { send_count, send_map, recv_count, recv_map };
        self.state = PatternState::Ready;
        debug!(
            "rank {}: comm pattern set up with {} slots ({} updatable), sending {} / receiving {} values",
            me,
            self.gid.len(),
            self.num_updatable,
            self.maps.send_map.len(),
            self.maps.recv_map.len()
        );
        Ok(())
    }

    /// Applies `changes` to a copy of the committed topology (or to an empty
    /// one with `replace`), then drops removed slots and orders the survivors
    /// owned-first, keeping the relative order inside each group.
    fn stage(
        &self,
        changes: &[Change],
        global: &HashSet<Gid>,
        replace: bool,
        me: usize,
        nproc: usize,
    ) -> Result<Staged> {
        let (mut gid, mut rank, mut lookup) = if replace {
            (Vec::new(), Vec::new(), HashMap::new())
        } else {
            (self.gid.clone(), self.rank.clone(), self.lookup.clone())
        };
        let mut flags = vec![SlotFlags::empty(); gid.len()];

        for change in changes {
            match *change {
                Change::Add { gid: g, rank: r } => {
                    if lookup.contains_key(&g) {
                        return Err(LssError::Setup(format!(
                            "global id {} held twice on rank {}",
                            g, me
                        )));
                    }
                    lookup.insert(g, gid.len());
                    gid.push(g);
                    rank.push(r);
                    flags.push(SlotFlags::empty());
                }
                Change::Move { gid: g, rank: r, keep_as_ghost } => {
                    let lid = *lookup.get(&g).ok_or_else(|| {
                        LssError::Setup(format!("cannot move unknown global id {} on rank {}", g, me))
                    })?;
                    rank[lid] = r;
                    if r != me && !keep_as_ghost {
                        flags[lid] |= SlotFlags::PENDING_REMOVAL;
                        lookup.remove(&g);
                    }
                }
                Change::Remove { gid: g, rank: r, on_all_ranks } => match lookup.remove(&g) {
                    Some(lid) => {
                        if rank[lid] != r {
                            return Err(LssError::Setup(format!(
                                "global id {} is owned by rank {}, not {}",
                                g, rank[lid], r
                            )));
                        }
                        flags[lid] |= SlotFlags::PENDING_REMOVAL;
                    }
                    None if on_all_ranks => {}
                    None => {
                        return Err(LssError::Setup(format!(
                            "cannot remove unknown global id {} on rank {}",
                            g, me
                        )));
                    }
                },
            }
        }

        let keep: Vec<usize> = (0..gid.len())
            .filter(|&lid| !flags[lid].contains(SlotFlags::PENDING_REMOVAL) && !global.contains(&gid[lid]))
            .collect();
        if let Some(&lid) = keep.iter().find(|&&lid| rank[lid] >= nproc) {
            return Err(LssError::Setup(format!(
                "global id {} is assigned to rank {} on a communicator of size {}",
                gid[lid], rank[lid], nproc
            )));
        }
        let (owned, ghosts): (Vec<usize>, Vec<usize>) = keep.into_iter().partition(|&lid| rank[lid] == me);
        let num_updatable = owned.len();
        let permutation: Vec<usize> = owned.into_iter().chain(ghosts).collect();
        let gid: Vec<Gid> = permutation.iter().map(|&l| gid[l]).collect();
        let rank: Vec<usize> = permutation.iter().map(|&l| rank[l]).collect();
        let lookup = gid.iter().enumerate().map(|(lid, &g)| (g, lid)).collect();
        Ok(Staged { gid, rank, lookup, num_updatable, permutation })
    }

    /// Overwrites the ghost values of a caller-owned buffer with the owners'
    /// values. `data` holds `stride` values per local id; `position`, when
    /// given, maps `lid * stride + k` to the offset inside `data`.
    pub fn synchronize_slice<T: CommData>(
        &self,
        data: &mut [T],
        stride: usize,
        position: Option<&[usize]>,
    ) -> Result<()> {
        self.ensure_ready()?;
        self.maps.exchange(&self.comm, data, stride, position)
    }

    /// Synchronizes the registered array `name`.
    pub fn synchronize(&mut self, name: &str) -> Result<()> {
        self.ensure_ready()?;
        let array = self
            .arrays
            .get_mut(name)
            .ok_or_else(|| LssError::Setup(format!("no distributed array named '{}'", name)))?;
        self.maps.exchange(&self.comm, &mut array.data, array.stride, None)
    }

    /// Synchronizes every registered array flagged `needs_update`, in name
    /// order.
    pub fn synchronize_all(&mut self) -> Result<()> {
        self.ensure_ready()?;
        for array in self.arrays.values_mut().filter(|a| a.needs_update) {
            self.maps.exchange(&self.comm, &mut array.data, array.stride, None)?;
        }
        Ok(())
    }

    /// Registers a distributed array of `stride` values per local id.
    pub fn insert(&mut self, name: &str, data: Vec<f64>, stride: usize, needs_update: bool) -> Result<()> {
        if stride == 0 {
            return Err(LssError::Setup(format!("array '{}' has a zero stride", name)));
        }
        if data.len() != self.gid.len() * stride {
            return Err(LssError::Setup(format!(
                "array '{}' holds {} values, expected {} x {}",
                name,
                data.len(),
                self.gid.len(),
                stride
            )));
        }
        if self.arrays.contains_key(name) {
            return Err(LssError::Setup(format!("array '{}' is already registered", name)));
        }
        self.arrays.insert(name.to_owned(), DistArray { data, stride, needs_update });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DistArray> {
        self.arrays.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DistArray> {
        self.arrays.get_mut(name)
    }

    pub fn remove_array(&mut self, name: &str) -> Option<DistArray> {
        self.arrays.remove(name)
    }

    pub fn array_names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(String::as_str)
    }

    pub fn state(&self) -> PatternState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == PatternState::Ready
    }

    /// Number of local ids (updatable and ghost).
    pub fn size(&self) -> usize {
        self.gid.len()
    }

    pub fn num_updatable(&self) -> usize {
        self.num_updatable
    }

    pub fn num_ghosts(&self) -> usize {
        self.gid.len() - self.num_updatable
    }

    pub fn is_updatable(&self, lid: usize) -> bool {
        self.flags[lid].contains(SlotFlags::UPDATABLE)
    }

    pub fn gid(&self, lid: usize) -> Gid {
        self.gid[lid]
    }

    pub fn gids(&self) -> &[Gid] {
        &self.gid
    }

    pub fn rank_of(&self, lid: usize) -> usize {
        self.rank[lid]
    }

    pub fn ranks(&self) -> &[usize] {
        &self.rank
    }

    pub fn lid_of(&self, gid: Gid) -> Option<usize> {
        self.lookup.get(&gid).copied()
    }

    pub fn send_count(&self) -> &[usize] {
        &self.maps.send_count
    }

    pub fn send_map(&self) -> &[usize] {
        &self.maps.send_map
    }

    pub fn recv_count(&self) -> &[usize] {
        &self.maps.recv_count
    }

    pub fn recv_map(&self) -> &[usize] {
        &self.maps.recv_map
    }

    /// Reordering applied by the last setup: `new lid -> lid before setup`,
    /// where ids before setup count the slots added by that setup too.
    pub fn last_permutation(&self) -> &[usize] {
        &self.permutation
    }
}
