//! Process-local to storage index translation shared by a matrix and its
//! companion vectors.
//!
//! Local ids come from the [`CommPattern`]. Every local id is assigned a
//! block number so that owned blocks form the prefix `0..num_owned()` and
//! ghost blocks the suffix, keeping the relative order of local ids inside
//! each group. The scalar row `lid * neq + eq` is then mapped (`p2m`) to a
//! storage offset:
//!
//! - owned rows occupy `0..num_owned() * neq`, ghost rows the rest;
//! - within each part, variable `v` (offset `o`, length `s`) owns a
//!   contiguous segment in which block `b` stores its `s` equations at
//!   `b * s..(b + 1) * s`.
//!
//! With a single variable this is the plain interleaved layout
//! `block * neq + eq`, which [`Layout::Interleaved`] also forces for any
//! number of variables.

use crate::config::Layout;
use crate::error::{LssError, Result};
use crate::parallel::CommPattern;

use super::VariablesDescriptor;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexMap {
    neq: usize,
    vars: VariablesDescriptor,
    layout: Layout,
    num_owned: usize,
    block_of_lid: Vec<usize>,
    lid_of_block: Vec<usize>,
    p2m: Vec<usize>,
    m2p: Vec<usize>,
}

impl IndexMap {
    /// Variable-blocked map for the local ids of a ready pattern.
    pub fn new(pattern: &CommPattern, vars: &VariablesDescriptor) -> Result<Self> {
        Self::with_layout(pattern, vars, Layout::Blocked)
    }

    pub fn with_layout(pattern: &CommPattern, vars: &VariablesDescriptor, layout: Layout) -> Result<Self> {
        if !pattern.is_ready() {
            return Err(LssError::NotReady("the pattern must be set up before building storage"));
        }
        let owned: Vec<bool> = (0..pattern.size()).map(|lid| pattern.is_updatable(lid)).collect();
        Self::from_ownership_with_layout(&owned, vars, layout)
    }

    /// Builds the map from an explicit ownership flag per local id.
    pub fn from_ownership(owned: &[bool], vars: &VariablesDescriptor) -> Result<Self> {
        Self::from_ownership_with_layout(owned, vars, Layout::Blocked)
    }

    pub fn from_ownership_with_layout(owned: &[bool], vars: &VariablesDescriptor, layout: Layout) -> Result<Self> {
        let neq = vars.size();
        if neq == 0 {
            return Err(LssError::Setup("block rows need at least one equation".into()));
        }
        let n = owned.len();
        let lid_of_block: Vec<usize> = (0..n)
            .filter(|&l| owned[l])
            .chain((0..n).filter(|&l| !owned[l]))
            .collect();
        let mut block_of_lid = vec![0; n];
        for (block, &lid) in lid_of_block.iter().enumerate() {
            block_of_lid[lid] = block;
        }
        let num_owned = owned.iter().filter(|&&o| o).count();

        let mut map = Self {
            neq,
            vars: vars.clone(),
            layout,
            num_owned,
            block_of_lid,
            lid_of_block,
            p2m: Vec::with_capacity(n * neq),
            m2p: vec![0; n * neq],
        };
        for lid in 0..n {
            for eq in 0..neq {
                let offset = map.storage_offset(map.block_of_lid[lid], eq);
                map.p2m.push(offset);
            }
        }
        for (row, &offset) in map.p2m.iter().enumerate() {
            map.m2p[offset] = row;
        }
        Ok(map)
    }

    fn storage_offset(&self, block: usize, eq: usize) -> usize {
        let (o, s, k) = match self.layout {
            Layout::Interleaved => (0, self.neq, eq),
            Layout::Blocked => {
                let (v, k) = self.vars.locate(eq);
                (self.vars.offset(v), self.vars.var_length(v), k)
            }
        };
        let no = self.num_owned;
        if block < no {
            no * o + block * s + k
        } else {
            let ng = self.num_blocks() - no;
            no * self.neq + ng * o + (block - no) * s + k
        }
    }

    pub fn neq(&self) -> usize {
        self.neq
    }

    pub fn variables(&self) -> &VariablesDescriptor {
        &self.vars
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn num_blocks(&self) -> usize {
        self.lid_of_block.len()
    }

    /// Owned blocks, a prefix of the block numbering.
    pub fn num_owned(&self) -> usize {
        self.num_owned
    }

    pub fn num_owned_rows(&self) -> usize {
        self.num_owned * self.neq
    }

    /// Number of scalar rows, owned and ghost.
    pub fn len(&self) -> usize {
        self.p2m.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p2m.is_empty()
    }

    pub fn block_of_lid(&self, lid: usize) -> usize {
        self.block_of_lid[lid]
    }

    pub fn lid_of_block(&self, block: usize) -> usize {
        self.lid_of_block[block]
    }

    pub fn is_owned_lid(&self, lid: usize) -> bool {
        self.block_of_lid[lid] < self.num_owned
    }

    /// Storage offset of equation `eq` of local id `lid`.
    #[inline]
    pub fn offset(&self, lid: usize, eq: usize) -> usize {
        debug_assert!(eq < self.neq);
        self.p2m[lid * self.neq + eq]
    }

    /// Storage offset of equation `eq` of block `block`.
    #[inline]
    pub fn block_offset(&self, block: usize, eq: usize) -> usize {
        self.offset(self.lid_of_block[block], eq)
    }

    pub fn p2m(&self) -> &[usize] {
        &self.p2m
    }

    pub fn m2p(&self) -> &[usize] {
        &self.m2p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_bijective(map: &IndexMap) {
        let mut seen = vec![false; map.len()];
        for &o in map.p2m() {
            assert!(!seen[o]);
            seen[o] = true;
        }
        for (row, &o) in map.p2m().iter().enumerate() {
            assert_eq!(map.m2p()[o], row);
        }
    }

    #[test]
    fn owned_rows_map_to_the_prefix() {
        let owned = [false, true, true, false, true];
        let map = IndexMap::from_ownership(&owned, &VariablesDescriptor::single(2)).unwrap();
        check_bijective(&map);
        assert_eq!(map.num_owned(), 3);
        assert_eq!(map.block_of_lid(1), 0);
        assert_eq!(map.block_of_lid(0), 3);
        for lid in 0..owned.len() {
            for eq in 0..2 {
                assert_eq!(map.offset(lid, eq) < map.num_owned_rows(), owned[lid]);
            }
        }
        // interleaved with a single variable
        assert_eq!(map.offset(4, 1), 2 * 2 + 1);
    }

    #[test]
    fn blocked_layout_keeps_variables_contiguous() {
        let vars = VariablesDescriptor::new()
            .with_variable("a", 1)
            .unwrap()
            .with_variable("b", 2)
            .unwrap();
        let owned = [true, true, false];
        let map = IndexMap::from_ownership(&owned, &vars).unwrap();
        check_bijective(&map);
        // owned part: a a | b b b b, then ghost part: a | b b
        assert_eq!(map.offset(0, 0), 0);
        assert_eq!(map.offset(1, 0), 1);
        assert_eq!(map.offset(0, 1), 2);
        assert_eq!(map.offset(0, 2), 3);
        assert_eq!(map.offset(1, 2), 5);
        assert_eq!(map.offset(2, 0), 6);
        assert_eq!(map.offset(2, 2), 8);
    }

    #[test]
    fn interleaved_layout_ignores_variable_boundaries() {
        let vars = VariablesDescriptor::new()
            .with_variable("a", 1)
            .unwrap()
            .with_variable("b", 2)
            .unwrap();
        let map = IndexMap::from_ownership_with_layout(&[true, true, false], &vars, Layout::Interleaved).unwrap();
        check_bijective(&map);
        assert_eq!(map.layout(), Layout::Interleaved);
        assert_eq!(map.offset(0, 1), 1);
        assert_eq!(map.offset(1, 0), 3);
        assert_eq!(map.offset(2, 2), 8);
    }

    #[test]
    fn zero_equations_is_a_setup_error() {
        assert!(IndexMap::from_ownership(&[true], &VariablesDescriptor::new()).is_err());
    }
}
