//! Block compressed-sparse-row matrix over owned block rows.
//!
//! Blocks are numbered by the [`IndexMap`] (owned first). Every owned block
//! row stores its columns sorted, always including the diagonal block, and
//! each stored block holds `neq * neq` values in row-major order. A column
//! index lists the stored blocks of every block column so that column
//! operations do not scan the whole matrix.

use std::io::Write;
use std::ops::Range;
use std::rc::Rc;

use faer::Mat;
use log::debug;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::error::{LssError, Result};
use crate::parallel::{Comm, CommPattern};
use crate::system::{BlockAccumulator, IndexMap};
use crate::vector::Vector;

use super::{check_diagonal_len, Matrix};

#[derive(Clone, Default)]
pub struct BlockCsrMatrix {
    pattern: Option<Rc<CommPattern>>,
    map: Rc<IndexMap>,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    diag_pos: Vec<usize>,
    col_entries: Vec<Vec<(usize, usize)>>,
    values: Vec<f64>,
}

impl BlockCsrMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(&self) -> Option<&Rc<CommPattern>> {
        self.pattern.as_ref()
    }

    pub fn index_map(&self) -> &Rc<IndexMap> {
        &self.map
    }

    pub fn num_owned_blocks(&self) -> usize {
        self.map.num_owned()
    }

    pub fn num_stored_blocks(&self) -> usize {
        self.col_idx.len()
    }

    /// Stored block columns of owned block row `rb`.
    pub fn block_cols(&self, rb: usize) -> &[usize] {
        &self.col_idx[self.row_range(rb)]
    }

    /// Values of the diagonal block of owned block row `rb`.
    pub fn diagonal_block(&self, rb: usize) -> &[f64] {
        let bs = self.block_len();
        let k = self.diag_pos[rb];
        &self.values[k * bs..(k + 1) * bs]
    }

    fn row_range(&self, rb: usize) -> Range<usize> {
        self.row_ptr[rb]..self.row_ptr[rb + 1]
    }

    fn block_len(&self) -> usize {
        let n = self.map.neq();
        n * n
    }

    #[inline]
    fn at(&self, k: usize, a: usize, b: usize) -> usize {
        let neq = self.map.neq();
        k * neq * neq + a * neq + b
    }

    fn find(&self, rb: usize, cb: usize) -> Option<usize> {
        let range = self.row_range(rb);
        self.col_idx[range.clone()]
            .binary_search(&cb)
            .ok()
            .map(|p| range.start + p)
    }

    /// Stored block coupling local ids `row` and `col`, `None` for a ghost row.
    fn locate(&self, row: usize, col: usize) -> Result<Option<usize>> {
        if !self.map.is_owned_lid(row) {
            return Ok(None);
        }
        let rb = self.map.block_of_lid(row);
        let cb = self.map.block_of_lid(col);
        self.find(rb, cb)
            .map(Some)
            .ok_or(LssError::EntryNotFound { row, col })
    }

    fn scalar(&self, row: usize, col: usize) -> Result<Option<usize>> {
        let neq = self.map.neq();
        let k = self.locate(row / neq, col / neq)?;
        Ok(k.map(|k| self.at(k, row % neq, col % neq)))
    }

    /// Resolves every accumulator pair, row-major, before anything is
    /// written.
    fn positions(&self, acc: &BlockAccumulator) -> Result<Vec<Option<usize>>> {
        debug_assert!(self.is_created());
        debug_assert_eq!(acc.neq(), self.map.neq(), "accumulator and matrix disagree on neq");
        acc.check_shape();
        let mut out = Vec::with_capacity(acc.indices.len() * acc.indices.len());
        for &i in &acc.indices {
            for &j in &acc.indices {
                out.push(self.locate(i, j)?);
            }
        }
        Ok(out)
    }

    fn scatter(&mut self, acc: &BlockAccumulator, add: bool) -> Result<()> {
        let positions = self.positions(acc)?;
        let neq = self.map.neq();
        let n = acc.num_blocks();
        for i in 0..n {
            for j in 0..n {
                let Some(k) = positions[i * n + j] else { continue };
                for a in 0..neq {
                    for b in 0..neq {
                        let v = acc.mat[(i * neq + a, j * neq + b)];
                        let idx = self.at(k, a, b);
                        if add {
                            self.values[idx] += v;
                        } else {
                            self.values[idx] = v;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn update_diagonal(&mut self, diag: &[f64], add: bool) -> Result<()> {
        let neq = self.map.neq();
        check_diagonal_len(self.map.len(), diag.len())?;
        for rb in 0..self.map.num_owned() {
            let lid = self.map.lid_of_block(rb);
            for eq in 0..neq {
                let idx = self.at(self.diag_pos[rb], eq, eq);
                let v = diag[lid * neq + eq];
                if add {
                    self.values[idx] += v;
                } else {
                    self.values[idx] = v;
                }
            }
        }
        Ok(())
    }

    /// `y = A x` over owned rows. `x` covers every storage row, ghosts
    /// included and already synchronized; `y` covers the owned rows. Both
    /// are in storage order.
    pub fn matvec(&self, x: &[f64], y: &mut [f64]) -> Result<()> {
        let map: &IndexMap = &self.map;
        if x.len() != map.len() || y.len() != map.num_owned_rows() {
            return Err(LssError::Setup(format!(
                "matvec with |x| = {} and |y| = {} on a matrix of {} x {} rows",
                x.len(),
                y.len(),
                map.num_owned_rows(),
                map.len()
            )));
        }
        let no = map.num_owned();
        if no == 0 {
            return Ok(());
        }
        let neq = map.neq();
        let bs = neq * neq;
        let (row_ptr, col_idx, values) = (&self.row_ptr, &self.col_idx, &self.values);
        let row = |rb: usize, out: &mut [f64]| {
            out.iter_mut().for_each(|o| *o = 0.0);
            for k in row_ptr[rb]..row_ptr[rb + 1] {
                let cb = col_idx[k];
                let block = &values[k * bs..(k + 1) * bs];
                for b in 0..neq {
                    let xv = x[map.block_offset(cb, b)];
                    for a in 0..neq {
                        out[a] += block[a * neq + b] * xv;
                    }
                }
            }
        };
        let mut by_block = vec![0.0; no * neq];
        #[cfg(feature = "rayon")]
        by_block
            .par_chunks_mut(neq)
            .enumerate()
            .for_each(|(rb, out)| row(rb, out));
        #[cfg(not(feature = "rayon"))]
        by_block
            .chunks_mut(neq)
            .enumerate()
            .for_each(|(rb, out)| row(rb, out));
        for rb in 0..no {
            for a in 0..neq {
                y[map.block_offset(rb, a)] = by_block[rb * neq + a];
            }
        }
        Ok(())
    }

    /// Diagonal of the owned rows in storage order.
    pub fn diagonal_storage(&self) -> Vec<f64> {
        let neq = self.map.neq();
        let mut d = vec![0.0; self.map.num_owned_rows()];
        for rb in 0..self.map.num_owned() {
            for a in 0..neq {
                d[self.map.block_offset(rb, a)] = self.values[self.at(self.diag_pos[rb], a, a)];
            }
        }
        d
    }

    /// Owned rows against every storage column, as a dense matrix.
    pub fn to_dense(&self) -> Mat<f64> {
        let neq = self.map.neq();
        let mut dense = Mat::zeros(self.map.num_owned_rows(), self.map.len());
        for rb in 0..self.map.num_owned() {
            for k in self.row_range(rb) {
                let cb = self.col_idx[k];
                for a in 0..neq {
                    for b in 0..neq {
                        dense[(self.map.block_offset(rb, a), self.map.block_offset(cb, b))] =
                            self.values[self.at(k, a, b)];
                    }
                }
            }
        }
        dense
    }
}

impl Matrix for BlockCsrMatrix {
    fn solvertype(&self) -> &'static str {
        "native"
    }

    fn is_created(&self) -> bool {
        self.pattern.is_some()
    }

    fn neq(&self) -> usize {
        self.map.neq()
    }

    fn blockrow_size(&self) -> usize {
        self.map.num_blocks()
    }

    fn blockcol_size(&self) -> usize {
        self.map.num_blocks()
    }

    fn create_with_map(
        &mut self,
        pattern: Rc<CommPattern>,
        map: Rc<IndexMap>,
        node_connectivity: &[usize],
        starting_indices: &[usize],
    ) -> Result<()> {
        if self.is_created() {
            return Err(LssError::Setup("matrix already created".into()));
        }
        let n = pattern.size();
        if map.num_blocks() != n {
            return Err(LssError::Setup(format!(
                "index map over {} blocks for a pattern of {} local ids",
                map.num_blocks(),
                n
            )));
        }
        if starting_indices.len() != n + 1
            || starting_indices.windows(2).any(|w| w[0] > w[1])
            || starting_indices[n] > node_connectivity.len()
        {
            return Err(LssError::Setup(format!(
                "malformed adjacency: {} offsets over {} neighbours for {} local ids",
                starting_indices.len(),
                node_connectivity.len(),
                n
            )));
        }
        if let Some(&bad) = node_connectivity[..starting_indices[n]].iter().find(|&&l| l >= n) {
            return Err(LssError::Setup(format!("neighbour {} is not a local id (size {})", bad, n)));
        }

        let no = map.num_owned();
        let mut row_ptr = Vec::with_capacity(no + 1);
        let mut col_idx = Vec::new();
        let mut diag_pos = Vec::with_capacity(no);
        row_ptr.push(0);
        for rb in 0..no {
            let lid = map.lid_of_block(rb);
            let mut cols: Vec<usize> = node_connectivity[starting_indices[lid]..starting_indices[lid + 1]]
                .iter()
                .map(|&l| map.block_of_lid(l))
                .collect();
            cols.push(rb);
            cols.sort_unstable();
            cols.dedup();
            let (Ok(p) | Err(p)) = cols.binary_search(&rb);
            diag_pos.push(col_idx.len() + p);
            col_idx.extend_from_slice(&cols);
            row_ptr.push(col_idx.len());
        }
        let mut col_entries = vec![Vec::new(); n];
        for rb in 0..no {
            for k in row_ptr[rb]..row_ptr[rb + 1] {
                col_entries[col_idx[k]].push((rb, k));
            }
        }

        let neq = map.neq();
        self.values = vec![0.0; col_idx.len() * neq * neq];
        self.row_ptr = row_ptr;
        self.col_idx = col_idx;
        self.diag_pos = diag_pos;
        self.col_entries = col_entries;
        debug!(
            "rank {}: block matrix with {} owned of {} block rows, {} stored blocks of {}x{}",
            pattern.comm().rank(),
            no,
            n,
            self.col_idx.len(),
            neq,
            neq
        );
        self.map = map;
        self.pattern = Some(pattern);
        Ok(())
    }

    fn destroy(&mut self) {
        *self = Self::default();
    }

    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        if let Some(idx) = self.scalar(row, col)? {
            self.values[idx] = value;
        }
        Ok(())
    }

    fn add_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        if let Some(idx) = self.scalar(row, col)? {
            self.values[idx] += value;
        }
        Ok(())
    }

    fn get_value(&self, row: usize, col: usize) -> Result<f64> {
        Ok(self.scalar(row, col)?.map_or(0.0, |idx| self.values[idx]))
    }

    fn set_values(&mut self, acc: &BlockAccumulator) -> Result<()> {
        self.scatter(acc, false)
    }

    fn add_values(&mut self, acc: &BlockAccumulator) -> Result<()> {
        self.scatter(acc, true)
    }

    fn get_values(&self, acc: &mut BlockAccumulator) -> Result<()> {
        let positions = self.positions(acc)?;
        let neq = self.map.neq();
        let n = acc.num_blocks();
        for i in 0..n {
            for j in 0..n {
                let k = positions[i * n + j];
                for a in 0..neq {
                    for b in 0..neq {
                        acc.mat[(i * neq + a, j * neq + b)] = k.map_or(0.0, |k| self.values[self.at(k, a, b)]);
                    }
                }
            }
        }
        Ok(())
    }

    fn set_row(&mut self, blockrow: usize, eq: usize, diagval: f64, offdiagval: f64) {
        if !self.is_created() || !self.map.is_owned_lid(blockrow) {
            return;
        }
        let neq = self.map.neq();
        let rb = self.map.block_of_lid(blockrow);
        for k in self.row_range(rb) {
            let cb = self.col_idx[k];
            for b in 0..neq {
                let idx = self.at(k, eq, b);
                self.values[idx] = if cb == rb && b == eq { diagval } else { offdiagval };
            }
        }
    }

    fn symmetric_dirichlet(&mut self, blockrow: usize, eq: usize, value: f64, rhs: &mut dyn Vector) {
        if !self.is_created() {
            return;
        }
        let neq = self.map.neq();
        let cb = self.map.block_of_lid(blockrow);
        for e in 0..self.col_entries[cb].len() {
            let (rb, k) = self.col_entries[cb][e];
            let row_lid = self.map.lid_of_block(rb);
            for a in 0..neq {
                if rb == cb && a == eq {
                    continue;
                }
                let idx = self.at(k, a, eq);
                let v = self.values[idx];
                if v != 0.0 {
                    rhs.add_block_value(row_lid, a, -v * value);
                    self.values[idx] = 0.0;
                }
            }
        }
        self.set_row(blockrow, eq, 1.0, 0.0);
    }

    fn tie_blockrow_pairs(&mut self, to: usize, from: usize) -> Result<()> {
        if to == from {
            return Err(LssError::NotSupported(format!("block row {} tied to itself", to)));
        }
        match (self.map.is_owned_lid(to), self.map.is_owned_lid(from)) {
            (false, false) => return Ok(()),
            (true, true) => {}
            _ => {
                return Err(LssError::NotSupported(format!(
                    "periodic pair ({}, {}) is split across ranks",
                    to, from
                )));
            }
        }
        let rt = self.map.block_of_lid(to);
        let rf = self.map.block_of_lid(from);
        let (to_range, from_range) = (self.row_range(rt), self.row_range(rf));
        if self.col_idx[to_range.clone()] != self.col_idx[from_range.clone()] {
            return Err(LssError::NotSupported(format!(
                "block rows {} and {} have different sparsity",
                to, from
            )));
        }
        let bs = self.block_len();
        for (kt, kf) in to_range.zip(from_range.clone()) {
            for e in 0..bs {
                self.values[kt * bs + e] += self.values[kf * bs + e];
            }
        }
        let neq = self.map.neq();
        for kf in from_range {
            let cb = self.col_idx[kf];
            for a in 0..neq {
                for b in 0..neq {
                    let idx = self.at(kf, a, b);
                    self.values[idx] = match (a == b, cb) {
                        (true, c) if c == rt => 1.0,
                        (true, c) if c == rf => -1.0,
                        _ => 0.0,
                    };
                }
            }
        }
        Ok(())
    }

    fn set_diagonal(&mut self, diag: &[f64]) -> Result<()> {
        self.update_diagonal(diag, false)
    }

    fn add_diagonal(&mut self, diag: &[f64]) -> Result<()> {
        self.update_diagonal(diag, true)
    }

    fn get_diagonal(&self) -> Vec<f64> {
        let neq = self.map.neq();
        let mut diag = vec![0.0; self.map.len()];
        for rb in 0..self.map.num_owned() {
            let lid = self.map.lid_of_block(rb);
            for eq in 0..neq {
                diag[lid * neq + eq] = self.values[self.at(self.diag_pos[rb], eq, eq)];
            }
        }
        diag
    }

    fn reset(&mut self, value: f64) {
        #[cfg(feature = "rayon")]
        self.values.par_iter_mut().for_each(|v| *v = value);
        #[cfg(not(feature = "rayon"))]
        self.values.iter_mut().for_each(|v| *v = value);
    }

    fn print(&self, out: &mut dyn Write) -> Result<()> {
        let neq = self.map.neq();
        writeln!(out, "VARIABLES=COL,ROW,VAL")?;
        writeln!(
            out,
            "ZONE T=\"matrix, {} owned of {} block rows, {} blocks of {}x{}\"",
            self.map.num_owned(),
            self.map.num_blocks(),
            self.col_idx.len(),
            neq,
            neq
        )?;
        for rb in 0..self.map.num_owned() {
            let row_lid = self.map.lid_of_block(rb);
            for k in self.row_range(rb) {
                let col_lid = self.map.lid_of_block(self.col_idx[k]);
                for a in 0..neq {
                    for b in 0..neq {
                        writeln!(
                            out,
                            "{} {} {:e}",
                            col_lid * neq + b,
                            row_lid * neq + a,
                            self.values[self.at(k, a, b)]
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}
