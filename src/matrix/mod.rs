//! Distributed block-sparse matrices.
//!
//! A matrix shares the process-local row numbering of its companion
//! vectors: scalar row `lid * neq + eq` for a local id `lid` of the
//! [`CommPattern`]. Only rows of owned local ids are stored; operations on
//! ghost rows are skipped because the owner assembles them. Columns cover
//! owned and ghost local ids so that off-process couplings can be stored.
//!
//! The sparsity is fixed at creation. An accumulator pair `(i, j)` of an
//! owned row without a stored block is an [`LssError::EntryNotFound`]
//! error; nothing is written when any pair of a call fails.

use std::io::Write;
use std::rc::Rc;

use crate::error::{LssError, Result};
use crate::parallel::CommPattern;
use crate::system::{BlockAccumulator, IndexMap, VariablesDescriptor};
use crate::vector::Vector;

pub mod block_csr;
pub mod empty;

pub use block_csr::BlockCsrMatrix;
pub use empty::EmptyMatrix;

pub trait Matrix {
    fn solvertype(&self) -> &'static str;
    fn is_created(&self) -> bool;
    fn neq(&self) -> usize;
    fn blockrow_size(&self) -> usize;
    fn blockcol_size(&self) -> usize;

    /// Builds the sparsity from a CSR adjacency over local ids:
    /// the neighbours of `lid` are
    /// `node_connectivity[starting_indices[lid]..starting_indices[lid + 1]]`.
    fn create_with_map(
        &mut self,
        pattern: Rc<CommPattern>,
        map: Rc<IndexMap>,
        node_connectivity: &[usize],
        starting_indices: &[usize],
    ) -> Result<()>;

    fn create(
        &mut self,
        pattern: Rc<CommPattern>,
        neq: usize,
        node_connectivity: &[usize],
        starting_indices: &[usize],
    ) -> Result<()> {
        self.create_blocked(pattern, &VariablesDescriptor::single(neq), node_connectivity, starting_indices)
    }

    fn create_blocked(
        &mut self,
        pattern: Rc<CommPattern>,
        vars: &VariablesDescriptor,
        node_connectivity: &[usize],
        starting_indices: &[usize],
    ) -> Result<()> {
        let map = IndexMap::new(&pattern, vars)?;
        self.create_with_map(pattern, Rc::new(map), node_connectivity, starting_indices)
    }

    fn destroy(&mut self);

    /// Scalar access in process-local rows and columns.
    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<()>;
    fn add_value(&mut self, row: usize, col: usize, value: f64) -> Result<()>;
    fn get_value(&self, row: usize, col: usize) -> Result<f64>;

    /// Overwrites the block of every pair `(indices[i], indices[j])`.
    fn set_values(&mut self, acc: &BlockAccumulator) -> Result<()>;
    /// Accumulates the block of every pair `(indices[i], indices[j])`.
    fn add_values(&mut self, acc: &BlockAccumulator) -> Result<()>;
    /// Reads the blocks into `acc.mat`. Ghost rows read as zero.
    fn get_values(&self, acc: &mut BlockAccumulator) -> Result<()>;

    /// Sets every entry of row `(blockrow, eq)` to `offdiagval`, except the
    /// diagonal which becomes `diagval`.
    fn set_row(&mut self, blockrow: usize, eq: usize, diagval: f64, offdiagval: f64);

    /// Eliminates column `(blockrow, eq)`: `rhs[k] -= a[k][col] * value` for
    /// every other stored row `k`, then the column and row are cleared and
    /// the diagonal set to one. Requires a structurally symmetric sparsity,
    /// which is not checked. Every rank holding `blockrow` must call it.
    fn symmetric_dirichlet(&mut self, blockrow: usize, eq: usize, value: f64, rhs: &mut dyn Vector);

    /// Adds row `from` to row `to` and rewrites `from` as
    /// `x[to] - x[from] = 0`. Both rows need the same column pattern.
    fn tie_blockrow_pairs(&mut self, to: usize, from: usize) -> Result<()>;

    /// Diagonal in process-local row order, `blockrow_size() * neq()` values.
    fn set_diagonal(&mut self, diag: &[f64]) -> Result<()>;
    fn add_diagonal(&mut self, diag: &[f64]) -> Result<()>;
    fn get_diagonal(&self) -> Vec<f64>;

    /// Sets every stored entry to `value`, keeping the sparsity.
    fn reset(&mut self, value: f64);

    fn print(&self, out: &mut dyn Write) -> Result<()>;

    /// Whether `other` can replace `self` inside a system.
    fn is_swappable(&self, other: &dyn Matrix) -> bool {
        self.solvertype() == other.solvertype()
            && self.neq() == other.neq()
            && self.blockrow_size() == other.blockrow_size()
            && self.blockcol_size() == other.blockcol_size()
    }
}

pub(crate) fn check_diagonal_len(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(LssError::Setup(format!(
            "diagonal of {} values for a matrix of {} rows",
            got, expected
        )));
    }
    Ok(())
}

/// The closed set of matrix back ends.
#[derive(Clone)]
pub enum AnyMatrix {
    Empty(EmptyMatrix),
    Native(BlockCsrMatrix),
}

impl AnyMatrix {
    pub fn as_native(&self) -> Option<&BlockCsrMatrix> {
        match self {
            AnyMatrix::Native(m) => Some(m),
            AnyMatrix::Empty(_) => None,
        }
    }

    pub fn as_native_mut(&mut self) -> Option<&mut BlockCsrMatrix> {
        match self {
            AnyMatrix::Native(m) => Some(m),
            AnyMatrix::Empty(_) => None,
        }
    }

    /// Row translation of a native matrix; the empty back end has none.
    pub fn index_map(&self) -> Option<&Rc<IndexMap>> {
        self.as_native().map(BlockCsrMatrix::index_map)
    }
}

impl From<EmptyMatrix> for AnyMatrix {
    fn from(m: EmptyMatrix) -> Self {
        AnyMatrix::Empty(m)
    }
}

impl From<BlockCsrMatrix> for AnyMatrix {
    fn from(m: BlockCsrMatrix) -> Self {
        AnyMatrix::Native(m)
    }
}

macro_rules! dispatch {
    ($self:ident, $m:ident => $body:expr) => {
        match $self {
            AnyMatrix::Empty($m) => $body,
            AnyMatrix::Native($m) => $body,
        }
    };
}

impl Matrix for AnyMatrix {
    fn solvertype(&self) -> &'static str {
        dispatch!(self, m => m.solvertype())
    }
    fn is_created(&self) -> bool {
        dispatch!(self, m => m.is_created())
    }
    fn neq(&self) -> usize {
        dispatch!(self, m => m.neq())
    }
    fn blockrow_size(&self) -> usize {
        dispatch!(self, m => m.blockrow_size())
    }
    fn blockcol_size(&self) -> usize {
        dispatch!(self, m => m.blockcol_size())
    }
    fn create_with_map(
        &mut self,
        pattern: Rc<CommPattern>,
        map: Rc<IndexMap>,
        node_connectivity: &[usize],
        starting_indices: &[usize],
    ) -> Result<()> {
        dispatch!(self, m => m.create_with_map(pattern, map, node_connectivity, starting_indices))
    }
    fn destroy(&mut self) {
        dispatch!(self, m => m.destroy())
    }
    fn set_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        dispatch!(self, m => m.set_value(row, col, value))
    }
    fn add_value(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        dispatch!(self, m => m.add_value(row, col, value))
    }
    fn get_value(&self, row: usize, col: usize) -> Result<f64> {
        dispatch!(self, m => m.get_value(row, col))
    }
    fn set_values(&mut self, acc: &BlockAccumulator) -> Result<()> {
        dispatch!(self, m => m.set_values(acc))
    }
    fn add_values(&mut self, acc: &BlockAccumulator) -> Result<()> {
        dispatch!(self, m => m.add_values(acc))
    }
    fn get_values(&self, acc: &mut BlockAccumulator) -> Result<()> {
        dispatch!(self, m => m.get_values(acc))
    }
    fn set_row(&mut self, blockrow: usize, eq: usize, diagval: f64, offdiagval: f64) {
        dispatch!(self, m => m.set_row(blockrow, eq, diagval, offdiagval))
    }
    fn symmetric_dirichlet(&mut self, blockrow: usize, eq: usize, value: f64, rhs: &mut dyn Vector) {
        dispatch!(self, m => m.symmetric_dirichlet(blockrow, eq, value, rhs))
    }
    fn tie_blockrow_pairs(&mut self, to: usize, from: usize) -> Result<()> {
        dispatch!(self, m => m.tie_blockrow_pairs(to, from))
    }
    fn set_diagonal(&mut self, diag: &[f64]) -> Result<()> {
        dispatch!(self, m => m.set_diagonal(diag))
    }
    fn add_diagonal(&mut self, diag: &[f64]) -> Result<()> {
        dispatch!(self, m => m.add_diagonal(diag))
    }
    fn get_diagonal(&self) -> Vec<f64> {
        dispatch!(self, m => m.get_diagonal())
    }
    fn reset(&mut self, value: f64) {
        dispatch!(self, m => m.reset(value))
    }
    fn print(&self, out: &mut dyn Write) -> Result<()> {
        dispatch!(self, m => m.print(out))
    }
}
