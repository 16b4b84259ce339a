//! Distributed vectors addressed by process-local `(block-row, equation)`
//! coordinates.
//!
//! Rows are numbered `lid * neq + eq` where `lid` is a local id of the
//! system's [`CommPattern`]. Ghost rows are stored next to owned ones and
//! only refreshed by an explicit [`Vector::sync`].

use std::io::Write;
use std::rc::Rc;

use crate::error::Result;
use crate::parallel::CommPattern;
use crate::system::{BlockAccumulator, IndexMap, VariablesDescriptor};

pub mod block_vector;
pub mod empty;

pub use block_vector::BlockVector;
pub use empty::EmptyVector;

pub trait Vector {
    /// Back end name; vectors and matrices of one system share it.
    fn solvertype(&self) -> &'static str;
    fn is_created(&self) -> bool;
    fn neq(&self) -> usize;
    /// Number of block-rows, owned and ghost.
    fn blockrow_size(&self) -> usize;

    /// Allocates storage for the pattern's local ids using a shared index
    /// map. Fails when the vector already exists.
    fn create_with_map(&mut self, pattern: Rc<CommPattern>, map: Rc<IndexMap>) -> Result<()>;

    fn create(&mut self, pattern: Rc<CommPattern>, neq: usize) -> Result<()> {
        self.create_blocked(pattern, &VariablesDescriptor::single(neq))
    }

    fn create_blocked(&mut self, pattern: Rc<CommPattern>, vars: &VariablesDescriptor) -> Result<()> {
        let map = IndexMap::new(&pattern, vars)?;
        self.create_with_map(pattern, Rc::new(map))
    }

    fn destroy(&mut self);

    fn set_value(&mut self, row: usize, value: f64);
    fn add_value(&mut self, row: usize, value: f64);
    fn get_value(&self, row: usize) -> f64;

    fn set_block_value(&mut self, blockrow: usize, eq: usize, value: f64) {
        let row = blockrow * self.neq() + eq;
        self.set_value(row, value);
    }

    fn add_block_value(&mut self, blockrow: usize, eq: usize, value: f64) {
        let row = blockrow * self.neq() + eq;
        self.add_value(row, value);
    }

    fn get_block_value(&self, blockrow: usize, eq: usize) -> f64 {
        self.get_value(blockrow * self.neq() + eq)
    }

    fn set_rhs_values(&mut self, acc: &BlockAccumulator) {
        scatter(self, &acc.indices, &acc.rhs, acc.neq(), false);
    }

    fn add_rhs_values(&mut self, acc: &BlockAccumulator) {
        scatter(self, &acc.indices, &acc.rhs, acc.neq(), true);
    }

    fn get_rhs_values(&self, acc: &mut BlockAccumulator) {
        let neq = acc.neq();
        gather(self, &acc.indices, &mut acc.rhs, neq);
    }

    fn set_sol_values(&mut self, acc: &BlockAccumulator) {
        scatter(self, &acc.indices, &acc.sol, acc.neq(), false);
    }

    fn add_sol_values(&mut self, acc: &BlockAccumulator) {
        scatter(self, &acc.indices, &acc.sol, acc.neq(), true);
    }

    fn get_sol_values(&self, acc: &mut BlockAccumulator) {
        let neq = acc.neq();
        gather(self, &acc.indices, &mut acc.sol, neq);
    }

    /// Fills owned and ghost rows with `value`.
    fn reset(&mut self, value: f64);

    /// Refreshes ghost rows from their owners. Collective.
    fn sync(&mut self) -> Result<()>;

    /// Overwrites every row from `values`, given in row order.
    fn set_values(&mut self, values: &[f64]) -> Result<()>;
    /// Every row, in row order.
    fn get_values(&self) -> Vec<f64>;

    /// Raw storage, owned rows first.
    fn data(&self) -> &[f64];
    fn data_mut(&mut self) -> &mut [f64];

    /// Euclidean norm over the owned rows of all ranks. Collective.
    fn norm(&self) -> Result<f64>;

    fn print(&self, out: &mut dyn Write) -> Result<()>;
}

fn scatter<V: Vector + ?Sized>(v: &mut V, indices: &[usize], values: &[f64], neq: usize, add: bool) {
    debug_assert_eq!(neq, v.neq(), "accumulator and vector disagree on neq");
    debug_assert_eq!(values.len(), indices.len() * neq);
    for (i, &blockrow) in indices.iter().enumerate() {
        for eq in 0..neq {
            let value = values[i * neq + eq];
            if add {
                v.add_block_value(blockrow, eq, value);
            } else {
                v.set_block_value(blockrow, eq, value);
            }
        }
    }
}

fn gather<V: Vector + ?Sized>(v: &V, indices: &[usize], values: &mut [f64], neq: usize) {
    debug_assert_eq!(neq, v.neq(), "accumulator and vector disagree on neq");
    for (i, &blockrow) in indices.iter().enumerate() {
        for eq in 0..neq {
            values[i * neq + eq] = v.get_block_value(blockrow, eq);
        }
    }
}

/// The closed set of vector back ends.
#[derive(Clone)]
pub enum AnyVector {
    Empty(EmptyVector),
    Native(BlockVector),
}

impl AnyVector {
    pub fn as_native(&self) -> Option<&BlockVector> {
        match self {
            AnyVector::Native(v) => Some(v),
            AnyVector::Empty(_) => None,
        }
    }

    pub fn as_native_mut(&mut self) -> Option<&mut BlockVector> {
        match self {
            AnyVector::Native(v) => Some(v),
            AnyVector::Empty(_) => None,
        }
    }

    pub fn index_map(&self) -> Option<&Rc<IndexMap>> {
        self.as_native().map(BlockVector::index_map)
    }
}

impl From<EmptyVector> for AnyVector {
    fn from(v: EmptyVector) -> Self {
        AnyVector::Empty(v)
    }
}

impl From<BlockVector> for AnyVector {
    fn from(v: BlockVector) -> Self {
        AnyVector::Native(v)
    }
}

macro_rules! dispatch {
    ($self:ident, $v:ident => $body:expr) => {
        match $self {
            AnyVector::Empty($v) => $body,
            AnyVector::Native($v) => $body,
        }
    };
}

impl Vector for AnyVector {
    fn solvertype(&self) -> &'static str {
        dispatch!(self, v => v.solvertype())
    }
    fn is_created(&self) -> bool {
        dispatch!(self, v => v.is_created())
    }
    fn neq(&self) -> usize {
        dispatch!(self, v => v.neq())
    }
    fn blockrow_size(&self) -> usize {
        dispatch!(self, v => v.blockrow_size())
    }
    fn create_with_map(&mut self, pattern: Rc<CommPattern>, map: Rc<IndexMap>) -> Result<()> {
        dispatch!(self, v => v.create_with_map(pattern, map))
    }
    fn destroy(&mut self) {
        dispatch!(self, v => v.destroy())
    }
    fn set_value(&mut self, row: usize, value: f64) {
        dispatch!(self, v => v.set_value(row, value))
    }
    fn add_value(&mut self, row: usize, value: f64) {
        dispatch!(self, v => v.add_value(row, value))
    }
    fn get_value(&self, row: usize) -> f64 {
        dispatch!(self, v => v.get_value(row))
    }
    fn reset(&mut self, value: f64) {
        dispatch!(self, v => v.reset(value))
    }
    fn sync(&mut self) -> Result<()> {
        dispatch!(self, v => v.sync())
    }
    fn set_values(&mut self, values: &[f64]) -> Result<()> {
        dispatch!(self, v => v.set_values(values))
    }
    fn get_values(&self) -> Vec<f64> {
        dispatch!(self, v => v.get_values())
    }
    fn data(&self) -> &[f64] {
        dispatch!(self, v => v.data())
    }
    fn data_mut(&mut self) -> &mut [f64] {
        dispatch!(self, v => v.data_mut())
    }
    fn norm(&self) -> Result<f64> {
        dispatch!(self, v => v.norm())
    }
    fn print(&self, out: &mut dyn Write) -> Result<()> {
        dispatch!(self, v => v.print(out))
    }
}
