//! Matrix back end that stores nothing.

use std::io::Write;
use std::rc::Rc;

use crate::error::{LssError, Result};
use crate::parallel::CommPattern;
use crate::system::{BlockAccumulator, IndexMap};
use crate::vector::Vector;

use super::Matrix;

/// Keeps the shape of a matrix and accepts every operation. Reads return
/// zero.
#[derive(Clone, Debug, Default)]
pub struct EmptyMatrix {
    created: bool,
    neq: usize,
    blockrow_size: usize,
}

impl EmptyMatrix {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Matrix for EmptyMatrix {
    fn solvertype(&self) -> &'static str {
        "empty"
    }

    fn is_created(&self) -> bool {
        self.created
    }

    fn neq(&self) -> usize {
        self.neq
    }

    fn blockrow_size(&self) -> usize {
        self.blockrow_size
    }

    fn blockcol_size(&self) -> usize {
        self.blockrow_size
    }

    fn create_with_map(
        &mut self,
        pattern: Rc<CommPattern>,
        map: Rc<IndexMap>,
        _node_connectivity: &[usize],
        _starting_indices: &[usize],
    ) -> Result<()> {
        if self.created {
            return Err(LssError::Setup("matrix already created".into()));
        }
        self.neq = map.neq();
        self.blockrow_size = pattern.size();
        self.created = true;
        Ok(())
    }

    fn destroy(&mut self) {
        *self = Self::default();
    }

    fn set_value(&mut self, _row: usize, _col: usize, _value: f64) -> Result<()> {
        Ok(())
    }

    fn add_value(&mut self, _row: usize, _col: usize, _value: f64) -> Result<()> {
        Ok(())
    }

    fn get_value(&self, _row: usize, _col: usize) -> Result<f64> {
        Ok(0.0)
    }

    fn set_values(&mut self, _acc: &BlockAccumulator) -> Result<()> {
        Ok(())
    }

    fn add_values(&mut self, _acc: &BlockAccumulator) -> Result<()> {
        Ok(())
    }

    fn get_values(&self, acc: &mut BlockAccumulator) -> Result<()> {
        let n = acc.size();
        acc.mat = faer::Mat::zeros(n, n);
        Ok(())
    }

    fn set_row(&mut self, _blockrow: usize, _eq: usize, _diagval: f64, _offdiagval: f64) {}

    fn symmetric_dirichlet(&mut self, _blockrow: usize, _eq: usize, _value: f64, _rhs: &mut dyn Vector) {}

    fn tie_blockrow_pairs(&mut self, _to: usize, _from: usize) -> Result<()> {
        Ok(())
    }

    fn set_diagonal(&mut self, _diag: &[f64]) -> Result<()> {
        Ok(())
    }

    fn add_diagonal(&mut self, _diag: &[f64]) -> Result<()> {
        Ok(())
    }

    fn get_diagonal(&self) -> Vec<f64> {
        vec![0.0; self.blockrow_size * self.neq]
    }

    fn reset(&mut self, _value: f64) {}

    fn print(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "VARIABLES=COL,ROW,VAL")?;
        writeln!(out, "ZONE T=\"empty matrix, {} x {}\"", self.blockrow_size, self.neq)?;
        Ok(())
    }
}
